//! PKCS#7 (CMS) SignedData with an RSA device key.
//!
//! Two shapes are produced:
//! - single-shot: a complete `ContentInfo` with the content embedded;
//! - header/footer: the DER split around the content, so that
//!   `header || content || footer` is a single-shot encoding of a content
//!   that was only ever seen as a digest.
//!
//! The signer signs SHA-256 over the DER of the signed attributes
//! (contentType, signingTime, messageDigest) with RSASSA-PKCS1-v1_5.

use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, DigestAlgorithmIdentifiers, EncapsulatedContentInfo, SignedAttributes,
    SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use const_oid::db::rfc5911::{
    ID_CONTENT_TYPE, ID_DATA, ID_MESSAGE_DIGEST, ID_SIGNED_DATA, ID_SIGNING_TIME,
};
use const_oid::db::rfc5912::{ID_SHA_256, RSA_ENCRYPTION};
use der::asn1::{Null, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Any, Decode, Encode, Header, Reader, SliceReader, Tag, TagNumber};
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};
use spki::AlgorithmIdentifierOwned;
use std::time::SystemTime;
use tracing::debug;
use x509_cert::attr::Attribute;
use x509_cert::Certificate;

use crate::cert::rsa_public_key;
use crate::device::{TpmDevice, SHA256_DIGEST_SIZE};
use crate::error::{DemoError, Result};

/// Where signature checks run.
pub enum Verifier<'a, D: TpmDevice> {
    /// The device loads the signer's public key and verifies.
    Device(&'a mut D),
    /// `rsa` crate in software.
    Software,
}

impl<D: TpmDevice> Verifier<'_, D> {
    pub fn describe(&self) -> &'static str {
        match self {
            Verifier::Device(_) => "TPM",
            Verifier::Software => "software",
        }
    }

    fn verify(&mut self, public: &RsaPublicKey, digest: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            Verifier::Device(dev) => dev.rsa_verify_digest(public, digest, signature),
            Verifier::Software => public
                .verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)
                .map_err(|_| DemoError::SignatureVerification),
        }
    }
}

/// DER around a detached content: `header || content || footer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDataParts {
    pub header: Vec<u8>,
    pub footer: Vec<u8>,
}

fn sha256_alg() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: ID_SHA_256,
        parameters: None,
    }
}

fn rsa_alg() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: RSA_ENCRYPTION,
        parameters: Some(Null.into()),
    }
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value])?,
    })
}

fn signed_attributes(content_digest: &[u8], signing_time: SystemTime) -> Result<SignedAttributes> {
    let attributes = vec![
        attribute(ID_CONTENT_TYPE, Any::encode_from(&ID_DATA)?)?,
        attribute(
            ID_SIGNING_TIME,
            Any::encode_from(&UtcTime::from_system_time(signing_time)?)?,
        )?,
        attribute(
            ID_MESSAGE_DIGEST,
            Any::encode_from(&OctetString::new(content_digest)?)?,
        )?,
    ];
    Ok(SetOfVec::try_from(attributes)?)
}

fn check_digest_len(content_digest: &[u8]) -> Result<()> {
    if content_digest.len() != SHA256_DIGEST_SIZE {
        return Err(DemoError::BufferSize(format!(
            "content digest must be {SHA256_DIGEST_SIZE} bytes, got {}",
            content_digest.len()
        )));
    }
    Ok(())
}

fn build_signed_data<D: TpmDevice>(
    dev: &mut D,
    key: &D::Key,
    cert: &Certificate,
    content_digest: &[u8],
    content: Option<&[u8]>,
) -> Result<SignedData> {
    check_digest_len(content_digest)?;
    let signed_attrs = signed_attributes(content_digest, SystemTime::now())?;
    let to_sign = Sha256::digest(signed_attrs.to_der()?);
    let signature = dev.rsa_sign_digest(key, &to_sign)?;
    debug!(len = signature.len(), "signed attributes");

    let signer_info = SignerInfo {
        version: CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: cert.tbs_certificate.issuer.clone(),
            serial_number: cert.tbs_certificate.serial_number.clone(),
        }),
        digest_alg: sha256_alg(),
        signed_attrs: Some(signed_attrs),
        signature_algorithm: rsa_alg(),
        signature: OctetString::new(signature)?,
        unsigned_attrs: None,
    };

    let econtent = match content {
        Some(content) => Some(Any::new(Tag::OctetString, content)?),
        None => None,
    };

    Ok(SignedData {
        version: CmsVersion::V1,
        digest_algorithms: DigestAlgorithmIdentifiers::try_from(vec![sha256_alg()])?,
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent,
        },
        certificates: Some(CertificateSet(SetOfVec::try_from(vec![
            CertificateChoices::Certificate(cert.clone()),
        ])?)),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info])?),
    })
}

/// Single-shot SignedData with `content` embedded.
pub fn encode_signed_data<D: TpmDevice>(
    dev: &mut D,
    key: &D::Key,
    cert: &Certificate,
    content: &[u8],
) -> Result<Vec<u8>> {
    let digest = Sha256::digest(content);
    let signed_data = build_signed_data(dev, key, cert, &digest, Some(content))?;
    let content_info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data)?,
    };
    Ok(content_info.to_der()?)
}

fn tlv_header(tag: Tag, len: usize) -> Result<Vec<u8>> {
    Ok(Header::new(tag, len)?.to_der()?)
}

fn context_zero() -> Tag {
    Tag::ContextSpecific {
        constructed: true,
        number: TagNumber::N0,
    }
}

/// SignedData for a content of `content_len` bytes that the caller only
/// supplies as its SHA-256 digest. The content itself goes between the
/// returned header and footer.
pub fn encode_signed_data_ex<D: TpmDevice>(
    dev: &mut D,
    key: &D::Key,
    cert: &Certificate,
    content_digest: &[u8],
    content_len: usize,
) -> Result<SignedDataParts> {
    let signed_data = build_signed_data(dev, key, cert, content_digest, None)?;

    // Everything after the encapsulated content info is the footer.
    let detached = signed_data.to_der()?;
    let mut reader = SliceReader::new(&detached)?;
    let sd_header = Header::decode(&mut reader)?;
    let version = signed_data.version.to_der()?;
    let digest_algorithms = signed_data.digest_algorithms.to_der()?;
    let content_type = signed_data.encap_content_info.econtent_type.to_der()?;
    let eci_detached = signed_data.encap_content_info.to_der()?;
    let footer_start =
        sd_header.to_der()?.len() + version.len() + digest_algorithms.len() + eci_detached.len();
    let footer = detached[footer_start..].to_vec();

    // Rebuild the prefix as if the content were embedded.
    let octet_header = tlv_header(Tag::OctetString, content_len)?;
    let explicit_len = octet_header.len() + content_len;
    let explicit_header = tlv_header(context_zero(), explicit_len)?;
    let eci_len = content_type.len() + explicit_header.len() + explicit_len;
    let eci_header = tlv_header(Tag::Sequence, eci_len)?;
    let sd_len = version.len()
        + digest_algorithms.len()
        + eci_header.len()
        + eci_len
        + footer.len();
    let sd_header = tlv_header(Tag::Sequence, sd_len)?;
    let wrapper_len = sd_header.len() + sd_len;
    let wrapper_header = tlv_header(context_zero(), wrapper_len)?;
    let signed_data_oid = ID_SIGNED_DATA.to_der()?;
    let ci_len = signed_data_oid.len() + wrapper_header.len() + wrapper_len;

    let mut header = tlv_header(Tag::Sequence, ci_len)?;
    for part in [
        &signed_data_oid,
        &wrapper_header,
        &sd_header,
        &version,
        &digest_algorithms,
        &eci_header,
        &content_type,
        &explicit_header,
        &octet_header,
    ] {
        header.extend_from_slice(part);
    }

    Ok(SignedDataParts { header, footer })
}

fn expect_tag(header: &Header, tag: Tag, what: &str) -> Result<()> {
    if header.tag != tag {
        return Err(DemoError::Pkcs7Structure(format!(
            "expected {what}, found {}",
            header.tag
        )));
    }
    Ok(())
}

fn attribute_value<'a>(attrs: &'a SignedAttributes, oid: ObjectIdentifier) -> Result<&'a Any> {
    attrs
        .iter()
        .find(|attr| attr.oid == oid)
        .and_then(|attr| attr.values.iter().next())
        .ok_or_else(|| DemoError::Pkcs7Structure(format!("missing signed attribute {oid}")))
}

fn find_signer_certificate<'a>(
    signed_data: &'a SignedData,
    signer_info: &SignerInfo,
) -> Result<&'a Certificate> {
    let SignerIdentifier::IssuerAndSerialNumber(sid) = &signer_info.sid else {
        return Err(DemoError::SignerNotFound);
    };
    signed_data
        .certificates
        .iter()
        .flat_map(|set| set.0.iter())
        .find_map(|choice| match choice {
            CertificateChoices::Certificate(cert)
                if cert.tbs_certificate.issuer == sid.issuer
                    && cert.tbs_certificate.serial_number == sid.serial_number =>
            {
                Some(cert)
            }
            _ => None,
        })
        .ok_or(DemoError::SignerNotFound)
}

fn verify_signer<D: TpmDevice>(
    verifier: &mut Verifier<'_, D>,
    signed_data: &SignedData,
    content_digest: &[u8],
) -> Result<()> {
    if signed_data.encap_content_info.econtent_type != ID_DATA {
        return Err(DemoError::Pkcs7Structure(format!(
            "unsupported content type {}",
            signed_data.encap_content_info.econtent_type
        )));
    }
    let signer_info = signed_data
        .signer_infos
        .0
        .iter()
        .next()
        .ok_or_else(|| DemoError::Pkcs7Structure("no signer info".into()))?;
    if signer_info.digest_alg.oid != ID_SHA_256 {
        return Err(DemoError::Pkcs7Structure(format!(
            "unsupported digest algorithm {}",
            signer_info.digest_alg.oid
        )));
    }
    let cert = find_signer_certificate(signed_data, signer_info)?;
    let public = rsa_public_key(cert)?;

    let signed_digest = match &signer_info.signed_attrs {
        Some(attrs) => {
            let content_type: ObjectIdentifier =
                attribute_value(attrs, ID_CONTENT_TYPE)?.decode_as()?;
            if content_type != ID_DATA {
                return Err(DemoError::Pkcs7Structure(format!(
                    "signed content type {content_type}"
                )));
            }
            let message_digest: OctetString =
                attribute_value(attrs, ID_MESSAGE_DIGEST)?.decode_as()?;
            if message_digest.as_bytes() != content_digest {
                return Err(DemoError::DigestMismatch);
            }
            Sha256::digest(attrs.to_der()?).to_vec()
        }
        None => content_digest.to_vec(),
    };

    verifier.verify(&public, &signed_digest, signer_info.signature.as_bytes())?;
    debug!(using = verifier.describe(), "signature verified");
    Ok(())
}

/// Verify a single-shot SignedData and return its embedded content.
pub fn verify_signed_data<D: TpmDevice>(
    verifier: &mut Verifier<'_, D>,
    der: &[u8],
) -> Result<Vec<u8>> {
    let content_info = ContentInfo::from_der(der)?;
    if content_info.content_type != ID_SIGNED_DATA {
        return Err(DemoError::Pkcs7Structure(format!(
            "not signed data: {}",
            content_info.content_type
        )));
    }
    let signed_data: SignedData = content_info.content.decode_as()?;
    let content = match &signed_data.encap_content_info.econtent {
        Some(econtent) => econtent.decode_as::<OctetString>()?.as_bytes().to_vec(),
        None => return Err(DemoError::Pkcs7Structure("content is detached".into())),
    };
    let digest = Sha256::digest(&content);
    verify_signer(verifier, &signed_data, &digest)?;
    Ok(content)
}

/// Verify a header/footer pair against the digest and length of the
/// content that sits between them.
pub fn verify_signed_data_ex<D: TpmDevice>(
    verifier: &mut Verifier<'_, D>,
    content_digest: &[u8],
    content_len: usize,
    header: &[u8],
    footer: &[u8],
) -> Result<()> {
    check_digest_len(content_digest)?;
    let mut reader = SliceReader::new(header)?;

    let ci_header = Header::decode(&mut reader)?;
    expect_tag(&ci_header, Tag::Sequence, "ContentInfo")?;
    let total = ci_header.to_der()?.len() + usize::try_from(ci_header.length)?;
    let parts_len = header
        .len()
        .checked_add(content_len)
        .and_then(|len| len.checked_add(footer.len()))
        .ok_or_else(|| DemoError::Pkcs7Structure("content length overflows".into()))?;
    if total != parts_len {
        return Err(DemoError::Pkcs7Structure(format!(
            "ContentInfo spans {total} bytes, parts give {parts_len}"
        )));
    }
    if ObjectIdentifier::decode(&mut reader)? != ID_SIGNED_DATA {
        return Err(DemoError::Pkcs7Structure("not signed data".into()));
    }
    expect_tag(&Header::decode(&mut reader)?, context_zero(), "[0] content")?;
    expect_tag(&Header::decode(&mut reader)?, Tag::Sequence, "SignedData")?;
    let version = CmsVersion::decode(&mut reader)?;
    let digest_algorithms = DigestAlgorithmIdentifiers::decode(&mut reader)?;
    expect_tag(
        &Header::decode(&mut reader)?,
        Tag::Sequence,
        "EncapsulatedContentInfo",
    )?;
    let econtent_type = ObjectIdentifier::decode(&mut reader)?;
    expect_tag(&Header::decode(&mut reader)?, context_zero(), "[0] eContent")?;
    let octet_header = Header::decode(&mut reader)?;
    expect_tag(&octet_header, Tag::OctetString, "OCTET STRING content")?;
    if usize::try_from(octet_header.length)? != content_len {
        return Err(DemoError::Pkcs7Structure(format!(
            "header announces {} content bytes, expected {content_len}",
            octet_header.length
        )));
    }
    if !reader.is_finished() {
        return Err(DemoError::Pkcs7Structure("trailing bytes after content header".into()));
    }

    // Reassemble the SignedData without its content and let the cms types
    // parse the footer.
    let eci = EncapsulatedContentInfo {
        econtent_type,
        econtent: None,
    };
    let mut value = version.to_der()?;
    value.extend_from_slice(&digest_algorithms.to_der()?);
    value.extend_from_slice(&eci.to_der()?);
    value.extend_from_slice(footer);
    let mut detached = tlv_header(Tag::Sequence, value.len())?;
    detached.extend_from_slice(&value);
    let signed_data = SignedData::from_der(&detached)?;

    verify_signer(verifier, &signed_data, content_digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::self_signed;
    use crate::device::KeyTemplate;
    use crate::soft::{SoftDevice, SoftKey};

    fn signer(dev: &mut SoftDevice) -> (SoftKey, Certificate) {
        let parent = dev.create_primary(&KeyTemplate::RsaStorage, b"").unwrap();
        let key = dev
            .create_and_load_key(&parent, &KeyTemplate::RsaSignDecrypt, b"")
            .unwrap();
        let cert = self_signed(dev, &key, "pkcs7 test").unwrap();
        (key, cert)
    }

    fn chunked_content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 1024) as u8).collect()
    }

    #[test]
    fn single_shot_verifies_on_both_paths() {
        let mut dev = SoftDevice::new();
        let (key, cert) = signer(&mut dev);
        let content = b"My encoded DER cert.\0";
        let der = encode_signed_data(&mut dev, &key, &cert, content).unwrap();

        let via_device = verify_signed_data(&mut Verifier::Device(&mut dev), &der).unwrap();
        assert_eq!(via_device, content);
        let via_soft = verify_signed_data(&mut Verifier::<SoftDevice>::Software, &der).unwrap();
        assert_eq!(via_soft, content);
    }

    #[test]
    fn tampered_signature_fails() {
        let mut dev = SoftDevice::new();
        let (key, cert) = signer(&mut dev);
        let der = encode_signed_data(&mut dev, &key, &cert, b"payload").unwrap();
        // The signature is the last element of the encoding.
        let mut tampered = der.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(matches!(
            verify_signed_data(&mut Verifier::<SoftDevice>::Software, &tampered),
            Err(DemoError::SignatureVerification)
        ));
    }

    #[test]
    fn tampered_content_fails_digest_check() {
        let mut dev = SoftDevice::new();
        let (key, cert) = signer(&mut dev);
        let der = encode_signed_data(&mut dev, &key, &cert, b"payload").unwrap();
        let pos = der
            .windows(7)
            .position(|w| w == b"payload")
            .unwrap();
        let mut tampered = der.clone();
        tampered[pos] = b'P';
        assert!(matches!(
            verify_signed_data(&mut Verifier::<SoftDevice>::Software, &tampered),
            Err(DemoError::DigestMismatch)
        ));
    }

    #[test]
    fn unknown_signer_is_rejected() {
        let mut dev = SoftDevice::new();
        let (key, cert) = signer(&mut dev);
        let (_, other_cert) = signer(&mut dev);
        let signed_data =
            build_signed_data(&mut dev, &key, &cert, &Sha256::digest(b"x"), Some(b"x")).unwrap();
        let mut swapped = signed_data.clone();
        swapped.certificates = Some(CertificateSet(
            SetOfVec::try_from(vec![CertificateChoices::Certificate(other_cert)]).unwrap(),
        ));
        assert!(matches!(
            verify_signer(
                &mut Verifier::<SoftDevice>::Software,
                &swapped,
                &Sha256::digest(b"x")
            ),
            Err(DemoError::SignerNotFound)
        ));
    }

    #[test]
    fn header_content_footer_is_a_single_shot_encoding() {
        let mut dev = SoftDevice::new();
        let (key, cert) = signer(&mut dev);
        let content = chunked_content(1024 * 1024 + 12);
        let digest = Sha256::digest(&content);
        let parts = encode_signed_data_ex(&mut dev, &key, &cert, &digest, content.len()).unwrap();

        let mut joined = parts.header.clone();
        joined.extend_from_slice(&content);
        joined.extend_from_slice(&parts.footer);
        let embedded =
            verify_signed_data(&mut Verifier::<SoftDevice>::Software, &joined).unwrap();
        assert_eq!(embedded.len(), content.len());

        verify_signed_data_ex(
            &mut Verifier::Device(&mut dev),
            &digest,
            content.len(),
            &parts.header,
            &parts.footer,
        )
        .unwrap();
    }

    #[test]
    fn ex_rejects_wrong_digest_and_length() {
        let mut dev = SoftDevice::new();
        let (key, cert) = signer(&mut dev);
        let content = chunked_content(3000);
        let digest = Sha256::digest(&content);
        let parts = encode_signed_data_ex(&mut dev, &key, &cert, &digest, content.len()).unwrap();

        let other = Sha256::digest(b"something else");
        assert!(matches!(
            verify_signed_data_ex(
                &mut Verifier::<SoftDevice>::Software,
                &other,
                content.len(),
                &parts.header,
                &parts.footer
            ),
            Err(DemoError::DigestMismatch)
        ));
        assert!(matches!(
            verify_signed_data_ex(
                &mut Verifier::<SoftDevice>::Software,
                &digest,
                content.len() + 1,
                &parts.header,
                &parts.footer
            ),
            Err(DemoError::Pkcs7Structure(_))
        ));
    }

    #[test]
    fn ex_rejects_oversized_content_length() {
        let mut dev = SoftDevice::new();
        let (key, cert) = signer(&mut dev);
        let digest = Sha256::digest(b"short");
        let parts = encode_signed_data_ex(&mut dev, &key, &cert, &digest, 5).unwrap();
        assert!(matches!(
            verify_signed_data_ex(
                &mut Verifier::<SoftDevice>::Software,
                &digest,
                usize::MAX,
                &parts.header,
                &parts.footer
            ),
            Err(DemoError::Pkcs7Structure(_))
        ));
    }

    #[test]
    fn ex_requires_sha256_digest() {
        let mut dev = SoftDevice::new();
        let (key, cert) = signer(&mut dev);
        assert!(matches!(
            encode_signed_data_ex(&mut dev, &key, &cert, &[0u8; 20], 10),
            Err(DemoError::BufferSize(_))
        ));
    }
}
