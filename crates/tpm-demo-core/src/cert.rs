//! Signer certificates for the PKCS#7 demo.

use const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION;
use der::asn1::{BitString, Null};
use der::{Decode, Encode};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use x509_cert::certificate::{TbsCertificate, Version};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Validity;
pub use x509_cert::Certificate;

use crate::device::TpmDevice;
use crate::error::{DemoError, Result};

pub const SELF_SIGNED_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);
const SERIAL_LEN: usize = 16;

/// `None` when the file does not exist; unreadable or malformed files are errors.
pub fn load_certificate(path: &Path) -> Result<Option<Certificate>> {
    let der = match fs::read(path) {
        Ok(der) => der,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(Certificate::from_der(&der)?))
}

pub fn write_certificate(path: &Path, cert: &Certificate) -> Result<()> {
    fs::write(path, cert.to_der()?)?;
    Ok(())
}

pub fn rsa_public_key(cert: &Certificate) -> Result<RsaPublicKey> {
    let spki = cert.tbs_certificate.subject_public_key_info.to_der()?;
    Ok(RsaPublicKey::from_public_key_der(&spki)?)
}

fn sha256_with_rsa() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: SHA_256_WITH_RSA_ENCRYPTION,
        parameters: Some(Null.into()),
    }
}

/// Issue a self-signed v3 certificate for an RSA device key. The serial
/// number comes from the device RNG and the signature from the key itself.
pub fn self_signed<D: TpmDevice>(
    dev: &mut D,
    key: &D::Key,
    common_name: &str,
) -> Result<Certificate> {
    let public = dev.rsa_public(key)?;
    let spki_der = public.to_public_key_der()?;
    let subject_public_key_info = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes())?;

    let mut serial = [0u8; SERIAL_LEN];
    dev.get_random(&mut serial)?;
    // Positive and never zero.
    serial[0] = (serial[0] & 0x7f) | 0x01;

    let subject = Name::from_str(&format!("CN={common_name}"))?;
    let tbs_certificate = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&serial)?,
        signature: sha256_with_rsa(),
        issuer: subject.clone(),
        validity: Validity::from_now(SELF_SIGNED_VALIDITY)?,
        subject,
        subject_public_key_info,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: None,
    };

    let digest = Sha256::digest(tbs_certificate.to_der()?);
    let signature = dev.rsa_sign_digest(key, &digest)?;
    info!(common_name, "issued self-signed certificate");
    Ok(Certificate {
        tbs_certificate,
        signature_algorithm: sha256_with_rsa(),
        signature: BitString::from_bytes(&signature)?,
    })
}

/// Check a certificate's signature against its own public key.
pub fn verify_self_signed(cert: &Certificate) -> Result<()> {
    let public = rsa_public_key(cert)?;
    let digest = Sha256::digest(cert.tbs_certificate.to_der()?);
    let signature = cert
        .signature
        .as_bytes()
        .ok_or_else(|| DemoError::Pkcs7Structure("certificate signature has unused bits".into()))?;
    public
        .verify(rsa::Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .map_err(|_| DemoError::SignatureVerification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::KeyTemplate;
    use crate::soft::SoftDevice;

    #[test]
    fn self_signed_roundtrips_through_file() {
        let mut dev = SoftDevice::new();
        let parent = dev.create_primary(&KeyTemplate::RsaStorage, b"").unwrap();
        let key = dev
            .create_and_load_key(&parent, &KeyTemplate::RsaSignDecrypt, b"")
            .unwrap();
        let cert = self_signed(&mut dev, &key, "TPM demo signer").unwrap();
        verify_self_signed(&cert).unwrap();
        assert_eq!(cert.tbs_certificate.issuer, cert.tbs_certificate.subject);
        assert_eq!(
            rsa_public_key(&cert).unwrap(),
            dev.rsa_public(&key).unwrap()
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client-rsa-cert.der");
        write_certificate(&path, &cert).unwrap();
        assert_eq!(load_certificate(&path).unwrap(), Some(cert));
    }

    #[test]
    fn missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cert.der");
        assert_eq!(load_certificate(&path).unwrap(), None);
        fs::write(&path, b"not der").unwrap();
        assert!(matches!(load_certificate(&path), Err(DemoError::Der(_))));
    }
}
