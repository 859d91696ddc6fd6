//! `TpmDevice` backed by the TPM through `tss_esapi`.
//!
//! Commands that authorize a key handle run inside a password (nullauth)
//! session; the key's auth value is set on its ESYS handle when the key is
//! created or loaded. Commands without authorized handles run sessionless.

use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use std::convert::TryFrom;
use std::str::FromStr;
use tracing::{debug, error};
use tss_esapi::{
    attributes::ObjectAttributesBuilder,
    constants::tss::{TPM2_RH_NULL, TPM2_ST_HASHCHECK},
    handles::{KeyHandle, ObjectHandle, PcrHandle, PersistentTpmHandle, TpmHandle},
    interface_types::{
        algorithm::{HashingAlgorithm, PublicAlgorithm, SymmetricMode},
        dynamic_handles::Persistent,
        ecc::EccCurve,
        key_bits::{AesKeyBits, RsaKeyBits},
        resource_handles::{Hierarchy, Provision},
    },
    structures::{
        Auth, Data, Digest, DigestValues, EccParameter, EccPoint as TpmEccPoint, EccScheme,
        EccSignature, HashScheme, HashcheckTicket, InitialValue, KeyDerivationFunctionScheme,
        MaxBuffer, PcrSelectionListBuilder, PcrSlot, Private, Public, PublicBuilder,
        PublicEccParametersBuilder, PublicKeyRsa, PublicRsaParametersBuilder,
        RsaDecryptionScheme, RsaExponent, RsaScheme, RsaSignature, Signature, SignatureScheme,
        SymmetricCipherParameters, SymmetricDefinitionObject,
    },
    traits::{Marshall, UnMarshall},
    tss2_esys::TPMT_TK_HASHCHECK,
    Context, TctiNameConf,
};

use crate::device::{
    EccKeyScheme, EccPoint, EcdsaSignature, HashAlg, KeyBlob, KeyTemplate, RsaPadding, SymMode,
    TpmDevice, AES_BLOCK_SIZE, MAX_BUFFER_SIZE,
};
use crate::error::{DemoError, Result};

/// Largest TPM2_GetRandom request every TPM answers in full.
const MAX_RNG_REQ_SIZE: usize = 32;

pub struct TssKey {
    handle: ObjectHandle,
    public: Public,
    auth: Option<Auth>,
    persistent: bool,
}

impl TssKey {
    fn key_handle(&self) -> KeyHandle {
        KeyHandle::from(self.handle)
    }

    pub fn public(&self) -> &Public {
        &self.public
    }
}

pub struct TssHashSequence {
    handle: ObjectHandle,
    alg: HashAlg,
}

pub struct TssDevice {
    context: Context,
}

impl Drop for TssDevice {
    fn drop(&mut self) {
        self.context.clear_sessions();
    }
}

impl TssDevice {
    /// Open the TPM. Without an explicit TCTI the `TPM2TOOLS_TCTI` / `TCTI`
    /// environment variables are used (e.g. `device:/dev/tpmrm0`).
    pub fn new(tcti: Option<&str>) -> Result<Self> {
        let name_conf = match tcti {
            Some(tcti) => TctiNameConf::from_str(tcti)
                .map_err(|e| DemoError::TctiConfig(format!("{tcti}: {e}")))?,
            None => TctiNameConf::from_environment_variable().map_err(|e| {
                DemoError::TctiConfig(format!(
                    "{e}; set TCTI, e.g. `export TCTI=device:/dev/tpmrm0`"
                ))
            })?,
        };
        let context = Context::new(name_conf).map_err(|tpm_err| {
            error!(?tpm_err, "failed to create TPM context");
            DemoError::Tpm(tpm_err)
        })?;
        debug!("opened TPM context");
        Ok(TssDevice { context })
    }

    fn set_auth(&mut self, handle: ObjectHandle, auth: &Option<Auth>) -> Result<()> {
        if let Some(auth) = auth {
            self.context.tr_set_auth(handle, auth.clone())?;
        }
        Ok(())
    }
}

fn auth_value(auth: &[u8]) -> Result<Option<Auth>> {
    if auth.is_empty() {
        return Ok(None);
    }
    Ok(Some(Auth::try_from(auth.to_vec())?))
}

fn hashing_algorithm(alg: HashAlg) -> HashingAlgorithm {
    match alg {
        HashAlg::Sha1 => HashingAlgorithm::Sha1,
        HashAlg::Sha256 => HashingAlgorithm::Sha256,
        HashAlg::Sha384 => HashingAlgorithm::Sha384,
        HashAlg::Sha512 => HashingAlgorithm::Sha512,
    }
}

fn symmetric_mode(mode: SymMode) -> SymmetricMode {
    match mode {
        SymMode::Cbc => SymmetricMode::Cbc,
        SymMode::Ctr => SymmetricMode::Ctr,
        SymMode::Cfb => SymmetricMode::Cfb,
    }
}

// No need for a hashcheck ticket, none of the demo keys are restricted signers.
fn null_ticket() -> Result<HashcheckTicket> {
    Ok(TPMT_TK_HASHCHECK {
        tag: TPM2_ST_HASHCHECK,
        hierarchy: TPM2_RH_NULL,
        digest: Default::default(),
    }
    .try_into()?)
}

pub(crate) fn public_template(template: &KeyTemplate) -> Result<Public> {
    let public = match *template {
        KeyTemplate::RsaStorage => {
            let object_attributes = ObjectAttributesBuilder::new()
                .with_fixed_tpm(true)
                .with_fixed_parent(true)
                .with_sensitive_data_origin(true)
                .with_user_with_auth(true)
                .with_restricted(true)
                .with_decrypt(true)
                .with_no_da(true)
                .build()?;
            let rsa_params = PublicRsaParametersBuilder::new_restricted_decryption_key(
                SymmetricDefinitionObject::AES_128_CFB,
                RsaKeyBits::Rsa2048,
                RsaExponent::default(),
            )
            .build()?;
            PublicBuilder::new()
                .with_public_algorithm(PublicAlgorithm::Rsa)
                .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
                .with_object_attributes(object_attributes)
                .with_rsa_parameters(rsa_params)
                .with_rsa_unique_identifier(PublicKeyRsa::default())
                .build()?
        }
        KeyTemplate::RsaSignDecrypt => {
            let object_attributes = ObjectAttributesBuilder::new()
                .with_sensitive_data_origin(true)
                .with_user_with_auth(true)
                .with_decrypt(true)
                .with_sign_encrypt(true)
                .with_no_da(true)
                .build()?;
            // Null scheme so the key serves raw, OAEP and PKCS#1 v1.5 requests.
            let rsa_params = PublicRsaParametersBuilder::new()
                .with_scheme(RsaScheme::Null)
                .with_key_bits(RsaKeyBits::Rsa2048)
                .with_exponent(RsaExponent::default())
                .with_is_decryption_key(true)
                .with_is_signing_key(true)
                .with_restricted(false)
                .build()?;
            PublicBuilder::new()
                .with_public_algorithm(PublicAlgorithm::Rsa)
                .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
                .with_object_attributes(object_attributes)
                .with_rsa_parameters(rsa_params)
                .with_rsa_unique_identifier(PublicKeyRsa::default())
                .build()?
        }
        KeyTemplate::EccP256(EccKeyScheme::Ecdsa) => {
            let object_attributes = ObjectAttributesBuilder::new()
                .with_sensitive_data_origin(true)
                .with_user_with_auth(true)
                .with_sign_encrypt(true)
                .with_no_da(true)
                .build()?;
            let ecc_params = PublicEccParametersBuilder::new_unrestricted_signing_key(
                EccScheme::EcDsa(HashScheme::new(HashingAlgorithm::Sha256)),
                EccCurve::NistP256,
            )
            .build()?;
            PublicBuilder::new()
                .with_public_algorithm(PublicAlgorithm::Ecc)
                .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
                .with_object_attributes(object_attributes)
                .with_ecc_parameters(ecc_params)
                .with_ecc_unique_identifier(TpmEccPoint::default())
                .build()?
        }
        KeyTemplate::EccP256(EccKeyScheme::Ecdh) => {
            let object_attributes = ObjectAttributesBuilder::new()
                .with_sensitive_data_origin(true)
                .with_user_with_auth(true)
                .with_decrypt(true)
                .with_no_da(true)
                .build()?;
            let ecc_params = PublicEccParametersBuilder::new()
                .with_symmetric(SymmetricDefinitionObject::Null)
                .with_ecc_scheme(EccScheme::EcDh(HashScheme::new(HashingAlgorithm::Sha256)))
                .with_curve(EccCurve::NistP256)
                .with_key_derivation_function_scheme(KeyDerivationFunctionScheme::Null)
                .with_is_signing_key(false)
                .with_is_decryption_key(true)
                .with_restricted(false)
                .build()?;
            PublicBuilder::new()
                .with_public_algorithm(PublicAlgorithm::Ecc)
                .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
                .with_object_attributes(object_attributes)
                .with_ecc_parameters(ecc_params)
                .with_ecc_unique_identifier(TpmEccPoint::default())
                .build()?
        }
        KeyTemplate::Aes { bits, mode } => {
            let key_bits = match bits {
                128 => AesKeyBits::Aes128,
                192 => AesKeyBits::Aes192,
                256 => AesKeyBits::Aes256,
                other => return Err(DemoError::BufferSize(format!("AES key bits {other}"))),
            };
            // Note that we don't set the key as restricted.
            let object_attributes = ObjectAttributesBuilder::new()
                .with_sensitive_data_origin(true)
                .with_user_with_auth(true)
                .with_sign_encrypt(true)
                .with_decrypt(true)
                .with_no_da(true)
                .build()?;
            let aes_params = SymmetricCipherParameters::new(SymmetricDefinitionObject::Aes {
                key_bits,
                mode: symmetric_mode(mode),
            });
            PublicBuilder::new()
                .with_public_algorithm(PublicAlgorithm::SymCipher)
                .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
                .with_object_attributes(object_attributes)
                .with_symmetric_cipher_parameters(aes_params)
                .with_symmetric_cipher_unique_identifier(Digest::default())
                .build()?
        }
    };
    Ok(public)
}

fn rsa_public_from_tpm(public: &Public) -> Result<RsaPublicKey> {
    let Public::Rsa {
        parameters, unique, ..
    } = public
    else {
        return Err(DemoError::IncorrectKeyType("non-rsa"));
    };
    let n = BigUint::from_bytes_be(unique.as_slice());
    // An exponent of zero means the default of 65537.
    let mut e = parameters.exponent().value();
    if e == 0 {
        e = 65537;
    }
    Ok(RsaPublicKey::new(n, BigUint::from(e))?)
}

fn exponent_u32(public: &RsaPublicKey) -> Result<u32> {
    let bytes = public.e().to_bytes_be();
    if bytes.len() > 4 {
        return Err(DemoError::BufferSize("RSA exponent wider than 32 bits".into()));
    }
    Ok(bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

fn external_rsa_public(public: &RsaPublicKey) -> Result<Public> {
    let key_bits = u16::try_from(public.size() * 8)
        .map_err(|_| DemoError::BufferSize("RSA modulus too large".into()))?;
    let object_attributes = ObjectAttributesBuilder::new()
        .with_user_with_auth(true)
        .with_sign_encrypt(true)
        .build()?;
    let rsa_params = PublicRsaParametersBuilder::new()
        .with_scheme(RsaScheme::RsaSsa(HashScheme::new(HashingAlgorithm::Sha256)))
        .with_key_bits(RsaKeyBits::try_from(key_bits)?)
        .with_exponent(RsaExponent::create(exponent_u32(public)?)?)
        .with_is_signing_key(true)
        .with_is_decryption_key(false)
        .with_restricted(false)
        .build()?;
    Ok(PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::Rsa)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(object_attributes)
        .with_rsa_parameters(rsa_params)
        .with_rsa_unique_identifier(PublicKeyRsa::try_from(public.n().to_bytes_be())?)
        .build()?)
}

impl TpmDevice for TssDevice {
    type Key = TssKey;
    type HashSequence = TssHashSequence;

    fn description(&self) -> &'static str {
        "tpm"
    }

    fn get_random(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let want = (buf.len() - filled).min(MAX_RNG_REQ_SIZE);
            let random = self.context.get_random(want)?;
            let got = random.value();
            if got.is_empty() {
                return Err(DemoError::BufferSize("TPM returned no random bytes".into()));
            }
            let take = got.len().min(want);
            buf[filled..filled + take].copy_from_slice(&got[..take]);
            filled += take;
        }
        Ok(())
    }

    fn read_persistent(&mut self, handle: u32, auth: &[u8]) -> Result<Option<TssKey>> {
        let tpm_handle = TpmHandle::Persistent(PersistentTpmHandle::new(handle)?);
        let object = match self.context.tr_from_tpm_public(tpm_handle) {
            Ok(object) => object,
            Err(tpm_err) => {
                debug!(?tpm_err, handle = format_args!("{handle:#x}"), "persistent handle empty");
                return Ok(None);
            }
        };
        let (public, _name, _qualified_name) = self.context.read_public(object.into())?;
        let auth = auth_value(auth)?;
        self.set_auth(object, &auth)?;
        Ok(Some(TssKey {
            handle: object,
            public,
            auth,
            persistent: true,
        }))
    }

    fn create_primary(&mut self, template: &KeyTemplate, auth: &[u8]) -> Result<TssKey> {
        let public = public_template(template)?;
        let auth = auth_value(auth)?;
        let auth_in = auth.clone();
        let primary = self.context.execute_with_nullauth_session(|ctx| {
            ctx.create_primary(Hierarchy::Owner, public, auth_in, None, None, None)
        })?;
        let handle: ObjectHandle = primary.key_handle.into();
        self.set_auth(handle, &auth)?;
        Ok(TssKey {
            handle,
            public: primary.out_public,
            auth,
            persistent: false,
        })
    }

    fn persist_key(&mut self, key: TssKey, handle: u32) -> Result<TssKey> {
        let persistent = Persistent::Persistent(PersistentTpmHandle::new(handle)?);
        let transient = key.handle;
        let evicted = self.context.execute_with_nullauth_session(|ctx| {
            ctx.evict_control(Provision::Owner, transient, persistent)
        });
        let flushed = self.context.flush_context(transient);
        let stored = match (evicted, flushed) {
            (Ok(stored), Ok(())) => stored,
            (Err(e), flushed) => {
                if let Err(flush_err) = flushed {
                    error!(?flush_err, "failed to flush primary after evict_control error");
                }
                return Err(e.into());
            }
            (Ok(mut stored), Err(e)) => {
                if let Err(close_err) = self.context.tr_close(&mut stored) {
                    error!(?close_err, "failed to close persistent handle");
                }
                return Err(e.into());
            }
        };
        self.set_auth(stored, &key.auth)?;
        Ok(TssKey {
            handle: stored,
            public: key.public,
            auth: key.auth,
            persistent: true,
        })
    }

    fn create_key(
        &mut self,
        parent: &TssKey,
        template: &KeyTemplate,
        auth: &[u8],
    ) -> Result<KeyBlob> {
        let public = public_template(template)?;
        let auth = auth_value(auth)?;
        let parent_handle = parent.key_handle();
        let created = self.context.execute_with_nullauth_session(|ctx| {
            ctx.create(parent_handle, public, auth, None, None, None)
        })?;
        Ok(KeyBlob {
            public: created.out_public.marshall()?,
            private: created.out_private.value().to_vec(),
        })
    }

    fn load_key(&mut self, parent: &TssKey, blob: &KeyBlob, auth: &[u8]) -> Result<TssKey> {
        let public = Public::unmarshall(&blob.public)?;
        let private = Private::try_from(blob.private.clone())?;
        let parent_handle = parent.key_handle();
        let public_in = public.clone();
        let key_handle = self.context.execute_with_nullauth_session(|ctx| {
            ctx.load(parent_handle, private, public_in)
        })?;
        let handle: ObjectHandle = key_handle.into();
        let auth = auth_value(auth)?;
        self.set_auth(handle, &auth)?;
        Ok(TssKey {
            handle,
            public,
            auth,
            persistent: false,
        })
    }

    fn unload_key(&mut self, key: TssKey) -> Result<()> {
        if key.persistent {
            let mut handle = key.handle;
            self.context.tr_close(&mut handle)?;
        } else {
            self.context.flush_context(key.handle)?;
        }
        Ok(())
    }

    fn encrypt_decrypt(&mut self, key: &TssKey, input: &[u8], decrypt: bool) -> Result<Vec<u8>> {
        if input.len() % AES_BLOCK_SIZE != 0 {
            return Err(DemoError::BufferSize(format!(
                "{} is not a multiple of the AES block size",
                input.len()
            )));
        }
        let data = MaxBuffer::try_from(input.to_vec())?;
        let initial_value = InitialValue::try_from(vec![0u8; AES_BLOCK_SIZE])?;
        let key_handle = key.key_handle();
        // Null mode selects the mode fixed in the key's public area.
        let (output, _initial_value) = self.context.execute_with_nullauth_session(|ctx| {
            ctx.encrypt_decrypt_2(key_handle, decrypt, SymmetricMode::Null, data, initial_value)
        })?;
        Ok(output.value().to_vec())
    }

    fn rsa_encrypt(&mut self, key: &TssKey, padding: RsaPadding, msg: &[u8]) -> Result<Vec<u8>> {
        let message = PublicKeyRsa::try_from(msg.to_vec())?;
        let cipher = self.context.rsa_encrypt(
            key.key_handle(),
            message,
            rsa_scheme(padding),
            Data::default(),
        )?;
        Ok(cipher.value().to_vec())
    }

    fn rsa_decrypt(
        &mut self,
        key: &TssKey,
        padding: RsaPadding,
        cipher: &[u8],
    ) -> Result<Vec<u8>> {
        let cipher_text = PublicKeyRsa::try_from(cipher.to_vec())?;
        let key_handle = key.key_handle();
        let plain = self.context.execute_with_nullauth_session(|ctx| {
            ctx.rsa_decrypt(key_handle, cipher_text, rsa_scheme(padding), Data::default())
        })?;
        Ok(plain.value().to_vec())
    }

    fn rsa_public(&mut self, key: &TssKey) -> Result<RsaPublicKey> {
        rsa_public_from_tpm(&key.public)
    }

    fn rsa_sign_digest(&mut self, key: &TssKey, digest: &[u8]) -> Result<Vec<u8>> {
        let tpm_digest = Digest::try_from(digest.to_vec())?;
        let validation = null_ticket()?;
        let key_handle = key.key_handle();
        let signature = self.context.execute_with_nullauth_session(|ctx| {
            ctx.sign(
                key_handle,
                tpm_digest,
                SignatureScheme::RsaSsa {
                    hash_scheme: HashScheme::new(HashingAlgorithm::Sha256),
                },
                validation,
            )
        })?;
        match signature {
            Signature::RsaSsa(rsasig) => Ok(rsasig.signature().value().to_vec()),
            _ => Err(DemoError::IncorrectKeyType("unexpected signature type")),
        }
    }

    fn rsa_verify_digest(
        &mut self,
        public: &RsaPublicKey,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let tpm_public = external_rsa_public(public)?;
        let tpm_digest = Digest::try_from(digest.to_vec())?;
        let tpm_signature = Signature::RsaSsa(RsaSignature::create(
            HashingAlgorithm::Sha256,
            PublicKeyRsa::try_from(signature.to_vec())?,
        )?);
        let key_handle = self
            .context
            .load_external_public(tpm_public, Hierarchy::Null)?;
        let verified = self
            .context
            .verify_signature(key_handle, tpm_digest, tpm_signature);
        self.context.flush_context(key_handle.into())?;
        verified.map(|_ticket| ()).map_err(|tpm_err| {
            debug!(?tpm_err, "rsa verify failed");
            DemoError::SignatureVerification
        })
    }

    fn sign_hash(&mut self, key: &TssKey, digest: &[u8]) -> Result<EcdsaSignature> {
        let tpm_digest = Digest::try_from(digest.to_vec())?;
        let validation = null_ticket()?;
        let key_handle = key.key_handle();
        // Null scheme: the key's ECDSA/SHA-256 scheme applies.
        let signature = self.context.execute_with_nullauth_session(|ctx| {
            ctx.sign(key_handle, tpm_digest, SignatureScheme::Null, validation)
        })?;
        match signature {
            Signature::EcDsa(ecsig) => Ok(EcdsaSignature {
                r: ecsig.signature_r().value().to_vec(),
                s: ecsig.signature_s().value().to_vec(),
            }),
            _ => Err(DemoError::IncorrectKeyType("unexpected signature type")),
        }
    }

    fn verify_hash(
        &mut self,
        key: &TssKey,
        digest: &[u8],
        signature: &EcdsaSignature,
    ) -> Result<()> {
        let tpm_digest = Digest::try_from(digest.to_vec())?;
        let tpm_signature = Signature::EcDsa(EccSignature::create(
            HashingAlgorithm::Sha256,
            EccParameter::try_from(signature.r.clone())?,
            EccParameter::try_from(signature.s.clone())?,
        )?);
        self.context
            .verify_signature(key.key_handle(), tpm_digest, tpm_signature)
            .map(|_ticket| ())
            .map_err(|tpm_err| {
                debug!(?tpm_err, "ecdsa verify failed");
                DemoError::SignatureVerification
            })
    }

    fn ecdh_gen(&mut self, key: &TssKey) -> Result<(EccPoint, Vec<u8>)> {
        let (z_point, pub_point) = self.context.ecdh_key_gen(key.key_handle())?;
        Ok((
            EccPoint {
                x: pub_point.x().value().to_vec(),
                y: pub_point.y().value().to_vec(),
            },
            z_point.x().value().to_vec(),
        ))
    }

    fn hash_start(&mut self, alg: HashAlg, auth: &[u8]) -> Result<TssHashSequence> {
        let auth = auth_value(auth)?;
        let handle = self
            .context
            .hash_sequence_start(hashing_algorithm(alg), auth.clone())?;
        self.set_auth(handle, &auth)?;
        Ok(TssHashSequence { handle, alg })
    }

    fn hash_update(&mut self, seq: &mut TssHashSequence, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(MAX_BUFFER_SIZE) {
            let buffer = MaxBuffer::try_from(chunk.to_vec())?;
            let handle = seq.handle;
            self.context
                .execute_with_nullauth_session(|ctx| ctx.sequence_update(handle, buffer))?;
        }
        Ok(())
    }

    fn hash_finish(&mut self, seq: TssHashSequence) -> Result<Vec<u8>> {
        let handle = seq.handle;
        let (digest, _ticket) = self.context.execute_with_nullauth_session(|ctx| {
            ctx.sequence_complete(handle, MaxBuffer::default(), Hierarchy::Null)
        })?;
        debug!(alg = seq.alg.name(), len = digest.len(), "hash sequence complete");
        Ok(digest.value().to_vec())
    }

    fn pcr_read(&mut self, index: u8) -> Result<Vec<u8>> {
        let slot = pcr_slot(index)?;
        let selection = PcrSelectionListBuilder::new()
            .with_selection(HashingAlgorithm::Sha256, &[slot])
            .build()?;
        let (_update_counter, _selection, digests) = self.context.pcr_read(selection)?;
        digests
            .value()
            .first()
            .map(|digest| digest.value().to_vec())
            .ok_or(DemoError::PcrIndex(index))
    }

    fn pcr_extend(&mut self, index: u8, digest: &[u8]) -> Result<()> {
        pcr_slot(index)?;
        let pcr_handle = PcrHandle::try_from(u32::from(index))?;
        let mut values = DigestValues::new();
        values.set(HashingAlgorithm::Sha256, Digest::try_from(digest.to_vec())?);
        self.context
            .execute_with_nullauth_session(|ctx| ctx.pcr_extend(pcr_handle, values))?;
        Ok(())
    }
}

fn rsa_scheme(padding: RsaPadding) -> RsaDecryptionScheme {
    match padding {
        RsaPadding::Raw => RsaDecryptionScheme::Null,
        RsaPadding::Oaep => RsaDecryptionScheme::Oaep(HashScheme::new(HashingAlgorithm::Sha256)),
    }
}

fn pcr_slot(index: u8) -> Result<PcrSlot> {
    if usize::from(index) >= crate::pcr::PCR_COUNT {
        return Err(DemoError::PcrIndex(index));
    }
    Ok(PcrSlot::try_from(1u32 << index)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SymMode;

    #[test]
    fn storage_template_is_restricted_decrypt() {
        let public = public_template(&KeyTemplate::RsaStorage).unwrap();
        let attributes = public.object_attributes();
        assert!(attributes.restricted());
        assert!(attributes.decrypt());
        assert!(!attributes.sign_encrypt());
        assert!(attributes.no_da());
    }

    #[test]
    fn aes_template_rejects_odd_key_size() {
        assert!(public_template(&KeyTemplate::aes(100, SymMode::Cbc)).is_err());
        let public = public_template(&KeyTemplate::aes(256, SymMode::Ctr)).unwrap();
        assert!(matches!(public, Public::SymCipher { .. }));
    }

    #[test]
    fn external_public_roundtrips_modulus() {
        let n = BigUint::from_bytes_be(&[0xc5; 256]);
        let public = RsaPublicKey::new(n, BigUint::from(65537u32)).unwrap();
        let tpm_public = external_rsa_public(&public).unwrap();
        let back = rsa_public_from_tpm(&tpm_public).unwrap();
        assert_eq!(back, public);
    }

    #[test]
    fn pcr_index_is_bounded() {
        assert!(pcr_slot(23).is_ok());
        assert!(matches!(pcr_slot(24), Err(DemoError::PcrIndex(24))));
    }
}
