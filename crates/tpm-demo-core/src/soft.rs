//! Software fallback for `TpmDevice`.
//!
//! Mirrors the TPM contract with RustCrypto primitives so the demos (and the
//! tests) run on machines without a TPM. Persistent handles and PCRs only
//! live as long as the `SoftDevice` value. Auth values are accepted and
//! ignored; key blobs carry plain key material.

use cbc::cipher::{
    block_padding::NoPadding, AsyncStreamCipher, BlockDecryptMut, BlockEncryptMut, KeyIvInit,
    StreamCipher,
};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rsa::{BigUint, Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::collections::HashMap;
use tracing::debug;
use zeroize::Zeroizing;

use crate::device::{
    EccKeyScheme, EccPoint, EcdsaSignature, HashAlg, KeyBlob, KeyTemplate, RsaPadding, SymMode,
    TpmDevice, AES_BLOCK_SIZE, RSA_KEY_BITS, SHA256_DIGEST_SIZE,
};
use crate::error::{DemoError, Result};
use crate::pcr::PCR_COUNT;

const BLOB_STORAGE: u8 = 0x01;
const BLOB_RSA: u8 = 0x02;
const BLOB_ECDSA: u8 = 0x03;
const BLOB_ECDH: u8 = 0x04;
const BLOB_AES: u8 = 0x05;

#[derive(Clone)]
pub enum SoftKey {
    Storage { seed: Zeroizing<Vec<u8>> },
    Rsa(Box<RsaPrivateKey>),
    Ecdsa(p256::ecdsa::SigningKey),
    Ecdh(p256::SecretKey),
    Aes { key: Zeroizing<Vec<u8>>, mode: SymMode },
}

impl SoftKey {
    fn kind(&self) -> &'static str {
        match self {
            SoftKey::Storage { .. } => "storage",
            SoftKey::Rsa(_) => "rsa",
            SoftKey::Ecdsa(_) => "ecdsa",
            SoftKey::Ecdh(_) => "ecdh",
            SoftKey::Aes { .. } => "aes",
        }
    }
}

pub enum SoftHash {
    Sha1(sha1::Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

pub struct SoftDevice {
    persistent: HashMap<u32, SoftKey>,
    pcrs: Vec<[u8; SHA256_DIGEST_SIZE]>,
    /// Keys handed out and not yet unloaded, like TPM object slots.
    open_handles: usize,
}

impl Default for SoftDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftDevice {
    pub fn new() -> Self {
        debug!("opening software device");
        SoftDevice {
            persistent: HashMap::new(),
            pcrs: vec![[0u8; SHA256_DIGEST_SIZE]; PCR_COUNT],
            open_handles: 0,
        }
    }

    pub fn open_handles(&self) -> usize {
        self.open_handles
    }

    fn generate(&mut self, template: &KeyTemplate) -> Result<SoftKey> {
        let key = match *template {
            KeyTemplate::RsaStorage => {
                let mut seed = Zeroizing::new(vec![0u8; 32]);
                OsRng.fill_bytes(&mut seed);
                SoftKey::Storage { seed }
            }
            KeyTemplate::RsaSignDecrypt => {
                let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS as usize)?;
                SoftKey::Rsa(Box::new(private))
            }
            KeyTemplate::EccP256(EccKeyScheme::Ecdsa) => {
                SoftKey::Ecdsa(p256::ecdsa::SigningKey::random(&mut OsRng))
            }
            KeyTemplate::EccP256(EccKeyScheme::Ecdh) => {
                SoftKey::Ecdh(p256::SecretKey::random(&mut OsRng))
            }
            KeyTemplate::Aes { bits, mode } => {
                if bits != 128 && bits != 256 {
                    return Err(DemoError::BufferSize(format!("AES key bits {bits}")));
                }
                let mut key = Zeroizing::new(vec![0u8; bits as usize / 8]);
                OsRng.fill_bytes(&mut key);
                SoftKey::Aes { key, mode }
            }
        };
        Ok(key)
    }

    fn pcr_slot(&mut self, index: u8) -> Result<&mut [u8; SHA256_DIGEST_SIZE]> {
        self.pcrs
            .get_mut(index as usize)
            .ok_or(DemoError::PcrIndex(index))
    }
}

fn soft_err(context: &str, e: impl std::fmt::Display) -> DemoError {
    DemoError::SoftCrypto(format!("{context}: {e}"))
}

fn encode_blob(key: &SoftKey) -> Result<KeyBlob> {
    let (tag, public, material): (u8, Vec<u8>, Vec<u8>) = match key {
        SoftKey::Storage { seed } => (BLOB_STORAGE, Vec::new(), seed.to_vec()),
        SoftKey::Rsa(private) => (
            BLOB_RSA,
            private
                .to_public_key()
                .to_public_key_der()
                .map_err(|e| soft_err("rsa public der", e))?
                .as_bytes()
                .to_vec(),
            private
                .to_pkcs8_der()
                .map_err(|e| soft_err("rsa pkcs8", e))?
                .as_bytes()
                .to_vec(),
        ),
        SoftKey::Ecdsa(signing) => (
            BLOB_ECDSA,
            signing
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            signing.to_bytes().to_vec(),
        ),
        SoftKey::Ecdh(secret) => (
            BLOB_ECDH,
            secret.public_key().to_encoded_point(false).as_bytes().to_vec(),
            secret.to_bytes().to_vec(),
        ),
        SoftKey::Aes { key, mode } => {
            let mode_byte = match mode {
                SymMode::Cbc => 0,
                SymMode::Ctr => 1,
                SymMode::Cfb => 2,
            };
            let mut material = vec![mode_byte];
            material.extend_from_slice(key);
            (BLOB_AES, Vec::new(), material)
        }
    };
    let mut private = Vec::with_capacity(material.len() + 1);
    private.push(tag);
    private.extend_from_slice(&material);
    Ok(KeyBlob { public, private })
}

fn decode_blob(blob: &KeyBlob) -> Result<SoftKey> {
    let (tag, material) = blob
        .private
        .split_first()
        .ok_or_else(|| DemoError::KeyBlob("empty private portion".into()))?;
    let key = match *tag {
        BLOB_STORAGE => SoftKey::Storage {
            seed: Zeroizing::new(material.to_vec()),
        },
        BLOB_RSA => SoftKey::Rsa(Box::new(
            RsaPrivateKey::from_pkcs8_der(material).map_err(|e| DemoError::KeyBlob(e.to_string()))?,
        )),
        BLOB_ECDSA => SoftKey::Ecdsa(
            p256::ecdsa::SigningKey::from_slice(material)
                .map_err(|e| DemoError::KeyBlob(e.to_string()))?,
        ),
        BLOB_ECDH => SoftKey::Ecdh(
            p256::SecretKey::from_slice(material).map_err(|e| DemoError::KeyBlob(e.to_string()))?,
        ),
        BLOB_AES => {
            let (mode, key) = material
                .split_first()
                .ok_or_else(|| DemoError::KeyBlob("missing AES mode".into()))?;
            let mode = match mode {
                0 => SymMode::Cbc,
                1 => SymMode::Ctr,
                2 => SymMode::Cfb,
                other => return Err(DemoError::KeyBlob(format!("AES mode {other}"))),
            };
            SoftKey::Aes {
                key: Zeroizing::new(key.to_vec()),
                mode,
            }
        }
        other => return Err(DemoError::KeyBlob(format!("unknown key tag {other:#x}"))),
    };
    Ok(key)
}

macro_rules! aes_apply {
    ($cipher:ty, $key:expr, $mode:expr, $data:expr, $decrypt:expr) => {{
        let iv = [0u8; AES_BLOCK_SIZE];
        match $mode {
            SymMode::Cbc => {
                if $decrypt {
                    cbc::Decryptor::<$cipher>::new_from_slices($key, &iv)
                        .map_err(|e| soft_err("aes-cbc key", e))?
                        .decrypt_padded_vec_mut::<NoPadding>($data)
                        .map_err(|e| soft_err("aes-cbc", e))
                } else {
                    Ok(cbc::Encryptor::<$cipher>::new_from_slices($key, &iv)
                        .map_err(|e| soft_err("aes-cbc key", e))?
                        .encrypt_padded_vec_mut::<NoPadding>($data))
                }
            }
            SymMode::Ctr => {
                let mut buf = $data.to_vec();
                ctr::Ctr128BE::<$cipher>::new_from_slices($key, &iv)
                    .map_err(|e| soft_err("aes-ctr key", e))?
                    .apply_keystream(&mut buf);
                Ok(buf)
            }
            SymMode::Cfb => {
                let mut buf = $data.to_vec();
                if $decrypt {
                    cfb_mode::Decryptor::<$cipher>::new_from_slices($key, &iv)
                        .map_err(|e| soft_err("aes-cfb key", e))?
                        .decrypt(&mut buf);
                } else {
                    cfb_mode::Encryptor::<$cipher>::new_from_slices($key, &iv)
                        .map_err(|e| soft_err("aes-cfb key", e))?
                        .encrypt(&mut buf);
                }
                Ok(buf)
            }
        }
    }};
}

fn aes_crypt(key: &[u8], mode: SymMode, data: &[u8], decrypt: bool) -> Result<Vec<u8>> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(DemoError::BufferSize(format!(
            "{} is not a multiple of the AES block size",
            data.len()
        )));
    }
    match key.len() {
        16 => aes_apply!(aes::Aes128, key, mode, data, decrypt),
        32 => aes_apply!(aes::Aes256, key, mode, data, decrypt),
        other => Err(DemoError::BufferSize(format!("AES key length {other}"))),
    }
}

fn left_pad(bytes: Vec<u8>, size: usize) -> Vec<u8> {
    if bytes.len() >= size {
        return bytes;
    }
    let mut out = vec![0u8; size - bytes.len()];
    out.extend_from_slice(&bytes);
    out
}

fn rsa_key(key: &SoftKey) -> Result<&RsaPrivateKey> {
    match key {
        SoftKey::Rsa(private) => Ok(private),
        _ => Err(DemoError::IncorrectKeyType(key.kind())),
    }
}

impl TpmDevice for SoftDevice {
    type Key = SoftKey;
    type HashSequence = SoftHash;

    fn description(&self) -> &'static str {
        "software"
    }

    fn get_random(&mut self, buf: &mut [u8]) -> Result<()> {
        OsRng.fill_bytes(buf);
        Ok(())
    }

    fn read_persistent(&mut self, handle: u32, _auth: &[u8]) -> Result<Option<SoftKey>> {
        let key = self.persistent.get(&handle).cloned();
        if key.is_some() {
            self.open_handles += 1;
        }
        Ok(key)
    }

    fn create_primary(&mut self, template: &KeyTemplate, _auth: &[u8]) -> Result<SoftKey> {
        let key = self.generate(template)?;
        self.open_handles += 1;
        Ok(key)
    }

    fn persist_key(&mut self, key: SoftKey, handle: u32) -> Result<SoftKey> {
        self.persistent.insert(handle, key.clone());
        Ok(key)
    }

    fn create_key(
        &mut self,
        parent: &SoftKey,
        template: &KeyTemplate,
        _auth: &[u8],
    ) -> Result<KeyBlob> {
        if !matches!(parent, SoftKey::Storage { .. }) {
            return Err(DemoError::IncorrectKeyType(parent.kind()));
        }
        let key = self.generate(template)?;
        encode_blob(&key)
    }

    fn load_key(&mut self, parent: &SoftKey, blob: &KeyBlob, _auth: &[u8]) -> Result<SoftKey> {
        if !matches!(parent, SoftKey::Storage { .. }) {
            return Err(DemoError::IncorrectKeyType(parent.kind()));
        }
        let key = decode_blob(blob)?;
        self.open_handles += 1;
        Ok(key)
    }

    fn unload_key(&mut self, _key: SoftKey) -> Result<()> {
        self.open_handles = self.open_handles.saturating_sub(1);
        Ok(())
    }

    fn encrypt_decrypt(&mut self, key: &SoftKey, input: &[u8], decrypt: bool) -> Result<Vec<u8>> {
        match key {
            SoftKey::Aes { key, mode } => aes_crypt(key, *mode, input, decrypt),
            other => Err(DemoError::IncorrectKeyType(other.kind())),
        }
    }

    fn rsa_encrypt(&mut self, key: &SoftKey, padding: RsaPadding, msg: &[u8]) -> Result<Vec<u8>> {
        let public = rsa_key(key)?.to_public_key();
        let size = rsa::traits::PublicKeyParts::size(&public);
        match padding {
            RsaPadding::Raw => {
                if msg.len() != size {
                    return Err(DemoError::BufferSize(format!(
                        "raw RSA input must be {size} bytes, got {}",
                        msg.len()
                    )));
                }
                let c = rsa::hazmat::rsa_encrypt(&public, &BigUint::from_bytes_be(msg))?;
                Ok(left_pad(c.to_bytes_be(), size))
            }
            RsaPadding::Oaep => Ok(public.encrypt(&mut OsRng, Oaep::new::<Sha256>(), msg)?),
        }
    }

    fn rsa_decrypt(
        &mut self,
        key: &SoftKey,
        padding: RsaPadding,
        cipher: &[u8],
    ) -> Result<Vec<u8>> {
        let private = rsa_key(key)?;
        match padding {
            RsaPadding::Raw => {
                let size = rsa::traits::PublicKeyParts::size(private);
                let m = rsa::hazmat::rsa_decrypt_and_check(
                    private,
                    Some(&mut OsRng),
                    &BigUint::from_bytes_be(cipher),
                )?;
                Ok(left_pad(m.to_bytes_be(), size))
            }
            RsaPadding::Oaep => Ok(private.decrypt(Oaep::new::<Sha256>(), cipher)?),
        }
    }

    fn rsa_public(&mut self, key: &SoftKey) -> Result<RsaPublicKey> {
        Ok(rsa_key(key)?.to_public_key())
    }

    fn rsa_sign_digest(&mut self, key: &SoftKey, digest: &[u8]) -> Result<Vec<u8>> {
        Ok(rsa_key(key)?.sign(Pkcs1v15Sign::new::<Sha256>(), digest)?)
    }

    fn rsa_verify_digest(
        &mut self,
        public: &RsaPublicKey,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        public
            .verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)
            .map_err(|_| DemoError::SignatureVerification)
    }

    fn sign_hash(&mut self, key: &SoftKey, digest: &[u8]) -> Result<EcdsaSignature> {
        let SoftKey::Ecdsa(signing) = key else {
            return Err(DemoError::IncorrectKeyType(key.kind()));
        };
        let signature: p256::ecdsa::Signature = signing
            .sign_prehash(digest)
            .map_err(|e| soft_err("ecdsa sign", e))?;
        let (r, s) = signature.split_bytes();
        Ok(EcdsaSignature {
            r: r.to_vec(),
            s: s.to_vec(),
        })
    }

    fn verify_hash(
        &mut self,
        key: &SoftKey,
        digest: &[u8],
        signature: &EcdsaSignature,
    ) -> Result<()> {
        let SoftKey::Ecdsa(signing) = key else {
            return Err(DemoError::IncorrectKeyType(key.kind()));
        };
        let sig_bytes = [signature.r.as_slice(), signature.s.as_slice()].concat();
        let sig = p256::ecdsa::Signature::from_slice(&sig_bytes)
            .map_err(|_| DemoError::SignatureVerification)?;
        signing
            .verifying_key()
            .verify_prehash(digest, &sig)
            .map_err(|_| DemoError::SignatureVerification)
    }

    fn ecdh_gen(&mut self, key: &SoftKey) -> Result<(EccPoint, Vec<u8>)> {
        let SoftKey::Ecdh(secret) = key else {
            return Err(DemoError::IncorrectKeyType(key.kind()));
        };
        let ephemeral = p256::ecdh::EphemeralSecret::random(&mut OsRng);
        let shared = ephemeral.diffie_hellman(&secret.public_key());
        let point = ephemeral.public_key().to_encoded_point(false);
        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            return Err(DemoError::SoftCrypto("ephemeral point at infinity".into()));
        };
        Ok((
            EccPoint {
                x: x.to_vec(),
                y: y.to_vec(),
            },
            shared.raw_secret_bytes().to_vec(),
        ))
    }

    fn hash_start(&mut self, alg: HashAlg, _auth: &[u8]) -> Result<SoftHash> {
        Ok(match alg {
            HashAlg::Sha1 => SoftHash::Sha1(sha1::Sha1::new()),
            HashAlg::Sha256 => SoftHash::Sha256(Sha256::new()),
            HashAlg::Sha384 => SoftHash::Sha384(Sha384::new()),
            HashAlg::Sha512 => SoftHash::Sha512(Sha512::new()),
        })
    }

    fn hash_update(&mut self, seq: &mut SoftHash, data: &[u8]) -> Result<()> {
        match seq {
            SoftHash::Sha1(h) => h.update(data),
            SoftHash::Sha256(h) => h.update(data),
            SoftHash::Sha384(h) => h.update(data),
            SoftHash::Sha512(h) => h.update(data),
        }
        Ok(())
    }

    fn hash_finish(&mut self, seq: SoftHash) -> Result<Vec<u8>> {
        Ok(match seq {
            SoftHash::Sha1(h) => h.finalize().to_vec(),
            SoftHash::Sha256(h) => h.finalize().to_vec(),
            SoftHash::Sha384(h) => h.finalize().to_vec(),
            SoftHash::Sha512(h) => h.finalize().to_vec(),
        })
    }

    fn pcr_read(&mut self, index: u8) -> Result<Vec<u8>> {
        Ok(self.pcr_slot(index)?.to_vec())
    }

    fn pcr_extend(&mut self, index: u8, digest: &[u8]) -> Result<()> {
        if digest.len() != SHA256_DIGEST_SIZE {
            return Err(DemoError::BufferSize(format!(
                "PCR extend digest must be {SHA256_DIGEST_SIZE} bytes"
            )));
        }
        let slot = self.pcr_slot(index)?;
        let mut hasher = Sha256::new();
        hasher.update(&slot[..]);
        hasher.update(digest);
        slot.copy_from_slice(&hasher.finalize());
        Ok(())
    }
}
