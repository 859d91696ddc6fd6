//! The slice of the TPM wrapper API that the demo programs drive.
//!
//! Keys and hash sequences are owned by the device. Every key handed out by
//! `create_primary`, `read_persistent` or `load_key` must be given back
//! through `unload_key`; see `keys::with_key` for the scoped form.

use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Result;

/// Size of the message/cipher buffers used by the demos (TPM MaxBuffer).
pub const MAX_BUFFER_SIZE: usize = 1024;
pub const AES_BLOCK_SIZE: usize = 16;
pub const SHA256_DIGEST_SIZE: usize = 32;
pub const RSA_KEY_BITS: u16 = 2048;
pub const ECC_P256_BITS: u16 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlg {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlg {
    pub fn digest_size(self) -> usize {
        match self {
            HashAlg::Sha1 => 20,
            HashAlg::Sha256 => 32,
            HashAlg::Sha384 => 48,
            HashAlg::Sha512 => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlg::Sha1 => "SHA1",
            HashAlg::Sha256 => "SHA256",
            HashAlg::Sha384 => "SHA384",
            HashAlg::Sha512 => "SHA512",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymMode {
    Cbc,
    Ctr,
    Cfb,
}

impl SymMode {
    pub fn name(self) -> &'static str {
        match self {
            SymMode::Cbc => "CBC",
            SymMode::Ctr => "CTR",
            SymMode::Cfb => "CFB",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaPadding {
    /// No padding (TPM_ALG_NULL); input must be exactly the modulus size.
    Raw,
    /// OAEP with SHA-256 and an empty label.
    Oaep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EccKeyScheme {
    Ecdsa,
    Ecdh,
}

/// Public templates for the key types the demos create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyTemplate {
    /// Restricted RSA decryption key used as parent (SRK).
    RsaStorage,
    /// Unrestricted RSA key allowed to both sign and decrypt.
    RsaSignDecrypt,
    /// NIST P-256 key.
    EccP256(EccKeyScheme),
    /// AES key usable for both encrypt and decrypt.
    Aes { bits: u16, mode: SymMode },
}

impl KeyTemplate {
    pub fn aes(bits: u16, mode: SymMode) -> Self {
        KeyTemplate::Aes { bits, mode }
    }
}

/// Public and private portions of a created (not yet loaded) key.
///
/// The encoding of both halves is device specific: marshalled TPM2B
/// structures for the TPM, plain key material for the software device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlob {
    pub public: Vec<u8>,
    pub private: Vec<u8>,
}

/// Affine point on the ECC curve, big endian coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EccPoint {
    pub x: Vec<u8>,
    pub y: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdsaSignature {
    pub r: Vec<u8>,
    pub s: Vec<u8>,
}

/// Which `TpmDevice` implementation a program runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Backend {
    #[default]
    Tpm,
    Soft,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tpm" => Ok(Backend::Tpm),
            "soft" | "software" => Ok(Backend::Soft),
            other => Err(format!("unknown backend '{other}' (expected tpm or soft)")),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Tpm => f.write_str("tpm"),
            Backend::Soft => f.write_str("soft"),
        }
    }
}

pub trait TpmDevice {
    type Key;
    type HashSequence;

    fn description(&self) -> &'static str;

    fn get_random(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Open a key stored at a persistent handle, `None` when the handle is empty.
    fn read_persistent(&mut self, handle: u32, auth: &[u8]) -> Result<Option<Self::Key>>;

    fn create_primary(&mut self, template: &KeyTemplate, auth: &[u8]) -> Result<Self::Key>;

    /// Move a primary key into NV storage under the owner hierarchy. The
    /// transient key is consumed and the persistent one returned.
    fn persist_key(&mut self, key: Self::Key, handle: u32) -> Result<Self::Key>;

    fn create_key(
        &mut self,
        parent: &Self::Key,
        template: &KeyTemplate,
        auth: &[u8],
    ) -> Result<KeyBlob>;

    fn load_key(&mut self, parent: &Self::Key, blob: &KeyBlob, auth: &[u8]) -> Result<Self::Key>;

    fn create_and_load_key(
        &mut self,
        parent: &Self::Key,
        template: &KeyTemplate,
        auth: &[u8],
    ) -> Result<Self::Key> {
        let blob = self.create_key(parent, template, auth)?;
        self.load_key(parent, &blob, auth)
    }

    fn unload_key(&mut self, key: Self::Key) -> Result<()>;

    /// AES with an all zero IV. Input length must be a multiple of the block size.
    fn encrypt_decrypt(&mut self, key: &Self::Key, input: &[u8], decrypt: bool) -> Result<Vec<u8>>;

    fn rsa_encrypt(&mut self, key: &Self::Key, padding: RsaPadding, msg: &[u8]) -> Result<Vec<u8>>;

    fn rsa_decrypt(
        &mut self,
        key: &Self::Key,
        padding: RsaPadding,
        cipher: &[u8],
    ) -> Result<Vec<u8>>;

    fn rsa_public(&mut self, key: &Self::Key) -> Result<RsaPublicKey>;

    /// RSASSA-PKCS1-v1_5 over an already computed SHA-256 digest.
    fn rsa_sign_digest(&mut self, key: &Self::Key, digest: &[u8]) -> Result<Vec<u8>>;

    /// Verify an RSASSA-PKCS1-v1_5/SHA-256 signature with an external public key.
    fn rsa_verify_digest(
        &mut self,
        public: &RsaPublicKey,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<()>;

    fn sign_hash(&mut self, key: &Self::Key, digest: &[u8]) -> Result<EcdsaSignature>;

    fn verify_hash(
        &mut self,
        key: &Self::Key,
        digest: &[u8],
        signature: &EcdsaSignature,
    ) -> Result<()>;

    /// Generate an ephemeral key pair and the shared secret with `key`.
    /// Returns the ephemeral public point and the x coordinate of the shared point.
    fn ecdh_gen(&mut self, key: &Self::Key) -> Result<(EccPoint, Vec<u8>)>;

    fn hash_start(&mut self, alg: HashAlg, auth: &[u8]) -> Result<Self::HashSequence>;

    fn hash_update(&mut self, seq: &mut Self::HashSequence, data: &[u8]) -> Result<()>;

    fn hash_finish(&mut self, seq: Self::HashSequence) -> Result<Vec<u8>>;

    /// SHA-256 bank value of a PCR.
    fn pcr_read(&mut self, index: u8) -> Result<Vec<u8>>;

    fn pcr_extend(&mut self, index: u8, digest: &[u8]) -> Result<()>;
}
