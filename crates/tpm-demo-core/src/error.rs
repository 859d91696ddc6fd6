use thiserror::Error;
use tss_esapi::constants::response_code::Tss2ResponseCodeKind;

#[derive(Debug, Error)]
pub enum DemoError {
    #[error("TPM error: {0}")]
    Tpm(#[from] tss_esapi::Error),

    #[error("TCTI configuration invalid: {0}")]
    TctiConfig(String),

    #[error("Key type does not support this operation: {0}")]
    IncorrectKeyType(&'static str),

    #[error("Key blob invalid: {0}")]
    KeyBlob(String),

    #[error("Buffer size invalid: {0}")]
    BufferSize(String),

    #[error("PCR index {0} is out of range (0-23)")]
    PcrIndex(u8),

    #[error("Signature verification failed")]
    SignatureVerification,

    #[error("Content digest does not match the signed message digest")]
    DigestMismatch,

    #[error("PKCS#7 structure invalid: {0}")]
    Pkcs7Structure(String),

    #[error("No certificate matches the signer identifier")]
    SignerNotFound,

    #[error("ASN.1 error: {0}")]
    Der(#[from] der::Error),

    #[error("SPKI error: {0}")]
    Spki(#[from] spki::Error),

    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("Software crypto error: {0}")]
    SoftCrypto(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

impl DemoError {
    fn tpm_response_kind(&self) -> Option<Tss2ResponseCodeKind> {
        match self {
            DemoError::Tpm(tss_esapi::Error::Tss2Error(rc)) => rc.kind(),
            _ => None,
        }
    }

    /// The TPM does not implement the command (TPM_RC_COMMAND_CODE).
    pub fn is_unsupported_command(&self) -> bool {
        matches!(
            self.tpm_response_kind(),
            Some(Tss2ResponseCodeKind::CommandCode)
        )
    }

    /// The TPM does not implement the requested hash (TPM_RC_HASH).
    pub fn is_unsupported_hash(&self) -> bool {
        matches!(self.tpm_response_kind(), Some(Tss2ResponseCodeKind::Hash))
    }
}

pub type Result<T> = std::result::Result<T, DemoError>;
