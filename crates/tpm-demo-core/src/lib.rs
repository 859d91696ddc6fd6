//! tpm_demo_core: shared plumbing for the TPM 2.0 demo programs
//!
//! All cryptography, TPM command marshaling and CMS encoding come from
//! external crates. This crate only wires them together so that the demo
//! binaries stay short sequential drivers.
//!
//! # Module layout
//! - `device`    the wrapper API the demos consume (`TpmDevice`) and key templates
//! - `tss`       `TpmDevice` over a `tss_esapi::Context`
//! - `soft`      software fallback implementing the same contract
//! - `keys`      storage key bootstrap, key blobs, scoped unload
//! - `cert`      DER certificate loading and self-signed certificates
//! - `pkcs7`     SignedData encode/verify, single-shot and header/footer
//! - `bench`     timed loops and throughput reports
//! - `pcr`       PCR measurement helpers
//! - `settings`  JSON settings shared by every binary
//! - `paths`     per-user config location
//! - `logging`   tracing subscriber setup
//! - `error`     unified error type

pub mod bench;
pub mod cert;
pub mod device;
pub mod error;
pub mod keys;
pub mod logging;
pub mod paths;
pub mod pcr;
pub mod pkcs7;
pub mod settings;
pub mod soft;
pub mod tss;

pub use device::{
    Backend, EccKeyScheme, HashAlg, KeyBlob, KeyTemplate, RsaPadding, SymMode, TpmDevice,
};
pub use error::DemoError;
