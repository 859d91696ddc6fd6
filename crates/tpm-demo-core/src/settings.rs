use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::paths;

pub const DEFAULT_STORAGE_KEY_HANDLE: u32 = 0x8100_0200;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub storage_key: String,
    pub key: String,
    pub usage: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchSettings {
    pub duration_ms: u64,
    pub use_base2: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pkcs7Settings {
    pub cert_path: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PcrSettings {
    pub index: u8,
    pub file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// TCTI name/config, e.g. `device:/dev/tpmrm0` or `mssim:host=localhost,port=2321`.
    pub tcti: Option<String>,
    pub storage_key_handle: u32,
    pub auth: AuthSettings,
    pub bench: BenchSettings,
    pub pkcs7: Pkcs7Settings,
    pub pcr: PcrSettings,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            storage_key: "ThisIsMyStorageKeyAuth".into(),
            key: "ThisIsMyKeyAuth".into(),
            usage: "ThisIsASecretUsageAuth".into(),
        }
    }
}

impl Default for BenchSettings {
    fn default() -> Self {
        Self {
            duration_ms: 1000,
            use_base2: true,
        }
    }
}

impl Default for Pkcs7Settings {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("./certs/client-rsa-cert.der"),
            output_dir: PathBuf::from("."),
        }
    }
}

impl Default for PcrSettings {
    fn default() -> Self {
        Self {
            index: 16,
            file: PathBuf::from("input.data"),
        }
    }
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            tcti: None,
            storage_key_handle: DEFAULT_STORAGE_KEY_HANDLE,
            auth: AuthSettings::default(),
            bench: BenchSettings::default(),
            pkcs7: Pkcs7Settings::default(),
            pcr: PcrSettings::default(),
        }
    }
}

impl DemoSettings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// An explicit path must exist. Otherwise the per-user settings file is
    /// used when present, else the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            debug!(path = %path.display(), "loading settings");
            return Self::from_file(path);
        }
        match paths::settings_path() {
            Some(path) if path.is_file() => {
                debug!(path = %path.display(), "loading settings");
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_demo_constants() {
        let settings = DemoSettings::default();
        assert_eq!(settings.storage_key_handle, 0x81000200);
        assert_eq!(settings.auth.key, "ThisIsMyKeyAuth");
        assert_eq!(settings.bench.duration_ms, 1000);
        assert_eq!(settings.pcr.index, 16);
        assert!(settings.tcti.is_none());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"tcti": "mssim:port=2321", "bench": {{"duration_ms": 50}}}}"#
        )
        .unwrap();
        let settings = DemoSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.tcti.as_deref(), Some("mssim:port=2321"));
        assert_eq!(settings.bench.duration_ms, 50);
        assert!(settings.bench.use_base2);
        assert_eq!(settings.auth.storage_key, "ThisIsMyStorageKeyAuth");
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DemoSettings::load(Some(&dir.path().join("absent.json"))).is_err());
    }
}
