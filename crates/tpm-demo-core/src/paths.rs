use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "org";
pub const APP_ORG: &str = "tpm-demo";
pub const APP_NAME: &str = "tpm-demo";

pub const SETTINGS_FILE: &str = "settings.json";

pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Settings file consulted when no `--config` is given. `TPM_DEMO_CONFIG`
/// overrides the per-user location.
pub fn settings_path() -> Option<PathBuf> {
    if let Ok(override_path) = std::env::var("TPM_DEMO_CONFIG") {
        return Some(PathBuf::from(override_path));
    }
    config_dir().map(|dir| dir.join(SETTINGS_FILE))
}
