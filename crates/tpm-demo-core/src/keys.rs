//! Key bootstrap shared by the demo programs.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::device::{KeyBlob, KeyTemplate, TpmDevice};
use crate::error::Result;
use crate::settings::DemoSettings;

/// On-disk form of a created key.
#[derive(Debug, Serialize, Deserialize)]
struct StoredKeyBlob {
    template: KeyTemplate,
    public: String,
    private: String,
}

pub fn write_blob(path: &Path, template: &KeyTemplate, blob: &KeyBlob) -> Result<()> {
    let stored = StoredKeyBlob {
        template: *template,
        public: general_purpose::STANDARD.encode(&blob.public),
        private: general_purpose::STANDARD.encode(&blob.private),
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_vec_pretty(&stored)?)?;
    Ok(())
}

/// `None` when no blob has been written yet.
pub fn read_blob(path: &Path) -> Result<Option<(KeyTemplate, KeyBlob)>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let stored: StoredKeyBlob = serde_json::from_slice(&raw)?;
    let blob = KeyBlob {
        public: general_purpose::STANDARD.decode(stored.public)?,
        private: general_purpose::STANDARD.decode(stored.private)?,
    };
    Ok(Some((stored.template, blob)))
}

/// Open the primary storage key at the configured persistent handle,
/// creating and persisting it on first use.
pub fn storage_key<D: TpmDevice>(dev: &mut D, settings: &DemoSettings) -> Result<D::Key> {
    let handle = settings.storage_key_handle;
    let auth = settings.auth.storage_key.as_bytes();
    if let Some(key) = dev.read_persistent(handle, auth)? {
        info!(handle = format_args!("{handle:#x}"), "loaded storage key");
        return Ok(key);
    }
    let primary = dev.create_primary(&KeyTemplate::RsaStorage, auth)?;
    let key = dev.persist_key(primary, handle)?;
    info!(handle = format_args!("{handle:#x}"), "created storage key");
    Ok(key)
}

/// Load a key from `blob_path`, or create it under `parent` and write the
/// blob. A blob for another template, or one the parent rejects, is replaced.
pub fn load_or_create_key<D: TpmDevice>(
    dev: &mut D,
    parent: &D::Key,
    template: &KeyTemplate,
    auth: &[u8],
    blob_path: Option<&Path>,
) -> Result<D::Key> {
    if let Some(path) = blob_path {
        match read_blob(path) {
            Ok(Some((stored, blob))) if stored == *template => {
                match dev.load_key(parent, &blob, auth) {
                    Ok(key) => {
                        info!(path = %path.display(), "loaded key blob");
                        return Ok(key);
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "key blob rejected, recreating"),
                }
            }
            Ok(Some(_)) => warn!(path = %path.display(), "key blob template differs, recreating"),
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "key blob unreadable, recreating"),
        }
    }

    // Blob first: a failed write must not leave a loaded key.
    let blob = dev.create_key(parent, template, auth)?;
    if let Some(path) = blob_path {
        write_blob(path, template, &blob)?;
    }
    let key = dev.load_key(parent, &blob, auth)?;
    info!(?template, "created key");
    Ok(key)
}

/// Run `f` with `key` and unload the key afterwards, whatever `f` returned.
/// An error from `f` takes precedence over an unload error.
pub fn with_key<D, T, F>(dev: &mut D, key: D::Key, f: F) -> Result<T>
where
    D: TpmDevice,
    F: FnOnce(&mut D, &D::Key) -> Result<T>,
{
    let result = f(dev, &key);
    let unloaded = dev.unload_key(key);
    match (result, unloaded) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(e), _) | (Ok(_), Err(e)) => Err(e),
    }
}

/// Create and load a key under `parent`, run `f`, then unload it.
pub fn with_new_key<D, T, F>(
    dev: &mut D,
    parent: &D::Key,
    template: &KeyTemplate,
    auth: &[u8],
    f: F,
) -> Result<T>
where
    D: TpmDevice,
    F: FnOnce(&mut D, &D::Key) -> Result<T>,
{
    let key = dev.create_and_load_key(parent, template, auth)?;
    with_key(dev, key, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{EccKeyScheme, SymMode};
    use crate::error::DemoError;
    use crate::soft::{SoftDevice, SoftKey};

    #[test]
    fn storage_key_is_persisted_once() {
        let mut dev = SoftDevice::new();
        let settings = DemoSettings::default();
        assert!(dev
            .read_persistent(settings.storage_key_handle, b"")
            .unwrap()
            .is_none());
        storage_key(&mut dev, &settings).unwrap();
        assert!(dev
            .read_persistent(settings.storage_key_handle, b"")
            .unwrap()
            .is_some());
        assert!(matches!(
            storage_key(&mut dev, &settings).unwrap(),
            SoftKey::Storage { .. }
        ));
    }

    #[test]
    fn blob_is_written_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("ecc.json");
        let mut dev = SoftDevice::new();
        let parent = storage_key(&mut dev, &DemoSettings::default()).unwrap();
        let template = KeyTemplate::EccP256(EccKeyScheme::Ecdsa);

        let first = load_or_create_key(&mut dev, &parent, &template, b"", Some(&path)).unwrap();
        let (stored, _) = read_blob(&path).unwrap().unwrap();
        assert_eq!(stored, template);

        let second = load_or_create_key(&mut dev, &parent, &template, b"", Some(&path)).unwrap();
        let digest = [0x42u8; 32];
        let sig = dev.sign_hash(&first, &digest).unwrap();
        dev.verify_hash(&second, &digest, &sig).unwrap();
    }

    #[test]
    fn mismatched_template_recreates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        let mut dev = SoftDevice::new();
        let parent = storage_key(&mut dev, &DemoSettings::default()).unwrap();
        let aes = KeyTemplate::aes(128, SymMode::Cbc);
        load_or_create_key(&mut dev, &parent, &aes, b"", Some(&path)).unwrap();

        let ecdh = KeyTemplate::EccP256(EccKeyScheme::Ecdh);
        let key = load_or_create_key(&mut dev, &parent, &ecdh, b"", Some(&path)).unwrap();
        assert!(matches!(key, SoftKey::Ecdh(_)));
        assert_eq!(read_blob(&path).unwrap().unwrap().0, ecdh);
    }

    #[test]
    fn failed_blob_write_leaves_no_handle() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("occupied");
        fs::write(&not_a_dir, b"file").unwrap();
        let mut dev = SoftDevice::new();
        let parent = storage_key(&mut dev, &DemoSettings::default()).unwrap();
        assert_eq!(dev.open_handles(), 1);

        let result = load_or_create_key(
            &mut dev,
            &parent,
            &KeyTemplate::EccP256(EccKeyScheme::Ecdsa),
            b"",
            Some(&not_a_dir.join("key.json")),
        );
        assert!(matches!(result, Err(DemoError::Io(_))));
        assert_eq!(dev.open_handles(), 1);
    }

    #[test]
    fn scoped_keys_are_unloaded() {
        let mut dev = SoftDevice::new();
        let parent = storage_key(&mut dev, &DemoSettings::default()).unwrap();
        let template = KeyTemplate::aes(128, SymMode::Cbc);
        with_new_key(&mut dev, &parent, &template, b"", |dev, key| {
            dev.encrypt_decrypt(key, &[0u8; 16], false).map(|_| ())
        })
        .unwrap();
        let _ = with_new_key(&mut dev, &parent, &template, b"", |dev, key| {
            dev.encrypt_decrypt(key, &[0u8; 3], false).map(|_| ())
        });
        assert_eq!(dev.open_handles(), 1);
        dev.unload_key(parent).unwrap();
        assert_eq!(dev.open_handles(), 0);
    }

    #[test]
    fn with_key_returns_closure_error() {
        let mut dev = SoftDevice::new();
        let parent = storage_key(&mut dev, &DemoSettings::default()).unwrap();
        let result: Result<()> = with_new_key(
            &mut dev,
            &parent,
            &KeyTemplate::aes(128, SymMode::Ctr),
            b"",
            |dev, key| dev.encrypt_decrypt(key, &[0u8; 3], false).map(|_| ()),
        );
        assert!(matches!(result, Err(DemoError::BufferSize(_))));
    }
}
