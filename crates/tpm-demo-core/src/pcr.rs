//! PCR measurement: hash a file and extend it into the SHA-256 bank.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tracing::{info, warn};

use crate::device::{TpmDevice, MAX_BUFFER_SIZE, SHA256_DIGEST_SIZE};
use crate::error::{DemoError, Result};

/// PCRs 0-23 of the SHA-256 bank.
pub const PCR_COUNT: usize = 24;
pub const DEFAULT_PCR_INDEX: u8 = 16;

/// Digest extended when the measured file cannot be opened: bytes 0x00..=0x1f.
pub fn test_digest() -> [u8; SHA256_DIGEST_SIZE] {
    let mut digest = [0u8; SHA256_DIGEST_SIZE];
    for (i, byte) in digest.iter_mut().enumerate() {
        *byte = i as u8;
    }
    digest
}

pub fn validate_index(index: u8) -> Result<u8> {
    if usize::from(index) < PCR_COUNT {
        Ok(index)
    } else {
        Err(DemoError::PcrIndex(index))
    }
}

/// Value a PCR holds after extending `old` with `digest`.
pub fn expected_extend(old: &[u8], digest: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(old);
    hasher.update(digest);
    hasher.finalize().to_vec()
}

/// SHA-256 of the file read in `MAX_BUFFER_SIZE` chunks, `None` when the file
/// cannot be opened.
pub fn file_digest(path: &Path) -> Result<Option<[u8; SHA256_DIGEST_SIZE]>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot open measurement file");
            return Ok(None);
        }
    };
    let mut hasher = Sha256::new();
    let mut buf = [0u8; MAX_BUFFER_SIZE];
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(hasher.finalize().into()))
}

#[derive(Debug, Clone)]
pub struct Measurement {
    pub index: u8,
    pub digest: [u8; SHA256_DIGEST_SIZE],
    /// False when the test digest stood in for an unreadable file.
    pub from_file: bool,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
}

/// Measure `path` into PCR `index`, reading the register before and after.
pub fn extend_file<D: TpmDevice>(dev: &mut D, index: u8, path: &Path) -> Result<Measurement> {
    let index = validate_index(index)?;
    let (digest, from_file) = match file_digest(path)? {
        Some(digest) => (digest, true),
        None => (test_digest(), false),
    };
    let before = dev.pcr_read(index)?;
    dev.pcr_extend(index, &digest)?;
    let after = dev.pcr_read(index)?;
    info!(pcr = index, digest = %hex::encode_upper(digest), "extended PCR");
    Ok(Measurement {
        index,
        digest,
        from_file,
        before,
        after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftDevice;

    #[test]
    fn missing_file_uses_test_digest() {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = SoftDevice::new();
        let m = extend_file(&mut dev, 16, &dir.path().join("input.data")).unwrap();
        assert!(!m.from_file);
        assert_eq!(m.digest[0], 0x00);
        assert_eq!(m.digest[31], 0x1f);
        assert_eq!(m.after, expected_extend(&m.before, &m.digest));
    }

    #[test]
    fn file_digest_streams_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.data");
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        let digest = file_digest(&path).unwrap().unwrap();
        assert_eq!(digest.to_vec(), Sha256::digest(&data).to_vec());
    }

    #[test]
    fn repeated_extends_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        std::fs::write(&path, b"measured").unwrap();
        let mut dev = SoftDevice::new();
        let first = extend_file(&mut dev, 7, &path).unwrap();
        let second = extend_file(&mut dev, 7, &path).unwrap();
        assert_eq!(second.before, first.after);
        assert_eq!(second.after, expected_extend(&first.after, &second.digest));
        // Other registers are untouched.
        assert_eq!(dev.pcr_read(8).unwrap(), vec![0u8; SHA256_DIGEST_SIZE]);
    }

    #[test]
    fn index_out_of_range() {
        let mut dev = SoftDevice::new();
        assert!(matches!(
            extend_file(&mut dev, 24, Path::new("input.data")),
            Err(DemoError::PcrIndex(24))
        ));
    }
}
