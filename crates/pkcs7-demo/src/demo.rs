//! The two sign/verify rounds: single-shot and header/footer.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tpm_demo_core::cert::{self, Certificate};
use tpm_demo_core::error::{DemoError, Result};
use tpm_demo_core::keys;
use tpm_demo_core::pkcs7::{self, Verifier};
use tpm_demo_core::settings::DemoSettings;
use tpm_demo_core::{KeyTemplate, TpmDevice};
use tracing::{info, warn};

use crate::dump::hex_dump;

/// Content of the single-shot container, NUL terminator included.
pub const SIGN_CONTENT: &[u8] = b"My encoded DER cert.\0";
/// Size of the generated payload for the header/footer round; the odd
/// remainder exercises a short final chunk.
pub const EX_DATA_TOTAL: usize = 1024 * 1024 + 12;
pub const EX_DATA_CHUNK: usize = 1024;

pub const SIGNED_FILE: &str = "pkcs7tpmsigned.p7s";
pub const SIGNED_EX_FILE: &str = "pkcs7tpmsignedex.p7s";
pub const SELF_SIGNED_CERT_FILE: &str = "pkcs7-signer-cert.der";
const SELF_SIGNED_CN: &str = "TPM2 PKCS7 Example";

pub struct Options {
    pub cert_path: PathBuf,
    pub out_dir: PathBuf,
    pub run_ex: bool,
}

/// Fill `buf` with the payload bytes at `offset`, returning how many were
/// written (0 past the end). Every chunk holds `i & 0xff` for its index `i`.
pub fn my_data(buf: &mut [u8], offset: usize) -> usize {
    if offset >= EX_DATA_TOTAL {
        return 0;
    }
    let len = buf.len().min(EX_DATA_TOTAL - offset);
    for (i, byte) in buf[..len].iter_mut().enumerate() {
        *byte = (i & 0xff) as u8;
    }
    len
}

fn for_each_chunk<F>(mut f: F) -> Result<()>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut chunk = [0u8; EX_DATA_CHUNK];
    let mut offset = 0;
    loop {
        let len = my_data(&mut chunk, offset);
        if len == 0 {
            return Ok(());
        }
        f(&chunk[..len])?;
        offset += len;
    }
}

pub fn run<D: TpmDevice>(dev: &mut D, settings: &DemoSettings, opts: &Options) -> Result<()> {
    fs::create_dir_all(&opts.out_dir)?;
    let storage = keys::storage_key(dev, settings)?;
    keys::with_key(dev, storage, |dev, storage| {
        let blob_path = opts
            .out_dir
            .join(format!("pkcs7-rsa-key.{}.json", dev.description()));
        let rsa_key = keys::load_or_create_key(
            dev,
            storage,
            &KeyTemplate::RsaSignDecrypt,
            settings.auth.key.as_bytes(),
            Some(&blob_path),
        )?;
        keys::with_key(dev, rsa_key, |dev, rsa_key| {
            let signer = signer_certificate(dev, rsa_key, opts)?;
            sign_verify(dev, rsa_key, &signer, &opts.out_dir)?;
            if opts.run_ex {
                sign_verify_ex(dev, rsa_key, &signer, &opts.out_dir)?;
            }
            Ok(())
        })
    })
}

fn signer_certificate<D: TpmDevice>(
    dev: &mut D,
    key: &D::Key,
    opts: &Options,
) -> Result<Certificate> {
    if let Some(cert) = cert::load_certificate(&opts.cert_path)? {
        info!(path = %opts.cert_path.display(), "loaded signer certificate");
        return Ok(cert);
    }
    warn!(
        path = %opts.cert_path.display(),
        "no signer certificate, issuing a self-signed one"
    );
    let cert = cert::self_signed(dev, key, SELF_SIGNED_CN)?;
    cert::write_certificate(&opts.out_dir.join(SELF_SIGNED_CERT_FILE), &cert)?;
    Ok(cert)
}

fn sign_verify<D: TpmDevice>(
    dev: &mut D,
    key: &D::Key,
    signer: &Certificate,
    out_dir: &Path,
) -> Result<()> {
    let der = pkcs7::encode_signed_data(dev, key, signer, SIGN_CONTENT)?;
    println!("PKCS7 Signed Container {}", der.len());
    print!("{}", hex_dump(&der));
    fs::write(out_dir.join(SIGNED_FILE), &der)?;

    for mut verifier in [Verifier::Device(&mut *dev), Verifier::Software] {
        let content = pkcs7::verify_signed_data(&mut verifier, &der)?;
        if content != SIGN_CONTENT {
            return Err(DemoError::Pkcs7Structure("embedded content differs".into()));
        }
        println!("PKCS7 Container Verified (using {})", verifier.describe());
    }
    Ok(())
}

fn sign_verify_ex<D: TpmDevice>(
    dev: &mut D,
    key: &D::Key,
    signer: &Certificate,
    out_dir: &Path,
) -> Result<()> {
    let mut hasher = Sha256::new();
    for_each_chunk(|chunk| {
        hasher.update(chunk);
        Ok(())
    })?;
    let digest = hasher.finalize();

    let parts = pkcs7::encode_signed_data_ex(dev, key, signer, &digest, EX_DATA_TOTAL)?;
    println!("PKCS7 Header {}", parts.header.len());
    print!("{}", hex_dump(&parts.header));
    println!("PKCS7 Footer {}", parts.footer.len());
    print!("{}", hex_dump(&parts.footer));

    let mut out = BufWriter::new(File::create(out_dir.join(SIGNED_EX_FILE))?);
    out.write_all(&parts.header)?;
    for_each_chunk(|chunk| Ok(out.write_all(chunk)?))?;
    out.write_all(&parts.footer)?;
    out.flush()?;

    for mut verifier in [Verifier::Device(&mut *dev), Verifier::Software] {
        pkcs7::verify_signed_data_ex(
            &mut verifier,
            &digest,
            EX_DATA_TOTAL,
            &parts.header,
            &parts.footer,
        )?;
        println!("PKCS7 Container Verified (using {})", verifier.describe());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_restarts_pattern_per_chunk() {
        let mut chunk = [0u8; EX_DATA_CHUNK];
        assert_eq!(my_data(&mut chunk, 0), EX_DATA_CHUNK);
        assert_eq!(chunk[255], 0xff);
        assert_eq!(chunk[256], 0x00);
        assert_eq!(my_data(&mut chunk, EX_DATA_TOTAL - 12), 12);
        assert_eq!(my_data(&mut chunk, EX_DATA_TOTAL), 0);
    }

    #[test]
    fn chunks_cover_the_whole_payload() {
        let mut total = 0;
        let mut chunks = 0;
        for_each_chunk(|chunk| {
            total += chunk.len();
            chunks += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(total, EX_DATA_TOTAL);
        assert_eq!(chunks, 1025);
    }
}
