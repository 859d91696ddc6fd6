//! Benchmark cases, run in a fixed order against one device.

use std::io::Write;
use std::time::Duration;
use tpm_demo_core::bench::{run_timed, AsymResult, BenchResult, SymResult, Units};
use tpm_demo_core::device::{ECC_P256_BITS, MAX_BUFFER_SIZE, RSA_KEY_BITS, SHA256_DIGEST_SIZE};
use tpm_demo_core::error::{DemoError, Result};
use tpm_demo_core::keys;
use tpm_demo_core::settings::DemoSettings;
use tpm_demo_core::{EccKeyScheme, HashAlg, KeyTemplate, RsaPadding, SymMode, TpmDevice};
use tracing::{debug, warn};

use crate::report::Reporter;

const AES_CASES: [(SymMode, u16); 6] = [
    (SymMode::Cbc, 128),
    (SymMode::Cbc, 256),
    (SymMode::Ctr, 128),
    (SymMode::Ctr, 256),
    (SymMode::Cfb, 128),
    (SymMode::Cfb, 256),
];
const HASH_CASES: [HashAlg; 4] = [HashAlg::Sha1, HashAlg::Sha256, HashAlg::Sha384, HashAlg::Sha512];

/// Fill byte of the RSA/ECDSA test messages.
const TEST_BYTE: u8 = 0x11;

pub struct BenchConfig {
    pub duration: Duration,
    pub units: Units,
}

struct Bench<'r, W: Write> {
    config: BenchConfig,
    key_auth: Vec<u8>,
    usage_auth: Vec<u8>,
    reporter: &'r mut Reporter<W>,
}

fn unload_quietly<D: TpmDevice>(dev: &mut D, key: D::Key) {
    if let Err(e) = dev.unload_key(key) {
        warn!(error = %e, "failed to unload key");
    }
}

pub fn run_all<D: TpmDevice, W: Write>(
    dev: &mut D,
    settings: &DemoSettings,
    config: BenchConfig,
    reporter: &mut Reporter<W>,
) -> Result<()> {
    let mut bench = Bench {
        config,
        key_auth: settings.auth.key.as_bytes().to_vec(),
        usage_auth: settings.auth.usage.as_bytes().to_vec(),
        reporter,
    };
    let storage = keys::storage_key(dev, settings)?;
    keys::with_key(dev, storage, |dev, storage| {
        let message = bench.rng(dev)?;
        for (mode, bits) in AES_CASES {
            for decrypt in [false, true] {
                bench.aes(dev, storage, &message, bits, mode, decrypt)?;
            }
        }
        for alg in HASH_CASES {
            bench.hash(dev, &message, alg)?;
        }
        bench.rsa(dev, storage)?;
        bench.ecdsa(dev, storage)?;
        bench.ecdh(dev, storage)
    })
}

impl<W: Write> Bench<'_, W> {
    fn sym(
        &mut self,
        desc: impl Into<String>,
        count: u64,
        bytes: usize,
        elapsed: Duration,
    ) -> Result<()> {
        self.reporter.emit(BenchResult::Sym(SymResult::new(
            desc,
            count,
            bytes,
            elapsed,
            self.config.units,
        )))
    }

    fn asym(
        &mut self,
        algo: &str,
        strength: u16,
        desc: &str,
        timed: (u64, Duration),
    ) -> Result<()> {
        let (count, elapsed) = timed;
        self.reporter.emit(BenchResult::Asym(AsymResult::new(
            algo,
            u32::from(strength),
            desc,
            count,
            elapsed,
        )))
    }

    /// Returns the last random buffer, reused as the AES and hash input.
    fn rng<D: TpmDevice>(&mut self, dev: &mut D) -> Result<Vec<u8>> {
        let mut message = vec![0u8; MAX_BUFFER_SIZE];
        let (count, elapsed) = run_timed(self.config.duration, |_| dev.get_random(&mut message))?;
        self.sym("RNG", count, message.len(), elapsed)?;
        Ok(message)
    }

    fn aes<D: TpmDevice>(
        &mut self,
        dev: &mut D,
        storage: &D::Key,
        message: &[u8],
        bits: u16,
        mode: SymMode,
        decrypt: bool,
    ) -> Result<()> {
        let desc = format!(
            "AES-{bits}-{}-{}",
            mode.name(),
            if decrypt { "dec" } else { "enc" }
        );
        let duration = self.config.duration;
        let timed = keys::with_new_key(
            dev,
            storage,
            &KeyTemplate::aes(bits, mode),
            &self.usage_auth,
            |dev, key| {
                run_timed(duration, |_| {
                    dev.encrypt_decrypt(key, message, decrypt).map(|_| ())
                })
            },
        );
        match timed {
            Ok((count, elapsed)) => self.sym(desc, count, message.len(), elapsed),
            Err(e) if e.is_unsupported_command() => self.reporter.skip(desc, &e),
            Err(e) => Err(e),
        }
    }

    fn hash<D: TpmDevice>(&mut self, dev: &mut D, message: &[u8], alg: HashAlg) -> Result<()> {
        let usage_auth = &self.usage_auth;
        let timed = run_timed(self.config.duration, |_| {
            let mut seq = dev.hash_start(alg, usage_auth)?;
            dev.hash_update(&mut seq, message)?;
            let digest = dev.hash_finish(seq)?;
            debug_assert_eq!(digest.len(), alg.digest_size());
            Ok(())
        });
        match timed {
            Ok((count, elapsed)) => self.sym(alg.name(), count, message.len(), elapsed),
            Err(e) if e.is_unsupported_hash() => self.reporter.skip(alg.name().to_string(), &e),
            Err(e) => Err(e),
        }
    }

    /// Create and load keys back to back, unloading the previous one, and
    /// hand back the last key.
    fn keygen<D: TpmDevice>(
        &mut self,
        dev: &mut D,
        storage: &D::Key,
        template: &KeyTemplate,
    ) -> Result<(D::Key, (u64, Duration))> {
        let key_auth = &self.key_auth;
        let mut current: Option<D::Key> = None;
        let timed = run_timed(self.config.duration, |_| {
            if let Some(previous) = current.take() {
                dev.unload_key(previous)?;
            }
            current = Some(dev.create_and_load_key(storage, template, key_auth)?);
            Ok(())
        });
        match (timed, current) {
            (Ok(timed), Some(key)) => Ok((key, timed)),
            (Err(e), leftover) => {
                if let Some(key) = leftover {
                    unload_quietly(dev, key);
                }
                Err(e)
            }
            (Ok(_), None) => Err(DemoError::KeyBlob("key generation produced no key".into())),
        }
    }

    fn rsa<D: TpmDevice>(&mut self, dev: &mut D, storage: &D::Key) -> Result<()> {
        let (key, timed) = self.keygen(dev, storage, &KeyTemplate::RsaSignDecrypt)?;
        self.asym("RSA", RSA_KEY_BITS, "key gen", timed)?;
        let duration = self.config.duration;

        keys::with_key(dev, key, |dev, key| {
            let modulus_len = usize::from(RSA_KEY_BITS / 8);
            for (padding, len, public_desc, private_desc) in [
                (RsaPadding::Raw, modulus_len, "Public", "Private"),
                (RsaPadding::Oaep, SHA256_DIGEST_SIZE, "Pub  OAEP", "Priv OAEP"),
            ] {
                let message = vec![TEST_BYTE; len];
                let mut cipher = Vec::new();
                let timed = run_timed(duration, |_| {
                    cipher = dev.rsa_encrypt(key, padding, &message)?;
                    Ok(())
                })?;
                self.asym("RSA", RSA_KEY_BITS, public_desc, timed)?;

                let timed = run_timed(duration, |_| {
                    let plain = dev.rsa_decrypt(key, padding, &cipher)?;
                    if plain != message {
                        return Err(DemoError::BufferSize("RSA round trip mismatch".into()));
                    }
                    Ok(())
                })?;
                self.asym("RSA", RSA_KEY_BITS, private_desc, timed)?;
            }
            Ok(())
        })
    }

    fn ecdsa<D: TpmDevice>(&mut self, dev: &mut D, storage: &D::Key) -> Result<()> {
        let template = KeyTemplate::EccP256(EccKeyScheme::Ecdsa);
        let (key, timed) = self.keygen(dev, storage, &template)?;
        self.asym("ECC", ECC_P256_BITS, "key gen", timed)?;
        let duration = self.config.duration;

        keys::with_key(dev, key, |dev, key| {
            let digest = [TEST_BYTE; SHA256_DIGEST_SIZE];
            let mut signature = None;
            let timed = run_timed(duration, |_| {
                signature = Some(dev.sign_hash(key, &digest)?);
                Ok(())
            })?;
            self.asym("ECDSA", ECC_P256_BITS, "sign", timed)?;

            let signature = signature.ok_or(DemoError::SignatureVerification)?;
            let timed = run_timed(duration, |_| dev.verify_hash(key, &digest, &signature))?;
            self.asym("ECDSA", ECC_P256_BITS, "verify", timed)
        })
    }

    fn ecdh<D: TpmDevice>(&mut self, dev: &mut D, storage: &D::Key) -> Result<()> {
        let duration = self.config.duration;
        let timed = keys::with_new_key(
            dev,
            storage,
            &KeyTemplate::EccP256(EccKeyScheme::Ecdh),
            &self.key_auth,
            |dev, key| {
                run_timed(duration, |_| {
                    let (_point, shared) = dev.ecdh_gen(key)?;
                    debug!(len = shared.len(), "ecdh shared secret");
                    Ok(())
                })
            },
        )?;
        self.asym("ECDHE", ECC_P256_BITS, "agree", timed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpm_demo_core::soft::SoftDevice;

    #[test]
    fn every_case_reports_in_order() {
        let mut dev = SoftDevice::new();
        let mut reporter = Reporter::new(Vec::new(), true);
        let config = BenchConfig {
            duration: Duration::ZERO,
            units: Units::Base2,
        };
        run_all(&mut dev, &DemoSettings::default(), config, &mut reporter).unwrap();

        let out = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 1 + 12 + 4 + 5 + 3 + 1);
        assert_eq!(lines[0]["desc"], "RNG");
        assert_eq!(lines[1]["desc"], "AES-128-CBC-enc");
        assert_eq!(lines[2]["desc"], "AES-128-CBC-dec");
        assert_eq!(lines[12]["desc"], "AES-256-CFB-dec");
        assert_eq!(lines[13]["desc"], "SHA1");
        assert_eq!(lines[17]["algo"], "RSA");
        assert_eq!(lines[20]["desc"], "Pub  OAEP");
        assert_eq!(lines[25]["algo"], "ECDHE");
        for line in &lines {
            assert_eq!(line["count"], 1);
        }
    }

    #[test]
    fn text_lines_use_report_layout() {
        let mut dev = SoftDevice::new();
        let mut reporter = Reporter::new(Vec::new(), false);
        let mut bench = Bench {
            config: BenchConfig {
                duration: Duration::from_millis(5),
                units: Units::Base10,
            },
            key_auth: Vec::new(),
            usage_auth: Vec::new(),
            reporter: &mut reporter,
        };
        let message = bench.rng(&mut dev).unwrap();
        bench.hash(&mut dev, &message, HashAlg::Sha256).unwrap();

        let out = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].starts_with("RNG "));
        assert!(lines[0].contains(" took "));
        assert!(lines[1].starts_with("SHA256 "));
        assert!(lines[1].ends_with("/s"));
    }
}
