use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tpm_demo_core::pcr::{self, Measurement, PCR_COUNT};
use tpm_demo_core::settings::DemoSettings;
use tpm_demo_core::soft::SoftDevice;
use tpm_demo_core::tss::TssDevice;
use tpm_demo_core::{logging, Backend, TpmDevice};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Extend the SHA-256 of a file into a PCR (TPM2.0 measurement)",
    long_about = "Extend the SHA-256 of a file into a PCR (TPM2.0 measurement).\n\
                  Without arguments PCR 16 is extended with the digest of input.data,\n\
                  or with the known test digest 00..1f when that file cannot be opened."
)]
struct Cli {
    /// PCR index between 0-23
    #[arg(allow_negative_numbers = true)]
    pcr: Option<String>,
    /// File whose content is measured
    filename: Option<PathBuf>,
    /// Device to run against: tpm or soft
    #[arg(long, default_value_t = Backend::Tpm)]
    backend: Backend,
    /// JSON settings file
    #[arg(long)]
    config: Option<PathBuf>,
    /// TCTI, e.g. device:/dev/tpmrm0 (overrides settings and environment)
    #[arg(long)]
    tcti: Option<String>,
}

fn main() -> ExitCode {
    logging::init("info");
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("Failure: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn parse_index(raw: &str) -> Result<u8> {
    raw.parse::<u8>()
        .ok()
        .filter(|index| usize::from(*index) < PCR_COUNT)
        .ok_or_else(|| anyhow!("PCR index is out of range (0-{})", PCR_COUNT - 1))
}

fn run(cli: Cli) -> Result<()> {
    let mut settings =
        DemoSettings::load(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(tcti) = cli.tcti {
        settings.tcti = Some(tcti);
    }
    let index = match cli.pcr.as_deref() {
        Some(raw) => parse_index(raw)?,
        None => settings.pcr.index,
    };
    let filename = cli.filename.unwrap_or_else(|| settings.pcr.file.clone());

    println!("Demo how to extend data into a PCR (TPM2.0 measurement)");
    println!("\tData file: {}", filename.display());
    println!("\tPCR Index: {index}");

    match cli.backend {
        Backend::Tpm => {
            let mut dev =
                TssDevice::new(settings.tcti.as_deref()).context("failed to open the TPM")?;
            measure(&mut dev, index, &filename)
        }
        Backend::Soft => measure(&mut SoftDevice::new(), index, &filename),
    }
}

fn measure<D: TpmDevice>(dev: &mut D, index: u8, filename: &Path) -> Result<()> {
    let Measurement {
        index,
        digest,
        from_file,
        before,
        after,
    } = pcr::extend_file(dev, index, filename)?;
    if !from_file {
        println!("Error loading file {}, using test data", filename.display());
    }
    println!("Hash to be used for measurement:");
    println!("{}", hex::encode_upper(digest));
    println!("TPM2_PCR_Extend success");
    info!(before = %hex::encode_upper(&before), "previous PCR value");
    println!("PCR{index} digest:");
    println!("{}", hex::encode_upper(after));
    Ok(())
}
