mod demo;
mod dump;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tpm_demo_core::settings::DemoSettings;
use tpm_demo_core::soft::SoftDevice;
use tpm_demo_core::tss::TssDevice;
use tpm_demo_core::{logging, Backend};

#[derive(Parser, Debug)]
#[command(author, version, about = "TPM2 PKCS7 sign/verify example", long_about = None)]
struct Cli {
    /// Device to run against: tpm or soft
    #[arg(long, default_value_t = Backend::Tpm)]
    backend: Backend,
    /// JSON settings file
    #[arg(long)]
    config: Option<PathBuf>,
    /// TCTI, e.g. device:/dev/tpmrm0 (overrides settings and environment)
    #[arg(long)]
    tcti: Option<String>,
    /// DER certificate of the signing key; a self-signed one is issued when missing
    #[arg(long)]
    cert: Option<PathBuf>,
    /// Where the containers and the key blob are written
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Skip the large header/footer round
    #[arg(long)]
    no_ex: bool,
}

fn main() -> ExitCode {
    logging::init("info");
    let cli = Cli::parse();
    println!("TPM2 PKCS7 Example");
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("Failure: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut settings =
        DemoSettings::load(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(tcti) = cli.tcti {
        settings.tcti = Some(tcti);
    }
    let opts = demo::Options {
        cert_path: cli.cert.unwrap_or_else(|| settings.pkcs7.cert_path.clone()),
        out_dir: cli.out_dir.unwrap_or_else(|| settings.pkcs7.output_dir.clone()),
        run_ex: !cli.no_ex,
    };

    match cli.backend {
        Backend::Tpm => {
            let mut dev =
                TssDevice::new(settings.tcti.as_deref()).context("failed to open the TPM")?;
            demo::run(&mut dev, &settings, &opts)?;
        }
        Backend::Soft => {
            let mut dev = SoftDevice::new();
            demo::run(&mut dev, &settings, &opts)?;
        }
    }
    Ok(())
}
