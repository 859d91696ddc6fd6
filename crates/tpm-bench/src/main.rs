mod report;
mod suite;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tpm_demo_core::bench::Units;
use tpm_demo_core::settings::DemoSettings;
use tpm_demo_core::soft::SoftDevice;
use tpm_demo_core::tss::TssDevice;
use tpm_demo_core::{logging, Backend};

use crate::report::Reporter;
use crate::suite::BenchConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "TPM2 benchmark using the wrapper API", long_about = None)]
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
    /// Time spent on each case
    #[arg(long)]
    duration_ms: Option<u64>,
    /// Report sizes in powers of 1000 instead of 1024
    #[arg(long)]
    base10: bool,
    /// One JSON object per line instead of text
    #[arg(long)]
    json: bool,
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

fn run(cli: Cli) -> Result<()> {
    let mut settings =
        DemoSettings::load(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(tcti) = cli.tcti {
        settings.tcti = Some(tcti);
    }
    let config = BenchConfig {
        duration: Duration::from_millis(cli.duration_ms.unwrap_or(settings.bench.duration_ms)),
        units: if cli.base10 {
            Units::Base10
        } else {
            Units::from_base2(settings.bench.use_base2)
        },
    };
    if !cli.json {
        println!("TPM2 Benchmark using Wrapper API's");
    }
    let mut reporter = Reporter::new(std::io::stdout().lock(), cli.json);

    match cli.backend {
        Backend::Tpm => {
            let mut dev =
                TssDevice::new(settings.tcti.as_deref()).context("failed to open the TPM")?;
            suite::run_all(&mut dev, &settings, config, &mut reporter)?;
        }
        Backend::Soft => {
            let mut dev = SoftDevice::new();
            suite::run_all(&mut dev, &settings, config, &mut reporter)?;
        }
    }
    Ok(())
}
