use std::io::Write;
use tpm_demo_core::bench::BenchResult;
use tpm_demo_core::error::{DemoError, Result};
use tracing::warn;

/// Writes one line per result, as text or as JSON.
pub struct Reporter<W: Write> {
    out: W,
    json: bool,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, json: bool) -> Self {
        Reporter { out, json }
    }

    pub fn emit(&mut self, result: BenchResult) -> Result<()> {
        if self.json {
            serde_json::to_writer(&mut self.out, &result)?;
            writeln!(self.out)?;
        } else {
            writeln!(self.out, "{result}")?;
        }
        self.out.flush()?;
        Ok(())
    }

    pub fn skip(&mut self, desc: String, err: &DemoError) -> Result<()> {
        warn!(case = %desc, error = %err, "benchmark case not supported");
        self.emit(BenchResult::Skipped {
            desc,
            reason: err.to_string(),
        })
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}
