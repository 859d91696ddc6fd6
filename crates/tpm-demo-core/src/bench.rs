//! Timed loops and the report lines the benchmark prints.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use crate::error::Result;

pub const DEFAULT_DURATION: Duration = Duration::from_secs(1);

/// Counts loop iterations against a deadline.
#[derive(Debug)]
pub struct BenchTimer {
    start: Instant,
    duration: Duration,
    count: u64,
}

impl BenchTimer {
    pub fn start(duration: Duration) -> Self {
        BenchTimer {
            start: Instant::now(),
            duration,
            count: 0,
        }
    }

    /// Record one finished iteration; true while time remains.
    pub fn check(&mut self) -> bool {
        self.count += 1;
        self.start.elapsed() < self.duration
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Run `op` at least once and until `duration` has elapsed. `op` receives the
/// number of iterations already completed. Returns the iteration count and
/// the elapsed time; the first error stops the loop.
pub fn run_timed<F>(duration: Duration, mut op: F) -> Result<(u64, Duration)>
where
    F: FnMut(u64) -> Result<()>,
{
    let mut timer = BenchTimer::start(duration);
    loop {
        op(timer.count())?;
        if !timer.check() {
            break;
        }
    }
    Ok((timer.count(), timer.elapsed()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Base2,
    Base10,
}

impl Units {
    pub fn from_base2(use_base2: bool) -> Self {
        if use_base2 {
            Units::Base2
        } else {
            Units::Base10
        }
    }

    /// Scale a byte count to the largest unit it exceeds.
    pub fn scale(self, bytes: f64) -> (f64, &'static str) {
        let (step, small, large) = match self {
            Units::Base2 => (1024.0, "KB", "MB"),
            Units::Base10 => (1000.0, "kB", "mB"),
        };
        if bytes > step * step {
            (bytes / (step * step), large)
        } else if bytes > step {
            (bytes / step, small)
        } else {
            (bytes, "bytes")
        }
    }
}

/// Throughput of a symmetric operation (RNG, AES, hashing).
#[derive(Debug, Clone, Serialize)]
pub struct SymResult {
    pub desc: String,
    pub count: u64,
    pub bytes_per_op: usize,
    pub elapsed_secs: f64,
    pub amount: f64,
    pub unit: &'static str,
    pub per_sec: f64,
}

impl SymResult {
    pub fn new(
        desc: impl Into<String>,
        count: u64,
        bytes_per_op: usize,
        elapsed: Duration,
        units: Units,
    ) -> Self {
        let elapsed_secs = elapsed.as_secs_f64();
        let (amount, unit) = units.scale(count as f64 * bytes_per_op as f64);
        let per_sec = if elapsed_secs > 0.0 {
            amount / elapsed_secs
        } else {
            0.0
        };
        SymResult {
            desc: desc.into(),
            count,
            bytes_per_op,
            elapsed_secs,
            amount,
            unit,
            per_sec,
        }
    }
}

impl fmt::Display for SymResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<16} {:5.0} {} took {:5.3} seconds, {:8.3} {}/s",
            self.desc, self.amount, self.unit, self.elapsed_secs, self.per_sec, self.unit
        )
    }
}

/// Operation rate of an asymmetric operation (key gen, RSA, ECDSA, ECDH).
#[derive(Debug, Clone, Serialize)]
pub struct AsymResult {
    pub algo: String,
    pub strength: u32,
    pub desc: String,
    pub count: u64,
    pub elapsed_secs: f64,
    pub avg_ms: f64,
    pub ops_per_sec: f64,
}

impl AsymResult {
    pub fn new(
        algo: impl Into<String>,
        strength: u32,
        desc: impl Into<String>,
        count: u64,
        elapsed: Duration,
    ) -> Self {
        let elapsed_secs = elapsed.as_secs_f64();
        let avg_ms = if count > 0 {
            elapsed_secs / count as f64 * 1000.0
        } else {
            0.0
        };
        let ops_per_sec = if elapsed_secs > 0.0 {
            count as f64 / elapsed_secs
        } else {
            0.0
        };
        AsymResult {
            algo: algo.into(),
            strength,
            desc: desc.into(),
            count,
            elapsed_secs,
            avg_ms,
            ops_per_sec,
        }
    }
}

impl fmt::Display for AsymResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<6} {:5} {:<9} {:6} ops took {:5.3} sec, avg {:5.3} ms, {:.3} ops/sec",
            self.algo,
            self.strength,
            self.desc,
            self.count,
            self.elapsed_secs,
            self.avg_ms,
            self.ops_per_sec
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BenchResult {
    Sym(SymResult),
    Asym(AsymResult),
    /// A case the device does not support.
    Skipped { desc: String, reason: String },
}

impl fmt::Display for BenchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchResult::Sym(result) => fmt::Display::fmt(result, f),
            BenchResult::Asym(result) => fmt::Display::fmt(result, f),
            BenchResult::Skipped { desc, reason } => write!(f, "{desc:<16} skipped: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DemoError;

    #[test]
    fn loop_runs_at_least_once() {
        let mut seen = Vec::new();
        let (count, _) = run_timed(Duration::ZERO, |done| {
            seen.push(done);
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 1);
        assert_eq!(seen, vec![0]);
    }

    #[test]
    fn loop_runs_until_deadline() {
        let duration = Duration::from_millis(20);
        let (count, elapsed) = run_timed(duration, |_| {
            std::thread::sleep(Duration::from_millis(2));
            Ok(())
        })
        .unwrap();
        assert!(count >= 2);
        assert!(elapsed >= duration);
    }

    #[test]
    fn loop_stops_on_error() {
        let result = run_timed(Duration::from_secs(10), |done| {
            if done == 3 {
                Err(DemoError::SignatureVerification)
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(DemoError::SignatureVerification)));
    }

    #[test]
    fn unit_thresholds_are_strict() {
        assert_eq!(Units::Base2.scale(1024.0), (1024.0, "bytes"));
        assert_eq!(Units::Base2.scale(2048.0), (2.0, "KB"));
        assert_eq!(Units::Base2.scale(3.0 * 1024.0 * 1024.0), (3.0, "MB"));
        assert_eq!(Units::Base10.scale(1500.0), (1.5, "kB"));
        assert_eq!(Units::Base10.scale(2_000_000.0), (2.0, "mB"));
    }

    #[test]
    fn sym_line_layout() {
        let result = SymResult::new("RNG", 100, 1024, Duration::from_secs(1), Units::Base2);
        let expected =
            "RNG".to_string() + &" ".repeat(16) + "100 KB took 1.000 seconds,  100.000 KB/s";
        assert_eq!(result.to_string(), expected);
    }

    #[test]
    fn zero_elapsed_reports_zero_rate() {
        let result = SymResult::new("SHA256", 1, 1024, Duration::ZERO, Units::Base10);
        assert_eq!(result.per_sec, 0.0);
        let asym = AsymResult::new("ECC", 256, "key gen", 1, Duration::ZERO);
        assert_eq!(asym.ops_per_sec, 0.0);
    }

    #[test]
    fn asym_line_layout() {
        let result = AsymResult::new("RSA", 2048, "key gen", 4, Duration::from_secs(2));
        let expected = "RSA".to_string()
            + &" ".repeat(5)
            + "2048 key gen"
            + &" ".repeat(8)
            + "4 ops took 2.000 sec, avg 500.000 ms, 2.000 ops/sec";
        assert_eq!(result.to_string(), expected);
    }

    #[test]
    fn json_lines_are_tagged() {
        let line = serde_json::to_string(&BenchResult::Asym(AsymResult::new(
            "ECDSA",
            256,
            "sign",
            10,
            Duration::from_secs(1),
        )))
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["kind"], "asym");
        assert_eq!(value["algo"], "ECDSA");
        assert_eq!(value["count"], 10);
    }
}
