//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "labscan", version, about = "Parameter scans over a timed detection sequence")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/labscan.toml")]
    pub config: PathBuf,

    /// Optional initial-guess CSV for the amplitude loop (strict header)
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Failure handling override for a single run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OnFailure {
    /// Record the step as failed and continue
    Skip,
    /// Stop the scan at the first failed step
    Abort,
}

impl From<OnFailure> for labscan_config::FailurePolicy {
    fn from(v: OnFailure) -> Self {
        match v {
            OnFailure::Skip => labscan_config::FailurePolicy::Skip,
            OnFailure::Abort => labscan_config::FailurePolicy::Abort,
        }
    }
}

/// Per-run overrides of the `[scan]` section.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct ScanOverrides {
    /// Registered parameter to scan
    #[arg(long)]
    pub parameter: Option<String>,
    /// First scan value
    #[arg(long, allow_negative_numbers = true)]
    pub min: Option<f64>,
    /// Last scan value
    #[arg(long, allow_negative_numbers = true)]
    pub max: Option<f64>,
    /// Number of scan values (min and max included)
    #[arg(long)]
    pub steps: Option<u32>,
    /// Detection sequences pooled per step
    #[arg(long)]
    pub repeats: Option<u32>,
    /// What to do when a step fails for good
    #[arg(long, value_enum, value_name = "POLICY")]
    pub on_failure: Option<OnFailure>,
}

impl ScanOverrides {
    pub fn apply(&self, scan: &mut labscan_config::ScanCfg) {
        if let Some(p) = &self.parameter {
            scan.parameter.clone_from(p);
        }
        if let Some(v) = self.min {
            scan.min = v;
        }
        if let Some(v) = self.max {
            scan.max = v;
        }
        if let Some(v) = self.steps {
            scan.steps = v;
        }
        if let Some(v) = self.repeats {
            scan.repeats_per_step = v;
        }
        if let Some(v) = self.on_failure {
            scan.on_failure = v.into();
        }
    }
}

/// Faults injected into the simulated runtime.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct SimFaults {
    /// Print the failure marker on these (1-based) sequence runs
    #[arg(long = "fault-run", value_name = "RUN", value_delimiter = ',')]
    pub fault_runs: Vec<usize>,
    /// Drift the frequency reference just before this (1-based) sequence run
    #[arg(long, value_name = "RUN")]
    pub drift_at: Option<usize>,
    /// Size of the injected reference drift
    #[arg(long, default_value_t = 2.0, allow_negative_numbers = true)]
    pub drift: f64,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the configured scan against the simulated instruments
    Scan {
        #[command(flatten)]
        overrides: ScanOverrides,
        #[command(flatten)]
        faults: SimFaults,
    },
    /// Validate the config and print the scan values without running the scan
    Check {
        #[command(flatten)]
        overrides: ScanOverrides,
    },
}
