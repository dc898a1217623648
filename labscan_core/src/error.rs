use thiserror::Error;

use crate::recovery::FailureClass;

/// Runtime errors raised while a scan is executing.
#[derive(Debug, Error, Clone)]
pub enum ScanError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("timeout waiting for instrument")]
    Timeout,
    #[error("setpoint {parameter}={value} failed: {reason}")]
    Setpoint {
        parameter: String,
        value: f64,
        reason: String,
    },
    #[error("step {index}: {class} persisted after {attempts} attempts")]
    RetriesExhausted {
        index: usize,
        class: FailureClass,
        attempts: u32,
    },
    #[error("scan aborted at step {index}: {reason}")]
    Aborted { index: usize, reason: String },
    #[error("invalid state: {0}")]
    State(String),
}

/// Configuration errors. Always raised before any instrument is touched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("unregistered parameter: {0}")]
    UnknownParameter(String),
    #[error("parameter registered twice: {0}")]
    DuplicateParameter(String),
    #[error("{parameter}={value} outside bounds [{lo}, {hi}]")]
    OutOfBounds {
        parameter: String,
        value: f64,
        lo: f64,
        hi: f64,
    },
    #[error("invalid bounds for {0}")]
    InvalidBounds(String),
    #[error("invalid scan: {0}")]
    InvalidScan(&'static str),
    #[error("no repair registered for {0}")]
    MissingRepair(FailureClass),
    #[error("missing sequence runner")]
    MissingRunner,
    #[error("missing parameter registry")]
    MissingRegistry,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
