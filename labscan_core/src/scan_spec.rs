//! What to scan: one parameter, a range, and a number of points.

use serde::Serialize;

use crate::error::{BuildError, Result};
use crate::util::linspace;

/// A validated linear scan. `steps >= 1` always holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSpec {
    parameter: String,
    min: f64,
    max: f64,
    steps: u32,
}

impl ScanSpec {
    pub fn new(parameter: impl Into<String>, min: f64, max: f64, steps: u32) -> Result<Self> {
        if steps == 0 {
            return Err(eyre::Report::new(BuildError::InvalidScan("steps must be >= 1")));
        }
        if !min.is_finite() || !max.is_finite() {
            return Err(eyre::Report::new(BuildError::InvalidScan(
                "scan range must be finite",
            )));
        }
        Ok(Self {
            parameter: parameter.into(),
            min,
            max,
            steps,
        })
    }

    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Values in scan order, linearly spaced from `min` to `max` inclusive.
    pub fn values(&self) -> Vec<f64> {
        linspace(self.min, self.max, self.steps as usize)
    }
}

impl TryFrom<&labscan_config::ScanCfg> for ScanSpec {
    type Error = eyre::Report;
    fn try_from(c: &labscan_config::ScanCfg) -> Result<Self> {
        Self::new(c.parameter.clone(), c.min, c.max, c.steps)
    }
}
