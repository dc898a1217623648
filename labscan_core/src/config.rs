//! Runtime configuration for the scan engine.
//!
//! These are the structs `ScanRunner` consumes. They are separate from the
//! TOML-deserialized types in `labscan_config`; see `conversions` for the bridge.

use std::time::Duration;

/// What to do when a step fails for good (setpoint rejected, retries exhausted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Record the index as failed and move on.
    #[default]
    Skip,
    /// Stop the scan after cleanup and return `ScanError::Aborted`.
    Abort,
}

/// Per-scan execution settings.
#[derive(Debug, Clone)]
pub struct RunCfg {
    /// Sequence runs accumulated into one step's event list. Must be >= 1.
    pub repeats_per_step: u32,
    pub on_failure: FailurePolicy,
    /// Interval between scheduler polls while paused.
    pub pause_poll: Duration,
    /// New events between display-histogram refreshes (0 = never).
    pub refresh_events: usize,
}

impl Default for RunCfg {
    fn default() -> Self {
        Self {
            repeats_per_step: 1,
            on_failure: FailurePolicy::Skip,
            pause_poll: Duration::from_millis(200),
            refresh_events: 0,
        }
    }
}
