//! Conversions from `labscan_config` file types to runtime types.

use std::time::Duration;

use labscan_traits::SequenceParams;

use crate::config::{FailurePolicy, RunCfg};
use crate::controller::{ControllerParams, GainSchedule, GuessModel};
use crate::error::{BuildError, Result};
use crate::recovery::{FailureClass, RelockParams, Signature, SignatureMatcher};
use crate::registry::Bounds;
use crate::signals::{LostEnd, RoiLayout, SignalPipeline};

fn bounds(name: &str, lo: f64, hi: f64) -> Result<Bounds> {
    Bounds::new(lo, hi).ok_or_else(|| eyre::Report::new(BuildError::InvalidBounds(name.to_string())))
}

// ── Scan ─────────────────────────────────────────────────────────────────────

impl From<labscan_config::FailurePolicy> for FailurePolicy {
    fn from(p: labscan_config::FailurePolicy) -> Self {
        match p {
            labscan_config::FailurePolicy::Skip => FailurePolicy::Skip,
            labscan_config::FailurePolicy::Abort => FailurePolicy::Abort,
        }
    }
}

impl From<&labscan_config::Config> for RunCfg {
    fn from(c: &labscan_config::Config) -> Self {
        Self {
            repeats_per_step: c.scan.repeats_per_step,
            on_failure: c.scan.on_failure.into(),
            pause_poll: Duration::from_millis(c.scan.pause_poll_ms),
            refresh_events: c.histogram.refresh_events,
        }
    }
}

pub fn sequence_params(c: &labscan_config::SequenceCfg) -> SequenceParams {
    SequenceParams {
        load_time_us: c.load_time_us,
        wait_time_us: c.wait_time_us,
        pulse_length_us: c.pulse_length_us,
    }
}

// ── Signals ──────────────────────────────────────────────────────────────────

impl From<labscan_config::LostEnd> for LostEnd {
    fn from(l: labscan_config::LostEnd) -> Self {
        match l {
            labscan_config::LostEnd::Narrower => LostEnd::Narrower,
            labscan_config::LostEnd::PulseEnd => LostEnd::PulseEnd,
            labscan_config::LostEnd::Cutoff => LostEnd::Cutoff,
        }
    }
}

impl From<&labscan_config::RoiCfg> for RoiLayout {
    fn from(c: &labscan_config::RoiCfg) -> Self {
        Self {
            loading_start_us: c.loading_start_us,
            loading_end_offset_us: c.loading_end_offset_us,
            trapped_before_us: c.trapped_before_us,
            trapped_after_us: c.trapped_after_us,
            lost_start_offset_us: c.lost_start_offset_us,
            lost_cutoff_us: c.lost_cutoff_us,
            lost_end: c.lost_end.into(),
        }
    }
}

impl From<&labscan_config::Config> for SignalPipeline {
    fn from(c: &labscan_config::Config) -> Self {
        Self {
            bin_width_us: c.histogram.bin_width_us,
            margin_us: c.histogram.margin_us,
            layout: (&c.roi).into(),
        }
    }
}

// ── Controller ───────────────────────────────────────────────────────────────

impl TryFrom<&labscan_config::ControllerCfg> for ControllerParams {
    type Error = eyre::Report;
    fn try_from(c: &labscan_config::ControllerCfg) -> Result<Self> {
        Ok(Self {
            bounds: bounds("controller.setpoint", c.setpoint_min, c.setpoint_max)?,
            target_bounds: bounds("controller.target", c.target_min, c.target_max)?,
            tolerance: c.tolerance,
            max_iterations: c.max_iterations,
            samples: c.samples,
            settle: Duration::from_millis(c.settle_ms),
            schedule: GainSchedule::new(c.gain_schedule.clone())?,
            guess: GuessModel::new(c.initial_guess.clone())?,
        })
    }
}

// ── Recovery ─────────────────────────────────────────────────────────────────

impl From<labscan_config::FailureClassCfg> for FailureClass {
    fn from(c: labscan_config::FailureClassCfg) -> Self {
        match c {
            labscan_config::FailureClassCfg::ReferenceUnlock => FailureClass::ReferenceUnlock,
            labscan_config::FailureClassCfg::SequenceFault => FailureClass::SequenceFault,
        }
    }
}

impl TryFrom<&labscan_config::RecoveryCfg> for SignatureMatcher {
    type Error = eyre::Report;
    fn try_from(c: &labscan_config::RecoveryCfg) -> Result<Self> {
        SignatureMatcher::new(
            c.signatures
                .iter()
                .map(|s| Signature {
                    class: s.class.into(),
                    marker: s.marker.clone(),
                })
                .collect(),
        )
    }
}

impl TryFrom<&labscan_config::RelockCfg> for RelockParams {
    type Error = eyre::Report;
    fn try_from(c: &labscan_config::RelockCfg) -> Result<Self> {
        Ok(Self {
            center: c.center,
            coarse_span: c.coarse_span,
            coarse_points: c.coarse_points,
            fine_span: c.fine_span,
            fine_points: c.fine_points,
            settle: Duration::from_millis(c.settle_ms),
            bounds: bounds("recovery.relock", c.min, c.max)?,
        })
    }
}
