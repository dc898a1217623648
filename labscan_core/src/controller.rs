//! Closed-loop setpoint controller.
//!
//! Drives an instrument whose setpoint-to-output mapping drifts (RF amplitude
//! in dBm as read back by an analyzer) to within a tolerance of a target.
//! Each iteration applies the current setpoint, waits a fixed settle time,
//! takes a trimmed mean of repeated readings and corrects the setpoint by a
//! gain picked from a step schedule.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use labscan_traits::{Actuator, Analyzer, BoxError, Clock, MonotonicClock};
use serde::Serialize;

use crate::error::{BuildError, Result, ScanError};
use crate::hw_error::map_hw_error;
use crate::registry::Bounds;
use crate::util::{interpolate, trimmed_mean};

/// Step schedule of correction gains keyed by setpoint magnitude.
///
/// Entries are kept sorted by threshold, descending. The first entry whose
/// threshold is `<= |setpoint|` wins; below every threshold the last entry applies.
#[derive(Debug, Clone, PartialEq)]
pub struct GainSchedule {
    bands: Vec<(f64, f64)>,
}

impl GainSchedule {
    pub fn new(mut bands: Vec<(f64, f64)>) -> Result<Self> {
        if bands.is_empty() {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "gain schedule must not be empty",
            )));
        }
        for (thr, gain) in &bands {
            if !thr.is_finite() || *thr < 0.0 {
                return Err(eyre::Report::new(BuildError::InvalidConfig(
                    "gain threshold must be finite and >= 0",
                )));
            }
            if !gain.is_finite() || *gain <= 0.0 {
                return Err(eyre::Report::new(BuildError::InvalidConfig(
                    "gain must be finite and > 0",
                )));
            }
        }
        bands.sort_by(|a, b| b.0.total_cmp(&a.0));
        if bands.windows(2).any(|w| w[0].1 < w[1].1) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "gain must not decrease as the threshold grows",
            )));
        }
        Ok(Self { bands })
    }

    pub fn gain(&self, setpoint: f64) -> f64 {
        let mag = setpoint.abs();
        self.bands
            .iter()
            .find(|(thr, _)| mag >= *thr)
            .or_else(|| self.bands.last())
            .map(|(_, g)| *g)
            .unwrap_or(0.0)
    }
}

/// Fixed piecewise-linear map from target to a first setpoint guess.
#[derive(Debug, Clone, PartialEq)]
pub struct GuessModel {
    points: Vec<(f64, f64)>,
}

impl GuessModel {
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self> {
        labscan_config::check_guess_table(&points)?;
        Ok(Self { points })
    }

    /// Guess for `target`, clamped into `bounds`.
    pub fn guess(&self, target: f64, bounds: Bounds) -> f64 {
        let raw = interpolate(&self.points, target).unwrap_or(bounds.lo());
        if raw.is_finite() {
            bounds.clamp(raw)
        } else {
            bounds.lo()
        }
    }
}

/// Controller memory. `last_setpoint`, once set, lies within `bounds`.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationState {
    pub last_setpoint: Option<f64>,
    pub target: f64,
    pub bounds: Bounds,
    pub tolerance: f64,
    pub max_iterations: u32,
}

/// Result of one `drive` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Convergence {
    pub target: f64,
    pub setpoint: f64,
    pub measured: f64,
    pub iterations: u32,
    pub converged: bool,
}

/// Tunables that are not part of [`CalibrationState`].
#[derive(Debug, Clone)]
pub struct ControllerParams {
    pub bounds: Bounds,
    pub target_bounds: Bounds,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub samples: usize,
    pub settle: Duration,
    pub schedule: GainSchedule,
    pub guess: GuessModel,
}

pub struct ClosedLoopController {
    state: CalibrationState,
    target_bounds: Bounds,
    samples: usize,
    settle: Duration,
    schedule: GainSchedule,
    guess: GuessModel,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl core::fmt::Debug for ClosedLoopController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClosedLoopController")
            .field("state", &self.state)
            .field("samples", &self.samples)
            .field("settle", &self.settle)
            .finish_non_exhaustive()
    }
}

impl ClosedLoopController {
    pub fn new(p: ControllerParams) -> Result<Self> {
        if p.samples < 3 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "controller needs at least 3 samples",
            )));
        }
        if !(p.tolerance.is_finite() && p.tolerance > 0.0) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "controller tolerance must be > 0",
            )));
        }
        if p.max_iterations == 0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "controller max_iterations must be >= 1",
            )));
        }
        Ok(Self {
            state: CalibrationState {
                last_setpoint: None,
                target: p.target_bounds.lo(),
                bounds: p.bounds,
                tolerance: p.tolerance,
                max_iterations: p.max_iterations,
            },
            target_bounds: p.target_bounds,
            samples: p.samples,
            settle: p.settle,
            schedule: p.schedule,
            guess: p.guess,
            clock: Arc::new(MonotonicClock::new()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    /// Range of targets this controller accepts.
    pub fn target_bounds(&self) -> Bounds {
        self.target_bounds
    }

    fn measure(&self, analyzer: &mut dyn Analyzer) -> Result<f64> {
        let mut readings = Vec::with_capacity(self.samples);
        for _ in 0..self.samples {
            let r = analyzer
                .measure()
                .map_err(|e| eyre::Report::new(map_hw_error(e.as_ref())))?;
            if r.amplitude.is_finite() {
                readings.push(r.amplitude);
            }
        }
        trimmed_mean(&readings).ok_or_else(|| {
            eyre::Report::new(ScanError::Hardware(format!(
                "only {} of {} readings were finite",
                readings.len(),
                self.samples
            )))
        })
    }

    /// Converge the measured output to `target`.
    ///
    /// Non-convergence is not an error: a warning is logged and the last
    /// applied setpoint is kept. Only instrument failures propagate.
    pub fn drive(
        &mut self,
        target: f64,
        actuator: &mut dyn Actuator,
        analyzer: &mut dyn Analyzer,
    ) -> Result<Convergence> {
        self.state.target = target;
        let bounds = self.state.bounds;
        let mut setpoint = match self.state.last_setpoint {
            Some(sp) => sp,
            None => {
                let g = self.guess.guess(target, bounds);
                tracing::debug!(target, guess = g, "initial setpoint from guess table");
                g
            }
        };

        let mut measured = f64::NAN;
        let max = self.state.max_iterations;
        for iteration in 1..=max {
            actuator
                .apply(setpoint)
                .map_err(|e| eyre::Report::new(map_hw_error(e.as_ref())))?;
            self.state.last_setpoint = Some(setpoint);
            self.clock.sleep(self.settle);

            measured = self.measure(analyzer)?;
            let error = target - measured;
            tracing::trace!(iteration, setpoint, measured, error, "calibration iteration");
            if error.abs() <= self.state.tolerance {
                tracing::info!(target, setpoint, measured, iterations = iteration, "calibration converged");
                return Ok(Convergence {
                    target,
                    setpoint,
                    measured,
                    iterations: iteration,
                    converged: true,
                });
            }
            if iteration < max {
                setpoint = bounds.clamp(setpoint + self.schedule.gain(setpoint) * error);
            }
        }

        tracing::warn!(
            target,
            setpoint,
            measured,
            iterations = max,
            "calibration did not converge; keeping last setpoint"
        );
        Ok(Convergence {
            target,
            setpoint,
            measured,
            iterations: max,
            converged: false,
        })
    }
}

/// Shared record of every `drive` outcome, readable after the setter is boxed into a registry.
pub type ConvergenceLog = Rc<RefCell<Vec<Convergence>>>;

/// Registry adapter: applying a value means "drive the output to this target".
pub struct ClosedLoopSetter {
    controller: ClosedLoopController,
    actuator: Box<dyn Actuator>,
    analyzer: Box<dyn Analyzer>,
    log: ConvergenceLog,
}

impl ClosedLoopSetter {
    pub fn new<A, M>(controller: ClosedLoopController, actuator: A, analyzer: M) -> Self
    where
        A: Actuator + 'static,
        M: Analyzer + 'static,
    {
        Self {
            controller,
            actuator: Box::new(actuator),
            analyzer: Box::new(analyzer),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn log(&self) -> ConvergenceLog {
        Rc::clone(&self.log)
    }

    pub fn target_bounds(&self) -> Bounds {
        self.controller.target_bounds()
    }
}

impl Actuator for ClosedLoopSetter {
    fn apply(&mut self, target: f64) -> std::result::Result<(), BoxError> {
        let c = self
            .controller
            .drive(target, self.actuator.as_mut(), self.analyzer.as_mut())?;
        self.log.borrow_mut().push(c);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_schedule_picks_band_by_magnitude() {
        let s = GainSchedule::new(vec![(0.0, 0.004), (1.0, 0.08), (0.3, 0.02)]).unwrap();
        assert_eq!(s.gain(2.0), 0.08);
        assert_eq!(s.gain(1.0), 0.08);
        assert_eq!(s.gain(0.5), 0.02);
        assert_eq!(s.gain(-0.5), 0.02);
        assert_eq!(s.gain(0.01), 0.004);
    }

    #[test]
    fn gain_schedule_without_zero_band_uses_finest() {
        let s = GainSchedule::new(vec![(1.0, 0.5), (0.5, 0.1)]).unwrap();
        assert_eq!(s.gain(0.1), 0.1);
    }

    #[test]
    fn gain_schedule_rejects_non_monotonic() {
        let err = GainSchedule::new(vec![(1.0, 0.01), (0.0, 0.1)]).unwrap_err();
        assert!(err.downcast_ref::<BuildError>().is_some());
    }

    #[test]
    fn guess_is_clamped_into_bounds() {
        let g = GuessModel::new(vec![(-40.0, 0.001), (0.0, 0.1), (20.0, 1.2)]).unwrap();
        let b = Bounds::new(0.001, 1.0).unwrap();
        assert_eq!(g.guess(20.0, b), 1.0);
        assert_eq!(g.guess(-80.0, b), 0.001);
        assert!((g.guess(-20.0, b) - 0.0505).abs() < 1e-12);
    }
}
