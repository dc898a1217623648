//! Failure signatures, repair procedures and the bounded retry loop around one scan step.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use labscan_traits::{
    Actuator, Analyzer, Clock, MonotonicClock, SequenceOutput, SequenceParams, SequenceRunner,
};
use serde::Serialize;

use crate::error::{BuildError, Result, ScanError};
use crate::histogram::EventBuffer;
use crate::hw_error::map_hw_error;
use crate::registry::Bounds;
use crate::util::linspace;

/// Known classes of transient instrument failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    ReferenceUnlock,
    SequenceFault,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureClass::ReferenceUnlock => "reference_unlock",
            FailureClass::SequenceFault => "sequence_fault",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub class: FailureClass,
    pub marker: String,
}

/// Text adapter for the sequence runtime's diagnostics.
///
/// Signatures are tried in order; the first marker found as a substring wins.
#[derive(Debug, Clone, Default)]
pub struct SignatureMatcher {
    signatures: Vec<Signature>,
}

impl SignatureMatcher {
    pub fn new(signatures: Vec<Signature>) -> Result<Self> {
        if signatures.iter().any(|s| s.marker.trim().is_empty()) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "failure signature marker must not be empty",
            )));
        }
        Ok(Self { signatures })
    }

    pub fn classify_text(&self, text: &str) -> Option<FailureClass> {
        self.signatures
            .iter()
            .find(|s| text.contains(&s.marker))
            .map(|s| s.class)
    }

    pub fn classify(&self, output: &SequenceOutput) -> Option<FailureClass> {
        self.classify_text(&output.diagnostics)
    }

    pub fn classes(&self) -> impl Iterator<Item = FailureClass> + '_ {
        self.signatures.iter().map(|s| s.class)
    }
}

/// Corrective action for one failure class.
pub trait Repair {
    fn repair(&mut self) -> Result<()>;
}

impl<F> Repair for F
where
    F: FnMut() -> Result<()>,
{
    fn repair(&mut self) -> Result<()> {
        self()
    }
}

/// One pass over a range of reference positions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sweep {
    pub points: Vec<(f64, f64)>,
    pub best: f64,
    pub best_signal: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelockReport {
    pub coarse: Sweep,
    pub fine: Sweep,
    pub locked_at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelockParams {
    pub center: f64,
    pub coarse_span: f64,
    pub coarse_points: usize,
    pub fine_span: f64,
    pub fine_points: usize,
    pub settle: Duration,
    pub bounds: Bounds,
}

/// Reacquire a reference lock: coarse sweep, fine sweep around the coarse
/// optimum, then park at the fine optimum and use it as the next center.
pub struct RelockProcedure {
    actuator: Box<dyn Actuator>,
    monitor: Box<dyn Analyzer>,
    params: RelockParams,
    clock: Arc<dyn Clock + Send + Sync>,
    history: Vec<RelockReport>,
}

impl RelockProcedure {
    pub fn new<A, M>(params: RelockParams, actuator: A, monitor: M) -> Result<Self>
    where
        A: Actuator + 'static,
        M: Analyzer + 'static,
    {
        if params.coarse_points < 2 || params.fine_points < 2 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "relock sweeps need at least 2 points",
            )));
        }
        if !(params.coarse_span > 0.0 && params.fine_span > 0.0) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "relock spans must be > 0",
            )));
        }
        if !params.bounds.contains(params.center) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "relock center must lie within its bounds",
            )));
        }
        Ok(Self {
            actuator: Box::new(actuator),
            monitor: Box::new(monitor),
            params,
            clock: Arc::new(MonotonicClock::new()),
            history: Vec::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn center(&self) -> f64 {
        self.params.center
    }

    pub fn history(&self) -> &[RelockReport] {
        &self.history
    }

    fn sweep(&mut self, center: f64, span: f64, points: usize) -> Result<Sweep> {
        let b = self.params.bounds;
        let mut out = Vec::with_capacity(points);
        for x in linspace(center - span / 2.0, center + span / 2.0, points)
            .into_iter()
            .map(|x| b.clamp(x))
        {
            self.actuator
                .apply(x)
                .map_err(|e| eyre::Report::new(map_hw_error(e.as_ref())))?;
            self.clock.sleep(self.params.settle);
            let r = self
                .monitor
                .measure()
                .map_err(|e| eyre::Report::new(map_hw_error(e.as_ref())))?;
            out.push((x, r.amplitude));
        }
        let (best, best_signal) = out
            .iter()
            .copied()
            .filter(|(_, s)| s.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| {
                eyre::Report::new(ScanError::Hardware("relock sweep saw no finite signal".into()))
            })?;
        Ok(Sweep {
            points: out,
            best,
            best_signal,
        })
    }
}

impl Repair for RelockProcedure {
    fn repair(&mut self) -> Result<()> {
        let p = self.params;
        let coarse = self.sweep(p.center, p.coarse_span, p.coarse_points)?;
        let fine = self.sweep(coarse.best, p.fine_span, p.fine_points)?;
        let locked_at = fine.best;
        self.actuator
            .apply(locked_at)
            .map_err(|e| eyre::Report::new(map_hw_error(e.as_ref())))?;
        tracing::info!(
            previous_center = p.center,
            coarse_best = coarse.best,
            locked_at,
            signal = fine.best_signal,
            "reference relocked"
        );
        self.params.center = locked_at;
        self.history.push(RelockReport {
            coarse,
            fine,
            locked_at,
        });
        Ok(())
    }
}

/// How one step went once it succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub attempts: u32,
    pub repairs: u32,
}

/// Runs a step, repairs known failures and re-issues the step from scratch.
pub struct RecoveryOrchestrator {
    matcher: SignatureMatcher,
    repairs: HashMap<FailureClass, Box<dyn Repair>>,
    max_retries: u32,
}

impl Default for RecoveryOrchestrator {
    fn default() -> Self {
        Self {
            matcher: SignatureMatcher::default(),
            repairs: HashMap::new(),
            max_retries: 0,
        }
    }
}

impl RecoveryOrchestrator {
    pub fn new(matcher: SignatureMatcher, max_retries: u32) -> Self {
        Self {
            matcher,
            repairs: HashMap::new(),
            max_retries,
        }
    }

    pub fn with_repair<R>(mut self, class: FailureClass, repair: R) -> Self
    where
        R: Repair + 'static,
    {
        self.repairs.insert(class, Box::new(repair));
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Every class the matcher can report must have a repair.
    pub fn validate(&self) -> std::result::Result<(), BuildError> {
        match self.matcher.classes().find(|c| !self.repairs.contains_key(c)) {
            Some(c) => Err(BuildError::MissingRepair(c)),
            None => Ok(()),
        }
    }

    /// One attempt: `repeats` sequence runs into `buffer`, stopping at the first known failure.
    fn attempt(
        &self,
        runner: &mut dyn SequenceRunner,
        params: &SequenceParams,
        repeats: u32,
        buffer: &mut EventBuffer,
    ) -> Result<Option<(FailureClass, String)>> {
        for _ in 0..repeats {
            match runner.run_detection_sequence(params) {
                Ok(out) => {
                    if let Some(class) = self.matcher.classify(&out) {
                        return Ok(Some((class, out.diagnostics)));
                    }
                    buffer.extend(&out.timestamps);
                }
                Err(e) => {
                    let text = e.to_string();
                    if let Some(class) = self.matcher.classify_text(&text) {
                        return Ok(Some((class, text)));
                    }
                    return Err(eyre::Report::new(map_hw_error(e.as_ref())));
                }
            }
        }
        Ok(None)
    }

    /// Execute step `index`. Unknown errors fail the step immediately; known
    /// signatures are repaired and retried up to `max_retries` times.
    pub fn run_step(
        &mut self,
        index: usize,
        runner: &mut dyn SequenceRunner,
        params: &SequenceParams,
        repeats: u32,
        buffer: &mut EventBuffer,
    ) -> Result<StepOutcome> {
        let mut repairs = 0u32;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            buffer.clear();
            let Some((class, detail)) = self.attempt(runner, params, repeats, buffer)? else {
                return Ok(StepOutcome { attempts, repairs });
            };
            tracing::warn!(index, attempt = attempts, %class, detail = %detail.trim(), "known failure signature");
            if attempts > self.max_retries {
                buffer.clear();
                return Err(eyre::Report::new(ScanError::RetriesExhausted {
                    index,
                    class,
                    attempts,
                }));
            }
            let repair = self
                .repairs
                .get_mut(&class)
                .ok_or_else(|| eyre::Report::new(BuildError::MissingRepair(class)))?;
            repair.repair()?;
            repairs += 1;
        }
    }
}
