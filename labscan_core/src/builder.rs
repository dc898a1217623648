//! Type-state builder for `ScanRunner`.
//!
//! `build()` only exists once a sequence runner and a parameter registry are
//! set. `try_build()` is always available and reports what is missing.

use std::marker::PhantomData;
use std::sync::Arc;

use labscan_traits::{Clock, MonotonicClock, Scheduler, SequenceParams, SequenceRunner};

use crate::config::RunCfg;
use crate::error::{BuildError, Result};
use crate::recovery::RecoveryOrchestrator;
use crate::registry::ParameterRegistry;
use crate::scan::ScanRunner;
use crate::signals::{RoiLayout, SignalPipeline};
use crate::status::{RecordSink, ScanState};

pub struct Missing;
pub struct Set;

/// Scheduler that never pauses or cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unscheduled;

impl Scheduler for Unscheduled {
    fn pause_requested(&self) -> bool {
        false
    }
}

pub struct ScanRunnerBuilder<R, P> {
    runner: Option<Box<dyn SequenceRunner>>,
    registry: Option<ParameterRegistry>,
    recovery: Option<RecoveryOrchestrator>,
    pipeline: Option<SignalPipeline>,
    sequence: Option<SequenceParams>,
    scheduler: Option<Box<dyn Scheduler>>,
    sink: Option<Box<dyn RecordSink>>,
    run: Option<RunCfg>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    _r: PhantomData<R>,
    _p: PhantomData<P>,
}

impl Default for ScanRunnerBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            runner: None,
            registry: None,
            recovery: None,
            pipeline: None,
            sequence: None,
            scheduler: None,
            sink: None,
            run: None,
            clock: None,
            _r: PhantomData,
            _p: PhantomData,
        }
    }
}

impl ScanRunner {
    pub fn builder() -> ScanRunnerBuilder<Missing, Missing> {
        ScanRunnerBuilder::default()
    }
}

/// Default binning: 0.5 us bins and a 100 us margin past the last anchor.
pub fn default_pipeline() -> SignalPipeline {
    SignalPipeline {
        bin_width_us: 0.5,
        margin_us: 100.0,
        layout: RoiLayout::default(),
    }
}

impl<R, P> ScanRunnerBuilder<R, P> {
    fn retag<R2, P2>(self) -> ScanRunnerBuilder<R2, P2> {
        ScanRunnerBuilder {
            runner: self.runner,
            registry: self.registry,
            recovery: self.recovery,
            pipeline: self.pipeline,
            sequence: self.sequence,
            scheduler: self.scheduler,
            sink: self.sink,
            run: self.run,
            clock: self.clock,
            _r: PhantomData,
            _p: PhantomData,
        }
    }

    pub fn with_recovery(mut self, recovery: RecoveryOrchestrator) -> Self {
        self.recovery = Some(recovery);
        self
    }
    pub fn with_pipeline(mut self, pipeline: SignalPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }
    /// Base sequence parameters; scanned fields are restored to these afterwards.
    pub fn with_sequence(mut self, sequence: SequenceParams) -> Self {
        self.sequence = Some(sequence);
        self
    }
    pub fn with_scheduler<S: Scheduler + 'static>(mut self, scheduler: S) -> Self {
        self.scheduler = Some(Box::new(scheduler));
        self
    }
    pub fn with_sink<K: RecordSink + 'static>(mut self, sink: K) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }
    pub fn with_run_cfg(mut self, run: RunCfg) -> Self {
        self.run = Some(run);
        self
    }
    /// Defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fallible build available in any type-state.
    pub fn try_build(self) -> Result<ScanRunner> {
        let runner = self
            .runner
            .ok_or_else(|| eyre::Report::new(BuildError::MissingRunner))?;
        let registry = self
            .registry
            .ok_or_else(|| eyre::Report::new(BuildError::MissingRegistry))?;
        let recovery = self.recovery.unwrap_or_default();
        recovery.validate().map_err(eyre::Report::new)?;

        let run = self.run.unwrap_or_default();
        if run.repeats_per_step == 0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "repeats_per_step must be >= 1",
            )));
        }
        let sequence = self.sequence.unwrap_or_default();
        let pipeline = self.pipeline.unwrap_or_else(default_pipeline);
        pipeline.histogram_spec(&sequence)?;

        Ok(ScanRunner {
            registry,
            runner,
            recovery,
            pipeline,
            sequence,
            scheduler: self.scheduler.unwrap_or_else(|| Box::new(Unscheduled)),
            sink: self.sink,
            run,
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(MonotonicClock::new())),
            state: ScanState::Idle,
            records: Vec::new(),
        })
    }
}

impl<P> ScanRunnerBuilder<Missing, P> {
    pub fn runner<S: SequenceRunner + 'static>(mut self, runner: S) -> ScanRunnerBuilder<Set, P> {
        self.runner = Some(Box::new(runner));
        self.retag()
    }
}

impl<R> ScanRunnerBuilder<R, Missing> {
    pub fn registry(mut self, registry: ParameterRegistry) -> ScanRunnerBuilder<R, Set> {
        self.registry = Some(registry);
        self.retag()
    }
}

impl ScanRunnerBuilder<Set, Set> {
    pub fn build(self) -> Result<ScanRunner> {
        self.try_build()
    }
}
