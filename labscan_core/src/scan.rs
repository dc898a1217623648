//! Scan orchestration: validate, step through values, extract signals, restore.

use std::sync::Arc;

use labscan_traits::{Clock, Scheduler, SequenceParams, SequenceRunner};

use crate::config::{FailurePolicy, RunCfg};
use crate::error::{BuildError, Result, ScanError};
use crate::histogram::EventBuffer;
use crate::recovery::RecoveryOrchestrator;
use crate::registry::ParameterRegistry;
use crate::scan_spec::ScanSpec;
use crate::signals::SignalPipeline;
use crate::status::{RecordSink, ScanOutcome, ScanRunRecord, ScanState, ScanStatus};

/// Owns every collaborator a scan needs. Built with [`ScanRunner::builder`].
pub struct ScanRunner {
    pub(crate) registry: ParameterRegistry,
    pub(crate) runner: Box<dyn SequenceRunner>,
    pub(crate) recovery: RecoveryOrchestrator,
    pub(crate) pipeline: SignalPipeline,
    pub(crate) sequence: SequenceParams,
    pub(crate) scheduler: Box<dyn Scheduler>,
    pub(crate) sink: Option<Box<dyn RecordSink>>,
    pub(crate) run: RunCfg,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) state: ScanState,
    pub(crate) records: Vec<ScanRunRecord>,
}

impl core::fmt::Debug for ScanRunner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScanRunner")
            .field("state", &self.state)
            .field("sequence", &self.sequence)
            .field("records", &self.records.len())
            .finish_non_exhaustive()
    }
}

/// Why the stepping loop stopped early.
enum Halt {
    Cancelled(usize),
    Aborted { index: usize, reason: String },
    Fatal(eyre::Report),
}

impl ScanRunner {
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Records of the last run, including one that ended in an abort.
    pub fn records(&self) -> &[ScanRunRecord] {
        &self.records
    }

    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    pub fn sequence(&self) -> &SequenceParams {
        &self.sequence
    }

    /// Run a full scan.
    ///
    /// Configuration errors are returned before any setter is called. Once
    /// stepping has started the scanned parameter is always restored to its
    /// pre-scan value and the sink is written exactly once.
    pub fn run(&mut self, spec: &ScanSpec) -> Result<ScanOutcome> {
        self.state = ScanState::Validating;
        let values = spec.values();
        let parameter = spec.parameter();
        if let Err(e) = self.registry.check(parameter, &values) {
            tracing::error!(parameter, error = %e, "scan rejected");
            self.state = ScanState::Idle;
            return Err(eyre::Report::new(e));
        }
        let configured = match self.registry.configured_value(parameter, &self.sequence) {
            Ok(v) => v,
            Err(e) => {
                self.state = ScanState::Idle;
                return Err(e);
            }
        };

        self.state = ScanState::Stepping;
        self.records.clear();
        let base = self.sequence;
        let epoch = self.clock.now();
        tracing::info!(parameter, steps = values.len(), min = spec.min(), max = spec.max(), "scan started");

        let halt = self.step_all(parameter, &values, epoch);

        self.state = ScanState::Done;
        let restore_failed = self.restore(parameter, configured, base);
        self.flush();
        self.state = ScanState::Idle;

        let status = match halt {
            None => ScanStatus::Completed,
            Some(Halt::Cancelled(next_index)) => ScanStatus::Cancelled { next_index },
            Some(Halt::Aborted { index, reason }) => {
                return Err(eyre::Report::new(ScanError::Aborted { index, reason }));
            }
            Some(Halt::Fatal(e)) => return Err(e),
        };
        let failed = self.records.iter().filter(|r| r.failed()).count();
        tracing::info!(records = self.records.len(), failed, ?status, restore_failed, "scan finished");
        Ok(ScanOutcome {
            records: self.records.clone(),
            status,
            restore_failed,
        })
    }

    fn step_all(&mut self, parameter: &str, values: &[f64], epoch: std::time::Instant) -> Option<Halt> {
        let mut buffer = match self.pipeline.histogram_spec(&self.sequence) {
            Ok(spec) => EventBuffer::new(spec, self.run.refresh_events),
            Err(e) => return Some(Halt::Fatal(e)),
        };
        for (index, &value) in values.iter().enumerate() {
            if !self.checkpoint(index) {
                return Some(Halt::Cancelled(index));
            }
            let mut record = ScanRunRecord::start(index, value);
            let result = self.step(parameter, index, value, &mut buffer, &mut record);
            record.elapsed_s = self.clock.secs_since(epoch);
            let failure = match result {
                Ok(()) => None,
                Err(e) if e.downcast_ref::<BuildError>().is_some() => {
                    self.records.push(record);
                    return Some(Halt::Fatal(e));
                }
                Err(e) => {
                    if let Some(ScanError::RetriesExhausted { attempts, .. }) = e.downcast_ref() {
                        record.attempts = *attempts;
                    }
                    Some(e.to_string())
                }
            };
            match failure {
                None => {
                    tracing::info!(index, value, recovered = record.recovered, "step done");
                    self.records.push(record);
                }
                Some(reason) => {
                    tracing::warn!(index, value, reason = %reason, policy = ?self.run.on_failure, "step failed");
                    record.failure = Some(reason.clone());
                    self.records.push(record);
                    if self.run.on_failure == FailurePolicy::Abort {
                        return Some(Halt::Aborted { index, reason });
                    }
                }
            }
        }
        None
    }

    fn step(
        &mut self,
        parameter: &str,
        index: usize,
        value: f64,
        buffer: &mut EventBuffer,
        record: &mut ScanRunRecord,
    ) -> Result<()> {
        self.registry.apply(parameter, value, &mut self.sequence)?;
        buffer.set_spec(self.pipeline.histogram_spec(&self.sequence)?);
        let out = self.recovery.run_step(
            index,
            self.runner.as_mut(),
            &self.sequence,
            self.run.repeats_per_step,
            buffer,
        )?;
        record.attempts = out.attempts;
        record.recovered = out.repairs > 0;
        let extraction = self.pipeline.extract(buffer.timestamps(), &self.sequence)?;
        tracing::debug!(
            index,
            events = buffer.len(),
            loading = extraction.signals.loading,
            trapped = extraction.signals.trapped,
            lost = extraction.signals.lost,
            "signals extracted"
        );
        record.signals = Some(extraction.signals);
        Ok(())
    }

    /// Cooperative cancellation point before step `index`. Blocks while paused.
    fn checkpoint(&self, index: usize) -> bool {
        let mut paused = false;
        loop {
            if self.scheduler.cancel_requested() {
                tracing::info!(index, "scan cancelled");
                return false;
            }
            if !self.scheduler.pause_requested() {
                if paused {
                    tracing::info!(index, "scan resumed");
                }
                return true;
            }
            if !paused {
                tracing::info!(index, "scan paused");
                paused = true;
            }
            self.clock.sleep(self.run.pause_poll);
        }
    }

    /// Put the scanned parameter back. Returns true if that failed.
    fn restore(&mut self, parameter: &str, configured: f64, base: SequenceParams) -> bool {
        self.sequence = base;
        match self.registry.apply(parameter, configured, &mut self.sequence) {
            Ok(()) => {
                tracing::debug!(parameter, value = configured, "restored configured value");
                false
            }
            Err(e) => {
                tracing::warn!(parameter, value = configured, error = %e, "failed to restore configured value");
                true
            }
        }
    }

    fn flush(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if let Err(e) = sink.write(&self.records) {
            tracing::warn!(error = %e, records = self.records.len(), "record sink failed");
        }
    }
}
