//! Wires the config into a scan over the simulated bench.

use std::io::Write;

use eyre::WrapErr;
use labscan_config::{Config, GuessTable};
use labscan_core::conversions::sequence_params;
use labscan_core::hw_error::map_hw_error;
use labscan_core::{
    BoundedSetter, Bounds, BuildError, ClosedLoopController, ClosedLoopSetter, ControllerParams,
    FailureClass, GuessModel, ParameterRegistry, RecordSink, RecoveryOrchestrator, RelockParams,
    RelockProcedure, Result, RunCfg, ScanOutcome, ScanRunRecord, ScanRunner, ScanSpec,
    SequenceField, SharedInstrument, SignalPipeline, SignatureMatcher,
};
use labscan_sim::{
    FlagScheduler, LockMonitor, SequenceSimCfg, SimulatedAnalyzer, SimulatedReference,
    SimulatedRfSource, SimulatedSequence,
};
use labscan_traits::RfSource;

use crate::cli::SimFaults;

/// Upper bound for the sequence timing anchors (µs).
const TIMING_LIMIT_US: f64 = 10_000.0;
/// Distance from the optimum at which the simulated reference drops lock.
const REFERENCE_CAPTURE: f64 = 0.5;
/// Width of the simulated lock-quality peak seen by the relock monitor.
const LOCK_WIDTH: f64 = 1.0;

/// Writes each record as one JSON line.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn write(&mut self, records: &[ScanRunRecord]) -> Result<()> {
        for r in records {
            serde_json::to_writer(&mut self.out, r)?;
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Everything a scan needs from the simulated bench.
pub struct Bench {
    pub rf: SharedInstrument<SimulatedRfSource>,
    pub registry: ParameterRegistry,
    pub sequence: SimulatedSequence,
    pub recovery: RecoveryOrchestrator,
}

impl Bench {
    /// Build the simulated instruments and register every scannable parameter.
    ///
    /// The RF source is left at the configured frequency with the amplitude the
    /// initial-guess table predicts for the configured output level.
    pub fn new(cfg: &Config, guess: Option<&GuessTable>, faults: &SimFaults) -> Result<Self> {
        let mut controller = ControllerParams::try_from(&cfg.controller)?;
        if let Some(table) = guess {
            controller.guess = GuessModel::new(table.points.clone())?;
        }
        let initial_drive = controller
            .guess
            .guess(cfg.rf.amplitude_dbm, controller.bounds);

        let source = SimulatedRfSource::new();
        let rf_probe = source.probe();
        let rf = SharedInstrument::new(source);
        rf.with(|src| {
            src.set_frequency(cfg.rf.frequency_hz)?;
            src.set_amplitude(initial_drive)?;
            src.on()
        })
        .map_err(|e| map_hw_error(&*e))
        .wrap_err("initialize RF source")?;

        let frequency = rf
            .frequency_bounds()
            .ok_or_else(|| BuildError::InvalidBounds("tickle_frequency".into()))?;
        let amplitude = ClosedLoopSetter::new(
            ClosedLoopController::new(controller)?,
            rf.amplitude_setter(),
            SimulatedAnalyzer::new(rf_probe.clone()),
        );
        let targets = amplitude.target_bounds();
        let timing = Bounds::new(0.0, TIMING_LIMIT_US)
            .ok_or_else(|| BuildError::InvalidBounds("sequence".into()))?;

        let registry = ParameterRegistry::builder()
            .register(BoundedSetter::instrument(
                "tickle_frequency",
                frequency,
                cfg.rf.frequency_hz,
                rf.frequency_setter(),
            ))
            .register(BoundedSetter::instrument(
                "tickle_amplitude",
                targets,
                cfg.rf.amplitude_dbm,
                amplitude,
            ))
            .register(BoundedSetter::sequence("load_time", timing, SequenceField::LoadTime))
            .register(BoundedSetter::sequence("wait_time", timing, SequenceField::WaitTime))
            .register(BoundedSetter::sequence(
                "pulse_length",
                timing,
                SequenceField::PulseLength,
            ))
            .build()?;

        let center = cfg.recovery.relock.as_ref().map_or(0.0, |r| r.center);
        let reference = SimulatedReference::new(center, REFERENCE_CAPTURE);
        let reference_probe = reference.probe();

        let mut sim = SequenceSimCfg::default();
        if let Some(sig) = cfg.recovery.signatures.first() {
            sim.fault_marker.clone_from(&sig.marker);
        }
        let mut sequence = SimulatedSequence::new(sim)
            .with_rf(rf_probe)
            .with_reference(reference_probe.clone())
            .with_fault_runs(faults.fault_runs.clone());
        if let Some(run) = faults.drift_at {
            sequence = sequence.with_reference_drift(run, faults.drift);
        }

        let matcher = SignatureMatcher::try_from(&cfg.recovery)?;
        let classes: Vec<FailureClass> = matcher.classes().collect();
        let mut recovery = RecoveryOrchestrator::new(matcher, cfg.recovery.max_retries);
        if let Some(relock) = &cfg.recovery.relock {
            let monitor = LockMonitor::new(reference_probe, LOCK_WIDTH);
            let procedure =
                RelockProcedure::new(RelockParams::try_from(relock)?, reference, monitor)?;
            recovery = recovery.with_repair(FailureClass::ReferenceUnlock, procedure);
        }
        if classes.contains(&FailureClass::SequenceFault) {
            // The simulated runtime recovers on its own; re-issuing is the repair.
            recovery = recovery.with_repair(FailureClass::SequenceFault, || -> Result<()> {
                tracing::info!("reloading detection sequence");
                Ok(())
            });
        }

        Ok(Self {
            rf,
            registry,
            sequence,
            recovery,
        })
    }
}

/// RF output off, then release the source. Later commands are refused.
pub fn shutdown(rf: &SharedInstrument<SimulatedRfSource>) -> Result<()> {
    rf.with(|src| {
        src.off()?;
        src.close()
    })
    .map_err(|e| map_hw_error(&*e))
    .wrap_err("shut down RF source")?;
    Ok(())
}

/// Run the configured scan on `bench`. Records go to `out` as JSON lines once the scan ends.
///
/// The RF source is shut down afterwards whether the scan completed, was cancelled or failed.
pub fn run_scan<W: Write + 'static>(
    cfg: &Config,
    bench: Bench,
    scheduler: FlagScheduler,
    out: W,
) -> Result<ScanOutcome> {
    let rf = bench.rf.clone();
    let result = ScanSpec::try_from(&cfg.scan).and_then(|spec| {
        ScanRunner::builder()
            .runner(bench.sequence)
            .registry(bench.registry)
            .with_recovery(bench.recovery)
            .with_pipeline(SignalPipeline::from(cfg))
            .with_sequence(sequence_params(&cfg.sequence))
            .with_run_cfg(RunCfg::from(cfg))
            .with_scheduler(scheduler)
            .with_sink(JsonLinesSink::new(out))
            .build()?
            .run(&spec)
    });
    if let Err(e) = shutdown(&rf) {
        tracing::warn!(error = %e, "RF source shutdown failed");
    }

    let outcome = result?;
    let failed = outcome.failed_indices();
    if !failed.is_empty() {
        tracing::warn!(?failed, "scan finished with failed steps");
    }
    Ok(outcome)
}

/// What `check` reports: the validated scan and the parameters it could use.
#[derive(Debug)]
pub struct CheckReport {
    pub parameter: String,
    pub bounds: Bounds,
    pub values: Vec<f64>,
    pub registered: Vec<String>,
}

/// Validate the scan against the registry without running a single sequence.
pub fn check(cfg: &Config, guess: Option<&GuessTable>) -> Result<CheckReport> {
    let spec = ScanSpec::try_from(&cfg.scan)?;
    let bench = Bench::new(cfg, guess, &SimFaults::default())?;
    shutdown(&bench.rf)?;
    let values = spec.values();
    bench.registry.check(spec.parameter(), &values)?;
    let bounds = bench
        .registry
        .bounds(spec.parameter())
        .ok_or_else(|| BuildError::UnknownParameter(spec.parameter().to_string()))?;
    Ok(CheckReport {
        parameter: spec.parameter().to_string(),
        bounds,
        values,
        registered: bench.registry.names().map(str::to_string).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_sink_writes_one_line_per_record() {
        let mut buf = Vec::new();
        {
            let mut sink = JsonLinesSink::new(&mut buf);
            let records = [ScanRunRecord::start(0, 1.0), ScanRunRecord::start(1, 2.0)];
            sink.write(&records).unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let v: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(v["index"], 1);
        assert_eq!(v["applied_value"], 2.0);
    }

    const CONFIG: &str = r#"
[scan]
parameter = "tickle_frequency"
min = 1.4e6
max = 1.6e6
steps = 3
on_failure = "abort"

[sequence]
load_time_us = 5.0
wait_time_us = 50.0
pulse_length_us = 2.0

[controller]
settle_ms = 0

[[recovery.signatures]]
class = "reference_unlock"
marker = "REFERENCE UNLOCKED"

[recovery.relock]
settle_ms = 0
"#;

    fn bench(faults: &SimFaults) -> (Config, Bench, labscan_sim::RfProbe) {
        let cfg = labscan_config::load_toml(CONFIG).unwrap();
        cfg.validate().unwrap();
        let bench = Bench::new(&cfg, None, faults).unwrap();
        let probe = bench.rf.with(|src| Ok(src.probe())).unwrap();
        assert!(probe.output_on());
        (cfg, bench, probe)
    }

    #[test]
    fn rf_source_is_released_after_a_completed_scan() {
        let (cfg, bench, probe) = bench(&SimFaults::default());
        let rf = bench.rf.clone();

        let outcome = run_scan(&cfg, bench, FlagScheduler::new(), std::io::sink()).unwrap();

        assert_eq!(outcome.records.len(), 3);
        assert!(!probe.output_on());
        assert!(rf.with(|src| src.on()).is_err());
    }

    #[test]
    fn rf_source_is_released_after_an_aborted_scan() {
        let faults = SimFaults {
            fault_runs: vec![1, 2, 3],
            ..SimFaults::default()
        };
        let (cfg, bench, probe) = bench(&faults);
        let rf = bench.rf.clone();

        let err = run_scan(&cfg, bench, FlagScheduler::new(), std::io::sink()).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<labscan_core::ScanError>(),
            Some(labscan_core::ScanError::Aborted { index: 0, .. })
        ));
        assert!(!probe.output_on());
        assert!(rf.with(|src| src.on()).is_err());
    }
}
