//! Full scans against the simulated instruments.

use std::sync::Arc;
use std::time::Duration;

use labscan_core::{
    BoundedSetter, Bounds, ClosedLoopController, ClosedLoopSetter, ControllerParams,
    FailureClass, GainSchedule, GuessModel, ParameterRegistry, RecoveryOrchestrator, RelockParams,
    RelockProcedure, RunCfg, ScanRunner, ScanSpec, ScanStatus, SharedInstrument, Signature,
    SignatureMatcher, VecSink,
};
use labscan_sim::{
    LockMonitor, SequenceSimCfg, SimulatedAnalyzer, SimulatedReference, SimulatedRfSource,
    SimulatedSequence,
};
use labscan_traits::RfSource;
use labscan_traits::clock::test_clock::ManualClock;
use rstest::rstest;

fn relock(clock: &ManualClock, reference: SimulatedReference, monitor: LockMonitor) -> RelockProcedure {
    RelockProcedure::new(
        RelockParams {
            center: 0.0,
            coarse_span: 10.0,
            coarse_points: 21,
            fine_span: 1.0,
            fine_points: 11,
            settle: Duration::from_millis(50),
            bounds: Bounds::new(-50.0, 50.0).unwrap(),
        },
        reference,
        monitor,
    )
    .unwrap()
    .with_clock(Arc::new(clock.clone()))
}

fn matcher() -> SignatureMatcher {
    SignatureMatcher::new(vec![Signature {
        class: FailureClass::ReferenceUnlock,
        marker: "REFERENCE UNLOCKED".into(),
    }])
    .unwrap()
}

#[rstest]
fn frequency_scan_finds_resonance_and_survives_relock() {
    let clock = ManualClock::new();
    let mut src = SimulatedRfSource::new();
    src.set_amplitude(0.5).unwrap();
    src.on().unwrap();
    let rf_probe = src.probe();
    let rf = SharedInstrument::new(src);

    let reference = SimulatedReference::new(0.0, 0.5);
    let ref_probe = reference.probe();
    let monitor = LockMonitor::new(ref_probe.clone(), 1.0);

    let sequence = SimulatedSequence::new(SequenceSimCfg::default())
        .with_rf(rf_probe.clone())
        .with_reference(ref_probe.clone())
        .with_reference_drift(3, 2.0);

    let registry = ParameterRegistry::builder()
        .register(BoundedSetter::instrument(
            "tickle_frequency",
            rf.frequency_bounds().unwrap(),
            1.0e6,
            rf.frequency_setter(),
        ))
        .build()
        .unwrap();

    let sink = VecSink::new();
    let mut scan = ScanRunner::builder()
        .runner(sequence)
        .registry(registry)
        .with_recovery(
            RecoveryOrchestrator::new(matcher(), 2)
                .with_repair(FailureClass::ReferenceUnlock, relock(&clock, reference, monitor)),
        )
        .with_run_cfg(RunCfg {
            repeats_per_step: 5,
            refresh_events: 25,
            ..RunCfg::default()
        })
        .with_clock(Arc::new(clock.clone()))
        .with_sink(sink.clone())
        .build()
        .unwrap();

    let out = scan
        .run(&ScanSpec::new("tickle_frequency", 1.4e6, 1.6e6, 11).unwrap())
        .unwrap();

    assert_eq!(out.status, ScanStatus::Completed);
    assert_eq!(out.records.len(), 11);
    assert!(out.failed_indices().is_empty());
    assert!(out.records[0].recovered);
    assert!(out.records[1..].iter().all(|r| !r.recovered));
    assert!(ref_probe.locked());

    let lost: Vec<u64> = out
        .records
        .iter()
        .map(|r| r.signals.unwrap().lost)
        .collect();
    for r in &out.records {
        assert_eq!(r.signals.unwrap().loading, 100);
    }
    let centre = lost[4] + lost[5] + lost[6];
    let edges = lost[0] + lost[1] + lost[9] + lost[10];
    assert!(centre > edges, "lost per step: {lost:?}");

    assert_eq!(rf_probe.frequency_hz(), 1.0e6);
    assert_eq!(sink.batches().len(), 1);
}

#[rstest]
fn amplitude_scan_uses_closed_loop_and_restores_target() {
    let clock = ManualClock::new();
    let mut src = SimulatedRfSource::new();
    src.on().unwrap();
    let probe = src.probe();
    let rf = SharedInstrument::new(src);

    let controller = ClosedLoopController::new(ControllerParams {
        bounds: rf.amplitude_bounds().unwrap(),
        target_bounds: Bounds::new(-40.0, 20.0).unwrap(),
        tolerance: 0.1,
        max_iterations: 40,
        samples: 5,
        settle: Duration::from_millis(300),
        schedule: GainSchedule::new(vec![(1.0, 0.08), (0.3, 0.02), (0.0, 0.004)]).unwrap(),
        guess: GuessModel::new(vec![(-40.0, 0.001), (-20.0, 0.01), (0.0, 0.1), (20.0, 1.2)])
            .unwrap(),
    })
    .unwrap()
    .with_clock(Arc::new(clock.clone()));
    let setter = ClosedLoopSetter::new(
        controller,
        rf.amplitude_setter(),
        SimulatedAnalyzer::new(probe.clone()),
    );
    let log = setter.log();
    let targets = setter.target_bounds();

    let registry = ParameterRegistry::builder()
        .register(BoundedSetter::instrument(
            "tickle_amplitude",
            targets,
            -10.0,
            setter,
        ))
        .build()
        .unwrap();
    let mut scan = ScanRunner::builder()
        .runner(SimulatedSequence::new(SequenceSimCfg::default()).with_rf(probe.clone()))
        .registry(registry)
        .with_clock(Arc::new(clock))
        .build()
        .unwrap();

    let out = scan
        .run(&ScanSpec::new("tickle_amplitude", -20.0, 0.0, 3).unwrap())
        .unwrap();

    assert_eq!(out.records.len(), 3);
    let log = log.borrow();
    let driven: Vec<f64> = log.iter().map(|c| c.target).collect();
    assert_eq!(driven, vec![-20.0, -10.0, 0.0, -10.0]);
    assert!(log.iter().all(|c| c.converged));
    assert!(probe.amplitude() > 0.05 && probe.amplitude() < 0.2);
}
