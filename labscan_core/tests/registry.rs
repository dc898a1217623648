use labscan_core::error::BuildError;
use labscan_core::mocks::{RecordingActuator, ScriptedRunner};
use labscan_core::{
    BoundedSetter, Bounds, ParameterRegistry, ScanRunner, ScanSpec, SequenceField, VecSink,
};
use proptest::prelude::*;
use rstest::rstest;

fn registry(lo: f64, hi: f64, act: RecordingActuator) -> ParameterRegistry {
    ParameterRegistry::builder()
        .register(BoundedSetter::instrument(
            "tickle_amplitude",
            Bounds::new(lo, hi).unwrap(),
            lo,
            act,
        ))
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn any_value_outside_bounds_fails_validation(
        lo in -100.0f64..0.0,
        width in 1.0f64..100.0,
        inside in proptest::collection::vec(0.0f64..=1.0, 0..20),
        excess in 0.001f64..10.0,
        below in any::<bool>(),
        pos in 0usize..20,
    ) {
        let hi = lo + width;
        let mut values: Vec<f64> = inside.iter().map(|f| lo + f * width).collect();
        prop_assert!(registry(lo, hi, RecordingActuator::new()).validate("tickle_amplitude", &values));

        let bad = if below { lo - excess * width } else { hi + excess * width };
        values.insert(pos.min(values.len()), bad);
        let act = RecordingActuator::new();
        let calls = act.calls();
        let reg = registry(lo, hi, act);
        prop_assert!(!reg.validate("tickle_amplitude", &values));
        prop_assert!(matches!(
            reg.check("tickle_amplitude", &values),
            Err(BuildError::OutOfBounds { .. })
        ), "expected BuildError::OutOfBounds");
        prop_assert!(calls.borrow().is_empty());
    }

    #[test]
    fn scan_reaching_outside_bounds_never_applies(
        lo in -10.0f64..0.0,
        width in 1.0f64..10.0,
        excess in 0.01f64..5.0,
        steps in 2u32..30,
    ) {
        let hi = lo + width;
        let act = RecordingActuator::new();
        let calls = act.calls();
        let runner = ScriptedRunner::constant(vec![1.0]);
        let seen = runner.seen();
        let sink = VecSink::new();
        let mut scan = ScanRunner::builder()
            .runner(runner)
            .registry(registry(lo, hi, act))
            .with_sink(sink.clone())
            .build()
            .unwrap();
        let spec = ScanSpec::new("tickle_amplitude", lo, hi + excess, steps).unwrap();
        let err = scan.run(&spec).unwrap_err();
        let is_out_of_bounds = matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::OutOfBounds { .. })
        );
        prop_assert!(is_out_of_bounds);
        prop_assert!(calls.borrow().is_empty());
        prop_assert!(seen.borrow().is_empty());
        prop_assert!(sink.batches().is_empty());
    }
}

#[rstest]
fn unregistered_parameter_is_a_configuration_error() {
    let act = RecordingActuator::new();
    let calls = act.calls();
    let mut scan = ScanRunner::builder()
        .runner(ScriptedRunner::constant(vec![]))
        .registry(registry(0.0, 1.0, act))
        .build()
        .unwrap();
    let err = scan
        .run(&ScanSpec::new("tickle_phase", 0.0, 1.0, 3).unwrap())
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<BuildError>(),
        Some(&BuildError::UnknownParameter("tickle_phase".into()))
    );
    assert!(calls.borrow().is_empty());
    assert_eq!(scan.state(), labscan_core::ScanState::Idle);
}

#[rstest]
fn registry_lists_names_in_order() {
    let reg = ParameterRegistry::builder()
        .register(BoundedSetter::sequence(
            "wait_time",
            Bounds::new(0.0, 100.0).unwrap(),
            SequenceField::WaitTime,
        ))
        .register(BoundedSetter::sequence(
            "load_time",
            Bounds::new(0.0, 10.0).unwrap(),
            SequenceField::LoadTime,
        ))
        .build()
        .unwrap();
    assert_eq!(reg.names().collect::<Vec<_>>(), ["load_time", "wait_time"]);
    assert_eq!(reg.bounds("load_time"), Bounds::new(0.0, 10.0));
    assert!(reg.bounds("pulse_length").is_none());
}
