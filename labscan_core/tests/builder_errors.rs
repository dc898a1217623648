use labscan_core::error::BuildError;
use labscan_core::mocks::ScriptedRunner;
use labscan_core::{ParameterRegistry, RunCfg, ScanRunner, SignalPipeline, default_pipeline};
use rstest::rstest;

#[rstest]
fn missing_runner_yields_typed_build_error() {
    let err = ScanRunner::builder()
        .registry(ParameterRegistry::default())
        .try_build()
        .expect_err("should fail with MissingRunner");
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingRunner) => {}
        other => panic!("expected MissingRunner, got: {other:?}"),
    }
}

#[rstest]
fn missing_registry_yields_typed_build_error() {
    let err = ScanRunner::builder()
        .runner(ScriptedRunner::constant(vec![]))
        .try_build()
        .expect_err("should fail with MissingRegistry");
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingRegistry) => {}
        other => panic!("expected MissingRegistry, got: {other:?}"),
    }
}

#[rstest]
fn zero_repeats_rejected() {
    let err = ScanRunner::builder()
        .runner(ScriptedRunner::constant(vec![]))
        .registry(ParameterRegistry::default())
        .with_run_cfg(RunCfg {
            repeats_per_step: 0,
            ..RunCfg::default()
        })
        .build()
        .expect_err("zero repeats");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(_))
    ));
}

#[rstest]
#[case(0.0)]
#[case(-1.0)]
#[case(f64::NAN)]
fn bad_bin_width_rejected(#[case] bin_width_us: f64) {
    let err = ScanRunner::builder()
        .runner(ScriptedRunner::constant(vec![]))
        .registry(ParameterRegistry::default())
        .with_pipeline(SignalPipeline {
            bin_width_us,
            ..default_pipeline()
        })
        .build()
        .expect_err("bad bin width");
    assert!(err.downcast_ref::<BuildError>().is_some());
}
