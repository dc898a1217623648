use labscan_config::{FailureClassCfg, FailurePolicy, LostEnd, load_toml};
use rstest::rstest;

const BASE: &str = r#"
[scan]
parameter = "tickle_frequency"
min = 1.0e6
max = 2.0e6
steps = 11

[sequence]
load_time_us = 2.0
wait_time_us = 48.0
pulse_length_us = 10.0
"#;

fn with(extra: &str) -> String {
    format!("{BASE}\n{extra}")
}

#[test]
fn minimal_config_takes_defaults() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("minimal config is valid");
    assert_eq!(cfg.scan.repeats_per_step, 1);
    assert_eq!(cfg.scan.on_failure, FailurePolicy::Skip);
    assert_eq!(cfg.roi.lost_end, LostEnd::Narrower);
    assert_eq!(cfg.recovery.max_retries, 2);
    assert!(cfg.recovery.relock.is_none());
    assert!(cfg.controller.samples >= 3);
}

#[test]
fn gain_schedule_accepts_tuples_and_tables() {
    let toml = with(
        r#"
[controller]
gain_schedule = [[1.0, 0.1], { threshold = 0.0, gain = 0.01 }]
initial_guess = [{ target = -20.0, setpoint = 0.01 }, [0.0, 0.1]]
"#,
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    assert_eq!(cfg.controller.gain_schedule, vec![(1.0, 0.1), (0.0, 0.01)]);
    assert_eq!(cfg.controller.initial_guess, vec![(-20.0, 0.01), (0.0, 0.1)]);
    cfg.validate().expect("valid");
}

#[test]
fn recovery_signatures_parse() {
    let toml = with(
        r#"
[recovery]
max_retries = 1

[[recovery.signatures]]
class = "reference_unlock"
marker = "REFERENCE UNLOCKED"

[recovery.relock]
center = 3.0
coarse_span = 8.0
coarse_points = 9
fine_span = 1.0
fine_points = 5
"#,
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    cfg.validate().expect("valid");
    assert_eq!(cfg.recovery.signatures.len(), 1);
    assert_eq!(
        cfg.recovery.signatures[0].class,
        FailureClassCfg::ReferenceUnlock
    );
    let relock = cfg.recovery.relock.expect("relock section");
    assert_eq!(relock.center, 3.0);
    assert_eq!(relock.settle_ms, 50);
}

#[test]
fn on_failure_abort_parses() {
    let toml = BASE.replace("steps = 11", "steps = 11\non_failure = \"abort\"");
    let cfg = load_toml(&toml).expect("parse TOML");
    assert_eq!(cfg.scan.on_failure, FailurePolicy::Abort);
}

#[test]
fn unknown_failure_class_is_a_parse_error() {
    let toml = with(
        r#"
[[recovery.signatures]]
class = "cosmic_ray"
marker = "x"
"#,
    );
    assert!(load_toml(&toml).is_err());
}

#[rstest]
#[case("steps = 11", "steps = 0", "scan.steps must be >= 1")]
#[case("steps = 11", "steps = 11\nrepeats_per_step = 0", "scan.repeats_per_step must be >= 1")]
#[case("load_time_us = 2.0", "load_time_us = -1.0", "sequence.load_time_us must be >= 0")]
#[case("parameter = \"tickle_frequency\"", "parameter = \" \"", "scan.parameter must not be empty")]
fn rejects_bad_scan_and_sequence(#[case] from: &str, #[case] to: &str, #[case] needle: &str) {
    let cfg = load_toml(&BASE.replace(from, to)).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(
        format!("{err}").contains(needle),
        "expected '{needle}' in '{err}'"
    );
}

#[rstest]
#[case("[histogram]\nbin_width_us = 0.0", "histogram.bin_width_us must be > 0")]
#[case("[controller]\nsamples = 2", "controller.samples must be >= 3")]
#[case("[controller]\ntolerance = 0.0", "controller.tolerance must be > 0")]
#[case("[controller]\nsetpoint_min = 2.0\nsetpoint_max = 1.0", "controller.setpoint_min must be < controller.setpoint_max")]
#[case("[controller]\ngain_schedule = []", "controller.gain_schedule must not be empty")]
#[case("[controller]\ninitial_guess = [[0.0, 0.1]]", "at least two points")]
#[case("[recovery]\nmax_retries = 99", "recovery.max_retries is unreasonably large")]
#[case("[recovery.relock]\ncoarse_points = 1", "at least 2 coarse and 2 fine points")]
#[case("[histogram]\nbin_width_us = 1e-300", "histogram.bin_width_us too small")]
#[case("[histogram]\nbin_width_us = 0.0009\nmargin_us = 950.0", "histogram.bin_width_us too small")]
#[case("[roi]\ntrapped_before_us = nan", "roi.trapped_before_us must be >= 0")]
#[case("[roi]\nlost_cutoff_us = nan", "roi.lost_cutoff_us must be >= 0")]
#[case("[roi]\nloading_end_offset_us = nan", "roi.loading_end_offset_us must be finite")]
#[case("[roi]\nlost_start_offset_us = inf", "roi.lost_start_offset_us must be finite")]
fn rejects_bad_sections(#[case] extra: &str, #[case] needle: &str) {
    let cfg = load_toml(&with(extra)).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(
        format!("{err}").contains(needle),
        "expected '{needle}' in '{err}'"
    );
}

#[test]
fn largest_histogram_is_accepted() {
    // span = max(2 + 48, 2 + 10) + 950 = 1000 us, so one million bins
    let cfg = load_toml(&with("[histogram]\nbin_width_us = 0.001\nmargin_us = 950.0"))
        .expect("parse TOML");
    cfg.validate().expect("one million bins is the limit, not past it");
}

#[rstest]
fn shipped_example_config_is_valid() {
    let cfg = load_toml(include_str!("../../etc/labscan.toml")).unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.controller.gain_schedule.len(), 3);
    assert_eq!(cfg.recovery.signatures.len(), 1);
    assert!(cfg.recovery.relock.is_some());
}
