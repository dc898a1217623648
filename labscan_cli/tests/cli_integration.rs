use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

const BASE: &str = r#"
[scan]
parameter = "tickle_frequency"
min = 1.4e6
max = 1.6e6
steps = 5

[sequence]
load_time_us = 5.0
wait_time_us = 50.0
pulse_length_us = 2.0

[controller]
# keep the amplitude loop from sleeping in tests
settle_ms = 0
"#;

const RECOVERY: &str = r#"
[recovery]
max_retries = 2

[[recovery.signatures]]
class = "reference_unlock"
marker = "REFERENCE UNLOCKED"

[recovery.relock]
settle_ms = 0
"#;

fn write_config(dir: &tempfile::TempDir, extra: &str) -> PathBuf {
    let path = dir.path().join("labscan.toml");
    fs::write(&path, format!("{BASE}{extra}")).unwrap();
    path
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["check"], 0, "tickle_frequency in [", "stdout")]
#[case(&["scan"], 0, "\"index\":4", "stdout")]
#[case(&["scan", "--parameter", "bogus"], 2, "not a registered parameter", "stderr")]
#[case(&["check", "--max", "60e6"], 2, "outside its bounds", "stderr")]
#[case(&["scan", "--steps", "0"], 1, "scan.steps must be >= 1", "stderr")]
#[case(&["scan", "--fault-run", "1,2,3", "--on-failure", "abort"], 3, "Scan aborted at step 0", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, RECOVERY);

    let mut cmd = Command::cargo_bin("labscan_cli").unwrap();

    // Always include a valid config to avoid relying on default path
    cmd.arg("--config").arg(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn cli_reports_bad_calibration_header() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");

    // Write a bad-header CSV
    let bad_csv = dir.path().join("guess.csv");
    let mut f = fs::File::create(&bad_csv).unwrap();
    writeln!(f, "dbm,volts").unwrap();
    writeln!(f, "-20,0.01").unwrap();
    writeln!(f, "0,0.1").unwrap();

    let mut cmd = Command::cargo_bin("labscan_cli").unwrap();
    cmd.arg("--config")
        .arg(&cfg)
        .arg("--calibration")
        .arg(&bad_csv)
        .arg("check");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid headers"));
}

#[rstest]
fn signature_without_repair_is_rejected_before_scanning() {
    let dir = tempdir().unwrap();
    let cfg = write_config(
        &dir,
        r#"
[[recovery.signatures]]
class = "reference_unlock"
marker = "REFERENCE UNLOCKED"
"#,
    );

    let mut cmd = Command::cargo_bin("labscan_cli").unwrap();
    cmd.arg("--config").arg(&cfg).arg("scan");

    cmd.assert()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("has no repair procedure"));
}

#[rstest]
fn missing_config_is_explained() {
    let dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("labscan_cli").unwrap();
    cmd.arg("--config")
        .arg(dir.path().join("nope.toml"))
        .arg("check");

    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("Could not load the configuration"));
}
