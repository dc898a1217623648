//! Human-readable error descriptions and structured JSON error formatting.

use labscan_core::{BuildError, ScanError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::UnknownParameter(name) => format!(
                "What happened: '{name}' is not a registered parameter.\nLikely causes: Typo in scan.parameter or --parameter.\nHow to fix: Run `labscan check` to list the registered parameters."
            ),
            BuildError::OutOfBounds { parameter, value, lo, hi } => format!(
                "What happened: The scan would set {parameter} to {value}, outside its bounds [{lo}, {hi}].\nLikely causes: scan.min/scan.max exceed what the instrument or loop allows.\nHow to fix: Narrow the scan range; nothing was applied to the instruments."
            ),
            BuildError::MissingRepair(class) => format!(
                "What happened: The signature for {class} has no repair procedure.\nLikely causes: A [[recovery.signatures]] entry without the matching repair section.\nHow to fix: Add [recovery.relock] for reference_unlock, or remove the signature."
            ),
            BuildError::InvalidScan(msg) => format!(
                "What happened: Invalid scan ({msg}).\nLikely causes: steps = 0 or a non-finite range.\nHow to fix: Edit [scan] in the config or the command-line overrides."
            ),
            other => format!(
                "What happened: Invalid configuration ({other}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `labscan check`."
            ),
        };
    }

    if let Some(se) = err.downcast_ref::<ScanError>() {
        return match se {
            ScanError::Aborted { index, reason } => format!(
                "What happened: Scan aborted at step {index} ({reason}).\nLikely causes: A step kept failing and scan.on_failure = \"abort\".\nHow to fix: Check the recovery settings, or use --on-failure skip to record the step and continue. Records collected so far were written."
            ),
            ScanError::RetriesExhausted { class, attempts, .. } => format!(
                "What happened: {class} persisted after {attempts} attempts.\nLikely causes: The repair did not clear the fault.\nHow to fix: Raise recovery.max_retries or widen the relock sweep."
            ),
            ScanError::Timeout => "What happened: An instrument did not answer in time.\nLikely causes: Instrument off, disconnected, or busy.\nHow to fix: Check connections and rerun.".to_string(),
            // Fallback to generic for other domain errors
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("guess csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'target,setpoint'.".to_string();
    }

    if lower.contains("read config") || lower.contains("parse config") {
        return format!(
            "What happened: Could not load the configuration.\nLikely causes: Wrong --config path or invalid TOML.\nHow to fix: Check the file. Details: {}",
            err.root_cause()
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 2 for configuration errors, 3 for aborts, 4 for timeouts, 1 otherwise.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return 2;
    }
    match err.downcast_ref::<ScanError>() {
        Some(ScanError::Aborted { .. }) => 3,
        Some(ScanError::Timeout) => 4,
        _ => 1,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<BuildError>().is_some() {
        return "Config";
    }
    match err.downcast_ref::<ScanError>() {
        Some(ScanError::Aborted { .. }) => "Aborted",
        Some(ScanError::Timeout) => "Timeout",
        Some(_) => "Scan",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let msg = humanize(err);
    match err.downcast_ref::<ScanError>() {
        Some(ScanError::Aborted { index, .. }) => {
            json!({ "reason": reason_name(err), "details": { "index": index }, "message": msg })
        }
        _ => json!({ "reason": reason_name(err), "message": msg }),
    }
    .to_string()
}
