//! `labscan` host binary: loads a config, wires the simulated bench and runs or checks a scan.

mod cli;
mod error_fmt;
mod scan;

use std::path::Path;
use std::sync::atomic::Ordering;

use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = run(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn run(cli: Cli) -> eyre::Result<()> {
    let _ = color_eyre::install();

    let text = std::fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("read config {}", cli.config.display()))?;
    let mut cfg = labscan_config::load_toml(&text)
        .wrap_err_with(|| format!("parse config {}", cli.config.display()))?;

    init_tracing(&cli, &cfg.logging)?;

    let guess = cli
        .calibration
        .as_deref()
        .map(labscan_config::load_guess_csv)
        .transpose()?;

    match cli.cmd {
        Commands::Scan { overrides, faults } => {
            overrides.apply(&mut cfg.scan);
            cfg.validate()?;

            let scheduler = labscan_sim::FlagScheduler::new();
            let cancel = scheduler.cancel_flag();
            ctrlc::set_handler(move || {
                cancel.store(true, Ordering::Relaxed);
            })
            .wrap_err("install Ctrl-C handler")?;

            let bench = scan::Bench::new(&cfg, guess.as_ref(), &faults)?;
            let outcome = scan::run_scan(&cfg, bench, scheduler, std::io::stdout())?;
            if let labscan_core::ScanStatus::Cancelled { next_index } = outcome.status {
                tracing::warn!(next_index, "scan cancelled");
            }
        }
        Commands::Check { overrides } => {
            overrides.apply(&mut cfg.scan);
            cfg.validate()?;
            let report = scan::check(&cfg, guess.as_ref())?;
            if cli.json {
                let obj = serde_json::json!({
                    "parameter": report.parameter,
                    "bounds": [report.bounds.lo(), report.bounds.hi()],
                    "values": report.values,
                    "registered": report.registered,
                });
                println!("{obj}");
            } else {
                println!(
                    "{} in [{}, {}]: {} values",
                    report.parameter,
                    report.bounds.lo(),
                    report.bounds.hi(),
                    report.values.len()
                );
                for v in &report.values {
                    println!("  {v}");
                }
                println!("registered: {}", report.registered.join(", "));
            }
        }
    }
    Ok(())
}

/// Console output on stderr (stdout carries the records), plus an optional JSON log file.
///
/// `RUST_LOG` wins over `--log-level` on the console; the file uses `[logging].level`.
fn init_tracing(cli: &Cli, logging: &labscan_config::Logging) -> eyre::Result<()> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if cli.json {
        layers.push(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    }

    if let Some(file) = &logging.file {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let file_level = logging.level.as_deref().unwrap_or("info");
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new(file_level))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .wrap_err("initialize logging")?;
    Ok(())
}
