#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and calibration-table parsing for a scan run.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The closed-loop initial-guess table can come from the TOML or from a CSV
//!   file with strict headers; either way it must be strictly increasing in target.
use serde::Deserialize;
use serde::de::Deserializer;

/// Largest histogram a scan step may build, as `span / bin_width`.
pub const MAX_HISTOGRAM_BINS: usize = 1_000_000;

/// Initial-guess CSV schema.
///
/// Expected headers:
/// target,setpoint
///
/// Example:
/// target,setpoint
/// -30.0,0.01
/// 0.0,0.3
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct GuessRow {
    pub target: f64,
    pub setpoint: f64,
}

/// What to do when a step fails for good.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Record the index as failed and move on.
    #[default]
    Skip,
    /// Stop the scan and surface the failure.
    Abort,
}

#[derive(Debug, Deserialize)]
pub struct ScanCfg {
    pub parameter: String,
    pub min: f64,
    pub max: f64,
    pub steps: u32,
    /// Detection sequences run per scan step; their events are pooled.
    #[serde(default = "default_repeats")]
    pub repeats_per_step: u32,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// Poll interval while the scheduler holds the scan paused (ms)
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,
}

fn default_repeats() -> u32 {
    1
}

fn default_pause_poll_ms() -> u64 {
    200
}

#[derive(Debug, Deserialize)]
pub struct SequenceCfg {
    pub load_time_us: f64,
    pub wait_time_us: f64,
    pub pulse_length_us: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HistogramCfg {
    pub bin_width_us: f64,
    /// Added after the last timing anchor to get the histogram span
    pub margin_us: f64,
    /// Recompute the display histogram every this many events (0 disables)
    pub refresh_events: usize,
}

impl Default for HistogramCfg {
    fn default() -> Self {
        Self {
            bin_width_us: 0.5,
            margin_us: 100.0,
            refresh_events: 0,
        }
    }
}

/// Which end the "lost" window takes.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LostEnd {
    /// Whichever of pulse end and cutoff comes first
    #[default]
    Narrower,
    PulseEnd,
    Cutoff,
}

/// Region-of-interest windows, relative to the sequence timing anchors (µs).
/// These are tuned to the physical setup and kept out of the extraction logic.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RoiCfg {
    pub loading_start_us: f64,
    /// Loading ends at `load_time + loading_end_offset_us`
    pub loading_end_offset_us: f64,
    /// Trapped window is `[load + wait - before, load + wait + after)`
    pub trapped_before_us: f64,
    pub trapped_after_us: f64,
    /// Lost window starts at `load_time + lost_start_offset_us`
    pub lost_start_offset_us: f64,
    /// Fixed cutoff after `load_time` for the lost window
    pub lost_cutoff_us: f64,
    pub lost_end: LostEnd,
}

impl Default for RoiCfg {
    fn default() -> Self {
        Self {
            loading_start_us: 0.0,
            loading_end_offset_us: 0.0,
            trapped_before_us: 1.0,
            trapped_after_us: 1.0,
            lost_start_offset_us: 0.0,
            lost_cutoff_us: 5.0,
            lost_end: LostEnd::Narrower,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControllerCfg {
    /// Converged once |target - measured| <= tolerance
    pub tolerance: f64,
    pub max_iterations: u32,
    /// Readings per iteration; highest and lowest are discarded
    pub samples: usize,
    /// Wait after each setpoint write before measuring (ms)
    pub settle_ms: u64,
    pub setpoint_min: f64,
    pub setpoint_max: f64,
    /// Bounds on the quantity being driven (what a scan may ask for)
    pub target_min: f64,
    pub target_max: f64,
    /// Gain table. Accepts either:
    /// - array of tables: [{ threshold = 1.0, gain = 0.1 }, ...]
    /// - array of tuples: [[1.0, 0.1], [0.0, 0.01], ...]
    #[serde(deserialize_with = "de_gain_schedule")]
    pub gain_schedule: Vec<(f64, f64)>,
    /// Piecewise-linear target -> setpoint model used for the first guess.
    /// Same two accepted shapes as `gain_schedule` ({ target, setpoint }).
    #[serde(deserialize_with = "de_guess_table")]
    pub initial_guess: Vec<(f64, f64)>,
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            tolerance: 0.1,
            max_iterations: 10,
            samples: 5,
            settle_ms: 300,
            setpoint_min: 0.001,
            setpoint_max: 5.0,
            target_min: -40.0,
            target_max: 20.0,
            gain_schedule: vec![(1.0, 0.08), (0.3, 0.02), (0.0, 0.004)],
            initial_guess: vec![(-40.0, 0.001), (-20.0, 0.01), (0.0, 0.1), (20.0, 1.2)],
        }
    }
}

/// Known failure classes the recovery layer can repair.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureClassCfg {
    ReferenceUnlock,
    SequenceFault,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignatureCfg {
    pub class: FailureClassCfg,
    /// Substring the runtime prints when this failure happens
    pub marker: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RelockCfg {
    /// Last known lock point; updated after every successful relock
    pub center: f64,
    pub coarse_span: f64,
    pub coarse_points: usize,
    pub fine_span: f64,
    pub fine_points: usize,
    pub settle_ms: u64,
    pub min: f64,
    pub max: f64,
}

impl Default for RelockCfg {
    fn default() -> Self {
        Self {
            center: 0.0,
            coarse_span: 10.0,
            coarse_points: 21,
            fine_span: 1.0,
            fine_points: 11,
            settle_ms: 50,
            min: -50.0,
            max: 50.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecoveryCfg {
    /// Re-issues allowed per step after the first attempt
    pub max_retries: u32,
    pub signatures: Vec<SignatureCfg>,
    pub relock: Option<RelockCfg>,
}

impl Default for RecoveryCfg {
    fn default() -> Self {
        Self {
            max_retries: 2,
            signatures: Vec::new(),
            relock: None,
        }
    }
}

/// Pre-scan configured values of the RF tickle, restored after a scan.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RfCfg {
    pub frequency_hz: f64,
    /// Target output level at the analyzer (dBm)
    pub amplitude_dbm: f64,
}

impl Default for RfCfg {
    fn default() -> Self {
        Self {
            frequency_hz: 1.0e6,
            amplitude_dbm: -10.0,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub scan: ScanCfg,
    pub sequence: SequenceCfg,
    #[serde(default)]
    pub histogram: HistogramCfg,
    #[serde(default)]
    pub roi: RoiCfg,
    #[serde(default)]
    pub controller: ControllerCfg,
    #[serde(default)]
    pub recovery: RecoveryCfg,
    #[serde(default)]
    pub rf: RfCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GainToml {
    Tuple((f64, f64)),
    Table { threshold: f64, gain: f64 },
}

fn de_gain_schedule<'de, D>(deserializer: D) -> Result<Vec<(f64, f64)>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<Vec<GainToml>> = Option::deserialize(deserializer)?;
    let mut out = Vec::new();
    if let Some(items) = opt {
        for g in items {
            match g {
                GainToml::Tuple((thr, gain)) => out.push((thr, gain)),
                GainToml::Table { threshold, gain } => out.push((threshold, gain)),
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GuessToml {
    Tuple((f64, f64)),
    Table { target: f64, setpoint: f64 },
}

fn de_guess_table<'de, D>(deserializer: D) -> Result<Vec<(f64, f64)>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<Vec<GuessToml>> = Option::deserialize(deserializer)?;
    let mut out = Vec::new();
    if let Some(items) = opt {
        for g in items {
            match g {
                GuessToml::Tuple((t, s)) => out.push((t, s)),
                GuessToml::Table { target, setpoint } => out.push((target, setpoint)),
            }
        }
    }
    Ok(out)
}

/// Check an initial-guess table: at least two finite points, strictly increasing target.
pub fn check_guess_table(points: &[(f64, f64)]) -> eyre::Result<()> {
    if points.len() < 2 {
        eyre::bail!(
            "initial guess table requires at least two points, got {}",
            points.len()
        );
    }
    for (i, (t, s)) in points.iter().enumerate() {
        if !t.is_finite() || !s.is_finite() {
            eyre::bail!("initial guess point {i} is not finite");
        }
    }
    for i in 1..points.len() {
        if points[i].0 <= points[i - 1].0 {
            eyre::bail!(
                "initial guess targets must be strictly increasing (index {} and {})",
                i - 1,
                i
            );
        }
    }
    Ok(())
}

impl TryFrom<Vec<GuessRow>> for GuessTable {
    type Error = eyre::Report;
    fn try_from(rows: Vec<GuessRow>) -> Result<Self, Self::Error> {
        let points: Vec<(f64, f64)> = rows.iter().map(|r| (r.target, r.setpoint)).collect();
        check_guess_table(&points)?;
        Ok(GuessTable { points })
    }
}

/// A validated initial-guess table.
#[derive(Debug, Clone, PartialEq)]
pub struct GuessTable {
    pub points: Vec<(f64, f64)>,
}

pub fn load_guess_csv(path: &std::path::Path) -> eyre::Result<GuessTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open guess CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["target", "setpoint"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "guess CSV must have headers 'target,setpoint', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<GuessRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    GuessTable::try_from(rows)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Scan
        if self.scan.parameter.trim().is_empty() {
            eyre::bail!("scan.parameter must not be empty");
        }
        if !self.scan.min.is_finite() || !self.scan.max.is_finite() {
            eyre::bail!("scan.min and scan.max must be finite");
        }
        if self.scan.steps == 0 {
            eyre::bail!("scan.steps must be >= 1");
        }
        if self.scan.repeats_per_step == 0 {
            eyre::bail!("scan.repeats_per_step must be >= 1");
        }
        if self.scan.pause_poll_ms == 0 {
            eyre::bail!("scan.pause_poll_ms must be >= 1");
        }

        // Sequence
        for (name, v) in [
            ("sequence.load_time_us", self.sequence.load_time_us),
            ("sequence.wait_time_us", self.sequence.wait_time_us),
            ("sequence.pulse_length_us", self.sequence.pulse_length_us),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                eyre::bail!("{name} must be >= 0");
            }
        }

        // Histogram
        if !(self.histogram.bin_width_us.is_finite() && self.histogram.bin_width_us > 0.0) {
            eyre::bail!("histogram.bin_width_us must be > 0");
        }
        if !(self.histogram.margin_us.is_finite() && self.histogram.margin_us >= 0.0) {
            eyre::bail!("histogram.margin_us must be >= 0");
        }
        let s = &self.sequence;
        let span = (s.load_time_us + s.wait_time_us).max(s.load_time_us + s.pulse_length_us)
            + self.histogram.margin_us;
        #[allow(clippy::cast_precision_loss)]
        let max_bins = MAX_HISTOGRAM_BINS as f64;
        if span / self.histogram.bin_width_us > max_bins {
            eyre::bail!(
                "histogram.bin_width_us too small: {span} us span would need more than {MAX_HISTOGRAM_BINS} bins"
            );
        }

        // ROI
        for (name, v) in [
            ("roi.trapped_before_us", self.roi.trapped_before_us),
            ("roi.trapped_after_us", self.roi.trapped_after_us),
            ("roi.lost_cutoff_us", self.roi.lost_cutoff_us),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                eyre::bail!("{name} must be >= 0");
            }
        }
        for (name, v) in [
            ("roi.loading_start_us", self.roi.loading_start_us),
            ("roi.loading_end_offset_us", self.roi.loading_end_offset_us),
            ("roi.lost_start_offset_us", self.roi.lost_start_offset_us),
        ] {
            if !v.is_finite() {
                eyre::bail!("{name} must be finite");
            }
        }

        // Controller
        let c = &self.controller;
        if !(c.tolerance.is_finite() && c.tolerance > 0.0) {
            eyre::bail!("controller.tolerance must be > 0");
        }
        if c.max_iterations == 0 {
            eyre::bail!("controller.max_iterations must be >= 1");
        }
        if c.samples < 3 {
            eyre::bail!("controller.samples must be >= 3");
        }
        if c.settle_ms > 60 * 1000 {
            eyre::bail!("controller.settle_ms is unreasonably large (>60s)");
        }
        if c.setpoint_min >= c.setpoint_max {
            eyre::bail!("controller.setpoint_min must be < controller.setpoint_max");
        }
        if c.target_min >= c.target_max {
            eyre::bail!("controller.target_min must be < controller.target_max");
        }
        if c.gain_schedule.is_empty() {
            eyre::bail!("controller.gain_schedule must not be empty");
        }
        if c.gain_schedule.iter().any(|(thr, g)| *thr < 0.0 || *g <= 0.0) {
            eyre::bail!("controller.gain_schedule needs thresholds >= 0 and gains > 0");
        }
        check_guess_table(&c.initial_guess)?;

        // Recovery
        if self.recovery.max_retries > 10 {
            eyre::bail!("recovery.max_retries is unreasonably large (>10)");
        }
        if self.recovery.signatures.iter().any(|s| s.marker.is_empty()) {
            eyre::bail!("recovery.signatures markers must not be empty");
        }
        if let Some(relock) = &self.recovery.relock {
            if relock.coarse_points < 2 || relock.fine_points < 2 {
                eyre::bail!("recovery.relock needs at least 2 coarse and 2 fine points");
            }
            if relock.min >= relock.max {
                eyre::bail!("recovery.relock.min must be < recovery.relock.max");
            }
            if relock.coarse_span <= 0.0 || relock.fine_span <= 0.0 {
                eyre::bail!("recovery.relock spans must be > 0");
            }
        }

        Ok(())
    }
}
