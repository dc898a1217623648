//! Collaborator contracts consumed by the scan-and-calibration core.
//!
//! Everything behind these traits is owned by something else: the timed-sequence
//! runtime, the instruments on the network, the experiment scheduler. Implementations
//! are blocking and single-threaded; errors cross the boundary boxed.

pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Error type at every collaborator boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Timing anchors of one detection sequence, in microseconds from sequence start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceParams {
    /// Duration of the loading phase.
    pub load_time_us: f64,
    /// Hold time between the end of loading and extraction.
    pub wait_time_us: f64,
    /// Length of the tickle pulse applied after loading.
    pub pulse_length_us: f64,
}

impl Default for SequenceParams {
    fn default() -> Self {
        Self {
            load_time_us: 2.0,
            wait_time_us: 48.0,
            pulse_length_us: 10.0,
        }
    }
}

/// Raw output of one run of the detection sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceOutput {
    /// Detected event times in microseconds, in arrival order.
    pub timestamps: Vec<f64>,
    /// Whatever the runtime printed on its diagnostic stream.
    pub diagnostics: String,
}

/// A single-valued instrument setpoint: write one number, get one instrument state.
///
/// Implementations must be idempotent: applying the same value twice leaves the
/// instrument in the same state.
pub trait Actuator {
    fn apply(&mut self, value: f64) -> Result<(), BoxError>;
}

impl<F> Actuator for F
where
    F: FnMut(f64) -> Result<(), BoxError>,
{
    fn apply(&mut self, value: f64) -> Result<(), BoxError> {
        self(value)
    }
}

/// The real-time runtime that executes a timed detection sequence.
pub trait SequenceRunner {
    fn run_detection_sequence(
        &mut self,
        params: &SequenceParams,
    ) -> Result<SequenceOutput, BoxError>;
}

/// One spectrum/amplitude reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub frequency_hz: f64,
    pub amplitude: f64,
}

/// Spectrum analyzer or any other amplitude reader. Repeated calls may be noisy.
pub trait Analyzer {
    fn measure(&mut self) -> Result<Reading, BoxError>;
}

/// Instrument-declared setpoint limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstrumentLimits {
    pub frequency_min_hz: f64,
    pub frequency_max_hz: f64,
    pub amplitude_min: f64,
    pub amplitude_max: f64,
}

/// Networked RF source (function generator). Every call is a blocking round trip.
pub trait RfSource {
    fn set_frequency(&mut self, hz: f64) -> Result<(), BoxError>;
    fn set_amplitude(&mut self, amplitude: f64) -> Result<(), BoxError>;
    fn on(&mut self) -> Result<(), BoxError>;
    fn off(&mut self) -> Result<(), BoxError>;
    fn close(&mut self) -> Result<(), BoxError>;
    fn limits(&self) -> InstrumentLimits;
}

/// Experiment scheduler polled before every scan step.
pub trait Scheduler {
    fn pause_requested(&self) -> bool;

    /// Stop the scan before its next step.
    fn cancel_requested(&self) -> bool {
        false
    }
}
