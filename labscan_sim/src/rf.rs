use std::cell::Cell;
use std::rc::Rc;

use labscan_traits::{Analyzer, BoxError, InstrumentLimits, Reading, RfSource};

use crate::error::SimError;
use crate::util::Jitter;

/// Read-only view of what a simulated RF source is currently emitting.
#[derive(Debug, Clone, Default)]
pub struct RfProbe {
    frequency_hz: Rc<Cell<f64>>,
    amplitude: Rc<Cell<f64>>,
    output_on: Rc<Cell<bool>>,
}

impl RfProbe {
    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz.get()
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude.get()
    }

    pub fn output_on(&self) -> bool {
        self.output_on.get()
    }
}

/// Simulated function generator. Amplitude is in volts peak.
pub struct SimulatedRfSource {
    probe: RfProbe,
    limits: InstrumentLimits,
    closed: bool,
    calls: u64,
}

impl Default for SimulatedRfSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRfSource {
    pub fn new() -> Self {
        Self::with_limits(InstrumentLimits {
            frequency_min_hz: 1.0e3,
            frequency_max_hz: 50.0e6,
            amplitude_min: 0.001,
            amplitude_max: 5.0,
        })
    }

    pub fn with_limits(limits: InstrumentLimits) -> Self {
        Self {
            probe: RfProbe::default(),
            limits,
            closed: false,
            calls: 0,
        }
    }

    pub fn probe(&self) -> RfProbe {
        self.probe.clone()
    }

    /// Number of round trips issued so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn round_trip(&mut self) -> Result<(), SimError> {
        if self.closed {
            return Err(SimError::Closed);
        }
        self.calls += 1;
        Ok(())
    }
}

impl RfSource for SimulatedRfSource {
    fn set_frequency(&mut self, hz: f64) -> Result<(), BoxError> {
        self.round_trip()?;
        if !(self.limits.frequency_min_hz..=self.limits.frequency_max_hz).contains(&hz) {
            return Err(Box::new(SimError::OutOfRange {
                what: "frequency",
                value: hz,
            }));
        }
        tracing::trace!(hz, "rf frequency (simulated)");
        self.probe.frequency_hz.set(hz);
        Ok(())
    }

    fn set_amplitude(&mut self, amplitude: f64) -> Result<(), BoxError> {
        self.round_trip()?;
        if !(self.limits.amplitude_min..=self.limits.amplitude_max).contains(&amplitude) {
            return Err(Box::new(SimError::OutOfRange {
                what: "amplitude",
                value: amplitude,
            }));
        }
        tracing::trace!(amplitude, "rf amplitude (simulated)");
        self.probe.amplitude.set(amplitude);
        Ok(())
    }

    fn on(&mut self) -> Result<(), BoxError> {
        self.round_trip()?;
        self.probe.output_on.set(true);
        Ok(())
    }

    fn off(&mut self) -> Result<(), BoxError> {
        self.round_trip()?;
        self.probe.output_on.set(false);
        Ok(())
    }

    fn close(&mut self) -> Result<(), BoxError> {
        self.probe.output_on.set(false);
        self.closed = true;
        Ok(())
    }

    fn limits(&self) -> InstrumentLimits {
        self.limits
    }
}

/// Spectrum analyzer looking at the output of a simulated RF chain.
///
/// The chain compresses at high drive and drifts slowly with every read, so the
/// setpoint-to-dBm mapping is neither linear nor stable.
pub struct SimulatedAnalyzer {
    probe: RfProbe,
    chain_gain_db: f64,
    compression_v: f64,
    noise_db: f64,
    drift_db_per_read: f64,
    spike_every: Option<u64>,
    noise_floor_dbm: f64,
    reads: u64,
    jitter: Jitter,
}

impl SimulatedAnalyzer {
    pub fn new(probe: RfProbe) -> Self {
        Self {
            probe,
            chain_gain_db: 10.0,
            compression_v: 8.0,
            noise_db: 0.02,
            drift_db_per_read: 0.0,
            spike_every: None,
            noise_floor_dbm: -90.0,
            reads: 0,
            jitter: Jitter::new(7),
        }
    }

    pub fn with_noise_db(mut self, noise_db: f64) -> Self {
        self.noise_db = noise_db.abs();
        self
    }

    pub fn with_drift_db_per_read(mut self, drift: f64) -> Self {
        self.drift_db_per_read = drift;
        self
    }

    /// Add a +20 dB glitch on every n-th read.
    pub fn with_spike_every(mut self, n: u64) -> Self {
        self.spike_every = (n > 0).then_some(n);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.jitter = Jitter::new(seed);
        self
    }

    /// Noise-free chain response for a drive amplitude in volts.
    pub fn response_dbm(&self, drive_v: f64) -> f64 {
        if drive_v <= 0.0 {
            return self.noise_floor_dbm;
        }
        let effective = drive_v / (1.0 + drive_v / self.compression_v);
        (20.0 * effective.log10() + self.chain_gain_db).max(self.noise_floor_dbm)
    }
}

impl Analyzer for SimulatedAnalyzer {
    fn measure(&mut self) -> Result<Reading, BoxError> {
        self.reads += 1;
        let mut dbm = if self.probe.output_on() {
            self.response_dbm(self.probe.amplitude())
        } else {
            self.noise_floor_dbm
        };
        dbm += self.drift_db_per_read * self.reads as f64;
        dbm += self.jitter.symmetric(self.noise_db);
        if self.spike_every.is_some_and(|n| self.reads % n == 0) {
            dbm += 20.0;
        }
        Ok(Reading {
            frequency_hz: self.probe.frequency_hz(),
            amplitude: dbm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_frequency_outside_limits() {
        let mut rf = SimulatedRfSource::new();
        let err = rf.set_frequency(1.0).expect_err("below range");
        assert!(err.to_string().contains("frequency"));
        assert_eq!(rf.probe().frequency_hz(), 0.0);
    }

    #[test]
    fn analyzer_follows_drive_monotonically() {
        let mut rf = SimulatedRfSource::new();
        let mut an = SimulatedAnalyzer::new(rf.probe()).with_noise_db(0.0);
        rf.on().unwrap();
        rf.set_amplitude(0.1).unwrap();
        let low = an.measure().unwrap().amplitude;
        rf.set_amplitude(1.0).unwrap();
        let high = an.measure().unwrap().amplitude;
        assert!(high > low);
    }

    #[test]
    fn closed_source_refuses_commands() {
        let mut rf = SimulatedRfSource::new();
        rf.close().unwrap();
        assert!(rf.set_amplitude(0.5).is_err());
        assert!(!rf.probe().output_on());
    }
}
