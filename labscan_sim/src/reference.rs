use std::cell::Cell;
use std::rc::Rc;

use labscan_traits::{Actuator, Analyzer, BoxError, Reading};

use crate::util::Jitter;

/// Shared state of a simulated frequency reference (e.g. a laser lock offset).
#[derive(Debug, Clone)]
pub struct ReferenceProbe {
    position: Rc<Cell<f64>>,
    optimum: Rc<Cell<f64>>,
    capture: f64,
}

impl ReferenceProbe {
    pub fn position(&self) -> f64 {
        self.position.get()
    }

    pub fn optimum(&self) -> f64 {
        self.optimum.get()
    }

    /// The lock holds while the actuator sits within the capture range.
    pub fn locked(&self) -> bool {
        (self.position.get() - self.optimum.get()).abs() <= self.capture
    }

    /// Move the optimum, as a thermal drift would.
    pub fn drift(&self, delta: f64) {
        self.optimum.set(self.optimum.get() + delta);
    }
}

/// Actuator driving the reference (piezo voltage, offset frequency, ...).
pub struct SimulatedReference {
    probe: ReferenceProbe,
    applied: u64,
}

impl SimulatedReference {
    pub fn new(optimum: f64, capture: f64) -> Self {
        Self {
            probe: ReferenceProbe {
                position: Rc::new(Cell::new(optimum)),
                optimum: Rc::new(Cell::new(optimum)),
                capture: capture.abs(),
            },
            applied: 0,
        }
    }

    pub fn probe(&self) -> ReferenceProbe {
        self.probe.clone()
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }
}

impl Actuator for SimulatedReference {
    fn apply(&mut self, value: f64) -> Result<(), BoxError> {
        self.applied += 1;
        self.probe.position.set(value);
        Ok(())
    }
}

/// Photodiode-style monitor: Lorentzian transmission peak at the optimum.
pub struct LockMonitor {
    probe: ReferenceProbe,
    width: f64,
    noise: f64,
    jitter: Jitter,
}

impl LockMonitor {
    pub fn new(probe: ReferenceProbe, width: f64) -> Self {
        Self {
            probe,
            width: width.abs().max(f64::EPSILON),
            noise: 0.0,
            jitter: Jitter::new(11),
        }
    }

    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.abs();
        self
    }
}

impl Analyzer for LockMonitor {
    fn measure(&mut self) -> Result<Reading, BoxError> {
        let x = (self.probe.position() - self.probe.optimum()) / self.width;
        let amplitude = 1.0 / (1.0 + x * x) + self.jitter.symmetric(self.noise);
        Ok(Reading {
            frequency_hz: self.probe.position(),
            amplitude,
        })
    }
}
