//! One physical RF source behind several setters.
//!
//! Frequency and amplitude setters of the same generator share a single
//! connection. Each call takes exclusive access for the duration of one round
//! trip; a re-entrant call fails instead of interleaving.

use std::cell::RefCell;
use std::rc::Rc;

use labscan_traits::{Actuator, BoxError, InstrumentLimits, RfSource};

use crate::error::ScanError;
use crate::registry::Bounds;

pub struct SharedInstrument<R> {
    inner: Rc<RefCell<R>>,
}

impl<R> Clone for SharedInstrument<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<R: RfSource + 'static> SharedInstrument<R> {
    pub fn new(source: R) -> Self {
        Self {
            inner: Rc::new(RefCell::new(source)),
        }
    }

    /// Run `f` with exclusive access to the device.
    pub fn with<T>(&self, f: impl FnOnce(&mut R) -> Result<T, BoxError>) -> Result<T, BoxError> {
        let mut dev = self
            .inner
            .try_borrow_mut()
            .map_err(|_| Box::new(ScanError::State("instrument busy".into())) as BoxError)?;
        f(&mut dev)
    }

    pub fn limits(&self) -> Result<InstrumentLimits, BoxError> {
        self.with(|d| Ok(d.limits()))
    }

    pub fn frequency_bounds(&self) -> Option<Bounds> {
        let l = self.limits().ok()?;
        Bounds::new(l.frequency_min_hz, l.frequency_max_hz)
    }

    pub fn amplitude_bounds(&self) -> Option<Bounds> {
        let l = self.limits().ok()?;
        Bounds::new(l.amplitude_min, l.amplitude_max)
    }

    pub fn frequency_setter(&self) -> impl Actuator + 'static {
        let dev = self.clone();
        move |hz: f64| dev.with(|d| d.set_frequency(hz))
    }

    pub fn amplitude_setter(&self) -> impl Actuator + 'static {
        let dev = self.clone();
        move |v: f64| dev.with(|d| d.set_amplitude(v))
    }
}
