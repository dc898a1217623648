//! Named setpoint handlers and the closed table that dispatches to them.
//!
//! Every scannable parameter is registered once, up front, as a [`BoundedSetter`]:
//! either a field of the timed sequence or a boxed instrument [`Actuator`].
//! Range checks happen in [`ParameterRegistry::check`] before a scan commits,
//! and again inside [`ParameterRegistry::apply`] so an out-of-range value can
//! never reach hardware.

use std::collections::BTreeMap;

use labscan_traits::{Actuator, SequenceParams};

use crate::error::{BuildError, Result, ScanError};

/// Inclusive validity range for one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    lo: f64,
    hi: f64,
}

impl Bounds {
    /// `lo <= hi`, both finite.
    pub fn new(lo: f64, hi: f64) -> Option<Self> {
        (lo.is_finite() && hi.is_finite() && lo <= hi).then_some(Self { lo, hi })
    }

    pub fn lo(&self) -> f64 {
        self.lo
    }

    pub fn hi(&self) -> f64 {
        self.hi
    }

    /// NaN is never contained.
    #[inline]
    pub fn contains(&self, v: f64) -> bool {
        v >= self.lo && v <= self.hi
    }

    #[inline]
    pub fn clamp(&self, v: f64) -> f64 {
        v.clamp(self.lo, self.hi)
    }
}

/// Timing anchors of the detection sequence that can be scanned directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceField {
    LoadTime,
    WaitTime,
    PulseLength,
}

impl SequenceField {
    pub fn get(self, p: &SequenceParams) -> f64 {
        match self {
            SequenceField::LoadTime => p.load_time_us,
            SequenceField::WaitTime => p.wait_time_us,
            SequenceField::PulseLength => p.pulse_length_us,
        }
    }

    pub fn set(self, p: &mut SequenceParams, v: f64) {
        match self {
            SequenceField::LoadTime => p.load_time_us = v,
            SequenceField::WaitTime => p.wait_time_us = v,
            SequenceField::PulseLength => p.pulse_length_us = v,
        }
    }
}

/// What a setter actually drives.
pub enum Handler {
    /// Rewrites one field of the parameters passed to the sequence runtime.
    Sequence(SequenceField),
    /// Commands an instrument. `configured` is the value restored after a scan.
    Instrument {
        actuator: Box<dyn Actuator>,
        configured: f64,
    },
}

impl core::fmt::Debug for Handler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Handler::Sequence(field) => f.debug_tuple("Sequence").field(field).finish(),
            Handler::Instrument { configured, .. } => f
                .debug_struct("Instrument")
                .field("configured", configured)
                .finish_non_exhaustive(),
        }
    }
}

/// A named setpoint operation with validity bounds.
#[derive(Debug)]
pub struct BoundedSetter {
    name: String,
    bounds: Bounds,
    handler: Handler,
}

impl BoundedSetter {
    pub fn sequence(name: impl Into<String>, bounds: Bounds, field: SequenceField) -> Self {
        Self {
            name: name.into(),
            bounds,
            handler: Handler::Sequence(field),
        }
    }

    pub fn instrument<A>(name: impl Into<String>, bounds: Bounds, configured: f64, actuator: A) -> Self
    where
        A: Actuator + 'static,
    {
        Self {
            name: name.into(),
            bounds,
            handler: Handler::Instrument {
                actuator: Box::new(actuator),
                configured,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    fn apply(&mut self, value: f64, seq: &mut SequenceParams) -> Result<()> {
        if !self.bounds.contains(value) {
            return Err(eyre::Report::new(BuildError::OutOfBounds {
                parameter: self.name.clone(),
                value,
                lo: self.bounds.lo,
                hi: self.bounds.hi,
            }));
        }
        match &mut self.handler {
            Handler::Sequence(field) => {
                field.set(seq, value);
                Ok(())
            }
            Handler::Instrument { actuator, .. } => actuator.apply(value).map_err(|e| {
                eyre::Report::new(ScanError::Setpoint {
                    parameter: self.name.clone(),
                    value,
                    reason: e.to_string(),
                })
            }),
        }
    }

    fn configured_value(&self, seq: &SequenceParams) -> f64 {
        match &self.handler {
            Handler::Sequence(field) => field.get(seq),
            Handler::Instrument { configured, .. } => *configured,
        }
    }
}

/// Closed mapping from parameter name to setter. Keys are unique.
#[derive(Debug, Default)]
pub struct ParameterRegistry {
    setters: BTreeMap<String, BoundedSetter>,
}

/// Collects setters; duplicates are reported by [`RegistryBuilder::build`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: Vec<BoundedSetter>,
}

impl RegistryBuilder {
    pub fn register(mut self, setter: BoundedSetter) -> Self {
        self.entries.push(setter);
        self
    }

    pub fn build(self) -> Result<ParameterRegistry> {
        let mut setters = BTreeMap::new();
        for s in self.entries {
            if setters.contains_key(&s.name) {
                return Err(eyre::Report::new(BuildError::DuplicateParameter(s.name)));
            }
            setters.insert(s.name.clone(), s);
        }
        Ok(ParameterRegistry { setters })
    }
}

impl ParameterRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.setters.keys().map(String::as_str)
    }

    pub fn bounds(&self, parameter: &str) -> Option<Bounds> {
        self.setters.get(parameter).map(|s| s.bounds)
    }

    /// Detailed form of [`validate`](Self::validate): the first reason the values are unusable.
    pub fn check(&self, parameter: &str, values: &[f64]) -> std::result::Result<(), BuildError> {
        let setter = self
            .setters
            .get(parameter)
            .ok_or_else(|| BuildError::UnknownParameter(parameter.to_string()))?;
        if let Some(&bad) = values.iter().find(|v| !setter.bounds.contains(**v)) {
            return Err(BuildError::OutOfBounds {
                parameter: parameter.to_string(),
                value: bad,
                lo: setter.bounds.lo,
                hi: setter.bounds.hi,
            });
        }
        Ok(())
    }

    /// False if `parameter` is unregistered or any value lies outside its bounds.
    pub fn validate(&self, parameter: &str, values: &[f64]) -> bool {
        self.check(parameter, values).is_ok()
    }

    /// Dispatch one value. Out-of-range values are rejected without touching the setter.
    pub fn apply(&mut self, parameter: &str, value: f64, seq: &mut SequenceParams) -> Result<()> {
        let setter = self
            .setters
            .get_mut(parameter)
            .ok_or_else(|| eyre::Report::new(BuildError::UnknownParameter(parameter.to_string())))?;
        tracing::debug!(parameter, value, "apply setpoint");
        setter.apply(value, seq)
    }

    /// Value to restore once a scan of `parameter` ends.
    pub fn configured_value(&self, parameter: &str, seq: &SequenceParams) -> Result<f64> {
        self.setters
            .get(parameter)
            .map(|s| s.configured_value(seq))
            .ok_or_else(|| eyre::Report::new(BuildError::UnknownParameter(parameter.to_string())))
    }
}
