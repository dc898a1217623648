use labscan_traits::{BoxError, SequenceOutput, SequenceParams, SequenceRunner};

use crate::reference::ReferenceProbe;
use crate::rf::RfProbe;
use crate::util::Jitter;

/// Population model of the simulated trap.
#[derive(Debug, Clone)]
pub struct SequenceSimCfg {
    /// Particles loaded (and detected) per run.
    pub loading_events: usize,
    /// Fraction detected at extraction when the tickle is far off resonance.
    pub trapped_fraction: f64,
    /// Fraction lost right after loading, on resonance.
    pub lost_fraction: f64,
    pub resonance_hz: f64,
    pub resonance_width_hz: f64,
    /// Spread of extraction arrival times around `load + wait`.
    pub extraction_jitter_us: f64,
    /// Text the runtime prints when the reference is gone.
    pub fault_marker: String,
}

impl Default for SequenceSimCfg {
    fn default() -> Self {
        Self {
            loading_events: 20,
            trapped_fraction: 0.7,
            lost_fraction: 0.6,
            resonance_hz: 1.5e6,
            resonance_width_hz: 50.0e3,
            extraction_jitter_us: 0.3,
            fault_marker: "REFERENCE UNLOCKED".to_string(),
        }
    }
}

/// Simulated timed-sequence runtime.
///
/// Produces loading events during `[0, load)`, losses shortly after `load` (more
/// of them when the RF tickle sits on the resonance) and extraction events around
/// `load + wait`. Prints the fault marker instead of data while the reference is
/// unlocked or on runs scheduled to fail.
pub struct SimulatedSequence {
    cfg: SequenceSimCfg,
    jitter: Jitter,
    rf: Option<RfProbe>,
    reference: Option<ReferenceProbe>,
    fault_runs: Vec<usize>,
    drift_runs: Vec<(usize, f64)>,
    runs: usize,
}

impl SimulatedSequence {
    pub fn new(cfg: SequenceSimCfg) -> Self {
        Self {
            cfg,
            jitter: Jitter::new(3),
            rf: None,
            reference: None,
            fault_runs: Vec::new(),
            drift_runs: Vec::new(),
            runs: 0,
        }
    }

    pub fn with_rf(mut self, rf: RfProbe) -> Self {
        self.rf = Some(rf);
        self
    }

    pub fn with_reference(mut self, reference: ReferenceProbe) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Print the fault marker on these (1-based) runs without touching the lock.
    pub fn with_fault_runs(mut self, runs: impl Into<Vec<usize>>) -> Self {
        self.fault_runs = runs.into();
        self
    }

    /// Drift the reference optimum by `delta` just before the given (1-based) run.
    pub fn with_reference_drift(mut self, run: usize, delta: f64) -> Self {
        self.drift_runs.push((run, delta));
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.jitter = Jitter::new(seed);
        self
    }

    pub fn runs(&self) -> usize {
        self.runs
    }

    fn loss_probability(&self) -> f64 {
        let Some(rf) = self.rf.as_ref().filter(|rf| rf.output_on()) else {
            return 0.0;
        };
        let detuning = (rf.frequency_hz() - self.cfg.resonance_hz) / self.cfg.resonance_width_hz;
        let drive = rf.amplitude().clamp(0.0, 1.0);
        self.cfg.lost_fraction * drive / (1.0 + detuning * detuning)
    }
}

impl SequenceRunner for SimulatedSequence {
    fn run_detection_sequence(
        &mut self,
        params: &SequenceParams,
    ) -> Result<SequenceOutput, BoxError> {
        self.runs += 1;
        let run = self.runs;

        if let Some(reference) = &self.reference {
            for (_, delta) in self.drift_runs.iter().filter(|(r, _)| *r == run) {
                reference.drift(*delta);
            }
        }
        let unlocked = self.reference.as_ref().is_some_and(|r| !r.locked());
        if unlocked || self.fault_runs.contains(&run) {
            tracing::debug!(run, unlocked, "simulated sequence fault");
            return Ok(SequenceOutput {
                timestamps: Vec::new(),
                diagnostics: format!("{} (run {run})", self.cfg.fault_marker),
            });
        }

        let load = params.load_time_us.max(0.0);
        let extraction = load + params.wait_time_us.max(0.0);
        let loss_window = params.pulse_length_us.clamp(0.0, 5.0);
        let p_loss = self.loss_probability();

        let mut timestamps = Vec::with_capacity(self.cfg.loading_events * 2);
        for _ in 0..self.cfg.loading_events {
            timestamps.push(self.jitter.between(0.0, load));
            let fate = self.jitter.unit();
            if fate < p_loss {
                timestamps.push(load + self.jitter.between(0.0, loss_window));
            } else if fate < p_loss + (1.0 - p_loss) * self.cfg.trapped_fraction {
                let t = extraction + self.jitter.symmetric(self.cfg.extraction_jitter_us);
                timestamps.push(t.max(0.0));
            }
        }
        Ok(SequenceOutput {
            timestamps,
            diagnostics: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::SimulatedReference;

    #[test]
    fn loading_events_fall_inside_load_window() {
        let mut seq = SimulatedSequence::new(SequenceSimCfg::default());
        let params = SequenceParams::default();
        let out = seq.run_detection_sequence(&params).unwrap();
        let loading = out
            .timestamps
            .iter()
            .filter(|t| **t < params.load_time_us)
            .count();
        assert_eq!(loading, 20);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn scheduled_fault_prints_marker() {
        let mut seq = SimulatedSequence::new(SequenceSimCfg::default()).with_fault_runs([2]);
        let params = SequenceParams::default();
        assert!(seq.run_detection_sequence(&params).unwrap().diagnostics.is_empty());
        let faulted = seq.run_detection_sequence(&params).unwrap();
        assert!(faulted.diagnostics.contains("REFERENCE UNLOCKED"));
        assert!(faulted.timestamps.is_empty());
    }

    #[test]
    fn drifted_reference_faults_until_relocked() {
        let reference = SimulatedReference::new(0.0, 0.5);
        let probe = reference.probe();
        let mut seq = SimulatedSequence::new(SequenceSimCfg::default())
            .with_reference(probe.clone())
            .with_reference_drift(1, 2.0);
        let params = SequenceParams::default();
        assert!(!seq.run_detection_sequence(&params).unwrap().diagnostics.is_empty());
        assert!(!seq.run_detection_sequence(&params).unwrap().diagnostics.is_empty());
        let mut reference = reference;
        labscan_traits::Actuator::apply(&mut reference, 2.0).unwrap();
        assert!(seq.run_detection_sequence(&params).unwrap().diagnostics.is_empty());
    }
}
