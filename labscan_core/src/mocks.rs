//! Scripted collaborators for tests, benches and dry runs.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use labscan_traits::{
    Actuator, Analyzer, BoxError, Reading, Scheduler, SequenceOutput, SequenceParams,
    SequenceRunner,
};

/// Actuator that records every value it receives.
#[derive(Debug, Default, Clone)]
pub struct RecordingActuator {
    calls: Rc<RefCell<Vec<f64>>>,
    fail_on: Option<f64>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return an error whenever `value` is applied.
    pub fn failing_on(mut self, value: f64) -> Self {
        self.fail_on = Some(value);
        self
    }

    pub fn calls(&self) -> Rc<RefCell<Vec<f64>>> {
        Rc::clone(&self.calls)
    }
}

impl Actuator for RecordingActuator {
    fn apply(&mut self, value: f64) -> Result<(), BoxError> {
        self.calls.borrow_mut().push(value);
        if self.fail_on == Some(value) {
            return Err(Box::new(std::io::Error::other(format!(
                "instrument rejected {value}"
            ))));
        }
        Ok(())
    }
}

/// Analyzer that replays amplitudes in order and repeats the last one forever.
#[derive(Debug, Clone)]
pub struct ScriptedAnalyzer {
    amplitudes: VecDeque<f64>,
    last: f64,
    reads: Rc<Cell<usize>>,
}

impl ScriptedAnalyzer {
    pub fn new(amplitudes: impl IntoIterator<Item = f64>) -> Self {
        let amplitudes: VecDeque<f64> = amplitudes.into_iter().collect();
        let last = amplitudes.back().copied().unwrap_or(0.0);
        Self {
            amplitudes,
            last,
            reads: Rc::new(Cell::new(0)),
        }
    }

    /// `batches[i]` is repeated `samples` times, so each controller iteration sees one value.
    pub fn batches(batches: &[f64], samples: usize) -> Self {
        Self::new(
            batches
                .iter()
                .flat_map(|v| std::iter::repeat_n(*v, samples)),
        )
    }

    pub fn reads(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.reads)
    }
}

impl Analyzer for ScriptedAnalyzer {
    fn measure(&mut self) -> Result<Reading, BoxError> {
        self.reads.set(self.reads.get() + 1);
        let amplitude = self.amplitudes.pop_front().unwrap_or(self.last);
        Ok(Reading {
            frequency_hz: 0.0,
            amplitude,
        })
    }
}

/// One scripted sequence run.
#[derive(Debug, Clone)]
pub enum Scripted {
    Ok(Vec<f64>),
    Diagnostics(String),
    Err(String),
}

/// Sequence runner that replays scripted outcomes; when exhausted it repeats the fallback.
#[derive(Debug, Clone)]
pub struct ScriptedRunner {
    script: VecDeque<Scripted>,
    fallback: Vec<f64>,
    seen: Rc<RefCell<Vec<SequenceParams>>>,
}

impl ScriptedRunner {
    pub fn new(script: impl IntoIterator<Item = Scripted>, fallback: Vec<f64>) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback,
            seen: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Always returns `timestamps`.
    pub fn constant(timestamps: Vec<f64>) -> Self {
        Self::new([], timestamps)
    }

    /// Parameters of every run, in order.
    pub fn seen(&self) -> Rc<RefCell<Vec<SequenceParams>>> {
        Rc::clone(&self.seen)
    }
}

impl SequenceRunner for ScriptedRunner {
    fn run_detection_sequence(
        &mut self,
        params: &SequenceParams,
    ) -> Result<SequenceOutput, BoxError> {
        self.seen.borrow_mut().push(*params);
        match self.script.pop_front() {
            Some(Scripted::Ok(ts)) => Ok(SequenceOutput {
                timestamps: ts,
                diagnostics: String::new(),
            }),
            Some(Scripted::Diagnostics(text)) => Ok(SequenceOutput {
                timestamps: Vec::new(),
                diagnostics: text,
            }),
            Some(Scripted::Err(msg)) => Err(Box::new(std::io::Error::other(msg))),
            None => Ok(SequenceOutput {
                timestamps: self.fallback.clone(),
                diagnostics: String::new(),
            }),
        }
    }
}

/// Scheduler driven by shared cells.
///
/// Reports a pause for the next `pause_polls` queries and a cancel once
/// `cancel_at` cancel checks have already been answered.
#[derive(Debug, Default, Clone)]
pub struct ScriptedScheduler {
    pub pause_polls: Rc<Cell<usize>>,
    pub cancel_at: Option<usize>,
    checks: Rc<Cell<usize>>,
}

impl ScriptedScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_before(mut self, step: usize) -> Self {
        self.cancel_at = Some(step);
        self
    }

    pub fn paused_for(self, polls: usize) -> Self {
        self.pause_polls.set(polls);
        self
    }
}

impl Scheduler for ScriptedScheduler {
    fn pause_requested(&self) -> bool {
        let left = self.pause_polls.get();
        if left > 0 {
            self.pause_polls.set(left - 1);
            true
        } else {
            false
        }
    }

    fn cancel_requested(&self) -> bool {
        let n = self.checks.get();
        self.checks.set(n + 1);
        self.cancel_at.is_some_and(|at| n >= at)
    }
}
