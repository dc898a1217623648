//! Scan state machine, per-step records and the completion sink.

use serde::Serialize;

use crate::error::Result;
use crate::signals::SignalSet;

/// `Idle -> Validating -> (Idle | Stepping) -> Done -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Validating,
    Stepping,
    Done,
}

/// One scan step. Created when the step starts and completed in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanRunRecord {
    pub index: usize,
    pub applied_value: f64,
    /// Seconds since the scan started, taken when the step finished.
    pub elapsed_s: f64,
    pub signals: Option<SignalSet>,
    pub recovered: bool,
    pub attempts: u32,
    pub failure: Option<String>,
}

impl ScanRunRecord {
    pub fn start(index: usize, applied_value: f64) -> Self {
        Self {
            index,
            applied_value,
            elapsed_s: 0.0,
            signals: None,
            recovered: false,
            attempts: 0,
            failure: None,
        }
    }

    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanStatus {
    Completed,
    /// Stopped by the scheduler before step `next_index` started.
    Cancelled { next_index: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanOutcome {
    pub records: Vec<ScanRunRecord>,
    pub status: ScanStatus,
    /// The pre-scan value could not be restored.
    pub restore_failed: bool,
}

impl ScanOutcome {
    pub fn failed_indices(&self) -> Vec<usize> {
        self.records
            .iter()
            .filter(|r| r.failed())
            .map(|r| r.index)
            .collect()
    }
}

/// Write-only destination for the record list, called once when a scan ends.
pub trait RecordSink {
    fn write(&mut self, records: &[ScanRunRecord]) -> Result<()>;
}

/// Keeps every batch it is handed; shareable so tests can inspect it after the run.
#[derive(Debug, Default, Clone)]
pub struct VecSink {
    batches: std::rc::Rc<std::cell::RefCell<Vec<Vec<ScanRunRecord>>>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<ScanRunRecord>> {
        self.batches.borrow().clone()
    }
}

impl RecordSink for VecSink {
    fn write(&mut self, records: &[ScanRunRecord]) -> Result<()> {
        self.batches.borrow_mut().push(records.to_vec());
        Ok(())
    }
}
