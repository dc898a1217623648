#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Scan-and-calibration control layer (hardware-agnostic).
//!
//! Instruments are reached only through the traits in `labscan_traits`:
//! `Actuator`, `Analyzer`, `SequenceRunner` and `Scheduler`.
//!
//! ## Architecture
//!
//! - **Registry**: named, bounded setpoint handlers (`registry` module)
//! - **Controller**: closed-loop setpoint search with a gain schedule (`controller`)
//! - **Signals**: histogram and ROI extraction from event timestamps (`histogram`, `signals`)
//! - **Recovery**: failure signatures, repairs and bounded retries (`recovery`)
//! - **Scan**: the stepping state machine that ties them together (`scan`, `builder`)
//!
//! All of it runs on one thread. The only waits are controller settle times,
//! relock settle times and pause polling, all taken through `Clock`.

pub mod builder;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod histogram;
pub mod hw_error;
pub mod instrument;
pub mod mocks;
pub mod recovery;
pub mod registry;
pub mod scan;
pub mod scan_spec;
pub mod signals;
pub mod status;
pub mod util;

pub use builder::{Missing, ScanRunnerBuilder, Set, Unscheduled, default_pipeline};
pub use config::{FailurePolicy, RunCfg};
pub use controller::{
    CalibrationState, ClosedLoopController, ClosedLoopSetter, ControllerParams, Convergence,
    ConvergenceLog, GainSchedule, GuessModel,
};
pub use error::{BuildError, Report, Result, ScanError};
pub use histogram::{EventBuffer, Histogram, HistogramSpec};
pub use instrument::SharedInstrument;
pub use recovery::{
    FailureClass, RecoveryOrchestrator, RelockParams, RelockProcedure, RelockReport, Repair,
    Signature, SignatureMatcher, StepOutcome, Sweep,
};
pub use registry::{Bounds, BoundedSetter, ParameterRegistry, RegistryBuilder, SequenceField};
pub use scan::ScanRunner;
pub use scan_spec::ScanSpec;
pub use signals::{Extraction, LostEnd, Ratio, Roi, RoiLayout, RoiSet, SignalPipeline, SignalSet};
pub use status::{RecordSink, ScanOutcome, ScanRunRecord, ScanState, ScanStatus, VecSink};
