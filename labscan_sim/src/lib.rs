//! Simulated instruments for running scans without the lab.
//!
//! Every simulator implements one collaborator trait from `labscan_traits` and
//! shares its physical state through `Rc<Cell<_>>` probes, so a simulated analyzer
//! can observe what a simulated RF source was told to do.
pub mod error;
pub mod reference;
pub mod rf;
pub mod scheduler;
pub mod sequence;
pub mod util;

pub use error::SimError;
pub use reference::{LockMonitor, ReferenceProbe, SimulatedReference};
pub use rf::{RfProbe, SimulatedAnalyzer, SimulatedRfSource};
pub use scheduler::FlagScheduler;
pub use sequence::{SequenceSimCfg, SimulatedSequence};
