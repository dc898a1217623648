use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use labscan_traits::Scheduler;

/// Scheduler driven by two flags that other threads (a Ctrl-C handler, a queue
/// manager) can flip.
#[derive(Debug, Default, Clone)]
pub struct FlagScheduler {
    pause: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl FlagScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.pause)
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }
}

impl Scheduler for FlagScheduler {
    fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::Relaxed)
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_shared_with_clones() {
        let s = FlagScheduler::new();
        let cancel = s.cancel_flag();
        assert!(!s.cancel_requested());
        cancel.store(true, Ordering::Relaxed);
        assert!(s.clone().cancel_requested());
        assert!(!s.pause_requested());
    }
}
