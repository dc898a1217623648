//! Maps `Box<dyn Error>` from collaborator boundaries to typed `ScanError`.
//!
//! The traits in `labscan_traits` use `Box<dyn Error + Send + Sync>`; this module
//! converts those to our typed error enum, with an optional feature-gated path for
//! `labscan_sim::SimError` downcasting.

use crate::error::ScanError;

/// Map a trait-boundary error to a typed `ScanError`.
///
/// Attempts to downcast known instrument error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> ScanError {
    #[cfg(feature = "sim-errors")]
    {
        if let Some(sim) = e.downcast_ref::<labscan_sim::SimError>() {
            return match sim {
                labscan_sim::SimError::Timeout => ScanError::Timeout,
                other => ScanError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        ScanError::Timeout
    } else {
        ScanError::Hardware(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_text_maps_to_timeout() {
        let e: Box<dyn std::error::Error + Send + Sync> = "socket Timeout after 2s".into();
        assert!(matches!(map_hw_error(&*e), ScanError::Timeout));
    }

    #[test]
    fn other_text_maps_to_hardware() {
        let e: Box<dyn std::error::Error + Send + Sync> = "VISA resource busy".into();
        match map_hw_error(&*e) {
            ScanError::Hardware(msg) => assert!(msg.contains("busy")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[cfg(feature = "sim-errors")]
    #[test]
    fn sim_errors_downcast_precisely() {
        let e: Box<dyn std::error::Error + Send + Sync> = Box::new(labscan_sim::SimError::Closed);
        assert!(matches!(map_hw_error(&*e), ScanError::HardwareFault(_)));
        let e: Box<dyn std::error::Error + Send + Sync> =
            Box::new(labscan_sim::SimError::Timeout);
        assert!(matches!(map_hw_error(&*e), ScanError::Timeout));
    }
}
