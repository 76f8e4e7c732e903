//! # Degraded Mode
//!
//! Tracks consecutive failures of a dependency and flips into a degraded
//! mode once a threshold is crossed. The service uses it to fall back to
//! read-only operation while the claim store is unreachable.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DegradedInfo {
    pub reason: String,
    pub since: DateTime<Utc>,
}

#[derive(Debug)]
pub struct DegradedMode {
    name: &'static str,
    threshold: u32,
    consecutive_failures: AtomicU32,
    active: RwLock<Option<DegradedInfo>>,
}

impl DegradedMode {
    pub fn new(name: &'static str, threshold: u32) -> Self {
        Self {
            name,
            threshold: threshold.max(1),
            consecutive_failures: AtomicU32::new(0),
            active: RwLock::new(None),
        }
    }

    /// Records a dependency failure. Returns true if this call activated
    /// the degraded mode.
    pub fn record_failure(&self, reason: &str) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures < self.threshold {
            return false;
        }
        self.activate(reason)
    }

    /// Records a dependency success. Returns true if this call left the
    /// degraded mode.
    pub fn record_success(&self) -> bool {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.deactivate()
    }

    pub fn activate(&self, reason: &str) -> bool {
        let mut active = self.active.write();
        if active.is_some() {
            return false;
        }
        *active = Some(DegradedInfo {
            reason: reason.to_string(),
            since: Utc::now(),
        });
        warn!(mode = self.name, reason = %reason, "Activated degraded mode");
        counter!("terrafix_degraded_activations_total", 1, "mode" => self.name);
        gauge!("terrafix_degraded", 1.0, "mode" => self.name);
        true
    }

    pub fn deactivate(&self) -> bool {
        let mut active = self.active.write();
        match active.take() {
            Some(info) => {
                let secs = (Utc::now() - info.since).num_seconds();
                info!(mode = self.name, degraded_secs = secs, "Deactivated degraded mode");
                gauge!("terrafix_degraded", 0.0, "mode" => self.name);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.read().is_some()
    }

    pub fn info(&self) -> Option<DegradedInfo> {
        self.active.read().clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_activation() {
        let mode = DegradedMode::new("read_only", 3);
        assert!(!mode.record_failure("refused"));
        assert!(!mode.record_failure("refused"));
        assert!(!mode.is_active());
        assert!(mode.record_failure("refused"));
        assert!(mode.is_active());
        assert!(!mode.record_failure("refused"));
        assert_eq!(mode.info().unwrap().reason, "refused");
    }

    #[test]
    fn test_success_resets() {
        let mode = DegradedMode::new("read_only", 2);
        mode.record_failure("a");
        assert!(!mode.record_success());
        assert_eq!(mode.consecutive_failures(), 0);
        mode.record_failure("b");
        assert!(mode.record_failure("b"));
        assert!(mode.record_success());
        assert!(!mode.is_active());
    }
}
