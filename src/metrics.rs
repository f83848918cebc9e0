//! Aggregated metrics exposed by the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedMetrics {
    pub faults_detected: u64,
    pub faults_resolved: u64,
    pub faults_persistent: u64,
    pub recoveries_attempted: u64,
    pub recoveries_succeeded: u64,
    pub healing_attempts: u64,
    pub healing_successes: u64,
    pub predictions_made: u64,
    pub predictions_confirmed: u64,
    pub last_updated: DateTime<Utc>,
}

impl EnhancedMetrics {
    pub fn recovery_success_rate(&self) -> f64 {
        if self.recoveries_attempted == 0 {
            0.0
        } else {
            self.recoveries_succeeded as f64 / self.recoveries_attempted as f64
        }
    }

    pub fn healing_success_rate(&self) -> f64 {
        if self.healing_attempts == 0 {
            0.0
        } else {
            self.healing_successes as f64 / self.healing_attempts as f64
        }
    }
}

/// Monotonic counters behind `EnhancedMetrics`, updated without locking
/// so hot paths (fault detection, healing attempts) never block on a
/// metrics write while holding the coordinator's registry lock.
#[derive(Debug, Default)]
pub struct MetricsCounters {
    faults_detected: AtomicU64,
    faults_resolved: AtomicU64,
    faults_persistent: AtomicU64,
    recoveries_attempted: AtomicU64,
    recoveries_succeeded: AtomicU64,
    healing_attempts: AtomicU64,
    healing_successes: AtomicU64,
    predictions_made: AtomicU64,
    predictions_confirmed: AtomicU64,
}

impl MetricsCounters {
    pub fn record_fault_detected(&self) {
        self.faults_detected.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_fault_resolved(&self) {
        self.faults_resolved.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_fault_persistent(&self) {
        self.faults_persistent.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_recovery(&self, succeeded: bool) {
        self.recoveries_attempted.fetch_add(1, Ordering::Relaxed);
        if succeeded {
            self.recoveries_succeeded.fetch_add(1, Ordering::Relaxed);
        }
    }
    pub fn record_healing(&self, succeeded: bool) {
        self.healing_attempts.fetch_add(1, Ordering::Relaxed);
        if succeeded {
            self.healing_successes.fetch_add(1, Ordering::Relaxed);
        }
    }
    pub fn record_prediction(&self, confirmed: bool) {
        self.predictions_made.fetch_add(1, Ordering::Relaxed);
        if confirmed {
            self.predictions_confirmed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> EnhancedMetrics {
        EnhancedMetrics {
            faults_detected: self.faults_detected.load(Ordering::Relaxed),
            faults_resolved: self.faults_resolved.load(Ordering::Relaxed),
            faults_persistent: self.faults_persistent.load(Ordering::Relaxed),
            recoveries_attempted: self.recoveries_attempted.load(Ordering::Relaxed),
            recoveries_succeeded: self.recoveries_succeeded.load(Ordering::Relaxed),
            healing_attempts: self.healing_attempts.load(Ordering::Relaxed),
            healing_successes: self.healing_successes.load(Ordering::Relaxed),
            predictions_made: self.predictions_made.load(Ordering::Relaxed),
            predictions_confirmed: self.predictions_confirmed.load(Ordering::Relaxed),
            last_updated: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_is_zero_with_no_attempts() {
        let counters = MetricsCounters::default();
        assert_eq!(counters.snapshot().recovery_success_rate(), 0.0);
    }

    #[test]
    fn success_rate_reflects_recorded_outcomes() {
        let counters = MetricsCounters::default();
        counters.record_recovery(true);
        counters.record_recovery(false);
        assert_eq!(counters.snapshot().recovery_success_rate(), 0.5);
    }
}
