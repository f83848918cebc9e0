//! Fault classifier.
//!
//! Deterministic rules mapping a health snapshot plus a set of anomalies
//! to a `Fault`, plus the fault lifecycle state machine.

use crate::collector::HealthSnapshot;
use crate::detector::AnomalyResult;
use crate::ids::FAULT_IDS;
use crate::types::{FaultStatus, FaultType, Metadata, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fault {
    pub id: String,
    pub fault_type: FaultType,
    pub severity: Severity,
    pub status: FaultStatus,
    pub target: String,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub description: String,
    pub metadata: Metadata,
    pub confidence: f64,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid fault transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: FaultStatus,
    pub to: FaultStatus,
}

impl Fault {
    pub fn new(fault_type: FaultType, severity: Severity, target: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: FAULT_IDS.mint(),
            fault_type,
            severity,
            status: FaultStatus::Detected,
            target: target.into(),
            detected_at: Utc::now(),
            resolved_at: None,
            description: description.into(),
            metadata: Metadata::new(),
            confidence: 1.0,
        }
    }

    /// Enforces the invariant `resolved_at != null <=> status == Resolved`
    /// and that a fault never returns to an earlier state. `Resolved`
    /// faults are frozen: any further transition attempt is rejected.
    pub fn transition_to(&mut self, next: FaultStatus) -> Result<(), InvalidTransition> {
        if self.status == FaultStatus::Resolved {
            return Err(InvalidTransition { from: self.status, to: next });
        }
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition { from: self.status, to: next });
        }
        self.status = next;
        self.resolved_at = if next == FaultStatus::Resolved { Some(Utc::now()) } else { None };
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, FaultStatus::Resolved | FaultStatus::Persistent)
    }
}

/// Derived health score in `[0, 1]`, `1` healthiest.
/// Falls back to the binary `healthy` flag when no explicit score metric
/// was reported by a probe.
fn derived_health_score(snapshot: &HealthSnapshot) -> f64 {
    snapshot
        .metrics
        .get("health_score")
        .copied()
        .unwrap_or(if snapshot.healthy { 1.0 } else { 0.0 })
}

fn max_severity(anomalies: &[&AnomalyResult]) -> Severity {
    anomalies
        .iter()
        .map(|a| a.severity)
        .max()
        .unwrap_or(Severity::Low)
}

fn confidence_of(anomalies: &[&AnomalyResult]) -> f64 {
    let (dev_sum, thr_sum): (f64, f64) = anomalies
        .iter()
        .fold((0.0, 0.0), |(d, t), a| (d + a.deviation, t + a.threshold));
    if thr_sum > 0.0 {
        (dev_sum / thr_sum).min(1.0)
    } else {
        1.0
    }
}

/// Classify a health snapshot plus its anomalies into a `Fault`, following
/// a deterministic rule order. Returns `None` when nothing warrants a
/// fault (healthy target, health score above threshold).
pub fn classify(
    snapshot: &HealthSnapshot,
    anomalies: &[AnomalyResult],
    health_score_threshold: f64,
) -> Option<Fault> {
    let connectivity: Vec<&AnomalyResult> = anomalies.iter().filter(|a| a.metric == "connectivity").collect();
    if !connectivity.is_empty() {
        return Some(make_fault(
            FaultType::NetworkPartition,
            &connectivity,
            snapshot,
            "connectivity anomaly detected",
        ));
    }

    let resource: Vec<&AnomalyResult> = anomalies
        .iter()
        .filter(|a| (a.metric == "cpu_usage" || a.metric == "memory_usage") && a.severity >= Severity::High)
        .collect();
    if !resource.is_empty() {
        return Some(make_fault(
            FaultType::ResourceExhaustion,
            &resource,
            snapshot,
            "cpu/memory anomaly at high severity or above",
        ));
    }

    let response_time: Vec<&AnomalyResult> = anomalies.iter().filter(|a| a.metric == "response_time").collect();
    if !response_time.is_empty() {
        return Some(make_fault(
            FaultType::PerformanceAnomaly,
            &response_time,
            snapshot,
            "response time anomaly detected",
        ));
    }

    let error_rate: Vec<&AnomalyResult> = anomalies.iter().filter(|a| a.metric == "error_rate").collect();
    if !error_rate.is_empty() {
        return Some(make_fault(
            FaultType::ServiceUnavailable,
            &error_rate,
            snapshot,
            "error rate anomaly detected",
        ));
    }

    if derived_health_score(snapshot) < health_score_threshold {
        let mut fault = Fault::new(
            FaultType::ServiceUnavailable,
            Severity::Medium,
            &snapshot.target,
            "derived health score below threshold",
        );
        fault.confidence = 1.0 - derived_health_score(snapshot);
        return Some(fault);
    }

    None
}

fn make_fault(fault_type: FaultType, contributors: &[&AnomalyResult], snapshot: &HealthSnapshot, description: &str) -> Fault {
    let mut fault = Fault::new(fault_type, max_severity(contributors), &snapshot.target, description);
    fault.confidence = confidence_of(contributors);
    fault
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectionMethod;
    use std::collections::HashMap;

    fn snapshot(target: &str, healthy: bool) -> HealthSnapshot {
        HealthSnapshot {
            target: target.to_string(),
            healthy,
            metrics: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    fn anomaly(metric: &str, severity: Severity) -> AnomalyResult {
        AnomalyResult {
            metric: metric.to_string(),
            method: DetectionMethod::ZScore,
            value: 10.0,
            deviation: severity.priority_score() as f64,
            threshold: 2.0,
            severity,
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn connectivity_anomaly_yields_network_partition() {
        let fault = classify(&snapshot("node-0", false), &[anomaly("connectivity", Severity::High)], 0.5).unwrap();
        assert_eq!(fault.fault_type, FaultType::NetworkPartition);
        assert_eq!(fault.status, FaultStatus::Detected);
    }

    #[test]
    fn low_severity_resource_anomaly_does_not_trigger() {
        let fault = classify(&snapshot("node-0", true), &[anomaly("cpu_usage", Severity::Low)], 0.5);
        assert!(fault.is_none());
    }

    #[test]
    fn high_severity_resource_anomaly_triggers_exhaustion() {
        let fault = classify(&snapshot("node-0", true), &[anomaly("memory_usage", Severity::Critical)], 0.5).unwrap();
        assert_eq!(fault.fault_type, FaultType::ResourceExhaustion);
    }

    #[test]
    fn rule_priority_connectivity_wins_over_resource() {
        let anomalies = vec![anomaly("memory_usage", Severity::Critical), anomaly("connectivity", Severity::Low)];
        let fault = classify(&snapshot("node-0", false), &anomalies, 0.5).unwrap();
        assert_eq!(fault.fault_type, FaultType::NetworkPartition);
    }

    #[test]
    fn low_health_score_falls_back_to_service_unavailable() {
        let mut snap = snapshot("node-0", true);
        snap.metrics.insert("health_score".into(), 0.2);
        let fault = classify(&snap, &[], 0.5).unwrap();
        assert_eq!(fault.fault_type, FaultType::ServiceUnavailable);
        assert_eq!(fault.severity, Severity::Medium);
    }

    #[test]
    fn resolved_fault_is_frozen() {
        let mut fault = Fault::new(FaultType::NodeFailure, Severity::High, "node-0", "test");
        fault.transition_to(FaultStatus::Recovering).unwrap();
        fault.transition_to(FaultStatus::Resolved).unwrap();
        assert!(fault.resolved_at.is_some());
        assert!(fault.transition_to(FaultStatus::Recovering).is_err());
    }

    #[test]
    fn resolved_at_invariant_holds() {
        let mut fault = Fault::new(FaultType::NodeFailure, Severity::High, "node-0", "test");
        assert!(fault.resolved_at.is_none());
        fault.transition_to(FaultStatus::Recovering).unwrap();
        fault.transition_to(FaultStatus::Persistent).unwrap();
        assert!(fault.resolved_at.is_none());
    }
}
