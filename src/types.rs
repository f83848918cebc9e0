//! Shared data-model primitives.
//!
//! Component-owned records (`Fault`, `Prediction`, `PredictionModel`,
//! `HealingAttempt`, `RecoveryPlan`, `RecoveryExecution`) live next to the
//! component that owns their registry (`classifier`, `predictor`,
//! `healer`, `orchestrator` respectively). This module holds the enums and
//! small value types shared across those records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type Metadata = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultType {
    NodeFailure,
    NetworkPartition,
    ResourceExhaustion,
    PerformanceAnomaly,
    ServiceUnavailable,
}

impl std::fmt::Display for FaultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NodeFailure => "node_failure",
            Self::NetworkPartition => "network_partition",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::PerformanceAnomaly => "performance_anomaly",
            Self::ServiceUnavailable => "service_unavailable",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity band from a normalised deviation ratio:
    /// `>= 3.0 critical, >= 2.0 high, >= 1.5 medium, else low`.
    pub fn from_deviation_ratio(ratio: f64) -> Self {
        if ratio >= 3.0 {
            Self::Critical
        } else if ratio >= 2.0 {
            Self::High
        } else if ratio >= 1.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Orchestrator priority contribution.
    pub fn priority_score(self) -> i64 {
        match self {
            Self::Critical => 10,
            Self::High => 8,
            Self::Medium => 6,
            Self::Low => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultStatus {
    Detected,
    Recovering,
    Resolved,
    Persistent,
}

impl FaultStatus {
    /// A fault never returns to an earlier state once resolved.
    pub fn can_transition_to(self, next: Self) -> bool {
        use FaultStatus::*;
        matches!(
            (self, next),
            (Detected, Recovering)
                | (Recovering, Resolved)
                | (Recovering, Persistent)
                | (Detected, Resolved) // direct resolution, e.g. a one-shot strategy
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionStatus {
    Pending,
    Confirmed,
    FalsePositive,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    Regression,
    Classification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepType {
    Preparation,
    Validation,
    Execution,
    Verification,
    Cleanup,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Planning,
    Executing,
    Completed,
    Failed,
    RolledBack,
    Cancelled,
}

/// Resource footprint of a `RecoveryPlan`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceFootprint {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub network: f64,
    pub nodes: Vec<String>,
    pub services: Vec<String>,
}

/// Constraints on a `RecoveryPlan`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanConstraints {
    pub max_duration_secs: Option<u64>,
    pub max_retries: u32,
    pub required_nodes: Vec<String>,
    pub excluded_nodes: Vec<String>,
}
