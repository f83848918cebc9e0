//! Capabilities consumed by the core.
//!
//! Each is a stateless-from-the-core's-view trait implemented by an
//! external collaborator and injected at construction, so the core never
//! depends on a concrete scheduler, transport, or executor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A cluster node as seen by the predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub metrics: HashMap<String, f64>,
}

/// Supplies the predictor with the current node set, without coupling the
/// core to any particular scheduler or transport.
#[async_trait]
pub trait NodeProvider: Send + Sync {
    async fn nodes(&self) -> Vec<Node>;
}

/// Result of a single health probe invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub healthy: bool,
    pub latency: Duration,
    pub metrics: HashMap<String, f64>,
    pub error: Option<String>,
}

impl HealthResult {
    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency: Duration::ZERO,
            metrics: HashMap::new(),
            error: Some(error.into()),
        }
    }
}

/// A pluggable health probe. `probe` failing with a transport error is
/// non-fatal: the caller treats it as `healthy = false`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;
    async fn probe(&self, target: &str) -> Result<HealthResult, HealthProbeError>;
}

#[derive(Debug, thiserror::Error)]
#[error("health probe transport error: {0}")]
pub struct HealthProbeError(pub String);

/// A pluggable metric source feeding the collector.
#[async_trait]
pub trait MetricSource: Send + Sync {
    fn name(&self) -> &str;
    async fn collect(&self) -> HashMap<String, f64>;
}

/// A single step's worth of effectful action, produced by the planner and
/// executed through this capability. The core never executes actions
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingAction {
    pub action_type: String,
    pub target: String,
    pub parameters: HashMap<String, serde_json::Value>,
}

impl HealingAction {
    pub fn new(action_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            target: target.into(),
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &HealingAction) -> ActionOutcome;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub duration: Duration,
    pub error: Option<String>,
}

/// An alert surfaced to a human or downstream system. One or more handlers
/// may be registered; each is invoked per alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub level: String,
    pub source: String,
    pub message: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[async_trait]
pub trait AlertHandler: Send + Sync {
    async fn handle(&self, alert: &Alert) -> Result<(), String>;
}
