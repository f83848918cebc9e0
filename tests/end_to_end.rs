//! End-to-end scenarios exercising the full coordinator surface against
//! fake capability implementations.

use async_trait::async_trait;
use ftcp::capabilities::{ActionExecutor, ActionOutcome, HealingAction, Node, NodeProvider};
use ftcp::config::FtcpConfig;
use ftcp::coordinator::Coordinator;
use ftcp::error::FtcpError;
use ftcp::orchestrator::{plan_for_fault, RecoveryPlan, RecoveryStep};
use ftcp::predictor::PredictionModel;
use ftcp::types::{FaultType, Metadata, ModelType, PlanConstraints, ResourceFootprint, StepStatus, StepType};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct AlwaysSucceeds;

#[async_trait]
impl ActionExecutor for AlwaysSucceeds {
    async fn execute(&self, _action: &HealingAction) -> ActionOutcome {
        ActionOutcome { success: true, duration: Duration::from_millis(1), error: None }
    }
}

/// Fails only the configured action type, to force a deterministic
/// critical-step failure.
struct FailsAction(String);

#[async_trait]
impl ActionExecutor for FailsAction {
    async fn execute(&self, action: &HealingAction) -> ActionOutcome {
        if action.action_type == self.0 {
            ActionOutcome { success: false, duration: Duration::from_millis(1), error: Some("deterministic failure".into()) }
        } else {
            ActionOutcome { success: true, duration: Duration::from_millis(1), error: None }
        }
    }
}

struct FixedNodes(Vec<Node>);

#[async_trait]
impl NodeProvider for FixedNodes {
    async fn nodes(&self) -> Vec<Node> {
        self.0.clone()
    }
}

fn node(id: &str, metrics: &[(&str, f64)]) -> Node {
    Node {
        id: id.to_string(),
        metrics: metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
    }
}

fn node_failure_model() -> PredictionModel {
    let mut model = PredictionModel::new(
        "node_failure_v1",
        ModelType::Regression,
        vec!["cpu_utilization".into(), "memory_utilization".into(), "temperature".into()],
        "ml",
        FaultType::NodeFailure,
        0.1,
        42,
    );
    for w in model.weights.values_mut() {
        *w = 1.0;
    }
    model
}

/// Scenario 1: simple recovery, Detected -> Recovering -> Resolved,
/// metrics reflect one fault detected and resolved.
#[tokio::test]
async fn simple_recovery_resolves_fault_and_updates_metrics() {
    let coordinator = Coordinator::new(FtcpConfig::default()).unwrap();
    let fault = coordinator.detect_fault(FaultType::NodeFailure, "node-0", "node unreachable", Metadata::new());

    let result = coordinator.recover(&fault.id, Arc::new(AlwaysSucceeds)).await.unwrap();
    assert!(result.successful);

    let resolved = coordinator.get_fault(&fault.id).unwrap();
    assert_eq!(resolved.status, ftcp::types::FaultStatus::Resolved);

    let metrics = coordinator.get_metrics();
    assert_eq!(metrics.faults_detected, 1);
    assert_eq!(metrics.faults_resolved, 1);
}

/// Scenario 2: cascading failures across three targets all eventually
/// resolve, and the recorded success rate over those attempts is high.
#[tokio::test]
async fn cascading_failures_all_resolve() {
    let coordinator = Coordinator::new(FtcpConfig::default()).unwrap();
    let targets = ["node-0", "node-1", "node-2"];
    let mut fault_ids = Vec::new();
    for target in targets {
        let fault = coordinator.detect_fault(FaultType::NodeFailure, target, "node unreachable", Metadata::new());
        fault_ids.push(fault.id);
    }

    let mut successes = 0;
    for id in &fault_ids {
        let result = coordinator.recover(id, Arc::new(AlwaysSucceeds)).await.unwrap();
        if result.successful {
            successes += 1;
        }
    }

    assert_eq!(successes, fault_ids.len());
    for id in &fault_ids {
        assert_eq!(coordinator.get_fault(id).unwrap().status, ftcp::types::FaultStatus::Resolved);
    }
    let metrics = coordinator.get_metrics();
    assert!(metrics.recovery_success_rate() >= 0.8);
}

/// Scenario 3: predictive firing — two nodes report metrics consistent
/// with imminent node failure, and a high-confidence prediction emerges
/// within one prediction cycle.
#[tokio::test]
async fn predictive_firing_emits_high_confidence_prediction() {
    let coordinator = Coordinator::new(FtcpConfig::default()).unwrap();
    coordinator.register_prediction_model(node_failure_model());
    coordinator.set_node_provider(Arc::new(FixedNodes(vec![
        node("node-a", &[("cpu_utilization", 0.95), ("memory_utilization", 0.90), ("temperature", 85.0)]),
        node("node-b", &[("cpu_utilization", 0.95), ("memory_utilization", 0.90), ("temperature", 85.0)]),
    ])));

    let predictions = coordinator.run_prediction_cycle().await;
    assert!(!predictions.is_empty());
    assert!(predictions.iter().any(|p| p.predicted_type == FaultType::NodeFailure && p.confidence >= 0.7));
}

fn step(id: &str, deps: &[&str], critical: bool, action: &str) -> RecoveryStep {
    RecoveryStep {
        id: id.to_string(),
        step_type: StepType::Execution,
        action: action.to_string(),
        target: "node-0".to_string(),
        parameters: HashMap::new(),
        dependencies: deps.iter().map(|s| s.to_string()).collect(),
        timeout: Duration::from_secs(5),
        retries: 0,
        critical,
        parallel: false,
        status: StepStatus::Pending,
    }
}

fn plan(steps: Vec<RecoveryStep>, rollback: Option<Vec<RecoveryStep>>) -> RecoveryPlan {
    RecoveryPlan {
        id: "plan-cycle".to_string(),
        steps,
        resources: ResourceFootprint::default(),
        constraints: PlanConstraints::default(),
        rollback,
        priority: 0,
        estimated_time: Duration::from_secs(0),
    }
}

/// Scenario 4: a plan with a dependency cycle is rejected before any
/// step executes.
#[tokio::test]
async fn dependency_cycle_is_rejected_before_execution() {
    let coordinator = Coordinator::new(FtcpConfig::default()).unwrap();
    let orchestrator = ftcp::orchestrator::Orchestrator::new(ftcp::orchestrator::OrchestratorConfig::default());
    let _ = &coordinator;

    let p = plan(vec![step("a", &["b"], false, "prepare"), step("b", &["a"], false, "prepare")], None);
    let err = orchestrator.recover_plan(p, Arc::new(AlwaysSucceeds)).await.unwrap_err();

    match err {
        FtcpError::Dependency { kind } => assert!(kind.to_string().contains("circular dependency")),
        other => panic!("expected a dependency error, got {other:?}"),
    }
}

/// Scenario 5: a critical step fails deterministically; the plan's
/// rollback step runs and completes, and the execution is marked
/// RolledBack with successful=false.
#[tokio::test]
async fn rollback_runs_on_critical_step_failure() {
    let orchestrator = ftcp::orchestrator::Orchestrator::new(ftcp::orchestrator::OrchestratorConfig::default());
    let rollback_step = step("critical-execute", &[], false, "critical_action");
    let p = plan(
        vec![step("prep", &[], false, "prepare"), step("critical-execute", &["prep"], true, "critical_action"), step("verify", &["critical-execute"], false, "verify")],
        Some(vec![rollback_step]),
    );

    let result = orchestrator.recover_plan(p, Arc::new(FailsAction("critical_action".to_string()))).await.unwrap();
    assert!(!result.successful);
    assert_eq!(result.execution.status, ftcp::types::ExecutionStatus::RolledBack);
    assert_eq!(
        result.execution.step_executions.get("rollback:critical-execute").unwrap().status,
        StepStatus::Completed
    );
}

/// Scenario 6: a bad config reload is rejected and leaves the effective
/// config untouched; the coordinator keeps working afterward.
#[tokio::test]
async fn hot_reload_rollback_preserves_effective_config() {
    let coordinator = Coordinator::new(FtcpConfig::default()).unwrap();
    assert_eq!(coordinator.get_effective_config().replication_factor, 2);

    let mut bad = coordinator.get_effective_config();
    bad.retry_attempts = 255;
    let err = coordinator.reload_configuration(bad).unwrap_err();
    assert!(err.contains("must be between"));
    assert_eq!(coordinator.get_effective_config().replication_factor, 2);

    let fault = coordinator.detect_fault(FaultType::ServiceUnavailable, "node-3", "still works after rollback", Metadata::new());
    assert_eq!(coordinator.get_metrics().faults_detected, 1);
    let _ = plan_for_fault(&fault, coordinator.get_effective_config().max_retries);
}
