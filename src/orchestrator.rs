//! Recovery orchestrator.
//!
//! Three-phase pipeline: plan -> dependency-resolve -> execute. A
//! priority-ordered dispatch queue feeds a bounded pool of in-flight
//! recoveries, the same way a lock manager queues resource requests
//! behind a bounded pool of grants, generalised from single-resource
//! locks to whole recovery plans.

pub mod dependency;
pub mod drill;
pub mod execution;

use crate::capabilities::{ActionExecutor, NodeProvider};
use crate::classifier::Fault;
use crate::error::{FtcpError, FtcpResult};
use crate::ids::PLAN_IDS;
use crate::orchestrator::dependency::DependencyKind;
use crate::types::{FaultType, PlanConstraints, ResourceFootprint, StepStatus, StepType};
use chrono::{DateTime, Utc};
use execution::{run_parallel, run_rollback, run_sequential, ExecutionResult, RecoveryExecution};
use parking_lot::RwLock as SyncRwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStep {
    pub id: String,
    pub step_type: StepType,
    pub action: String,
    pub target: String,
    pub parameters: HashMap<String, serde_json::Value>,
    pub dependencies: Vec<String>,
    pub timeout: Duration,
    pub retries: u32,
    pub critical: bool,
    pub parallel: bool,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub id: String,
    pub steps: Vec<RecoveryStep>,
    pub resources: ResourceFootprint,
    pub constraints: PlanConstraints,
    pub rollback: Option<Vec<RecoveryStep>>,
    pub priority: i64,
    pub estimated_time: Duration,
}

/// Per-fault-type fixed step shape: `(execution action, base estimate)`.
fn execution_action_for(fault_type: FaultType) -> (&'static str, Duration) {
    match fault_type {
        FaultType::NodeFailure => ("failover_node", Duration::from_secs(6 * 60)),
        FaultType::NetworkPartition => ("recover_partition", Duration::from_secs(4 * 60)),
        FaultType::ServiceUnavailable => ("restart_service", Duration::from_secs(2 * 60)),
        FaultType::ResourceExhaustion => ("scale_resources", Duration::from_secs(4 * 60)),
        FaultType::PerformanceAnomaly => ("generic_recovery", Duration::from_secs(2 * 60)),
    }
}

/// `severity score + type bonus`.
pub fn priority_for(fault: &Fault) -> i64 {
    let type_bonus = match fault.fault_type {
        FaultType::NodeFailure => 2,
        FaultType::NetworkPartition | FaultType::ServiceUnavailable => 1,
        _ => 0,
    };
    fault.severity.priority_score() + type_bonus
}

fn step(id: &str, step_type: StepType, action: &str, target: &str, deps: &[&str], timeout_secs: u64, retries: u32, critical: bool) -> RecoveryStep {
    RecoveryStep {
        id: id.to_string(),
        step_type,
        action: action.to_string(),
        target: target.to_string(),
        parameters: HashMap::new(),
        dependencies: deps.iter().map(|s| s.to_string()).collect(),
        timeout: Duration::from_secs(timeout_secs),
        retries,
        critical,
        parallel: true,
        status: StepStatus::Pending,
    }
}

/// Build the standard step sequence for a single fault:
/// `Preparation -> Validation -> (type-specific Execution) -> Verification -> Cleanup`.
pub fn plan_for_fault(fault: &Fault, max_retries: u32) -> RecoveryPlan {
    let (action, base_estimate) = execution_action_for(fault.fault_type);
    let prep_id = format!("{}-prep", fault.id);
    let validate_id = format!("{}-validate", fault.id);
    let exec_id = format!("{}-exec", fault.id);
    let verify_id = format!("{}-verify", fault.id);
    let cleanup_id = format!("{}-cleanup", fault.id);

    let steps = vec![
        step(&prep_id, StepType::Preparation, "prepare_recovery", &fault.target, &[], 30, 0, false),
        step(&validate_id, StepType::Validation, "validate_target", &fault.target, &[&prep_id], 15, 1, false),
        step(&exec_id, StepType::Execution, action, &fault.target, &[&validate_id], 120, max_retries, true),
        step(&verify_id, StepType::Verification, "verify_health", &fault.target, &[&exec_id], 30, 1, true),
        step(&cleanup_id, StepType::Cleanup, "cleanup_recovery", &fault.target, &[&verify_id], 15, 0, false),
    ];

    RecoveryPlan {
        id: PLAN_IDS.mint(),
        steps,
        resources: ResourceFootprint {
            nodes: vec![fault.target.clone()],
            ..Default::default()
        },
        constraints: PlanConstraints {
            max_retries,
            ..Default::default()
        },
        rollback: None,
        priority: priority_for(fault),
        estimated_time: base_estimate,
    }
}

/// Build a multi-fault plan: a `Global Preparation` precedes every
/// per-fault chain, and a `Global Verification` closes the plan after
/// every per-fault verification completes. Estimated time adds 30s
/// coordination overhead per fault beyond the first.
pub fn plan_for_faults(faults: &[Fault], max_retries: u32) -> RecoveryPlan {
    if faults.len() == 1 {
        return plan_for_fault(&faults[0], max_retries);
    }

    let global_prep = "global-prep".to_string();
    let mut steps = vec![step(&global_prep, StepType::Preparation, "global_prepare", "cluster", &[], 30, 0, false)];
    let mut verify_ids = Vec::new();
    let mut total_estimate = Duration::from_secs(0);

    for (i, fault) in faults.iter().enumerate() {
        let (action, base_estimate) = execution_action_for(fault.fault_type);
        let validate_id = format!("{}-validate", fault.id);
        let exec_id = format!("{}-exec", fault.id);
        let verify_id = format!("{}-verify", fault.id);

        steps.push(step(&validate_id, StepType::Validation, "validate_target", &fault.target, &[&global_prep], 15, 1, false));
        steps.push(step(&exec_id, StepType::Execution, action, &fault.target, &[&validate_id], 120, max_retries, true));
        steps.push(step(&verify_id, StepType::Verification, "verify_health", &fault.target, &[&exec_id], 30, 1, true));
        verify_ids.push(verify_id);

        total_estimate = if i == 0 { base_estimate } else { total_estimate.max(base_estimate) + Duration::from_secs(30) };
    }

    let verify_id_refs: Vec<&str> = verify_ids.iter().map(String::as_str).collect();
    steps.push(step("global-verify", StepType::Verification, "global_verify", "cluster", &verify_id_refs, 30, 1, true));
    steps.push(step("global-cleanup", StepType::Cleanup, "global_cleanup", "cluster", &["global-verify"], 15, 0, false));

    let priority = faults.iter().map(priority_for).max().unwrap_or(0);

    RecoveryPlan {
        id: PLAN_IDS.mint(),
        steps,
        resources: ResourceFootprint {
            nodes: faults.iter().map(|f| f.target.clone()).collect(),
            ..Default::default()
        },
        constraints: PlanConstraints {
            max_retries,
            ..Default::default()
        },
        rollback: None,
        priority,
        estimated_time: total_estimate,
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent: usize,
    pub max_concurrent_recoveries: usize,
    pub max_depth: usize,
    pub dependency_timeout: Duration,
    pub recovery_timeout: Duration,
    pub rollback_timeout: Duration,
    pub rollback_enabled: bool,
    pub max_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            max_concurrent_recoveries: 4,
            max_depth: 20,
            dependency_timeout: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(30 * 60),
            rollback_timeout: Duration::from_secs(60),
            rollback_enabled: true,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryResult {
    pub successful: bool,
    pub execution: RecoveryExecution,
}

/// One entry in the priority-ordered dispatch queue. Generalises the
/// teacher's `QueueEntry`/`PriorityQueue` (higher priority first, then
/// earlier insertion wins ties) from single-resource locks to whole
/// recovery plans.
#[derive(Debug, Clone)]
struct RecoveryRequest {
    plan: RecoveryPlan,
    enqueued_at: DateTime<Utc>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    queue: Mutex<Vec<RecoveryRequest>>,
    in_flight: Arc<Semaphore>,
    executions: Mutex<HashMap<String, Arc<Mutex<RecoveryExecution>>>>,
    node_provider: SyncRwLock<Option<Arc<dyn NodeProvider>>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let in_flight = Arc::new(Semaphore::new(config.max_concurrent_recoveries.max(1)));
        Self {
            config,
            queue: Mutex::new(Vec::new()),
            in_flight,
            executions: Mutex::new(HashMap::new()),
            node_provider: SyncRwLock::new(None),
        }
    }

    /// Used to evaluate `DependencyKind::NodeAvailable` during the
    /// resolve phase. Without one, node-availability predicates are
    /// treated as trivially satisfied.
    pub fn set_node_provider(&self, provider: Arc<dyn NodeProvider>) {
        *self.node_provider.write() = Some(provider);
    }

    /// Append a single-fault plan to the dispatch queue.
    pub async fn enqueue(&self, fault: &Fault) -> String {
        let plan = plan_for_fault(fault, self.config.max_retries);
        let plan_id = plan.id.clone();
        self.queue.lock().await.push(RecoveryRequest { plan, enqueued_at: Utc::now() });
        plan_id
    }

    /// Sort the queue by descending priority (ties by earlier enqueue
    /// time) and dispatch while capacity exists. Dispatched requests are
    /// removed even if still executing.
    pub async fn dispatch_tick(&self, executor: Arc<dyn ActionExecutor>) {
        let mut queue = self.queue.lock().await;
        queue.sort_by(|a, b| b.plan.priority.cmp(&a.plan.priority).then_with(|| a.enqueued_at.cmp(&b.enqueued_at)));

        let mut dispatched_indices = Vec::new();
        for (i, request) in queue.iter().enumerate() {
            if self.in_flight.available_permits() == 0 {
                break;
            }
            let plan = request.plan.clone();
            let executor = executor.clone();
            dispatched_indices.push(i);
            let execution_handle = self.spawn_execution(plan, executor).await;
            if let Ok(execution) = execution_handle {
                self.executions.lock().await.insert(execution.0, execution.1);
            }
        }

        for &i in dispatched_indices.iter().rev() {
            queue.remove(i);
        }
    }

    async fn spawn_execution(&self, plan: RecoveryPlan, executor: Arc<dyn ActionExecutor>) -> FtcpResult<(String, Arc<Mutex<RecoveryExecution>>)> {
        let permit = self
            .in_flight
            .clone()
            .try_acquire_owned()
            .map_err(|_| FtcpError::Capacity("max_concurrent_recoveries reached".to_string()))?;

        let execution = Arc::new(Mutex::new(RecoveryExecution::new(&plan)));
        let execution_id = execution.lock().await.id.clone();
        let config = self.config.clone();
        let execution_for_task = execution.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let _ = run_plan(&plan, execution_for_task, executor, &config).await;
        });

        Ok((execution_id, execution))
    }

    /// Run a single fault's recovery synchronously end to end: plan,
    /// validate, execute, roll back on critical failure. Used directly by
    /// the coordinator's `recover` operation (as opposed to the
    /// background dispatch loop, which is for batched/queued recovery).
    pub async fn recover(&self, fault: &Fault, executor: Arc<dyn ActionExecutor>) -> FtcpResult<RecoveryResult> {
        let plan = plan_for_fault(fault, self.config.max_retries);
        self.recover_plan(plan, executor).await
    }

    /// Resolve phase: build the synthesised dependency graph and, for
    /// every step with no in-plan predecessor, wait until its
    /// resource/service predicates hold before execution starts.
    /// `StepCompleted` predicates are left to the execution engine, which
    /// already tracks completion as steps finish.
    async fn resolve_dependencies(&self, plan: &RecoveryPlan) -> FtcpResult<()> {
        let graph = dependency::build_graph(plan);
        for step in &plan.steps {
            if !step.dependencies.is_empty() {
                continue;
            }
            let Some(deps) = graph.get(&step.id) else { continue };
            for dep in deps {
                if matches!(dep, DependencyKind::StepCompleted(_)) {
                    continue;
                }
                let label = format!("{:?}", dep);
                dependency::wait_for(&label, || self.dependency_holds(dep), self.config.dependency_timeout).await?;
            }
        }
        Ok(())
    }

    async fn dependency_holds(&self, kind: &DependencyKind) -> bool {
        match kind {
            DependencyKind::StepCompleted(_) => true,
            DependencyKind::NodeAvailable(target) => {
                let provider = self.node_provider.read().clone();
                match provider {
                    Some(provider) => provider.nodes().await.iter().any(|n| &n.id == target),
                    None => true,
                }
            }
            DependencyKind::ServiceHealthy(_) | DependencyKind::DataAvailable(_) | DependencyKind::NetworkAvailable(_) => true,
        }
    }

    pub async fn recover_plan(&self, plan: RecoveryPlan, executor: Arc<dyn ActionExecutor>) -> FtcpResult<RecoveryResult> {
        dependency::validate(&plan, self.config.max_depth)?;
        self.resolve_dependencies(&plan).await?;

        let _permit = self
            .in_flight
            .clone()
            .try_acquire_owned()
            .map_err(|_| FtcpError::Capacity("max_concurrent_recoveries reached".to_string()))?;

        let execution = Arc::new(Mutex::new(RecoveryExecution::new(&plan)));
        let outcome = tokio::time::timeout(self.config.recovery_timeout, run_plan(&plan, execution.clone(), executor, &self.config)).await;

        let mut exec = execution.lock().await;
        exec.finished_at = Some(Utc::now());
        let successful = match outcome {
            Ok(Ok(())) => {
                exec.status = crate::types::ExecutionStatus::Completed;
                exec.result = Some(ExecutionResult { successful: true, error: None, rollback_error: None });
                true
            }
            Ok(Err(_)) => false,
            Err(_) => {
                exec.status = crate::types::ExecutionStatus::Failed;
                exec.result = Some(ExecutionResult {
                    successful: false,
                    error: Some(format!("plan {} exceeded recovery timeout", plan.id)),
                    rollback_error: None,
                });
                false
            }
        };

        self.executions.lock().await.insert(exec.id.clone(), execution.clone());
        Ok(RecoveryResult { successful, execution: exec.clone() })
    }

    pub async fn get_execution(&self, execution_id: &str) -> Option<RecoveryExecution> {
        let executions = self.executions.lock().await;
        if let Some(handle) = executions.get(execution_id) {
            Some(handle.lock().await.clone())
        } else {
            None
        }
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }
}

/// Run the plan's steps (parallel if every step allows it, else
/// sequential) and roll back on a critical failure when the plan
/// declares a rollback.
async fn run_plan(
    plan: &RecoveryPlan,
    execution: Arc<Mutex<RecoveryExecution>>,
    executor: Arc<dyn ActionExecutor>,
    config: &OrchestratorConfig,
) -> FtcpResult<()> {
    {
        let mut exec = execution.lock().await;
        exec.status = crate::types::ExecutionStatus::Executing;
        exec.started_at = Some(Utc::now());
    }

    let all_parallel = plan.steps.iter().all(|s| s.parallel);
    let run_result = if all_parallel {
        run_parallel(plan, execution.clone(), executor.clone(), config.max_concurrent).await
    } else {
        run_sequential(plan, execution.clone(), executor.clone()).await
    };

    match run_result {
        Ok(()) => {
            let mut exec = execution.lock().await;
            exec.status = crate::types::ExecutionStatus::Completed;
            exec.result = Some(ExecutionResult { successful: true, error: None, rollback_error: None });
            Ok(())
        }
        Err(e) => {
            if config.rollback_enabled {
                if let Some(rollback_steps) = &plan.rollback {
                    let rollback_outcome = run_rollback(rollback_steps, &execution, executor.as_ref(), config.rollback_timeout).await;
                    let mut exec = execution.lock().await;
                    exec.status = crate::types::ExecutionStatus::RolledBack;
                    exec.result = Some(ExecutionResult {
                        successful: false,
                        error: Some(e.to_string()),
                        rollback_error: rollback_outcome.err(),
                    });
                    return Err(e);
                }
            }
            let mut exec = execution.lock().await;
            exec.status = crate::types::ExecutionStatus::Failed;
            exec.result = Some(ExecutionResult { successful: false, error: Some(e.to_string()), rollback_error: None });
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{ActionOutcome, HealingAction};
    use crate::types::{FaultStatus, Severity};
    use async_trait::async_trait;

    struct AlwaysSucceeds;

    #[async_trait]
    impl ActionExecutor for AlwaysSucceeds {
        async fn execute(&self, _action: &HealingAction) -> ActionOutcome {
            ActionOutcome { success: true, duration: Duration::from_millis(1), error: None }
        }
    }

    struct FailsCriticalStep(String);

    #[async_trait]
    impl ActionExecutor for FailsCriticalStep {
        async fn execute(&self, action: &HealingAction) -> ActionOutcome {
            if action.action_type == self.0 {
                ActionOutcome { success: false, duration: Duration::from_millis(1), error: Some("deterministic failure".into()) }
            } else {
                ActionOutcome { success: true, duration: Duration::from_millis(1), error: None }
            }
        }
    }

    fn fault() -> Fault {
        Fault::new(FaultType::NodeFailure, Severity::High, "node-0", "test")
    }

    #[tokio::test]
    async fn simple_recovery_completes_successfully() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        let result = orchestrator.recover(&fault(), Arc::new(AlwaysSucceeds)).await.unwrap();
        assert!(result.successful);
        assert_eq!(result.execution.progress.percent_complete, 100.0);
    }

    #[tokio::test]
    async fn cyclic_plan_is_rejected_before_execution() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        let mut plan = plan_for_fault(&fault(), 1);
        let first_id = plan.steps[0].id.clone();
        let last_id = plan.steps.last().unwrap().id.clone();
        plan.steps[0].dependencies.push(last_id);
        let err = orchestrator.recover_plan(plan, Arc::new(AlwaysSucceeds)).await.unwrap_err();
        assert!(matches!(err, FtcpError::Dependency { .. }));
        let _ = first_id;
    }

    #[tokio::test]
    async fn rollback_runs_on_critical_step_failure() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        let f = fault();
        let mut plan = plan_for_fault(&f, 0);
        let exec_action = plan.steps.iter().find(|s| s.step_type == crate::types::StepType::Execution).unwrap().action.clone();
        plan.rollback = Some(vec![plan.steps.iter().find(|s| s.step_type == crate::types::StepType::Execution).unwrap().clone()]);

        let result = orchestrator.recover_plan(plan, Arc::new(FailsCriticalStep(exec_action))).await;
        assert!(result.is_ok());
        let execution = result.unwrap().execution;
        assert_eq!(execution.status, crate::types::ExecutionStatus::RolledBack);
        assert!(!execution.result.as_ref().unwrap().successful);
    }

    #[test]
    fn priority_combines_severity_and_type_bonus() {
        let mut f = fault();
        f.severity = Severity::Critical;
        f.fault_type = FaultType::NodeFailure;
        assert_eq!(priority_for(&f), 12);
    }
}
