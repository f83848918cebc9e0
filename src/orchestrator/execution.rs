//! Step execution engine for a `RecoveryExecution`.
//!
//! Two dispatch modes share one per-step retry/timeout core: parallel
//! dispatch draws workers from a bounded semaphore pool (a bulkhead),
//! sequential walks plan order. Both honour `critical=true`
//! abort-and-rollback semantics.

use crate::capabilities::{ActionExecutor, HealingAction};
use crate::error::{FtcpError, FtcpResult};
use crate::ids::{EXECUTION_IDS, STEP_IDS};
use crate::orchestrator::dependency::dependencies_satisfied;
use crate::orchestrator::{RecoveryPlan, RecoveryStep};
use crate::types::{ExecutionStatus, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub status: StepStatus,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub current_step: Option<String>,
    pub percent_complete: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub successful: bool,
    pub error: Option<String>,
    pub rollback_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryExecution {
    pub id: String,
    pub plan_id: String,
    pub status: ExecutionStatus,
    pub step_executions: HashMap<String, StepExecution>,
    pub progress: Progress,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<ExecutionResult>,
}

impl RecoveryExecution {
    pub fn new(plan: &RecoveryPlan) -> Self {
        let step_executions = plan
            .steps
            .iter()
            .map(|s| {
                (
                    s.id.clone(),
                    StepExecution {
                        step_id: s.id.clone(),
                        status: StepStatus::Pending,
                        start: None,
                        end: None,
                        result: None,
                        error: None,
                    },
                )
            })
            .collect();
        Self {
            id: EXECUTION_IDS.mint(),
            plan_id: plan.id.clone(),
            status: ExecutionStatus::Pending,
            step_executions,
            progress: Progress {
                completed: 0,
                failed: 0,
                total: plan.steps.len(),
                current_step: None,
                percent_complete: 0.0,
            },
            started_at: None,
            finished_at: None,
            result: None,
        }
    }

    fn recompute_progress(&mut self) {
        let completed = self.step_executions.values().filter(|s| s.status == StepStatus::Completed).count();
        let failed = self.step_executions.values().filter(|s| s.status == StepStatus::Failed).count();
        let current_step = self
            .step_executions
            .values()
            .find(|s| s.status == StepStatus::Running)
            .map(|s| s.step_id.clone());
        let percent = if self.progress.total == 0 {
            100.0
        } else {
            100.0 * completed as f64 / self.progress.total as f64
        };
        self.progress = Progress {
            completed,
            failed,
            total: self.progress.total,
            current_step,
            percent_complete: percent.clamp(0.0, 100.0),
        };
    }
}

fn action_for(step: &RecoveryStep) -> HealingAction {
    let mut action = HealingAction::new(step.action.clone(), step.target.clone());
    for (k, v) in &step.parameters {
        action = action.with_parameter(k.clone(), v.clone());
    }
    action
}

/// Run `step` with exponentially-spaced retries (`attempt * 1s`) under
/// its own timeout, independent of the plan-wide timeout.
async fn run_step_with_retries(step: &RecoveryStep, executor: &dyn ActionExecutor) -> Result<String, FtcpError> {
    let mut attempt = 0u32;
    loop {
        let action = action_for(step);
        let outcome = tokio::time::timeout(step.timeout, executor.execute(&action)).await;
        match outcome {
            Ok(result) if result.success => {
                return Ok(STEP_IDS.mint());
            }
            Ok(result) => {
                if attempt >= step.retries {
                    return Err(FtcpError::StepExecution {
                        step_id: step.id.clone(),
                        action: step.action.clone(),
                        message: result.error.unwrap_or_else(|| "action reported failure".to_string()),
                        critical: step.critical,
                    });
                }
            }
            Err(_) => {
                if attempt >= step.retries {
                    return Err(FtcpError::StepExecution {
                        step_id: step.id.clone(),
                        action: step.action.clone(),
                        message: "step timed out".to_string(),
                        critical: step.critical,
                    });
                }
            }
        }
        attempt += 1;
        tokio::time::sleep(std::time::Duration::from_secs(attempt as u64)).await;
    }
}

/// Parallel dispatch: repeatedly find ready steps (dependencies complete,
/// not already running) and dispatch each onto a worker drawn from a
/// bounded semaphore pool.
pub async fn run_parallel(
    plan: &RecoveryPlan,
    execution: Arc<Mutex<RecoveryExecution>>,
    executor: Arc<dyn ActionExecutor>,
    max_concurrent: usize,
) -> FtcpResult<()> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let completed: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let running: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let aborted = Arc::new(AtomicUsize::new(0));

    loop {
        let ready: Vec<RecoveryStep> = {
            let completed = completed.lock().await;
            let running = running.lock().await;
            plan.steps
                .iter()
                .filter(|s| !completed.contains(&s.id) && !running.contains(&s.id))
                .filter(|s| dependencies_satisfied(s, &completed))
                .cloned()
                .collect()
        };

        if ready.is_empty() {
            let completed = completed.lock().await;
            if completed.len() == plan.steps.len() || aborted.load(Ordering::SeqCst) > 0 {
                break;
            }
            // steps remain but none are ready: waiting on in-flight work
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            continue;
        }

        let mut handles = Vec::new();
        for step in ready {
            if aborted.load(Ordering::SeqCst) > 0 {
                break;
            }
            running.lock().await.insert(step.id.clone());
            let permit = semaphore.clone().acquire_owned().await.map_err(|_| FtcpError::Capacity("worker pool closed".to_string()))?;
            let execution = execution.clone();
            let executor = executor.clone();
            let completed = completed.clone();
            let running = running.clone();
            let aborted = aborted.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                {
                    let mut exec = execution.lock().await;
                    if let Some(se) = exec.step_executions.get_mut(&step.id) {
                        se.status = StepStatus::Running;
                        se.start = Some(Utc::now());
                    }
                    exec.recompute_progress();
                }

                let result = run_step_with_retries(&step, executor.as_ref()).await;

                {
                    let mut exec = execution.lock().await;
                    if let Some(se) = exec.step_executions.get_mut(&step.id) {
                        se.end = Some(Utc::now());
                        match &result {
                            Ok(r) => {
                                se.status = StepStatus::Completed;
                                se.result = Some(r.clone());
                            }
                            Err(e) => {
                                se.status = StepStatus::Failed;
                                se.error = Some(e.to_string());
                            }
                        }
                    }
                    exec.recompute_progress();
                }

                running.lock().await.remove(&step.id);
                match result {
                    Ok(_) => {
                        completed.lock().await.insert(step.id.clone());
                        Ok(())
                    }
                    Err(e) => {
                        if step.critical {
                            aborted.fetch_add(1, Ordering::SeqCst);
                        } else {
                            completed.lock().await.insert(step.id.clone());
                        }
                        Err(e)
                    }
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    if aborted.load(Ordering::SeqCst) > 0 {
        return Err(FtcpError::StepExecution {
            step_id: "unknown".to_string(),
            action: "unknown".to_string(),
            message: "critical step failed".to_string(),
            critical: true,
        });
    }
    Ok(())
}

/// Sequential dispatch: walk plan order, requiring each step's
/// dependencies to already be `Completed`.
pub async fn run_sequential(
    plan: &RecoveryPlan,
    execution: Arc<Mutex<RecoveryExecution>>,
    executor: Arc<dyn ActionExecutor>,
) -> FtcpResult<()> {
    let mut completed: HashSet<String> = HashSet::new();

    for step in &plan.steps {
        if !dependencies_satisfied(step, &completed) {
            return Err(FtcpError::Dependency {
                kind: crate::error::DependencyErrorKind::UnresolvedReference(step.id.clone()),
            });
        }

        {
            let mut exec = execution.lock().await;
            if let Some(se) = exec.step_executions.get_mut(&step.id) {
                se.status = StepStatus::Running;
                se.start = Some(Utc::now());
            }
            exec.recompute_progress();
        }

        let result = run_step_with_retries(step, executor.as_ref()).await;

        {
            let mut exec = execution.lock().await;
            if let Some(se) = exec.step_executions.get_mut(&step.id) {
                se.end = Some(Utc::now());
                match &result {
                    Ok(r) => {
                        se.status = StepStatus::Completed;
                        se.result = Some(r.clone());
                    }
                    Err(e) => {
                        se.status = StepStatus::Failed;
                        se.error = Some(e.to_string());
                    }
                }
            }
            exec.recompute_progress();
        }

        match result {
            Ok(_) => {
                completed.insert(step.id.clone());
            }
            Err(e) => {
                if step.critical {
                    return Err(e);
                }
                completed.insert(step.id.clone());
            }
        }
    }

    Ok(())
}

/// Run the plan's rollback steps (reverse order, `rollback_<action>`)
/// sequentially, bounded by `rollback_timeout`. Stops at the first
/// failure but still reports it distinctly from the original error.
/// Rollback step outcomes are recorded into `execution` under a
/// `rollback:<id>` key so callers can observe their completion.
pub async fn run_rollback(
    rollback_steps: &[RecoveryStep],
    execution: &Arc<Mutex<RecoveryExecution>>,
    executor: &dyn ActionExecutor,
    rollback_timeout: std::time::Duration,
) -> Result<(), String> {
    for step in rollback_steps.iter().rev() {
        let mut rollback_step = step.clone();
        rollback_step.action = format!("rollback_{}", step.action);
        let key = format!("rollback:{}", step.id);

        {
            let mut exec = execution.lock().await;
            exec.step_executions.insert(
                key.clone(),
                StepExecution {
                    step_id: key.clone(),
                    status: StepStatus::Running,
                    start: Some(Utc::now()),
                    end: None,
                    result: None,
                    error: None,
                },
            );
        }

        let action = action_for(&rollback_step);
        let outcome = tokio::time::timeout(rollback_timeout, executor.execute(&action)).await;
        let mut exec = execution.lock().await;
        let entry = exec.step_executions.get_mut(&key).expect("just inserted");
        entry.end = Some(Utc::now());
        match outcome {
            Ok(result) if result.success => {
                entry.status = StepStatus::Completed;
            }
            Ok(result) => {
                let message = result.error.unwrap_or_else(|| "rollback step failed".to_string());
                entry.status = StepStatus::Failed;
                entry.error = Some(message.clone());
                return Err(message);
            }
            Err(_) => {
                let message = format!("rollback step {} timed out", step.id);
                entry.status = StepStatus::Failed;
                entry.error = Some(message.clone());
                return Err(message);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ActionOutcome;
    use crate::orchestrator::RecoveryPlan;
    use crate::types::{PlanConstraints, ResourceFootprint, StepType};
    use async_trait::async_trait;
    use std::time::Duration;

    struct AlwaysSucceeds;

    #[async_trait]
    impl ActionExecutor for AlwaysSucceeds {
        async fn execute(&self, _action: &HealingAction) -> ActionOutcome {
            ActionOutcome { success: true, duration: Duration::from_millis(1), error: None }
        }
    }

    struct FailsOn(String);

    #[async_trait]
    impl ActionExecutor for FailsOn {
        async fn execute(&self, action: &HealingAction) -> ActionOutcome {
            if action.target == self.0 {
                ActionOutcome { success: false, duration: Duration::from_millis(1), error: Some("boom".into()) }
            } else {
                ActionOutcome { success: true, duration: Duration::from_millis(1), error: None }
            }
        }
    }

    fn step(id: &str, deps: &[&str], critical: bool) -> RecoveryStep {
        RecoveryStep {
            id: id.to_string(),
            step_type: StepType::Execution,
            action: "restart_service".to_string(),
            target: id.to_string(),
            parameters: Default::default(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(5),
            retries: 0,
            critical,
            parallel: true,
            status: StepStatus::Pending,
        }
    }

    fn plan(steps: Vec<RecoveryStep>) -> RecoveryPlan {
        RecoveryPlan {
            id: "plan-1".to_string(),
            steps,
            resources: ResourceFootprint::default(),
            constraints: PlanConstraints::default(),
            rollback: None,
            priority: 0,
            estimated_time: Duration::from_secs(0),
        }
    }

    #[tokio::test]
    async fn sequential_run_completes_all_steps() {
        let p = plan(vec![step("a", &[], false), step("b", &["a"], false)]);
        let execution = Arc::new(Mutex::new(RecoveryExecution::new(&p)));
        run_sequential(&p, execution.clone(), Arc::new(AlwaysSucceeds)).await.unwrap();
        let exec = execution.lock().await;
        assert_eq!(exec.progress.completed, 2);
        assert_eq!(exec.progress.percent_complete, 100.0);
    }

    #[tokio::test]
    async fn sequential_aborts_on_critical_failure() {
        let p = plan(vec![step("a", &[], true), step("b", &["a"], false)]);
        let execution = Arc::new(Mutex::new(RecoveryExecution::new(&p)));
        let result = run_sequential(&p, execution.clone(), Arc::new(FailsOn("a".to_string()))).await;
        assert!(result.is_err());
        let exec = execution.lock().await;
        assert_eq!(exec.step_executions.get("b").unwrap().status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn parallel_run_completes_independent_steps() {
        let p = plan(vec![step("a", &[], false), step("b", &[], false)]);
        let execution = Arc::new(Mutex::new(RecoveryExecution::new(&p)));
        run_parallel(&p, execution.clone(), Arc::new(AlwaysSucceeds), 2).await.unwrap();
        let exec = execution.lock().await;
        assert_eq!(exec.progress.completed, 2);
    }

    #[tokio::test]
    async fn rollback_runs_in_reverse_order() {
        let steps = vec![step("a", &[], false), step("b", &["a"], false)];
        let p = plan(steps.clone());
        let execution = Arc::new(Mutex::new(RecoveryExecution::new(&p)));
        run_rollback(&steps, &execution, &AlwaysSucceeds, Duration::from_secs(5)).await.unwrap();
        let exec = execution.lock().await;
        assert_eq!(exec.step_executions.get("rollback:a").unwrap().status, StepStatus::Completed);
        assert_eq!(exec.step_executions.get("rollback:b").unwrap().status, StepStatus::Completed);
    }
}
