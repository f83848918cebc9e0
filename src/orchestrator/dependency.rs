//! Dependency graph construction and resolution for a `RecoveryPlan`.

use crate::error::{DependencyErrorKind, FtcpError, FtcpResult};
use crate::orchestrator::{RecoveryPlan, RecoveryStep};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// A dependency resolves against one of these predicate kinds, each
/// polled on a 1s tick until satisfied or `dependency_timeout` elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyKind {
    StepCompleted(String),
    NodeAvailable(String),
    ServiceHealthy(String),
    DataAvailable(String),
    NetworkAvailable(String),
}

/// Builds the directed graph from `step.dependencies` plus the
/// synthesised per-node/per-service availability dependencies, and
/// flags nodes with fan-out > 3 as cascade sources.
pub fn build_graph(plan: &RecoveryPlan) -> HashMap<String, Vec<DependencyKind>> {
    let mut graph: HashMap<String, Vec<DependencyKind>> = HashMap::new();
    let mut fan_out: HashMap<String, u32> = HashMap::new();

    for step in &plan.steps {
        let mut deps: Vec<DependencyKind> = step.dependencies.iter().cloned().map(DependencyKind::StepCompleted).collect();
        deps.push(DependencyKind::NodeAvailable(step.target.clone()));
        if step.action.contains("service") {
            deps.push(DependencyKind::ServiceHealthy(step.target.clone()));
        }
        *fan_out.entry(step.target.clone()).or_insert(0) += 1;
        graph.insert(step.id.clone(), deps);
    }

    for (target, count) in fan_out {
        if count > 3 {
            tracing::warn!(%target, %count, "node flagged as cascade source");
        }
    }

    graph
}

/// Validate the plan's dependency graph: acyclic, depth within bound,
/// every step-dependency ID resolves within the plan.
pub fn validate(plan: &RecoveryPlan, max_depth: usize) -> FtcpResult<()> {
    let ids: HashSet<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
    for step in &plan.steps {
        for dep in &step.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(FtcpError::Dependency {
                    kind: DependencyErrorKind::UnresolvedReference(dep.clone()),
                });
            }
        }
    }

    let adjacency: HashMap<&str, Vec<&str>> = plan
        .steps
        .iter()
        .map(|s| (s.id.as_str(), s.dependencies.iter().map(String::as_str).collect()))
        .collect();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut rec_stack: HashSet<&str> = HashSet::new();

    for step in &plan.steps {
        if !visited.contains(step.id.as_str()) {
            let depth = dfs(step.id.as_str(), &adjacency, &mut visited, &mut rec_stack)?;
            if depth > max_depth {
                return Err(FtcpError::Dependency {
                    kind: DependencyErrorKind::TooDeep { depth, max_depth },
                });
            }
        }
    }

    Ok(())
}

fn dfs<'a>(
    node: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
) -> FtcpResult<usize> {
    visited.insert(node);
    rec_stack.insert(node);

    let mut max_child_depth = 0;
    if let Some(children) = adjacency.get(node) {
        for &child in children {
            if rec_stack.contains(child) {
                return Err(FtcpError::Dependency { kind: DependencyErrorKind::Cyclic });
            }
            if !visited.contains(child) {
                let child_depth = dfs(child, adjacency, visited, rec_stack)?;
                max_child_depth = max_child_depth.max(child_depth);
            }
        }
    }

    rec_stack.remove(node);
    Ok(max_child_depth + 1)
}

/// Poll an async predicate at a 1s cadence until it holds or `timeout`
/// elapses, naming `dependency` in the resulting error.
pub async fn wait_for<F, Fut>(dependency: &str, mut predicate: F, timeout: Duration) -> FtcpResult<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        if predicate().await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(FtcpError::Dependency {
                kind: DependencyErrorKind::TimedOut { dependency: dependency.to_string() },
            });
        }
        tick.tick().await;
    }
}

/// Resolve whether `step`'s dependencies (as `StepStatus::Completed`
/// step IDs) are all satisfied, given the set of already-completed step
/// IDs in this execution.
pub fn dependencies_satisfied(step: &RecoveryStep, completed: &HashSet<String>) -> bool {
    step.dependencies.iter().all(|d| completed.contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{RecoveryPlan, RecoveryStep};
    use crate::types::{PlanConstraints, ResourceFootprint, StepStatus, StepType};
    use std::time::Duration as StdDuration;

    fn step(id: &str, deps: &[&str]) -> RecoveryStep {
        RecoveryStep {
            id: id.to_string(),
            step_type: StepType::Execution,
            action: "restart_service".to_string(),
            target: "node-0".to_string(),
            parameters: Default::default(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            timeout: StdDuration::from_secs(10),
            retries: 0,
            critical: false,
            parallel: false,
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
            estimated_time: StdDuration::from_secs(0),
        }
    }

    #[test]
    fn cyclic_dependency_is_rejected() {
        let p = plan(vec![step("a", &["b"]), step("b", &["a"])]);
        let err = validate(&p, 10).unwrap_err();
        match err {
            FtcpError::Dependency { kind: DependencyErrorKind::Cyclic } => {}
            other => panic!("expected cyclic dependency error, got {other:?}"),
        }
    }

    #[test]
    fn unresolved_dependency_reference_is_rejected() {
        let p = plan(vec![step("a", &["ghost"])]);
        let err = validate(&p, 10).unwrap_err();
        assert!(matches!(err, FtcpError::Dependency { kind: DependencyErrorKind::UnresolvedReference(_) }));
    }

    #[test]
    fn acyclic_chain_is_accepted() {
        let p = plan(vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])]);
        assert!(validate(&p, 10).is_ok());
    }

    #[test]
    fn depth_over_max_is_rejected() {
        let p = plan(vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])]);
        let err = validate(&p, 2).unwrap_err();
        assert!(matches!(err, FtcpError::Dependency { kind: DependencyErrorKind::TooDeep { .. } }));
    }
}
