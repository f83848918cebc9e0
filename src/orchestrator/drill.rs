//! Disaster-recovery drill scheduling.
//!
//! Not part of the fault/recovery request path; a periodic exercise of
//! the recovery orchestrator itself, run against a `DrillTarget`
//! (typically a staging deployment) rather than production faults.

use crate::capabilities::ActionExecutor;
use crate::ids::DRILL_IDS;
use chrono::{DateTime, Datelike, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrillType {
    RegionalFailover,
    DatabaseFailover,
    ServiceRestart,
    NetworkPartition,
    FullChaos,
}

impl std::fmt::Display for DrillType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RegionalFailover => "regional failover",
            Self::DatabaseFailover => "database failover",
            Self::ServiceRestart => "service restart",
            Self::NetworkPartition => "network partition",
            Self::FullChaos => "full chaos",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrillResult {
    pub id: String,
    pub drill_type: DrillType,
    pub environment: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub recovery_time_secs: Option<u64>,
}

#[derive(Debug, Clone)]
struct ScheduledDrill {
    drill_type: DrillType,
    environment: String,
    next_run: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DrillSchedulerConfig {
    pub max_duration_secs: u64,
    pub auto_rollback: bool,
}

impl Default for DrillSchedulerConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 3600,
            auto_rollback: true,
        }
    }
}

pub struct DrillScheduler {
    config: DrillSchedulerConfig,
    scheduled: Mutex<Vec<ScheduledDrill>>,
    history: Mutex<Vec<DrillResult>>,
}

impl DrillScheduler {
    pub fn new(config: DrillSchedulerConfig) -> Self {
        Self {
            config,
            scheduled: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn schedule_monthly_drill(&self, drill_type: DrillType, environment: impl Into<String>) {
        let next_run = next_first_of_month();
        self.scheduled.lock().push(ScheduledDrill {
            drill_type,
            environment: environment.into(),
            next_run,
        });
        tracing::info!(%drill_type, next_run = %next_run, "DR drill scheduled");
    }

    pub fn due_drills(&self, now: DateTime<Utc>) -> Vec<(DrillType, String)> {
        self.scheduled
            .lock()
            .iter()
            .filter(|d| d.next_run <= now)
            .map(|d| (d.drill_type, d.environment.clone()))
            .collect()
    }

    /// Run a drill against `executor`, simulating the drill's action and
    /// recording the outcome. Unlike fault recovery, a drill failure does
    /// not retry — it's reported and rolled back if configured to.
    pub async fn run_drill(&self, drill_type: DrillType, environment: &str, executor: &dyn ActionExecutor) -> DrillResult {
        let started_at = Utc::now();
        let action = crate::capabilities::HealingAction::new(drill_action(drill_type), environment);
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(self.config.max_duration_secs), executor.execute(&action)).await;

        let (success, error, recovery_time_secs) = match outcome {
            Ok(outcome) => (outcome.success, outcome.error, Some(outcome.duration.as_secs())),
            Err(_) => (false, Some("drill exceeded max duration".to_string()), None),
        };

        if !success && self.config.auto_rollback {
            let rollback_action = crate::capabilities::HealingAction::new(format!("rollback_{}", drill_action(drill_type)), environment);
            let _ = executor.execute(&rollback_action).await;
        }

        let result = DrillResult {
            id: DRILL_IDS.mint(),
            drill_type,
            environment: environment.to_string(),
            started_at,
            ended_at: Utc::now(),
            success,
            error,
            recovery_time_secs,
        };

        let mut history = self.history.lock();
        history.push(result.clone());
        result
    }

    pub fn average_rto_secs(&self) -> Option<f64> {
        let history = self.history.lock();
        let rtos: Vec<u64> = history.iter().filter_map(|r| r.recovery_time_secs).collect();
        if rtos.is_empty() {
            None
        } else {
            Some(rtos.iter().sum::<u64>() as f64 / rtos.len() as f64)
        }
    }

    pub fn history(&self) -> Vec<DrillResult> {
        self.history.lock().clone()
    }
}

fn drill_action(drill_type: DrillType) -> &'static str {
    match drill_type {
        DrillType::RegionalFailover => "drill_regional_failover",
        DrillType::DatabaseFailover => "drill_database_failover",
        DrillType::ServiceRestart => "drill_service_restart",
        DrillType::NetworkPartition => "drill_network_partition",
        DrillType::FullChaos => "drill_full_chaos",
    }
}

fn next_first_of_month() -> DateTime<Utc> {
    let now = Utc::now();
    let next = if now.day() == 1 && now.hour() < 3 {
        now
    } else if now.month() == 12 {
        now.with_year(now.year() + 1).and_then(|d| d.with_month(1)).and_then(|d| d.with_day(1)).unwrap_or(now)
    } else {
        now.with_month(now.month() + 1).and_then(|d| d.with_day(1)).unwrap_or(now)
    };
    next.with_hour(3).and_then(|d| d.with_minute(0)).and_then(|d| d.with_second(0)).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ActionOutcome;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::Rng;
    use rand::SeedableRng;
    use std::time::Duration;

    struct SimulatedDrillExecutor;

    #[async_trait]
    impl ActionExecutor for SimulatedDrillExecutor {
        async fn execute(&self, _action: &crate::capabilities::HealingAction) -> ActionOutcome {
            let mut rng = StdRng::seed_from_u64(7);
            let success = rng.gen_bool(0.9);
            ActionOutcome { success, duration: Duration::from_secs(42), error: if success { None } else { Some("drill failure".into()) } }
        }
    }

    #[tokio::test]
    async fn run_drill_records_history_and_rto() {
        let scheduler = DrillScheduler::new(DrillSchedulerConfig::default());
        let result = scheduler.run_drill(DrillType::RegionalFailover, "staging", &SimulatedDrillExecutor).await;
        assert_eq!(scheduler.history().len(), 1);
        if result.success {
            assert!(scheduler.average_rto_secs().is_some());
        }
    }

    #[test]
    fn scheduling_a_drill_sets_next_run_in_the_future() {
        let scheduler = DrillScheduler::new(DrillSchedulerConfig::default());
        scheduler.schedule_monthly_drill(DrillType::ServiceRestart, "staging");
        assert_eq!(scheduler.due_drills(Utc::now() - chrono::Duration::days(40)).len(), 0);
    }
}
