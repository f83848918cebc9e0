//! Self-healer: owns the strategy registry, scores and selects a strategy
//! per fault, records `HealingAttempt` history, and wraps each target in a
//! circuit breaker so a strategy that keeps failing against the same
//! target stops being retried immediately.

pub mod strategies;

use crate::capabilities::ActionExecutor;
use crate::classifier::Fault;
use crate::error::{FtcpError, FtcpResult};
use crate::ids::HEALING_ATTEMPT_IDS;
use crate::predictor::Prediction;
use crate::types::{FaultStatus, FaultType};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use strategies::{HealingResult, HealingStrategy};

/// Read-only snapshot of overall system condition, passed to `can_heal`
/// and `heal`. Always a fresh value, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemState {
    pub overall_health: f64,
    pub component_health: HashMap<String, f64>,
    pub resource_usage: HashMap<String, f64>,
    pub performance: HashMap<String, f64>,
    pub active_faults: usize,
    pub active_predictions: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingAttempt {
    pub id: String,
    pub fault_id: String,
    pub strategy: String,
    pub target: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: Duration,
    pub success: bool,
    pub actions: Vec<crate::capabilities::HealingAction>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-target circuit breaker, opened after repeated strategy failures
/// against the same target (failure_threshold 5, success_threshold 3,
/// reset after 30s).
struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    const FAILURE_THRESHOLD: u32 = 5;
    const SUCCESS_THRESHOLD: u32 = 3;
    const RESET_TIMEOUT_SECS: i64 = 30;

    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
        }
    }

    fn is_allowed(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if let Some(last) = self.last_failure {
                    if Utc::now() - last > ChronoDuration::seconds(Self::RESET_TIMEOUT_SECS) {
                        self.state = CircuitState::HalfOpen;
                        self.success_count = 0;
                        return true;
                    }
                }
                false
            }
            CircuitState::HalfOpen => true,
        }
    }

    fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= Self::SUCCESS_THRESHOLD {
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure = Some(Utc::now());
        match self.state {
            CircuitState::Closed if self.failure_count >= Self::FAILURE_THRESHOLD => {
                self.state = CircuitState::Open;
            }
            CircuitState::HalfOpen => self.state = CircuitState::Open,
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealerConfig {
    pub healing_timeout: Duration,
    pub max_healing_history: usize,
    pub learning_enabled: bool,
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub predictive_confidence_threshold: f64,
    pub predictive_horizon: Duration,
}

impl Default for HealerConfig {
    fn default() -> Self {
        Self {
            healing_timeout: Duration::from_secs(30),
            max_healing_history: 500,
            learning_enabled: true,
            min_threshold: 0.3,
            max_threshold: 0.9,
            predictive_confidence_threshold: 0.8,
            predictive_horizon: Duration::from_secs(10 * 60),
        }
    }
}

/// A batchable healing candidate surfaced by the proactive sweep: a
/// resource, performance, or predictive-healing opportunity.
#[derive(Debug, Clone)]
pub enum HealingOpportunity {
    ResourceOptimization { target: String, usage: f64 },
    PerformanceOptimization { target: String, performance: f64 },
    PredictiveHealing { target: String, predicted_type: FaultType, confidence: f64 },
}

pub struct Healer {
    config: HealerConfig,
    strategies: HashMap<String, Arc<dyn HealingStrategy>>,
    history: Mutex<VecDeque<HealingAttempt>>,
    circuits: Mutex<HashMap<String, CircuitBreaker>>,
    healing_threshold: Mutex<f64>,
}

impl Healer {
    pub fn new(config: HealerConfig) -> Self {
        let threshold = (config.min_threshold + config.max_threshold) / 2.0;
        Self {
            config,
            strategies: HashMap::new(),
            history: Mutex::new(VecDeque::new()),
            circuits: Mutex::new(HashMap::new()),
            healing_threshold: Mutex::new(threshold),
        }
    }

    pub fn register_strategy(&mut self, strategy: Arc<dyn HealingStrategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn history(&self) -> Vec<HealingAttempt> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn healing_threshold(&self) -> f64 {
        *self.healing_threshold.lock()
    }

    /// Filter by `can_heal`, score the survivors, rank highest first.
    /// Ties break on higher priority, then lexicographic name.
    /// `heal_fault` walks this ranking trying successive candidates.
    fn ranked_candidates(&self, fault: &Fault, state: &SystemState) -> Vec<Arc<dyn HealingStrategy>> {
        let mut candidates: Vec<Arc<dyn HealingStrategy>> = self
            .strategies
            .values()
            .filter(|s| s.can_heal(fault, state))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            score(b.as_ref())
                .partial_cmp(&score(a.as_ref()))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.priority().cmp(&a.priority()))
                .then_with(|| a.name().cmp(b.name()))
        });
        candidates
    }

    fn circuit_allows(&self, target: &str) -> bool {
        let mut circuits = self.circuits.lock();
        circuits.entry(target.to_string()).or_insert_with(CircuitBreaker::new).is_allowed()
    }

    fn circuit_record(&self, target: &str, success: bool) {
        let mut circuits = self.circuits.lock();
        let breaker = circuits.entry(target.to_string()).or_insert_with(CircuitBreaker::new);
        if success {
            breaker.record_success();
        } else {
            breaker.record_failure();
        }
    }

    fn record(&self, attempt: HealingAttempt) {
        let mut history = self.history.lock();
        history.push_back(attempt);
        while history.len() > self.config.max_healing_history {
            history.pop_front();
        }
    }

    /// Select, run, and record one healing attempt for `fault`, trying
    /// successive ranked candidates until one succeeds or all are
    /// exhausted. On total exhaustion the fault transitions to
    /// `Persistent`.
    pub async fn heal_fault(
        &self,
        fault: &mut Fault,
        state: &SystemState,
        executor: &dyn ActionExecutor,
    ) -> FtcpResult<HealingResult> {
        let candidates = self.ranked_candidates(fault, state);
        if candidates.is_empty() {
            return Err(FtcpError::StrategyUnsuitable {
                fault_id: fault.id.clone(),
                fault_type: fault.fault_type.to_string(),
            });
        }

        if fault.status == FaultStatus::Detected {
            let _ = fault.transition_to(FaultStatus::Recovering);
        }

        let mut last_error: Option<String> = None;
        for strategy in candidates {
            if !self.circuit_allows(&fault.target) {
                last_error = Some(format!("circuit open for target {}", fault.target));
                continue;
            }

            let start_time = Utc::now();
            let outcome = tokio::time::timeout(self.config.healing_timeout, strategy.heal(executor, fault, state)).await;

            let result = match outcome {
                Ok(result) => result,
                Err(_) => {
                    self.circuit_record(&fault.target, false);
                    strategy.update_performance(false);
                    last_error = Some(format!("strategy {} timed out", strategy.name()));
                    self.record(HealingAttempt {
                        id: HEALING_ATTEMPT_IDS.mint(),
                        fault_id: fault.id.clone(),
                        strategy: strategy.name().to_string(),
                        target: fault.target.clone(),
                        start_time,
                        end_time: Utc::now(),
                        duration: self.config.healing_timeout,
                        success: false,
                        actions: Vec::new(),
                        error: last_error.clone(),
                    });
                    continue;
                }
            };

            let end_time = Utc::now();
            self.record(HealingAttempt {
                id: HEALING_ATTEMPT_IDS.mint(),
                fault_id: fault.id.clone(),
                strategy: strategy.name().to_string(),
                target: fault.target.clone(),
                start_time,
                end_time,
                duration: result.duration,
                success: result.success,
                actions: result.actions.clone(),
                error: if result.success { None } else { Some("strategy reported failure".to_string()) },
            });

            strategy.update_performance(result.success);
            self.circuit_record(&fault.target, result.success);

            if result.success {
                let _ = fault.transition_to(FaultStatus::Resolved);
                return Ok(result);
            }
            last_error = Some(format!("strategy {} failed", strategy.name()));
        }

        let _ = fault.transition_to(FaultStatus::Persistent);
        Err(FtcpError::StrategyExecution {
            strategy: "exhausted".to_string(),
            fault_id: fault.id.clone(),
            message: last_error.unwrap_or_else(|| "no strategy succeeded".to_string()),
        })
    }

    /// True when a prediction is confident and near-term enough that the
    /// coordinator should synthesise a fault and run it through the
    /// normal healing path instead of just alerting.
    pub fn should_predictively_heal(&self, prediction: &Prediction) -> bool {
        prediction.confidence > self.config.predictive_confidence_threshold
            && prediction.time_to_failure < self.config.predictive_horizon
    }

    /// Adaptive threshold adjustment from recent success rate: raise when
    /// struggling, lower when comfortably succeeding, bounded to
    /// `[min_threshold, max_threshold]`.
    pub fn learning_tick(&self) {
        if !self.config.learning_enabled {
            return;
        }
        let history = self.history.lock();
        let window: Vec<&HealingAttempt> = history.iter().rev().take(20).collect();
        if window.is_empty() {
            return;
        }
        let successes = window.iter().filter(|a| a.success).count() as f64;
        let recent_rate = successes / window.len() as f64;
        drop(history);

        let mut threshold = self.healing_threshold.lock();
        if recent_rate < 0.6 {
            *threshold = (*threshold + 0.05).min(self.config.max_threshold);
        } else if recent_rate > 0.8 {
            *threshold = (*threshold - 0.05).max(self.config.min_threshold);
        }
    }

    /// Proactive sweep: surface healing opportunities from current state
    /// and predictions without waiting for a `Fault`.
    pub fn healing_opportunities(&self, state: &SystemState, predictions: &[Prediction]) -> Vec<HealingOpportunity> {
        let mut opportunities = Vec::new();
        for (target, usage) in &state.resource_usage {
            if *usage > 0.9 {
                opportunities.push(HealingOpportunity::ResourceOptimization {
                    target: target.clone(),
                    usage: *usage,
                });
            }
        }
        for (target, performance) in &state.performance {
            if *performance < 0.5 {
                opportunities.push(HealingOpportunity::PerformanceOptimization {
                    target: target.clone(),
                    performance: *performance,
                });
            }
        }
        for prediction in predictions {
            if prediction.confidence > 0.7 {
                opportunities.push(HealingOpportunity::PredictiveHealing {
                    target: prediction.target.clone(),
                    predicted_type: prediction.predicted_type,
                    confidence: prediction.confidence,
                });
            }
        }
        opportunities
    }
}

/// `score = priority/10 + 0.5*successRate + 0.3*adaptiveWeight + 0.2*recentEMA`.
fn score(strategy: &dyn HealingStrategy) -> f64 {
    strategy.priority() as f64 / 10.0 + 0.5 * strategy.success_rate() + 0.3 * strategy.adaptive_weight() + 0.2 * strategy.recent_ema()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ActionOutcome;
    use async_trait::async_trait;
    use strategies::{Failover, ServiceRestart};

    struct AlwaysSucceeds;

    #[async_trait]
    impl ActionExecutor for AlwaysSucceeds {
        async fn execute(&self, _action: &crate::capabilities::HealingAction) -> ActionOutcome {
            ActionOutcome { success: true, duration: Duration::from_millis(1), error: None }
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl ActionExecutor for AlwaysFails {
        async fn execute(&self, _action: &crate::capabilities::HealingAction) -> ActionOutcome {
            ActionOutcome { success: false, duration: Duration::from_millis(1), error: Some("boom".into()) }
        }
    }

    fn empty_state() -> SystemState {
        SystemState {
            overall_health: 1.0,
            component_health: HashMap::new(),
            resource_usage: HashMap::new(),
            performance: HashMap::new(),
            active_faults: 0,
            active_predictions: 0,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn heal_fault_selects_failover_for_node_failure_and_resolves() {
        let mut healer = Healer::new(HealerConfig::default());
        healer.register_strategy(Arc::new(Failover::new()));
        healer.register_strategy(Arc::new(ServiceRestart::new()));
        let mut fault = Fault::new(FaultType::NodeFailure, crate::types::Severity::High, "node-0", "test");
        let result = healer.heal_fault(&mut fault, &empty_state(), &AlwaysSucceeds).await.unwrap();
        assert!(result.success);
        assert_eq!(fault.status, FaultStatus::Resolved);
        assert_eq!(healer.history().len(), 1);
    }

    #[tokio::test]
    async fn exhausting_all_strategies_marks_fault_persistent() {
        let mut healer = Healer::new(HealerConfig::default());
        healer.register_strategy(Arc::new(Failover::new()));
        let mut fault = Fault::new(FaultType::NodeFailure, crate::types::Severity::High, "node-0", "test");
        let result = healer.heal_fault(&mut fault, &empty_state(), &AlwaysFails).await;
        assert!(result.is_err());
        assert_eq!(fault.status, FaultStatus::Persistent);
    }

    #[tokio::test]
    async fn no_applicable_strategy_is_strategy_unsuitable() {
        let healer = Healer::new(HealerConfig::default());
        let mut fault = Fault::new(FaultType::NodeFailure, crate::types::Severity::High, "node-0", "test");
        let err = healer.heal_fault(&mut fault, &empty_state(), &AlwaysSucceeds).await.unwrap_err();
        assert!(matches!(err, FtcpError::StrategyUnsuitable { .. }));
    }

    #[test]
    fn history_ring_buffer_is_bounded() {
        let healer = Healer::new(HealerConfig {
            max_healing_history: 2,
            ..Default::default()
        });
        for i in 0..5 {
            healer.record(HealingAttempt {
                id: format!("a-{i}"),
                fault_id: "f".into(),
                strategy: "service_restart".into(),
                target: "node-0".into(),
                start_time: Utc::now(),
                end_time: Utc::now(),
                duration: Duration::from_millis(1),
                success: true,
                actions: Vec::new(),
                error: None,
            });
        }
        assert_eq!(healer.history().len(), 2);
    }
}
