//! The built-in healing strategies.
//!
//! Each strategy is a small virtual-dispatch capability rather than a
//! tagged enum; no deep hierarchy is needed for five independent recovery
//! tactics.

use crate::capabilities::{ActionExecutor, HealingAction};
use crate::classifier::Fault;
use crate::healer::SystemState;
use crate::stats::ema_update;
use crate::types::{FaultType, Severity};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingResult {
    pub success: bool,
    pub actions: Vec<HealingAction>,
    pub duration: Duration,
    pub health_improvement: f64,
    pub resources_used: HashMap<String, f64>,
    pub confidence: f64,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A named healing capability with adaptive, internally-synchronised
/// performance state. `canHeal`/`heal` are pure from the caller's
/// perspective; `successRate`/`adaptiveWeight` evolve under this
/// strategy's own lock, never the healer's.
#[async_trait]
pub trait HealingStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> u8;
    fn can_heal(&self, fault: &Fault, state: &SystemState) -> bool;
    async fn heal(&self, executor: &dyn ActionExecutor, fault: &Fault, state: &SystemState) -> HealingResult;
    fn success_rate(&self) -> f64;
    fn adaptive_weight(&self) -> f64;
    fn recent_ema(&self) -> f64;
    fn update_performance(&self, success: bool);
}

/// Shared adaptive scoring state, composed into each built-in strategy
/// rather than duplicated.
struct AdaptiveState {
    success_rate: Mutex<f64>,
    adaptive_weight: Mutex<f64>,
    recent_ema: Mutex<f64>,
    alpha: f64,
}

impl AdaptiveState {
    fn new(alpha: f64) -> Self {
        Self {
            success_rate: Mutex::new(0.5),
            adaptive_weight: Mutex::new(0.5),
            recent_ema: Mutex::new(0.5),
            alpha,
        }
    }

    fn update(&self, success: bool) {
        let sample = if success { 1.0 } else { 0.0 };
        let mut rate = self.success_rate.lock();
        *rate = ema_update(*rate, sample, self.alpha);
        let mut recent = self.recent_ema.lock();
        *recent = ema_update(*recent, sample, 0.2);
        let mut weight = self.adaptive_weight.lock();
        *weight = ema_update(*weight, sample, 0.1);
    }
}

macro_rules! adaptive_impl {
    () => {
        fn success_rate(&self) -> f64 {
            *self.state.success_rate.lock()
        }
        fn adaptive_weight(&self) -> f64 {
            *self.state.adaptive_weight.lock()
        }
        fn recent_ema(&self) -> f64 {
            *self.state.recent_ema.lock()
        }
        fn update_performance(&self, success: bool) {
            self.state.update(success);
        }
    };
}

async fn timed_execute(executor: &dyn ActionExecutor, action: HealingAction) -> (bool, Duration, HealingAction) {
    let start = Instant::now();
    let outcome = executor.execute(&action).await;
    (outcome.success, start.elapsed(), action)
}

pub struct ServiceRestart {
    state: AdaptiveState,
}

impl ServiceRestart {
    pub fn new() -> Self {
        Self { state: AdaptiveState::new(0.1) }
    }
}

#[async_trait]
impl HealingStrategy for ServiceRestart {
    fn name(&self) -> &str {
        "service_restart"
    }
    fn priority(&self) -> u8 {
        7
    }
    fn can_heal(&self, fault: &Fault, _state: &SystemState) -> bool {
        matches!(fault.fault_type, FaultType::ServiceUnavailable | FaultType::PerformanceAnomaly)
    }
    async fn heal(&self, executor: &dyn ActionExecutor, fault: &Fault, _state: &SystemState) -> HealingResult {
        let action = HealingAction::new("restart_service", &fault.target);
        let (success, duration, action) = timed_execute(executor, action).await;
        HealingResult {
            success,
            actions: vec![action],
            duration,
            health_improvement: if success { 0.6 } else { 0.0 },
            resources_used: HashMap::new(),
            confidence: 0.7,
            metadata: HashMap::new(),
        }
    }
    adaptive_impl!();
}

pub struct ResourceReallocation {
    state: AdaptiveState,
}

impl ResourceReallocation {
    pub fn new() -> Self {
        Self { state: AdaptiveState::new(0.1) }
    }
}

#[async_trait]
impl HealingStrategy for ResourceReallocation {
    fn name(&self) -> &str {
        "resource_reallocation"
    }
    fn priority(&self) -> u8 {
        6
    }
    fn can_heal(&self, fault: &Fault, _state: &SystemState) -> bool {
        matches!(fault.fault_type, FaultType::ResourceExhaustion | FaultType::PerformanceAnomaly)
    }
    async fn heal(&self, executor: &dyn ActionExecutor, fault: &Fault, _state: &SystemState) -> HealingResult {
        let action = HealingAction::new("reallocate_resources", &fault.target);
        let (success, duration, action) = timed_execute(executor, action).await;
        HealingResult {
            success,
            actions: vec![action],
            duration,
            health_improvement: if success { 0.5 } else { 0.0 },
            resources_used: HashMap::new(),
            confidence: 0.6,
            metadata: HashMap::new(),
        }
    }
    adaptive_impl!();
}

pub struct LoadRedistribution {
    state: AdaptiveState,
}

impl LoadRedistribution {
    pub fn new() -> Self {
        Self { state: AdaptiveState::new(0.1) }
    }
}

#[async_trait]
impl HealingStrategy for LoadRedistribution {
    fn name(&self) -> &str {
        "load_redistribution"
    }
    fn priority(&self) -> u8 {
        5
    }
    fn can_heal(&self, fault: &Fault, _state: &SystemState) -> bool {
        matches!(fault.fault_type, FaultType::PerformanceAnomaly | FaultType::ResourceExhaustion)
    }
    async fn heal(&self, executor: &dyn ActionExecutor, fault: &Fault, _state: &SystemState) -> HealingResult {
        let action = HealingAction::new("redistribute_load", &fault.target);
        let (success, duration, action) = timed_execute(executor, action).await;
        HealingResult {
            success,
            actions: vec![action],
            duration,
            health_improvement: if success { 0.4 } else { 0.0 },
            resources_used: HashMap::new(),
            confidence: 0.55,
            metadata: HashMap::new(),
        }
    }
    adaptive_impl!();
}

pub struct Failover {
    state: AdaptiveState,
}

impl Failover {
    pub fn new() -> Self {
        Self { state: AdaptiveState::new(0.05) }
    }
}

#[async_trait]
impl HealingStrategy for Failover {
    fn name(&self) -> &str {
        "failover"
    }
    fn priority(&self) -> u8 {
        9
    }
    fn can_heal(&self, fault: &Fault, _state: &SystemState) -> bool {
        fault.severity == Severity::Critical || matches!(fault.fault_type, FaultType::NodeFailure | FaultType::ServiceUnavailable)
    }
    async fn heal(&self, executor: &dyn ActionExecutor, fault: &Fault, _state: &SystemState) -> HealingResult {
        let action = HealingAction::new("failover_node", &fault.target);
        let (success, duration, action) = timed_execute(executor, action).await;
        HealingResult {
            success,
            actions: vec![action],
            duration,
            health_improvement: if success { 0.8 } else { 0.0 },
            resources_used: HashMap::new(),
            confidence: 0.85,
            metadata: HashMap::new(),
        }
    }
    adaptive_impl!();
}

pub struct Scaling {
    state: AdaptiveState,
}

impl Scaling {
    pub fn new() -> Self {
        Self { state: AdaptiveState::new(0.1) }
    }
}

#[async_trait]
impl HealingStrategy for Scaling {
    fn name(&self) -> &str {
        "scaling"
    }
    fn priority(&self) -> u8 {
        4
    }
    fn can_heal(&self, fault: &Fault, _state: &SystemState) -> bool {
        matches!(fault.fault_type, FaultType::ResourceExhaustion | FaultType::PerformanceAnomaly)
    }
    async fn heal(&self, executor: &dyn ActionExecutor, fault: &Fault, _state: &SystemState) -> HealingResult {
        let action = HealingAction::new("scale_resources", &fault.target);
        let (success, duration, action) = timed_execute(executor, action).await;
        HealingResult {
            success,
            actions: vec![action],
            duration,
            health_improvement: if success { 0.45 } else { 0.0 },
            resources_used: HashMap::new(),
            confidence: 0.5,
            metadata: HashMap::new(),
        }
    }
    adaptive_impl!();
}
