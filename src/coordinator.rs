//! Coordinator: composes the collector, detector, predictor, healer and
//! orchestrator behind one capability surface.
//!
//! Owns every sub-component by value and hands them capabilities rather
//! than back-pointers, so nothing below the coordinator ever calls back
//! into it.

use crate::capabilities::{ActionExecutor, Alert, AlertHandler, Node, NodeProvider};
use crate::classifier::{self, Fault};
use crate::collector::Collector;
use crate::config::{self, FtcpConfig};
use crate::detector::{Detector, DetectorConfig};
use crate::error::{FtcpError, FtcpResult};
use crate::healer::strategies::{Failover, HealingResult, LoadRedistribution, ResourceReallocation, Scaling, ServiceRestart};
use crate::healer::{Healer, HealerConfig, SystemState};
use crate::metrics::{EnhancedMetrics, MetricsCounters};
use crate::orchestrator::{Orchestrator, OrchestratorConfig, RecoveryResult};
use crate::predictor::{Prediction, PredictionModel, Predictor, PredictorConfig};
use crate::types::{FaultStatus, FaultType, Metadata, Severity};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Per-probe timeout applied by the spawned collector loop, independent
/// of the configured collection cadence.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Cadence of the spawned orchestration dispatch loop.
const DISPATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Handles for the background loops spawned by `start`, torn down by
/// `stop`.
struct Lifecycle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Coordinator {
    config: RwLock<FtcpConfig>,
    faults: RwLock<HashMap<String, Fault>>,
    collector: Arc<Collector>,
    detector: Mutex<Detector>,
    predictor: Mutex<Predictor>,
    healer: Healer,
    orchestrator: Orchestrator,
    node_provider: RwLock<Option<Arc<dyn NodeProvider>>>,
    alert_handlers: RwLock<Vec<Arc<dyn AlertHandler>>>,
    metrics: MetricsCounters,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl Coordinator {
    pub fn new(config: FtcpConfig) -> FtcpResult<Self> {
        config::validate(&config).map_err(FtcpError::Validation)?;

        let mut healer = Healer::new(HealerConfig::default());
        if config.self_healing.service_restart {
            healer.register_strategy(Arc::new(ServiceRestart::new()));
        }
        if config.self_healing.resource_reallocation {
            healer.register_strategy(Arc::new(ResourceReallocation::new()));
        }
        if config.self_healing.load_redistribution {
            healer.register_strategy(Arc::new(LoadRedistribution::new()));
        }
        if config.self_healing.enable_failover {
            healer.register_strategy(Arc::new(Failover::new()));
        }
        if config.self_healing.enable_scaling {
            healer.register_strategy(Arc::new(Scaling::new()));
        }

        let detector_config = DetectorConfig {
            enable_statistical: config.predictive_detection.enable_statistical,
            enable_learned: config.predictive_detection.enable_ml_detection,
            ..Default::default()
        };

        Ok(Self {
            config: RwLock::new(config.clone()),
            faults: RwLock::new(HashMap::new()),
            collector: Arc::new(Collector::new(1000)),
            detector: Mutex::new(Detector::new(detector_config)),
            predictor: Mutex::new(Predictor::new(PredictorConfig::default())),
            healer,
            orchestrator: Orchestrator::new(OrchestratorConfig {
                recovery_timeout: config.recovery_timeout,
                max_retries: config.max_retries,
                ..Default::default()
            }),
            node_provider: RwLock::new(None),
            alert_handlers: RwLock::new(Vec::new()),
            metrics: MetricsCounters::default(),
            lifecycle: Mutex::new(None),
        })
    }

    pub fn set_node_provider(&self, provider: Arc<dyn NodeProvider>) {
        *self.node_provider.write() = Some(provider.clone());
        self.orchestrator.set_node_provider(provider);
    }

    pub fn add_alert_handler(&self, handler: Arc<dyn AlertHandler>) {
        self.alert_handlers.write().push(handler);
    }

    pub async fn get_available_nodes(&self) -> Vec<Node> {
        let provider = self.node_provider.read().clone();
        match provider {
            Some(provider) => provider.nodes().await,
            None => Vec::new(),
        }
    }

    pub fn collector(&self) -> &Collector {
        self.collector.as_ref()
    }

    /// Spawn the collector, prediction, healing, learning-tick and
    /// orchestration-dispatch loops over one shared shutdown signal. A
    /// second call while already running is a no-op.
    pub fn start(self: &Arc<Self>, targets: Vec<String>, executor: Arc<dyn ActionExecutor>) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        {
            let health_check_interval = self.config.read().health_check_interval;
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(self.collector.clone().run(targets, health_check_interval, PROBE_TIMEOUT, rx)));
        }

        {
            let coordinator = self.clone();
            let interval = self.config.read().predictive_detection.prediction_interval;
            let mut rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = rx.changed() => if *rx.borrow() { return },
                        _ = tick.tick() => {
                            coordinator.run_prediction_cycle().await;
                            coordinator.expire_predictions();
                        }
                    }
                }
            }));
        }

        {
            let coordinator = self.clone();
            let executor = executor.clone();
            let interval = self.config.read().self_healing.healing_interval;
            let mut rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = rx.changed() => if *rx.borrow() { return },
                        _ = tick.tick() => {
                            let fault_ids: Vec<String> = {
                                let faults = coordinator.faults.read();
                                faults.values().filter(|f| !f.is_terminal()).map(|f| f.id.clone()).collect()
                            };
                            for fault_id in fault_ids {
                                let _ = coordinator.heal_fault(&fault_id, executor.clone()).await;
                            }
                        }
                    }
                }
            }));
        }

        {
            let coordinator = self.clone();
            let interval = self.config.read().self_healing.learning_interval;
            let mut rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = rx.changed() => if *rx.borrow() { return },
                        _ = tick.tick() => coordinator.learning_tick(),
                    }
                }
            }));
        }

        {
            let coordinator = self.clone();
            let executor = executor.clone();
            let mut rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(DISPATCH_INTERVAL);
                loop {
                    tokio::select! {
                        _ = rx.changed() => if *rx.borrow() { return },
                        _ = tick.tick() => coordinator.orchestrator.dispatch_tick(executor.clone()).await,
                    }
                }
            }));
        }

        *lifecycle = Some(Lifecycle { shutdown_tx, tasks });
    }

    /// Signal every spawned loop to stop and wait for each to exit.
    /// A call while not running is a no-op.
    pub async fn stop(&self) {
        let lifecycle = {
            let mut guard = self.lifecycle.lock();
            guard.take()
        };
        if let Some(lifecycle) = lifecycle {
            let _ = lifecycle.shutdown_tx.send(true);
            for task in lifecycle.tasks {
                let _ = task.await;
            }
        }
    }

    /// Register a fault directly, bypassing the detector/classifier
    /// pipeline. Each call mints a fresh fault ID; faults are never
    /// deduplicated (only predictions are).
    pub fn detect_fault(&self, fault_type: FaultType, target: impl Into<String>, description: impl Into<String>, metadata: Metadata) -> Fault {
        let mut fault = Fault::new(fault_type, Severity::Medium, target, description);
        fault.metadata = metadata;
        self.faults.write().insert(fault.id.clone(), fault.clone());
        self.metrics.record_fault_detected();
        fault
    }

    /// Run the classifier over a snapshot plus the detector's current
    /// anomalies for `metric_values`, registering a fault if warranted.
    pub fn observe(&self, target: &str, metric_values: &[(&str, f64)], health_score_threshold: f64) -> Option<Fault> {
        let snapshot = {
            let mut anomalies = Vec::new();
            let detector = self.detector.lock();
            for (metric, value) in metric_values {
                anomalies.extend(detector.detect(metric, *value));
            }
            drop(detector);

            let mut detector = self.detector.lock();
            for (metric, value) in metric_values {
                detector.update(metric, *value);
            }
            drop(detector);

            anomalies
        };

        let health_snapshot = crate::collector::HealthSnapshot {
            target: target.to_string(),
            healthy: true,
            metrics: metric_values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            timestamp: Utc::now(),
        };

        let fault = classifier::classify(&health_snapshot, &snapshot, health_score_threshold)?;
        self.faults.write().insert(fault.id.clone(), fault.clone());
        self.metrics.record_fault_detected();
        Some(fault)
    }

    pub fn get_fault(&self, fault_id: &str) -> Option<Fault> {
        self.faults.read().get(fault_id).cloned()
    }

    pub fn register_prediction_model(&self, model: PredictionModel) {
        self.predictor.lock().register_model(model);
    }

    /// Run the predictor against every node the injected `NodeProvider`
    /// reports, emitting a fault for any prediction the healer judges
    /// worth acting on pre-emptively and raising an alert for the rest.
    pub async fn run_prediction_cycle(&self) -> Vec<Prediction> {
        let nodes = self.get_available_nodes().await;
        let mut all_predictions = Vec::new();
        for node in &nodes {
            let predictions = self.predictor.lock().predict(node);
            for prediction in predictions {
                self.metrics.record_prediction(false);
                if self.healer.should_predictively_heal(&prediction) {
                    self.detect_fault(
                        prediction.predicted_type,
                        prediction.target.clone(),
                        format!("predicted {} with confidence {:.2}", prediction.predicted_type, prediction.confidence),
                        Metadata::new(),
                    );
                } else {
                    self.raise_alert(Alert {
                        level: "warning".to_string(),
                        source: "predictor".to_string(),
                        message: format!("predicted {} for {}", prediction.predicted_type, prediction.target),
                        metadata: Metadata::new(),
                    })
                    .await;
                }
                all_predictions.push(prediction);
            }
        }
        all_predictions
    }

    pub fn expire_predictions(&self) {
        self.predictor.lock().expire_tick();
    }

    /// Drive both components' adaptive learning ticks together on the
    /// coordinator's periodic maintenance loop.
    pub fn learning_tick(&self) {
        self.healer.learning_tick();
        self.predictor.lock().learning_tick();
    }

    pub async fn raise_alert(&self, alert: Alert) {
        let handlers: Vec<_> = self.alert_handlers.read().iter().cloned().collect();
        for handler in handlers.iter() {
            if let Err(err) = handler.handle(&alert).await {
                tracing::warn!(%err, handler = %alert.source, "alert handler failed");
            }
        }
    }

    fn default_system_state(&self) -> SystemState {
        let faults = self.faults.read();
        let active_faults = faults.values().filter(|f| !f.is_terminal()).count();
        SystemState {
            overall_health: 1.0,
            component_health: HashMap::new(),
            resource_usage: HashMap::new(),
            performance: HashMap::new(),
            active_faults,
            active_predictions: 0,
            timestamp: Utc::now(),
        }
    }

    pub async fn heal_fault(&self, fault_id: &str, executor: Arc<dyn ActionExecutor>) -> FtcpResult<HealingResult> {
        let mut fault = self
            .faults
            .read()
            .get(fault_id)
            .cloned()
            .ok_or_else(|| FtcpError::Validation(format!("unknown fault id: {fault_id}")))?;

        let state = self.default_system_state();
        let result = self.healer.heal_fault(&mut fault, &state, executor.as_ref()).await;

        self.metrics.record_healing(result.is_ok());
        if fault.status == FaultStatus::Resolved {
            self.metrics.record_fault_resolved();
        } else if fault.status == FaultStatus::Persistent {
            self.metrics.record_fault_persistent();
        }
        self.faults.write().insert(fault.id.clone(), fault);
        result
    }

    pub async fn recover(&self, fault_id: &str, executor: Arc<dyn ActionExecutor>) -> FtcpResult<RecoveryResult> {
        let mut fault = self
            .faults
            .read()
            .get(fault_id)
            .cloned()
            .ok_or_else(|| FtcpError::Validation(format!("unknown fault id: {fault_id}")))?;

        if fault.status == FaultStatus::Detected {
            let _ = fault.transition_to(FaultStatus::Recovering);
        }

        let result = self.orchestrator.recover(&fault, executor).await;
        self.metrics.record_recovery(matches!(&result, Ok(r) if r.successful));

        match &result {
            Ok(r) if r.successful => {
                let _ = fault.transition_to(FaultStatus::Resolved);
                self.metrics.record_fault_resolved();
            }
            Ok(_) => {
                let _ = fault.transition_to(FaultStatus::Persistent);
                self.metrics.record_fault_persistent();
            }
            Err(_) => {}
        }
        self.faults.write().insert(fault.id.clone(), fault);
        result
    }

    pub fn get_metrics(&self) -> EnhancedMetrics {
        self.metrics.snapshot()
    }

    pub fn get_effective_config(&self) -> FtcpConfig {
        self.config.read().clone()
    }

    /// Initial configuration load — no prior effective config to roll
    /// back to, so a validation failure simply leaves the previous
    /// (default-constructed) config in place, same as reload.
    pub fn load_configuration(&self, candidate: FtcpConfig) -> Result<(), String> {
        let mut current = self.config.write();
        config::reload(&mut current, candidate)
    }

    /// Snapshot, validate, apply under the write lock, restore on
    /// failure. The system never runs with a partially-applied config.
    pub fn reload_configuration(&self, candidate: FtcpConfig) -> Result<(), String> {
        let mut current = self.config.write();
        config::reload(&mut current, candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{ActionOutcome, HealingAction};
    use async_trait::async_trait;
    use std::time::Duration;

    struct AlwaysSucceeds;

    #[async_trait]
    impl ActionExecutor for AlwaysSucceeds {
        async fn execute(&self, _action: &HealingAction) -> ActionOutcome {
            ActionOutcome { success: true, duration: Duration::from_millis(1), error: None }
        }
    }

    #[test]
    fn detect_fault_never_deduplicates() {
        let coordinator = Coordinator::new(FtcpConfig::default()).unwrap();
        let a = coordinator.detect_fault(FaultType::NodeFailure, "node-0", "test", Metadata::new());
        let b = coordinator.detect_fault(FaultType::NodeFailure, "node-0", "test", Metadata::new());
        assert_ne!(a.id, b.id);
        assert_eq!(coordinator.get_metrics().faults_detected, 2);
    }

    #[tokio::test]
    async fn recover_resolves_fault_and_updates_metrics() {
        let coordinator = Coordinator::new(FtcpConfig::default()).unwrap();
        let fault = coordinator.detect_fault(FaultType::NodeFailure, "node-0", "test", Metadata::new());
        let result = coordinator.recover(&fault.id, Arc::new(AlwaysSucceeds)).await.unwrap();
        assert!(result.successful);
        assert_eq!(coordinator.get_fault(&fault.id).unwrap().status, FaultStatus::Resolved);
        assert_eq!(coordinator.get_metrics().faults_resolved, 1);
    }

    #[test]
    fn reload_configuration_rolls_back_on_failure() {
        let coordinator = Coordinator::new(FtcpConfig::default()).unwrap();
        let mut bad = coordinator.get_effective_config();
        bad.retry_attempts = 255;
        let err = coordinator.reload_configuration(bad);
        assert!(err.is_err());
        assert_eq!(coordinator.get_effective_config().replication_factor, 2);
    }

    #[test]
    fn constructing_with_invalid_config_is_rejected() {
        let mut config = FtcpConfig::default();
        config.retry_attempts = 255;
        assert!(Coordinator::new(config).is_err());
    }
}
