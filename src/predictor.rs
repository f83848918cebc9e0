//! Fault predictor.
//!
//! Fuses per-metric weighted models into predictions of impending faults,
//! with duplicate suppression, ensemble fusion across model sources, an
//! expiry rule, and an EMA-driven learning tick that rebalances feature
//! weights from observed accuracy.

use crate::capabilities::Node;
use crate::ids::PREDICTION_IDS;
use crate::stats::ema_update;
use crate::types::{FaultType, ModelType, PredictionStatus};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionModel {
    pub name: String,
    pub model_type: ModelType,
    pub features: Vec<String>,
    pub weights: HashMap<String, f64>,
    pub accuracy: f64,
    pub last_trained: DateTime<Utc>,
    /// Which predictor family this model represents, used to look up its
    /// ensemble fusion weight.
    pub source: String,
    pub predicted_type: FaultType,
    /// Score threshold above which this model's output becomes a candidate prediction.
    pub threshold: f64,
}

impl PredictionModel {
    /// Construct with weights drawn from a seeded PRNG in `[-0.5, 0.5]`.
    /// Seeding `StdRng` explicitly (instead of a wall-clock seed) keeps
    /// behaviour reproducible in tests.
    pub fn new(
        name: impl Into<String>,
        model_type: ModelType,
        features: Vec<String>,
        source: impl Into<String>,
        predicted_type: FaultType,
        threshold: f64,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let weights = features
            .iter()
            .map(|f| (f.clone(), rng.gen_range(-0.5..=0.5)))
            .collect();
        Self {
            name: name.into(),
            model_type,
            features,
            weights,
            accuracy: 0.5,
            last_trained: Utc::now(),
            source: source.into(),
            predicted_type,
            threshold,
        }
    }

    /// Weighted normalised sum over features present in `metrics`:
    /// `score = Σ(xi*wi) / Σ|wi|`.
    pub fn score(&self, metrics: &HashMap<String, f64>) -> f64 {
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for feature in &self.features {
            if let (Some(x), Some(w)) = (metrics.get(feature), self.weights.get(feature)) {
                numerator += x * w;
                denominator += w.abs();
            }
        }
        if denominator > 0.0 {
            numerator / denominator
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub predicted_type: FaultType,
    pub target: String,
    pub confidence: f64,
    pub time_to_failure: Duration,
    pub predicted_at: DateTime<Utc>,
    pub expected_at: DateTime<Utc>,
    pub status: PredictionStatus,
    pub actual_outcome: Option<bool>,
    pub source_models: Vec<String>,
    /// Set once this prediction's outcome has fed the source models'
    /// accuracy EMA, so `learning_tick` never re-applies the same
    /// outcome on a later tick.
    learned: bool,
}

impl Prediction {
    fn new(predicted_type: FaultType, target: impl Into<String>, confidence: f64, time_to_failure: Duration, source: &str) -> Self {
        let predicted_at = Utc::now();
        let expected_at = predicted_at + ChronoDuration::from_std(time_to_failure).unwrap_or_default();
        Self {
            id: PREDICTION_IDS.mint(),
            predicted_type,
            target: target.into(),
            confidence,
            time_to_failure,
            predicted_at,
            expected_at,
            status: PredictionStatus::Pending,
            actual_outcome: None,
            source_models: vec![source.to_string()],
            learned: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PredictorConfig {
    pub confidence_threshold: f64,
    pub prediction_horizon: Duration,
    pub ensemble_enabled: bool,
    pub ensemble_weights: HashMap<String, f64>,
    pub expiry_grace: Duration,
    pub max_history: usize,
    /// How far a model's score/confidence translates into time-to-failure:
    /// `ttf = base_time_to_failure * (1 - confidence)`.
    pub base_time_to_failure: Duration,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        let mut weights = HashMap::new();
        weights.insert("time_series".to_string(), 0.3);
        weights.insert("ml".to_string(), 0.4);
        weights.insert("trend".to_string(), 0.2);
        weights.insert("correlation".to_string(), 0.1);
        Self {
            confidence_threshold: 0.5,
            prediction_horizon: Duration::from_secs(30 * 60),
            ensemble_enabled: true,
            ensemble_weights: weights,
            expiry_grace: Duration::from_secs(5 * 60),
            max_history: 1000,
            base_time_to_failure: Duration::from_secs(30 * 60),
        }
    }
}

pub struct Predictor {
    config: PredictorConfig,
    models: HashMap<String, PredictionModel>,
    predictions: Vec<Prediction>,
}

impl Predictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            config,
            models: HashMap::new(),
            predictions: Vec::new(),
        }
    }

    pub fn register_model(&mut self, model: PredictionModel) {
        self.models.insert(model.name.clone(), model);
    }

    pub fn models(&self) -> impl Iterator<Item = &PredictionModel> {
        self.models.values()
    }

    pub fn pending_predictions(&self) -> impl Iterator<Item = &Prediction> {
        self.predictions.iter().filter(|p| p.status == PredictionStatus::Pending)
    }

    pub fn history(&self) -> &[Prediction] {
        &self.predictions
    }

    fn is_duplicate_pending(&self, target: &str, predicted_type: FaultType) -> bool {
        self.predictions
            .iter()
            .any(|p| p.status == PredictionStatus::Pending && p.target == target && p.predicted_type == predicted_type)
    }

    /// Run every registered model against `node`, apply the global
    /// confidence/horizon filter and duplicate suppression, optionally
    /// fuse same-(target,type) candidates via ensemble weighting, and
    /// record surviving predictions.
    pub fn predict(&mut self, node: &Node) -> Vec<Prediction> {
        let mut raw: Vec<(PredictionModel, f64)> = Vec::new();
        for model in self.models.values() {
            let score = model.score(&node.metrics);
            if score > model.threshold {
                raw.push((model.clone(), score));
            }
        }

        let mut candidates: Vec<Prediction> = Vec::new();
        if self.config.ensemble_enabled {
            let mut groups: HashMap<(String, FaultType), Vec<(PredictionModel, f64)>> = HashMap::new();
            for (model, score) in raw {
                groups
                    .entry((node.id.clone(), model.predicted_type))
                    .or_default()
                    .push((model, score));
            }
            for ((target, predicted_type), members) in groups {
                let count = members.len() as f64;
                let weighted_sum: f64 = members
                    .iter()
                    .map(|(m, score)| self.config.ensemble_weights.get(&m.source).copied().unwrap_or(0.25) * score)
                    .sum();
                let ensemble_confidence = if count > 0.0 { weighted_sum / count } else { 0.0 };
                let ttf = scale_ttf(self.config.base_time_to_failure, ensemble_confidence);
                let mut prediction = Prediction::new(predicted_type, target, ensemble_confidence, ttf, "ensemble");
                prediction.source_models = members.iter().map(|(m, _)| m.name.clone()).collect();
                candidates.push(prediction);
            }
        } else {
            for (model, score) in raw {
                let ttf = scale_ttf(self.config.base_time_to_failure, score);
                candidates.push(Prediction::new(model.predicted_type, node.id.clone(), score, ttf, &model.name));
            }
        }

        let mut accepted = Vec::new();
        for prediction in candidates {
            if prediction.confidence < self.config.confidence_threshold {
                continue;
            }
            if prediction.time_to_failure > self.config.prediction_horizon {
                continue;
            }
            if self.is_duplicate_pending(&prediction.target, prediction.predicted_type) {
                continue;
            }
            self.predictions.push(prediction.clone());
            accepted.push(prediction);
        }

        while self.predictions.len() > self.config.max_history {
            self.predictions.remove(0);
        }

        accepted
    }

    /// A fault arrived matching `(target, type)`: confirm any pending
    /// prediction for that pair within its expected window.
    pub fn record_matching_fault(&mut self, target: &str, fault_type: FaultType) {
        let now = Utc::now();
        for prediction in &mut self.predictions {
            if prediction.status == PredictionStatus::Pending && prediction.target == target && prediction.predicted_type == fault_type {
                let window_end = prediction.expected_at + ChronoDuration::from_std(self.config.expiry_grace).unwrap_or_default();
                if now <= window_end {
                    prediction.status = PredictionStatus::Confirmed;
                    prediction.actual_outcome = Some(true);
                }
            }
        }
    }

    /// Expire any `Pending` prediction whose `expected_at + grace` has
    /// passed without a matching fault.
    pub fn expire_tick(&mut self) {
        let now = Utc::now();
        for prediction in &mut self.predictions {
            if prediction.status == PredictionStatus::Pending {
                let deadline = prediction.expected_at + ChronoDuration::from_std(self.config.expiry_grace).unwrap_or_default();
                if now > deadline {
                    prediction.status = PredictionStatus::FalsePositive;
                    prediction.actual_outcome = Some(false);
                }
            }
        }
    }

    /// Learning tick: for every prediction whose
    /// outcome is now known and not yet learned from, EMA-update its
    /// source models' accuracy, then rebalance each model's feature
    /// weights by `w *= 0.5 + 0.5 * (accuracy / total_accuracy)`.
    pub fn learning_tick(&mut self) {
        const ALPHA: f64 = 0.1;
        let mut resolved: Vec<(String, bool)> = Vec::new();
        for prediction in &mut self.predictions {
            if prediction.learned {
                continue;
            }
            if let Some(outcome) = prediction.actual_outcome {
                for model_name in &prediction.source_models {
                    resolved.push((model_name.clone(), outcome));
                }
                prediction.learned = true;
            }
        }
        for (model_name, outcome) in &resolved {
            if let Some(model) = self.models.get_mut(model_name) {
                let sample = if *outcome { 1.0 } else { 0.0 };
                model.accuracy = ema_update(model.accuracy, sample, ALPHA);
                model.last_trained = Utc::now();
            }
        }

        let total_accuracy: f64 = self.models.values().map(|m| m.accuracy).sum();
        if total_accuracy > 0.0 {
            for model in self.models.values_mut() {
                let relative_accuracy = model.accuracy / total_accuracy;
                let factor = 0.5 + 0.5 * relative_accuracy;
                for weight in model.weights.values_mut() {
                    *weight *= factor;
                }
            }
        }
    }
}

fn scale_ttf(base: Duration, confidence: f64) -> Duration {
    let confidence = confidence.clamp(0.0, 1.0);
    Duration::from_secs_f64(base.as_secs_f64() * (1.0 - confidence).max(0.0))
}
