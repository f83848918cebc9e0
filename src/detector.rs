//! Anomaly detector.
//!
//! Per metric, maintains a statistical model (Welford mean/stddev plus
//! periodically refreshed quartiles) or a learned model (bounded training
//! window, reconstruction-distance threshold). Detection and model update
//! are distinct steps: `detect` never mutates state, so concurrent
//! detectors observe stable statistics; `update` is called afterwards.

use crate::stats::{QuartileStats, WelfordStats};
use crate::types::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMethod {
    ZScore,
    Iqr,
    Learned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub metric: String,
    pub method: DetectionMethod,
    pub value: f64,
    pub deviation: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
}

impl AnomalyResult {
    fn new(metric: &str, method: DetectionMethod, value: f64, deviation: f64, threshold: f64) -> Self {
        let ratio = if threshold > 0.0 { deviation / threshold } else { deviation };
        Self {
            metric: metric.to_string(),
            method,
            value,
            deviation,
            threshold,
            severity: Severity::from_deviation_ratio(ratio),
            detected_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub enable_statistical: bool,
    pub enable_learned: bool,
    pub z_threshold: f64,
    pub min_samples: u64,
    pub quartile_refresh_every: u64,
    pub quartile_window: usize,
    pub learned_window: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enable_statistical: true,
            enable_learned: false,
            z_threshold: 2.0,
            min_samples: 30,
            quartile_refresh_every: 20,
            quartile_window: 200,
            learned_window: 100,
        }
    }
}

#[derive(Debug, Default)]
struct StatisticalModel {
    welford: WelfordStats,
    quartiles: QuartileStats,
    window: VecDeque<f64>,
}

#[derive(Debug, Default)]
struct LearnedModel {
    window: VecDeque<f64>,
    threshold: f64,
}

impl LearnedModel {
    /// Reconstruction distance: absolute deviation from the trailing
    /// window's mean, standing in for an autoencoder's reconstruction
    /// error without pulling in a model-serving dependency.
    fn reconstruction_distance(&self, x: f64) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let mean: f64 = self.window.iter().sum::<f64>() / self.window.len() as f64;
        (x - mean).abs()
    }

    fn update(&mut self, x: f64, max_window: usize) {
        self.window.push_back(x);
        while self.window.len() > max_window {
            self.window.pop_front();
        }
        if self.window.len() >= 2 {
            let mean: f64 = self.window.iter().sum::<f64>() / self.window.len() as f64;
            let max_dev = self
                .window
                .iter()
                .map(|v| (v - mean).abs())
                .fold(0.0_f64, f64::max);
            // Learned threshold tracks the largest deviation seen, with
            // headroom, rather than a fixed multiple of stddev.
            self.threshold = max_dev * 1.2;
        }
    }
}

pub struct Detector {
    config: DetectorConfig,
    statistical: HashMap<String, StatisticalModel>,
    learned: HashMap<String, LearnedModel>,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            statistical: HashMap::new(),
            learned: HashMap::new(),
        }
    }

    /// Run every enabled detection method for `metric` against `value`,
    /// without mutating any model. Returns one `AnomalyResult` per
    /// (metric, method) pair that triggered.
    pub fn detect(&self, metric: &str, value: f64) -> Vec<AnomalyResult> {
        let mut results = Vec::new();

        if self.config.enable_statistical {
            if let Some(model) = self.statistical.get(metric) {
                if model.welford.count() >= self.config.min_samples {
                    if let Some(z) = model.welford.z_score(value) {
                        if z > self.config.z_threshold {
                            results.push(AnomalyResult::new(
                                metric,
                                DetectionMethod::ZScore,
                                value,
                                z,
                                self.config.z_threshold,
                            ));
                        }
                    }
                }
                if model.quartiles.iqr() > 0.0 && model.quartiles.is_anomalous(value) {
                    let bound = if value > model.quartiles.q3 {
                        model.quartiles.q3 + 1.5 * model.quartiles.iqr()
                    } else {
                        model.quartiles.q1 - 1.5 * model.quartiles.iqr()
                    };
                    let deviation = (value - bound).abs();
                    results.push(AnomalyResult::new(
                        metric,
                        DetectionMethod::Iqr,
                        value,
                        deviation,
                        1.5 * model.quartiles.iqr(),
                    ));
                }
            }
        }

        if self.config.enable_learned {
            if let Some(model) = self.learned.get(metric) {
                if model.threshold > 0.0 {
                    let distance = model.reconstruction_distance(value);
                    if distance > model.threshold {
                        results.push(AnomalyResult::new(
                            metric,
                            DetectionMethod::Learned,
                            value,
                            distance,
                            model.threshold,
                        ));
                    }
                }
            }
        }

        results
    }

    /// Update online models for `metric` with `value`. Always called
    /// after `detect`, never before, so the statistics a detection was
    /// judged against remain stable through emission.
    pub fn update(&mut self, metric: &str, value: f64) {
        if self.config.enable_statistical {
            let model = self.statistical.entry(metric.to_string()).or_default();
            model.welford.update(value);
            model.window.push_back(value);
            while model.window.len() > self.config.quartile_window {
                model.window.pop_front();
            }
            let window: Vec<f64> = model.window.iter().copied().collect();
            model.quartiles.maybe_refresh(&window, self.config.quartile_refresh_every);
        }
        if self.config.enable_learned {
            let model = self.learned.entry(metric.to_string()).or_default();
            model.update(value, self.config.learned_window);
        }
    }

    pub fn sample_count(&self, metric: &str) -> u64 {
        self.statistical.get(metric).map(|m| m.welford.count()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(detector: &mut Detector, metric: &str, values: &[f64]) {
        for &v in values {
            detector.update(metric, v);
        }
    }

    #[test]
    fn no_anomaly_below_min_samples() {
        let mut detector = Detector::new(DetectorConfig {
            min_samples: 30,
            ..Default::default()
        });
        feed(&mut detector, "cpu_usage", &[1.0, 1.0, 1.0, 1.0, 100.0]);
        assert!(detector.detect("cpu_usage", 100.0).is_empty());
    }

    #[test]
    fn no_anomaly_when_sigma_zero() {
        let mut detector = Detector::new(DetectorConfig {
            min_samples: 1,
            ..Default::default()
        });
        feed(&mut detector, "latency", &vec![5.0; 50]);
        assert!(detector.detect("latency", 500.0).is_empty());
    }

    #[test]
    fn z_score_fires_on_outlier() {
        let mut detector = Detector::new(DetectorConfig {
            min_samples: 10,
            z_threshold: 2.0,
            ..Default::default()
        });
        let mut values = vec![10.0; 40];
        values.extend([10.1, 9.9, 10.2, 9.8]);
        feed(&mut detector, "error_rate", &values);
        let anomalies = detector.detect("error_rate", 1000.0);
        assert!(anomalies.iter().any(|a| a.method == DetectionMethod::ZScore));
    }

    #[test]
    fn severity_escalates_with_deviation() {
        let mut detector = Detector::new(DetectorConfig {
            min_samples: 5,
            z_threshold: 2.0,
            ..Default::default()
        });
        feed(&mut detector, "m", &vec![0.0; 40]);
        let anomalies = detector.detect("m", 100.0);
        let z = anomalies.iter().find(|a| a.method == DetectionMethod::ZScore).unwrap();
        assert_eq!(z.severity, Severity::Critical);
    }

    #[test]
    fn detect_does_not_mutate_state() {
        let mut detector = Detector::new(DetectorConfig {
            min_samples: 5,
            ..Default::default()
        });
        feed(&mut detector, "m", &vec![1.0; 40]);
        let before = detector.sample_count("m");
        let _ = detector.detect("m", 50.0);
        let _ = detector.detect("m", 50.0);
        assert_eq!(detector.sample_count("m"), before);
    }
}
