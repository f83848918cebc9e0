//! Configuration surface and validator.
//!
//! Hot-reload follows snapshot -> validate -> apply -> rollback-on-failure
//!: the system never runs with a partially-applied
//! configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictiveDetectionConfig {
    pub confidence_threshold: f64,
    pub threshold: f64,
    pub prediction_interval: Duration,
    pub window_size: Duration,
    pub enable_ml_detection: bool,
    pub enable_statistical: bool,
    pub enable_pattern_recognition: bool,
    pub enabled: bool,
}

impl Default for PredictiveDetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            threshold: 0.6,
            prediction_interval: Duration::from_secs(60),
            window_size: Duration::from_secs(300),
            enable_ml_detection: false,
            enable_statistical: true,
            enable_pattern_recognition: false,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfHealingConfig {
    pub healing_threshold: f64,
    pub healing_interval: Duration,
    pub monitoring_interval: Duration,
    pub learning_interval: Duration,
    pub service_restart: bool,
    pub resource_reallocation: bool,
    pub load_redistribution: bool,
    pub enable_failover: bool,
    pub enable_scaling: bool,
    pub enable_predictive: bool,
}

impl Default for SelfHealingConfig {
    fn default() -> Self {
        Self {
            healing_threshold: 0.6,
            healing_interval: Duration::from_secs(60),
            monitoring_interval: Duration::from_secs(10),
            learning_interval: Duration::from_secs(120),
            service_restart: true,
            resource_reallocation: true,
            load_redistribution: true,
            enable_failover: true,
            enable_scaling: true,
            enable_predictive: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedundancyConfig {
    pub default_factor: u32,
    pub max_factor: u32,
    pub update_interval: Duration,
}

impl Default for RedundancyConfig {
    fn default() -> Self {
        Self {
            default_factor: 2,
            max_factor: 4,
            update_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceTrackingConfig {
    pub window_size: Duration,
}

impl Default for PerformanceTrackingConfig {
    fn default() -> Self {
        Self {
            window_size: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigAdaptationConfig {
    pub interval: Duration,
}

impl Default for ConfigAdaptationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtcpConfig {
    pub retry_attempts: u32,
    pub max_retries: u32,
    pub replication_factor: u32,
    pub health_check_interval: Duration,
    pub recovery_timeout: Duration,
    pub checkpoint_interval: Duration,
    pub retry_backoff: Duration,
    pub predictive_detection: PredictiveDetectionConfig,
    pub self_healing: SelfHealingConfig,
    pub redundancy: RedundancyConfig,
    pub performance_tracking: PerformanceTrackingConfig,
    pub config_adaptation: ConfigAdaptationConfig,
}

impl Default for FtcpConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            max_retries: 3,
            replication_factor: 2,
            health_check_interval: Duration::from_secs(30),
            recovery_timeout: Duration::from_secs(600),
            checkpoint_interval: Duration::from_secs(60),
            retry_backoff: Duration::from_secs(1),
            predictive_detection: PredictiveDetectionConfig::default(),
            self_healing: SelfHealingConfig::default(),
            redundancy: RedundancyConfig::default(),
            performance_tracking: PerformanceTrackingConfig::default(),
            config_adaptation: ConfigAdaptationConfig::default(),
        }
    }
}

fn in_range_u32(value: u32, min: u32, max: u32, field: &str) -> Result<(), String> {
    if value < min || value > max {
        Err(format!("{field} must be between {min} and {max}, got {value}"))
    } else {
        Ok(())
    }
}

fn in_range_duration(value: Duration, min: Duration, max: Duration, field: &str) -> Result<(), String> {
    if value < min || value > max {
        Err(format!("{field} must be between {min:?} and {max:?}, got {value:?}"))
    } else {
        Ok(())
    }
}

fn in_range_f64(value: f64, min: f64, max: f64, field: &str) -> Result<(), String> {
    if value < min || value > max {
        Err(format!("{field} must be between {min} and {max}, got {value}"))
    } else {
        Ok(())
    }
}

/// Validate the full configuration surface. Every failure message names
/// the offending field so callers can surface it directly.
pub fn validate(config: &FtcpConfig) -> Result<(), String> {
    in_range_u32(config.retry_attempts, 0, 10, "retry_attempts")?;
    in_range_u32(config.max_retries, 0, 10, "max_retries")?;
    in_range_u32(config.replication_factor, 1, 10, "replication_factor")?;
    in_range_duration(config.health_check_interval, Duration::from_secs(5), Duration::from_secs(600), "health_check_interval")?;
    in_range_duration(config.recovery_timeout, Duration::from_secs(30), Duration::from_secs(1800), "recovery_timeout")?;

    if config.checkpoint_interval.is_zero() {
        return Err("checkpoint_interval must be greater than 0".to_string());
    }
    if config.retry_backoff.is_zero() {
        return Err("retry_backoff must be greater than 0".to_string());
    }

    let pd = &config.predictive_detection;
    in_range_f64(pd.confidence_threshold, 0.0, 1.0, "predictive_detection.confidence_threshold")?;
    in_range_f64(pd.threshold, 0.0, 1.0, "predictive_detection.threshold")?;
    if !(pd.enable_ml_detection || pd.enable_statistical || pd.enable_pattern_recognition) {
        return Err("at least one detection method must be enabled".to_string());
    }

    let sh = &config.self_healing;
    in_range_f64(sh.healing_threshold, 0.0, 1.0, "self_healing.healing_threshold")?;
    in_range_duration(sh.healing_interval, Duration::from_secs(10), Duration::from_secs(1800), "self_healing.healing_interval")?;
    if sh.healing_interval <= sh.monitoring_interval {
        return Err("self_healing.healing_interval must be greater than self_healing.monitoring_interval".to_string());
    }
    if !(sh.service_restart || sh.resource_reallocation || sh.load_redistribution || sh.enable_failover || sh.enable_scaling) {
        return Err("at least one healing strategy must be enabled".to_string());
    }
    if sh.enable_predictive && !pd.enabled {
        return Err("self_healing.enable_predictive requires predictive_detection.enabled".to_string());
    }

    let rd = &config.redundancy;
    in_range_u32(rd.default_factor, 1, 20, "redundancy.default_factor")?;
    in_range_u32(rd.max_factor, 1, 20, "redundancy.max_factor")?;
    if rd.default_factor > rd.max_factor {
        return Err("redundancy.default_factor cannot be greater than max_factor".to_string());
    }
    if rd.default_factor > 2 * config.replication_factor {
        return Err("redundancy.default_factor cannot be greater than 2x replication_factor".to_string());
    }

    let pt = &config.performance_tracking;
    in_range_duration(pt.window_size, Duration::from_secs(10), Duration::from_secs(24 * 3600), "performance_tracking.window_size")?;
    if sh.service_restart || sh.resource_reallocation || sh.load_redistribution || sh.enable_failover || sh.enable_scaling {
        let min_window = sh.healing_interval * 3;
        if pt.window_size < min_window {
            return Err("performance_tracking.window_size must be at least 3x self_healing.healing_interval".to_string());
        }
    }

    in_range_duration(config.config_adaptation.interval, Duration::from_secs(60), Duration::from_secs(24 * 3600), "config_adaptation.interval")?;

    Ok(())
}

/// Snapshot -> validate -> apply -> rollback-on-failure. `apply` is only
/// invoked once validation succeeds; on failure the caller's existing
/// config is left untouched and the error is returned.
pub fn reload(current: &mut FtcpConfig, candidate: FtcpConfig) -> Result<(), String> {
    validate(&candidate)?;
    *current = candidate;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&FtcpConfig::default()).is_ok());
    }

    #[test]
    fn retry_attempts_out_of_range_cites_must_be_between() {
        let mut config = FtcpConfig::default();
        config.retry_attempts = 11;
        let err = validate(&config).unwrap_err();
        assert!(err.contains("must be between"));
    }

    #[test]
    fn default_factor_above_max_factor_is_rejected() {
        let mut config = FtcpConfig::default();
        config.redundancy.default_factor = 5;
        config.redundancy.max_factor = 3;
        let err = validate(&config).unwrap_err();
        assert!(err.contains("default_factor") && err.contains("cannot be greater than max_factor"));
    }

    #[test]
    fn disabling_all_detection_methods_is_rejected() {
        let mut config = FtcpConfig::default();
        config.predictive_detection.enable_ml_detection = false;
        config.predictive_detection.enable_statistical = false;
        config.predictive_detection.enable_pattern_recognition = false;
        let err = validate(&config).unwrap_err();
        assert!(err.contains("at least one detection method must be enabled"));
    }

    #[test]
    fn disabling_all_healing_strategies_is_rejected() {
        let mut config = FtcpConfig::default();
        config.self_healing.service_restart = false;
        config.self_healing.resource_reallocation = false;
        config.self_healing.load_redistribution = false;
        config.self_healing.enable_failover = false;
        config.self_healing.enable_scaling = false;
        let err = validate(&config).unwrap_err();
        assert!(err.contains("at least one healing strategy must be enabled"));
    }

    #[test]
    fn healing_interval_not_greater_than_monitoring_is_rejected() {
        let mut config = FtcpConfig::default();
        config.self_healing.healing_interval = config.self_healing.monitoring_interval;
        let err = validate(&config).unwrap_err();
        assert!(err.contains("greater than"));
    }

    #[test]
    fn reload_rolls_back_on_validation_failure() {
        let mut current = FtcpConfig::default();
        current.replication_factor = 2;
        let mut candidate = current.clone();
        candidate.retry_attempts = 255;
        let err = reload(&mut current, candidate).unwrap_err();
        assert!(err.contains("must be between"));
        assert_eq!(current.replication_factor, 2);
    }
}
