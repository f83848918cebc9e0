//! Error taxonomy.
//!
//! Component loops never propagate these outward: they log via `tracing`
//! and continue. Only explicit,
//! user-invoked operations (`detect_fault`, `heal_fault`, `recover`,
//! `load_configuration`, `reload_configuration`) return `FtcpError`.

use thiserror::Error;

/// Why a dependency could not be resolved during recovery planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyErrorKind {
    Cyclic,
    TooDeep { depth: usize, max_depth: usize },
    UnknownType(String),
    TimedOut { dependency: String },
    UnresolvedReference(String),
}

impl std::fmt::Display for DependencyErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cyclic => write!(f, "circular dependency detected in recovery plan"),
            Self::TooDeep { depth, max_depth } => {
                write!(f, "dependency depth {depth} exceeds maximum {max_depth}")
            }
            Self::UnknownType(t) => write!(f, "unknown dependency type: {t}"),
            Self::TimedOut { dependency } => {
                write!(f, "timed out waiting for dependency: {dependency}")
            }
            Self::UnresolvedReference(id) => {
                write!(f, "dependency references unknown step id: {id}")
            }
        }
    }
}

/// Top-level FTCP error taxonomy.
#[derive(Debug, Error)]
pub enum FtcpError {
    /// Configuration fails validation.
    #[error("configuration invalid: {0}")]
    Validation(String),

    /// A health probe failed transiently. Non-fatal: the probe result is
    /// simply treated as unhealthy. This variant exists for completeness
    /// of the taxonomy; components log and swallow it rather than surface it.
    #[error("health probe {probe} failed: {message}")]
    Probe { probe: String, message: String },

    /// No strategy satisfied `canHeal` for the fault. Not a failure of any
    /// strategy.
    #[error("no strategy available to heal fault {fault_id} ({fault_type})")]
    StrategyUnsuitable { fault_id: String, fault_type: String },

    /// A strategy's `heal` operation failed.
    #[error("strategy {strategy} failed to heal fault {fault_id}: {message}")]
    StrategyExecution {
        strategy: String,
        fault_id: String,
        message: String,
    },

    /// A plan step exhausted retries.
    #[error("step {step_id} ({action}) failed after retries: {message}")]
    StepExecution {
        step_id: String,
        action: String,
        message: String,
        critical: bool,
    },

    /// Recovery-plan dependency resolution failed; no plan is ever
    /// dispatched in this case.
    #[error("dependency resolution failed: {kind}")]
    Dependency { kind: DependencyErrorKind },

    /// Total plan duration exceeded `recovery_timeout`.
    #[error("plan {plan_id} exceeded recovery timeout of {timeout_secs}s")]
    PlanTimeout { plan_id: String, timeout_secs: u64 },

    /// Orchestrator queue full or worker pool saturated. Callers may retry.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// The operation was cancelled via the shared lifecycle context.
    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

pub type FtcpResult<T> = Result<T, FtcpError>;
