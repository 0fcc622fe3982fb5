//! Error types for the orchestration core.
//!
//! Errors fall into the buckets callers actually branch on:
//! - `Validation` / `NotFound` / `InvalidState`: fix your request.
//! - `AdmissionDenied`: a scheduling rule said no; retry may help.
//! - `Unavailable`: the scheduler itself cannot take work right now.
//! - `Transport`: the broker or pub/sub layer failed.

use thiserror::Error;
use uuid::Uuid;

/// Why an admission attempt was refused.
///
/// Denials are rules, not failures: callers use the reason to decide
/// between "try later" and "fix the job".
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// The job already has a running execution (single-flight).
    AlreadyRunning,
    /// At least one `depends_on` job has no completed latest execution.
    DependenciesUnmet,
    /// The circuit breaker is open (or half-open with a trial in flight).
    CircuitOpen,
    /// The worker pool is draining.
    Draining,
    /// The job is paused or cancelled, or autonomous scheduling is disabled.
    SchedulingDisabled,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DenialReason::AlreadyRunning => "job already running",
            DenialReason::DependenciesUnmet => "dependencies not satisfied",
            DenialReason::CircuitOpen => "circuit breaker open",
            DenialReason::Draining => "worker pool draining",
            DenialReason::SchedulingDisabled => "scheduling disabled for job",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the orchestration core.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed job fields or an inconsistent update.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The entity exists but the operation is illegal in its current state.
    #[error("invalid state for {operation}: job is {status}")]
    InvalidState {
        operation: &'static str,
        status: String,
    },

    /// Admission was refused by a scheduling rule.
    #[error("admission denied: {0}")]
    AdmissionDenied(DenialReason),

    /// A trigger key is already registered to another job.
    #[error("trigger key {key:?} already registered to job {existing}")]
    TriggerConflict { key: String, existing: Uuid },

    /// The scheduler cannot take work right now (draining, not started).
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),

    /// Broker or pub/sub transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl OrchestratorError {
    /// Convenience constructor for job lookups.
    pub fn job_not_found(id: Uuid) -> Self {
        Self::NotFound {
            kind: "job",
            id: id.to_string(),
        }
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AdmissionDenied(
                DenialReason::AlreadyRunning
                    | DenialReason::DependenciesUnmet
                    | DenialReason::CircuitOpen
                    | DenialReason::Draining
            ) | Self::Unavailable(_)
                | Self::Transport(_)
        )
    }
}

/// Result alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_is_retryable() {
        assert!(OrchestratorError::AdmissionDenied(DenialReason::AlreadyRunning).is_retryable());
        assert!(OrchestratorError::AdmissionDenied(DenialReason::CircuitOpen).is_retryable());
    }

    #[test]
    fn validation_is_not_retryable() {
        assert!(!OrchestratorError::Validation("bad".into()).is_retryable());
        assert!(!OrchestratorError::job_not_found(Uuid::new_v4()).is_retryable());
    }

    #[test]
    fn scheduling_disabled_is_not_retryable() {
        assert!(
            !OrchestratorError::AdmissionDenied(DenialReason::SchedulingDisabled).is_retryable()
        );
    }
}
