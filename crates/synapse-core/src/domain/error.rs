//! Domain-level error taxonomy for Synapse.

use crate::aggregator::AggregatorError;
use crate::config::ConfigError;
use crate::materializer::MaterializeError;
use crate::retry::RetryError;
use crate::task_graph::MalformedPlan;
use crate::worker::WorkerError;

/// Errors produced while constructing a [`Task`](crate::domain::Task).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task requirements must not be empty")]
    EmptyRequirements,

    #[error("constraint name must not be empty")]
    EmptyConstraintName,
}

/// Synapse top-level errors.
#[derive(Debug, thiserror::Error)]
pub enum SynapseError {
    #[error("invalid task: {0}")]
    Task(#[from] TaskError),

    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("retry error: {0}")]
    Retry(#[from] RetryError),

    #[error("malformed plan: {0}")]
    MalformedPlan(#[from] MalformedPlan),

    #[error("aggregation error: {0}")]
    Aggregator(#[from] AggregatorError),

    #[error("materialize error: {0}")]
    Materialize(#[from] MaterializeError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for Synapse domain operations.
pub type Result<T> = std::result::Result<T, SynapseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_display() {
        let err = SynapseError::from(TaskError::EmptyRequirements);
        assert!(err.to_string().contains("invalid task"));
        assert!(err.to_string().contains("requirements"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = SynapseError::InvalidTransition {
            from: "done".to_string(),
            to: "building".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("done"));
        assert!(msg.contains("building"));
    }

    #[test]
    fn test_worker_error_converts() {
        let err: SynapseError = WorkerError::Fatal("bad input".to_string()).into();
        assert!(matches!(err, SynapseError::Worker(WorkerError::Fatal(_))));
    }
}
