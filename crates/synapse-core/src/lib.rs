//! Synapse Core Library
//!
//! Orchestration engine that turns one high-level [`Task`] into a reviewed
//! set of generated modules: a planner proposes a file layout, generators
//! fill every file in parallel, and a reviewer grades the result.
//!
//! Entry point is [`Synapse::run`].

pub mod aggregator;
pub mod config;
pub mod domain;
pub mod materializer;
pub mod obs;
pub mod orchestrator;
pub mod retry;
pub mod task_graph;
pub mod telemetry;
pub mod worker;

pub use aggregator::{Aggregate, AggregatorError, ResultAggregator, SubtaskOutcome};

pub use config::{ConfigError, SynapseConfig};

pub use domain::{
    FailureDetail, FailureKind, Finding, MaterializationReport, Module, Plan, Provenance, Result,
    ReviewReport, ReviewStatus, RunResult, RunState, RunStatus, Severity, Stage, Subtask,
    SubtaskRole, SynapseError, Task, TaskError, Transition,
};

pub use materializer::{FsMaterializer, MaterializeError, Materializer, MemoryMaterializer};

pub use orchestrator::{RunMachine, Synapse};

pub use retry::{RetryError, RetryPolicy, Succeeded};

pub use task_graph::{MalformedPlan, TaskGraph};

pub use telemetry::init_tracing;

pub use worker::{
    ScriptedResponse, ScriptedWorker, Worker, WorkerError, WorkerRegistry, WorkerRequest,
    WorkerResult, WorkerRole,
};

/// Re-exported so callers can build the token `Synapse::run` expects.
pub use tokio_util::sync::CancellationToken;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
