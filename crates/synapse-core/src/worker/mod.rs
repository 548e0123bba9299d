//! Worker capability: the pluggable unit that performs one pipeline stage.
//!
//! - [`Worker`]: `process` + `validate` contract, polymorphic over [`WorkerRole`]
//! - [`WorkerRegistry`]: run-scoped `role -> worker` map handed to the orchestrator
//! - [`contracts`]: request/response payload shapes exchanged with workers
//! - [`scripted`]: `ScriptedWorker`, a replaying fake for tests and fixtures

pub mod contracts;
pub mod scripted;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use contracts::{GeneratorOutput, PlannerOutput, ReviewerFinding, ReviewerOutput, WorkerRequest};
pub use scripted::{ScriptedResponse, ScriptedWorker};

/// The three worker archetypes in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Planner,
    Generator,
    Reviewer,
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerRole::Planner => "planner",
            WorkerRole::Generator => "generator",
            WorkerRole::Reviewer => "reviewer",
        };
        write!(f, "{s}")
    }
}

/// Failures a worker invocation can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    /// Network, quota or similar; safe to retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Malformed input or an unrecoverable worker condition; never retried.
    #[error("fatal failure: {0}")]
    Fatal(String),

    /// The result failed validation or did not match the expected shape.
    /// Retried like a transient failure.
    #[error("invalid worker output: {0}")]
    InvalidOutput(String),
}

impl WorkerError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, WorkerError::Fatal(_))
    }
}

/// Result type for worker operations.
pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

/// A unit of computation for one pipeline role.
#[async_trait]
pub trait Worker: Send + Sync {
    /// The role this worker fills.
    fn role(&self) -> WorkerRole;

    /// Process one request. May take arbitrarily long; callers abandon the
    /// future on cancellation, so implementations must be drop-safe.
    async fn process(&self, request: &WorkerRequest) -> WorkerResult<serde_json::Value>;

    /// Cheap, local structural check of a candidate result. Never performs I/O.
    fn validate(&self, output: &serde_json::Value) -> bool;
}

/// Run-scoped mapping from role to the worker that fills it.
///
/// Built once per run and passed to [`crate::orchestrator::Synapse::new`].
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerRole, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `worker` under its own [`Worker::role`], replacing any previous one.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.role(), worker);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, worker: Arc<dyn Worker>) -> Self {
        self.register(worker);
        self
    }

    pub fn get(&self, role: WorkerRole) -> Option<Arc<dyn Worker>> {
        self.workers.get(&role).cloned()
    }

    /// Resolve `role`, or a fatal error naming the missing role.
    pub fn require(&self, role: WorkerRole) -> WorkerResult<Arc<dyn Worker>> {
        self.get(role)
            .ok_or_else(|| WorkerError::Fatal(format!("no {role} worker registered")))
    }

    pub fn roles(&self) -> Vec<WorkerRole> {
        let mut roles: Vec<WorkerRole> = self.workers.keys().copied().collect();
        roles.sort_by_key(|r| *r as u8);
        roles
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("roles", &self.roles())
            .finish()
    }
}
