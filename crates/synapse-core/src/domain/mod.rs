//! Synapse domain model: the values one pipeline run creates and consumes.

pub mod error;
pub mod module;
pub mod plan;
pub mod review;
pub mod run;
pub mod task;

pub use error::{Result, SynapseError, TaskError};
pub use module::{Module, Provenance};
pub use plan::{Plan, Subtask, SubtaskRole};
pub use review::{Finding, ReviewReport, ReviewStatus, Severity};
pub use run::{
    FailureDetail, FailureKind, MaterializationReport, RunResult, RunState, RunStatus, Stage,
    Transition,
};
pub use task::{Task, LANGUAGE_CONSTRAINT};
