//! RunResult and the failure report attached to unsuccessful runs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::module::Module;
use crate::domain::plan::Plan;
use crate::domain::review::ReviewReport;

/// A pipeline stage that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planning,
    Building,
    Reviewing,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Planning => "planning",
            Stage::Building => "building",
            Stage::Reviewing => "reviewing",
        };
        write!(f, "{s}")
    }
}

/// States of the orchestrator's run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Planning,
    Building,
    Reviewing,
    Done,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed | RunState::Cancelled)
    }

    /// The stage this state executes, if it is a working state.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RunState::Planning => Some(Stage::Planning),
            RunState::Building => Some(Stage::Building),
            RunState::Reviewing => Some(Stage::Reviewing),
            RunState::Done | RunState::Failed | RunState::Cancelled => None,
        }
    }
}

impl From<Stage> for RunState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Planning => RunState::Planning,
            Stage::Building => RunState::Building,
            Stage::Reviewing => RunState::Reviewing,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Planning => "planning",
            RunState::Building => "building",
            RunState::Reviewing => "reviewing",
            RunState::Done => "done",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub state: RunState,
    pub at: DateTime<Utc>,
}

/// Final outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Failed,
    /// Abandoned by request; distinct from `Failed`.
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Done => "done",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Why a run did not reach `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A worker reported an unrecoverable condition, or input was invalid.
    Fatal,
    RetriesExhausted,
    MalformedPlan,
    /// More build subtasks failed than the configured ratio tolerates.
    FailureThresholdExceeded,
    Cancelled,
}

/// The stage that stopped the run and what went wrong there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
    /// Subtask paths that ended in terminal failure (build stage only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_paths: Vec<String>,
}

/// Outcome of handing a finished run to a materializer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializationReport {
    pub files_written: usize,
    pub error: Option<String>,
}

impl MaterializationReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate of everything one run produced.
///
/// On `Failed` or `Cancelled` the artifacts accumulated before the stop are
/// still present: the plan if planning finished, and every module that was
/// generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub plan: Option<Plan>,
    pub modules: BTreeMap<String, Module>,
    pub review: Option<ReviewReport>,
    pub failure: Option<FailureDetail>,
    pub transitions: Vec<Transition>,
    pub materialization: Option<MaterializationReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn is_done(&self) -> bool {
        self.status == RunStatus::Done
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }

    /// The failed stage, when the run did not complete.
    pub fn failed_stage(&self) -> Option<Stage> {
        self.failure.as_ref().map(|f| f.stage)
    }

    /// `{path: content}` view of the generated modules.
    pub fn files(&self) -> BTreeMap<String, String> {
        self.modules
            .iter()
            .map(|(path, module)| (path.clone(), module.content.clone()))
            .collect()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Convert into the caller-facing `RunResult | FailureDetail` split.
    ///
    /// The `Err` side still carries the partial result.
    pub fn into_outcome(self) -> std::result::Result<RunResult, (FailureDetail, RunResult)> {
        match self.failure.clone() {
            None => Ok(self),
            Some(detail) => Err((detail, self)),
        }
    }
}
