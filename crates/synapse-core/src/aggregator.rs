//! Concurrent collection of subtask outcomes into one keyed result set.
//!
//! [`ResultAggregator`] is created with the full subtask list of a run and
//! accepts exactly one [`SubtaskOutcome`] per subtask, in any order, from any
//! number of concurrent build tasks. [`ResultAggregator::finalize`] only
//! succeeds once every subtask has reported, and the paths it returns always
//! partition the subtask path set.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::{Module, Subtask};

/// Misuse of the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregatorError {
    #[error("outcome reported for unknown subtask path '{path}'")]
    UnknownPath { path: String },

    #[error("subtask '{path}' reported more than once")]
    DuplicateReport { path: String },

    #[error("module path '{module_path}' does not match subtask '{path}'")]
    PathMismatch { path: String, module_path: String },

    #[error("{} subtask(s) have not reported: {missing:?}", missing.len())]
    Incomplete { missing: Vec<String> },
}

/// Result type for aggregation operations.
pub type AggregatorResult<T> = std::result::Result<T, AggregatorError>;

/// Terminal outcome of one subtask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubtaskOutcome {
    Generated(Module),
    Failed { attempts: u32, reason: String },
    Cancelled,
}

/// A subtask that ended without a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSubtask {
    pub attempts: u32,
    pub reason: String,
}

/// Everything collected for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregate {
    /// Every subtask produced a module.
    Complete(BTreeMap<String, Module>),
    /// At least one subtask failed or was cancelled.
    Partial {
        modules: BTreeMap<String, Module>,
        failed: BTreeMap<String, FailedSubtask>,
        cancelled: BTreeSet<String>,
    },
}

impl Aggregate {
    pub fn modules(&self) -> &BTreeMap<String, Module> {
        match self {
            Aggregate::Complete(modules) | Aggregate::Partial { modules, .. } => modules,
        }
    }

    pub fn into_modules(self) -> BTreeMap<String, Module> {
        match self {
            Aggregate::Complete(modules) | Aggregate::Partial { modules, .. } => modules,
        }
    }

    /// Paths that ended in terminal failure, in path order.
    pub fn failed_paths(&self) -> Vec<String> {
        match self {
            Aggregate::Complete(_) => Vec::new(),
            Aggregate::Partial { failed, .. } => failed.keys().cloned().collect(),
        }
    }

    pub fn cancelled_count(&self) -> usize {
        match self {
            Aggregate::Complete(_) => 0,
            Aggregate::Partial { cancelled, .. } => cancelled.len(),
        }
    }

    /// Total number of subtasks accounted for.
    pub fn total(&self) -> usize {
        match self {
            Aggregate::Complete(modules) => modules.len(),
            Aggregate::Partial {
                modules,
                failed,
                cancelled,
            } => modules.len() + failed.len() + cancelled.len(),
        }
    }
}

#[derive(Debug, Default)]
struct Collected {
    modules: BTreeMap<String, Module>,
    failed: BTreeMap<String, FailedSubtask>,
    cancelled: BTreeSet<String>,
}

impl Collected {
    fn contains(&self, path: &str) -> bool {
        self.modules.contains_key(path)
            || self.failed.contains_key(path)
            || self.cancelled.contains(path)
    }

    fn len(&self) -> usize {
        self.modules.len() + self.failed.len() + self.cancelled.len()
    }
}

/// Thread-safe collector for subtask outcomes.
#[derive(Debug)]
pub struct ResultAggregator {
    expected: BTreeSet<String>,
    collected: Mutex<Collected>,
}

impl ResultAggregator {
    pub fn new(subtasks: &[Subtask]) -> Self {
        Self {
            expected: subtasks.iter().map(|s| s.path.clone()).collect(),
            collected: Mutex::new(Collected::default()),
        }
    }

    /// Record the outcome of `subtask`. Each subtask may report exactly once.
    pub async fn collect(&self, subtask: &Subtask, outcome: SubtaskOutcome) -> AggregatorResult<()> {
        let path = &subtask.path;
        if !self.expected.contains(path) {
            return Err(AggregatorError::UnknownPath { path: path.clone() });
        }

        let mut collected = self.collected.lock().await;
        if collected.contains(path) {
            return Err(AggregatorError::DuplicateReport { path: path.clone() });
        }

        match outcome {
            SubtaskOutcome::Generated(module) => {
                if &module.path != path {
                    return Err(AggregatorError::PathMismatch {
                        path: path.clone(),
                        module_path: module.path,
                    });
                }
                collected.modules.insert(path.clone(), module);
            }
            SubtaskOutcome::Failed { attempts, reason } => {
                collected
                    .failed
                    .insert(path.clone(), FailedSubtask { attempts, reason });
            }
            SubtaskOutcome::Cancelled => {
                collected.cancelled.insert(path.clone());
            }
        }
        Ok(())
    }

    /// Number of subtasks that have reported so far.
    pub async fn reported(&self) -> usize {
        self.collected.lock().await.len()
    }

    /// The aggregate result; fails until every subtask has reported once.
    pub async fn finalize(&self) -> AggregatorResult<Aggregate> {
        let collected = self.collected.lock().await;
        let missing: Vec<String> = self
            .expected
            .iter()
            .filter(|p| !collected.contains(p))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(AggregatorError::Incomplete { missing });
        }

        if collected.failed.is_empty() && collected.cancelled.is_empty() {
            Ok(Aggregate::Complete(collected.modules.clone()))
        } else {
            Ok(Aggregate::Partial {
                modules: collected.modules.clone(),
                failed: collected.failed.clone(),
                cancelled: collected.cancelled.clone(),
            })
        }
    }
}
