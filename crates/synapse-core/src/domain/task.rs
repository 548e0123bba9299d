//! Task: the immutable input to one pipeline run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::error::TaskError;

/// Constraint key the language hint is published under in worker requests.
pub const LANGUAGE_CONSTRAINT: &str = "language";

/// A free-text requirement plus the constraints it must be built under.
///
/// Fields are private; a `Task` is read-only once constructed. Deserializing
/// goes through the same checks as [`Task::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTask")]
pub struct Task {
    requirements: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    #[serde(default)]
    constraints: BTreeMap<String, String>,
}

/// Wire form of a [`Task`] before validation.
#[derive(Deserialize)]
struct RawTask {
    requirements: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    constraints: BTreeMap<String, String>,
}

impl TryFrom<RawTask> for Task {
    type Error = TaskError;

    fn try_from(raw: RawTask) -> Result<Self, Self::Error> {
        let mut task = Task::new(raw.requirements)?;
        task.language = raw.language;
        raw.constraints
            .into_iter()
            .try_fold(task, |task, (name, value)| task.with_constraint(name, value))
    }
}

impl Task {
    /// Create a task. Blank requirements are rejected.
    pub fn new(requirements: impl Into<String>) -> Result<Self, TaskError> {
        let requirements = requirements.into();
        if requirements.trim().is_empty() {
            return Err(TaskError::EmptyRequirements);
        }
        Ok(Self {
            requirements,
            language: None,
            constraints: BTreeMap::new(),
        })
    }

    /// Set the target-language hint.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Add a named constraint. Empty names are rejected.
    pub fn with_constraint(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, TaskError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(TaskError::EmptyConstraintName);
        }
        self.constraints.insert(name, value.into());
        Ok(self)
    }

    pub fn requirements(&self) -> &str {
        &self.requirements
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn constraints(&self) -> &BTreeMap<String, String> {
        &self.constraints
    }

    /// Constraints as published to workers: the explicit constraints plus the
    /// language hint under [`LANGUAGE_CONSTRAINT`], unless already set.
    pub fn effective_constraints(&self) -> BTreeMap<String, String> {
        let mut constraints = self.constraints.clone();
        if let Some(language) = &self.language {
            constraints
                .entry(LANGUAGE_CONSTRAINT.to_string())
                .or_insert_with(|| language.clone());
        }
        constraints
    }
}
