//! Payload shapes exchanged with workers.
//!
//! Every role consumes a [`WorkerRequest`] and answers with role-specific JSON:
//!
//! | Role      | Result shape                                                   |
//! |-----------|----------------------------------------------------------------|
//! | Planner   | `{structure: {path: placeholder \| null \| {..}}, dependencies: [..]}` |
//! | Generator | `{files: {path: content}}`                                      |
//! | Reviewer  | `{status: "approved" \| "changes-requested", findings: [..]}`   |
//!
//! Parsing failures map to [`WorkerError::InvalidOutput`] so they are retried.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{
    Finding, Module, Plan, ReviewReport, ReviewStatus, Severity, Subtask, Task,
};
use crate::worker::{WorkerError, WorkerResult, WorkerRole};

/// Task description handed to every worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub requirements: String,
    pub constraints: BTreeMap<String, String>,
    /// Role-specific context; omitted for the planner.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
}

impl WorkerRequest {
    pub fn for_planner(task: &Task) -> Self {
        Self {
            requirements: task.requirements().to_string(),
            constraints: task.effective_constraints(),
            context: serde_json::Value::Null,
        }
    }

    pub fn for_generator(task: &Task, plan: &Plan, subtask: &Subtask) -> Self {
        Self {
            requirements: task.requirements().to_string(),
            constraints: task.effective_constraints(),
            context: serde_json::json!({
                "path": subtask.path,
                "role": subtask.role,
                "placeholder": subtask.placeholder,
                "dependencies": plan.dependencies,
            }),
        }
    }

    pub fn for_reviewer(
        task: &Task,
        plan: &Plan,
        modules: &BTreeMap<String, Module>,
        failed_paths: &[String],
    ) -> Self {
        let files: serde_json::Map<String, serde_json::Value> = modules
            .iter()
            .map(|(path, module)| (path.clone(), serde_json::Value::from(module.content.clone())))
            .collect();
        Self {
            requirements: task.requirements().to_string(),
            constraints: task.effective_constraints(),
            context: serde_json::json!({
                "modules": files,
                "dependencies": plan.dependencies,
                "failed_paths": failed_paths,
            }),
        }
    }

    /// Subtask path carried in a generator request's context.
    pub fn target_path(&self) -> Option<&str> {
        self.context.get("path").and_then(|p| p.as_str())
    }
}

/// Planner result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerOutput {
    pub structure: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl PlannerOutput {
    pub fn parse(value: serde_json::Value) -> WorkerResult<Self> {
        parse_output(WorkerRole::Planner, value)
    }

    pub fn into_plan(self) -> Plan {
        Plan::new(self.structure, self.dependencies)
    }
}

/// Generator result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorOutput {
    pub files: BTreeMap<String, String>,
}

impl GeneratorOutput {
    pub fn parse(value: serde_json::Value) -> WorkerResult<Self> {
        parse_output(WorkerRole::Generator, value)
    }

    /// Take the content generated for `path`.
    ///
    /// A result that omits the requested path is invalid output.
    pub fn take(mut self, path: &str) -> WorkerResult<String> {
        let content = self.files.remove(path).ok_or_else(|| {
            WorkerError::InvalidOutput(format!("generator result has no entry for '{path}'"))
        })?;
        if !self.files.is_empty() {
            tracing::debug!(
                path = %path,
                ignored = ?self.files.keys().collect::<Vec<_>>(),
                "ignoring extra files in generator result"
            );
        }
        Ok(content)
    }
}

/// One reviewer finding as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerFinding {
    pub path: String,
    #[serde(default)]
    pub line: Option<u32>,
    pub message: String,
    pub severity: Severity,
}

/// Reviewer result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerOutput {
    pub status: ReviewStatus,
    #[serde(default)]
    pub findings: Vec<ReviewerFinding>,
}

impl ReviewerOutput {
    pub fn parse(value: serde_json::Value) -> WorkerResult<Self> {
        parse_output(WorkerRole::Reviewer, value)
    }

    /// Group findings by path, preserving their order within each path.
    pub fn into_report(self) -> ReviewReport {
        let mut findings: BTreeMap<String, Vec<Finding>> = BTreeMap::new();
        for f in self.findings {
            findings.entry(f.path).or_default().push(Finding {
                line: f.line,
                message: f.message,
                severity: f.severity,
            });
        }
        ReviewReport {
            status: self.status,
            findings,
        }
    }
}

/// Default structural check for a role's result: the required top-level keys
/// are present with the right JSON type.
pub fn has_required_shape(role: WorkerRole, output: &serde_json::Value) -> bool {
    match role {
        WorkerRole::Planner => output.get("structure").is_some_and(|s| s.is_object()),
        WorkerRole::Generator => output.get("files").is_some_and(|f| f.is_object()),
        WorkerRole::Reviewer => {
            output.get("status").is_some_and(|s| s.is_string())
                && output
                    .get("findings")
                    .map_or(true, |f| f.is_array())
        }
    }
}

fn parse_output<T: serde::de::DeserializeOwned>(
    role: WorkerRole,
    value: serde_json::Value,
) -> WorkerResult<T> {
    serde_json::from_value(value)
        .map_err(|e| WorkerError::InvalidOutput(format!("{role} result does not parse: {e}")))
}
