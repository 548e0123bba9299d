//! ReviewReport: the reviewer's findings, keyed by path.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Overall verdict of a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewStatus {
    Approved,
    ChangesRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single review comment on one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Optional 1-indexed line hint.
    pub line: Option<u32>,
    pub message: String,
    pub severity: Severity,
}

/// Terminal artifact of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub status: ReviewStatus,
    pub findings: BTreeMap<String, Vec<Finding>>,
}

impl ReviewReport {
    pub fn is_approved(&self) -> bool {
        self.status == ReviewStatus::Approved
    }

    /// Total number of findings across all paths.
    pub fn finding_count(&self) -> usize {
        self.findings.values().map(Vec::len).sum()
    }

    /// Highest severity reported, if any finding exists.
    pub fn max_severity(&self) -> Option<Severity> {
        self.findings
            .values()
            .flatten()
            .map(|f| f.severity)
            .max()
    }
}
