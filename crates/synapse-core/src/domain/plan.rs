//! Plan and Subtask: the planning stage's output and the units it fans out into.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The planner's desired file layout plus its declared dependencies.
///
/// `structure` keeps the planner's key order (`serde_json` is built with
/// `preserve_order`), which fixes the dispatch order of derived subtasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub structure: serde_json::Map<String, serde_json::Value>,
    pub dependencies: Vec<String>,
}

impl Plan {
    pub fn new(
        structure: serde_json::Map<String, serde_json::Value>,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            structure,
            dependencies,
        }
    }
}

/// What a generated file is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskRole {
    Source,
    Test,
    Config,
    Docs,
}

impl SubtaskRole {
    /// Parse a role name as written in a plan leaf descriptor.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "source" | "src" => Some(SubtaskRole::Source),
            "test" | "tests" => Some(SubtaskRole::Test),
            "config" => Some(SubtaskRole::Config),
            "docs" | "doc" => Some(SubtaskRole::Docs),
            _ => None,
        }
    }

    /// Role for a bare string leaf, inferred from its path.
    pub fn infer(path: &str) -> Self {
        let file = path.rsplit('/').next().unwrap_or(path);
        let stem = file.split('.').next().unwrap_or(file);
        let in_test_dir = path
            .split('/')
            .rev()
            .skip(1)
            .any(|segment| segment == "tests" || segment == "test");
        if in_test_dir
            || stem.starts_with("test_")
            || stem.ends_with("_test")
            || file.contains(".test.")
            || file.contains(".spec.")
        {
            SubtaskRole::Test
        } else {
            SubtaskRole::Source
        }
    }
}

impl std::fmt::Display for SubtaskRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubtaskRole::Source => "source",
            SubtaskRole::Test => "test",
            SubtaskRole::Config => "config",
            SubtaskRole::Docs => "docs",
        };
        write!(f, "{s}")
    }
}

/// One independently generatable leaf of a [`Plan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    /// 0-indexed dispatch position.
    pub index: usize,
    /// Normalised, `/`-separated path relative to the plan root.
    pub path: String,
    pub role: SubtaskRole,
    pub placeholder: Option<String>,
    /// The plan this subtask was derived from.
    pub plan_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_accepts_aliases() {
        assert_eq!(SubtaskRole::parse("Source"), Some(SubtaskRole::Source));
        assert_eq!(SubtaskRole::parse("tests"), Some(SubtaskRole::Test));
        assert_eq!(SubtaskRole::parse("doc"), Some(SubtaskRole::Docs));
        assert_eq!(SubtaskRole::parse("binary"), None);
    }

    #[test]
    fn test_role_inferred_from_path() {
        assert_eq!(SubtaskRole::infer("main.src"), SubtaskRole::Source);
        assert_eq!(SubtaskRole::infer("tests/adder.rs"), SubtaskRole::Test);
        assert_eq!(SubtaskRole::infer("pkg/test_adder.py"), SubtaskRole::Test);
        assert_eq!(SubtaskRole::infer("web/adder.test.ts"), SubtaskRole::Test);
        assert_eq!(SubtaskRole::infer("src/latest.rs"), SubtaskRole::Source);
        // A file merely named "tests" is not inside a test directory.
        assert_eq!(SubtaskRole::infer("bin/tests"), SubtaskRole::Source);
    }
}
