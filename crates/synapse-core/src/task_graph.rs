//! Plan tree walking and subtask derivation.
//!
//! A plan's `structure` is a JSON object tree. Entry values are read as:
//!
//! - `null`: a directory
//! - an object without a `placeholder` key: a nested directory
//! - a string: a leaf; the string is its placeholder, the role is inferred
//!   from the path
//! - an object with a `placeholder` key: a leaf descriptor carrying an
//!   explicit `role` and optional `depends_on`
//!
//! Every leaf becomes exactly one [`Subtask`], in the plan's key order.
//! Subtasks must be independent of each other, so a plan where one leaf
//! declares a dependency on another leaf is rejected rather than ordered.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::domain::{Plan, Subtask, SubtaskRole};

/// Structural violations of a plan's tree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedPlan {
    #[error("directory entry '{path}' resolves back to ancestor '{resolves_to}'")]
    PathCycle { path: String, resolves_to: String },

    #[error("path '{path}' escapes the plan root")]
    EscapesRoot { path: String },

    #[error("leaf '{path}' has no assigned role")]
    MissingRole { path: String },

    #[error("path '{path}' is declared more than once")]
    DuplicatePath { path: String },

    #[error("path '{path}' is declared both as a file and as a directory")]
    PathConflict { path: String },

    #[error("leaf '{path}' requires '{depends_on}' to be generated first")]
    OrderedDependency { path: String, depends_on: String },

    #[error("empty path segment under '{parent}'")]
    EmptyPath { parent: String },

    #[error("entry '{path}' is not a directory or file declaration: {detail}")]
    InvalidEntry { path: String, detail: String },

    #[error("plan declares no files to generate")]
    Empty,
}

/// Result type for plan derivation.
pub type TaskGraphResult<T> = std::result::Result<T, MalformedPlan>;

struct Leaf {
    path: String,
    role: SubtaskRole,
    placeholder: Option<String>,
    depends_on: Vec<String>,
}

#[derive(Default)]
struct Walker {
    leaves: Vec<Leaf>,
    leaf_paths: HashSet<String>,
    dir_paths: HashSet<String>,
}

/// Derives the ordered, independent subtasks of a plan.
pub struct TaskGraph;

impl TaskGraph {
    /// Walk `plan.structure` and produce one subtask per leaf.
    ///
    /// An empty result is legal here; whether an empty plan is acceptable is
    /// the caller's decision.
    pub fn derive(plan: &Plan) -> TaskGraphResult<Vec<Subtask>> {
        let mut walker = Walker::default();
        walker.walk(&plan.structure, &[])?;
        walker.check_independence()?;

        Ok(walker
            .leaves
            .into_iter()
            .enumerate()
            .map(|(index, leaf)| Subtask {
                index,
                path: leaf.path,
                role: leaf.role,
                placeholder: leaf.placeholder,
                plan_id: plan.id,
            })
            .collect())
    }

    /// Number of leaves a plan declares, without validating it.
    pub fn leaf_count(plan: &Plan) -> usize {
        fn count(map: &Map<String, Value>) -> usize {
            map.values()
                .map(|v| match v {
                    Value::String(_) => 1,
                    Value::Object(o) if o.contains_key("placeholder") => 1,
                    Value::Object(o) => count(o),
                    _ => 0,
                })
                .sum()
        }
        count(&plan.structure)
    }
}

impl Walker {
    fn walk(&mut self, entries: &Map<String, Value>, parent: &[String]) -> TaskGraphResult<()> {
        for (key, value) in entries {
            let raw = display_path(parent, key);
            if key.trim().is_empty() {
                return Err(MalformedPlan::EmptyPath {
                    parent: parent.join("/"),
                });
            }
            let segments = normalize(parent, key).ok_or_else(|| MalformedPlan::EscapesRoot {
                path: raw.clone(),
            })?;

            match value {
                Value::Null => self.add_dir(&raw, parent, &segments)?,
                Value::Object(obj) if !obj.contains_key("placeholder") => {
                    self.add_dir(&raw, parent, &segments)?;
                    self.walk(obj, &segments)?;
                }
                Value::Object(obj) => {
                    let leaf = leaf_from_descriptor(&raw, &segments, obj)?;
                    self.add_leaf(leaf, &segments)?;
                }
                Value::String(placeholder) => {
                    let path = leaf_path(&raw, &segments)?;
                    let role = SubtaskRole::infer(&path);
                    self.add_leaf(
                        Leaf {
                            path,
                            role,
                            placeholder: Some(placeholder.clone()),
                            depends_on: Vec::new(),
                        },
                        &segments,
                    )?;
                }
                other => {
                    return Err(MalformedPlan::InvalidEntry {
                        path: raw,
                        detail: format!("unexpected {}", json_kind(other)),
                    })
                }
            }
        }
        Ok(())
    }

    fn add_dir(&mut self, raw: &str, parent: &[String], segments: &[String]) -> TaskGraphResult<()> {
        // A directory that normalises to its parent or any ancestor loops the tree.
        if segments.len() <= parent.len() && parent.starts_with(segments) {
            return Err(MalformedPlan::PathCycle {
                path: raw.to_string(),
                resolves_to: if segments.is_empty() {
                    "/".to_string()
                } else {
                    segments.join("/")
                },
            });
        }
        self.mark_dirs(segments, segments.len())
    }

    fn add_leaf(&mut self, leaf: Leaf, segments: &[String]) -> TaskGraphResult<()> {
        if self.leaf_paths.contains(&leaf.path) {
            return Err(MalformedPlan::DuplicatePath { path: leaf.path });
        }
        if self.dir_paths.contains(&leaf.path) {
            return Err(MalformedPlan::PathConflict { path: leaf.path });
        }
        self.mark_dirs(segments, segments.len() - 1)?;
        self.leaf_paths.insert(leaf.path.clone());
        self.leaves.push(leaf);
        Ok(())
    }

    /// Record the first `depth` prefixes of `segments` as directories.
    fn mark_dirs(&mut self, segments: &[String], depth: usize) -> TaskGraphResult<()> {
        for end in 1..=depth {
            let dir = segments[..end].join("/");
            if self.leaf_paths.contains(&dir) {
                return Err(MalformedPlan::PathConflict { path: dir });
            }
            self.dir_paths.insert(dir);
        }
        Ok(())
    }

    fn check_independence(&self) -> TaskGraphResult<()> {
        for leaf in &self.leaves {
            for dep in &leaf.depends_on {
                let resolved = normalize(&[], dep).map(|s| s.join("/"));
                if let Some(resolved) = resolved {
                    if self.leaf_paths.contains(&resolved) {
                        return Err(MalformedPlan::OrderedDependency {
                            path: leaf.path.clone(),
                            depends_on: resolved,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn leaf_from_descriptor(
    raw: &str,
    segments: &[String],
    obj: &Map<String, Value>,
) -> TaskGraphResult<Leaf> {
    let path = leaf_path(raw, segments)?;

    let placeholder = match obj.get("placeholder") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => {
            return Err(MalformedPlan::InvalidEntry {
                path,
                detail: format!("placeholder must be a string, got {}", json_kind(other)),
            })
        }
    };

    let role = obj
        .get("role")
        .and_then(Value::as_str)
        .and_then(SubtaskRole::parse)
        .ok_or_else(|| MalformedPlan::MissingRole { path: path.clone() })?;

    let depends_on = match obj.get("depends_on") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| MalformedPlan::InvalidEntry {
                        path: path.clone(),
                        detail: "depends_on entries must be strings".to_string(),
                    })
            })
            .collect::<TaskGraphResult<Vec<_>>>()?,
        Some(other) => {
            return Err(MalformedPlan::InvalidEntry {
                path,
                detail: format!("depends_on must be an array, got {}", json_kind(other)),
            })
        }
    };

    Ok(Leaf {
        path,
        role,
        placeholder,
        depends_on,
    })
}

fn leaf_path(raw: &str, segments: &[String]) -> TaskGraphResult<String> {
    if segments.is_empty() {
        return Err(MalformedPlan::EscapesRoot {
            path: raw.to_string(),
        });
    }
    Ok(segments.join("/"))
}

/// Resolve `key` against `parent`. `None` when the key is absolute or climbs
/// above the root.
fn normalize(parent: &[String], key: &str) -> Option<Vec<String>> {
    if key.starts_with('/') || key.starts_with('\\') {
        return None;
    }
    let mut segments = parent.to_vec();
    for segment in key.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s => segments.push(s.to_string()),
        }
    }
    Some(segments)
}

fn display_path(parent: &[String], key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", parent.join("/"), key)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
