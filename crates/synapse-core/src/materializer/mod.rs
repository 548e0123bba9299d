//! Materializers: where a finished run's `{path: content}` map is written.
//!
//! The orchestrator calls its materializer at most once per run, and only
//! after the run reached `Done`.

pub mod fs;

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

pub use fs::FsMaterializer;

/// Errors writing generated files.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("path '{path}' escapes the output root")]
    EscapesRoot { path: String },

    #[error("failed to write '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("materializer rejected write: {0}")]
    Rejected(String),
}

/// Result type for materializer operations.
pub type MaterializeResult<T> = std::result::Result<T, MaterializeError>;

/// Sink for the files of a completed run.
#[async_trait]
pub trait Materializer: Send + Sync {
    /// Write every file; returns the number of files written.
    async fn write(&self, files: &BTreeMap<String, String>) -> MaterializeResult<usize>;
}

/// In-memory materializer, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryMaterializer {
    files: Mutex<BTreeMap<String, String>>,
    writes: Mutex<u32>,
    fail_with: Option<String>,
}

impl MemoryMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A materializer whose every write fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    /// Snapshot of everything written so far.
    pub fn files(&self) -> BTreeMap<String, String> {
        self.files.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of `write` calls, including failed ones.
    pub fn writes(&self) -> u32 {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Materializer for MemoryMaterializer {
    async fn write(&self, files: &BTreeMap<String, String>) -> MaterializeResult<usize> {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        if let Some(message) = &self.fail_with {
            return Err(MaterializeError::Rejected(message.clone()));
        }
        let mut stored = self.files.lock().unwrap_or_else(|e| e.into_inner());
        stored.extend(files.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(files.len())
    }
}
