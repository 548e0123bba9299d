use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use super::{MaterializeError, MaterializeResult, Materializer};

/// Writes generated files below a root directory.
///
/// Every path is checked before anything is written, so a plan containing one
/// escaping path writes nothing at all.
#[derive(Debug, Clone)]
pub struct FsMaterializer {
    root: PathBuf,
}

impl FsMaterializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target(&self, path: &str) -> MaterializeResult<PathBuf> {
        let relative = Path::new(path);
        let escapes = path.trim().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(MaterializeError::EscapesRoot {
                path: path.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn write_all(targets: Vec<(String, PathBuf, String)>) -> MaterializeResult<usize> {
        for (path, target, content) in &targets {
            write_atomic(target, content).map_err(|source| MaterializeError::Io {
                path: path.clone(),
                source,
            })?;
        }
        Ok(targets.len())
    }
}

// Atomic write: temp file in the destination directory, then rename.
fn write_atomic(target: &Path, content: &str) -> std::io::Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| std::io::Error::other("target has no parent directory"))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl Materializer for FsMaterializer {
    async fn write(&self, files: &BTreeMap<String, String>) -> MaterializeResult<usize> {
        let targets = files
            .iter()
            .map(|(path, content)| Ok((path.clone(), self.target(path)?, content.clone())))
            .collect::<MaterializeResult<Vec<_>>>()?;

        let written = tokio::task::spawn_blocking(move || Self::write_all(targets))
            .await
            .map_err(|e| MaterializeError::Io {
                path: self.root.display().to_string(),
                source: std::io::Error::other(e),
            })??;

        tracing::debug!(root = %self.root.display(), files = written, "materialized files");
        Ok(written)
    }
}
