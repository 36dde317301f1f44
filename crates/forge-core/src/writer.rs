//! Project writer.
//!
//! Mirrors artifact contents to an on-disk project layout. The store itself
//! holds only the in-memory record; every write to the generated project
//! goes through here.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::WriteError;

/// Writes generated sources into a project directory, scaffolding parent
/// directories as needed.
#[derive(Debug, Clone)]
pub struct ProjectWriter {
    root: PathBuf,
}

impl ProjectWriter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `source` to `relative_path` under the project root.
    ///
    /// Returns the full path of the written file.
    pub async fn write(&self, relative_path: &str, source: &str) -> Result<PathBuf, WriteError> {
        let full = self.root.join(relative_path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| WriteError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
        }
        tokio::fs::write(&full, source)
            .await
            .map_err(|source| WriteError::WriteFile {
                path: full.display().to_string(),
                source,
            })?;

        debug!(path = %full.display(), bytes = source.len(), "Artifact written");
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_scaffolds_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ProjectWriter::new(dir.path());

        let path = writer
            .write("models/nested/trade.py", "class Trade: pass\n")
            .await
            .unwrap();

        assert!(path.exists());
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content, "class Trade: pass\n");
    }

    #[tokio::test]
    async fn test_write_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ProjectWriter::new(dir.path());

        writer.write("a.py", "v1").await.unwrap();
        let path = writer.write("a.py", "v2").await.unwrap();

        assert_eq!(std::fs::read_to_string(path).unwrap(), "v2");
    }
}
