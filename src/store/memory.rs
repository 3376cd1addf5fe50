//! In-memory artifact store for testing.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::{ArtifactKind, ArtifactRecord};
use super::{ArtifactStore, RepositoryLayout, StoreError};

/// In-memory artifact store for testing.
///
/// Files are keyed by virtual path in a `BTreeMap`, so listings come out
/// sorted without extra work.
#[derive(Debug, Clone)]
pub struct InMemoryArtifactStore {
    layout: RepositoryLayout,
    files: BTreeMap<PathBuf, Vec<u8>>,
}

impl InMemoryArtifactStore {
    /// Create an empty store with the given layout.
    pub fn new(layout: RepositoryLayout) -> Self {
        Self {
            layout,
            files: BTreeMap::new(),
        }
    }

    /// Add (or replace) a file.
    pub fn add_file(&mut self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), content.into());
    }

    /// Remove a file, returning its content.
    pub fn remove_file(&mut self, path: &Path) -> Option<Vec<u8>> {
        self.files.remove(path)
    }

    /// Number of files held.
    pub fn num_files(&self) -> usize {
        self.files.len()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    fn layout(&self) -> &RepositoryLayout {
        &self.layout
    }

    async fn list_files(&self, dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, StoreError> {
        Ok(self
            .files
            .keys()
            .filter(|path| {
                if recursive {
                    path.starts_with(dir)
                } else {
                    path.parent() == Some(dir)
                }
            })
            .cloned()
            .collect())
    }

    async fn load(&self, path: &Path, kind_hint: Option<ArtifactKind>) -> Result<ArtifactRecord, StoreError> {
        let bytes = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { path: path.to_path_buf() })?;

        ArtifactRecord::parse(path, bytes, kind_hint).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
