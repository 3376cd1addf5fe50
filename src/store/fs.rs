//! Filesystem-backed artifact store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::types::{ArtifactKind, ArtifactRecord};
use super::{ArtifactStore, RepositoryLayout, StoreError};

/// Artifact store reading from a content repository on disk.
///
/// The repository is assumed read-only for the duration of a run.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    layout: RepositoryLayout,
}

impl FsArtifactStore {
    /// Create a store over the given layout.
    pub fn new(layout: RepositoryLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    fn layout(&self) -> &RepositoryLayout {
        &self.layout
    }

    async fn list_files(&self, dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(dir = %current.display(), "directory absent, treating as empty");
                    continue;
                }
                Err(e) => return Err(StoreError::from_io(&current, e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::from_io(&current, e))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StoreError::from_io(&entry.path(), e))?;
                if file_type.is_dir() {
                    if recursive {
                        pending.push(entry.path());
                    }
                } else {
                    files.push(entry.path());
                }
            }
        }

        files.sort();
        Ok(files)
    }

    async fn load(&self, path: &Path, kind_hint: Option<ArtifactKind>) -> Result<ArtifactRecord, StoreError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::from_io(path, e))?;

        ArtifactRecord::parse(path, bytes, kind_hint).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArtifactIdentity, Encoding};

    #[tokio::test]
    async fn test_list_and_locate() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = RepositoryLayout::new(tmp.path());
        let lib_dir = layout.libraries_dir();
        std::fs::create_dir_all(&lib_dir).unwrap();
        std::fs::write(lib_dir.join("library-B.json"), br#"{"resourceType":"Library","id":"B"}"#).unwrap();
        std::fs::write(lib_dir.join("library-A.json"), br#"{"resourceType":"Library","id":"A"}"#).unwrap();

        let store = FsArtifactStore::new(layout);
        let files = store.list_files(&lib_dir, false).await.unwrap();
        assert_eq!(files, vec![lib_dir.join("library-A.json"), lib_dir.join("library-B.json")]);

        let located = store
            .locate(&lib_dir, &ArtifactIdentity::library("B"), Encoding::Json)
            .await
            .unwrap();
        assert_eq!(located, Some(lib_dir.join("library-B.json")));

        let record = store.load(&lib_dir.join("library-A.json"), None).await.unwrap();
        assert_eq!(record.identity, ArtifactIdentity::library("A"));
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(RepositoryLayout::new(tmp.path()));
        let files = store.list_files(&tmp.path().join("nope"), true).await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_and_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(RepositoryLayout::new(tmp.path()));

        let missing = tmp.path().join("library-Nope.json");
        assert!(matches!(store.load(&missing, None).await, Err(StoreError::NotFound { .. })));

        let bad = tmp.path().join("library-Bad.json");
        std::fs::write(&bad, b"not json").unwrap();
        assert!(matches!(store.load(&bad, None).await, Err(StoreError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_recursive_listing() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("X").join("patient-1");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("Patient.json"), b"{}").unwrap();
        std::fs::write(tmp.path().join("X").join("top.json"), b"{}").unwrap();

        let store = FsArtifactStore::new(RepositoryLayout::new(tmp.path()));
        let flat = store.list_files(&tmp.path().join("X"), false).await.unwrap();
        let deep = store.list_files(&tmp.path().join("X"), true).await.unwrap();

        assert_eq!(flat.len(), 1);
        assert_eq!(deep.len(), 2);
    }
}
