//! Artifact storage backends.
//!
//! The store answers three questions for the resolver and orchestrator:
//! which files live in a directory, where the file for an identity lives,
//! and what a file contains.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{ArtifactIdentity, ArtifactKind, ArtifactRecord, Encoding, RecordError};

/// Error type for store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No file at the given path.
    #[error("artifact not found: {path}")]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },
    /// The file exists but cannot be decoded.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Path of the offending file.
        path: PathBuf,
        /// Decode error.
        source: RecordError,
    },
    /// Any other I/O failure.
    #[error("i/o error on {path}: {message}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Error message.
        message: String,
    },
}

impl StoreError {
    /// Build from an `std::io::Error`, mapping `NotFound` to [`StoreError::NotFound`].
    pub fn from_io(path: &Path, e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path: path.to_path_buf() }
        } else {
            Self::Io { path: path.to_path_buf(), message: e.to_string() }
        }
    }
}

/// Directory layout of a content repository.
///
/// All paths are threaded through this value; nothing is process-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryLayout {
    /// Repository root.
    pub root: PathBuf,
    /// Library resources, relative to `root`.
    pub libraries: PathBuf,
    /// Measure resources, relative to `root`.
    pub measures: PathBuf,
    /// CQL sources, relative to `root`.
    pub cql: PathBuf,
    /// Value set resources, relative to `root`.
    pub valuesets: PathBuf,
    /// Test scenarios (`<tests>/<measure>/...`), relative to `root`.
    pub tests: PathBuf,
    /// Bundle output root, relative to `root`.
    pub bundles: PathBuf,
    /// Encoding of resource files in the repository.
    pub source_encoding: Encoding,
    /// Whether identities and filenames are version-qualified.
    pub versioned: bool,
}

impl RepositoryLayout {
    /// Standard implementation-guide layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            libraries: PathBuf::from("input/resources/library"),
            measures: PathBuf::from("input/resources/measure"),
            cql: PathBuf::from("input/cql"),
            valuesets: PathBuf::from("input/vocabulary/valueset"),
            tests: PathBuf::from("input/tests"),
            bundles: PathBuf::from("bundles"),
            source_encoding: Encoding::Json,
            versioned: false,
        }
    }

    /// Set version qualification.
    pub fn with_versioning(mut self, versioned: bool) -> Self {
        self.versioned = versioned;
        self
    }

    /// Set the encoding of resource files.
    pub fn with_source_encoding(mut self, encoding: Encoding) -> Self {
        self.source_encoding = encoding;
        self
    }

    /// Absolute library directory.
    pub fn libraries_dir(&self) -> PathBuf {
        self.root.join(&self.libraries)
    }

    /// Absolute measure directory.
    pub fn measures_dir(&self) -> PathBuf {
        self.root.join(&self.measures)
    }

    /// Absolute CQL directory.
    pub fn cql_dir(&self) -> PathBuf {
        self.root.join(&self.cql)
    }

    /// Absolute value set directory.
    pub fn valuesets_dir(&self) -> PathBuf {
        self.root.join(&self.valuesets)
    }

    /// Absolute test scenario directory for one measure.
    pub fn tests_dir(&self, name: &str) -> PathBuf {
        self.root.join(&self.tests).join(name)
    }

    /// Absolute bundle output root.
    pub fn bundles_dir(&self) -> PathBuf {
        self.root.join(&self.bundles)
    }
}

/// Pick the file that satisfies `identity` among the names in one directory.
///
/// The exact formatted filename always wins. When it is absent and the
/// lookup is not pinned to a version, the lexicographically first
/// `<prefix><name>-<digit...>.<ext>` sibling is chosen.
pub fn select_file_name<'a, I>(
    names: I,
    identity: &ArtifactIdentity,
    encoding: Encoding,
    versioned: bool,
) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let names: Vec<&str> = names.into_iter().collect();
    let exact = identity.file_name(encoding, versioned);
    if names.contains(&exact.as_str()) {
        return Some(exact);
    }

    if versioned && identity.version.is_some() {
        return None;
    }

    let stem_prefix = format!("{}-", identity.unversioned().file_name(encoding, false)
        .trim_end_matches(&format!(".{}", encoding.extension())));
    let suffix = format!(".{}", encoding.extension());

    let mut matches: Vec<&str> = names
        .into_iter()
        .filter(|n| {
            n.strip_prefix(stem_prefix.as_str())
                .and_then(|rest| rest.strip_suffix(suffix.as_str()))
                .and_then(|version| version.chars().next())
                .map_or(false, |c| c.is_ascii_digit())
        })
        .collect();
    matches.sort_unstable();
    matches.first().map(|n| n.to_string())
}

/// Trait for artifact storage backends.
///
/// Implementations must return directory listings in sorted order.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// The repository layout this store serves.
    fn layout(&self) -> &RepositoryLayout;

    /// List files in a directory (sorted). A missing directory is empty.
    async fn list_files(&self, dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, StoreError>;

    /// Load and decode one file.
    async fn load(&self, path: &Path, kind_hint: Option<ArtifactKind>) -> Result<ArtifactRecord, StoreError>;

    /// Locate the file for an identity in `dir`, following the filename
    /// convention and disambiguation rule of [`select_file_name`].
    async fn locate(
        &self,
        dir: &Path,
        identity: &ArtifactIdentity,
        encoding: Encoding,
    ) -> Result<Option<PathBuf>, StoreError> {
        let files = self.list_files(dir, false).await?;
        let names = files
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()));
        Ok(select_file_name(names, identity, encoding, self.layout().versioned).map(|n| dir.join(n)))
    }
}

pub use fs::FsArtifactStore;
pub use memory::InMemoryArtifactStore;
