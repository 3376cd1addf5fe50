//! Audit folder for a bundled candidate.
//!
//! Next to each bundle the raw source files that went into it are copied
//! verbatim, together with per-category sub-bundles and a `manifest.json`
//! listing every file with its size and SHA-256 digest.
//!
//! Nothing in here affects a candidate's outcome. The orchestrator logs
//! [`AuditError`]s and moves on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::digest::{canonical_hash_hex, sha256_hex};
use crate::types::ArtifactRecord;

/// Version of the manifest layout.
pub const AUDIT_SCHEMA_VERSION: &str = "1.0.0";

/// File name of the manifest inside an audit folder.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Error type for audit folder writes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    /// Filesystem failure.
    #[error("i/o error on {path}: {message}")]
    Io {
        /// Path being written.
        path: PathBuf,
        /// Error message.
        message: String,
    },
    /// The relative path would escape the audit folder.
    #[error("refusing to write outside the audit folder: {0}")]
    InvalidPath(String),
    /// Manifest serialization failed.
    #[error("failed to serialize manifest: {0}")]
    Serialize(String),
}

/// One file in the audit folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Path relative to the audit folder, `/`-separated.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// SHA-256 of the content, lowercase hex.
    pub sha256: String,
}

/// The manifest written as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditManifest {
    /// Fingerprint of candidate, bundle id and file digests.
    pub manifest_id: String,
    /// Schema version.
    pub version: String,
    /// Candidate name.
    pub candidate: String,
    /// Id of the main bundle.
    pub bundle_id: String,
    /// When the manifest was written.
    pub computed_at: DateTime<Utc>,
    /// Files, sorted by path.
    pub files: Vec<AuditEntry>,
}

impl AuditManifest {
    /// Look up an entry by relative path.
    pub fn entry(&self, path: &str) -> Option<&AuditEntry> {
        self.files.iter().find(|e| e.path == path)
    }
}

#[derive(Serialize)]
struct ManifestIdInput<'a> {
    candidate: &'a str,
    bundle_id: &'a str,
    files: &'a [AuditEntry],
}

/// Incremental writer for one audit folder.
#[derive(Debug)]
pub struct AuditWriter {
    dir: PathBuf,
    entries: BTreeMap<String, AuditEntry>,
}

impl AuditWriter {
    /// Create a writer rooted at `dir`. Nothing touches disk until the
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Audit folder root.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of files written so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was written yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write `bytes` at `relative` inside the folder.
    ///
    /// Writing the same relative path twice keeps the last content.
    pub async fn write(&mut self, relative: &str, bytes: &[u8]) -> Result<(), AuditError> {
        let relative_path = Path::new(relative);
        let escapes = relative_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if relative.is_empty() || escapes {
            return Err(AuditError::InvalidPath(relative.to_string()));
        }

        let target = self.dir.join(relative_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| io_error(&target, e))?;

        let path = relative_path
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect::<Vec<_>>()
            .join("/");
        debug!(path = %path, size = bytes.len(), "audit file written");
        self.entries.insert(
            path.clone(),
            AuditEntry {
                path,
                size: bytes.len() as u64,
                sha256: sha256_hex(bytes),
            },
        );
        Ok(())
    }

    /// Copy a record's raw bytes under its source file name, optionally
    /// inside `subdir`.
    pub async fn copy_record(&mut self, record: &ArtifactRecord, subdir: Option<&str>) -> Result<(), AuditError> {
        let file_name = record
            .source_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AuditError::InvalidPath(record.source_path.display().to_string()))?;
        let relative = match subdir {
            Some(subdir) => format!("{}/{}", subdir.trim_end_matches('/'), file_name),
            None => file_name.to_string(),
        };
        self.write(&relative, &record.raw_content).await
    }

    /// Write `manifest.json` and return the manifest.
    pub async fn finish(self, candidate: &str, bundle_id: &str) -> Result<AuditManifest, AuditError> {
        let files: Vec<AuditEntry> = self.entries.into_values().collect();

        let manifest_id = canonical_hash_hex(&ManifestIdInput {
            candidate,
            bundle_id,
            files: &files,
        })
        .map_err(|e| AuditError::Serialize(e.to_string()))?;

        let manifest = AuditManifest {
            manifest_id,
            version: AUDIT_SCHEMA_VERSION.to_string(),
            candidate: candidate.to_string(),
            bundle_id: bundle_id.to_string(),
            computed_at: Utc::now(),
            files,
        };

        let bytes = serde_json::to_vec_pretty(&manifest).map_err(|e| AuditError::Serialize(e.to_string()))?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        let target = self.dir.join(MANIFEST_FILE_NAME);
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| io_error(&target, e))?;

        Ok(manifest)
    }
}

fn io_error(path: &Path, e: std::io::Error) -> AuditError {
    AuditError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}
