//! Best-effort publication of finished bundles.
//!
//! Publishing happens after a bundle is on disk. Errors come back as a
//! [`PublishError`]; callers log them and never let them change a
//! candidate's outcome.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::store::{ArtifactStore, FsArtifactStore, RepositoryLayout};
use crate::types::Encoding;

/// Default request timeout for [`HttpPublisher`].
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(60);

/// Error type for publication.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The destination is not a usable URL.
    #[error("invalid destination {destination}: {message}")]
    InvalidDestination {
        /// Destination as given.
        destination: String,
        /// Parse error.
        message: String,
    },
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The endpoint answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// Status code.
        status: u16,
        /// Response body, or the status text when the body is unreadable.
        message: String,
    },
    /// A directory handed to [`post_bundles_in_dir`] does not exist.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    /// The directory could not be walked.
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for PublishError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Sink for encoded bundles.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Send one encoded bundle document to `destination`.
    async fn publish(&self, destination: &str, body: Vec<u8>, encoding: Encoding) -> Result<(), PublishError>;
}

/// Publisher that POSTs bundles to a FHIR endpoint.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: reqwest::Client,
}

impl HttpPublisher {
    /// Create a publisher with [`DEFAULT_PUBLISH_TIMEOUT`].
    pub fn new() -> Result<Self, PublishError> {
        Self::with_timeout(DEFAULT_PUBLISH_TIMEOUT)
    }

    /// Create a publisher with a request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("knowledge-bundler/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, destination: &str, body: Vec<u8>, encoding: Encoding) -> Result<(), PublishError> {
        let url = reqwest::Url::parse(destination).map_err(|e| PublishError::InvalidDestination {
            destination: destination.to_string(),
            message: e.to_string(),
        })?;

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, encoding.content_type())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(destination, status = status.as_u16(), "bundle published");
            return Ok(());
        }

        let message = response.text().await.unwrap_or_else(|_| status.to_string());
        Err(PublishError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

/// Result of posting a directory of bundles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostSummary {
    /// Files accepted by the endpoint.
    pub posted: Vec<PathBuf>,
    /// Files that failed, with the error message.
    pub failed: Vec<(PathBuf, String)>,
    /// JSON files skipped because they are not bundles.
    pub skipped: Vec<PathBuf>,
}

impl PostSummary {
    /// Whether every bundle was accepted.
    pub fn all_posted(&self) -> bool {
        self.failed.is_empty()
    }
}

fn is_bundle_document(bytes: &[u8]) -> bool {
    serde_json::from_slice::<Value>(bytes)
        .ok()
        .and_then(|v| v.get("resourceType").and_then(Value::as_str).map(|t| t == "Bundle"))
        .unwrap_or(false)
}

/// Post every JSON bundle found (recursively) under `dir`.
///
/// Files that are not `Bundle` documents are skipped. A failure on one
/// file never stops the others.
pub async fn post_bundles_in_dir(
    dir: &Path,
    destination: &str,
    publisher: &dyn Publisher,
) -> Result<PostSummary, PublishError> {
    if !tokio::fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(PublishError::NotADirectory(dir.to_path_buf()));
    }

    let walker = FsArtifactStore::new(RepositoryLayout::new(dir));
    let files = walker
        .list_files(dir, true)
        .await
        .map_err(|e| PublishError::Io(e.to_string()))?;

    let mut summary = PostSummary::default();
    for path in files {
        if Encoding::from_path(&path) != Some(Encoding::Json) {
            continue;
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read bundle");
                summary.failed.push((path, e.to_string()));
                continue;
            }
        };

        if !is_bundle_document(&bytes) {
            debug!(path = %path.display(), "skipping non-bundle file");
            summary.skipped.push(path);
            continue;
        }

        match publisher.publish(destination, bytes, Encoding::Json).await {
            Ok(()) => summary.posted.push(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to post bundle");
                summary.failed.push((path, e.to_string()));
            }
        }
    }

    info!(
        dir = %dir.display(),
        posted = summary.posted.len(),
        failed = summary.failed.len(),
        skipped = summary.skipped.len(),
        "posted bundles"
    );
    Ok(summary)
}
