//! Transaction bundle types.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::identity::ArtifactIdentity;
use super::record::ArtifactRecord;

/// Bundle type. Only transactions are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleType {
    /// All entries are applied atomically by the destination store.
    Transaction,
}

impl fmt::Display for BundleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transaction => write!(f, "transaction"),
        }
    }
}

/// HTTP verb of an entry's request directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    /// Idempotent upsert.
    Put,
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put => write!(f, "PUT"),
        }
    }
}

/// A single bundle entry: the resource plus its upsert directive.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleEntry {
    /// The packaged record.
    pub resource: ArtifactRecord,
    /// Logical id the resource is published under (assigned if it had none).
    pub resolved_id: String,
    /// Request method (always PUT).
    pub request_method: RequestMethod,
    /// `resourceType/id` of the resource.
    pub request_url: String,
}

impl BundleEntry {
    /// Identity of the packaged resource.
    pub fn identity(&self) -> &ArtifactIdentity {
        &self.resource.identity
    }
}

/// A transaction bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    /// Bundle id.
    pub id: String,
    /// Bundle type (always transaction).
    pub bundle_type: BundleType,
    /// Entries in input iteration order.
    pub entries: Vec<BundleEntry>,
}

impl Bundle {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the bundle has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Request URLs of all entries, in entry order.
    pub fn request_urls(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.request_url.as_str()).collect()
    }

    /// Check whether an entry for the given identity is present.
    pub fn contains(&self, identity: &ArtifactIdentity) -> bool {
        self.entries.iter().any(|e| e.identity() == identity)
    }
}
