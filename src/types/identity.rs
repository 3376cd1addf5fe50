//! Artifact identity types.
//!
//! An [`ArtifactIdentity`] is the deduplication key for everything the
//! bundler touches. The identity → filename mapping defined here is shared
//! bit-for-bit by the store backends and the resolver.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::record::Encoding;

/// Kind of knowledge artifact.
///
/// Ordered so that closures iterate libraries before measures, value sets
/// and scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Clinical logic library.
    Library,
    /// Quality measure definition.
    Measure,
    /// Shared terminology set.
    ValueSet,
    /// Patient test scenario resource.
    TestScenario,
}

impl ArtifactKind {
    /// Parse a kind from a FHIR resource type name.
    ///
    /// Test scenarios have no dedicated resource type and are never
    /// produced here.
    pub fn from_resource_type(s: &str) -> Option<Self> {
        match s {
            "Library" => Some(Self::Library),
            "Measure" => Some(Self::Measure),
            "ValueSet" => Some(Self::ValueSet),
            _ => None,
        }
    }

    /// Filename prefix for resource files of this kind.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Self::Library => "library-",
            Self::Measure => "measure-",
            Self::ValueSet => "valueset-",
            Self::TestScenario => "",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Library => write!(f, "Library"),
            Self::Measure => write!(f, "Measure"),
            Self::ValueSet => write!(f, "ValueSet"),
            Self::TestScenario => write!(f, "TestScenario"),
        }
    }
}

/// Identity of a knowledge artifact.
///
/// Implements `Ord` so closures keyed by identity iterate deterministically.
/// Version qualification is applied by the caller through
/// [`ArtifactIdentity::qualified`]; two identities built under the same
/// qualification compare equal iff kind, name and version match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactIdentity {
    /// Artifact kind.
    pub kind: ArtifactKind,
    /// Artifact name (e.g. `FHIRHelpers`).
    pub name: String,
    /// Optional business version.
    pub version: Option<String>,
}

impl ArtifactIdentity {
    /// Create an unversioned identity.
    pub fn new(kind: ArtifactKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            version: None,
        }
    }

    /// Attach a version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.version = if version.is_empty() { None } else { Some(version) };
        self
    }

    /// Shorthand for a library identity.
    pub fn library(name: impl Into<String>) -> Self {
        Self::new(ArtifactKind::Library, name)
    }

    /// Shorthand for a measure identity.
    pub fn measure(name: impl Into<String>) -> Self {
        Self::new(ArtifactKind::Measure, name)
    }

    /// Shorthand for a value set identity.
    pub fn value_set(name: impl Into<String>) -> Self {
        Self::new(ArtifactKind::ValueSet, name)
    }

    /// Return the identity with its version dropped.
    pub fn unversioned(&self) -> Self {
        Self {
            kind: self.kind,
            name: self.name.clone(),
            version: None,
        }
    }

    /// Apply version qualification: keep the version only when `versioned`.
    pub fn qualified(&self, versioned: bool) -> Self {
        if versioned {
            self.clone()
        } else {
            self.unversioned()
        }
    }

    /// Parse a canonical reference such as
    /// `http://example.org/fhir/Library/Shared|1.0.0` or `Library/Shared`.
    ///
    /// The kind is taken from the path segment preceding the name. Returns
    /// `None` when that segment is not a known resource type.
    pub fn from_canonical(reference: &str) -> Option<Self> {
        let (path, version) = match reference.split_once('|') {
            Some((path, version)) => (path, Some(version)),
            None => (reference, None),
        };

        let mut segments = path.trim_end_matches('/').rsplit('/');
        let name = segments.next().filter(|n| !n.is_empty())?;
        let kind = ArtifactKind::from_resource_type(segments.next()?)?;

        let identity = Self::new(kind, name);
        Some(match version {
            Some(v) => identity.with_version(v),
            None => identity,
        })
    }

    /// Format the on-disk filename for this identity.
    ///
    /// Resource files are kind-prefixed (`library-Shared.json`); CQL sources
    /// carry no prefix (`Shared.cql`). The version suffix is appended only
    /// when `versioned` is set and the identity has a version.
    pub fn file_name(&self, encoding: Encoding, versioned: bool) -> String {
        let prefix = match encoding {
            Encoding::Cql => "",
            _ => self.kind.file_prefix(),
        };
        match (&self.version, versioned) {
            (Some(version), true) => {
                format!("{}{}-{}.{}", prefix, self.name, version, encoding.extension())
            }
            _ => format!("{}{}.{}", prefix, self.name, encoding.extension()),
        }
    }
}

impl fmt::Display for ArtifactIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}/{}|{}", self.kind, self.name, v),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}
