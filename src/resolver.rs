//! Transitive dependency resolver.
//!
//! Walks declared dependencies depth-first from one root artifact and
//! returns the closure of everything it transitively requires. A
//! dependency's file is expected in the same directory as its dependent,
//! under the dependency's formatted filename.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::store::{ArtifactStore, StoreError};
use crate::types::{ArtifactIdentity, ArtifactKind, ArtifactRecord};

/// Why a dependency could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// No file satisfies the dependency.
    NotFound,
    /// The file exists but cannot be decoded.
    ParseError(String),
    /// The dependency is already on the active resolution path.
    CyclicDependency,
    /// Any other store failure.
    Io(String),
}

impl From<&StoreError> for FailureKind {
    fn from(e: &StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => Self::NotFound,
            StoreError::Parse { source, .. } => Self::ParseError(source.to_string()),
            StoreError::Io { message, .. } => Self::Io(message.clone()),
        }
    }
}

/// One failed dependency, recorded against the chain that led to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionFailure {
    /// Identities from the root down to the dependent that declared it.
    pub chain: Vec<ArtifactIdentity>,
    /// The failing identity (`None` when the root itself failed to load).
    pub identity: Option<ArtifactIdentity>,
    /// File that was expected or attempted.
    pub path: PathBuf,
    /// Failure classification.
    pub kind: FailureKind,
}

impl ResolutionFailure {
    /// The artifact whose declaration could not be satisfied.
    pub fn dependent(&self) -> Option<&ArtifactIdentity> {
        self.chain.last()
    }
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self
            .identity
            .as_ref()
            .map_or_else(|| self.path.display().to_string(), ToString::to_string);
        let chain: Vec<String> = self.chain.iter().map(ToString::to_string).collect();

        match &self.kind {
            FailureKind::NotFound => write!(f, "{} not found (expected at {})", target, self.path.display())?,
            FailureKind::ParseError(msg) => write!(f, "{} could not be parsed: {}", target, msg)?,
            FailureKind::CyclicDependency => {
                return write!(f, "cyclic dependency: {} -> {}", chain.join(" -> "), target);
            }
            FailureKind::Io(msg) => write!(f, "{} could not be read: {}", target, msg)?,
        }
        if !chain.is_empty() {
            write!(f, " [required by {}]", chain.join(" -> "))?;
        }
        Ok(())
    }
}

/// Result of one resolution pass.
#[derive(Debug, Clone, Default)]
pub struct ResolutionResult {
    /// Every transitively required artifact, excluding the root. Keys are unique.
    pub closure: BTreeMap<ArtifactIdentity, ArtifactRecord>,
    /// Failures encountered; empty iff the closure can be trusted.
    pub failures: Vec<ResolutionFailure>,
}

impl ResolutionResult {
    /// Whether every dependency resolved.
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether any failure was a cycle.
    pub fn has_cycle(&self) -> bool {
        self.failures.iter().any(|f| f.kind == FailureKind::CyclicDependency)
    }

    /// Number of artifacts in the closure.
    pub fn len(&self) -> usize {
        self.closure.len()
    }

    /// Check if the closure is empty.
    pub fn is_empty(&self) -> bool {
        self.closure.is_empty()
    }
}

/// A node on the active resolution path.
struct Frame {
    identity: ArtifactIdentity,
    dir: PathBuf,
    dependencies: Vec<ArtifactIdentity>,
    next: usize,
}

impl Frame {
    fn new(identity: ArtifactIdentity, record: &ArtifactRecord, versioned: bool, follow: &BTreeSet<ArtifactKind>) -> Self {
        let dir = record
            .source_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let dependencies = record
            .declared_dependencies
            .iter()
            .filter(|d| follow.contains(&d.kind))
            .map(|d| d.qualified(versioned))
            .collect();
        Self { identity, dir, dependencies, next: 0 }
    }
}

/// Depth-first dependency resolver.
///
/// ## Algorithm
///
/// 1. Load the root and push it on the path stack
/// 2. For the next unvisited declaration of the top frame:
///    - already on the path → `CyclicDependency`
///    - already in the closure or already failed → skip
///    - otherwise locate it next to its dependent, load it, insert it
///      (insert-if-absent) and push it
/// 3. Pop frames whose declarations are exhausted
///
/// Failures never stop traversal of sibling declarations.
pub struct DependencyResolver<S: ArtifactStore> {
    store: Arc<S>,
    follow: BTreeSet<ArtifactKind>,
}

impl<S: ArtifactStore> DependencyResolver<S> {
    /// Create a resolver following library dependencies.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_kinds(store, [ArtifactKind::Library])
    }

    /// Create a resolver following the given dependency kinds.
    pub fn with_kinds(store: Arc<S>, kinds: impl IntoIterator<Item = ArtifactKind>) -> Self {
        Self {
            store,
            follow: kinds.into_iter().collect(),
        }
    }

    /// Resolve the closure of the artifact stored at `root_path`.
    pub async fn resolve(&self, root_path: &Path) -> ResolutionResult {
        match self.store.load(root_path, None).await {
            Ok(root) => self.resolve_record(&root).await,
            Err(e) => {
                warn!(path = %root_path.display(), error = %e, "root artifact failed to load");
                ResolutionResult {
                    closure: BTreeMap::new(),
                    failures: vec![ResolutionFailure {
                        chain: Vec::new(),
                        identity: None,
                        path: root_path.to_path_buf(),
                        kind: FailureKind::from(&e),
                    }],
                }
            }
        }
    }

    /// Resolve the closure of an already loaded root record.
    pub async fn resolve_record(&self, root: &ArtifactRecord) -> ResolutionResult {
        let layout = self.store.layout();
        let versioned = layout.versioned;
        let encoding = layout.source_encoding;

        let mut result = ResolutionResult::default();
        let mut failed: BTreeSet<ArtifactIdentity> = BTreeSet::new();
        let mut on_path: BTreeSet<ArtifactIdentity> = BTreeSet::new();

        let root_identity = root.identity.qualified(versioned);
        on_path.insert(root_identity.clone());
        let mut stack = vec![Frame::new(root_identity, root, versioned, &self.follow)];

        while let Some(top) = stack.last_mut() {
            let Some(dependency) = top.dependencies.get(top.next).cloned() else {
                if let Some(done) = stack.pop() {
                    on_path.remove(&done.identity);
                }
                continue;
            };
            top.next += 1;
            let dir = top.dir.clone();

            if on_path.contains(&dependency) {
                let failure = ResolutionFailure {
                    chain: stack.iter().map(|f| f.identity.clone()).collect(),
                    identity: Some(dependency.clone()),
                    path: dir.join(dependency.file_name(encoding, versioned)),
                    kind: FailureKind::CyclicDependency,
                };
                warn!(failure = %failure, "dependency cycle detected");
                result.failures.push(failure);
                continue;
            }

            if result.closure.contains_key(&dependency) || failed.contains(&dependency) {
                continue;
            }

            let chain = || stack.iter().map(|f| f.identity.clone()).collect::<Vec<_>>();

            let located = match self.store.locate(&dir, &dependency, encoding).await {
                Ok(located) => located,
                Err(e) => {
                    result.failures.push(ResolutionFailure {
                        chain: chain(),
                        identity: Some(dependency.clone()),
                        path: dir.clone(),
                        kind: FailureKind::from(&e),
                    });
                    failed.insert(dependency);
                    continue;
                }
            };

            let Some(path) = located else {
                let failure = ResolutionFailure {
                    chain: chain(),
                    identity: Some(dependency.clone()),
                    path: dir.join(dependency.file_name(encoding, versioned)),
                    kind: FailureKind::NotFound,
                };
                warn!(failure = %failure, "dependency not found");
                result.failures.push(failure);
                failed.insert(dependency);
                continue;
            };

            match self.store.load(&path, None).await {
                Ok(record) => {
                    debug!(dependency = %dependency, path = %path.display(), "resolved dependency");
                    let frame = Frame::new(dependency.clone(), &record, versioned, &self.follow);
                    result.closure.entry(dependency.clone()).or_insert(record);
                    on_path.insert(dependency);
                    stack.push(frame);
                }
                Err(e) => {
                    let failure = ResolutionFailure {
                        chain: chain(),
                        identity: Some(dependency.clone()),
                        path: path.clone(),
                        kind: FailureKind::from(&e),
                    };
                    warn!(failure = %failure, "dependency failed to load");
                    result.failures.push(failure);
                    failed.insert(dependency);
                }
            }
        }

        result
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        &self.store
    }
}
