//! # knowledge-bundler
//!
//! Packages clinical knowledge artifacts into transaction bundles.
//!
//! For each candidate measure the bundler answers one question:
//!
//! > Which artifacts must travel together so a destination store can load this measure?
//!
//! ## Core Contract
//!
//! 1. Locate the measure and its primary logic library by a shared name
//! 2. Resolve the transitive library closure, guarding against cycles
//! 3. Optionally add terminology (value sets) and patient test scenarios
//! 4. Emit one transaction bundle of PUT upserts per candidate, plus an audit folder
//!
//! ## Architecture
//!
//! ```text
//! candidates → Orchestrator ─┬→ DependencyResolver → ArtifactStore (fs or memory)
//!                            ├→ assemble → RendererTable → CodecRegistry → bundle file
//!                            ├→ AuditWriter → <name>-files/ + manifest.json
//!                            └→ Publisher (best-effort)
//!                    ↓
//!              OutcomeReport
//! ```
//!
//! ## Guarantees
//!
//! - Every eligible candidate appears in exactly one report partition
//! - Resolution terminates on cyclic declarations and reports them
//! - Publish failures never change a candidate's outcome
//! - Configuration errors abort the run before any candidate is touched

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod store;
pub mod resolver;
pub mod assembler;
pub mod codec;
pub mod config;
pub mod digest;
pub mod audit;
pub mod publish;
pub mod orchestrator;

// Re-exports
pub use types::{
    ArtifactIdentity, ArtifactKind, ArtifactRecord, Bundle, BundleEntry, BundleType,
    CandidateOutcome, Encoding, OutcomeReport, RecordError, RequestMethod,
};
pub use store::{
    select_file_name, ArtifactStore, FsArtifactStore, InMemoryArtifactStore, RepositoryLayout,
    StoreError,
};
pub use resolver::{DependencyResolver, FailureKind, ResolutionFailure, ResolutionResult};
pub use assembler::{anonymous_id, assemble, bundle_id_for, AssemblyError, RendererTable};
pub use codec::{CodecError, CodecRegistry};
pub use config::{BundleOptions, ConfigError, FhirVersion};
pub use digest::{canonical_hash_hex, sha256_hex};
pub use audit::{AuditEntry, AuditError, AuditManifest, AuditWriter};
pub use publish::{post_bundles_in_dir, HttpPublisher, PostSummary, PublishError, Publisher};
pub use orchestrator::{CandidateError, CandidateReport, Orchestrator, RunSummary};
