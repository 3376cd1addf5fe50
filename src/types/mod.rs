//! Core types for the bundler.

pub mod identity;
pub mod record;
pub mod bundle;
pub mod outcome;

pub use identity::{ArtifactIdentity, ArtifactKind};
pub use record::{ArtifactRecord, Encoding, RecordError};
pub use bundle::{Bundle, BundleEntry, BundleType, RequestMethod};
pub use outcome::{CandidateOutcome, OutcomeReport};
