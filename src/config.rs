//! Run configuration.
//!
//! Options are plain values threaded into the orchestrator; nothing here is
//! process-wide state.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::types::Encoding;

/// Configuration errors. Any of these aborts a run before processing starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Unrecognized FHIR version tag.
    #[error("unknown fhir version: {0}")]
    UnknownFhirVersion(String),
    /// No handler is registered for the FHIR version.
    #[error("no bundle renderer registered for fhir version {0}")]
    UnsupportedFhirVersion(FhirVersion),
    /// Unrecognized encoding name.
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),
    /// The encoding cannot be used for bundle output.
    #[error("unsupported output encoding: {0}")]
    UnsupportedEncoding(Encoding),
    /// A value could not be interpreted.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Option name.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// FHIR schema version the bundles target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FhirVersion {
    /// FHIR STU3.
    Dstu3,
    /// FHIR R4.
    R4,
}

impl FhirVersion {
    /// Parse a version tag (`fhir3`/`dstu3`, `fhir4`/`r4`).
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "fhir3" | "dstu3" | "stu3" => Ok(Self::Dstu3),
            "fhir4" | "r4" => Ok(Self::R4),
            _ => Err(ConfigError::UnknownFhirVersion(s.to_string())),
        }
    }
}

impl Default for FhirVersion {
    fn default() -> Self {
        Self::R4
    }
}

impl fmt::Display for FhirVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dstu3 => write!(f, "fhir3"),
            Self::R4 => write!(f, "fhir4"),
        }
    }
}

/// Options for one bundling run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleOptions {
    /// Include the resolved library dependency closure.
    pub include_dependencies: bool,
    /// Include the terminology (value set) closure.
    pub include_terminology: bool,
    /// Include patient test scenarios.
    pub include_patient_scenarios: bool,
    /// Version-qualify identities and filenames.
    pub include_version: bool,
    /// Restrict the run to a single candidate.
    pub only: Option<String>,
    /// Remote endpoint finished bundles are posted to.
    pub publish_to: Option<String>,
    /// Output encoding of bundle documents.
    pub encoding: Encoding,
    /// Target FHIR version.
    pub fhir_version: FhirVersion,
    /// Maximum candidates processed concurrently.
    pub max_parallel: usize,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            include_dependencies: false,
            include_terminology: false,
            include_patient_scenarios: false,
            include_version: false,
            only: None,
            publish_to: None,
            encoding: Encoding::Json,
            fhir_version: FhirVersion::R4,
            max_parallel: default_parallelism(),
        }
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

impl BundleOptions {
    /// Options with every optional category enabled.
    pub fn everything() -> Self {
        Self {
            include_dependencies: true,
            include_terminology: true,
            include_patient_scenarios: true,
            ..Self::default()
        }
    }

    /// Check the options can produce output at all.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encoding == Encoding::Cql {
            return Err(ConfigError::UnsupportedEncoding(self.encoding));
        }
        if self.max_parallel == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_parallel".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Load options from `BUNDLER_*` environment variables.
    ///
    /// Malformed booleans and parallelism fall back to defaults with a
    /// warning. An unknown encoding or FHIR version is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load options through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        let flag = |key: &str, default: bool| -> bool {
            match lookup(key) {
                Some(value) => parse_bool(key, &value).unwrap_or_else(|e| {
                    warn!(error = %e, "ignoring malformed flag, using default");
                    default
                }),
                None => default,
            }
        };

        options.include_dependencies = flag("BUNDLER_INCLUDE_DEPENDENCIES", options.include_dependencies);
        options.include_terminology = flag("BUNDLER_INCLUDE_TERMINOLOGY", options.include_terminology);
        options.include_patient_scenarios =
            flag("BUNDLER_INCLUDE_PATIENT_SCENARIOS", options.include_patient_scenarios);
        options.include_version = flag("BUNDLER_INCLUDE_VERSION", options.include_version);
        options.only = lookup("BUNDLER_ONLY").filter(|s| !s.is_empty());
        options.publish_to = lookup("BUNDLER_PUBLISH_TO").filter(|s| !s.is_empty());

        if let Some(value) = lookup("BUNDLER_ENCODING") {
            options.encoding = value
                .parse::<Encoding>()
                .map_err(|_| ConfigError::UnknownEncoding(value.clone()))?;
        }
        if let Some(value) = lookup("BUNDLER_FHIR_VERSION") {
            options.fhir_version = FhirVersion::parse(&value)?;
        }
        if let Some(value) = lookup("BUNDLER_MAX_PARALLEL") {
            match value.parse::<usize>() {
                Ok(n) if n > 0 => options.max_parallel = n,
                _ => warn!(value = %value, "ignoring invalid BUNDLER_MAX_PARALLEL"),
            }
        }

        options.validate()?;
        Ok(options)
    }
}
