//! Transaction bundle assembly.
//!
//! Turns a flat identity → record mapping into a [`Bundle`] and renders
//! bundles into documents through a per-version dispatch table.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{ConfigError, FhirVersion};
use crate::types::{
    ArtifactIdentity, ArtifactRecord, Bundle, BundleEntry, BundleType, Encoding, RequestMethod,
};

/// Suffix stripped from a bundle id before scoping anonymous resource ids.
pub const BUNDLE_ID_SUFFIX: &str = "-bundle";

/// Error type for assembly and rendering.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    /// The record is not a packageable resource (e.g. CQL source text).
    #[error("{0} is not a bundleable resource")]
    NotAResource(ArtifactIdentity),
    /// The resource content could not be rendered.
    #[error("failed to render {identity}: {message}")]
    Render {
        /// Resource being rendered.
        identity: ArtifactIdentity,
        /// Error message.
        message: String,
    },
}

/// Build the bundle id for a candidate name.
pub fn bundle_id_for(name: &str) -> String {
    format!("{}{}", name, BUNDLE_ID_SUFFIX)
}

/// Synthesize an id for an anonymous resource, scoped to a bundle id.
///
/// Ids are random: re-running produces different but collision-free values.
pub fn anonymous_id(bundle_id: &str) -> String {
    let base = bundle_id.strip_suffix(BUNDLE_ID_SUFFIX).unwrap_or(bundle_id);
    format!("{}-{}", base, Uuid::new_v4())
}

/// Assemble a transaction bundle.
///
/// Entries follow the iteration order of `resources`; that order is not a
/// contract. Every entry is a PUT to `resourceType/id`. When several records
/// resolve to the same `resourceType/id` the first one is kept.
pub fn assemble(
    bundle_id: &str,
    resources: &BTreeMap<ArtifactIdentity, ArtifactRecord>,
) -> Result<Bundle, AssemblyError> {
    let mut entries: Vec<BundleEntry> = Vec::with_capacity(resources.len());
    let mut urls: BTreeMap<String, usize> = BTreeMap::new();

    for (identity, record) in resources {
        if record.encoding == Encoding::Cql || record.resource_type.is_empty() {
            return Err(AssemblyError::NotAResource(identity.clone()));
        }

        let resolved_id = match &record.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => {
                let id = anonymous_id(bundle_id);
                debug!(identity = %identity, id = %id, "assigned id to anonymous resource");
                id
            }
        };

        let request_url = format!("{}/{}", record.resource_type, resolved_id);
        if let Some(&kept) = urls.get(&request_url) {
            let first = &entries[kept].resource;
            if first.raw_content == record.raw_content {
                debug!(url = %request_url, dropped = %record.source_path.display(), "duplicate resource skipped");
            } else {
                warn!(
                    url = %request_url,
                    kept = %first.source_path.display(),
                    dropped = %record.source_path.display(),
                    "conflicting resource skipped, first one kept"
                );
            }
            continue;
        }
        urls.insert(request_url.clone(), entries.len());

        entries.push(BundleEntry {
            resource: record.clone(),
            resolved_id,
            request_method: RequestMethod::Put,
            request_url,
        });
    }

    Ok(Bundle {
        id: bundle_id.to_string(),
        bundle_type: BundleType::Transaction,
        entries,
    })
}

/// Render function for one FHIR version.
pub type RenderFn = fn(&Bundle) -> Result<Value, AssemblyError>;

/// Dispatch table from FHIR version to bundle renderer.
///
/// STU3 and R4 share one transaction layout, so the defaults register the
/// same renderer under both tags. Adding a version means registering a
/// handler here.
#[derive(Clone)]
pub struct RendererTable {
    renderers: BTreeMap<FhirVersion, RenderFn>,
}

impl RendererTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            renderers: BTreeMap::new(),
        }
    }

    /// Create a table with the built-in STU3 and R4 renderers.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.register(FhirVersion::Dstu3, render_transaction);
        table.register(FhirVersion::R4, render_transaction);
        table
    }

    /// Register (or replace) the renderer for a version.
    pub fn register(&mut self, version: FhirVersion, render: RenderFn) {
        self.renderers.insert(version, render);
    }

    /// Look up the renderer for a version.
    pub fn renderer(&self, version: FhirVersion) -> Result<RenderFn, ConfigError> {
        self.renderers
            .get(&version)
            .copied()
            .ok_or(ConfigError::UnsupportedFhirVersion(version))
    }

    /// Versions with a registered renderer.
    pub fn versions(&self) -> Vec<FhirVersion> {
        self.renderers.keys().copied().collect()
    }
}

impl std::fmt::Debug for RendererTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererTable")
            .field("versions", &self.versions())
            .finish()
    }
}

impl Default for RendererTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Resource body with its resolved id written in.
fn resource_body(entry: &BundleEntry) -> Result<Map<String, Value>, AssemblyError> {
    let render_error = |message: String| AssemblyError::Render {
        identity: entry.identity().clone(),
        message,
    };

    let value = entry.resource.json().map_err(|e| render_error(e.to_string()))?;
    let Value::Object(mut body) = value else {
        return Err(render_error("resource is not a JSON object".to_string()));
    };
    body.insert("id".to_string(), Value::String(entry.resolved_id.clone()));
    Ok(body)
}

/// Transaction bundle document, shared by STU3 and R4.
fn render_transaction(bundle: &Bundle) -> Result<Value, AssemblyError> {
    let entries = bundle
        .entries
        .iter()
        .map(|entry| {
            Ok(json!({
                "resource": Value::Object(resource_body(entry)?),
                "request": {
                    "method": entry.request_method.to_string(),
                    "url": entry.request_url,
                },
            }))
        })
        .collect::<Result<Vec<Value>, AssemblyError>>()?;

    Ok(json!({
        "resourceType": "Bundle",
        "id": bundle.id,
        "type": bundle.bundle_type.to_string(),
        "entry": entries,
    }))
}
