//! Bundle orchestration.
//!
//! Drives every candidate through the same sequential pipeline:
//!
//! ```text
//! locate measure + library ─┬─ not found / unreadable ──────────────► FAILED
//!                           │
//! gather optional content ──┼─ any included category incomplete ────► REFRESHED
//!                           │
//! assemble → render → write ┼─ any step fails ──────────────────────► REFRESHED
//!                           │
//! audit copy, publish ──────┴─ errors logged only ──────────────────► BUNDLED
//! ```
//!
//! Candidates run as independent tasks bounded by `max_parallel`. Each task
//! returns its own [`CandidateReport`]; a single reducer turns those into the
//! [`OutcomeReport`] once every task has finished.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::assembler::{assemble, bundle_id_for, AssemblyError, RenderFn, RendererTable};
use crate::audit::{AuditError, AuditManifest, AuditWriter};
use crate::codec::{CodecError, CodecRegistry, EncodeFn};
use crate::config::{BundleOptions, ConfigError};
use crate::publish::Publisher;
use crate::resolver::DependencyResolver;
use crate::store::{ArtifactStore, FsArtifactStore, RepositoryLayout, StoreError};
use crate::types::{
    ArtifactIdentity, ArtifactKind, ArtifactRecord, CandidateOutcome, Encoding, OutcomeReport,
};

/// Prefix of the terminology sub-bundle id.
pub const VALUESETS_BUNDLE_PREFIX: &str = "valuesets-";

/// Prefix of the library dependency sub-bundle id.
pub const LIBRARY_DEPS_BUNDLE_PREFIX: &str = "library-deps-";

/// Why a candidate was not bundled.
#[derive(Debug, thiserror::Error)]
pub enum CandidateError {
    /// No measure file for the candidate name.
    #[error("measure {0} not found")]
    MeasureNotFound(String),
    /// No library file for the candidate name.
    #[error("library {0} not found")]
    LibraryNotFound(String),
    /// A mandatory file could not be read or decoded.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An included optional category could not be gathered completely.
    #[error("incomplete content: {}", .0.join("; "))]
    Incomplete(Vec<String>),
    /// Bundle assembly or rendering failed.
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    /// Encoding the bundle document failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The bundle could not be written.
    #[error("failed to write {path}: {message}")]
    Write {
        /// Target path.
        path: PathBuf,
        /// Error message.
        message: String,
    },
}

impl CandidateError {
    /// Terminal outcome this error leads to.
    pub fn outcome(&self) -> CandidateOutcome {
        match self {
            Self::MeasureNotFound(_) | Self::LibraryNotFound(_) | Self::Store(_) => {
                CandidateOutcome::Failed
            }
            _ => CandidateOutcome::RefreshedNotBundled,
        }
    }

    /// Human-readable details for the outcome report.
    pub fn details(&self) -> Vec<String> {
        match self {
            Self::Incomplete(problems) => problems.clone(),
            other => vec![other.to_string()],
        }
    }
}

/// Result of processing one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateReport {
    /// Candidate name.
    pub name: String,
    /// Terminal outcome.
    pub outcome: CandidateOutcome,
    /// What blocked the candidate, if anything.
    pub details: Vec<String>,
    /// Written bundle, when bundled.
    pub bundle_path: Option<PathBuf>,
    /// Number of bundle entries, when bundled.
    pub entry_count: usize,
    /// Audit manifest, when the audit folder was written.
    pub audit: Option<AuditManifest>,
    /// `Some(accepted)` when publishing was attempted.
    pub published: Option<bool>,
}

impl CandidateReport {
    fn from_error(name: String, e: &CandidateError) -> Self {
        Self {
            name,
            outcome: e.outcome(),
            details: e.details(),
            bundle_path: None,
            entry_count: 0,
            audit: None,
            published: None,
        }
    }
}

/// Outcome report plus per-candidate reports.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Partitioned report over the eligible set.
    pub report: OutcomeReport,
    /// Per-candidate reports, keyed by name.
    pub candidates: BTreeMap<String, CandidateReport>,
}

/// Directory holding everything written for one candidate.
pub fn candidate_dir(layout: &RepositoryLayout, name: &str) -> PathBuf {
    layout.bundles_dir().join(name)
}

/// Path of a candidate's bundle document.
pub fn bundle_path(layout: &RepositoryLayout, name: &str, encoding: Encoding) -> PathBuf {
    candidate_dir(layout, name).join(format!("{}.{}", bundle_id_for(name), encoding.extension()))
}

/// Path of a candidate's audit folder.
pub fn audit_dir(layout: &RepositoryLayout, name: &str) -> PathBuf {
    candidate_dir(layout, name).join(format!("{}-files", name))
}

/// Everything gathered for one candidate.
struct Gathered {
    measure: ArtifactRecord,
    library: ArtifactRecord,
    cql: Option<ArtifactRecord>,
    dependencies: BTreeMap<ArtifactIdentity, ArtifactRecord>,
    value_sets: BTreeMap<ArtifactIdentity, ArtifactRecord>,
    /// Scenario records keyed by their path relative to the tests folder.
    scenarios: BTreeMap<String, ArtifactRecord>,
}

impl Gathered {
    fn resources(&self, versioned: bool) -> BTreeMap<ArtifactIdentity, ArtifactRecord> {
        let mut resources = BTreeMap::new();
        resources.insert(self.measure.identity.qualified(versioned), self.measure.clone());
        resources.insert(self.library.identity.qualified(versioned), self.library.clone());
        for (identity, record) in self.dependencies.iter().chain(&self.value_sets) {
            resources.entry(identity.clone()).or_insert_with(|| record.clone());
        }
        for (relative, record) in &self.scenarios {
            let identity = ArtifactIdentity::new(ArtifactKind::TestScenario, relative.as_str());
            resources.entry(identity).or_insert_with(|| record.clone());
        }
        resources
    }
}

/// Per-run state shared by candidate tasks. Read-only once built.
struct Pipeline<S: ArtifactStore> {
    store: Arc<S>,
    resolver: DependencyResolver<S>,
    publisher: Option<Arc<dyn Publisher>>,
    options: BundleOptions,
    render: RenderFn,
    encode: EncodeFn,
}

impl<S: ArtifactStore> Pipeline<S> {
    async fn process(&self, name: String) -> CandidateReport {
        match self.bundle_candidate(&name).await {
            Ok(report) => report,
            Err(e) => {
                match e.outcome() {
                    CandidateOutcome::Failed => error!(error = %e, "candidate failed"),
                    _ => warn!(error = %e, "candidate refreshed but not bundled"),
                }
                CandidateReport::from_error(name, &e)
            }
        }
    }

    async fn bundle_candidate(&self, name: &str) -> Result<CandidateReport, CandidateError> {
        let layout = self.store.layout();
        let mut gathered = self.gather_mandatory(name).await?;

        let problems = self.gather_optional(name, &mut gathered).await;
        if !problems.is_empty() {
            return Err(CandidateError::Incomplete(problems));
        }

        let bundle_id = bundle_id_for(name);
        let resources = gathered.resources(layout.versioned);
        let (bytes, entry_count) = self.render_bytes(&bundle_id, &resources)?;
        let path = self.write_bundle(name, &bytes).await?;
        info!(path = %path.display(), entries = entry_count, "bundle written");

        let audit = match self.write_audit(name, &bundle_id, &gathered).await {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(error = %e, "audit folder incomplete");
                None
            }
        };

        let published = self.publish(bytes).await;

        Ok(CandidateReport {
            name: name.to_string(),
            outcome: CandidateOutcome::Bundled,
            details: Vec::new(),
            bundle_path: Some(path),
            entry_count,
            audit,
            published,
        })
    }

    async fn gather_mandatory(&self, name: &str) -> Result<Gathered, CandidateError> {
        let layout = self.store.layout();
        let encoding = layout.source_encoding;

        let measure_path = self
            .store
            .locate(&layout.measures_dir(), &ArtifactIdentity::measure(name), encoding)
            .await?
            .ok_or_else(|| CandidateError::MeasureNotFound(name.to_string()))?;
        let measure = self.store.load(&measure_path, Some(ArtifactKind::Measure)).await?;

        let library_path = self
            .store
            .locate(&layout.libraries_dir(), &ArtifactIdentity::library(name), encoding)
            .await?
            .ok_or_else(|| CandidateError::LibraryNotFound(name.to_string()))?;
        let library = self.store.load(&library_path, Some(ArtifactKind::Library)).await?;

        let cql = match self
            .store
            .locate(&layout.cql_dir(), &ArtifactIdentity::library(name), Encoding::Cql)
            .await
        {
            Ok(Some(path)) => match self.store.load(&path, Some(ArtifactKind::Library)).await {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "cql source unreadable, not copied");
                    None
                }
            },
            Ok(None) => {
                debug!("no cql source");
                None
            }
            Err(e) => {
                warn!(error = %e, "cql directory unreadable");
                None
            }
        };

        Ok(Gathered {
            measure,
            library,
            cql,
            dependencies: BTreeMap::new(),
            value_sets: BTreeMap::new(),
            scenarios: BTreeMap::new(),
        })
    }

    /// Gather the enabled optional categories. Returns every problem found.
    async fn gather_optional(&self, name: &str, gathered: &mut Gathered) -> Vec<String> {
        let layout = self.store.layout();
        let versioned = layout.versioned;
        let encoding = layout.source_encoding;
        let mut problems = Vec::new();

        if self.options.include_dependencies {
            let resolution = self.resolver.resolve_record(&gathered.library).await;
            problems.extend(resolution.failures.iter().map(ToString::to_string));
            debug!(closure = resolution.len(), "dependencies resolved");
            gathered.dependencies = resolution.closure;
        }

        if self.options.include_terminology {
            let wanted: BTreeSet<ArtifactIdentity> = std::iter::once(&gathered.library)
                .chain(gathered.dependencies.values())
                .flat_map(|record| record.dependencies_of_kind(ArtifactKind::ValueSet))
                .map(|identity| identity.qualified(versioned))
                .collect();

            let dir = layout.valuesets_dir();
            for identity in wanted {
                match self.store.locate(&dir, &identity, encoding).await {
                    Ok(Some(path)) => match self.store.load(&path, Some(ArtifactKind::ValueSet)).await {
                        Ok(record) => {
                            gathered.value_sets.insert(identity, record);
                        }
                        Err(e) => problems.push(format!("{}: {}", identity, e)),
                    },
                    Ok(None) => problems.push(format!(
                        "{}: not found in {}",
                        identity,
                        dir.display()
                    )),
                    Err(e) => problems.push(format!("{}: {}", identity, e)),
                }
            }
        }

        if self.options.include_patient_scenarios {
            let dir = layout.tests_dir(name);
            match self.store.list_files(&dir, true).await {
                Ok(files) => {
                    for path in files {
                        if Encoding::from_path(&path) != Some(encoding) {
                            continue;
                        }
                        let Some(relative) = relative_path(&dir, &path) else {
                            continue;
                        };
                        match self.store.load(&path, Some(ArtifactKind::TestScenario)).await {
                            Ok(record) => {
                                gathered.scenarios.insert(relative, record);
                            }
                            Err(e) => problems.push(e.to_string()),
                        }
                    }
                }
                Err(e) => problems.push(e.to_string()),
            }
        }

        problems
    }

    fn render_bytes(
        &self,
        bundle_id: &str,
        resources: &BTreeMap<ArtifactIdentity, ArtifactRecord>,
    ) -> Result<(Vec<u8>, usize), CandidateError> {
        let bundle = assemble(bundle_id, resources)?;
        let document = (self.render)(&bundle)?;
        let bytes = (self.encode)(&document)?;
        Ok((bytes, bundle.len()))
    }

    /// Recreate the candidate directory and write the bundle into it.
    async fn write_bundle(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, CandidateError> {
        let layout = self.store.layout();
        let dir = candidate_dir(layout, name);
        let write_error = |path: &Path, e: std::io::Error| CandidateError::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(dir = %dir.display(), "cleared previous output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(write_error(&dir, e)),
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| write_error(&dir, e))?;

        let path = bundle_path(layout, name, self.options.encoding);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| write_error(&path, e))?;
        Ok(path)
    }

    async fn write_audit(
        &self,
        name: &str,
        bundle_id: &str,
        gathered: &Gathered,
    ) -> Result<AuditManifest, AuditError> {
        let layout = self.store.layout();
        let extension = self.options.encoding.extension();
        let mut writer = AuditWriter::new(audit_dir(layout, name));

        writer.copy_record(&gathered.measure, None).await?;
        writer.copy_record(&gathered.library, None).await?;
        if let Some(cql) = &gathered.cql {
            writer.copy_record(cql, None).await?;
        }
        for record in gathered.dependencies.values().chain(gathered.value_sets.values()) {
            writer.copy_record(record, None).await?;
        }
        for (relative, record) in &gathered.scenarios {
            let subdir = match relative.rsplit_once('/') {
                Some((parent, _)) => format!("tests/{}", parent),
                None => "tests".to_string(),
            };
            writer.copy_record(record, Some(&subdir)).await?;
        }

        let sub_bundles = [
            (VALUESETS_BUNDLE_PREFIX, &gathered.value_sets),
            (LIBRARY_DEPS_BUNDLE_PREFIX, &gathered.dependencies),
        ];
        for (prefix, resources) in sub_bundles {
            if resources.is_empty() {
                continue;
            }
            let sub_id = format!("{}{}", prefix, bundle_id);
            match self.render_bytes(&sub_id, resources) {
                Ok((bytes, _)) => writer.write(&format!("{}.{}", sub_id, extension), &bytes).await?,
                Err(e) => warn!(bundle = %sub_id, error = %e, "sub-bundle skipped"),
            }
        }

        let manifest = writer.finish(name, bundle_id).await?;
        debug!(files = manifest.files.len(), manifest_id = %manifest.manifest_id, "audit folder written");
        Ok(manifest)
    }

    /// Publish best-effort. Errors are logged and never change the outcome.
    async fn publish(&self, bytes: Vec<u8>) -> Option<bool> {
        let destination = self.options.publish_to.as_deref()?;
        let publisher = self.publisher.as_ref()?;

        match publisher.publish(destination, bytes, self.options.encoding).await {
            Ok(()) => {
                info!(destination, "bundle published");
                Some(true)
            }
            Err(e) => {
                warn!(destination, error = %e, "publish failed, outcome unchanged");
                Some(false)
            }
        }
    }
}

fn relative_path(base: &Path, path: &Path) -> Option<String> {
    let parts: Vec<&str> = path
        .strip_prefix(base)
        .ok()?
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Bundles candidates from an artifact store.
///
/// # Example
///
/// ```ignore
/// let orchestrator = Orchestrator::for_repository("/path/to/ig", BundleOptions::everything())?;
/// let candidates = orchestrator.discover_candidates().await?;
/// let report = orchestrator.run(candidates).await?;
/// println!("{}", report);
/// ```
pub struct Orchestrator<S: ArtifactStore + 'static> {
    store: Arc<S>,
    publisher: Option<Arc<dyn Publisher>>,
    options: BundleOptions,
    renderers: RendererTable,
    codecs: CodecRegistry,
}

impl<S: ArtifactStore + 'static> std::fmt::Debug for Orchestrator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("layout", self.store.layout())
            .field("options", &self.options)
            .field("renderers", &self.renderers)
            .field("codecs", &self.codecs)
            .field("publisher", &self.publisher.is_some())
            .finish()
    }
}

impl Orchestrator<FsArtifactStore> {
    /// Orchestrator over a repository on disk with the standard layout.
    pub fn for_repository(root: impl Into<PathBuf>, options: BundleOptions) -> Result<Self, ConfigError> {
        let layout = RepositoryLayout::new(root).with_versioning(options.include_version);
        Self::new(Arc::new(FsArtifactStore::new(layout)), options)
    }
}

impl<S: ArtifactStore + 'static> Orchestrator<S> {
    /// Create an orchestrator with the built-in renderers and codecs.
    ///
    /// Fails when the options cannot produce output for any candidate.
    pub fn new(store: Arc<S>, options: BundleOptions) -> Result<Self, ConfigError> {
        if store.layout().versioned != options.include_version {
            warn!(
                layout = store.layout().versioned,
                options = options.include_version,
                "store versioning differs from include_version; store layout wins for lookups"
            );
        }
        let orchestrator = Self {
            store,
            publisher: None,
            options,
            renderers: RendererTable::with_defaults(),
            codecs: CodecRegistry::with_defaults(),
        };
        orchestrator.check()?;
        Ok(orchestrator)
    }

    /// Set the publisher used when `publish_to` is configured.
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Replace the renderer table.
    pub fn with_renderers(mut self, renderers: RendererTable) -> Self {
        self.renderers = renderers;
        self
    }

    /// Replace the codec registry.
    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    /// Run options.
    pub fn options(&self) -> &BundleOptions {
        &self.options
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn check(&self) -> Result<(RenderFn, EncodeFn), ConfigError> {
        self.options.validate()?;
        let render = self.renderers.renderer(self.options.fhir_version)?;
        let encode = self.codecs.encoder(self.options.encoding)?;
        Ok((render, encode))
    }

    /// Apply the `only` filter.
    pub fn eligible(&self, candidates: &BTreeSet<String>) -> BTreeSet<String> {
        match &self.options.only {
            Some(only) => candidates.iter().filter(|c| *c == only).cloned().collect(),
            None => candidates.clone(),
        }
    }

    /// Candidate names derived from the measure files in the store.
    ///
    /// The name is the file stem minus the `measure-` prefix, kept whole so
    /// distinct measure files never share a candidate name.
    pub async fn discover_candidates(&self) -> Result<BTreeSet<String>, StoreError> {
        let layout = self.store.layout();
        let suffix = format!(".{}", layout.source_encoding.extension());
        let prefix = ArtifactKind::Measure.file_prefix();

        let files = self.store.list_files(&layout.measures_dir(), false).await?;
        let discovered: BTreeSet<String> = files
            .iter()
            .filter_map(|path| path.file_name().and_then(|n| n.to_str()))
            .filter_map(|file| file.strip_suffix(suffix.as_str())?.strip_prefix(prefix))
            .filter(|stem| !stem.is_empty())
            .map(str::to_string)
            .collect();

        debug!(count = discovered.len(), "candidates discovered");
        Ok(self.eligible(&discovered))
    }

    /// Bundle every eligible candidate and report the outcome.
    pub async fn run<I, T>(&self, candidates: I) -> Result<OutcomeReport, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Ok(self.run_detailed(candidates).await?.report)
    }

    /// Like [`Orchestrator::run`], keeping per-candidate reports.
    pub async fn run_detailed<I, T>(&self, candidates: I) -> Result<RunSummary, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let (render, encode) = self.check()?;

        if self.options.publish_to.is_some() && self.publisher.is_none() {
            warn!("publish_to is set but no publisher is configured; bundles stay local");
        }

        let requested: BTreeSet<String> = candidates.into_iter().map(Into::into).collect();
        let eligible = self.eligible(&requested);
        info!(
            eligible = eligible.len(),
            fhir_version = %self.options.fhir_version,
            encoding = %self.options.encoding,
            "starting bundling run"
        );

        let pipeline = Arc::new(Pipeline {
            store: Arc::clone(&self.store),
            resolver: DependencyResolver::new(Arc::clone(&self.store)),
            publisher: self.publisher.clone(),
            options: self.options.clone(),
            render,
            encode,
        });
        let semaphore = Arc::new(Semaphore::new(self.options.max_parallel));

        let mut tasks = JoinSet::new();
        for name in &eligible {
            let pipeline = Arc::clone(&pipeline);
            let semaphore = Arc::clone(&semaphore);
            let name = name.clone();
            let span = info_span!("candidate", name = %name);
            tasks.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    pipeline.process(name).await
                }
                .instrument(span),
            );
        }

        let mut reports = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    reports.insert(report.name.clone(), report);
                }
                // The candidate stays out of both upstream sets and lands in Failed.
                Err(e) => error!(error = %e, "candidate task aborted"),
            }
        }

        let summary = reduce(&eligible, reports);
        info!(
            bundled = summary.report.bundled.len(),
            refreshed = summary.report.refreshed_not_bundled.len(),
            failed = summary.report.failed.len(),
            "bundling run complete"
        );
        Ok(summary)
    }
}

fn reduce(eligible: &BTreeSet<String>, candidates: BTreeMap<String, CandidateReport>) -> RunSummary {
    let processed: BTreeSet<String> = candidates
        .values()
        .filter(|r| r.outcome != CandidateOutcome::Failed)
        .map(|r| r.name.clone())
        .collect();
    let bundled: BTreeSet<String> = candidates
        .values()
        .filter(|r| r.outcome == CandidateOutcome::Bundled)
        .map(|r| r.name.clone())
        .collect();
    let details: BTreeMap<String, Vec<String>> = candidates
        .values()
        .filter(|r| !r.details.is_empty())
        .map(|r| (r.name.clone(), r.details.clone()))
        .collect();

    RunSummary {
        report: OutcomeReport::compute(eligible, &processed, &bundled).with_details(details),
        candidates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FhirVersion;
    use crate::store::InMemoryArtifactStore;
    use tempfile::TempDir;

    fn library(name: &str, deps: &[&str], value_sets: &[&str]) -> String {
        let mut related: Vec<String> = deps
            .iter()
            .map(|d| format!(r#"{{"type":"depends-on","resource":"http://example.org/Library/{}"}}"#, d))
            .collect();
        related.extend(value_sets.iter().map(|v| {
            format!(r#"{{"type":"depends-on","resource":"http://example.org/ValueSet/{}"}}"#, v)
        }));
        format!(
            r#"{{"resourceType":"Library","id":"{0}","name":"{0}","relatedArtifact":[{1}]}}"#,
            name,
            related.join(",")
        )
    }

    fn measure(name: &str) -> String {
        format!(
            r#"{{"resourceType":"Measure","id":"{0}","name":"{0}","library":["http://example.org/Library/{0}"]}}"#,
            name
        )
    }

    fn make_store(root: &Path) -> InMemoryArtifactStore {
        let layout = RepositoryLayout::new(root);
        let libs = layout.libraries_dir();
        let measures = layout.measures_dir();
        let valuesets = layout.valuesets_dir();
        let tests = layout.tests_dir("X");
        let mut store = InMemoryArtifactStore::new(layout);

        store.add_file(measures.join("measure-X.json"), measure("X"));
        store.add_file(libs.join("library-X.json"), library("X", &["Shared"], &["vs1"]));
        store.add_file(libs.join("library-Shared.json"), library("Shared", &[], &["vs2"]));
        store.add_file(valuesets.join("valueset-vs1.json"), r#"{"resourceType":"ValueSet","id":"vs1"}"#);
        store.add_file(valuesets.join("valueset-vs2.json"), r#"{"resourceType":"ValueSet","id":"vs2"}"#);
        store.add_file(tests.join("p1").join("Patient.json"), r#"{"resourceType":"Patient"}"#);
        store.add_file(tests.join("p1").join("notes.cql"), "library Notes");

        store.add_file(measures.join("measure-Y.json"), measure("Y"));
        store
    }

    fn orchestrator(store: InMemoryArtifactStore, options: BundleOptions) -> Orchestrator<InMemoryArtifactStore> {
        Orchestrator::new(Arc::new(store), options).unwrap()
    }

    #[tokio::test]
    async fn test_discovery_keeps_numbered_measures_apart() {
        let dir = TempDir::new().unwrap();
        let layout = RepositoryLayout::new(dir.path());
        let measures = layout.measures_dir();
        let libs = layout.libraries_dir();
        let mut store = InMemoryArtifactStore::new(layout);
        for name in ["CMS-124", "CMS-125"] {
            store.add_file(measures.join(format!("measure-{}.json", name)), measure(name));
            store.add_file(libs.join(format!("library-{}.json", name)), library(name, &[], &[]));
        }

        let o = orchestrator(store, BundleOptions::default());
        let found = o.discover_candidates().await.unwrap();
        assert_eq!(found.iter().collect::<Vec<_>>(), vec!["CMS-124", "CMS-125"]);

        let summary = o.run_detailed(found).await.unwrap();
        assert_eq!(summary.report.total(), 2);
        assert!(summary.report.all_bundled());
        assert!(summary.candidates["CMS-125"]
            .bundle_path
            .as_ref()
            .is_some_and(|p| p.ends_with("CMS-125/CMS-125-bundle.json")));
    }

    #[test]
    fn test_candidate_error_outcomes() {
        assert_eq!(
            CandidateError::MeasureNotFound("X".to_string()).outcome(),
            CandidateOutcome::Failed
        );
        let incomplete = CandidateError::Incomplete(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(incomplete.outcome(), CandidateOutcome::RefreshedNotBundled);
        assert_eq!(incomplete.details().len(), 2);
    }

    #[tokio::test]
    async fn test_discover_candidates() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(make_store(dir.path()), BundleOptions::default());
        let found = o.discover_candidates().await.unwrap();
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["X", "Y"]);

        let only = BundleOptions {
            only: Some("Y".to_string()),
            ..BundleOptions::default()
        };
        let o = orchestrator(make_store(dir.path()), only);
        assert_eq!(o.discover_candidates().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_everything_included() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(make_store(dir.path()), BundleOptions::everything());

        let summary = o.run_detailed(["X"]).await.unwrap();
        let report = &summary.candidates["X"];

        assert_eq!(report.outcome, CandidateOutcome::Bundled);
        // measure, library X, Shared, vs1, vs2, one patient
        assert_eq!(report.entry_count, 6);

        let audit = report.audit.as_ref().unwrap();
        assert!(audit.entry("tests/p1/Patient.json").is_some());
        assert!(audit.entry("valuesets-X-bundle.json").is_some());
        assert!(audit.entry("library-deps-X-bundle.json").is_some());
        assert!(audit.entry("notes.cql").is_none());
    }

    #[tokio::test]
    async fn test_minimal_bundle_without_options() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(make_store(dir.path()), BundleOptions::default());

        let summary = o.run_detailed(["X"]).await.unwrap();
        assert_eq!(summary.candidates["X"].entry_count, 2);
        assert!(summary.report.bundled.contains("X"));
    }

    #[tokio::test]
    async fn test_missing_value_set_degrades() {
        let dir = TempDir::new().unwrap();
        let mut store = make_store(dir.path());
        let vs2 = store.layout().valuesets_dir().join("valueset-vs2.json");
        store.remove_file(&vs2);

        let o = orchestrator(store, BundleOptions::everything());
        let report = o.run(["X"]).await.unwrap();

        assert!(report.refreshed_not_bundled.contains("X"));
        assert!(report.details["X"][0].contains("ValueSet/vs2"));
    }

    #[tokio::test]
    async fn test_missing_library_fails() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(make_store(dir.path()), BundleOptions::default());

        let report = o.run(["Y", "Nope"]).await.unwrap();
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.outcome_of("Y"), Some(CandidateOutcome::Failed));
        assert_eq!(report.total(), 2);
    }

    #[tokio::test]
    async fn test_unregistered_renderer_is_fatal() {
        let dir = TempDir::new().unwrap();
        let options = BundleOptions {
            fhir_version: FhirVersion::Dstu3,
            ..BundleOptions::default()
        };
        let o = orchestrator(make_store(dir.path()), options).with_renderers(RendererTable::new());

        assert_eq!(
            o.run(["X"]).await.unwrap_err(),
            ConfigError::UnsupportedFhirVersion(FhirVersion::Dstu3)
        );
        assert!(!candidate_dir(o.store().layout(), "X").exists());
    }

    #[tokio::test]
    async fn test_markup_output_needs_codec() {
        let dir = TempDir::new().unwrap();
        let options = BundleOptions {
            encoding: Encoding::Xml,
            ..BundleOptions::default()
        };
        let err = Orchestrator::new(Arc::new(make_store(dir.path())), options).unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedEncoding(Encoding::Xml));
    }
}
