//! Bundle Artifacts Binary
//!
//! Bundles the measures of an implementation guide and, optionally, posts
//! the results to a FHIR endpoint.
//!
//! ## Configuration
//!
//! Flags override `BUNDLER_*` environment variables (see `BundleOptions::from_env`).
//! - `RUST_LOG`: Log level filter (default: knowledge_bundler=info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for terminals (default: pretty)
//!
//! ## Usage
//!
//! ```bash
//! cargo run --features cli --bin bundle_artifacts -- bundle --ig-path ./my-ig -d -t -p
//! cargo run --features cli --bin bundle_artifacts -- post ./my-ig/bundles http://localhost:8080/fhir
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use knowledge_bundler::{
    post_bundles_in_dir, BundleOptions, Encoding, FhirVersion, HttpPublisher, Orchestrator,
};

#[derive(Parser)]
#[command(name = "bundle_artifacts", version, about = "Bundle clinical knowledge artifacts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bundle measures found in an implementation guide.
    Bundle(BundleArgs),
    /// Post every bundle found under a directory.
    Post {
        /// Directory to walk.
        dir: PathBuf,
        /// FHIR endpoint.
        destination: String,
    },
}

#[derive(Args)]
struct BundleArgs {
    /// Root of the implementation guide.
    #[arg(long, env = "BUNDLER_IG_PATH", default_value = ".")]
    ig_path: PathBuf,
    /// Include the library dependency closure.
    #[arg(short = 'd', long)]
    include_dependencies: bool,
    /// Include value sets.
    #[arg(short = 't', long)]
    include_terminology: bool,
    /// Include patient test scenarios.
    #[arg(short = 'p', long)]
    include_patient_scenarios: bool,
    /// Version-qualify identities and filenames.
    #[arg(short = 'v', long)]
    include_version: bool,
    /// Bundle only this candidate.
    #[arg(long)]
    only: Option<String>,
    /// Post finished bundles to this endpoint.
    #[arg(long)]
    publish_to: Option<String>,
    /// Output encoding (json).
    #[arg(long)]
    encoding: Option<String>,
    /// Target FHIR version (fhir3, fhir4).
    #[arg(long)]
    fhir_version: Option<String>,
    /// Maximum candidates processed at once.
    #[arg(long)]
    max_parallel: Option<usize>,
    /// Candidates to bundle in addition to the discovered measures.
    names: Vec<String>,
}

impl BundleArgs {
    fn options(&self) -> Result<BundleOptions> {
        let mut options = BundleOptions::from_env().context("invalid BUNDLER_* environment")?;

        options.include_dependencies |= self.include_dependencies;
        options.include_terminology |= self.include_terminology;
        options.include_patient_scenarios |= self.include_patient_scenarios;
        options.include_version |= self.include_version;
        if self.only.is_some() {
            options.only = self.only.clone();
        }
        if self.publish_to.is_some() {
            options.publish_to = self.publish_to.clone();
        }
        if let Some(encoding) = &self.encoding {
            options.encoding = encoding.parse::<Encoding>()?;
        }
        if let Some(version) = &self.fhir_version {
            options.fhir_version = FhirVersion::parse(version)?;
        }
        if let Some(n) = self.max_parallel {
            options.max_parallel = n;
        }

        options.validate()?;
        Ok(options)
    }
}

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "knowledge_bundler=info,bundle_artifacts=info".into());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
    }
}

async fn bundle(args: BundleArgs) -> Result<ExitCode> {
    let options = args.options()?;
    let publish = options.publish_to.is_some();

    let mut orchestrator = Orchestrator::for_repository(&args.ig_path, options)?;
    if publish {
        orchestrator = orchestrator.with_publisher(Arc::new(HttpPublisher::new()?));
    }

    let mut candidates = orchestrator
        .discover_candidates()
        .await
        .with_context(|| format!("failed to list measures under {}", args.ig_path.display()))?;
    candidates.extend(args.names.iter().cloned());
    if candidates.is_empty() {
        warn!(ig_path = %args.ig_path.display(), "no candidates to bundle");
    }

    let report = orchestrator.run(candidates).await?;
    println!("{}", report);

    Ok(if report.all_bundled() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn post(dir: PathBuf, destination: String) -> Result<ExitCode> {
    let publisher = HttpPublisher::new()?;
    let summary = post_bundles_in_dir(&dir, &destination, &publisher).await?;

    for (path, error) in &summary.failed {
        println!("FAILED {}: {}", path.display(), error);
    }
    println!("{} posted, {} failed", summary.posted.len(), summary.failed.len());

    Ok(if summary.all_posted() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();

    let cli = Cli::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "bundle_artifacts starting");

    match cli.command {
        Command::Bundle(args) => bundle(args).await,
        Command::Post { dir, destination } => post(dir, destination).await,
    }
}
