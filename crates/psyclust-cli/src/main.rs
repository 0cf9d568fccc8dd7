//! Psyclust CLI
//!
//! Command-line interface for:
//! - Importing post embeddings and extracted features into the artifact store
//! - Projection, clustering, merge and consistency validation
//! - Drafting cluster labels through a completion backend
//! - Human review of drafts (interactive, default-accept or scripted)
//! - Assembling Markdown profiles from finalized labels

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use psyclust_labels::{
    assemble_profiles, build_briefs, generate_drafts, ActionSource, LabelStore,
    PromptedDraftGenerator, ReviewSession, ReviewStatus, ScriptedActions,
};
use psyclust_pipeline::{
    import_embeddings, import_features, run_all, run_clustering, run_merge, run_projection,
    validate_store, ArtifactStore, ClusterInput, EmbeddingSet, FeatureTable, MergedTable, PostId,
    Slot, ValidationReport,
};

mod config;
mod console;
mod llm;

use config::ProfilerConfig;

const LOG_ENV: &str = "PSYCLUST_LOG";

#[derive(Parser)]
#[command(name = "psyclust")]
#[command(about = "Cluster posts by psychological signal and curate labeled profiles")]
#[command(version)]
struct Cli {
    /// JSON config file (pipeline, labeling and directory settings)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Artifact store directory (overrides the config file)
    #[arg(long, global = true)]
    artifacts: Option<PathBuf>,

    /// Output root for drafts, finals, backups and profiles (overrides the config file)
    #[arg(long, global = true)]
    outputs: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import embeddings (`{"ids": [...], "vectors": [[...]]}`) and/or feature records
    Import {
        /// Embedding matrix with its parallel id list
        #[arg(long)]
        embeddings: Option<PathBuf>,

        /// Array of feature records keyed by `id`
        #[arg(long)]
        features: Option<PathBuf>,
    },

    /// Project stored embeddings to low-dimensional coordinates
    Reduce {
        #[command(flatten)]
        projection: ProjectionFlags,

        /// Recompute even when the cached projection is current
        #[arg(long)]
        force: bool,
    },

    /// Cluster the projection (or raw embeddings)
    Cluster {
        #[command(flatten)]
        clustering: ClusteringFlags,
    },

    /// Join features, cluster assignments and embeddings into one table
    Merge,

    /// Check every stored artifact against the identity ledger
    Validate,

    /// reduce → cluster → merge → validate
    Run {
        #[command(flatten)]
        projection: ProjectionFlags,

        #[command(flatten)]
        clustering: ClusteringFlags,
    },

    /// Draft a label record per cluster
    Draft {
        /// Read canned responses from `<dir>/cluster_<id>.txt` instead of calling an API
        #[arg(long)]
        responses_dir: Option<PathBuf>,

        /// Anthropic model name
        #[arg(long)]
        model: Option<String>,

        /// Per-request timeout in seconds
        #[arg(long, default_value = "60")]
        timeout_secs: u64,
    },

    /// Review drafts and promote accepted ones to finals
    Review {
        /// Empty input accepts the shown draft
        #[arg(long)]
        batch_accept: bool,

        /// Replay decisions from a JSON file instead of prompting
        #[arg(long)]
        script: Option<PathBuf>,
    },

    /// Render a Markdown profile for every finalized label
    Assemble,
}

#[derive(Args, Debug, Default)]
struct ProjectionFlags {
    #[arg(long)]
    n_neighbors: Option<usize>,

    #[arg(long)]
    n_components: Option<usize>,

    #[arg(long)]
    min_dist: Option<f32>,

    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug, Default)]
struct ClusteringFlags {
    #[arg(long)]
    min_cluster_size: Option<usize>,

    #[arg(long)]
    min_samples: Option<usize>,

    /// Matrix to cluster
    #[arg(long, value_enum)]
    on: Option<ClusterOn>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ClusterOn {
    Projection,
    Embeddings,
}

impl From<ClusterOn> for ClusterInput {
    fn from(value: ClusterOn) -> Self {
        match value {
            ClusterOn::Projection => ClusterInput::Projection,
            ClusterOn::Embeddings => ClusterInput::Embeddings,
        }
    }
}

impl ProjectionFlags {
    fn apply(&self, config: &mut ProfilerConfig) {
        let params = &mut config.pipeline.projection;
        if let Some(v) = self.n_neighbors {
            params.n_neighbors = v;
        }
        if let Some(v) = self.n_components {
            params.n_components = v;
        }
        if let Some(v) = self.min_dist {
            params.min_dist = v;
        }
        if let Some(v) = self.seed {
            params.seed = v;
        }
    }
}

impl ClusteringFlags {
    fn apply(&self, config: &mut ProfilerConfig) {
        let params = &mut config.pipeline.clustering;
        if let Some(v) = self.min_cluster_size {
            params.min_cluster_size = v;
        }
        if self.min_samples.is_some() {
            params.min_samples = self.min_samples;
        }
        if let Some(on) = self.on {
            config.pipeline.cluster_on = on.into();
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingsFile {
    ids: Vec<PostId>,
    vectors: Vec<Vec<f32>>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ProfilerConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.artifacts {
        config.artifacts_dir = dir;
    }
    if let Some(dir) = cli.outputs {
        config.outputs_dir = dir;
    }
    tracing::debug!(?config, "configuration resolved");

    match cli.command {
        Commands::Import {
            embeddings,
            features,
        } => cmd_import(&config, embeddings.as_deref(), features.as_deref()),
        Commands::Reduce { projection, force } => {
            projection.apply(&mut config);
            cmd_reduce(&config, force)
        }
        Commands::Cluster { clustering } => {
            clustering.apply(&mut config);
            cmd_cluster(&config)
        }
        Commands::Merge => cmd_merge(&config),
        Commands::Validate => cmd_validate(&config),
        Commands::Run {
            projection,
            clustering,
        } => {
            projection.apply(&mut config);
            clustering.apply(&mut config);
            cmd_run(&config)
        }
        Commands::Draft {
            responses_dir,
            model,
            timeout_secs,
        } => cmd_draft(
            &config,
            responses_dir.as_deref(),
            model.as_deref(),
            Duration::from_secs(timeout_secs),
        ),
        Commands::Review {
            batch_accept,
            script,
        } => cmd_review(&config, batch_accept, script.as_deref()),
        Commands::Assemble => cmd_assemble(&config),
    }
}

fn artifact_store(config: &ProfilerConfig) -> Result<ArtifactStore> {
    ArtifactStore::open(&config.artifacts_dir)
        .with_context(|| format!("failed to open artifact store {}", config.artifacts_dir.display()))
}

fn label_store(config: &ProfilerConfig) -> Result<LabelStore> {
    LabelStore::open(config.layout())
        .with_context(|| format!("failed to open label store under {}", config.outputs_dir.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
}

// =============================================================================
// Pipeline commands
// =============================================================================

fn cmd_import(config: &ProfilerConfig, embeddings: Option<&Path>, features: Option<&Path>) -> Result<()> {
    if embeddings.is_none() && features.is_none() {
        return Err(anyhow!("nothing to import (pass --embeddings and/or --features)"));
    }
    let store = artifact_store(config)?;

    if let Some(path) = embeddings {
        let file: EmbeddingsFile = read_json(path)?;
        let set = EmbeddingSet::from_rows(file.ids, file.vectors)
            .with_context(|| format!("invalid embeddings in {}", path.display()))?;
        let ledger = import_embeddings(&store, &set)?;
        println!(
            "{} {} embeddings (width {})",
            "Imported".green().bold(),
            ledger.len(),
            set.width()
        );
    }

    if let Some(path) = features {
        let records: Vec<serde_json::Map<String, serde_json::Value>> = read_json(path)?;
        let table = FeatureTable::from_records(&records)
            .with_context(|| format!("invalid feature records in {}", path.display()))?;
        import_features(&store, &table)?;
        println!(
            "{} {} feature rows ({} columns)",
            "Imported".green().bold(),
            table.len(),
            table.columns().len()
        );
    }
    Ok(())
}

fn cmd_reduce(config: &ProfilerConfig, force: bool) -> Result<()> {
    let store = artifact_store(config)?;
    let run = run_projection(&store, &config.pipeline.projection, force)?;
    let verb = if run.cached { "Reused" } else { "Projected" };
    println!(
        "{} {} rows → {} components",
        verb.green().bold(),
        run.rows,
        run.components
    );
    Ok(())
}

fn cmd_cluster(config: &ProfilerConfig) -> Result<()> {
    let store = artifact_store(config)?;
    let table = run_clustering(&store, &config.pipeline)?;
    println!("{} {} rows", "Clustered".green().bold(), table.len());
    println!("{}", table.distribution());
    Ok(())
}

fn cmd_merge(config: &ProfilerConfig) -> Result<()> {
    let store = artifact_store(config)?;
    let merged = run_merge(&store)?;
    println!(
        "{} {} rows × {} columns",
        "Merged".green().bold(),
        merged.len(),
        merged.columns().len()
    );
    Ok(())
}

fn cmd_validate(config: &ProfilerConfig) -> Result<()> {
    let store = artifact_store(config)?;
    print_report(&validate_store(&store)?);
    Ok(())
}

fn cmd_run(config: &ProfilerConfig) -> Result<()> {
    let store = artifact_store(config)?;
    print_report(&run_all(&store, &config.pipeline)?);
    Ok(())
}

fn print_report(report: &ValidationReport) {
    println!(
        "{} {} rows across {}",
        "ok".green().bold(),
        report.rows,
        report.artifacts.join(", ")
    );
    for check in &report.checks {
        println!("  {} {check}", "passed".green());
    }
    if let Some(distribution) = &report.distribution {
        println!("{distribution}");
    }
}

// =============================================================================
// Label commands
// =============================================================================

fn cmd_draft(
    config: &ProfilerConfig,
    responses_dir: Option<&Path>,
    model: Option<&str>,
    timeout: Duration,
) -> Result<()> {
    let store = artifact_store(config)?;
    let merged: MergedTable = store
        .read(Slot::Merged)
        .context("no merged table (run `psyclust merge` first)")?;
    let briefs = build_briefs(&merged, &config.labeling);
    let labels = label_store(config)?;

    let report = match responses_dir {
        Some(dir) => {
            let generator = PromptedDraftGenerator::new(llm::CannedResponses::new(dir));
            generate_drafts(&generator, &briefs, &labels)?
        }
        None => draft_with_api(&briefs, &labels, model, timeout)?,
    };

    for (cluster_id, file_name) in &report.written {
        println!("{} cluster {cluster_id} → {file_name}", "drafted".green().bold());
    }
    for (cluster_id, reason) in &report.failed {
        println!("{} cluster {cluster_id}: {reason}", "failed".red().bold());
    }
    if report.written.is_empty() && !report.failed.is_empty() {
        return Err(anyhow!("no drafts written ({} clusters failed)", report.failed.len()));
    }
    Ok(())
}

#[cfg(feature = "llm-anthropic")]
fn draft_with_api(
    briefs: &[psyclust_labels::ClusterBrief],
    labels: &LabelStore,
    model: Option<&str>,
    timeout: Duration,
) -> Result<psyclust_labels::DraftRunReport> {
    let backend = llm::AnthropicBackend::from_env(model, timeout)?;
    let generator = PromptedDraftGenerator::new(backend);
    Ok(generate_drafts(&generator, briefs, labels)?)
}

#[cfg(not(feature = "llm-anthropic"))]
fn draft_with_api(
    _briefs: &[psyclust_labels::ClusterBrief],
    _labels: &LabelStore,
    _model: Option<&str>,
    _timeout: Duration,
) -> Result<psyclust_labels::DraftRunReport> {
    Err(anyhow!(
        "built without the `llm-anthropic` feature; pass --responses-dir to draft offline"
    ))
}

fn cmd_review(config: &ProfilerConfig, batch_accept: bool, script: Option<&Path>) -> Result<()> {
    let labels = label_store(config)?;
    let session = ReviewSession::new(&labels).default_accept(batch_accept);

    let summary = match script {
        Some(path) => {
            let mut actions: ScriptedActions = read_json(path)?;
            run_review(&session, &mut actions)?
        }
        None => {
            let stdin = io::stdin();
            let mut console = console::ConsoleActions::new(stdin.lock(), io::stdout());
            run_review(&session, &mut console)?
        }
    };

    println!(
        "\n{} accepted {}, edited {}, skipped {}{}",
        "Review:".bold(),
        summary.count(ReviewStatus::Accepted),
        summary.count(ReviewStatus::Edited),
        summary.entries.len()
            - summary.count(ReviewStatus::Accepted)
            - summary.count(ReviewStatus::Edited),
        if summary.quit { " (quit early)" } else { "" }
    );
    println!("summary written to {}", labels.layout().summary_path.display());
    Ok(())
}

fn run_review(
    session: &ReviewSession<'_>,
    source: &mut dyn ActionSource,
) -> Result<psyclust_labels::ReviewSummary> {
    session.run(source).context("review pass failed")
}

fn cmd_assemble(config: &ProfilerConfig) -> Result<()> {
    let labels = label_store(config)?;
    let report = assemble_profiles(&labels, chrono::Utc::now())?;
    for (cluster_id, path) in &report.written {
        println!("{} cluster {cluster_id} → {}", "wrote".green().bold(), path.display());
    }
    for (name, reason) in &report.skipped {
        println!("{} {name}: {reason}", "skipped".yellow().bold());
    }
    Ok(())
}
