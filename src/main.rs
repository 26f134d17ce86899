//! # notes-recall CLI (`recall`)
//!
//! Builds and queries a local semantic index over a workspace's notes,
//! task lists, logs and session transcripts.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `recall init` | Write a default `recall.toml` and create the index directory |
//! | `recall build` | Incrementally (re)build the index |
//! | `recall search "<query>"` | Rank indexed chunks by similarity |
//! | `recall status` | Show the last build and whether the index is fresh |
//!
//! ## Examples
//!
//! ```bash
//! recall init
//! recall build --progress human
//! recall search "release checklist" -k 5
//! recall status --json
//! ```
//!
//! Diagnostics go to stderr and are filtered by `RECALL_LOG`
//! (e.g. `RECALL_LOG=notes_recall=debug`); the default is `warn`.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use notes_recall::config::{load_config, Config};
use notes_recall::freshness::is_up_to_date;
use notes_recall::jobs::{JobController, JobEvent, JobStatus};
use notes_recall::models::DocKind;
use notes_recall::progress::{format_number, ProgressMode};
use notes_recall::search::{search, SearchQuery};
use notes_recall::store;

const CONFIG_FILE: &str = "recall.toml";

/// notes-recall: local incremental semantic search over workspace notes.
#[derive(Parser)]
#[command(name = "recall", version, about)]
struct Cli {
    /// Workspace root.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Path to the configuration file. Defaults to `<root>/recall.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file and create the index directory.
    Init,

    /// Build or refresh the index.
    ///
    /// Unchanged files and chunks are reused from the previous build when
    /// the configuration is unchanged. Ctrl-C cancels the build; nothing is
    /// written in that case.
    Build {
        /// Ignore the previous index and embed everything.
        #[arg(long)]
        force: bool,

        /// Embedding provider: `local` or `openai`.
        #[arg(long)]
        provider: Option<String>,

        /// Embedding model. Defaults per provider.
        #[arg(long)]
        model: Option<String>,

        /// Vector dimension.
        #[arg(long)]
        dim: Option<usize>,

        /// Comma-separated document kinds: notes, tasks, log, session.
        #[arg(long, value_delimiter = ',')]
        kinds: Option<Vec<DocKind>>,

        /// Progress on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Search the index.
    Search {
        /// Free-text query.
        query: String,

        /// Maximum number of results.
        #[arg(short, long)]
        k: Option<usize>,

        /// Drop results scoring below this.
        #[arg(long)]
        min_score: Option<f64>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the last build and index freshness.
    Status {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("RECALL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let root = cli.root.clone();
    let config_path = cli.config.clone().unwrap_or_else(|| root.join(CONFIG_FILE));

    let load = || {
        load_config(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))
    };

    match cli.command {
        Commands::Init => run_init(&root, &config_path)?,
        Commands::Build {
            force,
            provider,
            model,
            dim,
            kinds,
            progress,
        } => {
            let config = load()?;
            let mut params = config.build.clone();
            params.force = force;
            if let Some(provider) = provider {
                params.provider = provider;
                if model.is_none() {
                    params.model = None;
                }
            }
            if model.is_some() {
                params.model = model;
            }
            if let Some(dim) = dim {
                params.dim = dim;
            }
            if let Some(kinds) = kinds {
                params.kinds = kinds;
            }
            params.validate()?;
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            run_build(&root, &config, params, mode).await?;
        }
        Commands::Search {
            query,
            k,
            min_score,
            json,
        } => {
            let config = load()?;
            let mut q = SearchQuery::new(query, &config);
            if let Some(k) = k {
                q.k = k;
            }
            if let Some(min_score) = min_score {
                q.min_score = min_score;
            }
            run_search(&root, &config, &q, json).await?;
        }
        Commands::Status { json } => {
            run_status(&root, &load()?, json)?;
        }
    }

    Ok(())
}

fn run_init(root: &Path, config_path: &Path) -> anyhow::Result<()> {
    if config_path.exists() {
        println!("config exists: {}", config_path.display());
    } else {
        let body = toml::to_string_pretty(&Config::default())?;
        std::fs::write(config_path, body)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        println!("wrote {}", config_path.display());
    }
    let config = load_config(config_path)?;
    let index_dir = config.index_dir(root);
    std::fs::create_dir_all(&index_dir)?;
    println!("index dir: {}", index_dir.display());
    Ok(())
}

async fn run_build(
    root: &Path,
    config: &Config,
    params: notes_recall::config::BuildConfig,
    mode: ProgressMode,
) -> anyhow::Result<()> {
    let controller = JobController::for_workspace(root, config);
    let mut events = controller.subscribe();
    let reporter = mode.reporter();
    let id = controller.enqueue(params, "cli").id;

    let job = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("canceling build...");
                controller.cancel(id);
            }
            event = events.recv() => match event {
                Ok(JobEvent::Progress { id: job_id, progress }) if job_id == id => {
                    reporter.report(&progress);
                }
                Ok(JobEvent::Updated { job }) if job.id == id && job.status.is_terminal() => {
                    break job;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => bail!("job controller stopped unexpectedly"),
            }
        }
    };
    controller.shutdown().await;

    match job.status {
        JobStatus::Ok => {
            let summary = job.summary.unwrap_or_default();
            println!("build");
            println!("  items: {}", format_number(summary.item_count as u64));
            println!("  reused files: {}", summary.reused_files);
            println!("  reused items: {}", summary.reused_items);
            println!("  embedded items: {}", summary.embedded_items);
            if summary.skipped_files > 0 {
                println!("  skipped files: {}", summary.skipped_files);
            }
            println!("ok");
            Ok(())
        }
        JobStatus::Canceled => {
            eprintln!("build canceled");
            std::process::exit(130);
        }
        _ => bail!(
            "build failed: {}",
            job.error.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

async fn run_search(
    root: &Path,
    config: &Config,
    query: &SearchQuery,
    json: bool,
) -> anyhow::Result<()> {
    let hits = search(root, config, query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {}:{}-{} ({})",
            i + 1,
            hit.score,
            hit.file,
            hit.start_line,
            hit.end_line,
            hit.kind
        );
        println!("    {}", hit.excerpt);
    }
    Ok(())
}

fn run_status(root: &Path, config: &Config, json: bool) -> anyhow::Result<()> {
    let index_dir = config.index_dir(root);
    let meta = match store::load_meta(&index_dir) {
        Ok(meta) => Some(meta),
        Err(notes_recall::error::RecallError::NotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };
    let freshness = is_up_to_date(root, config)?;

    if json {
        let out = serde_json::json!({
            "indexDir": index_dir,
            "meta": meta,
            "upToDate": freshness,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("index: {}", index_dir.display());
    match &meta {
        Some(meta) => {
            println!("  provider: {} / {} ({} dims)", meta.provider, meta.model, meta.dim);
            println!("  items: {}", format_number(meta.item_count as u64));
            println!("  last build: {}", display_time(&meta.finished_at));
            if let Some(head) = &meta.git_head {
                println!("  git head: {}", head);
            }
        }
        None => println!("  no build yet"),
    }
    match &freshness.reason {
        None => println!("up to date"),
        Some(reason) => println!("stale: {}", serde_json::to_string(reason)?),
    }
    Ok(())
}

fn display_time(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
