//! notesync CLI - publish a local notes directory to a Git repository.
//!
//! Every sync lands as a single commit on the configured branch, and only
//! after the computed plan has been confirmed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use notesync_common::{normalize_path, RepoId};
use notesync_storage::{ContentSource, GitHubConfig, GitHubProvider, LocalSnapshot, SnapshotProvider};
use notesync_sync::{
    check_for_update, AutoApprove, PathPolicy, PlanPresenter, RemoteComparison, SizeGuard,
    SyncConfig, SyncEngine, SyncOutcome, SyncPlan, SyncState,
};

/// Repository whose releases the update check looks at.
const RELEASE_REPO: &str = "notesync/notesync";

#[derive(Parser)]
#[command(name = "notesync")]
#[command(about = "notesync - Publish notes to a Git repository in one commit")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: <config dir>/notesync/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate exclusion patterns and file sizes.
    Validate {
        /// Patterns to check instead of the configured ones.
        patterns: Vec<String>,
    },

    /// Show what a sync would change.
    Plan {
        /// Print the plan as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Commit local notes to the remote branch.
    Sync {
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,

        /// Commit message, overriding the configured template.
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Compare one local note with its remote version.
    Inspect {
        /// Path relative to the notes directory.
        path: String,
    },

    /// Check whether a newer notesync release exists.
    CheckUpdate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };

    match cli.command {
        Commands::Validate { patterns } => cmd_validate(&config_path, patterns).await,
        Commands::Plan { json } => cmd_plan(&config_path, json).await,
        Commands::Sync { yes, message } => cmd_sync(&config_path, yes, message.as_deref()).await,
        Commands::Inspect { path } => cmd_inspect(&config_path, &path).await,
        Commands::CheckUpdate => cmd_check_update(&config_path).await,
    }
}

fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("No configuration directory on this platform")?;
    Ok(dir.join("notesync").join("config.toml"))
}

fn state_path(config_path: &Path) -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("notesync").join("state.json"))
        .unwrap_or_else(|| config_path.with_file_name("notesync-state.json"))
}

async fn load_config(path: &Path) -> Result<SyncConfig> {
    SyncConfig::load(path)
        .await
        .with_context(|| format!("Failed to load config {}", path.display()))
}

fn open_snapshot(config: &SyncConfig) -> Result<LocalSnapshot> {
    let snapshot = LocalSnapshot::new(&config.notes_dir)
        .with_context(|| format!("Cannot open notes directory {}", config.notes_dir.display()))?;
    Ok(snapshot.with_skip_hidden(config.skip_hidden))
}

async fn open_engine(config: SyncConfig, state: SyncState) -> Result<SyncEngine<GitHubProvider>> {
    let provider = GitHubProvider::new(config.github()).context("Failed to create GitHub client")?;
    let engine = SyncEngine::new(Arc::new(provider), config).context("Invalid configuration")?;
    Ok(engine.with_state(state))
}

/// Asks on the terminal before committing.
struct TerminalPresenter;

#[async_trait]
impl PlanPresenter for TerminalPresenter {
    async fn present_plan(&self, plan: &SyncPlan) -> bool {
        print_plan(plan);
        print!("Commit these changes? [y/N] ");
        if std::io::stdout().flush().is_err() {
            return false;
        }

        let answer = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
            _ => false,
        }
    }
}

fn print_plan(plan: &SyncPlan) {
    let counts = plan.counts();
    println!(
        "{} new, {} modified, {} deleted",
        counts.new, counts.modified, counts.deleted
    );
    for path in plan.to_create() {
        println!("  + {}", path);
    }
    for path in plan.to_update() {
        println!("  ~ {}", path);
    }
    for path in plan.to_delete() {
        println!("  - {}", path);
    }

    if !plan.oversized().is_empty() {
        println!("Skipped, too large:");
        for file in plan.oversized() {
            println!("  {} ({})", file.path, file.formatted_size);
        }
    }
    if !plan.conflicts().is_empty() {
        println!("Skipped, file/directory conflict:");
        for conflict in plan.conflicts() {
            println!(
                "  {} (remote {} {})",
                conflict.path, conflict.remote_kind, conflict.remote_path
            );
        }
    }
}

/// Validate patterns, and local file sizes when a config is available.
async fn cmd_validate(config_path: &Path, patterns: Vec<String>) -> Result<()> {
    // The config is read unvalidated so every bad pattern gets reported.
    let config = if patterns.is_empty() {
        let config = SyncConfig::read(config_path)
            .await
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        Some(config)
    } else {
        None
    };

    let patterns = match &config {
        Some(config) => config.exclude.iter().chain(&config.include).cloned().collect(),
        None => patterns,
    };

    let results = PathPolicy::validate_all(&patterns[..]);
    let mut invalid = 0;
    for result in &results {
        match &result.error {
            None => println!("  ok       {}", result.pattern),
            Some(reason) => {
                invalid += 1;
                println!("  invalid  {:?}: {}", result.pattern, reason);
            }
        }
    }

    if let Some(config) = &config {
        let files = open_snapshot(config)?.snapshot().await?;
        let report = SizeGuard::validate(&files, config.max_file_size);
        if report.is_valid {
            println!(
                "All {} files are within {}",
                files.len(),
                SizeGuard::format_size(config.max_file_size)
            );
        } else {
            println!(
                "{} files exceed {} and will be skipped:",
                report.count,
                SizeGuard::format_size(config.max_file_size)
            );
            for file in &report.oversized {
                println!("  {} ({})", file.path, file.formatted_size);
            }
        }
    }

    if invalid > 0 {
        anyhow::bail!("{} of {} patterns are invalid", invalid, results.len());
    }
    Ok(())
}

/// Print the plan without committing.
async fn cmd_plan(config_path: &Path, json: bool) -> Result<()> {
    let config = load_config(config_path).await?;
    let snapshot = open_snapshot(&config)?;
    let state = SyncState::load(state_path(config_path)).await?;
    let engine = open_engine(config, state).await?;

    let plan = engine.plan(&snapshot).await.context("Failed to compute plan")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else if plan.is_empty() {
        println!("Already up to date.");
    } else {
        print_plan(&plan);
    }
    Ok(())
}

/// Plan, confirm, commit, and persist the new head.
async fn cmd_sync(config_path: &Path, yes: bool, message: Option<&str>) -> Result<()> {
    let config = load_config(config_path).await?;
    let snapshot = open_snapshot(&config)?;
    let state_file = state_path(config_path);
    let state = SyncState::load(&state_file).await?;
    let engine = open_engine(config, state).await?;

    let result = if yes {
        engine.sync(&snapshot, &AutoApprove, message).await
    } else {
        engine.sync(&snapshot, &TerminalPresenter, message).await
    };
    let report = result.context("Sync failed")?;

    engine.state().read().await.save(&state_file).await?;

    match report.outcome {
        SyncOutcome::UpToDate => println!("Already up to date."),
        SyncOutcome::Declined => println!("Nothing committed."),
        SyncOutcome::Committed { commit, counts } => {
            if yes {
                print_plan(&report.plan);
            }
            println!(
                "Committed {} ({} new, {} modified, {} deleted) in {:?}",
                commit, counts.new, counts.modified, counts.deleted, report.duration
            );
        }
        SyncOutcome::Failed { failure, diverged } => {
            for path in &diverged {
                println!("  changed remotely: {}", path.path);
            }
            if failure.needs_replan() {
                warn!("The remote or the notes changed; run sync again to re-plan");
            } else if failure.is_retryable() {
                warn!("The branch was not changed; the same sync can be retried");
            }
            anyhow::bail!("Commit failed: {}", failure);
        }
    }
    Ok(())
}

/// Compare one local note with the remote branch.
async fn cmd_inspect(config_path: &Path, path: &str) -> Result<()> {
    let config = load_config(config_path).await?;
    let snapshot = open_snapshot(&config)?;
    let path = normalize_path(path);
    let local = snapshot
        .read(&path)
        .await
        .with_context(|| format!("Cannot read {}", path))?;

    let engine = open_engine(config, SyncState::new()).await?;
    match engine.diagnostics().compare(&path, &local).await? {
        RemoteComparison::Missing => println!("{}: not on the remote", path),
        RemoteComparison::Identical => println!("{}: identical", path),
        RemoteComparison::Different {
            local_hash,
            remote_hash,
        } => println!("{}: differs (local {}, remote {})", path, local_hash, remote_hash),
    }
    Ok(())
}

async fn cmd_check_update(config_path: &Path) -> Result<()> {
    // The release check works without a config file.
    let github = match SyncConfig::load(config_path).await {
        Ok(config) => config.github(),
        Err(_) => GitHubConfig::default(),
    };
    let provider = GitHubProvider::new(github)?;
    let repo = RepoId::parse(RELEASE_REPO)?;

    let status = check_for_update(&provider, &repo, env!("CARGO_PKG_VERSION")).await?;
    match (&status.latest, status.update_available) {
        (Some(release), true) => {
            info!("Update available");
            println!("notesync {} is available (running {})", release.tag, status.current);
        }
        _ => println!("notesync {} is up to date", status.current),
    }
    Ok(())
}
