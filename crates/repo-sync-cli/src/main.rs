//! repo-sync - replay a push across a repository sync group
//!
//! ## Commands
//!
//! - `run`: replay a push (webhook payload or explicit commit list) onto
//!   every other repository of the group and open pull requests
//! - `check-config`: load and validate a sync group config

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use repo_sync_core::telemetry::init_tracing;
use repo_sync_core::{CommitInfo, PushEvent, RepoRef, SyncOptions, SyncReport, SyncServiceConfig};
use repo_sync_github::{connect_with, DEFAULT_API_URL};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "repo-sync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Replay pushed file changes across a repository sync group", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and a JSON report
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a push onto every other repository of the group
    Run {
        /// Sync group config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// GitHub push event payload (JSON)
        #[arg(long, conflicts_with_all = ["source", "commits"])]
        event: Option<PathBuf>,

        /// Source repository as owner/repo (with --commits)
        #[arg(long, requires = "commits")]
        source: Option<String>,

        /// JSON array of push commits (with --source)
        #[arg(long, requires = "source")]
        commits: Option<PathBuf>,

        /// Access token; overrides the token in the config file
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// GitHub API root
        #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
        api_url: String,

        /// Targets processed at once
        #[arg(long, default_value = "1", value_parser = clap::value_parser!(u16).range(1..))]
        max_concurrent_targets: u16,
    },

    /// Load and validate a sync group config
    CheckConfig {
        /// Sync group config (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            config,
            event,
            source,
            commits,
            token,
            api_url,
            max_concurrent_targets,
        } => {
            let input = match (event, source, commits) {
                (Some(event), _, _) => PushInput::Event(event),
                (None, Some(source), Some(commits)) => PushInput::Commits { source, commits },
                _ => bail!("either --event or --source with --commits is required"),
            };
            cmd_run(
                &config,
                input,
                token,
                &api_url,
                max_concurrent_targets as usize,
                cli.json,
            )
            .await
        }
        Commands::CheckConfig { config } => cmd_check_config(&config),
    }
}

enum PushInput {
    Event(PathBuf),
    Commits { source: String, commits: PathBuf },
}

fn load_config(path: &Path) -> Result<SyncServiceConfig> {
    let config = SyncServiceConfig::from_file(path)?;
    config
        .validate()
        .with_context(|| format!("invalid sync config {}", path.display()))?;
    Ok(config)
}

async fn cmd_run(
    config_path: &Path,
    input: PushInput,
    token: Option<String>,
    api_url: &str,
    max_concurrent_targets: usize,
    json: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        config = config.with_access_token(token);
    }
    if config.access_token.is_empty() {
        bail!("no access token: pass --token, set GITHUB_TOKEN, or set access_token in the config");
    }

    let (source, commits) = match input {
        PushInput::Event(path) => {
            let event = PushEvent::from_file(&path)
                .with_context(|| format!("failed to read push event {}", path.display()))?;
            if !pushed_to_synced_branch(&config, &event) {
                info!(
                    event = "sync.skipped",
                    source = %event.source_repository(),
                    git_ref = %event.git_ref,
                    "push is not to the configured branch, nothing to sync"
                );
                return Ok(());
            }
            (event.source_repository().to_string(), event.commits)
        }
        PushInput::Commits { source, commits } => {
            let raw = std::fs::read_to_string(&commits)
                .with_context(|| format!("failed to read commits {}", commits.display()))?;
            let list: Vec<CommitInfo> = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse commits {}", commits.display()))?;
            (source, list)
        }
    };

    let options = SyncOptions {
        max_concurrent_targets,
    };
    let engine = connect_with(config, api_url, options).context("failed to build GitHub client")?;
    let report = engine.execute(&source, &commits).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Pushes to other branches or tags of a configured source are ignored.
/// Unknown sources fall through so the engine reports them.
fn pushed_to_synced_branch(config: &SyncServiceConfig, event: &PushEvent) -> bool {
    let Ok(source) = event.source_repository().parse::<RepoRef>() else {
        return true;
    };
    match config.repositories.iter().find(|r| r.repo_ref() == source) {
        Some(repo) => event.branch() == Some(repo.branch.as_str()),
        None => true,
    }
}

fn print_report(report: &SyncReport) {
    println!(
        "Synced {} commit(s) from {} to {} repositor{}",
        report.commits_synced,
        report.source,
        report.targets.len(),
        if report.targets.len() == 1 { "y" } else { "ies" }
    );
    for target in &report.targets {
        println!(
            "  {} <- {} (+{} -{}) {}",
            target.target,
            target.branch,
            target.files_written,
            target.files_deleted,
            target.pull_request.html_url
        );
    }
}

fn cmd_check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    println!(
        "Sync group ({} repositories, branch prefix '{}'):",
        config.repositories.len(),
        config.sync_branch_prefix
    );
    for repo in &config.repositories {
        let prefix = repo.dir_prefix();
        println!(
            "  {} {} -> {}",
            repo.repo_ref(),
            if prefix.is_empty() { "/" } else { prefix.as_str() },
            repo.branch
        );
    }
    Ok(())
}
