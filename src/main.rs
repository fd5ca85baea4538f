#![deny(clippy::mod_module_files)]
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gitwatch::{
    config::{Credentials, WatchConfig},
    feed::FeedWriter,
    git::{CliMirror, GitCli},
    watch::{
        block_on, discard_mirror, short_commit, BranchConfig, ChangeDetectionEngine, CycleReport,
        NotificationPayload, Publisher, RepositoryConfig, TracingPublisher, WatchRegistry,
    },
};

/// Watch git repositories and publish a feed entry when tracked branches change
#[derive(Parser)]
#[command(name = "gitwatch", version)]
struct Cli {
    /// Configuration file (default: ~/.config/gitwatch/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log notifications instead of writing the feed; watermarks are not saved
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll every repository once
    Poll,
    /// Poll repeatedly until interrupted
    Watch,
    /// Show watched repositories and their watermarks
    List,
    /// Start watching a repository
    Add {
        name: String,
        url: String,
        /// Branch to track (repeatable)
        #[arg(short, long = "branch", default_value = "main")]
        branches: Vec<String>,
        /// Only report changes touching these paths or globs (repeatable)
        #[arg(short, long = "files")]
        files: Vec<String>,
    },
    /// Stop watching a repository and delete its mirror
    Remove {
        name: String,
        /// Leave the local mirror on disk
        #[arg(long)]
        keep_mirror: bool,
    },
}

/// Where notifications go
enum Sink {
    Feed(FeedWriter),
    Log(TracingPublisher),
}

// Implement Publisher for Sink by delegating to inner types
impl Publisher for Sink {
    fn publish(&self, payload: NotificationPayload) -> Result<()> {
        match self {
            Sink::Feed(writer) => writer.publish(payload),
            Sink::Log(log) => log.publish(payload),
        }
    }
}

type Engine = ChangeDetectionEngine<GitCli, Sink>;

/// How long abandoned polls may delay exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn init_tracing(verbose: bool) {
    let default = if verbose { "gitwatch=debug" } else { "gitwatch=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_engine(config: &WatchConfig, dry_run: bool) -> Result<Arc<Engine>> {
    let repos_dir = config.ensure_repos_dir()?;

    let sink = if dry_run {
        Sink::Log(TracingPublisher)
    } else {
        Sink::Feed(FeedWriter::new(&config.feed))
    };

    let credentials = Credentials::from_env();
    if credentials.is_some() {
        tracing::debug!("forge credentials found in environment");
    }

    Ok(Arc::new(ChangeDetectionEngine::new(
        GitCli::with_fetch_timeout(config.poll_timeout()),
        sink,
        repos_dir,
        credentials,
    )))
}

/// Write back the watermarks currently held by `registry`
fn persist(
    config: &mut WatchConfig,
    config_path: &Path,
    registry: &WatchRegistry<CliMirror>,
    dry_run: bool,
) -> Result<()> {
    config.repos = registry.snapshot(&config.repos);
    if dry_run {
        tracing::debug!("dry run, not saving {:?}", config_path);
        return Ok(());
    }
    config.save(config_path)
}

fn log_cycle(report: &CycleReport) {
    tracing::info!(
        "polled {} repositories: {} notifications, {} undelivered, {} failures",
        report.outcomes.len(),
        report.published(),
        report.publish_failed(),
        report.failures().count()
    );
}

async fn poll(config: &mut WatchConfig, config_path: &Path, dry_run: bool) -> Result<()> {
    let engine = build_engine(config, dry_run)?;
    let registry = WatchRegistry::new(config.repos.clone());

    let report = registry
        .poll_all(engine, config.poll_timeout())
        .await;
    persist(config, config_path, &registry, dry_run)?;
    log_cycle(&report);

    let failed = report.failures().count();
    if failed > 0 {
        anyhow::bail!("{} of {} repositories failed to poll", failed, report.outcomes.len());
    }
    Ok(())
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("interrupted, stopping"),
        Err(err) => {
            tracing::warn!("cannot listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await
        }
    }
}

async fn watch(config: &mut WatchConfig, config_path: &Path, dry_run: bool) -> Result<()> {
    let engine = build_engine(config, dry_run)?;
    let registry = WatchRegistry::new(config.repos.clone());
    let interval = config.poll_interval();
    let timeout = config.poll_timeout();

    tracing::info!(
        "watching {} repositories every {:?}",
        registry.len(),
        interval
    );

    let cycles = registry
        .watch(engine, timeout, interval, interrupted(), |report| {
            persist(config, config_path, &registry, dry_run)?;
            log_cycle(report);
            Ok(())
        })
        .await?;

    // keep what an interrupted cycle already processed
    persist(config, config_path, &registry, dry_run)?;
    tracing::info!("stopped after {} cycles", cycles);
    Ok(())
}

fn list(config: &WatchConfig) {
    if config.repos.is_empty() {
        println!("no repositories watched");
        return;
    }

    for (name, repo) in &config.repos {
        println!("{}  {}", name, repo.url);
        for (branch_name, branch) in &repo.branches {
            let commit = branch
                .last_seen_commit
                .as_deref()
                .map_or("-", short_commit);
            if branch.interest_patterns.is_empty() {
                println!("  {}  {}", branch_name, commit);
            } else {
                println!(
                    "  {}  {}  [{}]",
                    branch_name,
                    commit,
                    branch.interest_patterns.join(", ")
                );
            }
        }
    }
}

fn add(
    config: &mut WatchConfig,
    config_path: &Path,
    name: String,
    url: String,
    branches: Vec<String>,
    files: Vec<String>,
) -> Result<()> {
    if config.repos.contains_key(&name) {
        anyhow::bail!("repository {} is already watched", name);
    }

    let mut repo = RepositoryConfig::new(name.clone(), url);
    for branch in branches {
        repo.branches.insert(
            branch.clone(),
            BranchConfig::with_patterns(branch, files.clone()),
        );
    }
    config.repos.insert(name.clone(), repo);
    config.save(config_path)?;

    eprintln!("gitwatch: watching {}", name);
    Ok(())
}

fn remove(
    config: &mut WatchConfig,
    config_path: &Path,
    name: &str,
    keep_mirror: bool,
) -> Result<()> {
    if config.repos.remove(name).is_none() {
        anyhow::bail!("repository {} is not watched", name);
    }
    config.save(config_path)?;

    if !keep_mirror {
        let removed = discard_mirror(&config.repos_dir, name)
            .with_context(|| format!("Failed to delete mirror of {}", name))?;
        if removed {
            tracing::info!("deleted mirror of {}", name);
        }
    }

    eprintln!("gitwatch: no longer watching {}", name);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = match cli.config {
        Some(path) => path,
        None => WatchConfig::config_file_path()?,
    };
    let mut config = WatchConfig::load(&config_path)?;

    match cli.command {
        Command::Poll => block_on(poll(&mut config, &config_path, cli.dry_run), SHUTDOWN_GRACE)?,
        Command::Watch => {
            block_on(watch(&mut config, &config_path, cli.dry_run), SHUTDOWN_GRACE)?
        }
        Command::List => {
            list(&config);
            Ok(())
        }
        Command::Add {
            name,
            url,
            branches,
            files,
        } => add(&mut config, &config_path, name, url, branches, files),
        Command::Remove { name, keep_mirror } => {
            remove(&mut config, &config_path, &name, keep_mirror)
        }
    }
}
