use std::{
    env,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::watch::WatchSet;

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(stripped) = s.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if s == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Replace `path` with `content` via a temp file in the same directory + rename
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory {:?}", parent))?;

    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {:?}", parent))?;
    temp.write_all(content.as_bytes())
        .context("Failed to write temp file")?;
    temp.persist(path)
        .with_context(|| format!("Failed to rename temp file onto {:?}", path))?;

    Ok(())
}

/// Configuration for gitwatch, including the persisted watch set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    /// Directory holding one bare mirror per watched repository
    #[serde(default = "defaults::repos_dir")]
    pub repos_dir: PathBuf,
    /// Seconds between poll cycles in watch mode
    #[serde(default = "defaults::poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Upper bound on a single repository poll
    #[serde(default = "defaults::poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default)]
    pub feed: FeedConfig,
    /// Watched repositories, keyed by name
    #[serde(default)]
    pub repos: WatchSet,
}

/// Where published notifications end up
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedConfig {
    #[serde(default = "defaults::feed_path")]
    pub path: PathBuf,
    #[serde(default = "defaults::feed_max_items")]
    pub max_items: usize,
    #[serde(default = "defaults::feed_title")]
    pub title: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            path: defaults::feed_path(),
            max_items: defaults::feed_max_items(),
            title: defaults::feed_title(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            repos_dir: defaults::repos_dir(),
            poll_interval_secs: defaults::poll_interval_secs(),
            poll_timeout_secs: defaults::poll_timeout_secs(),
            feed: FeedConfig::default(),
            repos: WatchSet::new(),
        }
    }
}

impl WatchConfig {
    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!("loading gitwatch config from {:?}", path);
        let mut config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            tracing::debug!("no config file at {:?}, using defaults", path);
            Self::default()
        };

        if let Ok(dir) = env::var("GITWATCH_REPOS_DIR") {
            config.repos_dir = expand_tilde(&PathBuf::from(dir));
        }

        if let Ok(feed) = env::var("GITWATCH_FEED") {
            config.feed.path = expand_tilde(&PathBuf::from(feed));
        }

        if let Ok(interval) = env::var("GITWATCH_POLL_INTERVAL") {
            config.poll_interval_secs = interval
                .parse()
                .context("Failed to parse GITWATCH_POLL_INTERVAL as u64")?;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: WatchConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.repos_dir = expand_tilde(&config.repos_dir);
        config.feed.path = expand_tilde(&config.feed.path);

        // names live in the map keys only
        for (name, repo) in config.repos.iter_mut() {
            repo.name = name.clone();
            for (branch_name, branch) in repo.branches.iter_mut() {
                branch.name = branch_name.clone();
            }
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        write_atomic(path, &content)
            .with_context(|| format!("Failed to write config file: {:?}", path))
    }

    /// Get default config file path
    pub fn config_file_path() -> Result<PathBuf> {
        if let Ok(path) = env::var("GITWATCH_CONFIG") {
            return Ok(expand_tilde(&PathBuf::from(path)));
        }
        dirs::home_dir()
            .map(|home| home.join(".config/gitwatch/config.yaml"))
            .context("Could not determine home directory for config file")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs.max(1))
    }

    /// Get the mirror storage directory, creating it if necessary
    pub fn ensure_repos_dir(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.repos_dir)
            .with_context(|| format!("Failed to create repos directory: {:?}", self.repos_dir))?;
        Ok(self.repos_dir.clone())
    }
}

/// Hosted-forge credentials taken from the environment
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub token: String,
}

impl Credentials {
    /// Read `GITHUB_USER` / `GITHUB_TOKEN`; both must be set and non-empty.
    pub fn from_env() -> Option<Self> {
        let user = env::var("GITHUB_USER").ok().filter(|v| !v.is_empty())?;
        let token = env::var("GITHUB_TOKEN").ok().filter(|v| !v.is_empty())?;
        Some(Self { user, token })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

mod defaults {
    use std::path::PathBuf;

    fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gitwatch")
    }

    pub(crate) fn repos_dir() -> PathBuf {
        data_dir().join("repos")
    }

    pub(crate) fn feed_path() -> PathBuf {
        data_dir().join("feed.yaml")
    }

    pub(crate) fn feed_max_items() -> usize {
        100
    }

    pub(crate) fn feed_title() -> String {
        "gitwatch".to_string()
    }

    pub(crate) fn poll_interval_secs() -> u64 {
        300
    }

    pub(crate) fn poll_timeout_secs() -> u64 {
        120
    }
}
