use std::path::Path;

use anyhow::Result;

use crate::config::Credentials;

/// A configured remote of a mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub name: String,
    pub url: String,
}

/// A ref as stored in the mirror after a fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRef {
    /// Full ref name, e.g. `refs/remotes/origin/main`
    pub name: String,
    /// Commit the ref points to (40 hex chars for SHA-1 repositories)
    pub commit: String,
    /// True for remote-tracking refs
    pub is_remote: bool,
}

impl GitRef {
    /// Short name as git would print it: `refs/remotes/origin/main` -> `origin/main`
    pub fn short_name(&self) -> &str {
        self.name
            .strip_prefix("refs/remotes/")
            .or_else(|| self.name.strip_prefix("refs/heads/"))
            .or_else(|| self.name.strip_prefix("refs/tags/"))
            .unwrap_or(&self.name)
    }
}

/// Result of a successful fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Updated,
    AlreadyUpToDate,
}

/// Entry point of the version-control engine: opens and creates mirrors.
pub trait VcsEngine: Send + Sync {
    type Mirror: Mirror;

    /// Open the mirror stored at `path`.
    /// Returns `Ok(None)` when nothing exists at `path`.
    /// Returns an error when `path` exists but is not a usable mirror.
    fn open_mirror(&self, path: &Path) -> Result<Option<Self::Mirror>>;

    /// Create a new, empty bare mirror at `path`.
    fn init_mirror(&self, path: &Path) -> Result<Self::Mirror>;
}

/// Operations on one local bare mirror.
pub trait Mirror: Send {
    /// On-disk location of the mirror
    fn path(&self) -> &Path;

    fn remotes(&self) -> Result<Vec<RemoteConfig>>;

    fn add_remote(&self, name: &str, url: &str) -> Result<()>;

    /// Fetch every ref of `remote`.
    /// "Already up to date" is reported as `Ok(FetchOutcome::AlreadyUpToDate)`.
    fn fetch(&self, remote: &str, auth: Option<&Credentials>) -> Result<FetchOutcome>;

    /// All refs currently stored in the mirror, sorted by name.
    fn list_refs(&self) -> Result<Vec<GitRef>>;

    /// Raw name-status comparison between two commits.
    fn diff_name_status(&self, old: &str, new: &str) -> Result<String>;
}
