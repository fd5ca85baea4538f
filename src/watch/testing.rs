//! In-memory version-control engine for exercising the watcher without git.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;

use crate::{
    config::Credentials,
    git::{FetchOutcome, GitRef, Mirror, RemoteConfig, VcsEngine},
    watch::{NotificationPayload, Publisher},
};

#[derive(Debug, Default, Clone)]
struct Upstream {
    /// branch -> commit
    branches: BTreeMap<String, String>,
    fetch_error: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct MirrorState {
    pub remotes: Vec<RemoteConfig>,
    /// full ref name -> commit
    pub refs: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Inner {
    upstreams: HashMap<String, Upstream>,
    mirrors: HashMap<PathBuf, MirrorState>,
    diffs: HashMap<(String, String), String>,
    diff_error: Option<String>,
    init_count: usize,
    authenticated_fetches: usize,
    fetches: usize,
    fetch_delay: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeVcs {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
pub struct FakeMirror {
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_remote_ref(&self, url: &str, branch: &str, commit: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .upstreams
            .entry(url.to_string())
            .or_default()
            .branches
            .insert(branch.to_string(), commit.to_string());
    }

    pub fn fail_fetch(&self, url: &str, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.upstreams.entry(url.to_string()).or_default().fetch_error =
            Some(message.to_string());
    }

    pub fn clear_fetch_failure(&self, url: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(upstream) = inner.upstreams.get_mut(url) {
            upstream.fetch_error = None;
        }
    }

    pub fn delay_fetch(&self, delay: Duration) {
        self.inner.lock().unwrap().fetch_delay = Some(delay);
    }

    pub fn set_diff(&self, old: &str, new: &str, output: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .diffs
            .insert((old.to_string(), new.to_string()), output.to_string());
    }

    pub fn fail_diff(&self, message: Option<&str>) {
        self.inner.lock().unwrap().diff_error = message.map(str::to_string);
    }

    pub fn add_stray_remote(&self, path: &Path, name: &str, url: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(mirror) = inner.mirrors.get_mut(path) {
            mirror.remotes.push(RemoteConfig {
                name: name.to_string(),
                url: url.to_string(),
            });
        }
    }

    pub fn mirror_state(&self, path: &Path) -> Option<MirrorState> {
        self.inner.lock().unwrap().mirrors.get(path).cloned()
    }

    pub fn init_count(&self) -> usize {
        self.inner.lock().unwrap().init_count
    }

    pub fn fetch_count(&self) -> usize {
        self.inner.lock().unwrap().fetches
    }

    pub fn authenticated_fetches(&self) -> usize {
        self.inner.lock().unwrap().authenticated_fetches
    }
}

impl VcsEngine for FakeVcs {
    type Mirror = FakeMirror;

    fn open_mirror(&self, path: &Path) -> Result<Option<FakeMirror>> {
        if !path.exists() {
            return Ok(None);
        }
        if !self.inner.lock().unwrap().mirrors.contains_key(path) {
            anyhow::bail!("{:?} is not a git repository", path);
        }
        Ok(Some(FakeMirror {
            path: path.to_path_buf(),
            inner: Arc::clone(&self.inner),
        }))
    }

    fn init_mirror(&self, path: &Path) -> Result<FakeMirror> {
        fs::create_dir_all(path)?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .mirrors
            .insert(path.to_path_buf(), MirrorState::default());
        inner.init_count += 1;
        Ok(FakeMirror {
            path: path.to_path_buf(),
            inner: Arc::clone(&self.inner),
        })
    }
}

impl Mirror for FakeMirror {
    fn path(&self) -> &Path {
        &self.path
    }

    fn remotes(&self) -> Result<Vec<RemoteConfig>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .mirrors
            .get(&self.path)
            .map(|m| m.remotes.clone())
            .unwrap_or_default())
    }

    fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some(mirror) = inner.mirrors.get_mut(&self.path) else {
            anyhow::bail!("mirror {:?} vanished", self.path);
        };
        mirror.remotes.push(RemoteConfig {
            name: name.to_string(),
            url: url.to_string(),
        });
        Ok(())
    }

    fn fetch(&self, remote: &str, auth: Option<&Credentials>) -> Result<FetchOutcome> {
        let delay = self.inner.lock().unwrap().fetch_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut inner = self.inner.lock().unwrap();
        inner.fetches += 1;
        if auth.is_some() {
            inner.authenticated_fetches += 1;
        }

        let url = inner
            .mirrors
            .get(&self.path)
            .and_then(|m| m.remotes.iter().find(|r| r.name == remote))
            .map(|r| r.url.clone());
        let Some(url) = url else {
            anyhow::bail!("no such remote {}", remote);
        };

        let upstream = inner.upstreams.get(&url).cloned().unwrap_or_default();
        if let Some(message) = upstream.fetch_error {
            anyhow::bail!("fetch from {} failed: {}", url, message);
        }

        let fetched: BTreeMap<String, String> = upstream
            .branches
            .iter()
            .map(|(branch, commit)| (format!("refs/remotes/{}/{}", remote, branch), commit.clone()))
            .collect();

        let Some(mirror) = inner.mirrors.get_mut(&self.path) else {
            anyhow::bail!("mirror {:?} vanished", self.path);
        };
        if mirror.refs == fetched {
            return Ok(FetchOutcome::AlreadyUpToDate);
        }
        mirror.refs = fetched;
        Ok(FetchOutcome::Updated)
    }

    fn list_refs(&self) -> Result<Vec<GitRef>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .mirrors
            .get(&self.path)
            .map(|m| {
                m.refs
                    .iter()
                    .map(|(name, commit)| GitRef {
                        name: name.clone(),
                        commit: commit.clone(),
                        is_remote: name.starts_with("refs/remotes/"),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn diff_name_status(&self, old: &str, new: &str) -> Result<String> {
        let inner = self.inner.lock().unwrap();
        if let Some(message) = &inner.diff_error {
            anyhow::bail!("git diff failed: {}", message);
        }
        Ok(inner
            .diffs
            .get(&(old.to_string(), new.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

/// Keeps every published payload
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<NotificationPayload>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<NotificationPayload> {
        self.published.lock().unwrap().clone()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, payload: NotificationPayload) -> Result<()> {
        self.published.lock().unwrap().push(payload);
        Ok(())
    }
}

/// Rejects everything
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingPublisher;

impl Publisher for FailingPublisher {
    fn publish(&self, _payload: NotificationPayload) -> Result<()> {
        anyhow::bail!("feed is read-only")
    }
}
