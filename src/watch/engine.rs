use std::path::{Path, PathBuf};

use super::{
    any_match, ChangeSet, Observation, Publisher, RepositoryConfig, RepositoryMirror,
};
use crate::{
    config::Credentials,
    error::{Error, Result},
    git::{FetchOutcome, Mirror, VcsEngine},
};

/// A watched repository together with its runtime mirror handle
#[derive(Debug)]
pub struct WatchedRepository<M> {
    pub config: RepositoryConfig,
    mirror: Option<RepositoryMirror<M>>,
}

impl<M: Mirror> WatchedRepository<M> {
    pub fn new(config: RepositoryConfig) -> Self {
        Self {
            config,
            mirror: None,
        }
    }

    pub fn has_mirror(&self) -> bool {
        self.mirror.is_some()
    }

    /// Drop the mirror handle; the next poll opens and validates it again
    pub fn reset_mirror(&mut self) {
        self.mirror = None;
    }
}

/// What happened during one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// The mirror was opened or built during this poll
    pub opened: bool,
    pub fetch: Option<FetchOutcome>,
    pub first_seen: usize,
    pub unchanged: usize,
    pub changed: usize,
    /// Delivered to the publisher
    pub published: usize,
    /// Interesting, but the publisher rejected it
    pub publish_failed: usize,
    pub suppressed: usize,
}

/// What became of one changed branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Published,
    Failed,
    Suppressed,
}

/// Drives polls: fetch, classify refs, diff, filter, publish, advance watermarks
pub struct ChangeDetectionEngine<V, P> {
    vcs: V,
    publisher: P,
    storage_dir: PathBuf,
    credentials: Option<Credentials>,
}

impl<V, P> ChangeDetectionEngine<V, P>
where
    V: VcsEngine,
    P: Publisher,
{
    pub fn new(
        vcs: V,
        publisher: P,
        storage_dir: impl Into<PathBuf>,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            vcs,
            publisher,
            storage_dir: storage_dir.into(),
            credentials,
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Run one poll cycle for `repo`.
    ///
    /// Watermarks advance per branch, only once the notification decision for
    /// that branch is made. On error, branches not yet processed keep their
    /// watermark and are retried on the next poll.
    pub fn poll_once(&self, repo: &mut WatchedRepository<V::Mirror>) -> Result<PollReport> {
        let mut report = PollReport::default();

        if repo.mirror.is_none() {
            let mirror = RepositoryMirror::open_or_init(
                &self.vcs,
                &self.storage_dir,
                &mut repo.config,
                self.credentials.as_ref(),
            )?;
            repo.mirror = Some(mirror);
            report.opened = true;
        }

        let WatchedRepository { config, mirror } = repo;
        let Some(mirror) = mirror.as_ref() else {
            return Err(Error::MirrorInit(format!("no mirror for {}", config.name)));
        };

        let outcome = mirror.fetch(self.credentials.as_ref())?;
        tracing::debug!(repo = %config.name, "fetched {} ({:?})", config.url, outcome);
        report.fetch = Some(outcome);

        for git_ref in mirror.remote_refs()? {
            match config.observe(git_ref.short_name(), &git_ref.commit) {
                Observation::Untracked => {}
                Observation::FirstSeen { branch, commit } => {
                    tracing::debug!(repo = %config.name, "first observation of {} at {}", branch, commit);
                    report.first_seen += 1;
                }
                Observation::Unchanged { .. } => report.unchanged += 1,
                Observation::Changed { branch, old, new } => {
                    report.changed += 1;
                    tracing::debug!(repo = %config.name, "{}: {} != {}", branch, old, new);

                    match self.process_change(config, mirror, &branch, &old, &new)? {
                        Delivery::Published => report.published += 1,
                        Delivery::Failed => report.publish_failed += 1,
                        Delivery::Suppressed => report.suppressed += 1,
                    }
                }
            }
        }

        Ok(report)
    }

    /// Diff, filter and publish one branch change, then advance its watermark
    fn process_change(
        &self,
        config: &mut RepositoryConfig,
        mirror: &RepositoryMirror<V::Mirror>,
        branch: &str,
        old: &str,
        new: &str,
    ) -> Result<Delivery> {
        let changes = mirror.diff(old, new)?;
        for change in &changes {
            tracing::debug!("{} - {}", change.change_type, change.path);
        }

        let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        let interested = config
            .branches
            .get(branch)
            .map_or(true, |b| any_match(&b.interest_patterns, &paths));

        let delivery = if interested {
            let change_set = ChangeSet {
                repo_name: &config.name,
                repo_url: &config.url,
                branch,
                old_commit: old,
                new_commit: new,
                changes: &changes,
            };

            tracing::info!(repo = %config.name, branch, "publishing {}", change_set.title());
            let published = change_set
                .to_payload()
                .and_then(|payload| self.publisher.publish(payload));
            match published {
                Ok(()) => Delivery::Published,
                Err(err) => {
                    // the change did happen; not retried
                    let err = Error::Publish(Error::chain(&err));
                    tracing::warn!(repo = %config.name, branch, "{}", err);
                    Delivery::Failed
                }
            }
        } else {
            tracing::debug!(
                repo = %config.name,
                branch,
                "no interesting files among {} changes",
                changes.len()
            );
            Delivery::Suppressed
        };

        if let Some(tracked) = config.branches.get_mut(branch) {
            tracked.advance(new);
        }

        Ok(delivery)
    }
}
