use std::{
    collections::BTreeMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, TryLockError},
    time::Duration,
};

use anyhow::Context;
use tokio::task::JoinSet;

use super::{ChangeDetectionEngine, PollReport, Publisher, WatchSet, WatchedRepository};
use crate::{
    error::{Error, Result},
    git::{Mirror, VcsEngine},
};

/// Result of polling every repository once
#[derive(Debug, Default)]
pub struct CycleReport {
    pub outcomes: BTreeMap<String, Result<PollReport>>,
}

impl CycleReport {
    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|(name, outcome)| outcome.as_ref().err().map(|e| (name.as_str(), e)))
    }

    pub fn published(&self) -> usize {
        self.outcomes
            .values()
            .filter_map(|outcome| outcome.as_ref().ok())
            .map(|report| report.published)
            .sum()
    }

    pub fn publish_failed(&self) -> usize {
        self.outcomes
            .values()
            .filter_map(|outcome| outcome.as_ref().ok())
            .map(|report| report.publish_failed)
            .sum()
    }
}

/// Run `future` on a new multi-threaded runtime.
///
/// Polls that timed out may still occupy the blocking pool when `future`
/// completes; they get `grace` to finish before the runtime is torn down
/// without them.
pub fn block_on<F: Future>(future: F, grace: Duration) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(grace);
    Ok(output)
}

/// Owns every watched repository behind its own lock.
///
/// Polls of different repositories run in parallel; a repository is never
/// polled twice at once.
pub struct WatchRegistry<M> {
    repos: BTreeMap<String, Arc<Mutex<WatchedRepository<M>>>>,
}

/// Take a repository lock after a panicked poll, forcing the mirror to be
/// revalidated
fn recover<'a, M: Mirror>(
    name: &str,
    poisoned: std::sync::PoisonError<MutexGuard<'a, WatchedRepository<M>>>,
) -> MutexGuard<'a, WatchedRepository<M>> {
    tracing::warn!(repo = %name, "previous poll panicked, reopening mirror");
    let mut guard = poisoned.into_inner();
    guard.reset_mirror();
    guard
}

impl<M: Mirror + 'static> WatchRegistry<M> {
    pub fn new(watch_set: WatchSet) -> Self {
        let repos = watch_set
            .into_iter()
            .map(|(name, mut config)| {
                config.name = name.clone();
                for (branch_name, branch) in config.branches.iter_mut() {
                    branch.name = branch_name.clone();
                }
                (name, Arc::new(Mutex::new(WatchedRepository::new(config))))
            })
            .collect();
        Self { repos }
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Mutex<WatchedRepository<M>>>> {
        self.repos.get(name).cloned()
    }

    /// Poll every repository concurrently, each bounded by `timeout`.
    ///
    /// A poll that times out keeps running on the blocking pool and holds its
    /// repository's lock; the next cycle reports that repository as
    /// [`Error::PollInProgress`] until it finishes.
    pub async fn poll_all<V, P>(
        &self,
        engine: Arc<ChangeDetectionEngine<V, P>>,
        timeout: Duration,
    ) -> CycleReport
    where
        V: VcsEngine<Mirror = M> + 'static,
        P: Publisher + 'static,
    {
        let mut tasks = JoinSet::new();

        for (name, slot) in &self.repos {
            let name = name.clone();
            let slot = Arc::clone(slot);
            let engine = Arc::clone(&engine);

            tasks.spawn(async move {
                let task_name = name.clone();
                let poll = tokio::task::spawn_blocking(move || {
                    let mut repo = match slot.try_lock() {
                        Ok(guard) => guard,
                        Err(TryLockError::WouldBlock) => return Err(Error::PollInProgress),
                        Err(TryLockError::Poisoned(poisoned)) => recover(&task_name, poisoned),
                    };
                    engine.poll_once(&mut repo)
                });

                let outcome = match tokio::time::timeout(timeout, poll).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(join_err)) => Err(Error::Aborted(join_err.to_string())),
                    Err(_) => Err(Error::Timeout(timeout)),
                };
                (name, outcome)
            });
        }

        let mut report = CycleReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    match &outcome {
                        Ok(poll) => tracing::debug!(repo = %name, "polled: {:?}", poll),
                        Err(err) => tracing::error!(repo = %name, "poll failed: {}", err),
                    }
                    report.outcomes.insert(name, outcome);
                }
                Err(join_err) => tracing::error!("poll task failed: {}", join_err),
            }
        }

        report
    }

    /// Poll every `interval` until `shutdown` resolves, calling `after_cycle`
    /// with each completed cycle. A cycle interrupted by `shutdown` is
    /// abandoned; repositories it already updated keep their new state.
    /// Returns the number of completed cycles.
    pub async fn watch<V, P, S, F>(
        &self,
        engine: Arc<ChangeDetectionEngine<V, P>>,
        timeout: Duration,
        interval: Duration,
        shutdown: S,
        mut after_cycle: F,
    ) -> anyhow::Result<usize>
    where
        V: VcsEngine<Mirror = M> + 'static,
        P: Publisher + 'static,
        S: Future<Output = ()>,
        F: FnMut(&CycleReport) -> anyhow::Result<()>,
    {
        tokio::pin!(shutdown);
        let mut cycles = 0;

        loop {
            let report = tokio::select! {
                report = self.poll_all(Arc::clone(&engine), timeout) => report,
                () = &mut shutdown => break,
            };
            after_cycle(&report)?;
            cycles += 1;

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = &mut shutdown => break,
            }
        }

        Ok(cycles)
    }

    /// Current watch set for persistence. Repositories still locked by a
    /// running poll keep their entry from `previous`.
    pub fn snapshot(&self, previous: &WatchSet) -> WatchSet {
        let mut watch_set = WatchSet::new();
        for (name, slot) in &self.repos {
            let config = match slot.try_lock() {
                Ok(guard) => Some(guard.config.clone()),
                Err(TryLockError::Poisoned(poisoned)) => Some(recover(name, poisoned).config.clone()),
                Err(TryLockError::WouldBlock) => previous.get(name).cloned(),
            };
            if let Some(config) = config {
                watch_set.insert(name.clone(), config);
            }
        }
        watch_set
    }
}
