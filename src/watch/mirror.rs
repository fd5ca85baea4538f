use std::{fs, path::Path};

use url::Url;

use super::{diff::ChangeRecord, parse_name_status, RepositoryConfig, DEFAULT_REMOTE};
use crate::{
    config::Credentials,
    error::{Error, Result},
    git::{FetchOutcome, GitRef, Mirror, VcsEngine},
};

/// Host for which forge credentials are sent
const FORGE_HOST: &str = "github.com";

/// The local bare mirror of one watched repository.
///
/// Invariant: the wrapped mirror has exactly one remote, named
/// [`DEFAULT_REMOTE`], whose URL is `url`.
#[derive(Debug)]
pub struct RepositoryMirror<M> {
    inner: M,
    url: String,
}

/// Pick credentials for `url`: only sent to the hosted forge, never to other hosts
pub fn auth_for<'a>(url: &str, creds: Option<&'a Credentials>) -> Option<&'a Credentials> {
    let creds = creds?;
    match Url::parse(url) {
        Ok(parsed) if parsed.host_str() == Some(FORGE_HOST) => Some(creds),
        Ok(_) => None,
        Err(err) => {
            tracing::debug!("not sending credentials to unparsable url {:?}: {}", url, err);
            None
        }
    }
}

/// Mirror directory names come from configuration; keep them inside the storage root
fn check_storage_key(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::MirrorInit(format!(
            "repository name {:?} cannot be used as a directory name",
            name
        )));
    }
    Ok(())
}

fn remove_mirror(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Delete the stored mirror of repository `name`.
/// Returns whether there was anything to delete.
pub fn discard_mirror(storage_dir: &Path, name: &str) -> Result<bool> {
    check_storage_key(name)?;
    let path = storage_dir.join(name);
    let existed = path.exists();
    remove_mirror(&path)?;
    Ok(existed)
}

/// Exactly one remote, pointing at `url`
fn validate<M: Mirror>(mirror: &M, url: &str) -> Result<()> {
    let remotes = mirror
        .remotes()
        .map_err(|e| Error::MirrorCorrupted(Error::chain(&e)))?;

    match remotes.as_slice() {
        [] => Err(Error::MirrorCorrupted("mirror has no remote".to_string())),
        [remote] if remote.url == url => Ok(()),
        [remote] => Err(Error::MirrorCorrupted(format!(
            "remote URL {:?} is different from the configured {:?}",
            remote.url, url
        ))),
        _ => Err(Error::MirrorCorrupted(format!(
            "expected one remote, found {}",
            remotes.len()
        ))),
    }
}

impl<M: Mirror> RepositoryMirror<M> {
    /// Open the mirror for `config` under `storage_dir`, or build a new one.
    ///
    /// An existing mirror that is unreadable or tracks another remote is
    /// deleted and rebuilt. A freshly built mirror is fetched once and every
    /// tracked branch found on the remote gets its watermark set, so nothing
    /// is reported for history that predates the mirror.
    pub fn open_or_init<V>(
        vcs: &V,
        storage_dir: &Path,
        config: &mut RepositoryConfig,
        creds: Option<&Credentials>,
    ) -> Result<Self>
    where
        V: VcsEngine<Mirror = M>,
    {
        check_storage_key(&config.name)?;
        let path = storage_dir.join(&config.name);

        let corrupted = match vcs.open_mirror(&path) {
            Ok(Some(mirror)) => match validate(&mirror, &config.url) {
                Ok(()) => {
                    tracing::debug!("opened mirror {:?}", path);
                    return Ok(Self {
                        inner: mirror,
                        url: config.url.clone(),
                    });
                }
                Err(err) => Some(err),
            },
            Ok(None) => None,
            Err(err) => Some(Error::MirrorCorrupted(Error::chain(&err))),
        };

        if let Some(err) = corrupted {
            tracing::warn!(repo = %config.name, "discarding mirror {:?}: {}", path, err);
            remove_mirror(&path)?;
        }

        Self::init(vcs, &path, config, creds)
    }

    fn init<V>(
        vcs: &V,
        path: &Path,
        config: &mut RepositoryConfig,
        creds: Option<&Credentials>,
    ) -> Result<Self>
    where
        V: VcsEngine<Mirror = M>,
    {
        tracing::info!(repo = %config.name, "initializing mirror {:?} for {}", path, config.url);

        let inner = vcs
            .init_mirror(path)
            .map_err(|e| Error::MirrorInit(Error::chain(&e)))?;
        let mirror = Self {
            inner,
            url: config.url.clone(),
        };

        let refs = mirror
            .inner
            .add_remote(DEFAULT_REMOTE, &config.url)
            .map_err(|e| Error::MirrorInit(Error::chain(&e)))
            .and_then(|()| mirror.fetch(creds))
            .and_then(|_| mirror.remote_refs());

        let refs = match refs {
            Ok(refs) => refs,
            Err(err) => {
                // leave nothing half-built behind; the next poll starts over
                if let Err(cleanup) = remove_mirror(path) {
                    tracing::warn!("failed to remove incomplete mirror {:?}: {}", path, cleanup);
                }
                return Err(match err {
                    Error::MirrorInit(msg) => Error::MirrorInit(msg),
                    other => Error::MirrorInit(format!("initial fetch: {}", other)),
                });
            }
        };

        config.seed_watermarks(
            refs.iter()
                .map(|r| (r.short_name(), r.commit.as_str())),
        );

        Ok(mirror)
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Fetch every ref of the remote, with forge credentials when they apply
    pub fn fetch(&self, creds: Option<&Credentials>) -> Result<FetchOutcome> {
        let auth = auth_for(&self.url, creds);
        tracing::debug!(
            "fetching {} ({})",
            self.url,
            if auth.is_some() { "authenticated" } else { "anonymous" }
        );

        self.inner
            .fetch(DEFAULT_REMOTE, auth)
            .map_err(|e| Error::Fetch(Error::chain(&e)))
    }

    /// Remote-tracking refs only
    pub fn remote_refs(&self) -> Result<Vec<GitRef>> {
        let refs = self
            .inner
            .list_refs()
            .map_err(|e| Error::Fetch(Error::chain(&e)))?;
        Ok(refs.into_iter().filter(|r| r.is_remote).collect())
    }

    /// Files touched between two commits
    pub fn diff(&self, old: &str, new: &str) -> Result<Vec<ChangeRecord>> {
        let output = self
            .inner
            .diff_name_status(old, new)
            .map_err(|e| Error::Diff(Error::chain(&e)))?;
        Ok(parse_name_status(&output))
    }
}
