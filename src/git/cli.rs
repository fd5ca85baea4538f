use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::traits::{FetchOutcome, GitRef, Mirror, RemoteConfig, VcsEngine};
use crate::config::Credentials;

/// Version-control engine backed by the `git` executable
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    /// Kill a `git fetch` still running after this long
    fetch_timeout: Option<Duration>,
}

/// A bare mirror driven through `git --git-dir <path>`
#[derive(Debug, Clone)]
pub struct CliMirror {
    path: PathBuf,
    fetch_timeout: Option<Duration>,
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every fetch; a remote that stalls longer fails the fetch
    pub fn with_fetch_timeout(fetch_timeout: Duration) -> Self {
        Self {
            fetch_timeout: Some(fetch_timeout),
        }
    }

    fn mirror(&self, path: &Path) -> CliMirror {
        CliMirror {
            path: path.to_path_buf(),
            fetch_timeout: self.fetch_timeout,
        }
    }
}

/// Run a prepared git command and fail with its stderr on a non-zero exit
fn run(mut cmd: Command, what: &str) -> Result<Output> {
    tracing::debug!("running {:?}", cmd);

    let output = cmd
        .output()
        .with_context(|| format!("Failed to execute git {}", what))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git {} failed ({}): {}", what, output.status, stderr.trim());
    }

    Ok(output)
}

/// Like [`run`], but kill the child once `limit` has elapsed
fn run_bounded(mut cmd: Command, what: &str, limit: Option<Duration>) -> Result<Output> {
    let Some(limit) = limit else {
        return run(cmd, what);
    };
    tracing::debug!("running {:?} (limit {:?})", cmd, limit);

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to execute git {}", what))?;

    let deadline = Instant::now() + limit;
    loop {
        if child
            .try_wait()
            .with_context(|| format!("Failed to wait for git {}", what))?
            .is_some()
        {
            break;
        }
        if Instant::now() >= deadline {
            if let Err(err) = child.kill() {
                tracing::warn!("failed to kill git {}: {}", what, err);
            }
            // pipes may be held open by a remote helper; do not read them
            if let Err(err) = child.wait() {
                tracing::warn!("failed to reap git {}: {}", what, err);
            }
            anyhow::bail!("git {} timed out after {:?}", what, limit);
        }
        thread::sleep(Duration::from_millis(50));
    }

    let output = child
        .wait_with_output()
        .with_context(|| format!("Failed to collect output of git {}", what))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git {} failed ({}): {}", what, output.status, stderr.trim());
    }

    Ok(output)
}

impl VcsEngine for GitCli {
    type Mirror = CliMirror;

    fn open_mirror(&self, path: &Path) -> Result<Option<CliMirror>> {
        if !path.exists() {
            return Ok(None);
        }

        let mirror = self.mirror(path);

        let mut cmd = mirror.git();
        cmd.arg("rev-parse").arg("--is-bare-repository");
        let output = run(cmd, "rev-parse")
            .with_context(|| format!("{:?} is not a git repository", path))?;

        if String::from_utf8_lossy(&output.stdout).trim() != "true" {
            anyhow::bail!("{:?} is not a bare repository", path);
        }

        Ok(Some(mirror))
    }

    fn init_mirror(&self, path: &Path) -> Result<CliMirror> {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create mirror directory {:?}", path))?;

        let mut cmd = Command::new("git");
        cmd.current_dir(path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .arg("init")
            .arg("--bare")
            .arg("--quiet")
            .arg(".");
        run(cmd, "init")?;

        Ok(self.mirror(path))
    }
}

impl CliMirror {
    /// Base command: explicit git dir and working directory, never prompts
    fn git(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .arg("--git-dir")
            .arg(&self.path);
        cmd
    }
}

/// Parse `git config --get-regexp` output for `remote.<name>.url` keys
fn parse_remotes(output: &str) -> Vec<RemoteConfig> {
    output
        .lines()
        .filter_map(|line| {
            let (key, url) = line.split_once(' ')?;
            let name = key.strip_prefix("remote.")?.strip_suffix(".url")?;
            Some(RemoteConfig {
                name: name.to_string(),
                url: url.trim().to_string(),
            })
        })
        .collect()
}

/// Parse `git for-each-ref --format='%(objectname) %(refname)'` output
fn parse_refs(output: &str) -> Vec<GitRef> {
    output
        .lines()
        .filter_map(|line| {
            let (commit, name) = line.trim().split_once(' ')?;
            Some(GitRef {
                name: name.to_string(),
                commit: commit.to_string(),
                is_remote: name.starts_with("refs/remotes/"),
            })
        })
        .collect()
}

/// `Authorization` header value for token-based basic auth
fn basic_auth_header(creds: &Credentials) -> String {
    let encoded = STANDARD.encode(format!("{}:{}", creds.user, creds.token));
    format!("Authorization: Basic {}", encoded)
}

impl Mirror for CliMirror {
    fn path(&self) -> &Path {
        &self.path
    }

    fn remotes(&self) -> Result<Vec<RemoteConfig>> {
        let mut cmd = self.git();
        cmd.arg("config")
            .arg("--get-regexp")
            .arg(r"^remote\..*\.url$");

        let output = cmd
            .output()
            .context("Failed to execute git config")?;

        // exit code 1 means no matching key
        match output.status.code() {
            Some(0) => Ok(parse_remotes(&String::from_utf8_lossy(&output.stdout))),
            Some(1) => Ok(Vec::new()),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                anyhow::bail!("git config failed ({}): {}", output.status, stderr.trim());
            }
        }
    }

    fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        let mut cmd = self.git();
        cmd.arg("remote").arg("add").arg(name).arg(url);
        run(cmd, "remote add")?;
        Ok(())
    }

    fn fetch(&self, remote: &str, auth: Option<&Credentials>) -> Result<FetchOutcome> {
        let before = self.list_refs()?;

        let mut cmd = self.git();
        if let Some(creds) = auth {
            // passed through the environment to keep the token out of argv
            cmd.env("GIT_CONFIG_COUNT", "1")
                .env("GIT_CONFIG_KEY_0", "http.extraHeader")
                .env("GIT_CONFIG_VALUE_0", basic_auth_header(creds));
        }
        cmd.arg("fetch")
            .arg("--quiet")
            .arg("--prune")
            .arg("--no-tags")
            .arg(remote);
        run_bounded(cmd, "fetch", self.fetch_timeout)?;

        let after = self.list_refs()?;
        if before == after {
            Ok(FetchOutcome::AlreadyUpToDate)
        } else {
            Ok(FetchOutcome::Updated)
        }
    }

    fn list_refs(&self) -> Result<Vec<GitRef>> {
        let mut cmd = self.git();
        cmd.arg("for-each-ref")
            .arg("--sort=refname")
            .arg("--format=%(objectname) %(refname)");
        let output = run(cmd, "for-each-ref")?;
        Ok(parse_refs(&String::from_utf8_lossy(&output.stdout)))
    }

    fn diff_name_status(&self, old: &str, new: &str) -> Result<String> {
        let mut cmd = self.git();
        // -z: verbatim NUL-separated paths instead of C-quoted ones
        cmd.arg("diff")
            .arg("--name-status")
            .arg("-z")
            .arg("-M")
            .arg("--no-color")
            .arg(old)
            .arg(new);
        let output = run(cmd, "diff")?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
