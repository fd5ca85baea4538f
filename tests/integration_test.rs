use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use gitwatch::git::{CliMirror, GitCli};
use gitwatch::watch::{
    BranchConfig, ChangeDetectionEngine, NotificationPayload, Publisher, RepositoryConfig,
    WatchRegistry, WatchedRepository,
};
use tempfile::TempDir;

/// Helper to run git commands in a directory
fn git_command(dir: &Path, args: &[&str]) -> std::process::Output {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .expect("Failed to run git command");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn rev_parse(dir: &Path, rev: &str) -> String {
    let output = git_command(dir, &["rev-parse", rev]);
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create an upstream repository with one commit on `main`
fn create_upstream(dir: &Path) -> PathBuf {
    let repo_dir = dir.join("upstream");
    fs::create_dir(&repo_dir).expect("Failed to create repo dir");

    git_command(&repo_dir, &["init", "--quiet"]);
    git_command(&repo_dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git_command(&repo_dir, &["config", "user.name", "Test User"]);
    git_command(&repo_dir, &["config", "user.email", "test@example.com"]);
    git_command(&repo_dir, &["config", "commit.gpgsign", "false"]);

    fs::create_dir(repo_dir.join("src")).unwrap();
    fs::write(repo_dir.join("src/app.go"), "package main\n").unwrap();
    fs::write(repo_dir.join("README.md"), "# demo\n").unwrap();
    commit_all(&repo_dir, "Initial commit");

    repo_dir
}

fn commit_all(repo: &Path, message: &str) {
    git_command(repo, &["add", "-A"]);
    git_command(repo, &["commit", "--quiet", "-m", message]);
}

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<NotificationPayload>>,
}

impl RecordingPublisher {
    fn published(&self) -> Vec<NotificationPayload> {
        self.published.lock().unwrap().clone()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, payload: NotificationPayload) -> anyhow::Result<()> {
        self.published.lock().unwrap().push(payload);
        Ok(())
    }
}

fn watched(url: &Path, patterns: &[&str]) -> WatchedRepository<CliMirror> {
    let mut config = RepositoryConfig::new("demo", url.to_string_lossy());
    config.branches.insert(
        "main".to_string(),
        BranchConfig::with_patterns("main", patterns.iter().map(|p| p.to_string()).collect()),
    );
    WatchedRepository::new(config)
}

#[test]
fn test_first_poll_seeds_watermark_without_notifying() {
    let temp = TempDir::new().unwrap();
    let upstream = create_upstream(temp.path());
    let engine = ChangeDetectionEngine::new(
        GitCli::new(),
        RecordingPublisher::default(),
        temp.path().join("repos"),
        None,
    );

    let mut repo = watched(&upstream, &[]);
    let report = engine.poll_once(&mut repo).unwrap();

    assert!(report.opened);
    assert_eq!(report.published, 0);
    assert_eq!(
        repo.config.branches["main"].last_seen_commit.as_deref(),
        Some(rev_parse(&upstream, "HEAD").as_str())
    );
    assert!(temp.path().join("repos/demo/HEAD").exists());
    assert!(engine.publisher().published().is_empty());

    // nothing new upstream
    let report = engine.poll_once(&mut repo).unwrap();
    assert!(!report.opened);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.changed, 0);
}

#[test]
fn test_change_outside_patterns_is_suppressed() {
    let temp = TempDir::new().unwrap();
    let upstream = create_upstream(temp.path());
    let engine = ChangeDetectionEngine::new(
        GitCli::new(),
        RecordingPublisher::default(),
        temp.path().join("repos"),
        None,
    );

    let mut repo = watched(&upstream, &["src"]);
    engine.poll_once(&mut repo).unwrap();

    fs::write(upstream.join("README.md"), "# demo\n\nmore docs\n").unwrap();
    commit_all(&upstream, "Docs only");
    let head = rev_parse(&upstream, "HEAD");

    let report = engine.poll_once(&mut repo).unwrap();
    assert_eq!(report.changed, 1);
    assert_eq!(report.suppressed, 1);
    assert!(engine.publisher().published().is_empty());
    assert_eq!(
        repo.config.branches["main"].last_seen_commit.as_deref(),
        Some(head.as_str())
    );
}

#[test]
fn test_matching_change_is_published() {
    let temp = TempDir::new().unwrap();
    let upstream = create_upstream(temp.path());
    let engine = ChangeDetectionEngine::new(
        GitCli::new(),
        RecordingPublisher::default(),
        temp.path().join("repos"),
        None,
    );

    let mut repo = watched(&upstream, &["src"]);
    engine.poll_once(&mut repo).unwrap();
    let old = rev_parse(&upstream, "HEAD");

    fs::write(upstream.join("src/app.go"), "package main\n\nfunc main() {}\n").unwrap();
    fs::write(upstream.join("src/util.go"), "package main\n").unwrap();
    commit_all(&upstream, "Touch sources");
    let new = rev_parse(&upstream, "HEAD");

    let report = engine.poll_once(&mut repo).unwrap();
    assert_eq!(report.published, 1);

    let published = engine.publisher().published();
    assert_eq!(published.len(), 1);
    assert_eq!(
        published[0].title,
        format!("demo ({} .. {})", &old[..8], &new[..8])
    );
    assert!(published[0].body.contains("Modified - src/app.go"));
    assert!(published[0].body.contains("Added - src/util.go"));
    assert_eq!(published[0].link, upstream.to_string_lossy());
}

#[test]
fn test_non_ascii_path_matches_pattern() {
    let temp = TempDir::new().unwrap();
    let upstream = create_upstream(temp.path());
    let engine = ChangeDetectionEngine::new(
        GitCli::new(),
        RecordingPublisher::default(),
        temp.path().join("repos"),
        None,
    );

    let mut repo = watched(&upstream, &["src"]);
    engine.poll_once(&mut repo).unwrap();

    fs::write(upstream.join("src/caf\u{e9}.go"), "package main\n").unwrap();
    fs::write(upstream.join("src/with space.go"), "package main\n").unwrap();
    commit_all(&upstream, "Add unicode source");

    let report = engine.poll_once(&mut repo).unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(report.suppressed, 0);

    let body = &engine.publisher().published()[0].body;
    assert!(body.contains("Added - src/caf\u{e9}.go<br>"), "{}", body);
    assert!(body.contains("Added - src/with space.go<br>"), "{}", body);
}

#[test]
fn test_fetch_timeout_still_allows_normal_fetches() {
    let temp = TempDir::new().unwrap();
    let upstream = create_upstream(temp.path());
    let engine = ChangeDetectionEngine::new(
        GitCli::with_fetch_timeout(std::time::Duration::from_secs(60)),
        RecordingPublisher::default(),
        temp.path().join("repos"),
        None,
    );

    let mut repo = watched(&upstream, &[]);
    engine.poll_once(&mut repo).unwrap();

    fs::write(upstream.join("README.md"), "# demo\n\nchanged\n").unwrap();
    commit_all(&upstream, "Docs");
    let report = engine.poll_once(&mut repo).unwrap();
    assert_eq!(report.published, 1);
}

#[test]
fn test_mirror_for_other_url_is_rebuilt() {
    let temp = TempDir::new().unwrap();
    let upstream = create_upstream(temp.path());
    let repos_dir = temp.path().join("repos");

    // stale mirror of the same name pointing elsewhere
    let stale = repos_dir.join("demo");
    fs::create_dir_all(&stale).unwrap();
    git_command(&stale, &["init", "--bare", "--quiet", "."]);
    git_command(
        &stale,
        &["remote", "add", "origin", "https://example.invalid/other.git"],
    );

    let engine = ChangeDetectionEngine::new(
        GitCli::new(),
        RecordingPublisher::default(),
        &repos_dir,
        None,
    );
    let mut repo = watched(&upstream, &[]);
    let report = engine.poll_once(&mut repo).unwrap();
    assert!(report.opened);

    let url = git_command(&stale, &["config", "--get", "remote.origin.url"]);
    assert_eq!(
        String::from_utf8_lossy(&url.stdout).trim(),
        upstream.to_string_lossy()
    );
    assert!(repo.config.branches["main"].last_seen_commit.is_some());
}

#[tokio::test]
async fn test_registry_isolates_unreachable_repository() {
    let temp = TempDir::new().unwrap();
    let upstream = create_upstream(temp.path());

    let mut good = watched(&upstream, &[]).config;
    good.name = "good".to_string();
    let mut bad = RepositoryConfig::new("bad", temp.path().join("missing").to_string_lossy());
    bad.branches.insert("main".to_string(), BranchConfig::new("main"));

    let mut watch_set = std::collections::BTreeMap::new();
    watch_set.insert("good".to_string(), good);
    watch_set.insert("bad".to_string(), bad);

    let registry: WatchRegistry<CliMirror> = WatchRegistry::new(watch_set.clone());
    let engine = Arc::new(ChangeDetectionEngine::new(
        GitCli::new(),
        RecordingPublisher::default(),
        temp.path().join("repos"),
        None,
    ));

    let report = registry
        .poll_all(engine, std::time::Duration::from_secs(60))
        .await;

    assert!(report.outcomes["good"].is_ok());
    assert!(report.outcomes["bad"].is_err());
    assert!(!temp.path().join("repos/bad").exists());

    let snapshot = registry.snapshot(&watch_set);
    assert!(snapshot["good"].branches["main"].last_seen_commit.is_some());
    assert!(snapshot["bad"].branches["main"].last_seen_commit.is_none());
}
