use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::DEFAULT_REMOTE;

/// One watched repository
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Unique name, also the mirror's directory name
    #[serde(skip)]
    pub name: String,
    /// Remote location; the mirror is rebuilt if its remote ever differs
    pub url: String,
    /// Tracked branches, keyed by short name
    #[serde(default)]
    pub branches: BTreeMap<String, BranchConfig>,
}

/// Tracking state for one branch.
/// If `interest_patterns` is empty, any change is reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchConfig {
    #[serde(skip)]
    pub name: String,
    /// Last commit that has been processed
    #[serde(rename = "commit", default, skip_serializing_if = "Option::is_none")]
    pub last_seen_commit: Option<String>,
    /// Path globs; a change is reported only if one of them matches
    #[serde(rename = "files", default, skip_serializing_if = "Vec::is_empty")]
    pub interest_patterns: Vec<String>,
}

/// How a remote ref observation relates to the stored watermark
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Ref does not belong to a configured branch
    Untracked,
    /// Branch had no watermark; it now points at the observed commit
    FirstSeen { branch: String, commit: String },
    /// Watermark already equals the observed commit
    Unchanged { branch: String },
    /// Branch moved. The watermark is still `old` until [`BranchConfig::advance`]
    Changed {
        branch: String,
        old: String,
        new: String,
    },
}

impl RepositoryConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            branches: BTreeMap::new(),
        }
    }

    /// Return the branch a ref's short name refers to, if it is tracked.
    /// `origin/main` and `main` both resolve to branch `main`.
    pub fn tracked_branch_mut(&mut self, ref_name: &str) -> Option<&mut BranchConfig> {
        let branch_name = ref_name
            .strip_prefix(DEFAULT_REMOTE)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(ref_name);
        self.branches.get_mut(branch_name)
    }

    /// Classify a remote ref against the tracked branch's watermark
    pub fn observe(&mut self, ref_name: &str, commit: &str) -> Observation {
        match self.tracked_branch_mut(ref_name) {
            Some(branch) => branch.observe(commit),
            None => Observation::Untracked,
        }
    }

    /// Set the watermark of every tracked branch found among `refs`
    /// without reporting anything
    pub fn seed_watermarks<'a>(&mut self, refs: impl IntoIterator<Item = (&'a str, &'a str)>) {
        for (ref_name, commit) in refs {
            if let Some(branch) = self.tracked_branch_mut(ref_name) {
                tracing::debug!("seeding {} at {}", branch.name, commit);
                branch.advance(commit);
            }
        }
    }
}

impl BranchConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_patterns(name: impl Into<String>, patterns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            last_seen_commit: None,
            interest_patterns: patterns,
        }
    }

    /// Compare `commit` with the watermark.
    /// Only a first observation moves the watermark here.
    pub fn observe(&mut self, commit: &str) -> Observation {
        match self.last_seen_commit.as_deref() {
            None | Some("") => {
                self.last_seen_commit = Some(commit.to_string());
                Observation::FirstSeen {
                    branch: self.name.clone(),
                    commit: commit.to_string(),
                }
            }
            Some(old) if old == commit => Observation::Unchanged {
                branch: self.name.clone(),
            },
            Some(old) => Observation::Changed {
                branch: self.name.clone(),
                old: old.to_string(),
                new: commit.to_string(),
            },
        }
    }

    /// Move the watermark to `commit`
    pub fn advance(&mut self, commit: &str) {
        self.last_seen_commit = Some(commit.to_string());
    }
}
