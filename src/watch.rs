//! Repository state tracking and change detection.
//!
//! One poll of a repository goes:
//! mirror open-or-init, fetch, classify every remote-tracking ref against its
//! branch watermark, and for changed branches diff, filter, publish, then
//! advance the watermark.

mod branch;
mod diff;
mod engine;
mod mirror;
mod notification;
mod path_matcher;
mod registry;
#[cfg(test)]
mod testing;

use std::collections::BTreeMap;

pub use branch::{BranchConfig, Observation, RepositoryConfig};
pub use diff::{parse_name_status, ChangeRecord, ChangeType};
pub use engine::{ChangeDetectionEngine, PollReport, WatchedRepository};
pub use mirror::{auth_for, discard_mirror, RepositoryMirror};
pub use notification::{
    short_commit, ChangeSet, NotificationPayload, Publisher, TracingPublisher,
};
pub use path_matcher::{any_match, matches};
pub use registry::{block_on, CycleReport, WatchRegistry};

/// Name of the single remote every mirror carries
pub const DEFAULT_REMOTE: &str = "origin";

/// All watched repositories, keyed by name
pub type WatchSet = BTreeMap<String, RepositoryConfig>;
