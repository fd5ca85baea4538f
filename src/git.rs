//! Version-control engine used by the watcher.
//!
//! The watcher only needs a handful of operations on a local bare mirror
//! (remotes, fetch, ref listing, name-status diff). They are expressed as
//! traits so the change-detection logic can run against an in-memory engine
//! in tests; [`GitCli`] is the production implementation.

mod cli;
mod traits;

pub use cli::{CliMirror, GitCli};
pub use traits::{FetchOutcome, GitRef, Mirror, RemoteConfig, VcsEngine};
