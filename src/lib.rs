#![deny(clippy::mod_module_files)]
//! Poll git repositories and publish a notification whenever a tracked branch
//! moves and touches files someone is interested in.

pub mod config;
pub mod error;
pub mod feed;
pub mod git;
pub mod watch;

pub use error::{Error, Result};
