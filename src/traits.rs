//! Extension seams of the pipeline.
//!
//! The pipeline talks to the outside world through three traits:
//!
//! ```text
//! SourceDiscovery ──▶ registry URLs
//! RepositorySource ──▶ working copy on disk (clone-or-update)
//! Checker ──▶ verdict for one staged candidate file
//! ```
//!
//! Built-in implementations live in [`crate::discovery`],
//! [`crate::connector_git`] and [`crate::validate`]. Tests and embedders can
//! substitute their own through [`crate::pipeline::Pipeline`]'s builder
//! methods.

use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// What a successful sync did to the working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// The working copy did not exist and was created.
    Cloned,
    /// An existing working copy was brought up to date.
    Updated,
}

/// One remote versioned source mirrored into a local working copy.
///
/// Each source is synced by at most one task at a time; the scheduler
/// handles retries, so `sync` should make a single attempt.
#[async_trait]
pub trait RepositorySource: Send + Sync {
    /// Identifying URL of the source.
    fn url(&self) -> &str;

    /// Local directory holding the working copy.
    fn working_copy(&self) -> &Path;

    /// Create the working copy if absent, otherwise update it in place.
    async fn sync(&self) -> Result<SyncAction>;
}

/// Finds new sources to add to the registry.
#[async_trait]
pub trait SourceDiscovery: Send + Sync {
    /// Return source URLs matching the discovery filter.
    async fn discover(&self) -> Result<Vec<String>>;
}

/// Outcome of checking one candidate file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    /// The checker ran and rejected the file.
    Invalid { status: Option<i32> },
    TimedOut,
    /// The checker could not be run at all.
    Failed(String),
    /// The run was interrupted while the check was in flight.
    Cancelled,
}

/// External validity oracle for candidate files.
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, path: &Path, cancel: &CancellationToken) -> Verdict;
}
