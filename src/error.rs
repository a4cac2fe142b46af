//! Error taxonomy for the harvest pipeline.
//!
//! Every stage reports failures through [`HarvestError`]. Most variants are
//! *soft*: they are scoped to a single file or a single source, get logged
//! and counted, and the run continues. Only configuration problems, failures
//! to create the core directories, and interrupts abort a run
//! (see [`HarvestError::is_fatal`]).

use std::io;
use std::path::Path;

/// Errors produced by the harvest pipeline.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Missing or malformed configuration. Always fatal.
    #[error("config error: {0}")]
    Config(String),

    /// The source search query failed. The run continues with the
    /// previously known registry.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// A clone or update of one source failed.
    #[error("sync error: {url}: {reason}")]
    Sync { url: String, reason: String },

    /// The checker rejected a candidate, timed out, or could not be run.
    #[error("validation error: {path}: {reason}")]
    Validation { path: String, reason: String },

    /// The metadata block of a rule file could not be parsed.
    #[error("metadata error: {path}: {reason}")]
    Metadata { path: String, reason: String },

    /// A copy, move, hash or read failed on a single file.
    #[error("filesystem error: {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// A core directory (corpus root, staging root, clone root) could not
    /// be created or reset. Always fatal.
    #[error("cannot prepare directory {path}: {source}")]
    CoreDirectory {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The run was interrupted before it reached the indexed state.
    #[error("interrupted")]
    Interrupted,
}

impl HarvestError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        HarvestError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn core_directory(path: impl AsRef<Path>, source: io::Error) -> Self {
        HarvestError::CoreDirectory {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarvestError::Config(_) | HarvestError::CoreDirectory { .. } | HarvestError::Interrupted
        )
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
