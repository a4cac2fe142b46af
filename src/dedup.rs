//! Run-scoped deduplication index.
//!
//! Maps [`Fingerprint`] → canonical path. The index is seeded from the
//! corpus as it exists *before* the run, then shared by handle with every
//! categorization worker. [`DedupIndex::try_claim`] is the only
//! synchronization point between those workers: for any fingerprint exactly
//! one caller observes [`Claim::Claimed`].
//!
//! Additions made to the corpus later in the same run are not reflected
//! here; the pipeline never overlaps categorization with migration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::{HarvestError, Result};
use crate::fingerprint::{fingerprint_file, Fingerprint};
use crate::pool::run_bounded;

/// Result of [`DedupIndex::try_claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The caller is the first to present this content.
    Claimed,
    /// The content is already trusted or claimed by another file.
    AlreadyPresent { canonical: PathBuf },
}

#[derive(Debug, Default)]
pub struct DedupIndex {
    entries: Mutex<HashMap<Fingerprint, PathBuf>>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim `fingerprint` for `path`.
    pub fn try_claim(&self, fingerprint: Fingerprint, path: &Path) -> Claim {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&fingerprint) {
            Some(canonical) => Claim::AlreadyPresent {
                canonical: canonical.clone(),
            },
            None => {
                entries.insert(fingerprint, path.to_path_buf());
                Claim::Claimed
            }
        }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fingerprint every file under `corpus_root` and claim each one.
    ///
    /// Unreadable files are logged and left out of the baseline. A missing
    /// corpus yields an empty index.
    pub async fn seed(
        corpus_root: &Path,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Result<Arc<DedupIndex>> {
        let index = Arc::new(DedupIndex::new());
        if !corpus_root.exists() {
            return Ok(index);
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(corpus_root).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "skipping unreadable corpus entry"),
            }
        }

        let hashed = run_bounded(files, concurrency, cancel, |_, _| {}, |path| async move {
            let hashed_path = path.clone();
            let result = tokio::task::spawn_blocking(move || fingerprint_file(&hashed_path))
                .await
                .map_err(std::io::Error::other)
                .and_then(|r| r);
            (path, result)
        })
        .await;

        if cancel.is_cancelled() {
            return Err(HarvestError::Interrupted);
        }

        // Walk order is deterministic, so the first path wins among
        // fanned-out copies of the same content.
        let mut hashed = hashed;
        hashed.sort_by(|a, b| a.0.cmp(&b.0));
        for (path, result) in hashed {
            match result {
                Ok(fp) => {
                    index.try_claim(fp, &path);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot fingerprint corpus file");
                }
            }
        }

        tracing::info!(
            corpus = %corpus_root.display(),
            fingerprints = index.len(),
            "seeded dedup index"
        );
        Ok(index)
    }
}
