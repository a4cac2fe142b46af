//! Migration of validated staging copies into the trusted corpus.
//!
//! `staging/<tag>/<name>` moves to `corpus/<tag>/<name>`. With the default
//! [`CollisionPolicy::Suffix`], an existing destination is never replaced:
//! identical content makes the staged copy redundant, different content
//! lands beside it as `<stem>-<fp8>.<ext>`, or `<stem>-<full hex>.<ext>` when
//! that name also holds other content. [`CollisionPolicy::Overwrite`]
//! replaces the destination.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::CollisionPolicy;
use crate::error::{HarvestError, Result};
use crate::fingerprint::fingerprint_file;
use crate::fsutil::{move_file, suffixed_file_name};
use crate::pipeline::Stage;
use crate::pool::run_bounded;
use crate::progress::{report_every, ProgressReporter};
use crate::validate::staged_files;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Moved,
    Renamed,
    AlreadyPresent,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub moved: usize,
    pub renamed: usize,
    pub duplicates: usize,
    pub failed: usize,
}

impl MigrationReport {
    pub fn summary(&self) -> String {
        format!(
            "{} moved, {} renamed on collision, {} already present, {} failed",
            self.moved, self.renamed, self.duplicates, self.failed
        )
    }
}

/// Move every surviving staged copy into the corpus.
pub async fn migrate_staging(
    staging_root: &Path,
    corpus_root: &Path,
    policy: CollisionPolicy,
    concurrency: usize,
    reporter: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<MigrationReport> {
    let files = staged_files(staging_root);
    let staging_root = Arc::new(staging_root.to_path_buf());
    let corpus_root = Arc::new(corpus_root.to_path_buf());
    let every = concurrency.max(1) * 8;

    let results = run_bounded(
        files,
        concurrency,
        cancel,
        |completed, total| report_every(reporter, Stage::Migrating, completed, total, every),
        |src| {
            let staging_root = Arc::clone(&staging_root);
            let corpus_root = Arc::clone(&corpus_root);
            async move {
                let shown = src.clone();
                tokio::task::spawn_blocking(move || {
                    migrate_one(&src, &staging_root, &corpus_root, policy)
                })
                .await
                .unwrap_or_else(|e| Err(HarvestError::io(&shown, std::io::Error::other(e))))
            }
        },
    )
    .await;

    if cancel.is_cancelled() {
        return Err(HarvestError::Interrupted);
    }

    let mut report = MigrationReport::default();
    for result in results {
        match result {
            Ok(Placement::Moved) => report.moved += 1,
            Ok(Placement::Renamed) => report.renamed += 1,
            Ok(Placement::AlreadyPresent) => report.duplicates += 1,
            Err(e) => {
                tracing::warn!(error = %e, "cannot migrate staged copy");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// Corpus destination for a staged copy: same tag directory, same name.
pub fn destination_for(src: &Path, staging_root: &Path, corpus_root: &Path) -> Option<PathBuf> {
    let relative = src.strip_prefix(staging_root).ok()?;
    Some(corpus_root.join(relative))
}

fn migrate_one(
    src: &Path,
    staging_root: &Path,
    corpus_root: &Path,
    policy: CollisionPolicy,
) -> Result<Placement> {
    let dest = destination_for(src, staging_root, corpus_root).ok_or_else(|| {
        HarvestError::io(
            src,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "outside staging root"),
        )
    })?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
    }

    if policy == CollisionPolicy::Overwrite || !dest.exists() {
        move_file(src, &dest).map_err(|e| HarvestError::io(&dest, e))?;
        return Ok(Placement::Moved);
    }

    let staged_fp = fingerprint_file(src).map_err(|e| HarvestError::io(src, e))?;
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let slots = [
        dest.clone(),
        dest.with_file_name(suffixed_file_name(&file_name, &staged_fp.short())),
        dest.with_file_name(suffixed_file_name(&file_name, &staged_fp.to_hex())),
    ];

    for slot in &slots {
        if !slot.exists() {
            tracing::debug!(
                existing = %dest.display(),
                renamed = %slot.display(),
                "name collision in corpus, keeping both"
            );
            move_file(src, slot).map_err(|e| HarvestError::io(slot, e))?;
            return Ok(Placement::Renamed);
        }
        let existing_fp = fingerprint_file(slot).map_err(|e| HarvestError::io(slot, e))?;
        if existing_fp == staged_fp {
            discard(src)?;
            return Ok(Placement::AlreadyPresent);
        }
    }

    Err(HarvestError::io(
        &dest,
        std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "every candidate name holds different content",
        ),
    ))
}

fn discard(src: &Path) -> Result<()> {
    std::fs::remove_file(src).map_err(|e| HarvestError::io(src, e))
}
