//! Validation of staged candidates with an external checker.
//!
//! Every file under every staging area is handed to a [`Checker`]. A
//! [`Verdict::Valid`] leaves the file in place for migration; any other
//! verdict (non-zero exit, timeout, spawn failure) deletes that one staged
//! copy. Each fanned-out tag copy is checked on its own.
//!
//! Files are processed in batches (default 200) with bounded concurrency
//! (default 20) to cap simultaneous subprocesses and open descriptors.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::CheckerConfig;
use crate::error::{HarvestError, Result};
use crate::pipeline::Stage;
use crate::pool::run_batched;
use crate::progress::{report_every, ProgressReporter};
use crate::traits::{Checker, Verdict};

/// Runs `<binary> <args...> <path>` and interprets only its exit status.
pub struct ProcessChecker {
    binary: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessChecker {
    pub fn new(binary: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &CheckerConfig) -> Self {
        Self::new(
            config.binary.clone(),
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl Checker for ProcessChecker {
    async fn check(&self, path: &Path, cancel: &CancellationToken) -> Verdict {
        let mut child = match Command::new(&self.binary)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return Verdict::Failed(format!(
                    "cannot run {}: {}",
                    self.binary.display(),
                    e
                ))
            }
        };

        tokio::select! {
            status = tokio::time::timeout(self.timeout, child.wait()) => match status {
                Ok(Ok(status)) if status.success() => Verdict::Valid,
                Ok(Ok(status)) => Verdict::Invalid { status: status.code() },
                Ok(Err(e)) => Verdict::Failed(e.to_string()),
                Err(_) => {
                    let _ = child.kill().await;
                    Verdict::TimedOut
                }
            },
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                Verdict::Cancelled
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidateOptions {
    pub batch_size: usize,
    pub concurrency: usize,
    pub progress_every: usize,
}

impl ValidateOptions {
    pub fn from_config(config: &CheckerConfig, progress_every: usize) -> Self {
        Self {
            batch_size: config.batch_size,
            concurrency: config.concurrency,
            progress_every,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub checked: usize,
    pub passed: usize,
    pub rejected: usize,
    pub timed_out: usize,
    pub errors: usize,
}

impl ValidationReport {
    pub fn summary(&self) -> String {
        format!(
            "{} checked, {} passed, {} rejected, {} timed out, {} checker errors",
            self.checked, self.passed, self.rejected, self.timed_out, self.errors
        )
    }
}

/// Check every file under `staging_root`, deleting the ones that fail.
pub async fn validate_staging(
    staging_root: &Path,
    checker: Arc<dyn Checker>,
    options: &ValidateOptions,
    reporter: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<ValidationReport> {
    let files = staged_files(staging_root);
    let every = options.progress_every;

    let verdicts = run_batched(
        files,
        options.batch_size,
        options.concurrency,
        cancel,
        |completed, total| report_every(reporter, Stage::Validating, completed, total, every),
        |path| {
            let checker = Arc::clone(&checker);
            let cancel = cancel.clone();
            async move {
                let verdict = check_isolated(checker, path.clone(), cancel).await;
                apply_verdict(&path, &verdict);
                verdict
            }
        },
    )
    .await;

    if cancel.is_cancelled() {
        return Err(HarvestError::Interrupted);
    }

    let mut report = ValidationReport::default();
    for verdict in verdicts {
        match verdict {
            Verdict::Valid => report.passed += 1,
            Verdict::Invalid { .. } => report.rejected += 1,
            Verdict::TimedOut => report.timed_out += 1,
            Verdict::Failed(_) => report.errors += 1,
            Verdict::Cancelled => continue,
        }
        report.checked += 1;
    }
    Ok(report)
}

/// Run one check in its own task so a panicking checker yields
/// [`Verdict::Failed`] instead of a missing verdict. Aborted with the caller.
async fn check_isolated(
    checker: Arc<dyn Checker>,
    path: PathBuf,
    cancel: CancellationToken,
) -> Verdict {
    let mut task = JoinSet::new();
    task.spawn(async move { checker.check(&path, &cancel).await });
    match task.join_next().await {
        Some(Ok(verdict)) => verdict,
        Some(Err(e)) => Verdict::Failed(format!("checker task failed: {}", e)),
        None => Verdict::Failed("checker task vanished".to_string()),
    }
}

/// Delete a staged copy unless it was found valid.
fn apply_verdict(path: &Path, verdict: &Verdict) {
    let reason = match verdict {
        Verdict::Valid | Verdict::Cancelled => return,
        Verdict::Invalid { status } => match status {
            Some(code) => format!("checker exited with {}", code),
            None => "checker killed by signal".to_string(),
        },
        Verdict::TimedOut => "checker timed out".to_string(),
        Verdict::Failed(e) => e.clone(),
    };

    let err = HarvestError::Validation {
        path: path.display().to_string(),
        reason,
    };
    tracing::debug!(error = %err, "discarding staged candidate");

    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "cannot delete rejected candidate");
        }
    }
}

/// All regular files below `root`, sorted.
pub fn staged_files(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable staging entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}
