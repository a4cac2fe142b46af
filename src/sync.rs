//! Sync scheduler: brings every registered source's working copy up to date.
//!
//! Sources are dispatched in batches of `2P`; within a batch at most `P`
//! syncs run at once, and a batch fully completes before the next starts.
//! Each sync is retried with exponential backoff (base, 2×base, 4×base, …).
//! A source whose retries are exhausted is a soft failure: it is logged,
//! its working copy keeps its last-known-good state, and the run goes on.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::error::HarvestError;
use crate::pipeline::Stage;
use crate::pool::run_batched;
use crate::progress::{report_every, ProgressReporter};
use crate::traits::{RepositorySource, SyncAction};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Max concurrent syncs (`P`).
    pub parallel: usize,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            parallel: config.git_parallel,
            max_retries: config.max_retries,
            backoff_base: config.backoff_base(),
        }
    }
}

/// Per-source result.
#[derive(Debug)]
pub enum SyncOutcome {
    Synced { url: String, action: SyncAction, attempts: u32 },
    Failed { url: String, error: HarvestError, attempts: u32 },
    Cancelled { url: String },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub cloned: usize,
    pub updated: usize,
    pub failed: usize,
    /// `(url, reason)` for every abandoned source.
    pub failures: Vec<(String, String)>,
}

impl SyncReport {
    pub fn summary(&self) -> String {
        format!(
            "{} cloned, {} updated, {} failed",
            self.cloned, self.updated, self.failed
        )
    }
}

/// Sync all `sources`. Never fails as a whole; see [`SyncReport`].
pub async fn sync_all(
    sources: Vec<Arc<dyn RepositorySource>>,
    options: &SyncOptions,
    reporter: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> SyncReport {
    let parallel = options.parallel.max(1);
    let options = Arc::new(options.clone());

    let outcomes = run_batched(
        sources,
        parallel * 2,
        parallel,
        cancel,
        |completed, total| report_every(reporter, Stage::Syncing, completed, total, parallel),
        |source| {
            let options = Arc::clone(&options);
            let cancel = cancel.clone();
            async move { sync_with_retry(source.as_ref(), &options, &cancel).await }
        },
    )
    .await;

    let mut report = SyncReport::default();
    for outcome in outcomes {
        match outcome {
            SyncOutcome::Synced { action, .. } => match action {
                SyncAction::Cloned => report.cloned += 1,
                SyncAction::Updated => report.updated += 1,
            },
            SyncOutcome::Failed { url, error, .. } => {
                report.failed += 1;
                report.failures.push((url, error.to_string()));
            }
            SyncOutcome::Cancelled { .. } => {}
        }
    }
    report.failures.sort();
    report
}

/// One source: first attempt plus up to `max_retries` retries.
pub async fn sync_with_retry(
    source: &dyn RepositorySource,
    options: &SyncOptions,
    cancel: &CancellationToken,
) -> SyncOutcome {
    let url = source.url().to_string();
    let mut last_err = None;

    for attempt in 0..=options.max_retries {
        if attempt > 0 {
            // Exponential backoff: base, 2×base, 4×base, ...
            let delay = options.backoff_base * (1u32 << (attempt - 1).min(16));
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return SyncOutcome::Cancelled { url },
            }
        }
        if cancel.is_cancelled() {
            return SyncOutcome::Cancelled { url };
        }

        match source.sync().await {
            Ok(action) => {
                tracing::debug!(source = %url, ?action, attempt, "source synced");
                return SyncOutcome::Synced {
                    url,
                    action,
                    attempts: attempt + 1,
                };
            }
            Err(e) => {
                tracing::debug!(source = %url, attempt, error = %e, "sync attempt failed");
                last_err = Some(e);
            }
        }
    }

    let error = last_err.unwrap_or_else(|| HarvestError::Sync {
        url: url.clone(),
        reason: "no attempt made".to_string(),
    });
    tracing::warn!(
        source = %url,
        attempts = options.max_retries + 1,
        error = %error,
        "abandoning source for this run"
    );
    SyncOutcome::Failed {
        url,
        error,
        attempts: options.max_retries + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    struct FlakySource {
        url: String,
        dir: PathBuf,
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RepositorySource for FlakySource {
        fn url(&self) -> &str {
            &self.url
        }
        fn working_copy(&self) -> &Path {
            &self.dir
        }
        async fn sync(&self) -> Result<SyncAction> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(HarvestError::Sync {
                    url: self.url.clone(),
                    reason: format!("transient failure {}", call),
                })
            } else {
                Ok(SyncAction::Cloned)
            }
        }
    }

    fn flaky(url: &str, failures: u32) -> Arc<FlakySource> {
        Arc::new(FlakySource {
            url: url.to_string(),
            dir: PathBuf::from("/unused"),
            failures_before_success: failures,
            calls: AtomicU32::new(0),
        })
    }

    fn options(retries: u32) -> SyncOptions {
        SyncOptions {
            parallel: 2,
            max_retries: retries,
            backoff_base: Duration::from_millis(0),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let source = flaky("https://a/x.git", 2);
        let outcome =
            sync_with_retry(source.as_ref(), &options(3), &CancellationToken::new()).await;
        match outcome {
            SyncOutcome::Synced { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn exhausted_retries_are_soft_failure() {
        let source = flaky("https://a/x.git", 100);
        let outcome =
            sync_with_retry(source.as_ref(), &options(3), &CancellationToken::new()).await;
        match outcome {
            SyncOutcome::Failed { attempts, error, .. } => {
                assert_eq!(attempts, 4);
                assert!(!error.is_fatal());
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles() {
        let source = flaky("https://a/x.git", 3);
        let opts = SyncOptions {
            parallel: 1,
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
        };
        let start = tokio::time::Instant::now();
        sync_with_retry(source.as_ref(), &opts, &CancellationToken::new()).await;
        // 1s + 2s + 4s of virtual time.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(7), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(8), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn one_failing_source_does_not_stop_others() {
        let sources: Vec<Arc<dyn RepositorySource>> = vec![
            flaky("https://a/ok1.git", 0),
            flaky("https://a/bad.git", 100),
            flaky("https://a/ok2.git", 1),
        ];
        let report = sync_all(sources, &options(2), &NoProgress, &CancellationToken::new()).await;
        assert_eq!(report.cloned, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].0, "https://a/bad.git");
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_parallel() {
        struct SlowSource {
            url: String,
            dir: PathBuf,
            in_flight: Arc<AtomicUsize>,
            peak: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl RepositorySource for SlowSource {
            fn url(&self) -> &str {
                &self.url
            }
            fn working_copy(&self) -> &Path {
                &self.dir
            }
            async fn sync(&self) -> Result<SyncAction> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(3)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(SyncAction::Updated)
            }
        }

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let sources: Vec<Arc<dyn RepositorySource>> = (0..10)
            .map(|i| {
                Arc::new(SlowSource {
                    url: format!("https://a/{}.git", i),
                    dir: PathBuf::from("/unused"),
                    in_flight: Arc::clone(&in_flight),
                    peak: Arc::clone(&peak),
                }) as Arc<dyn RepositorySource>
            })
            .collect();

        let report = sync_all(sources, &options(0), &NoProgress, &CancellationToken::new()).await;
        assert_eq!(report.updated, 10);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancelled_backoff_returns_cancelled() {
        let source = flaky("https://a/x.git", 100);
        let cancel = CancellationToken::new();
        let opts = SyncOptions {
            parallel: 1,
            max_retries: 3,
            backoff_base: Duration::from_secs(3600),
        };
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let outcome = sync_with_retry(source.as_ref(), &opts, &cancel).await;
        assert!(matches!(outcome, SyncOutcome::Cancelled { .. }));
    }
}
