//! Run orchestration.
//!
//! A run walks a fixed sequence of stages, each one completing before the
//! next begins:
//!
//! ```text
//! Idle → Discovering → Syncing → Categorizing → Validating → Migrating → Indexed
//! ```
//!
//! Discovery and sync (stage 1) can be switched off to re-process an
//! already-synced tree. Categorizing starts by seeding the dedup index from
//! the corpus as it was before the run.
//!
//! Per-item failures are absorbed into the stage reports. Only
//! configuration problems, core-directory failures, and interrupts end a run
//! early, and an interrupted run always removes the staging directory before
//! returning.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::categorize::{build_globset, categorize, CategorizeOptions, CategorizeReport};
use crate::config::Config;
use crate::connector_git::GitRepository;
use crate::dedup::DedupIndex;
use crate::discovery::GitHubDiscovery;
use crate::error::{HarvestError, Result};
use crate::fsutil::remove_dir_if_exists;
use crate::index::{count_corpus_files, write_index};
use crate::migrate::{migrate_staging, MigrationReport};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::registry::SourceRegistry;
use crate::sync::{sync_all, SyncOptions, SyncReport};
use crate::traits::{Checker, RepositorySource, SourceDiscovery, Verdict};
use crate::validate::{validate_staging, ProcessChecker, ValidateOptions, ValidationReport};

/// Position of a run in the stage sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Discovering,
    Syncing,
    Categorizing,
    Validating,
    Migrating,
    Indexed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Discovering => "discover",
            Stage::Syncing => "sync",
            Stage::Categorizing => "categorize",
            Stage::Validating => "validate",
            Stage::Migrating => "migrate",
            Stage::Indexed => "index",
        };
        f.write_str(name)
    }
}

/// Builds the [`RepositorySource`] for one registry URL.
pub type SourceFactory = Box<dyn Fn(&str) -> Arc<dyn RepositorySource> + Send + Sync>;

/// What a completed run did, stage by stage.
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    /// Registry entries added by discovery; `None` when discovery was
    /// skipped or failed.
    pub discovered: Option<usize>,
    pub sync: Option<SyncReport>,
    /// Distinct fingerprints already in the corpus at the start of the run.
    pub seeded: usize,
    pub categorize: CategorizeReport,
    pub validation: ValidationReport,
    pub migration: MigrationReport,
    pub index_entries: usize,
    pub corpus_files: usize,
}

pub struct Pipeline {
    config: Config,
    discovery: Arc<dyn SourceDiscovery>,
    checker: Arc<dyn Checker>,
    source_factory: SourceFactory,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
    stage: Mutex<Stage>,
}

impl Pipeline {
    /// A pipeline wired to GitHub discovery, git working copies, and the
    /// configured checker binary.
    pub fn new(config: Config) -> Result<Self> {
        let discovery = Arc::new(GitHubDiscovery::from_config(&config)?);
        let checker = Arc::new(ProcessChecker::from_config(&config.checker));
        let factory_config = config.clone();
        let source_factory: SourceFactory = Box::new(move |url| {
            Arc::new(GitRepository::from_config(url, &factory_config)) as Arc<dyn RepositorySource>
        });

        Ok(Self {
            config,
            discovery,
            checker,
            source_factory,
            reporter: Arc::new(NoProgress),
            cancel: CancellationToken::new(),
            stage: Mutex::new(Stage::Idle),
        })
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn SourceDiscovery>) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_checker(mut self, checker: Arc<dyn Checker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_source_factory(mut self, factory: SourceFactory) -> Self {
        self.source_factory = factory;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token observed by every stage; cancelling it interrupts the run.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stage(&self) -> Stage {
        self.stage.lock().map(|s| *s).unwrap_or(Stage::Idle)
    }

    fn enter(&self, stage: Stage) {
        if let Ok(mut current) = self.stage.lock() {
            *current = stage;
        }
        tracing::info!(%stage, "stage started");
        self.reporter.report(ProgressEvent::StageStarted { stage });
    }

    fn finish(&self, stage: Stage, summary: String) {
        tracing::info!(%stage, %summary, "stage finished");
        self.reporter
            .report(ProgressEvent::StageFinished { stage, summary });
    }

    fn skip(&self, stage: Stage) {
        tracing::info!(%stage, "stage skipped");
        self.reporter.report(ProgressEvent::StageSkipped { stage });
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(HarvestError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Query for new sources and merge them into the registry.
    /// Returns how many URLs were new.
    pub async fn discover_sources(&self) -> Result<usize> {
        let urls = tokio::select! {
            urls = self.discovery.discover() => urls?,
            _ = self.cancel.cancelled() => return Err(HarvestError::Interrupted),
        };

        let mut registry = SourceRegistry::load(&self.config.paths.registry)?;
        let added = registry.merge(&urls);
        registry.save()?;
        tracing::info!(added, total = registry.len(), "registry updated");
        Ok(added)
    }

    /// Run the checker on a single file.
    pub async fn check_file(&self, path: &std::path::Path) -> Verdict {
        self.checker.check(path, &self.cancel).await
    }

    /// Execute one full run. See the module docs for the stage sequence.
    pub async fn run(&self, skip_sync: bool) -> Result<RunReport> {
        let result = self.run_stages(skip_sync).await;
        if matches!(result, Err(HarvestError::Interrupted)) {
            self.discard_staging();
        }
        result
    }

    /// Like [`Pipeline::run`], but interrupted when `shutdown` resolves.
    ///
    /// In-flight work is drained (checker processes are killed) before the
    /// staging directory is removed and [`HarvestError::Interrupted`] is
    /// returned.
    pub async fn run_until<F>(&self, skip_sync: bool, shutdown: F) -> Result<RunReport>
    where
        F: Future<Output = ()>,
    {
        self.run_until_forced(skip_sync, shutdown, std::future::pending())
            .await
    }

    /// Like [`Pipeline::run_until`], but `force` resolving during the drain
    /// abandons in-flight work (git children are killed on drop) instead of
    /// waiting for it. `force` is first polled after `shutdown` resolves.
    pub async fn run_until_forced<F, G>(
        &self,
        skip_sync: bool,
        shutdown: F,
        force: G,
    ) -> Result<RunReport>
    where
        F: Future<Output = ()>,
        G: Future<Output = ()>,
    {
        let mut run = Box::pin(self.run(skip_sync));

        tokio::select! {
            result = &mut run => return result,
            _ = shutdown => {}
        }

        tracing::warn!(stage = %self.stage(), "interrupt received, stopping");
        self.cancel.cancel();

        tokio::select! {
            _ = &mut run => {}
            _ = force => {
                tracing::warn!(stage = %self.stage(), "second interrupt, abandoning in-flight work");
            }
        }
        drop(run);

        self.discard_staging();
        Err(HarvestError::Interrupted)
    }

    fn discard_staging(&self) {
        let staging = &self.config.paths.staging_dir;
        match remove_dir_if_exists(staging) {
            Ok(()) => tracing::info!(staging = %staging.display(), "staging discarded"),
            Err(e) => tracing::error!(
                staging = %staging.display(),
                error = %e,
                "cannot remove staging directory"
            ),
        }
    }

    async fn run_stages(&self, skip_sync: bool) -> Result<RunReport> {
        let paths = &self.config.paths;
        let mut report = RunReport::default();

        if self.config.sync.enable_stage1 && !skip_sync {
            self.enter(Stage::Discovering);
            match self.discover_sources().await {
                Ok(added) => {
                    report.discovered = Some(added);
                    self.finish(Stage::Discovering, format!("{} new sources", added));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "discovery failed, continuing with known sources");
                    self.finish(Stage::Discovering, "failed, registry unchanged".to_string());
                }
            }
            self.ensure_not_cancelled()?;

            self.enter(Stage::Syncing);
            std::fs::create_dir_all(&paths.clone_dir)
                .map_err(|e| HarvestError::core_directory(&paths.clone_dir, e))?;
            let registry = SourceRegistry::load(&paths.registry)?;
            let sources: Vec<Arc<dyn RepositorySource>> =
                registry.urls().map(|url| (self.source_factory)(url)).collect();
            tracing::info!(sources = sources.len(), "syncing sources");

            let sync_report = sync_all(
                sources,
                &SyncOptions::from(&self.config.sync),
                self.reporter.as_ref(),
                &self.cancel,
            )
            .await;
            self.ensure_not_cancelled()?;
            self.finish(Stage::Syncing, sync_report.summary());
            report.sync = Some(sync_report);
        } else {
            self.skip(Stage::Discovering);
            self.skip(Stage::Syncing);
        }

        self.enter(Stage::Categorizing);
        // Residue from a crashed run must not leak into this one.
        remove_dir_if_exists(&paths.staging_dir)
            .and_then(|_| std::fs::create_dir_all(&paths.staging_dir))
            .map_err(|e| HarvestError::core_directory(&paths.staging_dir, e))?;
        std::fs::create_dir_all(&paths.corpus_dir)
            .map_err(|e| HarvestError::core_directory(&paths.corpus_dir, e))?;

        let categorize_config = &self.config.categorize;
        let index =
            DedupIndex::seed(&paths.corpus_dir, categorize_config.concurrency, &self.cancel).await?;
        report.seeded = index.len();
        tracing::info!(fingerprints = report.seeded, "dedup index seeded from corpus");

        let options = CategorizeOptions::from_config(categorize_config, self.config.migrate.collisions);
        report.categorize = categorize(
            &paths.clone_dir,
            &paths.staging_dir,
            index,
            &options,
            self.reporter.as_ref(),
            &self.cancel,
        )
        .await?;
        self.finish(Stage::Categorizing, report.categorize.summary());

        self.enter(Stage::Validating);
        report.validation = validate_staging(
            &paths.staging_dir,
            Arc::clone(&self.checker),
            &ValidateOptions::from_config(&self.config.checker, categorize_config.progress_every),
            self.reporter.as_ref(),
            &self.cancel,
        )
        .await?;
        self.finish(Stage::Validating, report.validation.summary());

        self.enter(Stage::Migrating);
        report.migration = migrate_staging(
            &paths.staging_dir,
            &paths.corpus_dir,
            self.config.migrate.collisions,
            self.config.migrate.concurrency,
            self.reporter.as_ref(),
            &self.cancel,
        )
        .await?;
        self.finish(Stage::Migrating, report.migration.summary());
        self.ensure_not_cancelled()?;

        let include = build_globset(&categorize_config.include_globs)?;
        report.index_entries = write_index(&paths.corpus_dir, &paths.index, &include)?;
        if let Err(e) = remove_dir_if_exists(&paths.staging_dir) {
            tracing::warn!(staging = %paths.staging_dir.display(), error = %e, "cannot remove staging directory");
        }
        report.corpus_files = count_corpus_files(&paths.corpus_dir, &include);

        self.enter(Stage::Indexed);
        self.finish(Stage::Indexed, format!("{} entries", report.index_entries));
        Ok(report)
    }
}
