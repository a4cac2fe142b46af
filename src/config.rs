//! TOML configuration.
//!
//! Every field has an explicit default, so an empty file is a valid
//! configuration. The legacy camelCase option names (`githubToken`,
//! `gitParallel`, `gitDepth`, `enableStage1`) are accepted as aliases.
//! Values are validated once, in [`load_config`].

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HarvestError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub sync: SyncConfig,
    pub proxy: ProxyConfig,
    pub categorize: CategorizeConfig,
    pub checker: CheckerConfig,
    pub migrate: MigrateConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    /// Root holding one working copy per source.
    pub clone_dir: PathBuf,
    /// Durable, validated, tag-organized output.
    pub corpus_dir: PathBuf,
    /// Ephemeral per-tag staging areas.
    pub staging_dir: PathBuf,
    /// Newline-delimited source registry.
    pub registry: PathBuf,
    /// Flat corpus manifest.
    pub index: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            clone_dir: PathBuf::from("clone-templates"),
            corpus_dir: PathBuf::from("poc"),
            staging_dir: PathBuf::from(".tmp"),
            registry: PathBuf::from("repo.csv"),
            index: PathBuf::from("poc.txt"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(alias = "enableStage1")]
    pub enable_stage1: bool,
    #[serde(alias = "gitParallel")]
    pub git_parallel: usize,
    #[serde(alias = "gitDepth")]
    pub git_depth: u32,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub timeout_secs: u64,
    #[serde(alias = "githubToken")]
    pub github_token: Option<String>,
    pub discovery_query: String,
    pub discovery_window_days: i64,
    pub discovery_pages: u32,
    pub per_page: u32,
    pub api_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enable_stage1: true,
            git_parallel: 8,
            git_depth: 1,
            max_retries: 3,
            backoff_base_ms: 1000,
            timeout_secs: 600,
            github_token: None,
            discovery_query: "nuclei in:name,description,topics".to_string(),
            discovery_window_days: 30,
            discovery_pages: 1,
            per_page: 100,
            api_url: "https://api.github.com".to_string(),
        }
    }
}

impl SyncConfig {
    /// The configured token, falling back to `GITHUB_TOKEN`.
    pub fn resolved_token(&self) -> Option<String> {
        self.github_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ProxyConfig {
    pub enable: bool,
    pub address: Option<String>,
}

impl ProxyConfig {
    /// Proxy address when the proxy is enabled.
    pub fn active(&self) -> Option<&str> {
        if self.enable {
            self.address.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CategorizeConfig {
    pub concurrency: usize,
    pub copy_concurrency: usize,
    pub progress_every: usize,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
}

impl Default for CategorizeConfig {
    fn default() -> Self {
        Self {
            concurrency: 20,
            copy_concurrency: 8,
            progress_every: 50,
            include_globs: vec!["**/*.yaml".to_string(), "**/*.yml".to_string()],
            exclude_globs: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CheckerConfig {
    pub binary: PathBuf,
    /// Arguments placed before the candidate path.
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("nuclei"),
            args: vec!["-validate".to_string(), "-t".to_string()],
            timeout_secs: 120,
            batch_size: 200,
            concurrency: 20,
        }
    }
}

/// What to do when a `tag/name` slot is already taken by different content.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Keep both: the newcomer gets a short fingerprint suffix.
    #[default]
    Suffix,
    /// Last writer replaces the existing file.
    Overwrite,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MigrateConfig {
    pub concurrency: usize,
    pub collisions: CollisionPolicy,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            collisions: CollisionPolicy::Suffix,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Defaults with every path anchored under `base`.
    pub fn rooted(base: &Path) -> Self {
        let mut config = Config::default();
        config.resolve_paths(base);
        config
    }

    /// Anchor relative paths at `base` (normally the config file's directory).
    pub fn resolve_paths(&mut self, base: &Path) {
        let paths = &mut self.paths;
        for path in [
            &mut paths.clone_dir,
            &mut paths.corpus_dir,
            &mut paths.staging_dir,
            &mut paths.registry,
            &mut paths.index,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("sync.git_parallel", self.sync.git_parallel as u64),
            ("sync.git_depth", self.sync.git_depth as u64),
            ("sync.timeout_secs", self.sync.timeout_secs),
            ("sync.per_page", self.sync.per_page as u64),
            ("sync.discovery_window_days", self.sync.discovery_window_days.max(0) as u64),
            ("categorize.concurrency", self.categorize.concurrency as u64),
            ("categorize.copy_concurrency", self.categorize.copy_concurrency as u64),
            ("categorize.progress_every", self.categorize.progress_every as u64),
            ("checker.timeout_secs", self.checker.timeout_secs),
            ("checker.batch_size", self.checker.batch_size as u64),
            ("checker.concurrency", self.checker.concurrency as u64),
            ("migrate.concurrency", self.migrate.concurrency as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(HarvestError::Config(format!("{field} must be >= 1")));
            }
        }

        if self.sync.per_page > 100 {
            return Err(HarvestError::Config(
                "sync.per_page must be <= 100".to_string(),
            ));
        }
        if self.proxy.enable && self.proxy.address.as_deref().unwrap_or("").trim().is_empty() {
            return Err(HarvestError::Config(
                "proxy.address must be set when proxy.enable = true".to_string(),
            ));
        }
        if self.checker.binary.as_os_str().is_empty() {
            return Err(HarvestError::Config(
                "checker.binary must not be empty".to_string(),
            ));
        }
        if self.categorize.include_globs.is_empty() {
            return Err(HarvestError::Config(
                "categorize.include_globs must not be empty".to_string(),
            ));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(HarvestError::Config(format!(
                    "unknown logging.format '{other}', expected pretty, json or compact"
                )))
            }
        }

        Ok(())
    }
}

/// Read, parse, anchor and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        HarvestError::Config(format!("failed to read config file {}: {e}", path.display()))
    })?;

    let mut config: Config = toml::from_str(&content).map_err(|e| {
        HarvestError::Config(format!("failed to parse config file {}: {e}", path.display()))
    })?;

    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    config.resolve_paths(base);
    config.validate()?;

    Ok(config)
}
