//! Git-backed [`RepositorySource`].
//!
//! Workflow per source:
//! 1. Derive a deterministic working-copy directory from the URL.
//! 2. If the directory holds a `.git`, shallow-fetch and hard-reset to
//!    `FETCH_HEAD`; otherwise remove any partial leftovers and shallow-clone.
//!
//! Git runs non-interactively (`GIT_TERMINAL_PROMPT=0`) and every
//! invocation is bounded by a timeout; the child is killed on expiry.
//! Each invocation also sets `pack.threads` to the sync parallelism and
//! `core.compression=0` through `-c`, like the proxy.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::Config;
use crate::error::{HarvestError, Result};
use crate::fsutil::remove_dir_if_exists;
use crate::traits::{RepositorySource, SyncAction};

pub struct GitRepository {
    url: String,
    dir: PathBuf,
    depth: u32,
    proxy: Option<String>,
    pack_threads: usize,
    timeout: Duration,
}

impl GitRepository {
    pub fn new(url: &str, clone_root: &Path, depth: u32) -> Self {
        Self {
            url: url.to_string(),
            dir: clone_root.join(working_copy_name(url)),
            depth,
            proxy: None,
            pack_threads: 1,
            timeout: Duration::from_secs(600),
        }
    }

    pub fn from_config(url: &str, config: &Config) -> Self {
        let mut repo = Self::new(url, &config.paths.clone_dir, config.sync.git_depth);
        repo.proxy = config.proxy.active().map(str::to_string);
        repo.pack_threads = config.sync.git_parallel.max(1);
        repo.timeout = Duration::from_secs(config.sync.timeout_secs);
        repo
    }

    fn sync_error(&self, reason: impl Into<String>) -> HarvestError {
        HarvestError::Sync {
            url: self.url.clone(),
            reason: reason.into(),
        }
    }

    /// Per-invocation `-c` overrides; the user's git config is left alone.
    fn config_args(&self) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            format!("pack.threads={}", self.pack_threads),
            "-c".to_string(),
            "core.compression=0".to_string(),
        ];
        if let Some(proxy) = &self.proxy {
            args.push("-c".to_string());
            args.push(format!("http.proxy={}", proxy));
        }
        args
    }

    async fn git(&self, args: &[&str], cwd: Option<&Path>) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.args(self.config_args());
        if let Some(dir) = cwd {
            cmd.arg("-C").arg(dir);
        }
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| self.sync_error(format!("failed to execute git: {}", e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| self.sync_error(e.to_string()))?,
            Err(_) => {
                return Err(self.sync_error(format!(
                    "git {} timed out after {}s",
                    args.first().copied().unwrap_or(""),
                    self.timeout.as_secs()
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.sync_error(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or(""),
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn clone_fresh(&self) -> Result<()> {
        // A failed clone can leave a directory without `.git` behind.
        remove_dir_if_exists(&self.dir).map_err(|e| self.sync_error(e.to_string()))?;
        if let Some(parent) = self.dir.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.sync_error(e.to_string()))?;
        }

        let depth = self.depth.to_string();
        let dest = self.dir.to_string_lossy().to_string();
        self.git(
            &[
                "clone",
                "--depth",
                &depth,
                "--single-branch",
                &self.url,
                &dest,
            ],
            None,
        )
        .await
    }

    async fn update(&self) -> Result<()> {
        let depth = self.depth.to_string();
        self.git(&["fetch", "--depth", &depth, "origin"], Some(&self.dir))
            .await?;
        self.git(&["reset", "--hard", "FETCH_HEAD"], Some(&self.dir))
            .await
    }
}

#[async_trait]
impl RepositorySource for GitRepository {
    fn url(&self) -> &str {
        &self.url
    }

    fn working_copy(&self) -> &Path {
        &self.dir
    }

    async fn sync(&self) -> Result<SyncAction> {
        if is_git_repo(&self.dir) {
            self.update().await?;
            Ok(SyncAction::Updated)
        } else {
            self.clone_fresh().await?;
            Ok(SyncAction::Cloned)
        }
    }
}

/// Returns `true` if the directory contains a `.git` entry.
pub fn is_git_repo(dir: &Path) -> bool {
    dir.join(".git").exists()
}

/// Deterministic working-copy directory name for a source URL.
///
/// `https://github.com/Acme/Nuclei-Templates.git` →
/// `nuclei-templates-<8 hex chars of sha256(url)>`. The hash keeps two
/// owners' same-named repositories apart.
pub fn working_copy_name(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(trimmed)
        .trim_end_matches(".git");

    let mut name: String = last
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    name = name.trim_matches('.').to_string();
    if name.is_empty() {
        name = "repo".to_string();
    }

    format!("{}-{}", name, short_hash(url.trim()))
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..8].to_string()
}
