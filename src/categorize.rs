//! Categorizer: routes new, unique candidate files into per-tag staging areas.
//!
//! Two bounded phases, no nested pools:
//!
//! 1. **Inspect** (`concurrency`, default 20): read each candidate, compute
//!    its fingerprint, claim it in the [`DedupIndex`], and parse its tags.
//!    Content already trusted or already claimed is skipped.
//! 2. **Stage** (`copy_concurrency`, default 8): one copy job per
//!    `(file, tag)` pair, written to `staging/<tag>/<file name>`.
//!
//! A file declaring N tags is staged N times; a file declaring none is
//! routed nowhere. Unparsable metadata and per-file I/O failures are logged
//! and counted, never fatal.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::{CategorizeConfig, CollisionPolicy};
use crate::dedup::{Claim, DedupIndex};
use crate::error::{HarvestError, Result};
use crate::fingerprint::Fingerprint;
use crate::fsutil::suffixed_file_name;
use crate::pipeline::Stage;
use crate::pool::run_bounded;
use crate::progress::{report_every, ProgressReporter};
use crate::tags::parse_tags;

/// A rule file found inside a working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub struct CategorizeOptions {
    pub concurrency: usize,
    pub copy_concurrency: usize,
    pub progress_every: usize,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub collisions: CollisionPolicy,
}

impl CategorizeOptions {
    pub fn from_config(config: &CategorizeConfig, collisions: CollisionPolicy) -> Self {
        Self {
            concurrency: config.concurrency,
            copy_concurrency: config.copy_concurrency,
            progress_every: config.progress_every,
            include_globs: config.include_globs.clone(),
            exclude_globs: config.exclude_globs.clone(),
            collisions,
        }
    }
}

impl Default for CategorizeOptions {
    fn default() -> Self {
        Self::from_config(&CategorizeConfig::default(), CollisionPolicy::default())
    }
}

/// Result of inspecting one candidate.
#[derive(Debug)]
pub enum FileOutcome {
    Routed {
        path: PathBuf,
        file_name: String,
        fingerprint: Fingerprint,
        tags: BTreeSet<String>,
    },
    Duplicate {
        path: PathBuf,
        canonical: PathBuf,
    },
    Untagged {
        path: PathBuf,
    },
    Failed(HarvestError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CategorizeReport {
    pub scanned: usize,
    /// Unique files with at least one tag.
    pub routed: usize,
    /// Per-tag copies written to staging.
    pub staged_copies: usize,
    /// Copies that landed under a fingerprint-suffixed name.
    pub renamed: usize,
    pub duplicates: usize,
    pub untagged: usize,
    pub metadata_errors: usize,
    pub io_errors: usize,
}

impl CategorizeReport {
    pub fn summary(&self) -> String {
        format!(
            "{} scanned, {} new ({} staged copies), {} duplicates, {} untagged, {} metadata errors, {} io errors",
            self.scanned,
            self.routed,
            self.staged_copies,
            self.duplicates,
            self.untagged,
            self.metadata_errors,
            self.io_errors
        )
    }

    fn count_error(&mut self, error: &HarvestError) {
        match error {
            HarvestError::Metadata { .. } => self.metadata_errors += 1,
            _ => self.io_errors += 1,
        }
    }
}

struct CopyJob {
    src: PathBuf,
    tag: String,
    file_name: String,
    fingerprint: Fingerprint,
}

/// Walk all working copies and stage every new, tagged candidate.
pub async fn categorize(
    clone_root: &Path,
    staging_root: &Path,
    index: Arc<DedupIndex>,
    options: &CategorizeOptions,
    reporter: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<CategorizeReport> {
    let include = build_globset(&options.include_globs)?;
    let exclude = build_globset(&options.exclude_globs)?;
    let candidates = find_candidates(clone_root, &include, &exclude);

    let mut report = CategorizeReport {
        scanned: candidates.len(),
        ..Default::default()
    };
    tracing::info!(candidates = candidates.len(), "categorizing candidate files");

    let every = options.progress_every;
    let outcomes = run_bounded(
        candidates,
        options.concurrency,
        cancel,
        |completed, total| report_every(reporter, Stage::Categorizing, completed, total, every),
        |candidate| {
            let index = Arc::clone(&index);
            async move {
                tokio::task::spawn_blocking(move || inspect_candidate(candidate, &index))
                    .await
                    .unwrap_or_else(|e| {
                        FileOutcome::Failed(HarvestError::Io {
                            path: String::new(),
                            source: io::Error::other(e),
                        })
                    })
            }
        },
    )
    .await;

    if cancel.is_cancelled() {
        return Err(HarvestError::Interrupted);
    }

    let mut jobs = Vec::new();
    for outcome in outcomes {
        match outcome {
            FileOutcome::Routed {
                path,
                file_name,
                fingerprint,
                tags,
            } => {
                report.routed += 1;
                for tag in tags {
                    jobs.push(CopyJob {
                        src: path.clone(),
                        tag,
                        file_name: file_name.clone(),
                        fingerprint,
                    });
                }
            }
            FileOutcome::Duplicate { path, canonical } => {
                tracing::trace!(
                    path = %path.display(),
                    canonical = %canonical.display(),
                    "duplicate content"
                );
                report.duplicates += 1;
            }
            FileOutcome::Untagged { path } => {
                tracing::debug!(path = %path.display(), "no tags declared, not routed");
                report.untagged += 1;
            }
            FileOutcome::Failed(error) => {
                tracing::warn!(error = %error, "skipping candidate");
                report.count_error(&error);
            }
        }
    }

    let staging_root = Arc::new(staging_root.to_path_buf());
    let policy = options.collisions;
    let copies = run_bounded(
        jobs,
        options.copy_concurrency,
        cancel,
        |_, _| {},
        |job| {
            let staging_root = Arc::clone(&staging_root);
            async move {
                tokio::task::spawn_blocking(move || stage_copy(&job, &staging_root, policy))
                    .await
                    .unwrap_or_else(|e| {
                        Err(HarvestError::Io {
                            path: String::new(),
                            source: io::Error::other(e),
                        })
                    })
            }
        },
    )
    .await;

    if cancel.is_cancelled() {
        return Err(HarvestError::Interrupted);
    }

    for copy in copies {
        match copy {
            Ok(renamed) => {
                report.staged_copies += 1;
                if renamed {
                    report.renamed += 1;
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "cannot stage copy");
                report.io_errors += 1;
            }
        }
    }

    Ok(report)
}

/// Rule files under `clone_root`, skipping `.git` directories. Sorted.
pub fn find_candidates(clone_root: &Path, include: &GlobSet, exclude: &GlobSet) -> Vec<CandidateFile> {
    if !clone_root.exists() {
        return Vec::new();
    }

    let walker = WalkDir::new(clone_root)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");

    let mut candidates = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(clone_root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude.is_match(&rel_str) {
            continue;
        }
        if !include.is_match(&rel_str) {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_string();
        candidates.push(CandidateFile {
            path: path.to_path_buf(),
            file_name,
        });
    }

    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    candidates
}

fn inspect_candidate(candidate: CandidateFile, index: &DedupIndex) -> FileOutcome {
    let CandidateFile { path, file_name } = candidate;

    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => return FileOutcome::Failed(HarvestError::io(&path, e)),
    };

    let fingerprint = Fingerprint::of_bytes(&bytes);
    if let Claim::AlreadyPresent { canonical } = index.try_claim(fingerprint, &path) {
        return FileOutcome::Duplicate { path, canonical };
    }

    let content = match std::str::from_utf8(&bytes) {
        Ok(content) => content,
        Err(e) => {
            return FileOutcome::Failed(HarvestError::Metadata {
                path: path.display().to_string(),
                reason: format!("not UTF-8: {}", e),
            })
        }
    };

    match parse_tags(content) {
        Ok(tags) if tags.is_empty() => FileOutcome::Untagged { path },
        Ok(tags) => FileOutcome::Routed {
            path,
            file_name,
            fingerprint,
            tags,
        },
        Err(reason) => FileOutcome::Failed(HarvestError::Metadata {
            path: path.display().to_string(),
            reason,
        }),
    }
}

/// Copy one candidate into `staging/<tag>/`. Returns whether the copy had
/// to take a fingerprint-suffixed name.
fn stage_copy(job: &CopyJob, staging_root: &Path, policy: CollisionPolicy) -> Result<bool> {
    let dir = staging_root.join(&job.tag);
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let dest = dir.join(&job.file_name);
    if policy == CollisionPolicy::Overwrite {
        std::fs::copy(&job.src, &dest).map_err(|e| HarvestError::io(&dest, e))?;
        return Ok(false);
    }

    // Claim a slot atomically. Every copy job in a run carries distinct
    // content for its tag, so a taken slot always belongs to other content.
    let candidates = [
        job.file_name.clone(),
        suffixed_file_name(&job.file_name, &job.fingerprint.short()),
        suffixed_file_name(&job.file_name, &job.fingerprint.to_hex()),
    ];
    let mut claimed = None;
    for (attempt, name) in candidates.iter().enumerate() {
        let path = dir.join(name);
        match create_new(&path) {
            Ok(file) => {
                claimed = Some((path, file, attempt > 0));
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(HarvestError::io(&path, e)),
        }
    }
    let Some((dest, mut out, renamed)) = claimed else {
        return Err(HarvestError::io(
            &dest,
            io::Error::new(io::ErrorKind::AlreadyExists, "every candidate name is taken"),
        ));
    };

    let copied = File::open(&job.src).and_then(|mut src| io::copy(&mut src, &mut out));
    if let Err(e) = copied {
        drop(out);
        let _ = std::fs::remove_file(&dest);
        return Err(HarvestError::io(&job.src, e));
    }
    Ok(renamed)
}

fn create_new(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| HarvestError::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| HarvestError::Config(format!("invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::fs;

    fn rule(id: &str, tags: &str) -> String {
        format!("id: {}\ninfo:\n  name: {}\n  tags: {}\n", id, id, tags)
    }

    fn options() -> CategorizeOptions {
        CategorizeOptions {
            concurrency: 4,
            copy_concurrency: 2,
            ..Default::default()
        }
    }

    async fn run(clone_root: &Path, staging: &Path, index: Arc<DedupIndex>) -> CategorizeReport {
        categorize(
            clone_root,
            staging,
            index,
            &options(),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    #[test]
    fn finds_yaml_outside_git_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("repo-a/.git/objects")).unwrap();
        fs::create_dir_all(root.join("repo-a/http/cves")).unwrap();
        fs::write(root.join("repo-a/.git/objects/x.yaml"), "junk").unwrap();
        fs::write(root.join("repo-a/http/cves/a.yaml"), "id: a").unwrap();
        fs::write(root.join("repo-a/http/cves/b.yml"), "id: b").unwrap();
        fs::write(root.join("repo-a/README.md"), "# readme").unwrap();

        let include = build_globset(&["**/*.yaml".into(), "**/*.yml".into()]).unwrap();
        let exclude = build_globset(&[]).unwrap();
        let found = find_candidates(root, &include, &exclude);

        let names: Vec<&str> = found.iter().map(|c| c.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.yaml", "b.yml"]);
    }

    #[tokio::test]
    async fn fans_out_one_copy_per_tag() {
        let dir = tempfile::tempdir().unwrap();
        let clones = dir.path().join("clones");
        let staging = dir.path().join(".tmp");
        fs::create_dir_all(clones.join("repo")).unwrap();
        fs::write(clones.join("repo/x.yaml"), rule("x", "rce,CVE")).unwrap();

        let report = run(&clones, &staging, Arc::new(DedupIndex::new())).await;

        assert_eq!(report.routed, 1);
        assert_eq!(report.staged_copies, 2);
        assert!(staging.join("rce/x.yaml").exists());
        assert!(staging.join("cve/x.yaml").exists());
    }

    #[tokio::test]
    async fn identical_content_is_staged_once() {
        let dir = tempfile::tempdir().unwrap();
        let clones = dir.path().join("clones");
        let staging = dir.path().join(".tmp");
        for repo in ["repo-a", "repo-b"] {
            fs::create_dir_all(clones.join(repo)).unwrap();
            fs::write(clones.join(repo).join("x.yaml"), rule("x", "rce")).unwrap();
        }

        let report = run(&clones, &staging, Arc::new(DedupIndex::new())).await;

        assert_eq!(report.scanned, 2);
        assert_eq!(report.routed, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(fs::read_dir(staging.join("rce")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn trusted_content_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let clones = dir.path().join("clones");
        let staging = dir.path().join(".tmp");
        fs::create_dir_all(clones.join("repo")).unwrap();
        let content = rule("x", "rce");
        fs::write(clones.join("repo/x.yaml"), &content).unwrap();

        let index = DedupIndex::new();
        index.try_claim(
            Fingerprint::of_bytes(content.as_bytes()),
            Path::new("poc/rce/x.yaml"),
        );

        let report = run(&clones, &staging, Arc::new(index)).await;
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.staged_copies, 0);
        assert!(!staging.join("rce").exists());
    }

    #[tokio::test]
    async fn untagged_and_broken_files_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let clones = dir.path().join("clones");
        let staging = dir.path().join(".tmp");
        fs::create_dir_all(clones.join("repo")).unwrap();
        fs::write(clones.join("repo/plain.yaml"), "id: plain\ninfo:\n  name: p\n").unwrap();
        fs::write(clones.join("repo/broken.yaml"), "info: [unclosed").unwrap();
        fs::write(clones.join("repo/ok.yaml"), rule("ok", "xss")).unwrap();

        let report = run(&clones, &staging, Arc::new(DedupIndex::new())).await;

        assert_eq!(report.scanned, 3);
        assert_eq!(report.untagged, 1);
        assert_eq!(report.metadata_errors, 1);
        assert_eq!(report.staged_copies, 1);
        assert!(staging.join("xss/ok.yaml").exists());
    }

    #[tokio::test]
    async fn same_name_different_content_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let clones = dir.path().join("clones");
        let staging = dir.path().join(".tmp");
        fs::create_dir_all(clones.join("repo-a")).unwrap();
        fs::create_dir_all(clones.join("repo-b")).unwrap();
        let a = rule("x-a", "rce");
        let b = rule("x-b", "rce");
        fs::write(clones.join("repo-a/x.yaml"), &a).unwrap();
        fs::write(clones.join("repo-b/x.yaml"), &b).unwrap();

        let report = run(&clones, &staging, Arc::new(DedupIndex::new())).await;

        assert_eq!(report.staged_copies, 2);
        assert_eq!(report.renamed, 1);
        let mut staged: Vec<String> = fs::read_dir(staging.join("rce"))
            .unwrap()
            .map(|e| fs::read_to_string(e.unwrap().path()).unwrap())
            .collect();
        staged.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(staged, expected);
    }

    #[test]
    fn taken_suffixed_name_falls_back_to_full_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join(".tmp");
        let src = dir.path().join("x.yaml");
        let content = rule("x-c", "rce");
        fs::write(&src, &content).unwrap();
        let job = CopyJob {
            src,
            tag: "rce".to_string(),
            file_name: "x.yaml".to_string(),
            fingerprint: Fingerprint::of_bytes(content.as_bytes()),
        };

        let short = staging.join("rce").join(format!("x-{}.yaml", job.fingerprint.short()));
        fs::create_dir_all(staging.join("rce")).unwrap();
        fs::write(staging.join("rce/x.yaml"), rule("x-a", "rce")).unwrap();
        fs::write(&short, rule("x-b", "rce")).unwrap();

        assert!(stage_copy(&job, &staging, CollisionPolicy::Suffix).unwrap());
        let full = staging.join("rce").join(format!("x-{}.yaml", job.fingerprint.to_hex()));
        assert_eq!(fs::read_to_string(&full).unwrap(), content);
        assert_eq!(fs::read_to_string(&short).unwrap(), rule("x-b", "rce"));

        // With every name taken the copy is reported, not silently dropped.
        let err = stage_copy(&job, &staging, CollisionPolicy::Suffix).unwrap_err();
        assert!(matches!(err, HarvestError::Io { .. }));
    }

    #[tokio::test]
    async fn interrupted_categorize_reports_interrupt() {
        let dir = tempfile::tempdir().unwrap();
        let clones = dir.path().join("clones");
        fs::create_dir_all(clones.join("repo")).unwrap();
        fs::write(clones.join("repo/x.yaml"), rule("x", "rce")).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = categorize(
            &clones,
            &dir.path().join(".tmp"),
            Arc::new(DedupIndex::new()),
            &options(),
            &NoProgress,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HarvestError::Interrupted));
    }
}
