//! Corpus statistics.
//!
//! A quick summary of what the corpus holds: file counts per tag, total
//! size on disk, and how many sources the registry tracks. Used by
//! `harvest stats` to confirm runs are landing files where expected.

use std::collections::BTreeMap;
use std::path::Path;

use walkdir::WalkDir;

use crate::categorize::build_globset;
use crate::config::Config;
use crate::error::Result;
use crate::registry::SourceRegistry;

/// Per-tag totals.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagStats {
    pub files: usize,
    pub bytes: u64,
}

/// File count and size for every tag directory directly under `corpus_root`.
pub fn corpus_tag_stats(corpus_root: &Path, config: &Config) -> Result<BTreeMap<String, TagStats>> {
    let include = build_globset(&config.categorize.include_globs)?;
    let mut tags: BTreeMap<String, TagStats> = BTreeMap::new();
    if !corpus_root.exists() {
        return Ok(tags);
    }

    for entry in WalkDir::new(corpus_root)
        .min_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let Ok(relative) = entry.path().strip_prefix(corpus_root) else {
            continue;
        };
        if !include.is_match(relative) {
            continue;
        }
        let Some(tag) = relative.components().next() else {
            continue;
        };
        let stats = tags
            .entry(tag.as_os_str().to_string_lossy().to_string())
            .or_default();
        stats.files += 1;
        stats.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
    }
    Ok(tags)
}

/// Run the stats command: walk the corpus and print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let tags = corpus_tag_stats(&config.paths.corpus_dir, config)?;
    let registry = SourceRegistry::load(&config.paths.registry)?;

    let total_files: usize = tags.values().map(|t| t.files).sum();
    let total_bytes: u64 = tags.values().map(|t| t.bytes).sum();

    println!("Rule Harvest — Corpus Stats");
    println!("===========================");
    println!();
    println!("  Corpus:      {}", config.paths.corpus_dir.display());
    println!("  Size:        {}", format_bytes(total_bytes));
    println!("  Sources:     {}", registry.len());
    println!("  Tags:        {}", tags.len());
    println!("  Files:       {}", total_files);

    if !tags.is_empty() {
        let mut by_count: Vec<(&String, &TagStats)> = tags.iter().collect();
        by_count.sort_by(|a, b| b.1.files.cmp(&a.1.files).then(a.0.cmp(b.0)));

        println!();
        println!("  By tag:");
        println!("  {:<32} {:>8} {:>10}", "TAG", "FILES", "SIZE");
        println!("  {}", "-".repeat(52));
        for (tag, stats) in by_count {
            println!(
                "  {:<32} {:>8} {:>10}",
                tag,
                stats.files,
                format_bytes(stats.bytes)
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn counts_per_tag() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted(dir.path());
        let corpus = &config.paths.corpus_dir;
        fs::create_dir_all(corpus.join("rce")).unwrap();
        fs::create_dir_all(corpus.join("xss")).unwrap();
        fs::write(corpus.join("rce/a.yaml"), "12345").unwrap();
        fs::write(corpus.join("rce/b.yml"), "1").unwrap();
        fs::write(corpus.join("xss/c.yaml"), "").unwrap();
        fs::write(corpus.join("xss/readme.md"), "ignored").unwrap();
        fs::write(corpus.join("stray.yaml"), "top level").unwrap();

        let tags = corpus_tag_stats(corpus, &config).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags["rce"], TagStats { files: 2, bytes: 6 });
        assert_eq!(tags["xss"].files, 1);
    }

    #[test]
    fn formats_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
