//! Corpus index: a plain-text listing of every rule file in the corpus.
//!
//! One relative path per line, `/`-separated, sorted, newline-terminated.
//! The file is rewritten from scratch (atomically) on every run, so two runs
//! over an unchanged corpus produce byte-identical indexes.

use globset::GlobSet;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{HarvestError, Result};
use crate::fsutil::write_atomic;

/// Sorted relative paths of files under `corpus_root` matching `include`.
pub fn collect_corpus_entries(corpus_root: &Path, include: &GlobSet) -> Vec<String> {
    if !corpus_root.exists() {
        return Vec::new();
    }

    let mut entries: Vec<String> = WalkDir::new(corpus_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let relative = e.path().strip_prefix(corpus_root).ok()?;
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            let joined = parts.join("/");
            include.is_match(&joined).then_some(joined)
        })
        .collect();
    entries.sort();
    entries
}

/// Rewrite the index at `index_path`. Returns the number of entries.
pub fn write_index(corpus_root: &Path, index_path: &Path, include: &GlobSet) -> Result<usize> {
    let entries = collect_corpus_entries(corpus_root, include);

    let mut body = String::new();
    for entry in &entries {
        body.push_str(entry);
        body.push('\n');
    }
    write_atomic(index_path, body.as_bytes()).map_err(|e| HarvestError::io(index_path, e))?;

    tracing::info!(
        entries = entries.len(),
        index = %index_path.display(),
        "corpus index written"
    );
    Ok(entries.len())
}

/// Number of rule files currently in the corpus.
pub fn count_corpus_files(corpus_root: &Path, include: &GlobSet) -> usize {
    collect_corpus_entries(corpus_root, include).len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorize::build_globset;
    use std::fs;

    fn rules() -> GlobSet {
        build_globset(&["**/*.yaml".to_string(), "**/*.yml".to_string()]).unwrap()
    }

    #[test]
    fn lists_only_rule_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("poc");
        fs::create_dir_all(corpus.join("rce")).unwrap();
        fs::create_dir_all(corpus.join("cve")).unwrap();
        fs::write(corpus.join("rce/b.yaml"), "").unwrap();
        fs::write(corpus.join("rce/a.yml"), "").unwrap();
        fs::write(corpus.join("cve/z.yaml"), "").unwrap();
        fs::write(corpus.join("rce/notes.txt"), "").unwrap();

        let entries = collect_corpus_entries(&corpus, &rules());
        assert_eq!(entries, vec!["cve/z.yaml", "rce/a.yml", "rce/b.yaml"]);
    }

    #[test]
    fn index_is_stable_across_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("poc");
        let index = dir.path().join("poc.txt");
        fs::create_dir_all(corpus.join("xss")).unwrap();
        fs::write(corpus.join("xss/a.yaml"), "").unwrap();

        assert_eq!(write_index(&corpus, &index, &rules()).unwrap(), 1);
        let first = fs::read(&index).unwrap();
        write_index(&corpus, &index, &rules()).unwrap();
        assert_eq!(first, fs::read(&index).unwrap());
        assert_eq!(String::from_utf8(first).unwrap(), "xss/a.yaml\n");
    }

    #[test]
    fn empty_corpus_gives_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("poc.txt");
        assert_eq!(write_index(&dir.path().join("absent"), &index, &rules()).unwrap(), 0);
        assert_eq!(fs::read_to_string(&index).unwrap(), "");
    }
}
