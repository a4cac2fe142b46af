//! Source registry: the persisted set of repository URLs.
//!
//! On disk it is a newline-delimited list. It is read as a set and written
//! back as the sorted union of what was there and what discovery found, so
//! entries are never lost and order never matters.
//!
//! ```text
//! # community template sources
//! https://github.com/acme/templates.git
//! https://github.com/other/nuclei-rules.git
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{HarvestError, Result};
use crate::fsutil::write_atomic;

#[derive(Debug, Clone)]
pub struct SourceRegistry {
    path: PathBuf,
    urls: BTreeSet<String>,
}

impl SourceRegistry {
    /// Load the registry; a missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        let urls = match std::fs::read_to_string(path) {
            Ok(content) => parse_registry(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(HarvestError::io(path, e)),
        };
        Ok(Self {
            path: path.to_path_buf(),
            urls,
        })
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.urls.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Union `urls` into the registry. Returns how many were new.
    pub fn merge<I, S>(&mut self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.urls.len();
        for url in urls {
            let url = url.as_ref().trim();
            if !url.is_empty() {
                self.urls.insert(url.to_string());
            }
        }
        self.urls.len() - before
    }

    pub fn save(&self) -> Result<()> {
        let mut out = String::new();
        for url in &self.urls {
            out.push_str(url);
            out.push('\n');
        }
        write_atomic(&self.path, out.as_bytes()).map_err(|e| HarvestError::io(&self.path, e))
    }
}

fn parse_registry(content: &str) -> BTreeSet<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_blanks_comments_and_duplicates() {
        let urls = parse_registry(
            "# header\nhttps://a/x.git\n\n  https://b/y.git  \nhttps://a/x.git\n",
        );
        assert_eq!(urls.len(), 2);
        assert!(urls.contains("https://b/y.git"));
    }

    #[test]
    fn merge_is_set_union() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repo.csv");
        std::fs::write(&path, "https://a/x.git\n").unwrap();

        let mut registry = SourceRegistry::load(&path).unwrap();
        let added = registry.merge(["https://a/x.git", "https://c/z.git", "  "]);
        assert_eq!(added, 1);
        registry.save().unwrap();

        let reloaded = SourceRegistry::load(&path).unwrap();
        let urls: Vec<&str> = reloaded.urls().collect();
        assert_eq!(urls, vec!["https://a/x.git", "https://c/z.git"]);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SourceRegistry::load(&dir.path().join("repo.csv")).unwrap();
        assert!(registry.is_empty());
    }
}
