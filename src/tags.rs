//! Tag extraction from rule-file metadata.
//!
//! Rule files are YAML documents with an `info` block. Tags live at
//! `info.tags` and come in two shapes in the wild:
//!
//! ```yaml
//! info:
//!   tags: cve,cve2024,rce
//! ```
//!
//! ```yaml
//! info:
//!   tags: [cve, rce]
//! ```
//!
//! Tags become directory names, so each one is normalized to lowercase and
//! must be a single safe path component.

use serde_yaml::Value;
use std::collections::BTreeSet;

/// Parse the declared tag set of a rule file.
///
/// An empty set is a valid result (the file declares no usable tags).
/// Returns an error string only when the document itself is unreadable.
pub fn parse_tags(content: &str) -> Result<BTreeSet<String>, String> {
    let doc: Value = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
    if !doc.is_mapping() {
        return Err("document is not a mapping".to_string());
    }

    let raw = match doc.get("info").and_then(|info| info.get("tags")) {
        Some(tags) => tags,
        None => return Ok(BTreeSet::new()),
    };

    let mut tags = BTreeSet::new();
    match raw {
        Value::String(s) => {
            tags.extend(s.split(',').filter_map(normalize_tag));
        }
        Value::Sequence(items) => {
            for item in items {
                if let Some(s) = item.as_str() {
                    tags.extend(s.split(',').filter_map(normalize_tag));
                }
            }
        }
        _ => {}
    }
    Ok(tags)
}

/// Trim and lowercase a tag; `None` if it cannot be used as a directory name.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let tag = raw.trim().to_lowercase();
    if tag.is_empty() || tag == "." || tag == ".." {
        return None;
    }
    if tag.contains(['/', '\\', '\0']) {
        return None;
    }
    Some(tag)
}
