use crate::config::Config;
use crate::connector_git::{is_git_repo, working_copy_name};
use crate::error::Result;
use crate::registry::SourceRegistry;

/// One registry entry and the state of its working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub url: String,
    pub working_copy: String,
    pub synced: bool,
}

pub fn source_statuses(config: &Config) -> Result<Vec<SourceStatus>> {
    let registry = SourceRegistry::load(&config.paths.registry)?;
    Ok(registry
        .urls()
        .map(|url| {
            let name = working_copy_name(url);
            let synced = is_git_repo(&config.paths.clone_dir.join(&name));
            SourceStatus {
                url: url.to_string(),
                working_copy: name,
                synced,
            }
        })
        .collect())
}

pub fn list_sources(config: &Config) -> Result<()> {
    let statuses = source_statuses(config)?;

    println!("{:<8} {:<40} URL", "STATUS", "WORKING COPY");
    for s in &statuses {
        let status = if s.synced { "OK" } else { "MISSING" };
        println!("{:<8} {:<40} {}", status, s.working_copy, s.url);
    }
    if statuses.is_empty() {
        println!("(no sources registered in {})", config.paths.registry.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reports_synced_and_missing_copies() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted(dir.path());
        fs::write(
            &config.paths.registry,
            "https://github.com/a/one.git\nhttps://github.com/b/two.git\n",
        )
        .unwrap();
        let synced = config
            .paths
            .clone_dir
            .join(working_copy_name("https://github.com/a/one.git"));
        fs::create_dir_all(synced.join(".git")).unwrap();

        let statuses = source_statuses(&config).unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].synced);
        assert!(!statuses[1].synced);
    }
}
