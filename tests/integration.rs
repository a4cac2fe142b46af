use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn harvest_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("harvest");
    path
}

fn rule(id: &str, tags: &str) -> String {
    format!("id: {id}\ninfo:\n  name: {id}\n  tags: {tags}\n")
}

/// Temp workspace with stage 1 disabled, one pre-synced working copy, and a
/// shell-script checker that rejects files containing `INVALID`.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let copy = root.join("clone-templates/local-rules");
    fs::create_dir_all(copy.join("http")).unwrap();
    fs::write(copy.join("http/rce.yaml"), rule("rce-1", "rce")).unwrap();
    fs::write(copy.join("http/both.yaml"), rule("both", "xss,sqli")).unwrap();
    fs::write(
        copy.join("http/bad.yaml"),
        rule("bad", "rce") + "# INVALID\n",
    )
    .unwrap();

    let checker = root.join("check.sh");
    fs::write(
        &checker,
        "#!/bin/sh\nif grep -q INVALID \"$1\"; then exit 1; fi\nexit 0\n",
    )
    .unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&checker, fs::Permissions::from_mode(0o755)).unwrap();
    }

    let config_content = format!(
        r#"[paths]
clone_dir = "{root}/clone-templates"
corpus_dir = "{root}/poc"
staging_dir = "{root}/.tmp"
registry = "{root}/repo.csv"
index = "{root}/poc.txt"

[sync]
enableStage1 = false
gitParallel = 2

[checker]
binary = "{root}/check.sh"
args = []
timeout_secs = 30

[logging]
level = "warn"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("harvest.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_harvest(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = harvest_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run harvest binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_help_lists_commands() {
    let output = Command::new(harvest_binary()).arg("--help").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    for command in ["run", "discover", "sources", "index", "stats", "check"] {
        assert!(stdout.contains(command), "missing {} in help:\n{}", command, stdout);
    }
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_harvest(&tmp.path().join("absent.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("config"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_fails() {
    let (tmp, _config_path) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(&bad, "[sync]\ngit_parallel = 0\n").unwrap();

    let (_, stderr, success) = run_harvest(&bad, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("git_parallel"), "stderr: {}", stderr);
}

#[cfg(unix)]
#[test]
fn test_run_builds_corpus_and_index() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    let (stdout, stderr, success) = run_harvest(&config_path, &["run"]);
    assert!(success, "run failed: {}", stderr);
    assert!(stdout.contains("corpus files: 3"), "stdout: {}", stdout);

    assert!(root.join("poc/rce/rce.yaml").exists());
    assert!(root.join("poc/xss/both.yaml").exists());
    assert!(root.join("poc/sqli/both.yaml").exists());
    assert!(!root.join("poc/rce/bad.yaml").exists());
    assert!(!root.join(".tmp").exists());

    let index = fs::read_to_string(root.join("poc.txt")).unwrap();
    assert_eq!(index, "rce/rce.yaml\nsqli/both.yaml\nxss/both.yaml\n");

    // A second run changes nothing.
    let (stdout, _, success) = run_harvest(&config_path, &["run"]);
    assert!(success);
    assert!(stdout.contains("corpus files: 3"), "stdout: {}", stdout);
    assert_eq!(fs::read_to_string(root.join("poc.txt")).unwrap(), index);
}

#[test]
fn test_index_rebuilds_from_corpus() {
    let (tmp, config_path) = setup_test_env();
    let corpus = tmp.path().join("poc/lfi");
    fs::create_dir_all(&corpus).unwrap();
    fs::write(corpus.join("a.yaml"), rule("a", "lfi")).unwrap();
    fs::write(corpus.join("notes.txt"), "not a rule").unwrap();

    let (stdout, _, success) = run_harvest(&config_path, &["index"]);
    assert!(success);
    assert!(stdout.contains("1 entries"), "stdout: {}", stdout);
    assert_eq!(
        fs::read_to_string(tmp.path().join("poc.txt")).unwrap(),
        "lfi/a.yaml\n"
    );
}

#[test]
fn test_stats_shows_tags() {
    let (tmp, config_path) = setup_test_env();
    let corpus = tmp.path().join("poc/ssrf");
    fs::create_dir_all(&corpus).unwrap();
    fs::write(corpus.join("a.yaml"), rule("a", "ssrf")).unwrap();

    let (stdout, _, success) = run_harvest(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Corpus Stats"));
    assert!(stdout.contains("ssrf"));
}

#[test]
fn test_sources_lists_registry() {
    let (tmp, config_path) = setup_test_env();
    fs::write(
        tmp.path().join("repo.csv"),
        "https://github.com/acme/templates.git\n",
    )
    .unwrap();

    let (stdout, _, success) = run_harvest(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("https://github.com/acme/templates.git"));
    assert!(stdout.contains("MISSING"));
}

#[cfg(unix)]
#[test]
fn test_check_single_file() {
    let (tmp, config_path) = setup_test_env();
    let copy = tmp.path().join("clone-templates/local-rules/http");

    let (stdout, _, success) =
        run_harvest(&config_path, &["check", copy.join("rce.yaml").to_str().unwrap()]);
    assert!(success);
    assert!(stdout.starts_with("valid"), "stdout: {}", stdout);

    let (stdout, _, success) =
        run_harvest(&config_path, &["check", copy.join("bad.yaml").to_str().unwrap()]);
    assert!(!success);
    assert!(stdout.starts_with("invalid"), "stdout: {}", stdout);
}
