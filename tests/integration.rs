use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn dh_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("dh");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let content = root.join("raw/versions/17.0/content");
    fs::create_dir_all(content.join("sales")).unwrap();
    fs::write(
        content.join("index.rst"),
        "# Documentation\n\nWelcome to the user documentation.",
    )
    .unwrap();
    fs::write(
        content.join("sales/quotes.rst"),
        "# Sales\n\n## Quotations\n\nCreate a quotation from the Sales app.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/dh.sqlite"

[sources]
raw_dir = "{root}/raw"
normalized_dir = "{root}/markdown"
versions = ["17.0"]

[state]
cache_path = "{root}/state/.file_cache.json"
progress_path = "{root}/state/processing_progress.json"

[normalizer]
kind = "passthrough"

[retry]
max_attempts = 1
"#,
        root = root.display()
    );

    let config_path = config_dir.join("dh.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_dh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = dh_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run dh binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn root_of(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().to_path_buf()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_dh(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(root_of(&config_path).join("data/dh.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_dh(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_dh(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_dh(&tmp.path().join("nope.toml"), &["status"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_first_update_records_baseline() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);

    let (stdout, stderr, success) = run_dh(&config_path, &["update"]);
    assert!(success, "update failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("baseline recorded"));
    assert!(stdout.contains("added: 0"));
    assert!(stdout.contains("modified: 0"));
    assert!(stdout.contains("removed: 0"));

    let cache = fs::read_to_string(root.join("state/.file_cache.json")).unwrap();
    let cache: serde_json::Value = serde_json::from_str(&cache).unwrap();
    assert_eq!(cache.as_object().unwrap().len(), 2);
}

#[test]
fn test_update_without_changes_is_noop() {
    let (_tmp, config_path) = setup_test_env();

    run_dh(&config_path, &["update"]);
    let (stdout, stderr, success) = run_dh(&config_path, &["update"]);
    assert!(success, "update failed: stdout={}, stderr={}", stdout, stderr);
    assert!(!stdout.contains("baseline"));
    assert!(stdout.contains("added: 0"));
    assert!(stdout.contains("unchanged: 2"));
}

#[test]
fn test_failed_update_leaves_cache_untouched() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);
    let cache_path = root.join("state/.file_cache.json");

    run_dh(&config_path, &["update"]);
    let before = fs::read(&cache_path).unwrap();

    // Embeddings are disabled, so indexing the edit fails.
    fs::write(
        root.join("raw/versions/17.0/content/index.rst"),
        "# Documentation\n\nEdited welcome page.",
    )
    .unwrap();
    let (stdout, _stderr, success) = run_dh(&config_path, &["update"]);
    assert!(!success, "update should fail: stdout={}", stdout);
    assert_eq!(fs::read(&cache_path).unwrap(), before);

    // Still pending on the next attempt.
    let (_, stderr, success) = run_dh(&config_path, &["update"]);
    assert!(!success);
    assert!(stderr.contains("index.rst"));
}

#[test]
fn test_update_removal_needs_no_embeddings() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);

    run_dh(&config_path, &["update"]);
    fs::remove_file(root.join("raw/versions/17.0/content/sales/quotes.rst")).unwrap();

    let (stdout, stderr, success) = run_dh(&config_path, &["update"]);
    assert!(success, "update failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("removed: 1"));

    let cache = fs::read_to_string(root.join("state/.file_cache.json")).unwrap();
    assert!(!cache.contains("quotes.rst"));
    assert!(cache.contains("index.rst"));
}

#[test]
fn test_convert_writes_normalized_tree() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);

    let (stdout, stderr, success) = run_dh(&config_path, &["convert"]);
    assert!(success, "convert failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("converted: 2"));
    assert!(stdout.contains("failed: 0"));

    let quotes =
        fs::read_to_string(root.join("markdown/versions/17.0/content/sales/quotes.md")).unwrap();
    assert!(quotes.starts_with("# Sales"));
}

#[test]
fn test_index_saves_ledger_even_on_failure() {
    let (_tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);

    run_dh(&config_path, &["convert"]);
    let (_, _, success) = run_dh(&config_path, &["index"]);
    assert!(!success, "index should fail with embeddings disabled");
    assert!(root.join("state/processing_progress.json").exists());
}

#[test]
fn test_search_errors_when_embeddings_disabled() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_dh(&config_path, &["search", "quotation", "--version", "17.0"]);
    assert!(!success);
    assert!(stderr.contains("requires embeddings"));
}

#[test]
fn test_status_on_fresh_install() {
    let (_tmp, config_path) = setup_test_env();

    run_dh(&config_path, &["update"]);
    let (stdout, stderr, success) = run_dh(&config_path, &["status"]);
    assert!(success, "status failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("(2 files)"));
    assert!(stdout.contains("Index is empty."));
}
