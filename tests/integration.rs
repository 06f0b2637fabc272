use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docent_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docent");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    // Create config
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Create content fixtures
    let posts_dir = root.join("content/posts");
    fs::create_dir_all(&posts_dir).unwrap();
    fs::write(
        posts_dir.join("first-post.md"),
        "---\ntitle: Getting Started with Rust\ndate: 2023-01-10\nsummary: First steps with the borrow checker.\n---\n\nLearning ownership took a while, but the borrow checker grew on me.\n",
    )
    .unwrap();
    fs::write(
        posts_dir.join("latest-post.md"),
        "---\ntitle: Shipping the Chat Backend\ndate: 2024-05-20\n---\n\nThe chat backend streams answers over the indexed site content.\n",
    )
    .unwrap();

    let projects_dir = root.join("content/projects");
    fs::create_dir_all(&projects_dir).unwrap();
    fs::write(
        projects_dir.join("docent.md"),
        "---\ntitle: Docent\ndate: 2024-03-01\ntechnologies:\n  - Rust\n  - Axum\n---\n\nA retrieval-augmented chat service answering questions about this site.\n",
    )
    .unwrap();

    fs::write(
        root.join("content/resume.md"),
        "# Resume\n\nSoftware engineer in Berlin. Contact: jane.doe@example.com\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[content]
posts_dir = "{root}/content/posts"
projects_dir = "{root}/content/projects"
resume_path = "{root}/content/resume.md"

[chunking]
chunk_size = 800
overlap = 100

[index]
path = "{root}/data/index.json"

[server]
bind = "127.0.0.1:8787"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docent.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

/// Provider and store credentials are scrubbed from the child environment
/// so the tests behave the same on a developer machine as in CI.
fn run_docent(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docent_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .env_remove("UPSTASH_REDIS_REST_URL")
        .env_remove("UPSTASH_REDIS_REST_TOKEN")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docent binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_index_dry_run_reports_counts() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docent(&config_path, &["index", "--dry-run"]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("index build"));
    assert!(stdout.contains("posts: 2 chunks"));
    assert!(stdout.contains("projects: 1 chunks"));
    assert!(stdout.contains("resume: 1 chunks"));

    // Dry run writes nothing
    assert!(!tmp.path().join("data/index.json").exists());
}

#[test]
fn test_index_without_key_writes_empty_index() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docent(&config_path, &["index"]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("no OPENAI_API_KEY set, writing empty index"));
    assert!(stdout.contains("ok"));

    let index_json = fs::read_to_string(tmp.path().join("data/index.json")).unwrap();
    assert_eq!(index_json.trim(), "[]");
}

#[test]
fn test_index_rerun_replaces_index() {
    let (tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_docent(&config_path, &["index"]);
    assert!(success1, "First index failed");

    let (_, _, success2) = run_docent(&config_path, &["index"]);
    assert!(success2, "Second index failed");

    // No temp file left behind from the atomic swap
    let names: Vec<String> = fs::read_dir(tmp.path().join("data"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["index.json".to_string()]);
}

#[test]
fn test_stats_reports_empty_index() {
    let (_tmp, config_path) = setup_test_env();

    run_docent(&config_path, &["index"]);
    let (stdout, stderr, success) = run_docent(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Docent Index Stats"));
    assert!(stdout.contains("Records:     0"));
}

#[test]
fn test_search_on_empty_index() {
    let (_tmp, config_path) = setup_test_env();

    run_docent(&config_path, &["index"]);
    let (stdout, stderr, success) = run_docent(&config_path, &["search", "rust"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("No results (index is empty)."));
}

#[test]
fn test_search_before_any_index() {
    let (_tmp, config_path) = setup_test_env();

    // The index file does not exist yet; search treats that as empty.
    let (stdout, _, success) = run_docent(&config_path, &["search", "rust"]);
    assert!(success);
    assert!(stdout.contains("No results (index is empty)."));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_docent(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
