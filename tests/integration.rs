use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn aic_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("aic");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    fs::write(root.join("snapshot.json"), snapshot_json()).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/aic.sqlite"

[chunking]
chunk_size = 500
overlap_words = 5

[retrieval]
min_score = 0.3
candidate_cap = 10

[embedding]
provider = "disabled"

[server]
bind = "127.0.0.1:7433"
"#,
        root.display()
    );

    let config_path = config_dir.join("aic.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn snapshot_json() -> &'static str {
    r#"{
        "incidents": [
            {"incident_id": 1, "title": "Chatbot defamation",
             "description": "A chatbot invented quotes attributed to a public figure.",
             "reports": [10]},
            {"incident_id": 2, "title": "Facial recognition arrest",
             "description": "A wrongful arrest followed a false facial recognition match.",
             "reports": [11]}
        ],
        "reports": [
            {"report_number": 10, "title": "Chatbot report",
             "text": "Full article text.", "plain_text": "Full article text.",
             "authors": ["Jordan Reyes"], "tags": ["nlp"]},
            {"report_number": 11, "title": "Arrest report",
             "text": "Another article.", "plain_text": "Another article."}
        ],
        "taxa": [
            {"namespace": "CSETv1", "description": "CSET taxonomy",
             "field_list": [{"short_name": "Harm Distribution Basis"},
                            {"short_name": "Severity"}]}
        ],
        "classifications": [
            {"id": "c1", "namespace": "CSETv1", "publish": true,
             "attributes": [{"short_name": "Severity", "value_json": "\"Moderate\""}],
             "incidents": [1]}
        ]
    }"#
}

fn run_aic(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = aic_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run aic binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_aic(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_aic(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_aic(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_snapshot() {
    let (tmp, config_path) = setup_test_env();

    run_aic(&config_path, &["init"]);
    let snapshot = tmp.path().join("snapshot.json");
    let (stdout, stderr, success) =
        run_aic(&config_path, &["import", snapshot.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("2 incidents"));
    assert!(stdout.contains("2 reports"));
    assert!(stdout.contains("1 taxonomies"));
    assert!(stdout.contains("1 classifications"));
}

#[test]
fn test_import_twice_keeps_counts_stable() {
    let (tmp, config_path) = setup_test_env();

    run_aic(&config_path, &["init"]);
    let snapshot = tmp.path().join("snapshot.json");
    let snapshot = snapshot.to_str().unwrap();
    run_aic(&config_path, &["import", snapshot]);
    let (stdout, _, success) = run_aic(&config_path, &["import", snapshot]);
    assert!(success);
    assert!(stdout.contains("2 incidents"));

    let (stats, _, _) = run_aic(&config_path, &["stats"]);
    assert!(stats.contains("Incidents:        2"));
    assert!(stats.contains("Reports:          2"));
}

#[test]
fn test_import_missing_file_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_aic(&config_path, &["init"]);
    let (_, stderr, success) = run_aic(&config_path, &["import", "/nonexistent/snapshot.json"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read snapshot"));
}

#[test]
fn test_stats_on_empty_database() {
    let (_tmp, config_path) = setup_test_env();

    run_aic(&config_path, &["init"]);
    let (stdout, stderr, success) = run_aic(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Incidents:        0"));
    assert!(stdout.contains("Embedded chunks:  0"));
}

#[test]
fn test_index_requires_enabled_provider() {
    let (tmp, config_path) = setup_test_env();

    run_aic(&config_path, &["init"]);
    let snapshot = tmp.path().join("snapshot.json");
    run_aic(&config_path, &["import", snapshot.to_str().unwrap()]);

    // The disabled provider fails every embed call; items are counted as
    // failed, not silently skipped.
    let (stdout, _, success) = run_aic(&config_path, &["index"]);
    assert!(success, "index run should not abort: {}", stdout);
    assert!(stdout.contains("failed 5"), "stdout: {}", stdout);
}

#[test]
fn test_search_empty_index_reports_no_results() {
    let (_tmp, config_path) = setup_test_env();

    run_aic(&config_path, &["init"]);
    let (stdout, stderr, success) = run_aic(&config_path, &["search", "anything"]);
    // The disabled provider cannot embed the query.
    assert!(
        !success && stderr.contains("disabled") || stdout.contains("No results."),
        "stdout={}, stderr={}",
        stdout,
        stderr
    );
}

#[test]
fn test_classify_unknown_taxonomy_fails() {
    let (tmp, config_path) = setup_test_env();

    run_aic(&config_path, &["init"]);
    let snapshot = tmp.path().join("snapshot.json");
    run_aic(&config_path, &["import", snapshot.to_str().unwrap()]);

    let (_, stderr, success) = run_aic(
        &config_path,
        &["classify", "some text", "-t", "NOPE", "--dry-run"],
    );
    assert!(!success);
    assert!(stderr.contains("'NOPE' not found"), "stderr: {}", stderr);
}

#[test]
fn test_unknown_command_fails() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_aic(&config_path, &["frobnicate"]);
    assert!(!success);
    assert!(!stderr.is_empty());
}

#[test]
fn test_missing_config_fails() {
    let binary = aic_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg("/nonexistent/aic.toml")
        .arg("init")
        .output()
        .unwrap();
    assert!(!output.status.success());
}
