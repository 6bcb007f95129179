use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn codex_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("codex");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/codex.sqlite"

[cache]
dir = "{root}/data/cache"

[snapshots]
dir = "{root}/data/snapshots"

[fetcher]
api_key_env = "CODEX_TEST_KEY_NEVER_SET"
rate_per_minute = 10

[source]
rules_url = "https://example.test/rules/"
faction_url_template = "https://example.test/factions/{{faction}}/"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("codex.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_codex(config_path: &Path, args: &[&str]) -> (String, String, Option<i32>) {
    let binary = codex_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("CODEX_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run codex binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code())
}

fn write_snapshot(config_path: &Path, name: &str, taken_at: &str, stratagems: &[&str]) {
    let dir = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("data/snapshots");
    fs::create_dir_all(&dir).unwrap();
    let json = serde_json::json!({
        "name": name,
        "taken_at": taken_at,
        "factions": [{
            "slug": "necrons",
            "name": "Necrons",
            "detachments": [{
                "slug": "awakened-dynasty",
                "name": "Awakened Dynasty",
                "stratagems": stratagems,
                "enhancements": []
            }],
            "faction_stratagems": [],
            "units": ["Immortals"]
        }]
    });
    fs::write(dir.join(format!("{}.json", name)), json.to_string()).unwrap();
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, code) = run_codex(&config_path, &["init"]);
    assert_eq!(code, Some(0), "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_codex(&config_path, &["init"]);
    assert_eq!(first, Some(0), "First init failed");

    let (_, _, second) = run_codex(&config_path, &["init"]);
    assert_eq!(second, Some(0), "Second init failed (not idempotent)");
}

#[test]
fn test_stats_on_empty_store() {
    let (_tmp, config_path) = setup_test_env();
    run_codex(&config_path, &["init"]);

    let (stdout, stderr, code) = run_codex(&config_path, &["stats"]);
    assert_eq!(code, Some(0), "stats failed: {}", stderr);
    assert!(stdout.contains("factions:"));
    assert!(stdout.contains("Entries:     0"));
}

#[test]
fn test_snapshot_diff_between_saved_files() {
    let (_tmp, config_path) = setup_test_env();
    write_snapshot(&config_path, "before", "2026-01-01T00:00:00Z", &["A", "B"]);
    write_snapshot(
        &config_path,
        "after",
        "2026-02-01T00:00:00Z",
        &["A", "B", "C", "D", "E", "F", "G", "H", "I"],
    );

    let (stdout, stderr, code) = run_codex(&config_path, &["snapshot", "diff", "before", "after"]);
    assert_eq!(code, Some(0), "diff failed: {}", stderr);
    assert!(stdout.contains("~ necrons/awakened-dynasty: stratagems 2 → 9 (+7)"));
    assert!(stdout.contains("C, D, E, F, G (+2 more)"));

    let (stdout, _, _) = run_codex(&config_path, &["snapshot", "diff", "before", "before"]);
    assert!(stdout.contains("No drift detected."));

    let (stdout, _, code) = run_codex(&config_path, &["snapshot", "list"]);
    assert_eq!(code, Some(0));
    let before = stdout.find("before").unwrap();
    let after = stdout.find("after").unwrap();
    assert!(before < after, "list not ordered by time: {}", stdout);
}

#[test]
fn test_snapshot_check_exits_nonzero_on_drift() {
    let (_tmp, config_path) = setup_test_env();
    run_codex(&config_path, &["init"]);
    write_snapshot(&config_path, "baseline", "2026-01-01T00:00:00Z", &["A"]);

    // The live store is empty, so the faction has disappeared
    let (stdout, _, code) = run_codex(&config_path, &["snapshot", "check"]);
    assert_eq!(code, Some(2));
    assert!(stdout.contains("- necrons"));
}

#[test]
fn test_snapshot_save_refuses_overwrite() {
    let (_tmp, config_path) = setup_test_env();
    run_codex(&config_path, &["init"]);

    let (stdout, stderr, code) = run_codex(&config_path, &["snapshot", "save", "empty"]);
    assert_eq!(code, Some(0), "save failed: {}", stderr);
    assert!(stdout.contains("snapshot empty saved"));

    let (_, stderr, code) = run_codex(&config_path, &["snapshot", "save", "empty"]);
    assert_eq!(code, Some(1));
    assert!(stderr.contains("already exists"));

    // An empty store matches its own snapshot
    let (stdout, _, code) = run_codex(&config_path, &["snapshot", "check", "empty"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("No drift detected."));
}

#[test]
fn test_cache_commands() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, code) = run_codex(&config_path, &["cache", "stats"]);
    assert_eq!(code, Some(0), "cache stats failed: {}", stderr);
    assert!(stdout.contains("entries: 0"));

    let (stdout, _, code) = run_codex(
        &config_path,
        &["cache", "invalidate", "https://example.test/rules/"],
    );
    assert_eq!(code, Some(0));
    assert!(stdout.contains("Not cached"));
}

#[test]
fn test_fetch_without_api_key_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, code) = run_codex(&config_path, &["fetch", "https://example.test/rules/"]);
    assert_eq!(code, Some(1));
    assert!(stderr.contains("CODEX_TEST_KEY_NEVER_SET"));
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(
        &config_path,
        content.replace("rate_per_minute = 10", "rate_per_minute = 0"),
    )
    .unwrap();

    let (_, stderr, code) = run_codex(&config_path, &["init"]);
    assert_eq!(code, Some(1));
    assert!(stderr.contains("rate_per_minute"));
}

#[test]
fn test_missing_config_reports_path() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, code) = run_codex(&missing, &["stats"]);
    assert_eq!(code, Some(1));
    assert!(stderr.contains("nope.toml"));
}
