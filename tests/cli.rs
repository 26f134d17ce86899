use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn setup_workspace() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();

    fs::write(
        root.join("NOTES.md"),
        "# Notes\n\nThe release checklist lives in the wiki.\nRemember to bump the version before tagging.\n",
    )
    .unwrap();
    fs::write(
        root.join("TASKS.md"),
        "- [ ] migrate the database\n- [ ] rotate the deploy keys\n",
    )
    .unwrap();
    fs::create_dir_all(root.join("notes")).unwrap();
    fs::write(
        root.join("notes/kubernetes.md"),
        "Cluster upgrade notes.\nDrain nodes one at a time.\nKubernetes control plane first.\n",
    )
    .unwrap();

    fs::write(
        root.join("recall.toml"),
        "[build]\ndim = 64\nmax_chars_per_chunk = 400\noverlap_chars = 40\n",
    )
    .unwrap();

    tmp
}

fn run_recall(root: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_recall"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env("RECALL_LOG", "off")
        .output()
        .expect("failed to run recall binary");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn test_help() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, success) = run_recall(tmp.path(), &["--help"]);
    assert!(success);
    assert!(stdout.contains("build"));
    assert!(stdout.contains("search"));
    assert!(stdout.contains("status"));
}

#[test]
fn test_search_before_build_fails() {
    let tmp = setup_workspace();
    let (_, stderr, success) = run_recall(tmp.path(), &["search", "release"]);
    assert!(!success);
    assert!(stderr.contains("run a build first"), "stderr: {}", stderr);
}

#[test]
fn test_build_then_search() {
    let tmp = setup_workspace();

    let (stdout, stderr, success) = run_recall(tmp.path(), &["build", "--progress", "off"]);
    assert!(success, "build failed: {}", stderr);
    assert!(stdout.contains("items:"));
    assert!(stdout.contains("ok"));
    assert!(tmp.path().join(".recall/index.json").exists());
    assert!(tmp.path().join(".recall/meta.json").exists());

    let (stdout, stderr, success) =
        run_recall(tmp.path(), &["search", "kubernetes cluster upgrade", "--json"]);
    assert!(success, "search failed: {}", stderr);
    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let hits = hits.as_array().unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0]["file"], "notes/kubernetes.md");
    assert_eq!(hits[0]["kind"], "notes");
}

#[test]
fn test_rebuild_reuses_everything() {
    let tmp = setup_workspace();
    let (_, stderr, success) = run_recall(tmp.path(), &["build", "--progress", "off"]);
    assert!(success, "{}", stderr);

    let (stdout, _, success) = run_recall(tmp.path(), &["build", "--progress", "off"]);
    assert!(success);
    assert!(stdout.contains("embedded items: 0"), "stdout: {}", stdout);
    assert!(stdout.contains("reused files: 3"), "stdout: {}", stdout);
}

#[test]
fn test_status_reports_freshness() {
    let tmp = setup_workspace();

    let (stdout, _, success) = run_recall(tmp.path(), &["status", "--json"]);
    assert!(success);
    let status: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(status["upToDate"]["ok"], false);
    assert_eq!(status["upToDate"]["reason"]["reason"], "index_missing");

    run_recall(tmp.path(), &["build", "--progress", "off"]);
    let (stdout, _, success) = run_recall(tmp.path(), &["status", "--json"]);
    assert!(success);
    let status: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(status["upToDate"]["ok"], true);
    assert_eq!(status["meta"]["dim"], 64);

    let (stdout, _, success) = run_recall(tmp.path(), &["status"]);
    assert!(success);
    assert!(stdout.contains("last build: "), "stdout: {}", stdout);
    assert!(stdout.contains(" UTC"), "stdout: {}", stdout);
    assert!(stdout.contains("up to date"), "stdout: {}", stdout);
}

#[test]
fn test_unknown_provider_is_rejected() {
    let tmp = setup_workspace();
    let (_, stderr, success) = run_recall(tmp.path(), &["build", "--provider", "bert"]);
    assert!(!success);
    assert!(stderr.contains("unknown embedding provider"), "stderr: {}", stderr);
}

#[test]
fn test_init_writes_config() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, success) = run_recall(tmp.path(), &["init"]);
    assert!(success);
    assert!(stdout.contains("wrote"));
    let body = fs::read_to_string(tmp.path().join("recall.toml")).unwrap();
    assert!(body.contains("[build]"));
    assert!(tmp.path().join(".recall").is_dir());
}
