use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kbchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kbchat");
    path
}

/// Temp workspace with a config whose gateway points at a closed port.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("alpha.md"), "# Alpha\n\nNotes about Rust.").unwrap();
    fs::write(files_dir.join("empty.txt"), "").unwrap();
    fs::write(files_dir.join("big.txt"), "x".repeat(4096)).unwrap();

    let config_content = format!(
        r#"[openai]
timeout_secs = 5

[client]
gateway_url = "http://127.0.0.1:9"

[storage]
dir = "{}/data"

[upload]
max_files = 3
max_size_bytes = 1024
"#,
        root.display()
    );

    let config_path = config_dir.join("kbchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kbchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kbchat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kbchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn registry_file(tmp: &TempDir) -> PathBuf {
    tmp.path().join("data").join("openaiVectorizedFiles.json")
}

#[test]
fn test_list_empty_registry() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kbchat(&config_path, &["list"]);
    assert!(success, "list failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("No knowledge bases registered."));
}

#[test]
fn test_list_reads_persisted_entries() {
    let (tmp, config_path) = setup_test_env();
    fs::create_dir_all(tmp.path().join("data")).unwrap();
    fs::write(
        registry_file(&tmp),
        r#"[{"name":"alpha.md","fileId":"file-1","vectorStoreId":"vs_1"}]"#,
    )
    .unwrap();

    let (stdout, _, success) = run_kbchat(&config_path, &["list"]);
    assert!(success);
    assert!(stdout.contains("alpha.md"));
    assert!(stdout.contains("file-1"));
    assert!(stdout.contains("vs_1"));
    assert!(stdout.contains("1 file(s)"));
}

#[test]
fn test_list_discards_corrupt_registry() {
    let (tmp, config_path) = setup_test_env();
    fs::create_dir_all(tmp.path().join("data")).unwrap();
    fs::write(registry_file(&tmp), "{not json").unwrap();

    let (stdout, _, success) = run_kbchat(&config_path, &["list"]);
    assert!(success);
    assert!(stdout.contains("No knowledge bases registered."));
    assert!(
        !registry_file(&tmp).exists(),
        "corrupt registry should be removed"
    );
}

#[test]
fn test_upload_missing_file_fails() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("files").join("nope.md");

    let (_, stderr, success) = run_kbchat(&config_path, &["upload", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to read"), "stderr: {}", stderr);
}

#[test]
fn test_upload_rejects_oversize_and_empty_files() {
    let (tmp, config_path) = setup_test_env();
    let files = tmp.path().join("files");

    let (stdout, stderr, success) = run_kbchat(
        &config_path,
        &[
            "upload",
            files.join("big.txt").to_str().unwrap(),
            files.join("empty.txt").to_str().unwrap(),
        ],
    );
    assert!(!success, "nothing was stageable: stdout={}", stdout);
    assert!(stderr.contains("File \"big.txt\" exceeds the maximum size of 1KB."));
    assert!(stderr.contains("File \"empty.txt\" is empty."));
    assert!(stderr.contains("No files to upload."));
}

#[test]
fn test_upload_without_gateway_marks_task_failed() {
    let (tmp, config_path) = setup_test_env();
    let alpha = tmp.path().join("files").join("alpha.md");

    let (stdout, stderr, success) = run_kbchat(&config_path, &["upload", alpha.to_str().unwrap()]);
    assert!(success, "upload failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("queued"));
    assert!(stdout.contains("failed"));
    assert!(stdout.contains("Upload completed with 1 failure (0 of 1 uploaded)."));

    let (stdout, _, _) = run_kbchat(&config_path, &["list"]);
    assert!(stdout.contains("No knowledge bases registered."));
}

#[test]
fn test_clear_empty_registry() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_kbchat(&config_path, &["clear"]);
    assert!(success);
    assert!(stdout.contains("No files to clear from Knowledge Base."));
}

#[test]
fn test_clear_without_gateway_keeps_entries() {
    let (tmp, config_path) = setup_test_env();
    fs::create_dir_all(tmp.path().join("data")).unwrap();
    fs::write(
        registry_file(&tmp),
        r#"[{"name":"alpha.md","fileId":"file-1","vectorStoreId":"vs_1"}]"#,
    )
    .unwrap();

    let (stdout, stderr, success) = run_kbchat(&config_path, &["clear"]);
    assert!(success, "clear failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("1 file(s) could not be cleared: alpha.md"));

    let (stdout, _, _) = run_kbchat(&config_path, &["list"]);
    assert!(stdout.contains("file-1"), "failed entry must survive: {}", stdout);
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config").join("bad.toml");
    fs::write(&bad, "[openai]\ntemperature = 3.5\n").unwrap();

    let (_, stderr, success) = run_kbchat(&bad, &["list"]);
    assert!(!success);
    assert!(stderr.contains("temperature"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let absent = tmp.path().join("absent.toml");

    let output = Command::new(kbchat_binary())
        .current_dir(tmp.path())
        .arg("--config")
        .arg(&absent)
        .arg("list")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No knowledge bases registered."));
}

#[test]
fn test_ask_direct_without_api_key_fails() {
    let (_tmp, config_path) = setup_test_env();

    let output = Command::new(kbchat_binary())
        .arg("--config")
        .arg(&config_path)
        .args(["--direct", "ask", "hello"])
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("OPENAI_API_KEY"));
}
