use anyhow::Result;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run the CLI binary against a config inside `temp_dir`.
fn run_cli(temp_dir: &TempDir, args: &[&str]) -> Result<Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_scriptorium"))
        .current_dir(temp_dir.path())
        .arg("--config")
        .arg(temp_dir.path().join("scriptorium.toml"))
        .arg("--root")
        .arg(temp_dir.path().join("corpus"))
        .args(args)
        .env("SCRIPTORIUM_DATA_PATH", temp_dir.path().join("data"))
        .env_remove("EMBED_MODEL")
        .env_remove("EMBED_DIM")
        .output()?;
    Ok(output)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_init_creates_config_and_database() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = run_cli(&temp_dir, &["init"])?;
    assert!(output.status.success(), "init failed: {output:?}");

    assert!(temp_dir.path().join("scriptorium.toml").exists());
    assert!(temp_dir.path().join("data/scriptorium.db").exists());
    assert!(temp_dir.path().join("corpus").is_dir());

    let config = std::fs::read_to_string(temp_dir.path().join("scriptorium.toml"))?;
    assert!(config.contains("[chunking]"));
    assert!(config.contains("size = 900"));
    Ok(())
}

#[test]
fn test_scan_reports_changes_without_indexing() -> Result<()> {
    let temp_dir = TempDir::new()?;
    run_cli(&temp_dir, &["init"])?;
    std::fs::write(temp_dir.path().join("corpus/a.txt"), "alpha")?;
    std::fs::write(temp_dir.path().join("corpus/skip.rs"), "fn main() {}")?;

    let output = run_cli(&temp_dir, &["scan"])?;
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Scanned 1 files"));
    assert!(text.contains("added     a.txt"));

    let output = run_cli(&temp_dir, &["scan", "--format", "json"])?;
    let changes: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(changes["added"], serde_json::json!(["a.txt"]));

    // scanning never writes a snapshot
    let output = run_cli(&temp_dir, &["snapshots"])?;
    assert!(stdout(&output).contains("No snapshot captured."));
    let output = run_cli(&temp_dir, &["changes"])?;
    assert!(stdout(&output).contains("No changes recorded."));
    Ok(())
}

#[test]
fn test_status_and_explore() -> Result<()> {
    let temp_dir = TempDir::new()?;
    run_cli(&temp_dir, &["init"])?;
    std::fs::write(temp_dir.path().join("corpus/notes.md"), "line one\nline two")?;

    let output = run_cli(&temp_dir, &["status", "--explore"])?;
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Vector index: ready (sqlite)"));
    assert!(text.contains("Pending: 1 added, 0 modified, 0 deleted"));
    assert!(text.contains("**notes.md**"));
    assert!(text.contains("Not indexed"));

    let output = run_cli(&temp_dir, &["status", "--format", "json"])?;
    let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(value["status"]["indexed_files"], 0);
    assert_eq!(value["status"]["vector_index_ready"], true);
    Ok(())
}

#[test]
fn test_invalid_format_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = run_cli(&temp_dir, &["scan", "--format", "xml"])?;
    assert!(!output.status.success());
    Ok(())
}
