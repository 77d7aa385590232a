//! Tests of the `finrag` binary for the commands that do not load models.

use anyhow::Result;
use finrag_retriever::storage::sqlite_store::SqliteChildStore;
use finrag_retriever::storage::{ChildChunk, ChildStore};
use finrag_retriever::{ParentId, RagConfig};
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn run_cli(temp_dir: &TempDir, args: &[&str]) -> Result<Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_finrag"))
        .current_dir(temp_dir.path())
        .args(args)
        .env("RUST_LOG", "error")
        .output()?;
    Ok(output)
}

fn data_dir(temp_dir: &TempDir) -> Result<String> {
    let dir = temp_dir.path().join("data_investment");
    std::fs::create_dir_all(&dir)?;
    Ok(dir.to_string_lossy().into_owned())
}

async fn populate_chunks(data_dir: &Path) -> Result<ParentId> {
    let config = RagConfig::for_data_dir(data_dir);
    let store = SqliteChildStore::open(&config.child_store_path()).await?;
    let parent = ParentId::from("00112233445566778899aabbccddeeff".to_string());
    let texts = ["Quarterly VaR rose to 2.1m.", "Limits were not breached."];
    let mut start = 0;
    for (sequence, text) in texts.iter().enumerate() {
        let len = text.chars().count();
        store
            .put(&ChildChunk {
                id: ChildChunk::child_id(&parent, sequence),
                parent_id: parent.clone(),
                sequence,
                relative_path: "risk.txt".to_string(),
                char_start: start,
                char_end: start + len,
                text: text.to_string(),
                prefix: Some("[File: risk.txt] [Context: Risk report]".to_string()),
            })
            .await?;
        start += len + 1;
    }
    Ok(parent)
}

#[test]
fn test_cli_help_lists_commands() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let output = run_cli(&temp_dir, &["--help"])?;
    assert!(
        output.status.success(),
        "help failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout)?;
    for command in ["index", "query", "chunks", "status", "reset"] {
        assert!(stdout.contains(command), "help is missing {command}");
    }

    let output = run_cli(&temp_dir, &["query", "--help"])?;
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("--top-parents"));
    assert!(stdout.contains("--top-chunks"));
    assert!(stdout.contains("--format"));
    Ok(())
}

#[test]
fn test_cli_rejects_bad_arguments() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let data = data_dir(&temp_dir)?;

    let output = run_cli(&temp_dir, &["query"])?;
    assert!(!output.status.success(), "query without text should fail");

    let output = run_cli(&temp_dir, &["status", "--data-dir", &data, "--format", "yaml"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("Invalid format"));
    Ok(())
}

#[test]
fn test_cli_reports_invalid_config_file() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    std::fs::write(
        temp_dir.path().join("finrag.toml"),
        "[chunking]\nchunk_size = 50\nchunk_overlap = 80\n",
    )?;

    let output = run_cli(&temp_dir, &["status"])?;
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("Error:"));
    assert!(stderr.contains("chunk_overlap"));
    Ok(())
}

#[test]
fn test_cli_status_on_fresh_directory() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let data = data_dir(&temp_dir)?;

    let output = run_cli(&temp_dir, &["status", "--data-dir", &data])?;
    assert!(
        output.status.success(),
        "status failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("Parents:         0"));
    assert!(stdout.contains("index not built yet"));

    let output = run_cli(&temp_dir, &["status", "--data-dir", &data, "--format", "json"])?;
    let status: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(status["parents"], 0);
    assert_eq!(status["children"], 0);

    // status must not create index state
    assert!(!Path::new(&data).join(".finrag").join("children.db").exists());
    Ok(())
}

#[tokio::test]
async fn test_cli_lists_chunks() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let data = data_dir(&temp_dir)?;
    let parent = populate_chunks(Path::new(&data)).await?;

    let output = run_cli(&temp_dir, &["chunks", "--data-dir", &data])?;
    assert!(
        output.status.success(),
        "chunks failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("Showing 2 of 2 chunks"));
    assert!(stdout.contains("risk.txt"));

    let output = run_cli(
        &temp_dir,
        &["chunks", "--data-dir", &data, "--limit", "1", "--format", "json"],
    )?;
    let chunks: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let chunks = chunks.as_array().map(Vec::len);
    assert_eq!(chunks, Some(1));

    let output = run_cli(
        &temp_dir,
        &["chunks", "--data-dir", &data, "--parent", parent.as_str(), "--format", "full"],
    )?;
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("[File: risk.txt] [Context: Risk report]\nQuarterly VaR rose to 2.1m."));

    let output = run_cli(&temp_dir, &["chunks", "--data-dir", &data, "--parent", "unknown"])?;
    assert!(String::from_utf8(output.stdout)?.contains("Showing 0 of 0 chunks"));
    Ok(())
}

#[tokio::test]
async fn test_cli_reset_removes_state_only() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let data = data_dir(&temp_dir)?;
    std::fs::write(Path::new(&data).join("risk.txt"), "Quarterly VaR rose to 2.1m.")?;
    populate_chunks(Path::new(&data)).await?;

    let output = run_cli(&temp_dir, &["reset", "--data-dir", &data])?;
    assert!(
        output.status.success(),
        "reset failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8(output.stdout)?.contains("Removed"));
    assert!(!Path::new(&data).join(".finrag").join("children.db").exists());
    assert!(Path::new(&data).join("risk.txt").exists());

    let output = run_cli(&temp_dir, &["chunks", "--data-dir", &data])?;
    assert!(String::from_utf8(output.stdout)?.contains("run `finrag index` first"));
    Ok(())
}
