//! Attempt transcripts written for inspection after a run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::Turn;

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptMeta {
    pub task_id: String,
    /// `accepted` or `exhausted`.
    pub stop: String,
    pub iterations: u32,
    pub max_iterations: u32,
    pub executions: u32,
    pub dropped_turns: usize,
    pub duration_ms: u64,
    pub started_at: String,
    pub code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TranscriptPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub transcript_path: PathBuf,
}

impl TranscriptPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            meta_path: dir.join("meta.json"),
            transcript_path: dir.join("transcript.json"),
        }
    }
}

pub fn write_transcript(dir: &Path, meta: &TranscriptMeta, turns: &[Turn]) -> Result<TranscriptPaths> {
    let paths = TranscriptPaths::new(dir);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create transcript dir {}", paths.dir.display()))?;

    write_json(&paths.meta_path, meta)?;
    write_json(&paths.transcript_path, &turns)?;
    Ok(paths)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_meta_and_turns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("attempt");
        let meta = TranscriptMeta {
            task_id: "add".to_string(),
            stop: "accepted".to_string(),
            iterations: 2,
            max_iterations: 8,
            executions: 2,
            dropped_turns: 0,
            duration_ms: 12,
            started_at: "2026-01-01T00:00:00Z".to_string(),
            code: Some("def add(a, b):\n    return a + b".to_string()),
        };
        let turns = vec![Turn::system("sys"), Turn::assistant("Final Answer: ...")];

        let paths = write_transcript(&dir, &meta, &turns).expect("write");

        let stored: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.transcript_path).expect("read"))
                .expect("json");
        assert_eq!(stored[1]["role"], "assistant");
        let meta: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.meta_path).expect("read"))
                .expect("json");
        assert_eq!(meta["stop"], "accepted");
        assert_eq!(meta["iterations"], 2);
    }
}
