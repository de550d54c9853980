//! Attempt logging helpers for `<state_dir>/attempts/<bank>/<n>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{AttemptError, ValidationResult};

#[derive(Debug, Clone, Serialize)]
pub struct AttemptMeta {
    pub bank: String,
    pub attempt: u32,
    pub passed: bool,
    pub failure: Option<String>,
    pub execution_error: Option<AttemptError>,
    pub validation: Option<ValidationResult>,
    pub started_at: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub dir: PathBuf,
    pub candidate_path: PathBuf,
    pub meta_path: PathBuf,
    pub diagnostic_path: PathBuf,
    pub executor_log_path: PathBuf,
}

impl AttemptPaths {
    pub fn new(state_dir: &Path, bank: &str, attempt: u32) -> Self {
        let dir = bank_dir(state_dir, bank).join(attempt.to_string());
        Self {
            candidate_path: dir.join("candidate.py"),
            meta_path: dir.join("meta.json"),
            diagnostic_path: dir.join("diagnostic.txt"),
            executor_log_path: dir.join("executor.log"),
            dir,
        }
    }
}

fn bank_dir(state_dir: &Path, bank: &str) -> PathBuf {
    state_dir.join("attempts").join(bank)
}

/// Remove logs left by a previous run for `bank`.
pub fn reset_bank_logs(state_dir: &Path, bank: &str) -> Result<()> {
    let dir = bank_dir(state_dir, bank);
    if dir.exists() {
        fs::remove_dir_all(&dir)
            .with_context(|| format!("clear attempt logs {}", dir.display()))?;
    }
    Ok(())
}

/// Create the attempt directory and write the candidate source.
///
/// Called before execution so the source is on disk even if the executor fails.
pub fn write_candidate(paths: &AttemptPaths, source: &str) -> Result<()> {
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;
    write_text(&paths.candidate_path, source)
}

/// Write metadata and, for failed attempts, the diagnostic text.
pub fn write_outcome(paths: &AttemptPaths, meta: &AttemptMeta, diagnostic: Option<&str>) -> Result<()> {
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;
    write_json(&paths.meta_path, meta)?;
    if let Some(text) = diagnostic {
        write_text(&paths.diagnostic_path, text)?;
    }
    Ok(())
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
