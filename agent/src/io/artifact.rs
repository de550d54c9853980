//! Persistence of the accepted parser module.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::info;

/// Write `source` to `path` atomically: a sibling temp file is renamed over the target,
/// so readers never observe a partially written parser.
pub fn persist_parser(path: &Path, source: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("parser path {} has no parent", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;

    let mut staged = tempfile::Builder::new()
        .prefix(".parser-")
        .suffix(".py.tmp")
        .tempfile_in(parent)
        .with_context(|| format!("stage parser in {}", parent.display()))?;
    staged
        .write_all(source.as_bytes())
        .context("write staged parser")?;
    staged.as_file().sync_all().context("sync staged parser")?;
    staged
        .persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("persist parser {}", path.display()))?;

    info!(path = %path.display(), bytes = source.len(), "parser persisted");
    Ok(())
}

/// Read a previously persisted parser, `None` when absent.
pub fn read_parser(path: &Path) -> Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    let source = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(Some(source))
}
