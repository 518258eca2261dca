//! # IO Utilities
//!
//! File system helpers shared by the phases: JSON artifacts, quality-gate
//! size checks and memory bank enumeration.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

use crate::error::Result;

/// Get the settings directory path (.membank)
///
/// `MEMBANK_HOME` overrides the default of `./.membank`.
pub fn get_settings_dir() -> PathBuf {
    if let Ok(path) = std::env::var("MEMBANK_HOME") {
        return PathBuf::from(path);
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".membank")
}

/// Serialize `value` as pretty JSON, creating parent directories
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content).await?;
    Ok(())
}

pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Size in bytes, or `None` if the path is not a readable file
pub async fn file_size(path: &Path) -> Option<u64> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

/// Delete a leftover artifact from an earlier run
pub async fn remove_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!("Removed stale artifact {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Split `names` into (present and larger than `min_bytes`, missing or undersized)
pub async fn partition_by_size(
    dir: &Path,
    names: &[&str],
    min_bytes: u64,
) -> (Vec<String>, Vec<String>) {
    let mut present = Vec::new();
    let mut missing = Vec::new();
    for name in names {
        match file_size(&dir.join(name)).await {
            Some(size) if size > min_bytes => present.push(name.to_string()),
            _ => missing.push(name.to_string()),
        }
    }
    (present, missing)
}

/// Non-empty markdown files under `dir`, sorted, relative to `dir`
pub fn list_markdown_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "md"))
        .filter(|e| e.metadata().map(|m| m.len() > 0).unwrap_or(false))
        .filter_map(|e| e.path().strip_prefix(dir).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}
