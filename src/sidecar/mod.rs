//! Append-only JSONL sidecar: one record per executed cell per run.
//!
//! Records land in `<notebook>.woofnb.out` next to the source file. Each
//! append buffers the full line and writes it in one call; prior runs'
//! records are preserved until `woof clean`.

use crate::core::model::SidecarRecord;
use chrono::{SecondsFormat, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};

/// `<notebook>.woofnb` → `<notebook>.woofnb.out`, sibling of the source.
pub fn sidecar_path(notebook_path: &Path) -> PathBuf {
    let mut name = notebook_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "notebook.woofnb".to_string());
    name.push_str(".out");
    notebook_path.with_file_name(name)
}

/// RFC 3339 UTC timestamp for sidecar records.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Append one record as a single line.
pub fn append_record(path: &Path, record: &SidecarRecord) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create sidecar dir: {}", e))?;
        }
    }

    let mut line =
        serde_json::to_string(record).map_err(|e| format!("JSON serialize error: {}", e))?;
    line.push('\n');

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("cannot open sidecar {}: {}", path.display(), e))?;
    file.write_all(line.as_bytes())
        .map_err(|e| format!("sidecar write error: {}", e))?;
    Ok(())
}

/// Read every record back, skipping blank lines.
pub fn read_records(path: &Path) -> Result<Vec<SidecarRecord>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read sidecar {}: {}", path.display(), e))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(|e| format!("bad sidecar line: {}", e)))
        .collect()
}

/// Remove a sidecar file if present.
pub fn remove(path: &Path) -> Result<(), String> {
    if path.exists() {
        std::fs::remove_file(path)
            .map_err(|e| format!("cannot remove {}: {}", path.display(), e))?;
    }
    Ok(())
}
