//! On-disk cache entries: `.woof-cache/<notebook-stem>/<cell-id>.json`.
//!
//! Writes go through temp-file + atomic rename. Readers treat missing or
//! corrupt files, and key mismatches, as misses.

use crate::core::model::{CacheEntry, Notebook};
use std::path::{Path, PathBuf};

/// Cache root: `WOOF_CACHE_DIR` when set, else `.woof-cache` next to the
/// notebook (or under the working directory for in-memory notebooks).
pub fn cache_dir(nb: &Notebook) -> PathBuf {
    cache_dir_for(nb.path.as_deref())
}

/// Same derivation from a notebook path alone, so `clean` works without a
/// successful parse.
pub fn cache_dir_for(notebook_path: Option<&Path>) -> PathBuf {
    let root = cache_root_from(
        std::env::var_os("WOOF_CACHE_DIR").map(PathBuf::from),
        notebook_path,
    );
    let stem = notebook_path
        .and_then(Path::file_stem)
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "notebook".to_string());
    root.join(stem)
}

fn cache_root_from(override_dir: Option<PathBuf>, notebook_path: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir;
    }
    notebook_path
        .and_then(Path::parent)
        .map(|p| p.join(".woof-cache"))
        .unwrap_or_else(|| PathBuf::from(".woof-cache"))
}

fn entry_path(dir: &Path, cell_id: &str) -> PathBuf {
    dir.join(format!("{}.json", cell_id))
}

/// Look up an entry. Anything unexpected reads as a miss.
pub fn lookup(dir: &Path, cell_id: &str, key: &str) -> Option<CacheEntry> {
    let path = entry_path(dir, cell_id);
    let content = std::fs::read_to_string(&path).ok()?;
    let entry: CacheEntry = serde_json::from_str(&content).ok()?;
    if entry.key == key {
        Some(entry)
    } else {
        None
    }
}

/// Persist an entry atomically (write temp, rename).
pub fn store(dir: &Path, entry: &CacheEntry) -> Result<(), String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("cannot create cache dir {}: {}", dir.display(), e))?;
    let path = entry_path(dir, &entry.cell_id);
    let json = serde_json::to_string(entry).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        format!(
            "cannot rename {} -> {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;
    Ok(())
}

/// Delete one notebook's cache subtree.
pub fn clean_notebook(notebook_path: &Path) -> Result<(), String> {
    let dir = cache_dir_for(Some(notebook_path));
    if dir.exists() {
        std::fs::remove_dir_all(&dir)
            .map_err(|e| format!("cannot remove {}: {}", dir.display(), e))?;
    }
    Ok(())
}

/// Delete an entire cache root.
pub fn clean_all(root: &Path) -> Result<(), String> {
    if root.exists() {
        std::fs::remove_dir_all(root)
            .map_err(|e| format!("cannot remove {}: {}", root.display(), e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Output, StreamName};

    fn entry(cell_id: &str, key: &str) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            cell_id: cell_id.to_string(),
            outputs: vec![Output::stream(StreamName::Stdout, "hi\n")],
            elapsed_ms: 7,
            runner_version: "0.1.0".to_string(),
        }
    }

    #[test]
    fn test_store_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        store(dir.path(), &entry("a", "k1")).unwrap();
        let hit = lookup(dir.path(), "a", "k1").unwrap();
        assert_eq!(hit.elapsed_ms, 7);
        assert_eq!(hit.outputs.len(), 1);
    }

    #[test]
    fn test_key_mismatch_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        store(dir.path(), &entry("a", "k1")).unwrap();
        assert!(lookup(dir.path(), "a", "other").is_none());
    }

    #[test]
    fn test_missing_file_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        assert!(lookup(dir.path(), "ghost", "k").is_none());
    }

    #[test]
    fn test_corrupt_file_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), "{not json").unwrap();
        assert!(lookup(dir.path(), "a", "k").is_none());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        store(dir.path(), &entry("a", "k1")).unwrap();
        assert!(dir.path().join("a.json").exists());
        assert!(!dir.path().join("a.json.tmp").exists());
    }

    #[test]
    fn test_store_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        store(dir.path(), &entry("a", "k1")).unwrap();
        store(dir.path(), &entry("a", "k2")).unwrap();
        assert!(lookup(dir.path(), "a", "k1").is_none());
        assert!(lookup(dir.path(), "a", "k2").is_some());
    }

    #[test]
    fn test_cache_root_override_and_default() {
        let path = Path::new("/work/nb.woofnb");
        assert_eq!(
            cache_root_from(Some(PathBuf::from("/elsewhere")), Some(path)),
            PathBuf::from("/elsewhere")
        );
        assert_eq!(
            cache_root_from(None, Some(path)),
            PathBuf::from("/work/.woof-cache")
        );
        assert_eq!(
            cache_dir_for(Some(path)),
            PathBuf::from("/work/.woof-cache/nb")
        );
    }

    #[test]
    fn test_clean_all() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join(".woof-cache");
        std::fs::create_dir_all(root.join("nb")).unwrap();
        store(&root.join("nb"), &entry("a", "k")).unwrap();
        clean_all(&root).unwrap();
        assert!(!root.exists());
        // Cleaning a missing root is fine.
        clean_all(&root).unwrap();
    }
}
