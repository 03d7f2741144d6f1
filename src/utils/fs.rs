//! File system helpers
//!
//! Atomic writes for persisted state, directory creation, project root discovery and
//! lexical path normalization for dependency paths.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::constants::DEFAULT_CONFIG_FILE;

/// Create a directory and all parents if missing.
///
/// Fails if the path exists but is not a directory.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    } else if !path.is_dir() {
        return Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display()));
    }
    Ok(())
}

/// Write `content` to `path` atomically.
///
/// The data goes to a sibling temporary file which is synced and then renamed over the
/// target, so readers never see a partially written file.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let temp_path = path.with_extension("tmp");

    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;

        file.write_all(content)
            .with_context(|| format!("Failed to write to temp file: {}", temp_path.display()))?;

        file.sync_all().with_context(|| "Failed to sync file to disk")?;
    }

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;

    Ok(())
}

pub fn safe_write(path: &Path, content: &str) -> Result<()> {
    atomic_write(path, content.as_bytes())
}

/// Find the closest directory at or above `start` containing `devflow.yaml`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start.ancestors().find(|dir| dir.join(DEFAULT_CONFIG_FILE).is_file()).map(Path::to_path_buf)
}

/// Make `path` absolute against `base` and resolve `.` and `..` lexically.
///
/// Symlinks are not followed, so the result is stable even when the path does not exist.
pub fn normalize_path(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parents_and_replaces() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("state").join("cache.yaml");

        atomic_write(&target, b"first").unwrap();
        safe_write(&target, "second").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "second");
        assert!(!target.with_extension("tmp").exists());
    }

    #[test]
    fn test_ensure_dir_rejects_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file");
        fs::write(&file, "").unwrap();

        assert!(ensure_dir(&file).is_err());
        ensure_dir(&temp.path().join("a/b")).unwrap();
        assert!(temp.path().join("a/b").is_dir());
    }

    #[test]
    fn test_find_project_root() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(DEFAULT_CONFIG_FILE), "name: root\n").unwrap();
        let nested = temp.path().join("src/deep");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_project_root(&nested).as_deref(), Some(temp.path()));
    }

    #[test]
    fn test_normalize_path() {
        let base = Path::new("/work/app");
        assert_eq!(normalize_path(base, Path::new("../lib/./x")), PathBuf::from("/work/lib/x"));
        assert_eq!(normalize_path(base, Path::new("/abs/y")), PathBuf::from("/abs/y"));
    }
}
