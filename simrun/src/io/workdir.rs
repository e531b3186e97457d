//! Working directory preparation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::types::DirectoryStatus;

/// Make sure `path` exists as a directory without touching existing contents.
///
/// An existing directory is reused as-is with a warning, since later stages
/// write inputs over whatever is already there.
pub fn ensure_directory(path: &Path) -> Result<DirectoryStatus> {
    if path.exists() {
        warn!(
            path = %path.display(),
            "directory already exists; existing files may be overwritten"
        );
        return Ok(DirectoryStatus::Existing);
    }
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))?;
    info!(path = %path.display(), "created working directory");
    Ok(DirectoryStatus::Created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_directory_with_parents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("a").join("b").join("run");
        let status = ensure_directory(&path).expect("ensure");
        assert_eq!(status, DirectoryStatus::Created);
        assert!(path.is_dir());
    }

    #[test]
    fn existing_directory_keeps_contents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("INCAR");
        fs::write(&file, "ENCUT = 520\n").expect("write");

        let status = ensure_directory(temp.path()).expect("ensure");
        assert_eq!(status, DirectoryStatus::Existing);
        assert_eq!(fs::read_to_string(&file).expect("read"), "ENCUT = 520\n");
    }

    #[test]
    fn path_blocked_by_file_fails_on_create() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "").expect("write");
        let err = ensure_directory(&blocker.join("run")).unwrap_err();
        assert!(err.to_string().contains("create directory"));
    }
}
