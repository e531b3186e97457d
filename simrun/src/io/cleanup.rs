//! Best-effort pruning of large intermediate files.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::core::types::{CleanupReport, DeletionFailure};

/// Delete every file under `root` whose base name is in `filenames`.
///
/// Never fails: deletion errors and unreadable subtrees are recorded in the
/// report and the walk continues. A `root` that is not a directory is
/// reported via `invalid_root` and nothing is touched.
#[instrument(skip_all, fields(root = %root.display(), names = filenames.len()))]
pub fn delete_named(root: &Path, filenames: &[String]) -> CleanupReport {
    delete_named_with(root, filenames, |path| fs::remove_file(path))
}

fn delete_named_with(
    root: &Path,
    filenames: &[String],
    mut remove: impl FnMut(&Path) -> io::Result<()>,
) -> CleanupReport {
    let mut report = CleanupReport {
        root: root.to_path_buf(),
        ..CleanupReport::default()
    };
    if !root.is_dir() {
        warn!(root = %root.display(), "cleanup root is not a valid directory");
        report.invalid_root = true;
        return report;
    }
    if filenames.is_empty() {
        return report;
    }

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().unwrap_or(root).to_path_buf();
                warn!(path = %path.display(), err = %err, "cannot walk entry");
                report.failures.push(DeletionFailure {
                    path,
                    error: err.to_string(),
                });
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| filenames.iter().any(|wanted| wanted == name));
        if !matches {
            continue;
        }
        match remove(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "deleted");
                report.deleted.push(entry.path().to_path_buf());
            }
            Err(err) => {
                warn!(path = %entry.path().display(), err = %err, "failed to delete");
                report.failures.push(DeletionFailure {
                    path: entry.path().to_path_buf(),
                    error: err.to_string(),
                });
            }
        }
    }

    info!(
        deleted = report.deleted.len(),
        failed = report.failures.len(),
        "cleanup finished"
    );
    report
}
