//! Optional removal of the working directory after archiving.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::core::types::RemovalReport;

/// Recursively delete `dir` when `enabled`. Failures are recorded, never raised.
pub fn remove_directory(dir: &Path, enabled: bool) -> RemovalReport {
    let mut report = RemovalReport {
        path: dir.to_path_buf(),
        ..RemovalReport::default()
    };
    if !enabled {
        return report;
    }
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            info!(path = %dir.display(), "removed working directory");
            report.removed = true;
        }
        Err(err) => {
            warn!(path = %dir.display(), err = %err, "failed to remove working directory");
            report.error = Some(err.to_string());
        }
    }
    report
}
