//! Gzip tarball of a finished working directory.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::core::exclusion::ExclusionRules;
use crate::core::types::ArchiveArtifact;
use crate::io::config::ArchiveConfig;

/// `<basename>.tar.gz`, inside `dir` or next to it.
pub fn archive_path(dir: &Path, inside: bool) -> Result<PathBuf> {
    let base = dir
        .file_name()
        .ok_or_else(|| anyhow!("cannot archive {}: no directory name", dir.display()))?;
    let name = format!("{}.tar.gz", base.to_string_lossy());
    if inside {
        return Ok(dir.join(name));
    }
    Ok(match dir.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    })
}

/// Archive `dir` per `cfg`. Returns `None` when archiving is disabled.
///
/// Entries are named `<basename>/<relative path>` so the archive unpacks
/// into a directory of the same name. The archive file itself is never
/// included, even when it is written inside `dir`. A partially written
/// archive is removed on failure.
#[instrument(skip_all, fields(dir = %dir.display(), enabled = cfg.enabled, inside = cfg.inside))]
pub fn archive_directory(dir: &Path, cfg: &ArchiveConfig) -> Result<Option<ArchiveArtifact>> {
    if !cfg.enabled {
        debug!("archiving disabled");
        return Ok(None);
    }
    if !dir.is_dir() {
        bail!("archive source {} is not a directory", dir.display());
    }
    let rules = ExclusionRules::new(&cfg.exclude, &cfg.exclude_patterns)?;
    let output = archive_path(dir, cfg.inside)?;

    match write_archive(dir, &output, &rules) {
        Ok(entries) => {
            info!(path = %output.display(), entries, "archive written");
            Ok(Some(ArchiveArtifact {
                path: output,
                entries,
            }))
        }
        Err(err) => {
            if let Err(cleanup) = fs::remove_file(&output)
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %output.display(), err = %cleanup, "failed to remove partial archive");
            }
            Err(err)
        }
    }
}

fn write_archive(dir: &Path, output: &Path, rules: &ExclusionRules) -> Result<usize> {
    let base = dir
        .file_name()
        .ok_or_else(|| anyhow!("cannot archive {}: no directory name", dir.display()))?;
    let file =
        File::create(output).with_context(|| format!("create archive {}", output.display()))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    let mut entries = 0usize;
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", dir.display()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        if path == output {
            continue;
        }
        if rules.excludes(&entry.file_name().to_string_lossy()) {
            debug!(path = %path.display(), "excluded from archive");
            continue;
        }
        let relative = path
            .strip_prefix(dir)
            .with_context(|| format!("relativize {}", path.display()))?;
        builder
            .append_path_with_name(path, Path::new(base).join(relative))
            .with_context(|| format!("add {} to archive", path.display()))?;
        entries += 1;
    }

    let encoder = builder
        .into_inner()
        .with_context(|| format!("finish tar stream {}", output.display()))?;
    encoder
        .finish()
        .with_context(|| format!("finish gzip stream {}", output.display()))?;
    Ok(entries)
}
