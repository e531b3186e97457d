//! Convergence detection with ordered fallback sources.
//!
//! Probes are tried in order; the first one that produces a verdict wins.
//! A probe that errors or finds nothing to read yields no verdict, and the
//! detector moves on. When every probe comes up empty the run counts as not
//! converged. Nothing in here ever returns an error to the caller.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::types::{ConvergenceVerdict, VerdictSource};
use crate::io::config::ConvergenceConfig;

/// Log line emitted by the simulation program once the ionic relaxation stops.
pub const CONVERGENCE_MARKER: &str =
    "reached required accuracy - stopping structural energy minimisation";

/// Reader for the authoritative converged flag in a structured output file.
///
/// Implementations may fail freely (missing file, malformed content); the
/// detector treats any error as "no verdict from this source".
pub trait StructuredOutput {
    fn converged_flag(&self, workdir: &Path) -> Result<bool>;
}

impl<T: StructuredOutput + ?Sized> StructuredOutput for &T {
    fn converged_flag(&self, workdir: &Path) -> Result<bool> {
        (**self).converged_flag(workdir)
    }
}

/// Boolean at a JSON pointer inside a JSON file in the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonFlagFile {
    pub filename: String,
    pub pointer: String,
}

impl StructuredOutput for JsonFlagFile {
    fn converged_flag(&self, workdir: &Path) -> Result<bool> {
        let path = workdir.join(&self.filename);
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let value: Value =
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        value
            .pointer(&self.pointer)
            .and_then(Value::as_bool)
            .ok_or_else(|| anyhow!("no boolean at {} in {}", self.pointer, path.display()))
    }
}

/// One fallback tier.
pub trait ConvergenceProbe {
    fn source(&self) -> VerdictSource;

    /// `Ok(None)` and `Err(_)` both mean "no verdict from this tier".
    fn probe(&self, workdir: &Path) -> Result<Option<bool>>;
}

struct StructuredProbe<S> {
    reader: S,
}

impl<S: StructuredOutput> ConvergenceProbe for StructuredProbe<S> {
    fn source(&self) -> VerdictSource {
        VerdictSource::Structured
    }

    fn probe(&self, workdir: &Path) -> Result<Option<bool>> {
        self.reader.converged_flag(workdir).map(Some)
    }
}

/// Substring scan of a log file. A readable file always yields a verdict.
#[derive(Debug, Clone)]
pub struct LogMarkerProbe {
    pub source: VerdictSource,
    pub filename: String,
    pub marker: String,
}

impl ConvergenceProbe for LogMarkerProbe {
    fn source(&self) -> VerdictSource {
        self.source
    }

    fn probe(&self, workdir: &Path) -> Result<Option<bool>> {
        let path = workdir.join(&self.filename);
        if !path.is_file() {
            return Ok(None);
        }
        file_contains_marker(&path, &self.marker).map(Some)
    }
}

/// Stream `path` line by line and report whether any line contains `marker`.
///
/// Lines are decoded lossily so stray binary output cannot abort the scan.
pub fn file_contains_marker(path: &Path, marker: &str) -> Result<bool> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            return Ok(false);
        }
        if String::from_utf8_lossy(&line).contains(marker) {
            return Ok(true);
        }
    }
}

/// Ordered list of convergence probes.
pub struct ConvergenceDetector<'a> {
    probes: Vec<Box<dyn ConvergenceProbe + 'a>>,
}

impl<'a> ConvergenceDetector<'a> {
    pub fn new(probes: Vec<Box<dyn ConvergenceProbe + 'a>>) -> Self {
        Self { probes }
    }

    /// Structured JSON flag, then primary log, then backup log.
    pub fn from_config(cfg: &ConvergenceConfig) -> Self {
        Self::with_structured(
            cfg,
            JsonFlagFile {
                filename: cfg.structured_file.clone(),
                pointer: cfg.structured_pointer.clone(),
            },
        )
    }

    /// Like [`Self::from_config`] with a caller-supplied structured reader.
    pub fn with_structured<S: StructuredOutput + 'a>(cfg: &ConvergenceConfig, reader: S) -> Self {
        Self::new(vec![
            Box::new(StructuredProbe { reader }),
            Box::new(LogMarkerProbe {
                source: VerdictSource::PrimaryLog,
                filename: cfg.primary_log.clone(),
                marker: cfg.marker.clone(),
            }),
            Box::new(LogMarkerProbe {
                source: VerdictSource::BackupLog,
                filename: cfg.backup_log.clone(),
                marker: cfg.marker.clone(),
            }),
        ])
    }

    #[instrument(skip_all, fields(workdir = %workdir.display()))]
    pub fn detect(&self, workdir: &Path) -> ConvergenceVerdict {
        for probe in &self.probes {
            let source = probe.source();
            match probe.probe(workdir) {
                Ok(Some(converged)) => {
                    debug!(%source, converged, "convergence verdict");
                    return ConvergenceVerdict { converged, source };
                }
                Ok(None) => debug!(%source, "no convergence source"),
                Err(err) => {
                    let detail = format!("{err:#}");
                    debug!(%source, err = %detail, "convergence probe failed");
                }
            }
        }
        debug!("no source produced a verdict");
        ConvergenceVerdict::not_converged()
    }

    pub fn is_converged(&self, workdir: &Path) -> bool {
        self.detect(workdir).converged
    }
}
