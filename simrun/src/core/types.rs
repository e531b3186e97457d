//! Shared types for pipeline stages.
//!
//! These are the records stages hand to each other and to the caller. All of
//! them serialize so the CLI can print a run report as JSON.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Captured outcome of one external process invocation.
///
/// Produced once by a process runner and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Which convergence source produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    /// The structured simulation output file.
    Structured,
    PrimaryLog,
    BackupLog,
    /// No source produced a verdict; the run counts as not converged.
    NoSource,
}

impl VerdictSource {
    pub fn as_str(self) -> &'static str {
        match self {
            VerdictSource::Structured => "structured",
            VerdictSource::PrimaryLog => "primary_log",
            VerdictSource::BackupLog => "backup_log",
            VerdictSource::NoSource => "no_source",
        }
    }
}

impl fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceVerdict {
    pub converged: bool,
    pub source: VerdictSource,
}

impl ConvergenceVerdict {
    pub fn not_converged() -> Self {
        Self {
            converged: false,
            source: VerdictSource::NoSource,
        }
    }
}

/// Whether `ensure_directory` created the directory or found it in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryStatus {
    Created,
    Existing,
}

/// A single file the cleanup stage could not delete (or could not visit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Per-item outcome of the cleanup stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub root: PathBuf,
    /// Files removed, in walk order.
    pub deleted: Vec<PathBuf>,
    pub failures: Vec<DeletionFailure>,
    /// Set when `root` was not a directory; no deletions were attempted.
    pub invalid_root: bool,
}

/// Archive produced by the archive stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveArtifact {
    pub path: PathBuf,
    /// Number of file entries written.
    pub entries: usize,
}

/// Outcome of the removal stage. Errors are recorded, never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalReport {
    pub path: PathBuf,
    pub removed: bool,
    pub error: Option<String>,
}

/// Pipeline stages, in their fixed execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    EnsureDirectory,
    WriteInputs,
    RunProcess,
    ParseOutput,
    DetectConvergence,
    DeleteNamedFiles,
    Archive,
    RemoveDirectory,
}

impl StageKind {
    /// Every stage, in execution order.
    pub const ORDER: [StageKind; 8] = [
        StageKind::EnsureDirectory,
        StageKind::WriteInputs,
        StageKind::RunProcess,
        StageKind::ParseOutput,
        StageKind::DetectConvergence,
        StageKind::DeleteNamedFiles,
        StageKind::Archive,
        StageKind::RemoveDirectory,
    ];

    /// Required stages abort the run on failure; the rest are absorbed.
    ///
    /// Archiving is required when enabled: the archive is expected output, and
    /// removal must not run after a failed archive.
    pub fn is_required(self) -> bool {
        matches!(
            self,
            StageKind::EnsureDirectory
                | StageKind::WriteInputs
                | StageKind::RunProcess
                | StageKind::Archive
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::EnsureDirectory => "ensure_directory",
            StageKind::WriteInputs => "write_inputs",
            StageKind::RunProcess => "run_process",
            StageKind::ParseOutput => "parse_output",
            StageKind::DetectConvergence => "detect_convergence",
            StageKind::DeleteNamedFiles => "delete_named_files",
            StageKind::Archive => "archive",
            StageKind::RemoveDirectory => "remove_directory",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure absorbed by the pipeline in a best-effort stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: StageKind,
    pub error: String,
}
