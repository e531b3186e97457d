//! Turning a finished working directory into structured output.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::io::process::{Invocation, ProcessRunner};

/// Reads the program's output files after execution.
///
/// The returned value is opaque to the pipeline; it is reported as-is.
pub trait OutputParser {
    fn parse(&self, workdir: &Path) -> Result<Value>;
}

impl<T: OutputParser + ?Sized> OutputParser for &T {
    fn parse(&self, workdir: &Path) -> Result<Value> {
        (**self).parse(workdir)
    }
}

#[derive(Debug, Serialize)]
struct ManifestEntry {
    path: String,
    bytes: u64,
}

#[derive(Debug, Serialize)]
struct Manifest {
    files: Vec<ManifestEntry>,
}

/// Lists every file under the working directory with its size.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestParser;

impl OutputParser for ManifestParser {
    fn parse(&self, workdir: &Path) -> Result<Value> {
        let mut files = Vec::new();
        for entry in WalkDir::new(workdir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walk {}", workdir.display()))?;
            if entry.file_type().is_dir() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(workdir)
                .with_context(|| format!("relativize {}", entry.path().display()))?;
            let metadata = entry
                .metadata()
                .with_context(|| format!("stat {}", entry.path().display()))?;
            files.push(ManifestEntry {
                path: relative.to_string_lossy().into_owned(),
                bytes: metadata.len(),
            });
        }
        serde_json::to_value(Manifest { files }).context("serialize manifest")
    }
}

/// Runs a helper program in the working directory and reads JSON from its stdout.
#[derive(Debug, Clone)]
pub struct CommandParser<R> {
    pub argv: Vec<String>,
    pub runner: R,
}

impl<R: ProcessRunner> CommandParser<R> {
    pub fn new(argv: Vec<String>, runner: R) -> Self {
        Self { argv, runner }
    }
}

impl<R: ProcessRunner> OutputParser for CommandParser<R> {
    #[instrument(skip_all, fields(workdir = %workdir.display(), parser = ?self.argv))]
    fn parse(&self, workdir: &Path) -> Result<Value> {
        let (program, arguments) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("parser command is empty"))?;
        let invocation = Invocation::Program {
            program: program.clone(),
            arguments: Some(arguments.to_vec()),
        };
        let result = self
            .runner
            .run(&invocation, workdir, &BTreeMap::new())
            .context("run parser")?;
        if !result.success() {
            bail!(
                "parser `{}` exited with {:?}: {}",
                invocation.display(),
                result.exit_code,
                result.stderr.trim()
            );
        }
        debug!(bytes = result.stdout.len(), "parser finished");
        serde_json::from_str(&result.stdout)
            .with_context(|| format!("parser `{}` did not print JSON", invocation.display()))
    }
}
