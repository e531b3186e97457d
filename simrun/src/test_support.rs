//! Test-only collaborators for driving the pipeline without a real simulation.
//!
//! The scripted writer, runner and parser all append to one shared [`Journal`]
//! so tests can assert the order in which stages touched them.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tempfile::TempDir;

use crate::core::types::ExecutionResult;
use crate::io::inputs::InputWriter;
use crate::io::parser::OutputParser;
use crate::io::process::{Invocation, ProcessRunner};

/// Ordered record of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Rc<RefCell<Vec<String>>>,
}

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }
}

/// Input writer that records the call and writes fixed files.
#[derive(Debug, Clone)]
pub struct RecordingInputWriter {
    journal: Journal,
    files: Vec<(String, String)>,
}

impl RecordingInputWriter {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, name: &str, contents: &str) -> Self {
        self.files.push((name.to_string(), contents.to_string()));
        self
    }
}

impl InputWriter for RecordingInputWriter {
    fn write_inputs(&self, workdir: &Path) -> Result<Vec<PathBuf>> {
        self.journal.record("write_inputs");
        let mut written = Vec::new();
        for (name, contents) in &self.files {
            let path = workdir.join(name);
            fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
            written.push(path);
        }
        Ok(written)
    }
}

/// What a [`ScriptedRunner`] does when invoked.
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    Exit(ExecutionResult),
    LaunchError(String),
}

/// Process runner that returns a scripted result and optionally leaves
/// files behind in the working directory, as a real program would.
#[derive(Debug, Clone)]
pub struct ScriptedRunner {
    journal: Journal,
    script: ScriptedRun,
    files: Vec<(String, String)>,
    invocations: Rc<RefCell<Vec<Invocation>>>,
    envs: Rc<RefCell<Vec<BTreeMap<String, String>>>>,
}

impl ScriptedRunner {
    pub fn new(journal: &Journal, script: ScriptedRun) -> Self {
        Self {
            journal: journal.clone(),
            script,
            files: Vec::new(),
            invocations: Rc::default(),
            envs: Rc::default(),
        }
    }

    pub fn succeeding(journal: &Journal, stdout: &str) -> Self {
        Self::new(
            journal,
            ScriptedRun::Exit(ExecutionResult {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            }),
        )
    }

    pub fn failing(journal: &Journal, message: &str) -> Self {
        Self::new(journal, ScriptedRun::LaunchError(message.to_string()))
    }

    pub fn with_file(mut self, name: &str, contents: &str) -> Self {
        self.files.push((name.to_string(), contents.to_string()));
        self
    }

    /// Invocations seen so far, shared across clones.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.borrow().clone()
    }

    /// Environment overrides passed with each invocation.
    pub fn envs(&self) -> Vec<BTreeMap<String, String>> {
        self.envs.borrow().clone()
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(
        &self,
        invocation: &Invocation,
        workdir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<ExecutionResult> {
        self.journal.record("run");
        self.invocations.borrow_mut().push(invocation.clone());
        self.envs.borrow_mut().push(env.clone());
        match &self.script {
            ScriptedRun::LaunchError(message) => Err(anyhow!("{message}")),
            ScriptedRun::Exit(result) => {
                for (name, contents) in &self.files {
                    let path = workdir.join(name);
                    fs::write(&path, contents)
                        .with_context(|| format!("write {}", path.display()))?;
                }
                Ok(result.clone())
            }
        }
    }
}

/// Parser returning a fixed value or a fixed error.
#[derive(Debug, Clone)]
pub struct StaticParser {
    journal: Journal,
    result: Result<Value, String>,
}

impl StaticParser {
    pub fn ok(journal: &Journal, value: Value) -> Self {
        Self {
            journal: journal.clone(),
            result: Ok(value),
        }
    }

    pub fn failing(journal: &Journal, message: &str) -> Self {
        Self {
            journal: journal.clone(),
            result: Err(message.to_string()),
        }
    }
}

impl OutputParser for StaticParser {
    fn parse(&self, _workdir: &Path) -> Result<Value> {
        self.journal.record("parse");
        self.result.clone().map_err(|message| anyhow!("{message}"))
    }
}

/// Temporary directory with small helpers for seeding files.
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("create temp dir")?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` at `relative`, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}
