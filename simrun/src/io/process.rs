//! Running the simulation program and capturing its output.
//!
//! Every invocation is an argv exec of a single program. Shell lines are
//! expressed explicitly as `sh -c <line>` so this crate never splits or
//! re-quotes a command string itself.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};

use crate::core::types::ExecutionResult;

/// Arguments used when a program invocation does not list any.
pub const DEFAULT_ARGUMENTS: [&str; 2] = ["-in", "control.inp"];

/// What to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Run `program` with positional arguments. `None` means [`DEFAULT_ARGUMENTS`].
    Program {
        program: String,
        arguments: Option<Vec<String>>,
    },
    /// Run a full shell command line through `sh -c`.
    Shell { line: String },
}

impl Invocation {
    pub fn program(program: impl Into<String>) -> Self {
        Invocation::Program {
            program: program.into(),
            arguments: None,
        }
    }

    pub fn shell(line: impl Into<String>) -> Self {
        Invocation::Shell { line: line.into() }
    }

    /// Resolve to the concrete program and argument vector that will be exec'd.
    pub fn argv(&self) -> (String, Vec<String>) {
        match self {
            Invocation::Program { program, arguments } => {
                let args = match arguments {
                    Some(args) => args.clone(),
                    None => DEFAULT_ARGUMENTS.iter().map(|s| s.to_string()).collect(),
                };
                (program.clone(), args)
            }
            Invocation::Shell { line } => ("sh".to_string(), vec!["-c".to_string(), line.clone()]),
        }
    }

    /// Human-readable form for logs and error context.
    pub fn display(&self) -> String {
        match self {
            Invocation::Program { .. } => {
                let (program, args) = self.argv();
                std::iter::once(program)
                    .chain(args)
                    .collect::<Vec<_>>()
                    .join(" ")
            }
            Invocation::Shell { line } => format!("sh -c {line:?}"),
        }
    }
}

/// Abstraction over process execution so the pipeline can be tested without
/// spawning the simulation program.
pub trait ProcessRunner {
    /// Run `invocation` in `workdir` with `env` layered over the inherited
    /// environment. A non-zero exit is returned as data; only launch failures
    /// are errors.
    fn run(
        &self,
        invocation: &Invocation,
        workdir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<ExecutionResult>;
}

impl<T: ProcessRunner + ?Sized> ProcessRunner for &T {
    fn run(
        &self,
        invocation: &Invocation,
        workdir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<ExecutionResult> {
        (**self).run(invocation, workdir, env)
    }
}

/// Runner that spawns real child processes and blocks until they exit.
///
/// No timeout is applied: a hung program blocks the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    #[instrument(skip_all, fields(workdir = %workdir.display(), command = %invocation.display()))]
    fn run(
        &self,
        invocation: &Invocation,
        workdir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<ExecutionResult> {
        let (program, args) = invocation.argv();
        let mut cmd = Command::new(&program);
        // `envs` overlays onto the inherited environment of the child only.
        cmd.args(&args)
            .envs(env)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(env_overrides = env.len(), "spawning child process");
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!(err = %e, "failed to spawn command");
                return Err(e).with_context(|| {
                    format!(
                        "launch `{}` in {}",
                        invocation.display(),
                        workdir.display()
                    )
                });
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;

        // Drain both pipes concurrently so a chatty stderr cannot stall stdout.
        let stdout_handle = thread::spawn(move || read_stream(stdout));
        let stderr_handle = thread::spawn(move || read_stream(stderr));

        let status = child.wait().context("wait for command")?;

        let stdout = join_output(stdout_handle).context("join stdout")?;
        let stderr = join_output(stderr_handle).context("join stderr")?;

        if !status.success() {
            warn!(exit_code = ?status.code(), "command exited unsuccessfully");
        }
        debug!(exit_code = ?status.code(), "command finished");
        Ok(ExecutionResult {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.code(),
        })
    }
}

fn join_output(handle: thread::JoinHandle<Result<Vec<u8>>>) -> Result<Vec<u8>> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).context("read output")?;
    Ok(buf)
}
