//! Orchestration for a single simulation run.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s sharing one [`RunContext`].
//! [`PipelineBuilder`] owns the stage order; callers only choose the
//! collaborators each stage talks to.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::core::state::{PipelineState, validate_stage_order};
use crate::core::types::{
    ArchiveArtifact, CleanupReport, ConvergenceVerdict, DirectoryStatus, ExecutionResult,
    RemovalReport, StageFailure, StageKind,
};
use crate::io::archive::archive_directory;
use crate::io::cleanup::delete_named;
use crate::io::config::{
    ArchiveConfig, CleanupConfig, ConvergenceConfig, DEFAULT_PROGRAM, JobConfig,
};
use crate::io::convergence::ConvergenceDetector;
use crate::io::inputs::{InputWriter, StagedInputWriter};
use crate::io::library::ResourceLibrary;
use crate::io::parser::{CommandParser, ManifestParser, OutputParser};
use crate::io::process::{Invocation, ProcessRunner, SystemRunner};
use crate::io::removal::remove_directory;
use crate::io::workdir::ensure_directory;

/// Mutable state threaded through every stage of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub workdir: PathBuf,
    pub state: PipelineState,
    pub directory: Option<DirectoryStatus>,
    pub inputs: Vec<PathBuf>,
    pub execution: Option<ExecutionResult>,
    pub output: Option<Value>,
    pub convergence: Option<ConvergenceVerdict>,
    pub cleanup: Option<CleanupReport>,
    pub archive: Option<ArchiveArtifact>,
    pub removal: Option<RemovalReport>,
    /// Errors absorbed by best-effort stages.
    pub failures: Vec<StageFailure>,
    pub completed: Vec<StageKind>,
}

impl RunContext {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            state: PipelineState::Pending,
            directory: None,
            inputs: Vec::new(),
            execution: None,
            output: None,
            convergence: None,
            cleanup: None,
            archive: None,
            removal: None,
            failures: Vec::new(),
            completed: Vec::new(),
        }
    }
}

/// Result of a completed run, printed as JSON by `simrun run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workdir: PathBuf,
    pub directory: Option<DirectoryStatus>,
    pub inputs: Vec<PathBuf>,
    pub execution: Option<ExecutionResult>,
    pub output: Option<Value>,
    pub parse_error: Option<String>,
    pub convergence: ConvergenceVerdict,
    pub cleanup: Option<CleanupReport>,
    pub archive: Option<ArchiveArtifact>,
    pub removal: Option<RemovalReport>,
    pub failures: Vec<StageFailure>,
    pub completed: Vec<StageKind>,
    pub state: PipelineState,
}

impl RunReport {
    pub fn converged(&self) -> bool {
        self.convergence.converged
    }
}

impl From<RunContext> for RunReport {
    fn from(ctx: RunContext) -> Self {
        let parse_error = ctx
            .failures
            .iter()
            .find(|failure| failure.stage == StageKind::ParseOutput)
            .map(|failure| failure.error.clone());
        Self {
            workdir: ctx.workdir,
            directory: ctx.directory,
            inputs: ctx.inputs,
            execution: ctx.execution,
            output: ctx.output,
            parse_error,
            convergence: ctx
                .convergence
                .unwrap_or_else(ConvergenceVerdict::not_converged),
            cleanup: ctx.cleanup,
            archive: ctx.archive,
            removal: ctx.removal,
            failures: ctx.failures,
            completed: ctx.completed,
            state: ctx.state,
        }
    }
}

/// One step of the run.
///
/// An `Err` from a required stage (see [`StageKind::is_required`]) aborts the
/// run; from any other stage it is recorded and the run continues.
pub trait Stage {
    fn kind(&self) -> StageKind;
    fn execute(&self, ctx: &mut RunContext) -> Result<()>;
}

struct EnsureDirectoryStage;

impl Stage for EnsureDirectoryStage {
    fn kind(&self) -> StageKind {
        StageKind::EnsureDirectory
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        ctx.directory = Some(ensure_directory(&ctx.workdir)?);
        Ok(())
    }
}

struct WriteInputsStage<'a> {
    writer: Box<dyn InputWriter + 'a>,
}

impl Stage for WriteInputsStage<'_> {
    fn kind(&self) -> StageKind {
        StageKind::WriteInputs
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        ctx.inputs = self.writer.write_inputs(&ctx.workdir)?;
        Ok(())
    }
}

struct RunProcessStage<'a> {
    runner: Box<dyn ProcessRunner + 'a>,
    invocation: Invocation,
    env: BTreeMap<String, String>,
}

impl Stage for RunProcessStage<'_> {
    fn kind(&self) -> StageKind {
        StageKind::RunProcess
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        let result = self.runner.run(&self.invocation, &ctx.workdir, &self.env)?;
        info!(exit_code = ?result.exit_code, "simulation finished");
        ctx.execution = Some(result);
        Ok(())
    }
}

struct ParseOutputStage<'a> {
    parser: Box<dyn OutputParser + 'a>,
}

impl Stage for ParseOutputStage<'_> {
    fn kind(&self) -> StageKind {
        StageKind::ParseOutput
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        ctx.output = Some(self.parser.parse(&ctx.workdir)?);
        Ok(())
    }
}

struct DetectConvergenceStage<'a> {
    detector: ConvergenceDetector<'a>,
}

impl Stage for DetectConvergenceStage<'_> {
    fn kind(&self) -> StageKind {
        StageKind::DetectConvergence
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        let verdict = self.detector.detect(&ctx.workdir);
        info!(converged = verdict.converged, source = %verdict.source, "convergence checked");
        ctx.convergence = Some(verdict);
        Ok(())
    }
}

struct DeleteNamedFilesStage {
    files: Vec<String>,
}

impl Stage for DeleteNamedFilesStage {
    fn kind(&self) -> StageKind {
        StageKind::DeleteNamedFiles
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        ctx.cleanup = Some(delete_named(&ctx.workdir, &self.files));
        Ok(())
    }
}

struct ArchiveStage {
    config: ArchiveConfig,
}

impl Stage for ArchiveStage {
    fn kind(&self) -> StageKind {
        StageKind::Archive
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        ctx.archive = archive_directory(&ctx.workdir, &self.config)?;
        Ok(())
    }
}

struct RemoveDirectoryStage {
    enabled: bool,
}

impl Stage for RemoveDirectoryStage {
    fn kind(&self) -> StageKind {
        StageKind::RemoveDirectory
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        ctx.removal = Some(remove_directory(&ctx.workdir, self.enabled));
        Ok(())
    }
}

/// Stages bound to one working directory.
pub struct Pipeline<'a> {
    workdir: PathBuf,
    stages: Vec<Box<dyn Stage + 'a>>,
}

impl std::fmt::Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("workdir", &self.workdir)
            .field(
                "stages",
                &self.stages.iter().map(|s| s.kind()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<'a> Pipeline<'a> {
    /// Assemble a pipeline from explicit stages. The stages must cover the
    /// fixed order exactly once each.
    pub fn from_stages(
        workdir: impl Into<PathBuf>,
        stages: Vec<Box<dyn Stage + 'a>>,
    ) -> Result<Self> {
        let kinds: Vec<StageKind> = stages.iter().map(|stage| stage.kind()).collect();
        let violations = validate_stage_order(&kinds);
        if !violations.is_empty() {
            bail!("invalid stage order: {}", violations.join("; "));
        }
        Ok(Self {
            workdir: workdir.into(),
            stages,
        })
    }

    /// Run every stage in order.
    ///
    /// Returns `Err` only when a required stage fails; the error names the
    /// stage. Otherwise the report carries absorbed failures.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn run(&self) -> Result<RunReport> {
        let mut ctx = RunContext::new(&self.workdir);
        for stage in &self.stages {
            let kind = stage.kind();
            debug!(stage = %kind, "stage starting");
            if let Err(err) = stage.execute(&mut ctx) {
                let detail = format!("{err:#}");
                if kind.is_required() {
                    error!(stage = %kind, err = %detail, "required stage failed");
                    return Err(err.context(format!("{kind} stage failed")));
                }
                warn!(stage = %kind, err = %detail, "stage failed; continuing");
                ctx.failures.push(StageFailure {
                    stage: kind,
                    error: detail,
                });
            }
            ctx.state = ctx.state.advance(kind).map_err(|msg| anyhow!(msg))?;
            ctx.completed.push(kind);
        }
        ctx.state = ctx.state.finish().map_err(|msg| anyhow!(msg))?;
        info!(
            converged = ctx.convergence.is_some_and(|v| v.converged),
            failures = ctx.failures.len(),
            "run finished"
        );
        Ok(RunReport::from(ctx))
    }
}

/// Builds a [`Pipeline`] in the fixed stage order.
///
/// Every collaborator has a default: no inputs, [`SystemRunner`] running the
/// default program, a [`ManifestParser`], the default convergence sources and
/// cleanup list, and no archive or removal.
pub struct PipelineBuilder<'a> {
    workdir: PathBuf,
    writer: Option<Box<dyn InputWriter + 'a>>,
    runner: Option<Box<dyn ProcessRunner + 'a>>,
    invocation: Invocation,
    env: BTreeMap<String, String>,
    parser: Option<Box<dyn OutputParser + 'a>>,
    detector: Option<ConvergenceDetector<'a>>,
    cleanup_files: Vec<String>,
    archive: ArchiveConfig,
    remove_directory: bool,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            writer: None,
            runner: None,
            invocation: Invocation::program(DEFAULT_PROGRAM),
            env: BTreeMap::new(),
            parser: None,
            detector: None,
            cleanup_files: CleanupConfig::default().files,
            archive: ArchiveConfig::default(),
            remove_directory: false,
        }
    }

    /// Wire a builder from a job file.
    ///
    /// `base_dir` is the job file's directory; the workdir and input sources
    /// resolve against it. `runner` executes both the simulation and the
    /// parser command when one is configured.
    pub fn from_job<R>(
        job: &JobConfig,
        base_dir: &Path,
        library: Option<ResourceLibrary>,
        runner: R,
    ) -> Self
    where
        R: ProcessRunner + Clone + 'a,
    {
        let writer = StagedInputWriter::new(job.inputs.clone(), base_dir, library);
        let mut builder = Self::new(JobConfig::resolve(base_dir, &job.workdir))
            .input_writer(writer)
            .invocation(job.process.invocation())
            .env(job.process.env_overrides())
            .detector(ConvergenceDetector::from_config(&job.convergence))
            .cleanup_files(job.cleanup.files.clone())
            .archive(job.archive.clone())
            .remove_directory(job.removal.enabled);
        if let Some(argv) = &job.parser.command {
            builder = builder.parser(CommandParser::new(argv.clone(), runner.clone()));
        }
        builder.runner(runner)
    }

    pub fn input_writer(mut self, writer: impl InputWriter + 'a) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    pub fn runner(mut self, runner: impl ProcessRunner + 'a) -> Self {
        self.runner = Some(Box::new(runner));
        self
    }

    pub fn invocation(mut self, invocation: Invocation) -> Self {
        self.invocation = invocation;
        self
    }

    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn parser(mut self, parser: impl OutputParser + 'a) -> Self {
        self.parser = Some(Box::new(parser));
        self
    }

    pub fn detector(mut self, detector: ConvergenceDetector<'a>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn cleanup_files(mut self, files: Vec<String>) -> Self {
        self.cleanup_files = files;
        self
    }

    pub fn archive(mut self, config: ArchiveConfig) -> Self {
        self.archive = config;
        self
    }

    pub fn remove_directory(mut self, enabled: bool) -> Self {
        self.remove_directory = enabled;
        self
    }

    pub fn build(self) -> Result<Pipeline<'a>> {
        if self.archive.enabled && self.archive.inside && self.remove_directory {
            bail!("an archive written inside the working directory would be removed with it");
        }
        let writer = self
            .writer
            .unwrap_or_else(|| Box::new(StagedInputWriter::default()));
        let runner = self.runner.unwrap_or_else(|| Box::new(SystemRunner));
        let parser = self.parser.unwrap_or_else(|| Box::new(ManifestParser));
        let detector = self
            .detector
            .unwrap_or_else(|| ConvergenceDetector::from_config(&ConvergenceConfig::default()));
        let stages: Vec<Box<dyn Stage + 'a>> = vec![
            Box::new(EnsureDirectoryStage),
            Box::new(WriteInputsStage { writer }),
            Box::new(RunProcessStage {
                runner,
                invocation: self.invocation,
                env: self.env,
            }),
            Box::new(ParseOutputStage { parser }),
            Box::new(DetectConvergenceStage { detector }),
            Box::new(DeleteNamedFilesStage {
                files: self.cleanup_files,
            }),
            Box::new(ArchiveStage {
                config: self.archive,
            }),
            Box::new(RemoveDirectoryStage {
                enabled: self.remove_directory,
            }),
        ];
        Pipeline::from_stages(self.workdir, stages)
    }
}
