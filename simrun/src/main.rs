//! Single-run driver for external numerical simulations.
//!
//! `simrun run` executes one job file end to end. The other subcommands run a
//! single stage against an existing directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use simrun::exit_codes;
use simrun::io::archive::archive_directory;
use simrun::io::cleanup::delete_named;
use simrun::io::config::{
    ArchiveConfig, ConvergenceConfig, DEFAULT_JOB_FILE, JobConfig, load_config, write_config,
};
use simrun::io::convergence::ConvergenceDetector;
use simrun::io::library::resolve_library;
use simrun::io::process::SystemRunner;
use simrun::logging;
use simrun::pipeline::PipelineBuilder;

#[derive(Parser)]
#[command(
    name = "simrun",
    version,
    about = "Run one simulation job: prepare, execute, check convergence, archive"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default job file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        /// Job file to create.
        #[arg(default_value = DEFAULT_JOB_FILE)]
        path: PathBuf,
    },
    /// Run a job and print its report as JSON.
    Run {
        #[arg(default_value = DEFAULT_JOB_FILE)]
        job: PathBuf,
    },
    /// Report whether the run in DIR converged.
    Check {
        dir: PathBuf,
        /// Take log names and marker from this job file's `[convergence]`.
        #[arg(long)]
        job: Option<PathBuf>,
    },
    /// Delete files with the given base names anywhere under DIR.
    Clean {
        dir: PathBuf,
        #[arg(long = "file", required = true)]
        files: Vec<String>,
    },
    /// Write `<DIR>.tar.gz` beside DIR (or inside it with --inside).
    Archive {
        dir: PathBuf,
        #[arg(long)]
        inside: bool,
        /// Exact base name to leave out. Repeatable.
        #[arg(long = "exclude")]
        exclude: Vec<String>,
        /// Shell glob on base names to leave out. Repeatable.
        #[arg(long = "exclude-pattern")]
        exclude_patterns: Vec<String>,
    },
}

fn main() {
    logging::init();
    match run(Cli::parse()) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force, path } => cmd_init(&path, force),
        Command::Run { job } => cmd_run(&job),
        Command::Check { dir, job } => cmd_check(&dir, job.as_deref()),
        Command::Clean { dir, files } => cmd_clean(&dir, &files),
        Command::Archive {
            dir,
            inside,
            exclude,
            exclude_patterns,
        } => cmd_archive(
            &dir,
            ArchiveConfig {
                enabled: true,
                inside,
                exclude,
                exclude_patterns,
            },
        ),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    write_config(path, &JobConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(job_path: &Path) -> Result<i32> {
    let job = load_config(job_path)?;
    let base_dir = job_dir(job_path);
    let library_path = job
        .library
        .path
        .as_deref()
        .map(|path| JobConfig::resolve(&base_dir, path));
    let library = resolve_library(library_path.as_deref())?;
    debug!(job = %job_path.display(), library = library.is_some(), "job loaded");

    let pipeline = PipelineBuilder::from_job(&job, &base_dir, library, SystemRunner).build()?;
    let report = pipeline.run()?;
    let payload = serde_json::to_string_pretty(&report).context("serialize run report")?;
    println!("{payload}");
    Ok(verdict_code(report.converged()))
}

fn cmd_check(dir: &Path, job: Option<&Path>) -> Result<i32> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let config = match job {
        Some(path) => load_config(path)?.convergence,
        None => ConvergenceConfig::default(),
    };
    let verdict = ConvergenceDetector::from_config(&config).detect(dir);
    println!("converged={} source={}", verdict.converged, verdict.source);
    Ok(verdict_code(verdict.converged))
}

fn cmd_clean(dir: &Path, files: &[String]) -> Result<i32> {
    let report = delete_named(dir, files);
    if report.invalid_root {
        bail!("{} is not a directory", dir.display());
    }
    for failure in &report.failures {
        eprintln!("{}: {}", failure.path.display(), failure.error);
    }
    println!(
        "deleted={} failed={}",
        report.deleted.len(),
        report.failures.len()
    );
    Ok(exit_codes::OK)
}

fn cmd_archive(dir: &Path, cfg: ArchiveConfig) -> Result<i32> {
    match archive_directory(dir, &cfg)? {
        Some(artifact) => println!("{}", artifact.path.display()),
        None => bail!("archiving produced no artifact for {}", dir.display()),
    }
    Ok(exit_codes::OK)
}

/// Directory that relative paths in a job file resolve against.
fn job_dir(job_path: &Path) -> PathBuf {
    match job_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn verdict_code(converged: bool) -> i32 {
    if converged {
        exit_codes::OK
    } else {
        exit_codes::NOT_CONVERGED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_defaults_to_job_file() {
        let cli = Cli::parse_from(["simrun", "init"]);
        match cli.command {
            Command::Init { force, path } => {
                assert!(!force);
                assert_eq!(path, PathBuf::from(DEFAULT_JOB_FILE));
            }
            _ => panic!("expected init"),
        }
    }

    #[test]
    fn parse_run_with_job() {
        let cli = Cli::parse_from(["simrun", "run", "jobs/fe.toml"]);
        assert!(matches!(cli.command, Command::Run { job } if job == Path::new("jobs/fe.toml")));
    }

    #[test]
    fn parse_check_with_optional_job() {
        let cli = Cli::parse_from(["simrun", "check", "run1"]);
        assert!(matches!(cli.command, Command::Check { job: None, .. }));

        let cli = Cli::parse_from(["simrun", "check", "run1", "--job", "jobs/fe.toml"]);
        match cli.command {
            Command::Check { dir, job } => {
                assert_eq!(dir, PathBuf::from("run1"));
                assert_eq!(job, Some(PathBuf::from("jobs/fe.toml")));
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn parse_clean_requires_files() {
        assert!(Cli::try_parse_from(["simrun", "clean", "run1"]).is_err());
        let cli = Cli::parse_from([
            "simrun", "clean", "run1", "--file", "CHG", "--file", "WAVECAR",
        ]);
        match cli.command {
            Command::Clean { dir, files } => {
                assert_eq!(dir, PathBuf::from("run1"));
                assert_eq!(files, vec!["CHG", "WAVECAR"]);
            }
            _ => panic!("expected clean"),
        }
    }

    #[test]
    fn parse_archive_flags() {
        let cli = Cli::parse_from([
            "simrun",
            "archive",
            "out",
            "--inside",
            "--exclude",
            "WAVECAR",
            "--exclude-pattern",
            "*.log",
        ]);
        match cli.command {
            Command::Archive {
                dir,
                inside,
                exclude,
                exclude_patterns,
            } => {
                assert_eq!(dir, PathBuf::from("out"));
                assert!(inside);
                assert_eq!(exclude, vec!["WAVECAR"]);
                assert_eq!(exclude_patterns, vec!["*.log"]);
            }
            _ => panic!("expected archive"),
        }
    }

    #[test]
    fn job_dir_of_bare_file_is_current_dir() {
        assert_eq!(job_dir(Path::new("simrun.toml")), PathBuf::from("."));
        assert_eq!(
            job_dir(Path::new("/jobs/fe/simrun.toml")),
            PathBuf::from("/jobs/fe")
        );
    }

    #[test]
    fn verdict_maps_to_exit_code() {
        assert_eq!(verdict_code(true), exit_codes::OK);
        assert_eq!(verdict_code(false), exit_codes::NOT_CONVERGED);
    }
}
