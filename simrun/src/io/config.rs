//! Job configuration stored in a TOML file (`simrun.toml` by default).

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::convergence::CONVERGENCE_MARKER;
use crate::io::process::Invocation;

/// File name `simrun init` writes when no path is given.
pub const DEFAULT_JOB_FILE: &str = "simrun.toml";

/// Program run when the job names neither `command` nor `shell`.
pub const DEFAULT_PROGRAM: &str = "lmp";

/// One simulation run (TOML).
///
/// Edited by humans; missing fields default to the values a plain relaxation
/// run would use. Relative paths resolve against the job file's directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobConfig {
    /// Working directory for the run. Created if missing, reused if present.
    pub workdir: PathBuf,
    pub process: ProcessConfig,
    pub parser: ParserConfig,
    pub convergence: ConvergenceConfig,
    pub cleanup: CleanupConfig,
    pub archive: ArchiveConfig,
    pub removal: RemovalConfig,
    pub library: LibraryConfig,
    /// Files materialized into the working directory before execution.
    pub inputs: Vec<InputFileConfig>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("run"),
            process: ProcessConfig::default(),
            parser: ParserConfig::default(),
            convergence: ConvergenceConfig::default(),
            cleanup: CleanupConfig::default(),
            archive: ArchiveConfig::default(),
            removal: RemovalConfig::default(),
            library: LibraryConfig::default(),
            inputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessConfig {
    /// Program to exec. Mutually exclusive with `shell`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Positional arguments for `command`; omitted means `-in control.inp`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<String>>,
    /// Full command line run through `sh -c` (module loads, mpiexec, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// Overrides layered over the inherited environment.
    pub env: BTreeMap<String, EnvValue>,
}

impl ProcessConfig {
    pub fn invocation(&self) -> Invocation {
        match (&self.shell, &self.command) {
            (Some(line), _) => Invocation::shell(line.clone()),
            (None, Some(program)) => Invocation::Program {
                program: program.clone(),
                arguments: self.arguments.clone(),
            },
            (None, None) => Invocation::Program {
                program: DEFAULT_PROGRAM.to_string(),
                arguments: self.arguments.clone(),
            },
        }
    }

    /// Environment overrides with every value rendered as text.
    pub fn env_overrides(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .map(|(key, value)| (key.clone(), value.to_text()))
            .collect()
    }
}

/// Environment values may be written as any TOML scalar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EnvValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl EnvValue {
    pub fn to_text(&self) -> String {
        match self {
            EnvValue::Text(text) => text.clone(),
            EnvValue::Integer(value) => value.to_string(),
            // Debug keeps the decimal point (`1.0`, not `1`).
            EnvValue::Float(value) => format!("{value:?}"),
            EnvValue::Bool(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ParserConfig {
    /// Helper program (argv) that prints the parsed output as JSON on stdout.
    /// Omitted means a manifest of the working directory's files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// JSON file carrying the authoritative converged flag.
    pub structured_file: String,
    /// JSON pointer to the boolean flag inside `structured_file`.
    pub structured_pointer: String,
    pub primary_log: String,
    pub backup_log: String,
    /// Substring that marks a converged run in either log.
    pub marker: String,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            structured_file: "vasprun.json".to_string(),
            structured_pointer: "/converged".to_string(),
            primary_log: "vasp.log".to_string(),
            backup_log: "error.out".to_string(),
            marker: CONVERGENCE_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CleanupConfig {
    /// Base names deleted anywhere under the working directory after the run.
    pub files: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            files: vec![
                "CHG".to_string(),
                "CHGCAR".to_string(),
                "WAVECAR".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArchiveConfig {
    pub enabled: bool,
    /// Write the archive inside the working directory instead of beside it.
    pub inside: bool,
    /// Exact base names left out of the archive.
    pub exclude: Vec<String>,
    /// Shell globs matched against base names (e.g. `*.log`).
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemovalConfig {
    /// Delete the working directory once archiving is done.
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LibraryConfig {
    /// Resource library file. Omitted means `$HOME/.simrun_library` if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// One input file. Exactly one of the source fields must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InputFileConfig {
    /// File name inside the working directory.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copy: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concat: Option<Vec<PathBuf>>,
    /// Library entries, concatenated in order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<Vec<String>>,
    /// Functional directory for `library` entries; omitted means the
    /// library's `default_functional`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functional: Option<String>,
}

/// Where an input file's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Inline(String),
    Copy(PathBuf),
    Concat(Vec<PathBuf>),
    Library {
        entries: Vec<String>,
        functional: Option<String>,
    },
}

impl InputFileConfig {
    pub fn source(&self) -> Result<InputSource> {
        let mut sources = Vec::new();
        if let Some(text) = &self.inline {
            sources.push(InputSource::Inline(text.clone()));
        }
        if let Some(path) = &self.copy {
            sources.push(InputSource::Copy(path.clone()));
        }
        if let Some(paths) = &self.concat {
            sources.push(InputSource::Concat(paths.clone()));
        }
        if let Some(entries) = &self.library {
            sources.push(InputSource::Library {
                entries: entries.clone(),
                functional: self.functional.clone(),
            });
        }
        if self.functional.is_some() && self.library.is_none() {
            return Err(anyhow!(
                "input '{}' sets functional without library entries",
                self.name
            ));
        }
        match sources.len() {
            1 => Ok(sources.remove(0)),
            0 => Err(anyhow!("input '{}' has no source", self.name)),
            n => Err(anyhow!(
                "input '{}' has {n} sources (inline, copy, concat, library are exclusive)",
                self.name
            )),
        }
    }
}

impl JobConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workdir.as_os_str().is_empty() {
            return Err(anyhow!("workdir must not be empty"));
        }
        if self.process.command.is_some() && self.process.shell.is_some() {
            return Err(anyhow!("process.command and process.shell are exclusive"));
        }
        if let Some(command) = &self.process.command
            && command.trim().is_empty()
        {
            return Err(anyhow!("process.command must not be empty"));
        }
        if let Some(line) = &self.process.shell
            && line.trim().is_empty()
        {
            return Err(anyhow!("process.shell must not be empty"));
        }
        if self.archive.enabled && self.archive.inside && self.removal.enabled {
            return Err(anyhow!(
                "archive.inside cannot be combined with removal.enabled: \
                 removing the directory would delete the archive"
            ));
        }
        if let Some(command) = &self.parser.command
            && command.first().is_none_or(|program| program.trim().is_empty())
        {
            return Err(anyhow!("parser.command must be a non-empty array"));
        }
        let mut seen = BTreeSet::new();
        for input in &self.inputs {
            if input.name.trim().is_empty() {
                return Err(anyhow!("input name must not be empty"));
            }
            if Path::new(&input.name).file_name() != Some(OsStr::new(&input.name)) {
                return Err(anyhow!("input name '{}' must be a plain file name", input.name));
            }
            if !seen.insert(input.name.as_str()) {
                return Err(anyhow!("duplicate input '{}'", input.name));
            }
            input.source()?;
        }
        Ok(())
    }

    /// Resolve a config-relative path against `base` (the job file's directory).
    pub fn resolve(base: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    }
}

/// Load and validate a job file.
pub fn load_config(path: &Path) -> Result<JobConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: JobConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid job {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write a job file (temp file + rename).
pub fn write_config(path: &Path, cfg: &JobConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize job toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp job {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace job {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_config(&temp.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("simrun.toml");
        let mut cfg = JobConfig::default();
        cfg.process.shell = Some("mpiexec -n 4 vasp_std".to_string());
        cfg.process
            .env
            .insert("OMP_NUM_THREADS".to_string(), EnvValue::Integer(1));
        cfg.inputs.push(InputFileConfig {
            name: "INCAR".to_string(),
            inline: Some("ENCUT = 520\n".to_string()),
            ..InputFileConfig::default()
        });
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: JobConfig = toml::from_str(
            r#"
workdir = "/scratch/relax"

[archive]
enabled = true
exclude_patterns = ["*.log"]
"#,
        )
        .expect("parse");
        assert_eq!(cfg.workdir, PathBuf::from("/scratch/relax"));
        assert!(cfg.archive.enabled);
        assert!(!cfg.archive.inside);
        assert_eq!(cfg.cleanup.files, vec!["CHG", "CHGCAR", "WAVECAR"]);
        assert_eq!(cfg.convergence.primary_log, "vasp.log");
        assert!(!cfg.removal.enabled);
    }

    #[test]
    fn env_values_are_coerced_to_text() {
        let cfg: JobConfig = toml::from_str(
            r#"
[process.env]
OMP_NUM_THREADS = 4
I_MPI_DEBUG = "5"
SCALE = 1.0
VERBOSE = true
"#,
        )
        .expect("parse");
        let env = cfg.process.env_overrides();
        assert_eq!(env["OMP_NUM_THREADS"], "4");
        assert_eq!(env["I_MPI_DEBUG"], "5");
        assert_eq!(env["SCALE"], "1.0");
        assert_eq!(env["VERBOSE"], "true");
    }

    #[test]
    fn invocation_prefers_shell_then_command_then_default() {
        let mut process = ProcessConfig::default();
        assert_eq!(process.invocation(), Invocation::program(DEFAULT_PROGRAM));

        process.command = Some("vasp_std".to_string());
        process.arguments = Some(Vec::new());
        assert_eq!(
            process.invocation(),
            Invocation::Program {
                program: "vasp_std".to_string(),
                arguments: Some(Vec::new()),
            }
        );

        process.command = None;
        process.shell = Some("echo done".to_string());
        assert_eq!(process.invocation(), Invocation::shell("echo done"));
    }

    #[test]
    fn validate_rejects_command_and_shell_together() {
        let mut cfg = JobConfig::default();
        cfg.process.command = Some("vasp_std".to_string());
        cfg.process.shell = Some("vasp_std".to_string());
        assert!(cfg.validate().unwrap_err().to_string().contains("exclusive"));
    }

    #[test]
    fn validate_rejects_bad_inputs() {
        let mut cfg = JobConfig::default();
        cfg.inputs.push(InputFileConfig {
            name: "POSCAR".to_string(),
            ..InputFileConfig::default()
        });
        assert!(cfg.validate().unwrap_err().to_string().contains("no source"));

        cfg.inputs[0].inline = Some("x".to_string());
        cfg.inputs[0].copy = Some(PathBuf::from("POSCAR.orig"));
        assert!(cfg.validate().unwrap_err().to_string().contains("2 sources"));

        cfg.inputs[0].copy = None;
        cfg.inputs.push(cfg.inputs[0].clone());
        assert!(cfg.validate().unwrap_err().to_string().contains("duplicate"));

        cfg.inputs.truncate(1);
        cfg.inputs[0].name = "sub/POSCAR".to_string();
        assert!(cfg.validate().unwrap_err().to_string().contains("plain file name"));
    }

    #[test]
    fn validate_rejects_archive_inside_removed_directory() {
        let mut cfg = JobConfig::default();
        cfg.archive.enabled = true;
        cfg.archive.inside = true;
        cfg.removal.enabled = true;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("archive.inside"));

        cfg.archive.inside = false;
        assert!(cfg.validate().is_ok());

        cfg.archive.inside = true;
        cfg.removal.enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn functional_requires_library_entries() {
        let mut input = InputFileConfig {
            name: "POTCAR".to_string(),
            inline: Some("x".to_string()),
            functional: Some("LDA".to_string()),
            ..InputFileConfig::default()
        };
        assert!(input.source().unwrap_err().to_string().contains("functional"));

        input.inline = None;
        input.library = Some(vec!["Fe".to_string()]);
        assert_eq!(
            input.source().expect("source"),
            InputSource::Library {
                entries: vec!["Fe".to_string()],
                functional: Some("LDA".to_string()),
            }
        );
    }

    #[test]
    fn validate_rejects_empty_parser_command() {
        let mut cfg = JobConfig::default();
        cfg.parser.command = Some(Vec::new());
        assert!(cfg.validate().is_err());
        cfg.parser.command = Some(vec!["parse-vasp".to_string()]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        let base = Path::new("/jobs/fe");
        assert_eq!(
            JobConfig::resolve(base, Path::new("run")),
            PathBuf::from("/jobs/fe/run")
        );
        assert_eq!(
            JobConfig::resolve(base, Path::new("/scratch/run")),
            PathBuf::from("/scratch/run")
        );
    }
}
