//! Materializing input files into the working directory.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::config::{InputFileConfig, InputSource, JobConfig};
use crate::io::library::ResourceLibrary;

/// Writes the run's input files into `workdir` before the program starts.
pub trait InputWriter {
    /// Returns the written paths in the order they were written.
    fn write_inputs(&self, workdir: &Path) -> Result<Vec<PathBuf>>;
}

impl<T: InputWriter + ?Sized> InputWriter for &T {
    fn write_inputs(&self, workdir: &Path) -> Result<Vec<PathBuf>> {
        (**self).write_inputs(workdir)
    }
}

/// Writer for the `[[inputs]]` entries of a job file.
#[derive(Debug, Clone, Default)]
pub struct StagedInputWriter {
    pub inputs: Vec<InputFileConfig>,
    /// Relative source paths resolve against this directory.
    pub base_dir: PathBuf,
    pub library: Option<ResourceLibrary>,
}

impl StagedInputWriter {
    pub fn new(
        inputs: Vec<InputFileConfig>,
        base_dir: impl Into<PathBuf>,
        library: Option<ResourceLibrary>,
    ) -> Self {
        Self {
            inputs,
            base_dir: base_dir.into(),
            library,
        }
    }

    fn sources_for(&self, input: &InputFileConfig) -> Result<Vec<PathBuf>> {
        match input.source()? {
            InputSource::Inline(_) => Ok(Vec::new()),
            InputSource::Copy(path) => Ok(vec![JobConfig::resolve(&self.base_dir, &path)]),
            InputSource::Concat(paths) => Ok(paths
                .iter()
                .map(|path| JobConfig::resolve(&self.base_dir, path))
                .collect()),
            InputSource::Library {
                entries,
                functional,
            } => {
                let library = self.library.as_ref().ok_or_else(|| {
                    anyhow!(
                        "input '{}' uses library entries but no resource library is configured",
                        input.name
                    )
                })?;
                entries
                    .iter()
                    .map(|entry| library.entry_path_for(entry, functional.as_deref()))
                    .collect()
            }
        }
    }

    fn write_one(&self, workdir: &Path, input: &InputFileConfig) -> Result<PathBuf> {
        let target = workdir.join(&input.name);
        if let Some(text) = &input.inline {
            fs::write(&target, text).with_context(|| format!("write {}", target.display()))?;
            return Ok(target);
        }

        let sources = self.sources_for(input)?;
        // Sources may include the target itself, so assemble beside it and
        // rename over it once every source has been read.
        let partial = workdir.join(format!(".{}.partial", input.name));
        if let Err(err) = assemble(&partial, &sources) {
            if let Err(cleanup) = fs::remove_file(&partial)
                && cleanup.kind() != io::ErrorKind::NotFound
            {
                warn!(path = %partial.display(), err = %cleanup, "failed to remove partial input");
            }
            return Err(err);
        }
        fs::rename(&partial, &target)
            .with_context(|| format!("replace {}", target.display()))?;
        debug!(path = %target.display(), sources = sources.len(), "input assembled");
        Ok(target)
    }
}

fn assemble(path: &Path, sources: &[PathBuf]) -> Result<()> {
    let mut out = File::create(path).with_context(|| format!("create {}", path.display()))?;
    for source in sources {
        let mut reader =
            File::open(source).with_context(|| format!("open {}", source.display()))?;
        io::copy(&mut reader, &mut out)
            .with_context(|| format!("copy {} into {}", source.display(), path.display()))?;
    }
    out.flush()
        .with_context(|| format!("flush {}", path.display()))
}

impl InputWriter for StagedInputWriter {
    #[instrument(skip_all, fields(workdir = %workdir.display(), inputs = self.inputs.len()))]
    fn write_inputs(&self, workdir: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let path = self
                .write_one(workdir, input)
                .with_context(|| format!("input '{}'", input.name))?;
            written.push(path);
        }
        info!(count = written.len(), "inputs written");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline(name: &str, text: &str) -> InputFileConfig {
        InputFileConfig {
            name: name.to_string(),
            inline: Some(text.to_string()),
            ..InputFileConfig::default()
        }
    }

    #[test]
    fn writes_inline_copy_and_concat_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let base = temp.path().join("job");
        let workdir = temp.path().join("run");
        fs::create_dir_all(&base).expect("mkdir");
        fs::create_dir_all(&workdir).expect("mkdir");
        fs::write(base.join("POSCAR.orig"), "Fe\n1.0\n").expect("write");
        fs::write(base.join("a.part"), [0xffu8, b'a']).expect("write");
        fs::write(base.join("b.part"), b"b\n").expect("write");

        let writer = StagedInputWriter::new(
            vec![
                inline("INCAR", "ENCUT = 520\n"),
                InputFileConfig {
                    name: "POSCAR".to_string(),
                    copy: Some(PathBuf::from("POSCAR.orig")),
                    ..InputFileConfig::default()
                },
                InputFileConfig {
                    name: "KPOINTS".to_string(),
                    concat: Some(vec![PathBuf::from("a.part"), base.join("b.part")]),
                    ..InputFileConfig::default()
                },
            ],
            &base,
            None,
        );
        let written = writer.write_inputs(&workdir).expect("write inputs");
        assert_eq!(
            written,
            vec![
                workdir.join("INCAR"),
                workdir.join("POSCAR"),
                workdir.join("KPOINTS")
            ]
        );
        assert_eq!(
            fs::read_to_string(workdir.join("INCAR")).expect("read"),
            "ENCUT = 520\n"
        );
        assert_eq!(
            fs::read_to_string(workdir.join("POSCAR")).expect("read"),
            "Fe\n1.0\n"
        );
        assert_eq!(
            fs::read(workdir.join("KPOINTS")).expect("read"),
            vec![0xff, b'a', b'b', b'\n']
        );
    }

    #[test]
    fn library_entries_are_concatenated() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("resources");
        for (entry, body) in [("Fe_pv", "fe\n"), ("O", "o\n")] {
            let dir = root.join("potpaw64/GGA").join(entry);
            fs::create_dir_all(&dir).expect("mkdir");
            fs::write(dir.join("POTCAR"), body).expect("write");
        }
        let library = ResourceLibrary::parse(&format!(
            "resources_root = {}\nset_potpaw64 =\ndefault_set = potpaw64\ndefault_functional = GGA\n",
            root.display()
        ))
        .expect("library");

        let workdir = temp.path().join("run");
        fs::create_dir(&workdir).expect("mkdir");
        let writer = StagedInputWriter::new(
            vec![InputFileConfig {
                name: "POTCAR".to_string(),
                library: Some(vec!["Fe_pv".to_string(), "O".to_string()]),
                ..InputFileConfig::default()
            }],
            temp.path(),
            Some(library),
        );
        writer.write_inputs(&workdir).expect("write inputs");
        assert_eq!(
            fs::read_to_string(workdir.join("POTCAR")).expect("read"),
            "fe\no\n"
        );
    }

    #[test]
    fn copy_onto_itself_keeps_contents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workdir = temp.path().join("run");
        fs::create_dir(&workdir).expect("mkdir");
        fs::write(workdir.join("POSCAR"), "Fe\n1.0\n").expect("write");
        fs::write(workdir.join("extra"), "2.0\n").expect("write");

        let writer = StagedInputWriter::new(
            vec![
                InputFileConfig {
                    name: "POSCAR".to_string(),
                    copy: Some(PathBuf::from("run/POSCAR")),
                    ..InputFileConfig::default()
                },
                InputFileConfig {
                    name: "extra".to_string(),
                    concat: Some(vec![
                        PathBuf::from("run/extra"),
                        PathBuf::from("run/POSCAR"),
                    ]),
                    ..InputFileConfig::default()
                },
            ],
            temp.path(),
            None,
        );
        writer.write_inputs(&workdir).expect("write inputs");
        assert_eq!(
            fs::read_to_string(workdir.join("POSCAR")).expect("read"),
            "Fe\n1.0\n"
        );
        assert_eq!(
            fs::read_to_string(workdir.join("extra")).expect("read"),
            "2.0\nFe\n1.0\n"
        );
        assert!(!workdir.join(".POSCAR.partial").exists());
        assert!(!workdir.join(".extra.partial").exists());
    }

    #[test]
    fn failed_assembly_leaves_existing_target_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("POSCAR"), "old\n").expect("write");
        let writer = StagedInputWriter::new(
            vec![InputFileConfig {
                name: "POSCAR".to_string(),
                concat: Some(vec![PathBuf::from("POSCAR"), PathBuf::from("missing")]),
                ..InputFileConfig::default()
            }],
            temp.path(),
            None,
        );
        assert!(writer.write_inputs(temp.path()).is_err());
        assert_eq!(
            fs::read_to_string(temp.path().join("POSCAR")).expect("read"),
            "old\n"
        );
        assert!(!temp.path().join(".POSCAR.partial").exists());
    }

    #[test]
    fn library_functional_override_is_used() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("resources");
        for functional in ["GGA", "LDA"] {
            let dir = root.join("potpaw64").join(functional).join("O");
            fs::create_dir_all(&dir).expect("mkdir");
            fs::write(dir.join("POTCAR"), format!("{functional}\n")).expect("write");
        }
        let library = ResourceLibrary::parse(&format!(
            "resources_root = {}\nset_potpaw64 =\ndefault_set = potpaw64\ndefault_functional = GGA\n",
            root.display()
        ))
        .expect("library");

        let writer = StagedInputWriter::new(
            vec![InputFileConfig {
                name: "POTCAR".to_string(),
                library: Some(vec!["O".to_string()]),
                functional: Some("LDA".to_string()),
                ..InputFileConfig::default()
            }],
            temp.path(),
            Some(library),
        );
        writer.write_inputs(temp.path()).expect("write inputs");
        assert_eq!(
            fs::read_to_string(temp.path().join("POTCAR")).expect("read"),
            "LDA\n"
        );
    }

    #[test]
    fn library_input_without_library_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let writer = StagedInputWriter::new(
            vec![InputFileConfig {
                name: "POTCAR".to_string(),
                library: Some(vec!["Fe".to_string()]),
                ..InputFileConfig::default()
            }],
            temp.path(),
            None,
        );
        let err = writer.write_inputs(temp.path()).unwrap_err();
        assert!(format!("{err:#}").contains("no resource library"));
    }

    #[test]
    fn missing_copy_source_names_the_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let writer = StagedInputWriter::new(
            vec![InputFileConfig {
                name: "POSCAR".to_string(),
                copy: Some(PathBuf::from("nope")),
                ..InputFileConfig::default()
            }],
            temp.path(),
            None,
        );
        let err = writer.write_inputs(temp.path()).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("input 'POSCAR'"));
        assert!(message.contains("nope"));
    }

    #[test]
    fn no_inputs_writes_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let written = StagedInputWriter::default()
            .write_inputs(temp.path())
            .expect("write inputs");
        assert!(written.is_empty());
    }
}
