//! Resource library resolution.
//!
//! The library is a directory tree of reusable input fragments (for example
//! pseudopotentials) laid out as `<set>/<functional>/<entry>/<entry_file>`.
//! Its location is described by a small `key = value` file that is read once
//! at startup; the resolved [`ResourceLibrary`] is then passed explicitly to
//! whatever needs it.
//!
//! ```text
//! # ~/.simrun_library
//! resources_root = /opt/resources
//! set_potpaw64 =
//! set_custom = /data/custom_potentials
//! default_set = potpaw64
//! default_functional = GGA
//! ```

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info};

/// Looked up in the home directory when a job does not name a library file.
pub const DEFAULT_LIBRARY_FILE: &str = ".simrun_library";

/// Functionals a library may default to.
pub const FUNCTIONALS: [&str; 2] = ["GGA", "LDA"];

const SET_PREFIX: &str = "set_";
const DEFAULT_ENTRY_FILE: &str = "POTCAR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLibrary {
    pub root: PathBuf,
    /// Declared sets and their resolved directories.
    pub sets: BTreeMap<String, PathBuf>,
    pub default_set: String,
    pub functional: String,
    /// File name inside each entry directory.
    pub entry_file: String,
}

impl ResourceLibrary {
    pub fn parse(contents: &str) -> Result<Self> {
        let mut values = BTreeMap::new();
        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| anyhow!("line {}: expected `key = value`", idx + 1))?;
            values.insert(key.trim().to_string(), value.trim().to_string());
        }

        let root = PathBuf::from(values.get("resources_root").cloned().unwrap_or_default());
        let sets: BTreeMap<String, PathBuf> = values
            .iter()
            .filter_map(|(key, value)| {
                let name = key.strip_prefix(SET_PREFIX)?;
                let path = if value.is_empty() {
                    root.join(name)
                } else if Path::new(value).is_absolute() {
                    PathBuf::from(value)
                } else {
                    root.join(value)
                };
                Some((name.to_string(), path))
            })
            .collect();

        let default_set = values.get("default_set").cloned().unwrap_or_default();
        if !sets.contains_key(&default_set) {
            bail!(
                "unknown or missing default_set '{}'; valid options: {:?}",
                default_set,
                sets.keys().collect::<Vec<_>>()
            );
        }
        let functional = values.get("default_functional").cloned().unwrap_or_default();
        if !FUNCTIONALS.contains(&functional.as_str()) {
            bail!(
                "unknown or missing default_functional '{}'; valid options: {:?}",
                functional,
                FUNCTIONALS
            );
        }
        let entry_file = values
            .get("entry_file")
            .filter(|value| !value.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_ENTRY_FILE.to_string());

        Ok(Self {
            root,
            sets,
            default_set,
            functional,
            entry_file,
        })
    }

    pub fn default_set_path(&self) -> &Path {
        // `parse` guarantees the default set is declared.
        self.sets
            .get(&self.default_set)
            .map(PathBuf::as_path)
            .unwrap_or(self.root.as_path())
    }

    /// `<default set>/<functional>`, the directory entries are looked up in.
    pub fn generation_path(&self) -> PathBuf {
        self.default_set_path().join(&self.functional)
    }

    pub fn entry_path(&self, entry: &str) -> Result<PathBuf> {
        self.entry_path_for(entry, None)
    }

    /// Entry path under `functional` instead of the default functional.
    pub fn entry_path_for(&self, entry: &str, functional: Option<&str>) -> Result<PathBuf> {
        if Path::new(entry).file_name() != Some(OsStr::new(entry)) {
            bail!("library entry '{entry}' must be a plain name");
        }
        let functional = functional.unwrap_or(self.functional.as_str());
        if !FUNCTIONALS.contains(&functional) {
            bail!("unknown functional '{functional}'; valid options: {FUNCTIONALS:?}");
        }
        Ok(self
            .default_set_path()
            .join(functional)
            .join(entry)
            .join(&self.entry_file))
    }
}

/// Load a library description file.
pub fn load_library(path: &Path) -> Result<ResourceLibrary> {
    debug!(path = %path.display(), "loading resource library");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read library {}", path.display()))?;
    let library = ResourceLibrary::parse(&contents)
        .with_context(|| format!("parse library {}", path.display()))?;
    info!(
        set = %library.default_set,
        functional = %library.functional,
        path = %library.generation_path().display(),
        "resource library resolved"
    );
    Ok(library)
}

/// Resolve the library once at startup.
///
/// An explicit path must exist. Without one, `$HOME/.simrun_library` is used
/// when present; otherwise the run has no library.
pub fn resolve_library(explicit: Option<&Path>) -> Result<Option<ResourceLibrary>> {
    if let Some(path) = explicit {
        return load_library(path).map(Some);
    }
    let Some(home) = dirs::home_dir() else {
        debug!("no home directory; running without resource library");
        return Ok(None);
    };
    let candidate = home.join(DEFAULT_LIBRARY_FILE);
    if !candidate.is_file() {
        debug!(path = %candidate.display(), "no resource library file");
        return Ok(None);
    }
    load_library(&candidate).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# resources
resources_root = /opt/resources

set_potpaw64 =
set_custom = /data/custom
set_relative = sub/dir
default_set = potpaw64
default_functional = GGA
";

    #[test]
    fn parses_sets_and_defaults() {
        let library = ResourceLibrary::parse(SAMPLE).expect("parse");
        assert_eq!(library.root, PathBuf::from("/opt/resources"));
        assert_eq!(library.sets["potpaw64"], PathBuf::from("/opt/resources/potpaw64"));
        assert_eq!(library.sets["custom"], PathBuf::from("/data/custom"));
        assert_eq!(library.sets["relative"], PathBuf::from("/opt/resources/sub/dir"));
        assert_eq!(library.default_set, "potpaw64");
        assert_eq!(library.functional, "GGA");
        assert_eq!(library.entry_file, "POTCAR");
        assert_eq!(
            library.entry_path("Fe_pv").expect("entry"),
            PathBuf::from("/opt/resources/potpaw64/GGA/Fe_pv/POTCAR")
        );
    }

    #[test]
    fn unknown_default_set_lists_valid_options() {
        let contents = SAMPLE.replace("default_set = potpaw64", "default_set = potpaw54");
        let err = ResourceLibrary::parse(&contents).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("potpaw54"));
        assert!(message.contains("potpaw64"));
    }

    #[test]
    fn functional_must_be_known() {
        let contents = SAMPLE.replace("GGA", "PBE");
        let err = ResourceLibrary::parse(&contents).unwrap_err();
        assert!(err.to_string().contains("default_functional"));

        let contents = SAMPLE.replace("default_functional = GGA\n", "");
        assert!(ResourceLibrary::parse(&contents).is_err());
    }

    #[test]
    fn malformed_line_is_reported_with_number() {
        let err = ResourceLibrary::parse("resources_root = /x\nnot a pair\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn entry_names_cannot_escape() {
        let library = ResourceLibrary::parse(SAMPLE).expect("parse");
        assert!(library.entry_path("../Fe").is_err());
        assert!(library.entry_path("..").is_err());
    }

    #[test]
    fn functional_override_switches_directory() {
        let library = ResourceLibrary::parse(SAMPLE).expect("parse");
        assert_eq!(
            library.entry_path_for("O", Some("LDA")).expect("entry"),
            PathBuf::from("/opt/resources/potpaw64/LDA/O/POTCAR")
        );
        let err = library.entry_path_for("O", Some("PBE")).unwrap_err();
        assert!(err.to_string().contains("unknown functional"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = resolve_library(Some(&temp.path().join("nope"))).unwrap_err();
        assert!(err.to_string().contains("read library"));
    }

    #[test]
    fn load_library_reads_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("library");
        fs::write(&path, format!("{SAMPLE}entry_file = POTCAR.gz\n")).expect("write");
        let library = resolve_library(Some(&path)).expect("resolve").expect("library");
        assert_eq!(library.default_set, "potpaw64");
        assert_eq!(library.entry_file, "POTCAR.gz");
    }
}
