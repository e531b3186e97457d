//! Base-name exclusion rules for archiving.
//!
//! A file is excluded when its base name is listed exactly or matches any of
//! the shell-glob patterns (`*.log`, `WAVECAR*`, ...). Paths are never matched,
//! only the final component.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

#[derive(Debug, Clone)]
pub struct ExclusionRules {
    names: BTreeSet<String>,
    patterns: GlobSet,
}

impl ExclusionRules {
    pub fn new(names: &[String], patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .with_context(|| format!("invalid exclude pattern '{pattern}'"))?;
            builder.add(glob);
        }
        let patterns = builder.build().context("build exclude patterns")?;
        Ok(Self {
            names: names.iter().cloned().collect(),
            patterns,
        })
    }

    pub fn excludes(&self, base_name: &str) -> bool {
        self.names.contains(base_name) || self.patterns.is_match(base_name)
    }
}
