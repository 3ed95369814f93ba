use anyhow::Context;
use std::fs;
use std::path::Path;

use crate::project::constraints::ConstraintFile;
use crate::project::env::{ProgramInfo, ProgramSource};

/// Sub-programs are the children of `<root>/programs/` that carry their own
/// `packages` file; each contributes its entries to the combined constraint
/// list.
pub struct DirPrograms;

impl ProgramSource for DirPrograms {
    fn discover(&self, programs_dir: &Path) -> anyhow::Result<Vec<ProgramInfo>> {
        let mut out = Vec::new();
        if !programs_dir.exists() {
            return Ok(out);
        }
        for ent in fs::read_dir(programs_dir)
            .with_context(|| format!("read_dir {}", programs_dir.display()))?
        {
            let ent = ent?;
            let p = ent.path();
            if !p.is_dir() {
                continue;
            }
            let deps_file = p.join("packages");
            if !deps_file.exists() {
                continue;
            }
            let name = p
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let cf = ConstraintFile::load(&deps_file)?;
            out.push(ProgramInfo {
                name,
                dependencies: cf.entries.into_values().collect(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}
