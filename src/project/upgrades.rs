use anyhow::Context;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::lines::data_lines;

/// One-time migrations this tool version knows about. A fresh project records
/// them all at init so none runs later; `keel status` reports pending ones on
/// projects created by older tools.
pub const KNOWN_UPGRADERS: &[&str] = &[
    "app-identifier",
    "release-pin-marker",
    "ledger-full-line-sort",
];

const HEADER: &str = "\
# This file records one-time project migrations that have already been
# applied, so the tool does not run them again. Commit it together with
# the rest of the .keel directory.

";

fn ledger_path(root: &Path) -> PathBuf {
    root.join(".keel").join("upgraders")
}

pub fn applied(root: &Path) -> anyhow::Result<Vec<String>> {
    let path = ledger_path(root);
    if !path.exists() {
        return Ok(vec![]);
    }
    let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    Ok(data_lines(&text))
}

pub fn has_run(root: &Path, id: &str) -> anyhow::Result<bool> {
    Ok(applied(root)?.iter().any(|a| a == id))
}

/// Appends `id` to the ledger. The ledger itself does not deduplicate;
/// callers are expected to check `has_run` first. The very first write also
/// emits the explanatory header.
pub fn record_run(root: &Path, id: &str) -> anyhow::Result<()> {
    let path = ledger_path(root);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let fresh = !path.exists() || fs::metadata(&path)?.len() == 0;
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open {}", path.display()))?;
    if fresh {
        f.write_all(HEADER.as_bytes())?;
    }
    writeln!(f, "{}", id)?;
    Ok(())
}

pub fn pending(root: &Path) -> anyhow::Result<Vec<&'static str>> {
    let done = applied(root)?;
    Ok(KNOWN_UPGRADERS
        .iter()
        .filter(|id| !done.iter().any(|d| d == *id))
        .copied()
        .collect())
}

/// Marks every known upgrader as applied; used when a project is created, so
/// new projects never run migrations meant for old ones.
pub fn mark_all(root: &Path) -> anyhow::Result<()> {
    for id in KNOWN_UPGRADERS {
        if !has_run(root, id)? {
            record_run(root, id)?;
        }
    }
    Ok(())
}
