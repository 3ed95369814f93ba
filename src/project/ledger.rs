use anyhow::Context;
use std::fs;
use std::path::Path;

use crate::lines::{data_lines, split_entry};
use crate::project::env::ResolvedVersions;

/// A missing ledger is an empty version set, not an error.
pub fn read(path: &Path) -> anyhow::Result<ResolvedVersions> {
    let mut out = ResolvedVersions::new();
    if !path.exists() {
        return Ok(out);
    }
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    for data in data_lines(&text) {
        let Some((name, Some(version))) = split_entry(&data) else {
            continue;
        };
        out.insert(name, version);
    }
    Ok(out)
}

/// Writes the committed version set as `name@version` lines, sorted by the
/// full line string. When the project is pinned to an explicit release the
/// write is skipped unless forced, so a checked-in ledger is never silently
/// rewritten; returns whether the file was written.
pub fn write(
    path: &Path,
    versions: &ResolvedVersions,
    pinned_to_release: bool,
    force: bool,
) -> anyhow::Result<bool> {
    if pinned_to_release && !force {
        log::info!(
            "not rewriting {}: project is pinned to a release",
            path.display()
        );
        return Ok(false);
    }
    let mut lines: Vec<String> = versions
        .iter()
        .map(|(name, version)| format!("{}@{}", name, version))
        .collect();
    lines.sort();
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    fs::write(path, out).with_context(|| format!("write {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::{read, write};
    use crate::project::env::ResolvedVersions;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time drift")
            .as_nanos();
        let p =
            std::env::temp_dir().join(format!("keel-{}-{}-{}", prefix, std::process::id(), nonce));
        fs::create_dir_all(&p).expect("mkdir");
        p
    }

    fn versions(pairs: &[(&str, &str)]) -> ResolvedVersions {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn lines_sort_by_full_string_not_by_name() {
        let root = temp_dir("sort");
        let path = root.join("versions");
        write(&path, &versions(&[("b", "1"), ("a", "2")]), false, false).expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "a@2\nb@1\n");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn read_recovers_written_versions() {
        let root = temp_dir("roundtrip");
        let path = root.join("versions");
        let v = versions(&[("alpha", "1.2.0"), ("beta", "0.9.1")]);
        write(&path, &v, false, false).expect("write");
        assert_eq!(read(&path).expect("read"), v);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_ledger_reads_as_empty() {
        let root = temp_dir("missing");
        assert!(read(&root.join("versions")).expect("read").is_empty());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn pinned_project_skips_write_unless_forced() {
        let root = temp_dir("pinned");
        let path = root.join("versions");
        fs::write(&path, "alpha@1.0.0\n").expect("seed");

        let v = versions(&[("alpha", "2.0.0")]);
        assert!(!write(&path, &v, true, false).expect("skipped write"));
        assert_eq!(fs::read_to_string(&path).expect("read"), "alpha@1.0.0\n");

        assert!(write(&path, &v, true, true).expect("forced write"));
        assert_eq!(fs::read_to_string(&path).expect("read"), "alpha@2.0.0\n");
        let _ = fs::remove_dir_all(root);
    }
}
