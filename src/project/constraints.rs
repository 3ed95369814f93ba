use anyhow::Context;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::lines::{split_entry, strip_comment};
use crate::project::env::Constraint;

pub type ConstraintSet = BTreeMap<String, Constraint>;

/// The project's own constraint file, parsed alongside its raw lines so that
/// edits rewrite untouched lines (and their comments) verbatim.
#[derive(Debug, Clone, Default)]
pub struct ConstraintFile {
    pub entries: ConstraintSet,
    lines: Vec<String>,
}

impl ConstraintFile {
    /// A missing file is an empty constraint set, not an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut cf = Self::default();
        for raw in text.lines() {
            cf.lines.push(raw.to_string());
            let data = strip_comment(raw);
            if data.is_empty() {
                continue;
            }
            // Malformed entries (no package name) are inert.
            let Some((name, expression)) = split_entry(&data) else {
                continue;
            };
            // Later duplicates overwrite earlier ones.
            cf.entries
                .insert(name.clone(), Constraint::loose(&name, expression));
        }
        cf
    }

    /// Appends raw entries for every name not already present and rewrites
    /// the file. Deliberately runs no validation against any catalog.
    /// Returns whether anything changed.
    pub fn add_force(&mut self, path: &Path, specs: &[String]) -> anyhow::Result<bool> {
        let mut touched = false;
        for spec in specs {
            let Some((name, expression)) = split_entry(&strip_comment(spec)) else {
                continue;
            };
            if self.entries.contains_key(&name) {
                continue;
            }
            self.lines.push(spec.clone());
            self.entries
                .insert(name.clone(), Constraint::loose(&name, expression));
            touched = true;
        }
        if touched {
            self.save(path)?;
        }
        Ok(touched)
    }

    /// Drops every line whose leading `name[@...]` token names a removed
    /// package and rewrites the file. Comments on deleted lines go with the
    /// line; every other line is preserved verbatim. Returns whether
    /// anything changed.
    pub fn remove_force(&mut self, path: &Path, names: &[String]) -> anyhow::Result<bool> {
        let mut touched = false;
        self.lines.retain(|raw| {
            let data = strip_comment(raw);
            let Some((name, _)) = split_entry(&data) else {
                return true;
            };
            if names.iter().any(|n| *n == name) {
                touched = true;
                return false;
            }
            true
        });
        for name in names {
            if self.entries.remove(name).is_some() {
                touched = true;
            }
        }
        if touched {
            self.save(path)?;
        }
        Ok(touched)
    }

    fn save(&self, path: &Path) -> anyhow::Result<()> {
        let mut out = self.lines.join("\n");
        out.push('\n');
        fs::write(path, out).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ConstraintFile;
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

    #[test]
    fn parse_skips_comments_blanks_and_malformed_lines() {
        let cf = ConstraintFile::parse("# header\n\nalpha\nbeta@^2.0 # pinned loosely\n@0.1\n");
        assert_eq!(cf.entries.len(), 2);
        assert_eq!(cf.entries["alpha"].expression, None);
        assert_eq!(cf.entries["beta"].expression.as_deref(), Some("^2.0"));
    }

    #[test]
    fn later_duplicates_overwrite_earlier_ones() {
        let cf = ConstraintFile::parse("alpha@1.0\nalpha@2.0\n");
        assert_eq!(cf.entries.len(), 1);
        assert_eq!(cf.entries["alpha"].expression.as_deref(), Some("2.0"));
    }

    #[test]
    fn round_trip_preserves_constraint_map() {
        let root = temp_dir("roundtrip");
        let path = root.join("packages");
        fs::write(&path, "# required packages\nalpha\nbeta@^2.0\n").expect("seed");

        let mut cf = ConstraintFile::load(&path).expect("load");
        let before = cf.entries.clone();
        cf.add_force(&path, &["gamma@1.1".into()]).expect("add");

        let reloaded = ConstraintFile::load(&path).expect("reload");
        assert_eq!(reloaded.entries.len(), 3);
        for (name, c) in &before {
            assert_eq!(&reloaded.entries[name], c);
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn add_then_remove_restores_file_exactly() {
        let root = temp_dir("cancel");
        let path = root.join("packages");
        let seed = "# project packages\nalpha # core\nbeta@^2.0\n";
        fs::write(&path, seed).expect("seed");

        let mut cf = ConstraintFile::load(&path).expect("load");
        cf.add_force(&path, &["gamma".into()]).expect("add");
        assert!(cf.entries.contains_key("gamma"));
        cf.remove_force(&path, &["gamma".into()]).expect("remove");

        assert_eq!(fs::read_to_string(&path).expect("read back"), seed);
        assert!(!cf.entries.contains_key("gamma"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn add_force_skips_names_already_present() {
        let root = temp_dir("dedup");
        let path = root.join("packages");
        fs::write(&path, "alpha@1.0\n").expect("seed");

        let mut cf = ConstraintFile::load(&path).expect("load");
        cf.add_force(&path, &["alpha".into()]).expect("add");

        assert_eq!(fs::read_to_string(&path).expect("read back"), "alpha@1.0\n");
        assert_eq!(cf.entries["alpha"].expression.as_deref(), Some("1.0"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn remove_force_keeps_comments_on_surviving_lines() {
        let root = temp_dir("comments");
        let path = root.join("packages");
        fs::write(&path, "alpha # keep me\nbeta@1.0 # dropped with beta\n").expect("seed");

        let mut cf = ConstraintFile::load(&path).expect("load");
        cf.remove_force(&path, &["beta".into()]).expect("remove");

        assert_eq!(
            fs::read_to_string(&path).expect("read back"),
            "alpha # keep me\n"
        );
        let _ = fs::remove_dir_all(root);
    }
}
