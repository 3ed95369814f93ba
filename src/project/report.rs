use std::collections::BTreeSet;

use crate::project::env::ResolvedVersions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Upgraded,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    pub package: String,
    pub kind: ChangeKind,
    pub old: Option<String>,
    pub new: Option<String>,
}

#[derive(Debug, Default)]
pub struct ChangeSet {
    pub entries: Vec<ChangeEntry>,
    /// Set when a chosen version was never materialized. The report is
    /// truncated at that point; a solver choice with no build on disk is a
    /// hard inconsistency, not a per-package skip.
    pub failed: bool,
}

/// Classifies every package as added, upgraded, removed, or unchanged.
/// Names in `skip` are suppressed; the caller reports those separately.
/// Removals come first, then added/upgraded entries, each in map order.
pub fn diff(
    old: &ResolvedVersions,
    new: &ResolvedVersions,
    skip: &BTreeSet<String>,
    available: Option<&ResolvedVersions>,
) -> ChangeSet {
    let mut set = ChangeSet::default();

    for (package, version) in old {
        if new.contains_key(package) || skip.contains(package) {
            continue;
        }
        set.entries.push(ChangeEntry {
            package: package.clone(),
            kind: ChangeKind::Removed,
            old: Some(version.clone()),
            new: None,
        });
    }

    for (package, version) in new {
        let prior = old.get(package);
        if prior == Some(version) {
            continue;
        }
        if let Some(avail) = available
            && avail.get(package) != Some(version)
        {
            set.failed = true;
            return set;
        }
        if skip.contains(package) {
            continue;
        }
        set.entries.push(ChangeEntry {
            package: package.clone(),
            kind: if prior.is_some() {
                ChangeKind::Upgraded
            } else {
                ChangeKind::Added
            },
            old: prior.cloned(),
            new: Some(version.clone()),
        });
    }

    set
}

pub fn print(set: &ChangeSet) {
    for e in &set.entries {
        match e.kind {
            ChangeKind::Removed => {
                eprintln!(
                    "  removed {} (was {})",
                    e.package,
                    e.old.as_deref().unwrap_or("?")
                );
            }
            ChangeKind::Upgraded => {
                eprintln!(
                    "  upgraded {}: {} -> {}",
                    e.package,
                    e.old.as_deref().unwrap_or("?"),
                    e.new.as_deref().unwrap_or("?")
                );
            }
            ChangeKind::Added => {
                eprintln!(
                    "  added {} at {}",
                    e.package,
                    e.new.as_deref().unwrap_or("?")
                );
            }
        }
    }
    if set.failed {
        eprintln!("  (report incomplete: a chosen version has no materialized build)");
    }
}
