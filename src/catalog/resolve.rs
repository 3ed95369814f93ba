use semver::{Version, VersionReq};
use std::collections::BTreeMap;

use crate::project::env::{
    Constraint, Exactness, PackageStore, ResolveError, ResolveOptions, ResolvedVersions, Resolver,
};

/// Resolver adapter over a package catalog. Handles direct constraints only;
/// dependency-graph traversal belongs to the resolution machinery of the
/// catalog service and is not reimplemented here.
pub struct SemverResolver<'a> {
    store: &'a dyn PackageStore,
}

impl<'a> SemverResolver<'a> {
    pub fn new(store: &'a dyn PackageStore) -> Self {
        Self { store }
    }
}

fn parse_version_loose(label: &str) -> Option<Version> {
    let s = label.trim();
    let s = s.strip_prefix('v').unwrap_or(s);
    Version::parse(s).ok()
}

// Accepts `v`-prefixed versions inside requirements, e.g. `^v1.2` or
// `>=v1.4, <2.0`. The prefix is dropped only ahead of a digit so prerelease
// tags keep their letters.
fn parse_req_loose(expr: &str) -> Option<VersionReq> {
    let chars: Vec<char> = expr.trim().chars().collect();
    let mut out = String::with_capacity(chars.len());
    for (i, c) in chars.iter().enumerate() {
        if *c == 'v' {
            let at_boundary =
                i == 0 || matches!(chars[i - 1], ' ' | ',' | '^' | '~' | '=' | '>' | '<');
            let before_digit = chars
                .get(i + 1)
                .map(|n| n.is_ascii_digit())
                .unwrap_or(false);
            if at_boundary && before_digit {
                continue;
            }
        }
        out.push(*c);
    }
    VersionReq::parse(&out).ok()
}

#[derive(Default)]
struct PerPackage {
    strong: Vec<(String, VersionReq)>,
    strong_present: bool,
    weak_pin: Option<String>,
}

impl Resolver for SemverResolver<'_> {
    fn resolve(
        &self,
        constraints: &[Constraint],
        previous: Option<&ResolvedVersions>,
        _opts: &ResolveOptions,
    ) -> Result<ResolvedVersions, ResolveError> {
        let mut by_package: BTreeMap<&str, PerPackage> = BTreeMap::new();
        for c in constraints {
            let acc = by_package.entry(c.package.as_str()).or_default();
            if c.weak {
                // Weak pins never force inclusion; remember the first one.
                if acc.weak_pin.is_none() && c.exactness == Exactness::Exact {
                    acc.weak_pin = c.expression.clone();
                }
                continue;
            }
            acc.strong_present = true;
            if let Some(expr) = &c.expression {
                let req = parse_req_loose(expr).ok_or_else(|| {
                    ResolveError::Unsatisfiable(format!(
                        "invalid version expression `{}` for {}",
                        expr, c.package
                    ))
                })?;
                acc.strong.push((expr.clone(), req));
            }
        }

        let mut out = ResolvedVersions::new();
        for (package, acc) in by_package {
            if !acc.strong_present {
                continue;
            }
            let labels = self.store.versions(package).map_err(ResolveError::Other)?;
            let mut candidates: Vec<(Version, String)> = labels
                .iter()
                .filter_map(|l| parse_version_loose(l).map(|v| (v, l.clone())))
                .collect();
            candidates.sort_by(|a, b| a.0.cmp(&b.0));

            let satisfies = |v: &Version| acc.strong.iter().all(|(_, req)| req.matches(v));

            // Release pin first: a coherent release set beats freshness.
            let pinned = acc.weak_pin.as_deref().and_then(parse_version_loose);
            let chosen = pinned
                .and_then(|pin| {
                    candidates
                        .iter()
                        .find(|(v, _)| *v == pin && satisfies(v))
                        .cloned()
                })
                // Then solution stability: keep what the project already uses.
                .or_else(|| {
                    let prev = previous
                        .and_then(|p| p.get(package))
                        .and_then(|s| parse_version_loose(s))?;
                    candidates
                        .iter()
                        .find(|(v, _)| *v == prev && satisfies(v))
                        .cloned()
                })
                // Otherwise the newest satisfying version.
                .or_else(|| candidates.iter().rev().find(|(v, _)| satisfies(v)).cloned());

            match chosen {
                Some((_, label)) => {
                    out.insert(package.to_string(), label);
                }
                None => {
                    let wanted: Vec<&str> =
                        acc.strong.iter().map(|(expr, _)| expr.as_str()).collect();
                    return Err(ResolveError::Unsatisfiable(format!(
                        "no version of {} satisfies {}",
                        package,
                        if wanted.is_empty() {
                            "any constraint".to_string()
                        } else {
                            wanted.join(", ")
                        }
                    )));
                }
            }
        }
        Ok(out)
    }
}
