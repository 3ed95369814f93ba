use anyhow::{Context, bail};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use strsim::jaro_winkler;

use crate::catalog::resolve::SemverResolver;
use crate::catalog::store::{Catalog, CatalogRelease};
use crate::lines::{split_entry, strip_comment};
use crate::project::constraints::ConstraintFile;
use crate::project::env::Env;
use crate::project::identity;
use crate::project::ledger;
use crate::project::programs::DirPrograms;
use crate::project::release::{self, PinState};
use crate::project::report;
use crate::project::state::{ProjectState, SyncError, SyncOutcome};
use crate::project::upgrades;

pub fn run_cli<I>(args: I) -> i32
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let cmd = match args.next() {
        Some(arg) => arg,
        None => {
            print_usage();
            return 1;
        }
    };
    let rest: Vec<String> = args.collect();
    let cwd = match std::env::current_dir() {
        Ok(d) => d,
        Err(err) => {
            eprintln!("cannot determine working directory: {}", err);
            return 1;
        }
    };
    let result = match cmd.as_str() {
        "init" => cmd_init(cwd, &rest),
        "add" => cmd_add(cwd, &rest),
        "remove" => cmd_remove(cwd, &rest),
        "sync" => cmd_sync(cwd, &rest),
        "status" => cmd_status(cwd, &rest),
        "version" | "--version" => {
            print_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("unknown command: {}", other);
            print_usage();
            return 1;
        }
    };
    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{:#}", err);
            1
        }
    }
}

fn print_usage() {
    eprintln!("usage: keel <command> [args]");
    eprintln!();
    eprintln!("  init [--release <id>]   create a .keel project in the current directory");
    eprintln!("  add <name[@expr]>...    require packages and resolve");
    eprintln!("  remove <name>...        drop required packages and resolve");
    eprintln!("  sync [--force]          recompute versions and materialize builds");
    eprintln!("  status                  show constraints, versions, and pin state");
    eprintln!("  version                 print tool version");
    eprintln!();
    eprintln!("KEEL_CATALOG must point at a package catalog (directory or URL).");
}

fn print_version() {
    match option_env!("KEEL_GIT_COMMIT") {
        Some(commit) => eprintln!("keel {} ({})", env!("CARGO_PKG_VERSION"), commit),
        None => eprintln!("keel {}", env!("CARGO_PKG_VERSION")),
    }
}

pub fn find_project_root(mut p: PathBuf) -> Option<PathBuf> {
    loop {
        if p.join(".keel").is_dir() {
            return Some(p);
        }
        if !p.pop() {
            break;
        }
    }
    None
}

fn best_name_match<'a>(needle: &str, candidates: &'a [String]) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for c in candidates {
        let score = jaro_winkler(needle, c);
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((c.as_str(), score));
        }
    }
    match best {
        Some((name, score)) if score >= 0.84 => Some(name),
        _ => None,
    }
}

fn with_env<T>(root: &Path, f: impl FnOnce(&Env) -> anyhow::Result<T>) -> anyhow::Result<T> {
    let catalog = Catalog::from_env()?;
    let pin = release::read_pin(root)?;
    let release_ctx = CatalogRelease::load(&catalog, &pin)?;
    let resolver = SemverResolver::new(&catalog);
    let programs = DirPrograms;
    let env = Env {
        resolver: &resolver,
        store: &catalog,
        release: &release_ctx,
        programs: &programs,
    };
    f(&env)
}

fn sync_and_report(
    state: &mut ProjectState,
    env: &Env,
    force: bool,
    skip: &BTreeSet<String>,
) -> anyhow::Result<SyncOutcome> {
    match state.ensure_up_to_date(env, force) {
        Ok(out) => {
            let set = report::diff(&out.previous, &out.versions, skip, Some(&out.downloaded));
            report::print(&set);
            Ok(out)
        }
        Err(SyncError::MaterializationShortfall {
            requested,
            downloaded,
            missing,
        }) => {
            bail!(
                "materialized {} of {} packages; missing builds for {}",
                downloaded.len(),
                requested,
                missing.join(", ")
            )
        }
        Err(err) => Err(err.into()),
    }
}

fn cmd_init(cwd: PathBuf, rest: &[String]) -> anyhow::Result<()> {
    let mut release_id: Option<String> = None;
    let mut it = rest.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--release" => {
                release_id = Some(
                    it.next()
                        .context("expected release id after --release")?
                        .clone(),
                );
            }
            other => bail!("unknown argument: {}", other),
        }
    }

    let control = cwd.join(".keel");
    if control.exists() {
        bail!(".keel already exists at {}", control.display());
    }
    std::fs::create_dir_all(&control)
        .with_context(|| format!("create {}", control.display()))?;
    std::fs::write(
        control.join("packages"),
        "# Packages this project requires, one per line: name or name@expression.\n",
    )
    .context("write packages file")?;

    let pin = match release_id {
        Some(id) => PinState::Pinned(id),
        None => PinState::Unpinned,
    };
    release::write_pin(&cwd, &pin)?;
    identity::ensure(&cwd)?;
    // A fresh project needs none of the historical migrations.
    upgrades::mark_all(&cwd)?;

    eprintln!("initialized keel project at {}", cwd.display());
    Ok(())
}

fn cmd_add(cwd: PathBuf, rest: &[String]) -> anyhow::Result<()> {
    let mut force = false;
    let mut specs = Vec::new();
    for arg in rest {
        if arg == "--force" {
            force = true;
        } else {
            specs.push(arg.clone());
        }
    }
    if specs.is_empty() {
        bail!("expected at least one package name");
    }
    let root = find_project_root(cwd).context("not a keel project (run `keel init` first)")?;

    with_env(&root, |env| {
        let mut skip = BTreeSet::new();
        for spec in &specs {
            let Some((name, _)) = split_entry(&strip_comment(spec)) else {
                bail!("invalid package spec: {}", spec);
            };
            if !force && !env.store.contains(&name) {
                let names = env.store.package_names();
                if let Some(best) = best_name_match(&name, &names) {
                    bail!(
                        "unknown package {}\nhelp: did you mean \"{}\"?",
                        name,
                        best
                    );
                }
                bail!("unknown package {}", name);
            }
            skip.insert(name);
        }

        let mut state = ProjectState::bind(root.clone())?;
        state.add_constraints(&specs)?;
        let out = sync_and_report(&mut state, env, false, &skip)?;
        for name in &skip {
            match out.versions.get(name) {
                Some(version) => eprintln!("  added {} at {}", name, version),
                None => eprintln!("  {} is recorded but not part of the solution", name),
            }
        }
        Ok(())
    })
}

fn cmd_remove(cwd: PathBuf, rest: &[String]) -> anyhow::Result<()> {
    if rest.is_empty() {
        bail!("expected at least one package name");
    }
    let names = rest.to_vec();
    let root = find_project_root(cwd).context("not a keel project (run `keel init` first)")?;

    with_env(&root, |env| {
        let mut state = ProjectState::bind(root.clone())?;
        for name in &names {
            if !state.constraints().contains_key(name) {
                eprintln!("  {} was not a required package", name);
            }
        }
        let skip: BTreeSet<String> = names.iter().cloned().collect();
        state.remove_constraints(&names)?;
        let out = sync_and_report(&mut state, env, false, &skip)?;
        for name in &names {
            if !out.versions.contains_key(name) {
                eprintln!("  removed {}", name);
            }
        }
        Ok(())
    })
}

fn cmd_sync(cwd: PathBuf, rest: &[String]) -> anyhow::Result<()> {
    let mut force = false;
    for arg in rest {
        match arg.as_str() {
            "--force" => force = true,
            other => bail!("unknown argument: {}", other),
        }
    }
    let root = find_project_root(cwd).context("not a keel project (run `keel init` first)")?;

    with_env(&root, |env| {
        let mut state = ProjectState::bind(root.clone())?;
        let out = sync_and_report(&mut state, env, force, &BTreeSet::new())?;
        if out.previous == out.versions {
            eprintln!("dependencies up to date");
        }
        if out.written {
            eprintln!("wrote .keel/versions");
        }
        Ok(())
    })
}

fn cmd_status(cwd: PathBuf, rest: &[String]) -> anyhow::Result<()> {
    if !rest.is_empty() {
        bail!("unknown argument: {}", rest[0]);
    }
    let root = find_project_root(cwd).context("not a keel project (run `keel init` first)")?;

    let constraints = ConstraintFile::load(&root.join(".keel").join("packages"))?;
    let versions = ledger::read(&root.join(".keel").join("versions"))?;
    let pin = release::read_pin(&root)?;
    let pending = upgrades::pending(&root)?;

    eprintln!("project: {}", root.display());
    match pin {
        PinState::NoFile => eprintln!("release: (no release file)"),
        PinState::Unpinned => eprintln!("release: none"),
        PinState::Pinned(id) => eprintln!("release: {}", id),
    }
    eprintln!("constraints:");
    if constraints.entries.is_empty() {
        eprintln!("  (none)");
    }
    for (name, c) in &constraints.entries {
        match &c.expression {
            Some(expr) => eprintln!("  {} @ {}", name, expr),
            None => eprintln!("  {} (any)", name),
        }
    }
    eprintln!("versions:");
    if versions.is_empty() {
        eprintln!("  (none)");
    }
    for (name, version) in &versions {
        eprintln!("  {}@{}", name, version);
    }
    if !pending.is_empty() {
        eprintln!("pending upgraders:");
        for id in pending {
            eprintln!("  {}", id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{best_name_match, find_project_root};
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
    fn project_root_is_found_from_nested_directories() {
        let root = temp_dir("root");
        fs::create_dir_all(root.join(".keel")).expect("mkdir .keel");
        let nested = root.join("src").join("deep");
        fs::create_dir_all(&nested).expect("mkdir nested");

        let found = find_project_root(nested).expect("found");
        assert_eq!(
            found.canonicalize().expect("canon"),
            root.canonicalize().expect("canon")
        );
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn close_names_are_suggested_distant_ones_are_not() {
        let names = vec!["logging".to_string(), "router".to_string()];
        assert_eq!(best_name_match("loging", &names), Some("logging"));
        assert_eq!(best_name_match("zzz", &names), None);
    }
}
