// Purpose: Own the project's dependency state and its Fresh/Stale recompute machine.
// Inputs/Outputs: Combines constraint sources, drives resolver/store, commits the ledger.
// Invariants: A recompute is all-or-nothing; partial materialization never becomes visible.
// Gotchas: The ledger on disk always reflects the last committed set, never an in-flight one.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::project::constraints::{ConstraintFile, ConstraintSet};
use crate::project::env::{
    Constraint, Env, ReleaseInfo, ResolveError, ResolveOptions, ResolvedVersions, WEB_ARCH,
    host_arch,
};
use crate::project::identity;
use crate::project::ledger;
use crate::project::release::{self, PinState};

/// The mandatory control package: whenever the catalog exposes a package by
/// this name, every project implicitly depends on it.
pub const CONTROL_PACKAGE: &str = "ctl";

pub const PROGRAMS_DIR: &str = "programs";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Handed to downstream package loading; regenerated on every commit so
/// holders of a stale generation can tell their view is out of date.
#[derive(Debug, Clone)]
pub struct LoaderHandle {
    pub root: PathBuf,
    pub generation: u64,
    versions: ResolvedVersions,
}

impl LoaderHandle {
    pub fn version_of(&self, package: &str) -> Option<&str> {
        self.versions.get(package).map(String::as_str)
    }

    pub fn packages(&self) -> impl Iterator<Item = (&str, &str)> {
        self.versions
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no active release context; cannot recompute dependency state")]
    ContextMissing,
    #[error("constraint resolution failed: {0}")]
    Resolution(String),
    #[error("{} of {} resolved packages could not be materialized", .missing.len(), .requested)]
    MaterializationShortfall {
        requested: usize,
        downloaded: ResolvedVersions,
        missing: Vec<String>,
    },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

#[derive(Debug)]
pub struct SyncOutcome {
    pub previous: ResolvedVersions,
    pub versions: ResolvedVersions,
    pub downloaded: ResolvedVersions,
    /// Whether the version ledger file was rewritten.
    pub written: bool,
}

/// The aggregate dependency state of one project root. Singleton per root in
/// practice, but an explicit value so tests and embedders can hold several.
pub struct ProjectState {
    root: PathBuf,
    constraints: ConstraintFile,
    combined: Option<Vec<Constraint>>,
    resolved: Option<ResolvedVersions>,
    loader: Option<LoaderHandle>,
    app_id: String,
    generation: u64,
    freshness: Freshness,
    viable_as_seed: bool,
}

impl ProjectState {
    /// Binds a project root: constraints and any prior committed versions
    /// are loaded eagerly, the app identifier is ensured, and the state
    /// starts out stale. Binding a different root means building a fresh
    /// value and dropping this one.
    pub fn bind(root: PathBuf) -> anyhow::Result<Self> {
        let constraints = ConstraintFile::load(&root.join(".keel").join("packages"))?;
        let prior = ledger::read(&root.join(".keel").join("versions"))?;
        let app_id = identity::ensure(&root)?;
        Ok(Self {
            root,
            constraints,
            combined: None,
            resolved: if prior.is_empty() { None } else { Some(prior) },
            loader: None,
            app_id,
            generation: 0,
            freshness: Freshness::Stale,
            viable_as_seed: true,
        })
    }

    /// Replaces this state with one bound to `root`. The old state is
    /// discarded wholesale; nothing carries over between roots.
    pub fn rebind(self, root: PathBuf) -> anyhow::Result<Self> {
        drop(self);
        Self::bind(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    /// Whether this project's lock state may be fed to a resolver as a prior
    /// solution. False only while a recompute is in flight.
    pub fn viable_as_seed(&self) -> bool {
        self.viable_as_seed
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints.entries
    }

    /// The last committed version set, if any. Does not trigger a recompute.
    pub fn current_versions(&self) -> Option<&ResolvedVersions> {
        self.resolved.as_ref()
    }

    fn packages_path(&self) -> PathBuf {
        self.root.join(".keel").join("packages")
    }

    fn versions_path(&self) -> PathBuf {
        self.root.join(".keel").join("versions")
    }

    fn invalidate(&mut self) {
        self.freshness = Freshness::Stale;
        self.combined = None;
    }

    pub fn add_constraints(&mut self, specs: &[String]) -> anyhow::Result<()> {
        if self.constraints.add_force(&self.packages_path(), specs)? {
            self.invalidate();
        }
        Ok(())
    }

    pub fn remove_constraints(&mut self, names: &[String]) -> anyhow::Result<()> {
        if self.constraints.remove_force(&self.packages_path(), names)? {
            self.invalidate();
        }
        Ok(())
    }

    /// The full constraint list fed to the resolver, recomputed lazily after
    /// any invalidation. Pure with respect to this state: reading constraint
    /// sources aside, it has no side effects.
    pub fn combined_constraints(&mut self, env: &Env) -> Result<&[Constraint], SyncError> {
        if self.combined.is_none() {
            let release = env.release.current().ok_or(SyncError::ContextMissing)?;
            let combined = self.combine(env, &release).map_err(SyncError::Io)?;
            self.combined = Some(combined);
        }
        Ok(self.combined.as_deref().expect("combined just computed"))
    }

    fn combine(&self, env: &Env, release: &ReleaseInfo) -> anyhow::Result<Vec<Constraint>> {
        let mut combined: Vec<Constraint> = self.constraints.entries.values().cloned().collect();

        for program in env.programs.discover(&self.root.join(PROGRAMS_DIR))? {
            combined.extend(program.dependencies);
        }

        // A release without a package manifest contributes nothing.
        if let Some(packages) = &release.packages {
            for (package, version) in packages {
                combined.push(Constraint::weak_exact(package, version));
            }
        }

        if env.store.contains(CONTROL_PACKAGE)
            && !self.constraints.entries.contains_key(CONTROL_PACKAGE)
        {
            combined.push(Constraint::loose(CONTROL_PACKAGE, None));
        }

        Ok(combined)
    }

    // Precondition: A release context must be available from `env`.
    // Postcondition: On Ok the state is Fresh and the ledger matches the returned versions.
    // Side effects: May call the resolver, materialize builds, and rewrite `.keel/versions`.
    pub fn ensure_up_to_date(&mut self, env: &Env, force: bool) -> Result<SyncOutcome, SyncError> {
        if self.freshness == Freshness::Fresh && !force {
            let versions = self.resolved.clone().unwrap_or_default();
            return Ok(SyncOutcome {
                previous: versions.clone(),
                versions,
                downloaded: ResolvedVersions::new(),
                written: false,
            });
        }

        // The project's own lock file is not authoritative while it is
        // itself being recomputed.
        self.viable_as_seed = false;
        let out = self.recompute(env, force);
        self.viable_as_seed = true;
        if out.is_ok() {
            self.freshness = Freshness::Fresh;
        }
        out
    }

    fn recompute(&mut self, env: &Env, force: bool) -> Result<SyncOutcome, SyncError> {
        let release = env.release.current().ok_or(SyncError::ContextMissing)?;

        let combined = self.combine(env, &release).map_err(SyncError::Io)?;

        let opts = ResolveOptions {
            ignore_project_as_seed: true,
        };
        let chosen = env
            .resolver
            .resolve(&combined, self.resolved.as_ref(), &opts)
            .map_err(|e| match e {
                ResolveError::Unsatisfiable(msg) => SyncError::Resolution(msg),
                ResolveError::Other(err) => SyncError::Io(err),
            })?;

        let host = host_arch();
        let arches = [host.as_str(), WEB_ARCH];
        let mut downloaded = ResolvedVersions::new();
        let mut missing = Vec::new();
        for (package, version) in &chosen {
            match env.store.ensure_available(package, version, &arches) {
                Ok(()) => {
                    downloaded.insert(package.clone(), version.clone());
                }
                Err(err) => {
                    log::warn!("failed to materialize {}@{}: {:#}", package, version, err);
                    missing.push(package.clone());
                }
            }
        }
        if downloaded.len() != chosen.len() {
            return Err(SyncError::MaterializationShortfall {
                requested: chosen.len(),
                downloaded,
                missing,
            });
        }

        let previous = self.resolved.clone().unwrap_or_default();
        let changed = previous != chosen;
        let mut written = false;
        if changed || force {
            let pinned = matches!(
                release::read_pin(&self.root).map_err(SyncError::Io)?,
                PinState::Pinned(_)
            );
            written = ledger::write(&self.versions_path(), &chosen, pinned, force)
                .map_err(SyncError::Io)?;
        }

        self.resolved = Some(chosen.clone());
        self.combined = Some(combined);
        self.generation += 1;
        self.loader = Some(LoaderHandle {
            root: self.root.clone(),
            generation: self.generation,
            versions: chosen.clone(),
        });

        Ok(SyncOutcome {
            previous,
            versions: chosen,
            downloaded,
            written,
        })
    }

    /// Lazily recomputes if needed, then returns the resolved version set.
    pub fn resolved_versions(&mut self, env: &Env) -> Result<&ResolvedVersions, SyncError> {
        self.ensure_up_to_date(env, false)?;
        Ok(self.resolved.as_ref().expect("resolved after sync"))
    }

    /// Lazily recomputes if needed, then returns the loader handle for the
    /// committed version set.
    pub fn loader(&mut self, env: &Env) -> Result<&LoaderHandle, SyncError> {
        self.ensure_up_to_date(env, false)?;
        if self.loader.is_none() {
            // Fresh state restored from disk without a recompute this run.
            self.generation += 1;
            self.loader = Some(LoaderHandle {
                root: self.root.clone(),
                generation: self.generation,
                versions: self.resolved.clone().unwrap_or_default(),
            });
        }
        Ok(self.loader.as_ref().expect("loader just set"))
    }
}
