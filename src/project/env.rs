// Purpose: Define the dependency data model and the collaborator seams of the coordinator.
// Inputs/Outputs: Constraint/version types plus resolver, store, release, and program traits.
// Invariants: The core only talks to external machinery through these interfaces.
// Gotchas: Weak constraints must never force a package into the solution on their own.

use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Concrete versions chosen by a successful resolve, keyed by package name.
pub type ResolvedVersions = BTreeMap<String, String>;

/// The fixed secondary architecture every package build is materialized for,
/// alongside the host architecture.
pub const WEB_ARCH: &str = "web";

pub fn host_arch() -> String {
    format!("os.{}.{}", std::env::consts::OS, std::env::consts::ARCH)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exactness {
    Loose,
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub package: String,
    /// `None` means unconstrained.
    pub expression: Option<String>,
    pub weak: bool,
    pub exactness: Exactness,
}

impl Constraint {
    pub fn loose(package: &str, expression: Option<String>) -> Self {
        Self {
            package: package.to_string(),
            expression,
            weak: false,
            exactness: Exactness::Loose,
        }
    }

    /// A release-supplied constraint: pins an exact version, but only for
    /// packages the solution includes for some other reason.
    pub fn weak_exact(package: &str, version: &str) -> Self {
        Self {
            package: package.to_string(),
            expression: Some(version.to_string()),
            weak: true,
            exactness: Exactness::Exact,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// When set, the resolver must not treat this project's own lock state
    /// as a candidate solution source; the previous solution passed in is a
    /// hint only.
    pub ignore_project_as_seed: bool,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unsatisfiable constraints: {0}")]
    Unsatisfiable(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub trait Resolver {
    fn resolve(
        &self,
        constraints: &[Constraint],
        previous: Option<&ResolvedVersions>,
        opts: &ResolveOptions,
    ) -> Result<ResolvedVersions, ResolveError>;
}

pub trait PackageStore {
    fn contains(&self, package: &str) -> bool;
    /// Known package names, for suggestions. May be empty for backends that
    /// cannot enumerate.
    fn package_names(&self) -> Vec<String>;
    fn versions(&self, package: &str) -> anyhow::Result<Vec<String>>;
    /// Ensures a build of `package@version` exists on disk for every listed
    /// architecture.
    fn ensure_available(&self, package: &str, version: &str, arches: &[&str])
    -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ReleaseInfo {
    pub name: String,
    pub is_proper_release: bool,
    /// The release's package manifest; `None` when the release carries none.
    pub packages: Option<ResolvedVersions>,
}

pub trait ReleaseContext {
    fn current(&self) -> Option<ReleaseInfo>;
}

#[derive(Debug, Clone)]
pub struct ProgramInfo {
    pub name: String,
    pub dependencies: Vec<Constraint>,
}

pub trait ProgramSource {
    fn discover(&self, programs_dir: &Path) -> anyhow::Result<Vec<ProgramInfo>>;
}

/// The collaborator bundle handed to the state manager. Always passed by
/// reference; there is no ambient global equivalent.
pub struct Env<'a> {
    pub resolver: &'a dyn Resolver,
    pub store: &'a dyn PackageStore,
    pub release: &'a dyn ReleaseContext,
    pub programs: &'a dyn ProgramSource,
}
