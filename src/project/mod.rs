// Purpose: Project-state module root for constraint, ledger, and recompute components.
// Inputs/Outputs: Re-exports the dependency-state workflow used by the CLI and embedders.
// Invariants: All mutation of .keel files goes through these modules' write paths.
// Gotchas: Keep the collaborator seams in env.rs; nothing here may call a catalog directly.

pub mod constraints;
pub mod env;
pub mod identity;
pub mod ledger;
pub mod programs;
pub mod release;
pub mod report;
pub mod state;
pub mod upgrades;
