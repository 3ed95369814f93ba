use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::lines::strip_comment;
use crate::project::env::{ReleaseInfo, ResolvedVersions};

/// First data line of `.keel/release` meaning "tracking, not pinned".
pub const UNPINNED_MARKER: &str = "none";

/// A missing release file is a distinct state from an explicit `none` line:
/// the former predates release pinning entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinState {
    NoFile,
    Unpinned,
    Pinned(String),
}

fn pin_path(root: &Path) -> PathBuf {
    root.join(".keel").join("release")
}

pub fn read_pin(root: &Path) -> anyhow::Result<PinState> {
    let path = pin_path(root);
    if !path.exists() {
        return Ok(PinState::NoFile);
    }
    let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    for line in text.lines() {
        let data = strip_comment(line);
        if data.is_empty() {
            continue;
        }
        if data == UNPINNED_MARKER {
            return Ok(PinState::Unpinned);
        }
        return Ok(PinState::Pinned(data));
    }
    Ok(PinState::Unpinned)
}

pub fn write_pin(root: &Path, pin: &PinState) -> anyhow::Result<()> {
    let path = pin_path(root);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let line = match pin {
        PinState::NoFile => return Ok(()),
        PinState::Unpinned => UNPINNED_MARKER,
        PinState::Pinned(id) => id.as_str(),
    };
    fs::write(&path, format!("{}\n", line)).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// A release descriptor as published in a catalog, e.g.
/// `releases/keel-1.2.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseManifest {
    pub release: String,
    #[serde(default = "default_proper")]
    pub proper: bool,
    #[serde(default)]
    pub packages: Option<ResolvedVersions>,
}

fn default_proper() -> bool {
    true
}

impl ReleaseManifest {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("invalid release manifest")
    }

    pub fn into_info(self) -> ReleaseInfo {
        ReleaseInfo {
            name: self.release,
            is_proper_release: self.proper,
            packages: self.packages,
        }
    }
}
