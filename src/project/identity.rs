use anyhow::{Context, bail};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

fn id_path(root: &Path) -> PathBuf {
    root.join(".keel").join("app-id")
}

/// Returns the project's opaque identifier, generating and persisting one on
/// first use. The identifier is immutable once written. If the file is still
/// unreadable after a write attempt the filesystem is inconsistent and the
/// error is fatal.
pub fn ensure(root: &Path) -> anyhow::Result<String> {
    let path = id_path(root);
    if !path.exists() {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let token = format!(
            "{}{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );
        fs::write(&path, &token).with_context(|| format!("write {}", path.display()))?;
    }
    match fs::read_to_string(&path) {
        Ok(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => bail!(
            "app identifier missing at {} after write; refusing to continue",
            path.display()
        ),
    }
}
