// Purpose: Materialize package builds from a catalog into the local build cache.
// Inputs/Outputs: Fetches version lists, build archives, and release manifests.
// Invariants: Cache writes finalize via tmp+rename so partial extracts are never visible.
// Gotchas: Archive entry paths are untrusted; sanitize before touching the filesystem.

use anyhow::{Context, bail};
use directories::ProjectDirs;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use zip::ZipArchive;

use crate::lines::data_lines;
use crate::project::env::{PackageStore, ReleaseContext, ReleaseInfo};
use crate::project::release::{PinState, ReleaseManifest, UNPINNED_MARKER};

pub fn cache_root() -> anyhow::Result<PathBuf> {
    if let Ok(p) = std::env::var("KEEL_CACHE_DIR") {
        return Ok(PathBuf::from(p));
    }
    let pd =
        ProjectDirs::from("dev", "keel", "keel").context("cannot determine OS cache directory")?;
    Ok(pd.cache_dir().to_path_buf())
}

pub fn ensure_dir(p: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(p)?;
    Ok(())
}

pub fn escape_package(name: &str) -> String {
    name.replace(['/', '\\', ':'], "!")
}

pub struct CacheLock {
    _file: File,
}

impl CacheLock {
    pub fn acquire(root: &Path) -> anyhow::Result<Self> {
        ensure_dir(root)?;
        let lock_path = root.join("cache.lock");
        let f = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;
        f.lock_exclusive()?;
        Ok(Self { _file: f })
    }
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for ent in fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))? {
        let ent = ent?;
        let p = ent.path();
        if p.is_dir() {
            collect_files(base, &p, out)?;
        } else if p.is_file() {
            let rel = p
                .strip_prefix(base)
                .with_context(|| format!("strip_prefix {}", p.display()))?
                .to_path_buf();
            out.push(rel);
        }
    }
    Ok(())
}

pub fn dir_checksum_sha256(dir: &Path) -> anyhow::Result<String> {
    let mut files = Vec::<PathBuf>::new();
    collect_files(dir, dir, &mut files)?;
    files.sort_by_key(|p| p.to_string_lossy().replace('\\', "/"));

    let mut hasher = Sha256::new();
    for rel in files {
        let rel_norm = rel.to_string_lossy().replace('\\', "/");
        hasher.update(b"F\0");
        hasher.update(rel_norm.as_bytes());
        hasher.update(b"\0");

        let mut f = File::open(dir.join(&rel))
            .with_context(|| format!("open {}", dir.join(&rel).display()))?;
        let mut buf = [0u8; 8192];
        loop {
            let n = f.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

fn safe_rel_path(p: &Path) -> anyhow::Result<PathBuf> {
    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::Normal(seg) => out.push(seg),
            Component::CurDir => {}
            Component::Prefix(_) | Component::RootDir | Component::ParentDir => {
                bail!("unsafe path in archive entry: {}", p.display())
            }
        }
    }
    Ok(out)
}

fn unzip_build(bytes: &[u8], dst: &Path) -> anyhow::Result<()> {
    ensure_dir(dst)?;
    let cursor = Cursor::new(bytes.to_vec());
    let mut zip = ZipArchive::new(cursor).context("invalid build archive")?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let raw = PathBuf::from(entry.name());
        let rel = safe_rel_path(&raw)?;
        let out = dst.join(rel);
        if entry.is_dir() {
            ensure_dir(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            ensure_dir(parent)?;
        }
        let mut f = File::create(&out).with_context(|| format!("create {}", out.display()))?;
        std::io::copy(&mut entry, &mut f)?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
enum CatalogBase {
    Dir(PathBuf),
    Http(String),
}

/// A package catalog reachable either as a directory tree or over HTTP.
/// Layout: `<base>/<package>/versions`, `<base>/<package>/<version>/<arch>.zip`,
/// `<base>/releases/<id>.json`.
pub struct Catalog {
    base: CatalogBase,
    cache: PathBuf,
}

impl Catalog {
    pub fn open(base: &str) -> anyhow::Result<Self> {
        Self::with_cache(base, cache_root()?)
    }

    pub fn with_cache(base: &str, cache: PathBuf) -> anyhow::Result<Self> {
        let base = if base.starts_with("http://") || base.starts_with("https://") {
            CatalogBase::Http(base.trim_end_matches('/').to_string())
        } else if let Some(rest) = base.strip_prefix("file://") {
            CatalogBase::Dir(PathBuf::from(rest))
        } else {
            CatalogBase::Dir(PathBuf::from(base))
        };
        ensure_dir(&cache)?;
        Ok(Self { base, cache })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let base = std::env::var("KEEL_CATALOG")
            .context("KEEL_CATALOG is not set (point it at a catalog directory or URL)")?;
        Self::open(&base)
    }

    fn read_text(&self, rel: &str) -> anyhow::Result<String> {
        match &self.base {
            CatalogBase::Dir(dir) => {
                let p = dir.join(rel);
                fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))
            }
            CatalogBase::Http(base) => {
                let url = format!("{}/{}", base, rel);
                let resp = ureq::get(&url)
                    .call()
                    .map_err(|e| anyhow::anyhow!("http GET {} failed: {}", url, e))?;
                let mut body = String::new();
                resp.into_reader().read_to_string(&mut body)?;
                Ok(body)
            }
        }
    }

    fn read_bytes(&self, rel: &str) -> anyhow::Result<Vec<u8>> {
        match &self.base {
            CatalogBase::Dir(dir) => {
                let p = dir.join(rel);
                fs::read(&p).with_context(|| format!("read {}", p.display()))
            }
            CatalogBase::Http(base) => {
                let url = format!("{}/{}", base, rel);
                let resp = ureq::get(&url)
                    .call()
                    .map_err(|e| anyhow::anyhow!("http GET {} failed: {}", url, e))?;
                let mut buf = Vec::new();
                resp.into_reader().read_to_end(&mut buf)?;
                Ok(buf)
            }
        }
    }

    pub fn release(&self, id: &str) -> anyhow::Result<ReleaseManifest> {
        let text = self
            .read_text(&format!("releases/{}.json", id))
            .with_context(|| format!("fetch release manifest for {}", id))?;
        ReleaseManifest::parse(&text)
    }

    fn ensure_build(
        &self,
        builds: &Path,
        package: &str,
        version: &str,
        arch: &str,
    ) -> anyhow::Result<()> {
        let slot = builds.join(format!("{}@{}", escape_package(package), version));
        ensure_dir(&slot)?;
        let dst = slot.join(arch);
        let sum_path = slot.join(format!("{}.sha256", arch));

        if dst.exists() {
            let expected = fs::read_to_string(&sum_path)
                .with_context(|| format!("read {}", sum_path.display()))?;
            let computed = dir_checksum_sha256(&dst)?;
            if expected.trim() != computed {
                bail!(
                    "checksum mismatch for cached build {}@{} ({})",
                    package,
                    version,
                    arch
                );
            }
            return Ok(());
        }

        let rel = format!("{}/{}/{}.zip", package, version, arch);
        log::debug!("fetching build {}", rel);
        let bytes = self
            .read_bytes(&rel)
            .with_context(|| format!("fetch build {}@{} for {}", package, version, arch))?;

        let tmp = slot.join(format!("{}.tmp", arch));
        if tmp.exists() {
            fs::remove_dir_all(&tmp).ok();
        }
        unzip_build(&bytes, &tmp)?;
        let sum = dir_checksum_sha256(&tmp)?;
        fs::rename(&tmp, &dst).with_context(|| format!("finalize {}", dst.display()))?;
        fs::write(&sum_path, &sum).with_context(|| format!("write {}", sum_path.display()))?;
        Ok(())
    }
}

fn list_subdirs(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for ent in fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))? {
        let ent = ent?;
        let p = ent.path();
        if p.is_dir()
            && let Some(name) = p.file_name().and_then(|s| s.to_str())
        {
            out.push(name.to_string());
        }
    }
    out.sort();
    Ok(out)
}

impl PackageStore for Catalog {
    fn contains(&self, package: &str) -> bool {
        match &self.base {
            CatalogBase::Dir(dir) => dir.join(package).join("versions").exists(),
            CatalogBase::Http(_) => self
                .read_text(&format!("{}/versions", package))
                .map(|t| !data_lines(&t).is_empty())
                .unwrap_or(false),
        }
    }

    fn package_names(&self) -> Vec<String> {
        match &self.base {
            CatalogBase::Dir(dir) => list_subdirs(dir)
                .unwrap_or_default()
                .into_iter()
                .filter(|n| n != "releases")
                .collect(),
            // No listing endpoint over HTTP.
            CatalogBase::Http(_) => vec![],
        }
    }

    fn versions(&self, package: &str) -> anyhow::Result<Vec<String>> {
        let text = self
            .read_text(&format!("{}/versions", package))
            .with_context(|| format!("list versions of {}", package))?;
        Ok(data_lines(&text))
    }

    fn ensure_available(
        &self,
        package: &str,
        version: &str,
        arches: &[&str],
    ) -> anyhow::Result<()> {
        let builds = self.cache.join("builds");
        ensure_dir(&builds)?;
        let _guard = CacheLock::acquire(&self.cache)?;
        for arch in arches {
            self.ensure_build(&builds, package, version, arch)?;
        }
        Ok(())
    }
}

/// Release context backed by a catalog's release manifests. An unpinned
/// project gets a nameless tracking release with no package manifest; a
/// project with no release file at all has no context and cannot resolve.
pub struct CatalogRelease {
    info: Option<ReleaseInfo>,
}

impl CatalogRelease {
    pub fn load(catalog: &Catalog, pin: &PinState) -> anyhow::Result<Self> {
        let info = match pin {
            PinState::Pinned(id) => Some(catalog.release(id)?.into_info()),
            PinState::Unpinned => Some(ReleaseInfo {
                name: UNPINNED_MARKER.to_string(),
                is_proper_release: false,
                packages: None,
            }),
            PinState::NoFile => None,
        };
        Ok(Self { info })
    }
}

impl ReleaseContext for CatalogRelease {
    fn current(&self) -> Option<ReleaseInfo> {
        self.info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{Catalog, dir_checksum_sha256, escape_package};
    use crate::project::env::PackageStore;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};
    use zip::write::SimpleFileOptions;

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

    fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::<u8>::new()));
        let opts = SimpleFileOptions::default();
        for (name, content) in files {
            zip.start_file(*name, opts).expect("start entry");
            zip.write_all(content).expect("write entry");
        }
        zip.finish().expect("finish zip").into_inner()
    }

    fn catalog_with_build(base: &PathBuf, package: &str, version: &str, arch: &str) {
        let pkg_dir = base.join(package);
        fs::create_dir_all(pkg_dir.join(version)).expect("mkdir package");
        fs::write(pkg_dir.join("versions"), format!("{}\n", version)).expect("write versions");
        let bytes = build_zip(&[("lib/main.js", b"exports.ok = true;\n")]);
        fs::write(pkg_dir.join(version).join(format!("{}.zip", arch)), bytes)
            .expect("write archive");
    }

    #[test]
    fn materializes_a_build_from_a_directory_catalog() {
        let base = temp_dir("catalog");
        let cache = temp_dir("cache");
        catalog_with_build(&base, "alpha", "1.2.0", "web");

        let catalog =
            Catalog::with_cache(base.to_str().expect("utf8 base"), cache.clone()).expect("open");
        catalog
            .ensure_available("alpha", "1.2.0", &["web"])
            .expect("materialize");

        let build = cache.join("builds").join("alpha@1.2.0").join("web");
        assert!(build.join("lib").join("main.js").exists());

        // Second call verifies the recorded checksum instead of refetching.
        catalog
            .ensure_available("alpha", "1.2.0", &["web"])
            .expect("verify cached");

        let _ = fs::remove_dir_all(base);
        let _ = fs::remove_dir_all(cache);
    }

    #[test]
    fn tampered_cached_build_fails_the_checksum() {
        let base = temp_dir("catalog-tamper");
        let cache = temp_dir("cache-tamper");
        catalog_with_build(&base, "alpha", "1.2.0", "web");

        let catalog =
            Catalog::with_cache(base.to_str().expect("utf8 base"), cache.clone()).expect("open");
        catalog
            .ensure_available("alpha", "1.2.0", &["web"])
            .expect("materialize");

        let build = cache.join("builds").join("alpha@1.2.0").join("web");
        fs::write(build.join("lib").join("main.js"), "tampered").expect("tamper");
        assert!(catalog.ensure_available("alpha", "1.2.0", &["web"]).is_err());

        let _ = fs::remove_dir_all(base);
        let _ = fs::remove_dir_all(cache);
    }

    #[test]
    fn rejects_archives_with_escaping_paths() {
        let base = temp_dir("catalog-escape");
        let cache = temp_dir("cache-escape");
        let pkg_dir = base.join("evil");
        fs::create_dir_all(pkg_dir.join("1.0.0")).expect("mkdir");
        fs::write(pkg_dir.join("versions"), "1.0.0\n").expect("versions");
        let bytes = build_zip(&[("../outside.txt", b"nope")]);
        fs::write(pkg_dir.join("1.0.0").join("web.zip"), bytes).expect("archive");

        let catalog =
            Catalog::with_cache(base.to_str().expect("utf8 base"), cache.clone()).expect("open");
        assert!(catalog.ensure_available("evil", "1.0.0", &["web"]).is_err());

        let _ = fs::remove_dir_all(base);
        let _ = fs::remove_dir_all(cache);
    }

    #[test]
    fn version_lists_and_membership_come_from_the_list_file() {
        let base = temp_dir("catalog-list");
        let cache = temp_dir("cache-list");
        catalog_with_build(&base, "alpha", "1.2.0", "web");

        let catalog =
            Catalog::with_cache(base.to_str().expect("utf8 base"), cache.clone()).expect("open");
        assert!(catalog.contains("alpha"));
        assert!(!catalog.contains("beta"));
        assert_eq!(catalog.versions("alpha").expect("versions"), vec!["1.2.0"]);
        assert_eq!(catalog.package_names(), vec!["alpha"]);

        let _ = fs::remove_dir_all(base);
        let _ = fs::remove_dir_all(cache);
    }

    #[test]
    fn checksum_tracks_content_and_escape_is_filesystem_safe() {
        let root = temp_dir("checksum");
        fs::write(root.join("a.txt"), "hello").expect("write");
        let c1 = dir_checksum_sha256(&root).expect("checksum #1");
        let c2 = dir_checksum_sha256(&root).expect("checksum #2");
        assert_eq!(c1, c2);
        fs::write(root.join("a.txt"), "HELLO").expect("rewrite");
        assert_ne!(c1, dir_checksum_sha256(&root).expect("checksum #3"));

        assert_eq!(escape_package("acme:ui/web"), "acme!ui!web");
        let _ = fs::remove_dir_all(root);
    }
}
