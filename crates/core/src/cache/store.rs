//! Cache directory layout, atomic writes and expiry sweeps.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use walkdir::WalkDir;

use super::hash::checksum_dirs;
use crate::Error;
use crate::config::{CompressorConfig, ConfigError};

const TEMP_PREFIX: &str = ".htmlc-";
const TEMP_SUFFIX: &str = ".tmp";

/// Public artifacts outlive their manifests by this margin.
const PUBLIC_GRACE: Duration = Duration::from_secs(3_600);

const HTACCESS_DENY: &str = "<IfModule authz_core_module>\n\tRequire all denied\n</IfModule>\n<IfModule !authz_core_module>\n\tdeny from all\n</IfModule>";

const HTACCESS_ALLOW: &str = "<IfModule authz_core_module>\n\tRequire all granted\n</IfModule>\n<IfModule !authz_core_module>\n\tallow from all\n</IfModule>\n\n<IfModule headers_module>\n\t<FilesMatch \"\\.(html|js|css)$\">\n\t\tHeader append Vary: Accept-Encoding\n\t</FilesMatch>\n</IfModule>";

/// Which of the two cache trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDirType {
    Public,
    Private,
}

/// Asset language, which decides file suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Css,
    Js,
}

impl AssetKind {
    pub fn ext(self) -> &'static str {
        match self {
            AssetKind::Css => "css",
            AssetKind::Js => "js",
        }
    }

    fn artifact_name(self, code_hash: &str) -> String {
        format!("{code_hash}-compressor-part.{}", self.ext())
    }

    fn manifest_name(self, key: &str) -> String {
        format!("{key}-compressor-parts.{}-cache", self.ext())
    }
}

/// Resolved cache locations for one host.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub public_dir: PathBuf,
    pub private_dir: PathBuf,
    /// URL base of `public_dir`, without a trailing slash.
    pub public_url: String,
    pub host: String,
    /// Manifest validity window.
    pub expiration: Duration,
}

impl CacheSettings {
    /// Read cache locations from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` when a directory or the public URL base
    /// is missing, or the expiration window cannot be parsed.
    pub fn from_config(config: &CompressorConfig, host: &str) -> Result<Self, Error> {
        fn missing(field: &str) -> Error {
            ConfigError::Missing { field: field.into(), hint: format!("Set HTMLC_{} environment variable", field.to_uppercase()) }.into()
        }

        let public_dir = config.cache_dir_public.clone().ok_or_else(|| missing("cache_dir_public"))?;
        let private_dir = config.cache_dir_private.clone().ok_or_else(|| missing("cache_dir_private"))?;
        let public_url = config
            .cache_dir_url_public
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .ok_or_else(|| missing("cache_dir_url_public"))?
            .to_string();

        Ok(Self { public_dir, private_dir, public_url, host: host.to_string(), expiration: config.cache_expiration()? })
    }
}

/// Outcome of one cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub artifacts_removed: usize,
    pub manifests_removed: usize,
    pub temp_files_removed: usize,
}

/// Content-addressed store over the public and private cache trees.
#[derive(Debug, Clone)]
pub struct CacheStore {
    settings: CacheSettings,
    host_slug: String,
}

impl CacheStore {
    pub fn new(settings: CacheSettings) -> Self {
        let host_slug = host_slug(&settings.host);
        Self { settings, host_slug }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    fn base_dir(&self, ty: CacheDirType) -> &Path {
        match ty {
            CacheDirType::Public => &self.settings.public_dir,
            CacheDirType::Private => &self.settings.private_dir,
        }
    }

    /// Host directory under a tree, without checksum nesting and without creating it.
    pub fn host_dir(&self, ty: CacheDirType) -> PathBuf {
        self.base_dir(ty).join(&self.host_slug)
    }

    /// Get (and possibly create) the nested cache dir for a checksum.
    ///
    /// The base directory receives an access marker the first time it is used.
    ///
    /// # Errors
    ///
    /// Returns `Error::CacheWrite` if the directory or marker cannot be created.
    pub fn dir(&self, ty: CacheDirType, checksum: &str) -> Result<PathBuf, Error> {
        let mut dir = self.host_dir(ty);
        for part in checksum_dirs(checksum) {
            dir.push(part);
        }

        if !dir.is_dir() {
            fs::create_dir_all(&dir).map_err(|e| Error::cache_write(&dir, e))?;
        }

        let marker = self.base_dir(ty).join(".htaccess");
        if !marker.is_file() {
            let contents = match ty {
                CacheDirType::Public => HTACCESS_ALLOW,
                CacheDirType::Private => HTACCESS_DENY,
            };
            write_atomic(&marker, contents.as_bytes())?;
        }

        Ok(dir)
    }

    /// Public URL of the nested dir for a checksum.
    pub fn dir_url(&self, checksum: &str) -> String {
        let mut url = format!("{}/{}", self.settings.public_url, self.host_slug);
        for part in checksum_dirs(checksum) {
            url.push('/');
            url.push_str(&part);
        }
        url
    }

    fn manifest_path(&self, kind: AssetKind, key: &str) -> PathBuf {
        let mut path = self.host_dir(CacheDirType::Private);
        for part in checksum_dirs(key) {
            path.push(part);
        }
        path.join(kind.manifest_name(key))
    }

    /// Read a manifest if it exists and is still inside the expiration window.
    ///
    /// Unreadable or undecodable manifests count as a miss.
    pub fn read_manifest<T: DeserializeOwned>(&self, kind: AssetKind, key: &str) -> Option<T> {
        let path = self.manifest_path(kind, key);
        let modified = fs::metadata(&path).and_then(|meta| meta.modified()).ok()?;

        if DateTime::<Utc>::from(modified) <= cutoff(self.settings.expiration) {
            tracing::debug!(manifest = %path.display(), "manifest expired");
            return None;
        }

        let raw = fs::read(&path).ok()?;
        match serde_json::from_slice(&raw) {
            Ok(parts) => Some(parts),
            Err(e) => {
                tracing::warn!(manifest = %path.display(), error = %e, "discarding undecodable manifest");
                None
            }
        }
    }

    /// Persist a manifest atomically.
    ///
    /// # Errors
    ///
    /// Returns `Error::CacheWrite` on any I/O failure.
    pub fn write_manifest<T: Serialize + ?Sized>(&self, kind: AssetKind, key: &str, parts: &T) -> Result<(), Error> {
        let dir = self.dir(CacheDirType::Private, key)?;
        let path = dir.join(kind.manifest_name(key));
        write_atomic(&path, &serde_json::to_vec(parts)?)
    }

    /// Write a code artifact and return its public URL.
    ///
    /// The artifact is always rewritten so its mtime tracks last use.
    ///
    /// # Errors
    ///
    /// Returns `Error::CacheWrite` on any I/O failure.
    pub fn write_artifact(&self, kind: AssetKind, code_hash: &str, code: &str) -> Result<String, Error> {
        let dir = self.dir(CacheDirType::Public, code_hash)?;
        let name = kind.artifact_name(code_hash);
        write_atomic(&dir.join(&name), code.as_bytes())?;
        Ok(format!("{}/{}", self.dir_url(code_hash), name))
    }

    /// Delete expired artifacts, manifests and abandoned temp files for this host.
    ///
    /// Files that cannot be removed are logged and skipped.
    pub fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let manifest_cutoff = cutoff(self.settings.expiration);
        let artifact_cutoff = cutoff(self.settings.expiration + PUBLIC_GRACE);

        for ty in [CacheDirType::Public, CacheDirType::Private] {
            let root = self.host_dir(ty);
            if !root.is_dir() {
                continue;
            }

            for entry in WalkDir::new(&root).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                let Some(modified) = entry.metadata().ok().and_then(|meta| meta.modified().ok()) else {
                    continue;
                };
                let modified = DateTime::<Utc>::from(modified);

                let counter = if name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX) {
                    (modified < manifest_cutoff).then_some(&mut report.temp_files_removed)
                } else if ty == CacheDirType::Public && name.contains("compressor-part.") {
                    (modified < artifact_cutoff).then_some(&mut report.artifacts_removed)
                } else if ty == CacheDirType::Private && name.contains("compressor-parts.") {
                    (modified < manifest_cutoff).then_some(&mut report.manifests_removed)
                } else {
                    None
                };

                if let Some(counter) = counter {
                    match fs::remove_file(entry.path()) {
                        Ok(()) => *counter += 1,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => tracing::warn!(path = %entry.path().display(), error = %e, "failed to remove cache file"),
                    }
                }
            }
        }

        tracing::info!(
            artifacts = report.artifacts_removed,
            manifests = report.manifests_removed,
            temp_files = report.temp_files_removed,
            host = %self.settings.host,
            "cache cleanup finished"
        );

        report
    }
}

/// Directory-safe form of a host name: `www.Example.com:8080` becomes `www-example-com-8080`.
pub fn host_slug(host: &str) -> String {
    let slug: String = host.chars().map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' }).collect();
    slug.trim_matches('-').to_string()
}

fn cutoff(window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Write `contents` to a uniquely named temp file beside `path`, then rename it over `path`.
///
/// Readers see either the old file or the complete new one. The temp file is
/// removed if anything fails before the rename.
///
/// # Errors
///
/// Returns `Error::CacheWrite` if the temp file cannot be created, written or renamed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)
        .map_err(|e| Error::cache_write(dir, e))?;

    temp.write_all(contents).map_err(|e| Error::cache_write(temp.path(), e))?;
    temp.as_file().sync_all().map_err(|e| Error::cache_write(temp.path(), e))?;
    temp.persist(path).map_err(|e| Error::cache_write(path, e.error))?;

    Ok(())
}
