//! Unified error types for htmlc.
//!
//! Fatal kinds ([`Error::Configuration`], [`Error::CacheWrite`]) abort a whole
//! `compress()` call. The rest are degraded by the component that hits them.

use std::path::PathBuf;

use crate::config::ConfigError;

/// Unified error types for the compressor pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable cache directory, URL base or request context.
    #[error("CONFIGURATION_ERROR: {0}")]
    Configuration(String),

    /// Writing or renaming a cache file failed.
    #[error("CACHE_WRITE_ERROR: {}: {source}", path.display())]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transport failure while fetching a remote asset.
    #[error("FETCH_FAILED: {0}")]
    Fetch(String),

    /// Remote asset answered with an error status.
    #[error("FETCH_FAILED: {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// External minifier rejected its input.
    #[error("MINIFY_FAILED: {0}")]
    Minify(String),

    /// A URL could not be parsed or resolved.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Manifest (de)serialization failed.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error must unwind the entire compression call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::CacheWrite { .. } | Error::Serialization(_))
    }

    pub(crate) fn cache_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::CacheWrite { path: path.into(), source }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Configuration(err.to_string())
    }
}
