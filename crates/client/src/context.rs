//! Required request context: the URL of the page being compressed.

use htmlc_core::{CompressorConfig, Error};

use crate::fetch::url::{self, UrlError};

/// Scheme, host and URI of the document being compressed.
///
/// Built once per compressor and read-only afterwards. It is the default base
/// for every relative URL found in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    scheme: String,
    host: String,
    uri: String,
}

impl RequestContext {
    /// Build a context; the scheme defaults to `http`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` when the host or URI is missing or unparsable.
    pub fn new(scheme: Option<&str>, host: Option<&str>, uri: Option<&str>) -> Result<Self, Error> {
        let scheme = scheme.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("http");
        let scheme = scheme.split(':').next().unwrap_or(scheme).to_lowercase();

        let host = host
            .map(|h| h.trim().to_lowercase())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Configuration("unable to determine the current host; set `current_url_host`".into()))?;

        let uri = uri
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Configuration("unable to determine the current URI; set `current_url_uri`".into()))?;
        let uri = url::parse_uri(uri).map_err(|e| Error::Configuration(format!("invalid `current_url_uri`: {e}")))?;

        Ok(Self { scheme, host, uri })
    }

    /// Read `current_url_scheme`, `current_url_host` and `current_url_uri`.
    pub fn from_config(config: &CompressorConfig) -> Result<Self, Error> {
        Self::new(config.current_url_scheme.as_deref(), config.current_url_host.as_deref(), config.current_url_uri.as_deref())
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn current_url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.uri)
    }

    /// Resolve `relative` against `base`, or against the current URL when no base is given.
    ///
    /// # Errors
    ///
    /// Returns `UrlError::MissingBaseHost` when an explicit base has no host,
    /// or `UrlError::Unparsable` for malformed input.
    pub fn resolve(&self, relative: &str, base: Option<&str>) -> Result<String, UrlError> {
        match base.filter(|b| !b.is_empty()) {
            Some(base) => url::resolve(relative, base),
            None => url::resolve(relative, &self.current_url()),
        }
    }
}
