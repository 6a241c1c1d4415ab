//! Blocking HTTP fetch of remote CSS/JS and `@import` targets.
//!
//! ### Contract
//! - One blocking request at a time, bounded by a connect timeout and a total
//!   (stream) timeout
//! - Max redirects: 5 (configurable)
//! - `User-Agent` is the product title, `Referer` is the page being compressed
//! - A status of 400 or above is an error; callers degrade it to "no content"
//!
//! A `METHOD::url` prefix (e.g. `POST::https://example.com/x`) selects a custom
//! request method.

pub mod url;

use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::{Method, header};

pub use url::{UrlError, UrlNormalize, UrlParts, canonicalize};

use crate::context::RequestContext;
use htmlc_core::{CompressorConfig, Error};

static CUSTOM_METHOD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^(?P<method>GET|POST|PUT|PATCH|DELETE)::(?P<url>.+)").expect("valid method regex"));

/// Source of remote asset bodies.
///
/// This is the seam the part compiler and the CSS import resolver fetch
/// through, so tests can substitute canned responses.
pub trait Fetcher: Send + Sync {
    /// Fetch `url` and return its trimmed body.
    ///
    /// # Errors
    ///
    /// Returns `Error::Fetch` on transport failure or `Error::HttpStatus` on a 4xx/5xx answer.
    fn fetch(&self, url: &str) -> Result<String, Error>;
}

impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    fn fetch(&self, url: &str) -> Result<String, Error> {
        (**self).fetch(url)
    }
}

impl<T: Fetcher + ?Sized> Fetcher for Box<T> {
    fn fetch(&self, url: &str) -> Result<String, Error> {
        (**self).fetch(url)
    }
}

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "HTML Compressor")
    pub user_agent: String,

    /// Connect timeout (default: 5s)
    pub connect_timeout: Duration,

    /// Total request timeout, including the body stream (default: 15s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,

    /// Referer sent with every request.
    pub referer: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "HTML Compressor".to_string(),
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
            max_redirects: 5,
            referer: None,
        }
    }
}

impl FetchConfig {
    pub fn from_config(config: &CompressorConfig, context: &RequestContext) -> Self {
        Self {
            user_agent: config.product_title.clone(),
            connect_timeout: config.connect_timeout(),
            timeout: config.stream_timeout(),
            max_redirects: config.max_redirects,
            referer: Some(context.current_url()),
        }
    }
}

/// `reqwest` blocking client implementing [`Fetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let mut headers = header::HeaderMap::new();
        if let Some(referer) = &config.referer
            && let Ok(value) = header::HeaderValue::from_str(referer)
        {
            headers.insert(header::REFERER, value);
        }

        let http = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .default_headers(headers)
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Issue one request. A body turns a plain request into a POST.
    pub fn remote(&self, url_str: &str, body: Option<&str>) -> Result<String, Error> {
        let start = Instant::now();

        let (custom_method, url_str) = match CUSTOM_METHOD_RE.captures(url_str) {
            Some(caps) => (Some(caps["method"].to_uppercase()), caps.name("url").map_or(url_str, |m| m.as_str())),
            None => (None, url_str),
        };
        let url = canonicalize(url_str).map_err(|e| Error::Fetch(format!("{url_str}: {e}")))?;

        let method = match (&custom_method, body) {
            (Some(method), _) => Method::from_bytes(method.as_bytes()).unwrap_or(Method::GET),
            (None, Some(_)) => Method::POST,
            (None, None) => Method::GET,
        };

        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        let response = request.send().map_err(|e| Error::Fetch(format!("network error: {}", e)))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(Error::HttpStatus { url: url.to_string(), status: status.as_u16() });
        }

        let final_url = response.url().clone();
        let body = response.text().map_err(|e| Error::Fetch(format!("failed to read response: {}", e)))?;

        tracing::debug!(
            "fetched {} {} -> {} in {}ms ({} bytes)",
            method,
            url,
            final_url,
            start.elapsed().as_millis(),
            body.len()
        );

        Ok(body.trim().to_string())
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String, Error> {
        self.remote(url, None)
    }
}

/// Drop a leading UTF-8 byte order mark.
pub fn strip_utf8_bom(value: &str) -> &str {
    value.strip_prefix('\u{feff}').unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.user_agent, "HTML Compressor");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.max_redirects, 5);
        assert!(config.referer.is_none());
    }

    #[test]
    fn test_fetch_config_from_config() {
        let compressor = CompressorConfig { product_title: "Site Compressor".into(), stream_timeout_ms: 2_000, ..Default::default() };
        let context = RequestContext::new(Some("https"), Some("example.com"), Some("/page")).unwrap();
        let config = FetchConfig::from_config(&compressor, &context);
        assert_eq!(config.user_agent, "Site Compressor");
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.referer.as_deref(), Some("https://example.com/page"));
    }

    #[test]
    fn test_fetcher_creation() {
        let fetcher = HttpFetcher::new(FetchConfig::default());
        assert!(fetcher.is_ok());
    }

    #[test]
    fn test_remote_rejects_non_http_scheme() {
        let fetcher = HttpFetcher::new(FetchConfig::default()).unwrap();
        let err = fetcher.fetch("ftp://example.com/a.css").unwrap_err();
        assert!(matches!(err, Error::Fetch(msg) if msg.contains("unsupported scheme")));
    }

    #[test]
    fn test_remote_rejects_custom_method_with_bad_url() {
        let fetcher = HttpFetcher::new(FetchConfig::default()).unwrap();
        assert!(matches!(fetcher.remote("POST::not a url", Some("a=1")), Err(Error::Fetch(_))));
    }

    #[test]
    fn test_custom_method_prefix() {
        let caps = CUSTOM_METHOD_RE.captures("put::https://example.com/x").unwrap();
        assert_eq!(&caps["method"], "put");
        assert_eq!(&caps["url"], "https://example.com/x");
        assert!(CUSTOM_METHOD_RE.captures("https://example.com/x").is_none());
    }

    #[test]
    fn test_strip_utf8_bom() {
        assert_eq!(strip_utf8_bom("\u{feff}body{}"), "body{}");
        assert_eq!(strip_utf8_bom("body{}"), "body{}");
    }
}
