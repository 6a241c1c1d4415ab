//! Fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use tempfile::TempDir;

use crate::context::RequestContext;
use crate::css::CssResolver;
use crate::extract::TagExtractor;
use crate::fetch::Fetcher;
use crate::minify::Minifier;
use crate::parts::PartCompiler;
use htmlc_core::cache::CacheSettings;
use htmlc_core::{Benchmark, CacheStore, CompressorConfig, Error, HookApi};

/// Serves canned bodies and records every requested URL.
#[derive(Debug, Default)]
pub(crate) struct MapFetcher {
    bodies: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl MapFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, url: &str, body: &str) -> Self {
        self.bodies.insert(url.to_string(), body.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for MapFetcher {
    fn fetch(&self, url: &str) -> Result<String, Error> {
        self.calls.lock().unwrap().push(url.to_string());
        self.bodies.get(url).cloned().ok_or_else(|| Error::HttpStatus { url: url.to_string(), status: 404 })
    }
}

/// Always fails.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FailingMinifier;

impl Minifier for FailingMinifier {
    fn css(&self, _code: &str) -> Result<String, Error> {
        Err(Error::Minify("css minifier unavailable".into()))
    }

    fn js(&self, _code: &str) -> Result<String, Error> {
        Err(Error::Minify("js minifier unavailable".into()))
    }

    fn json(&self, _code: &str) -> Result<String, Error> {
        Err(Error::Minify("json minifier unavailable".into()))
    }
}

/// Strips line breaks so minified output stays predictable in assertions.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct JoinLinesMinifier;

impl JoinLinesMinifier {
    fn join(code: &str) -> String {
        code.lines().map(str::trim).filter(|line| !line.is_empty()).collect::<Vec<_>>().join("")
    }
}

impl Minifier for JoinLinesMinifier {
    fn css(&self, code: &str) -> Result<String, Error> {
        Ok(Self::join(code))
    }

    fn js(&self, code: &str) -> Result<String, Error> {
        Ok(Self::join(code))
    }

    fn json(&self, code: &str) -> Result<String, Error> {
        Ok(Self::join(code))
    }
}

/// Config with both cache trees under `dir`, for `https://example.com/blog/`.
pub(crate) fn test_config(dir: &TempDir) -> CompressorConfig {
    CompressorConfig {
        cache_dir_public: Some(dir.path().join("public")),
        cache_dir_private: Some(dir.path().join("private")),
        cache_dir_url_public: Some("https://example.com/cache".into()),
        current_url_scheme: Some("https".into()),
        current_url_host: Some("example.com".into()),
        current_url_uri: Some("/blog/".into()),
        cleanup_cache_dirs: false,
        ..CompressorConfig::default()
    }
}

/// Everything a [`PartCompiler`] borrows, built over a temp cache.
pub(crate) struct Fixture {
    pub(crate) dir: TempDir,
    pub(crate) config: CompressorConfig,
    pub(crate) context: RequestContext,
    pub(crate) css: CssResolver,
    pub(crate) store: CacheStore,
    pub(crate) extractor: TagExtractor,
    pub(crate) hooks: HookApi,
    pub(crate) benchmark: Benchmark,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let context = RequestContext::from_config(&config).unwrap();
        let css = CssResolver::new(context.clone(), &config.vendor_css_prefixes).unwrap();
        let store = CacheStore::new(CacheSettings::from_config(&config, context.host()).unwrap());
        let extractor = TagExtractor::new(&config, context.host()).unwrap();
        Self { dir, config, context, css, store, extractor, hooks: HookApi::new(), benchmark: Benchmark::new(true) }
    }

    pub(crate) fn compiler<'a>(&'a self, fetcher: &'a dyn Fetcher, minifier: &'a dyn Minifier) -> PartCompiler<'a> {
        PartCompiler {
            context: &self.context,
            css: &self.css,
            store: &self.store,
            fetcher,
            minifier,
            hooks: &self.hooks,
            benchmark: &self.benchmark,
            compress_css: self.config.compress_css_code,
            compress_js: self.config.compress_js_code,
        }
    }

    /// Contents of the artifact a `<link href>`/`<script src>` tag points at.
    pub(crate) fn read_artifact(&self, tag: &str) -> String {
        let url = tag.split(['"']).find(|piece| piece.starts_with("https://example.com/cache/")).unwrap();
        let relative = url.trim_start_matches("https://example.com/cache/");
        std::fs::read_to_string(self.dir.path().join("public").join(relative)).unwrap()
    }
}
