//! Compressor configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (HTMLC_*)
//! 2. TOML config file (if HTMLC_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::{ConfigError, parse_expiration};

/// Benchmark annotation mode.
///
/// Deserializes from `false`, `true` or `"details"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BenchmarkSetting", into = "BenchmarkSetting")]
pub enum BenchmarkMode {
    #[default]
    Off,
    /// Overall timing only.
    Overall,
    /// Overall timing plus one line per stage.
    Details,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum BenchmarkSetting {
    Flag(bool),
    Named(String),
}

impl TryFrom<BenchmarkSetting> for BenchmarkMode {
    type Error = String;

    fn try_from(value: BenchmarkSetting) -> Result<Self, Self::Error> {
        match value {
            BenchmarkSetting::Flag(false) => Ok(Self::Off),
            BenchmarkSetting::Flag(true) => Ok(Self::Overall),
            BenchmarkSetting::Named(name) => match name.to_ascii_lowercase().as_str() {
                "details" => Ok(Self::Details),
                "true" | "1" => Ok(Self::Overall),
                "false" | "0" | "" => Ok(Self::Off),
                other => Err(format!("unknown benchmark mode `{other}`")),
            },
        }
    }
}

impl From<BenchmarkMode> for BenchmarkSetting {
    fn from(mode: BenchmarkMode) -> Self {
        match mode {
            BenchmarkMode::Off => Self::Flag(false),
            BenchmarkMode::Overall => Self::Flag(true),
            BenchmarkMode::Details => Self::Named("details".into()),
        }
    }
}

/// Compressor configuration with layered loading.
///
/// Every field can be set via an `HTMLC_<FIELD>` environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressorConfig {
    /// Name used in benchmark annotations and as the fetch User-Agent.
    #[serde(default = "default_product_title")]
    pub product_title: String,

    /// Combine `<link>`/`<style>` tags from the whole document into the head.
    #[serde(default = "default_true")]
    pub compress_combine_head_body_css: bool,

    /// Combine `<script>` tags found in the head.
    #[serde(default = "default_true")]
    pub compress_combine_head_js: bool,

    /// Combine `<script>` tags between the `<!-- footer-scripts -->` markers.
    #[serde(default = "default_true")]
    pub compress_combine_footer_js: bool,

    /// Allow combining assets hosted on other domains.
    #[serde(default = "default_true")]
    pub compress_combine_remote_css_js: bool,

    /// Minify inline `<script>` bodies in place.
    #[serde(default = "default_true")]
    pub compress_inline_js_code: bool,

    /// Minify combined CSS.
    #[serde(default = "default_true")]
    pub compress_css_code: bool,

    /// Minify combined and inline JS.
    #[serde(default = "default_true")]
    pub compress_js_code: bool,

    /// Strip comments and collapse whitespace in the final document.
    #[serde(default = "default_true")]
    pub compress_html_code: bool,

    /// Literal substrings excluding a CSS tag from combination.
    #[serde(default)]
    pub css_exclusions: Vec<String>,

    /// Raw pattern that overrides `css_exclusions`.
    #[serde(default)]
    pub regex_css_exclusions: Option<String>,

    #[serde(default)]
    pub disable_built_in_css_exclusions: bool,

    /// Literal substrings excluding a script tag from combination.
    #[serde(default = "default_js_exclusions")]
    pub js_exclusions: Vec<String>,

    /// Raw pattern that overrides `js_exclusions`.
    #[serde(default)]
    pub regex_js_exclusions: Option<String>,

    #[serde(default)]
    pub disable_built_in_js_exclusions: bool,

    /// Literal substrings of request URIs that skip compression entirely.
    #[serde(default)]
    pub uri_exclusions: Vec<String>,

    /// Raw pattern that overrides `uri_exclusions`.
    #[serde(default)]
    pub regex_uri_exclusions: Option<String>,

    #[serde(default)]
    pub disable_built_in_uri_exclusions: bool,

    /// Vendor prefixes recognized on `@import`/`@charset` at-rules.
    #[serde(default = "default_vendor_css_prefixes")]
    pub vendor_css_prefixes: Vec<String>,

    /// Manifest validity window, e.g. `14 days`.
    #[serde(default = "default_cache_expiration_time")]
    pub cache_expiration_time: String,

    /// Cache tree served over HTTP.
    #[serde(default)]
    pub cache_dir_public: Option<PathBuf>,

    /// Cache tree only the server reads.
    #[serde(default)]
    pub cache_dir_private: Option<PathBuf>,

    /// URL base under which `cache_dir_public` is served.
    #[serde(default)]
    pub cache_dir_url_public: Option<String>,

    #[serde(default)]
    pub current_url_scheme: Option<String>,

    #[serde(default)]
    pub current_url_host: Option<String>,

    #[serde(default)]
    pub current_url_uri: Option<String>,

    #[serde(default)]
    pub benchmark: BenchmarkMode,

    /// Disable combination on AMP documents.
    #[serde(default = "default_true")]
    pub amp_exclusions_enable: bool,

    /// Occasionally sweep expired cache files.
    #[serde(default = "default_true")]
    pub cleanup_cache_dirs: bool,

    /// Connect timeout for asset fetches in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Total (stream) timeout for asset fetches in milliseconds.
    #[serde(default = "default_stream_timeout_ms")]
    pub stream_timeout_ms: u64,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

fn default_product_title() -> String {
    "HTML Compressor".into()
}

fn default_true() -> bool {
    true
}

fn default_js_exclusions() -> Vec<String> {
    vec![".php?".into()]
}

fn default_vendor_css_prefixes() -> Vec<String> {
    ["moz", "webkit", "khtml", "ms", "o"].into_iter().map(String::from).collect()
}

fn default_cache_expiration_time() -> String {
    "14 days".into()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_stream_timeout_ms() -> u64 {
    15_000
}

fn default_max_redirects() -> usize {
    5
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            product_title: default_product_title(),
            compress_combine_head_body_css: true,
            compress_combine_head_js: true,
            compress_combine_footer_js: true,
            compress_combine_remote_css_js: true,
            compress_inline_js_code: true,
            compress_css_code: true,
            compress_js_code: true,
            compress_html_code: true,
            css_exclusions: Vec::new(),
            regex_css_exclusions: None,
            disable_built_in_css_exclusions: false,
            js_exclusions: default_js_exclusions(),
            regex_js_exclusions: None,
            disable_built_in_js_exclusions: false,
            uri_exclusions: Vec::new(),
            regex_uri_exclusions: None,
            disable_built_in_uri_exclusions: false,
            vendor_css_prefixes: default_vendor_css_prefixes(),
            cache_expiration_time: default_cache_expiration_time(),
            cache_dir_public: None,
            cache_dir_private: None,
            cache_dir_url_public: None,
            current_url_scheme: None,
            current_url_host: None,
            current_url_uri: None,
            benchmark: BenchmarkMode::Off,
            amp_exclusions_enable: true,
            cleanup_cache_dirs: true,
            connect_timeout_ms: default_connect_timeout_ms(),
            stream_timeout_ms: default_stream_timeout_ms(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl CompressorConfig {
    /// A config with every transformation stage switched off.
    pub fn passthrough() -> Self {
        Self {
            compress_combine_head_body_css: false,
            compress_combine_head_js: false,
            compress_combine_footer_js: false,
            compress_inline_js_code: false,
            compress_css_code: false,
            compress_js_code: false,
            compress_html_code: false,
            cleanup_cache_dirs: false,
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }

    /// Manifest validity window parsed from `cache_expiration_time`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the duration string is not understood.
    pub fn cache_expiration(&self) -> Result<Duration, ConfigError> {
        parse_expiration(&self.cache_expiration_time).ok_or_else(|| ConfigError::Invalid {
            field: "cache_expiration_time".into(),
            reason: format!("cannot parse `{}` as a duration", self.cache_expiration_time),
        })
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `HTMLC_`
    /// 2. TOML file from `HTMLC_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_file(std::env::var_os("HTMLC_CONFIG_FILE").map(PathBuf::from).as_deref())
    }

    /// Like [`CompressorConfig::load`], reading the TOML layer from `config_file`.
    ///
    /// # Errors
    ///
    /// Same as [`CompressorConfig::load`].
    pub fn load_with_file(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_path) = config_file {
            figment = figment.merge(Toml::file(config_path));
        }

        figment = figment.merge(
            Env::prefixed("HTMLC_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        Self::from_figment(figment)
    }

    /// Extract and validate from an already layered figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CompressorConfig::default();
        assert_eq!(config.product_title, "HTML Compressor");
        assert!(config.compress_combine_head_body_css);
        assert!(config.compress_combine_remote_css_js);
        assert!(config.compress_html_code);
        assert_eq!(config.js_exclusions, vec![".php?".to_string()]);
        assert!(config.css_exclusions.is_empty());
        assert_eq!(config.vendor_css_prefixes.len(), 5);
        assert_eq!(config.benchmark, BenchmarkMode::Off);
        assert!(config.amp_exclusions_enable);
        assert!(config.cache_dir_public.is_none());
    }

    #[test]
    fn test_timeouts() {
        let config = CompressorConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.stream_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_cache_expiration_default() {
        let config = CompressorConfig::default();
        assert_eq!(config.cache_expiration().unwrap(), Duration::from_secs(14 * 86_400));
    }

    #[test]
    fn test_passthrough_disables_stages() {
        let config = CompressorConfig::passthrough();
        assert!(!config.compress_combine_head_body_css);
        assert!(!config.compress_inline_js_code);
        assert!(!config.compress_html_code);
        assert!(config.compress_combine_remote_css_js);
    }

    #[test]
    fn test_benchmark_from_toml() {
        let figment = Figment::from(Serialized::defaults(CompressorConfig::default()))
            .merge(Toml::string("benchmark = \"details\"\ncompress_html_code = false"));
        let config = CompressorConfig::from_figment(figment).unwrap();
        assert_eq!(config.benchmark, BenchmarkMode::Details);
        assert!(!config.compress_html_code);

        let figment = Figment::from(Serialized::defaults(CompressorConfig::default())).merge(Toml::string("benchmark = true"));
        assert_eq!(CompressorConfig::from_figment(figment).unwrap().benchmark, BenchmarkMode::Overall);
    }

    #[test]
    fn test_unknown_benchmark_mode_fails_to_load() {
        let figment = Figment::from(Serialized::defaults(CompressorConfig::default())).merge(Toml::string("benchmark = \"loud\""));
        assert!(matches!(CompressorConfig::from_figment(figment), Err(ConfigError::LoadFailed(_))));
    }

    #[test]
    fn test_lists_and_paths_from_toml() {
        let toml = r#"
            css_exclusions = ["print.css", "fonts.googleapis"]
            cache_dir_public = "/var/cache/htmlc/public"
            cache_dir_url_public = "https://example.com/htmlc/public"
            current_url_host = "example.com"
        "#;
        let figment = Figment::from(Serialized::defaults(CompressorConfig::default())).merge(Toml::string(toml));
        let config = CompressorConfig::from_figment(figment).unwrap();
        assert_eq!(config.css_exclusions.len(), 2);
        assert_eq!(config.cache_dir_public, Some(PathBuf::from("/var/cache/htmlc/public")));
        assert_eq!(config.current_url_host.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_load_with_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("htmlc.toml");
        std::fs::write(&path, "product_title = \"Site Compressor\"\nuri_exclusions = [\"/wp-admin/\"]\n").unwrap();

        let config = CompressorConfig::load_with_file(Some(&path)).unwrap();
        assert_eq!(config.product_title, "Site Compressor");
        assert_eq!(config.uri_exclusions, vec!["/wp-admin/".to_string()]);
    }
}
