//! Configuration validation rules.
//!
//! This module provides validation logic for `CompressorConfig` values
//! after they have been loaded from environment, files, or defaults.

use std::time::Duration;

use crate::config::CompressorConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

/// Parse a human duration such as `14 days`, `12h` or `90 minutes`.
///
/// A bare number is read as seconds.
pub fn parse_expiration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
    let (amount, unit) = value.split_at(split);
    let amount: u64 = amount.parse().ok()?;

    let seconds = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600,
        "d" | "day" | "days" => 86_400,
        "w" | "week" | "weeks" => 604_800,
        _ => return None,
    };

    amount.checked_mul(seconds).map(Duration::from_secs)
}

impl CompressorConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `product_title` is empty
    /// - a timeout is 0 or exceeds 5 minutes
    /// - `max_redirects` exceeds 20
    /// - `cache_expiration_time` cannot be parsed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.product_title.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "product_title".into(), reason: "must not be empty".into() });
        }

        for (field, value) in [("connect_timeout_ms", self.connect_timeout_ms), ("stream_timeout_ms", self.stream_timeout_ms)] {
            if value == 0 {
                return Err(ConfigError::Invalid { field: field.into(), reason: "must be greater than 0".into() });
            }
            if value > 300_000 {
                return Err(ConfigError::Invalid {
                    field: field.into(),
                    reason: "must not exceed 5 minutes (300000ms)".into(),
                });
            }
        }

        if self.max_redirects > 20 {
            return Err(ConfigError::Invalid { field: "max_redirects".into(), reason: "must not exceed 20".into() });
        }

        let expiration = self.cache_expiration()?;
        if expiration.is_zero() {
            tracing::warn!(
                cache_expiration_time = %self.cache_expiration_time,
                "cache expiration window is zero; every manifest will be rebuilt"
            );
        }

        if self.regex_css_exclusions.is_some() && !self.css_exclusions.is_empty() {
            tracing::warn!(
                css_exclusions = self.css_exclusions.len(),
                "Both regex_css_exclusions and css_exclusions are set; \
                 the regex takes precedence"
            );
        }

        Ok(())
    }
}
