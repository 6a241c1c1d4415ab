//! Exclusion patterns for CSS, JS and request URIs.

use regex::{Regex, RegexBuilder};

use htmlc_core::{CompressorConfig, Error};

const BUILT_IN_CSS: &[&str] = &[r"\W#post-[0-9]+\W"];

const BUILT_IN_JS: &[&str] = &[r"\.js#.", r"\.google-analytics\.com/", r"\Wga\s*\(", r"\W_gaq\.push\s*\("];

/// Why a fragment was kept out of combination, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    ConditionalComment,
    AsyncOrDefer,
    RemoteDisabled,
    UserPattern,
    BuiltIn,
}

/// Compiled caller-supplied and built-in patterns for one kind of subject.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    user: Option<Regex>,
    built_in: Option<Regex>,
}

impl ExclusionRules {
    /// Compile rules. A non-empty `raw` pattern overrides the literal list.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if `raw` is not a valid pattern.
    pub fn new(field: &str, literals: &[String], raw: Option<&str>, built_ins: &[&str]) -> Result<Self, Error> {
        let user = match raw.map(str::trim).filter(|r| !r.is_empty()) {
            Some(raw) => Some(Regex::new(raw).map_err(|e| Error::Configuration(format!("invalid `regex_{field}`: {e}")))?),
            None => literal_pattern(literals),
        };
        let built_in = if built_ins.is_empty() {
            None
        } else {
            Some(case_insensitive(&built_ins.join("|")).map_err(|e| Error::Configuration(e.to_string()))?)
        };
        Ok(Self { user, built_in })
    }

    pub fn css(config: &CompressorConfig) -> Result<Self, Error> {
        let built_ins = if config.disable_built_in_css_exclusions { &[][..] } else { BUILT_IN_CSS };
        Self::new("css_exclusions", &config.css_exclusions, config.regex_css_exclusions.as_deref(), built_ins)
    }

    pub fn js(config: &CompressorConfig) -> Result<Self, Error> {
        let built_ins = if config.disable_built_in_js_exclusions { &[][..] } else { BUILT_IN_JS };
        Self::new("js_exclusions", &config.js_exclusions, config.regex_js_exclusions.as_deref(), built_ins)
    }

    /// URI rules have no built-in patterns.
    pub fn uri(config: &CompressorConfig) -> Result<Self, Error> {
        Self::new("uri_exclusions", &config.uri_exclusions, config.regex_uri_exclusions.as_deref(), &[])
    }

    /// The first rule matching `subject`, user patterns before built-ins.
    pub fn matches(&self, subject: &str) -> Option<ExclusionReason> {
        if self.user.as_ref().is_some_and(|re| re.is_match(subject)) {
            return Some(ExclusionReason::UserPattern);
        }
        if self.built_in.as_ref().is_some_and(|re| re.is_match(subject)) {
            return Some(ExclusionReason::BuiltIn);
        }
        None
    }

    pub fn is_match(&self, subject: &str) -> bool {
        self.matches(subject).is_some()
    }
}

fn literal_pattern(literals: &[String]) -> Option<Regex> {
    let escaped: Vec<String> = literals.iter().map(|l| l.trim()).filter(|l| !l.is_empty()).map(regex::escape).collect();
    if escaped.is_empty() {
        return None;
    }
    case_insensitive(&escaped.join("|")).ok()
}

fn case_insensitive(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}
