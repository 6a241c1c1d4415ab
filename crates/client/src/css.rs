//! CSS URL resolution, `@import` inlining and at-rule hoisting.
//!
//! Every pattern understands vendor-prefixed at-rules (`@-moz-import`, …)
//! for the prefixes listed in `vendor_css_prefixes`.

use regex::{Captures, Regex};

use crate::context::RequestContext;
use crate::fetch::{Fetcher, UrlError, strip_utf8_bom};
use htmlc_core::{Error, Hook, HookApi};

/// Nested `@import` chains deeper than this are left unresolved.
pub const MAX_IMPORT_DEPTH: usize = 16;

/// `@charset`/`@import` hoisting is bounded to this many passes.
const MAX_HOIST_PASSES: usize = 2;

/// Compiled CSS rewriting patterns bound to one request context.
#[derive(Debug, Clone)]
pub struct CssResolver {
    context: RequestContext,
    import_target: Regex,
    any_url: Regex,
    import_quoted: Regex,
    import_url: Regex,
    charset_rule: Regex,
    import_rule: Regex,
    current_host: Regex,
}

impl CssResolver {
    /// # Errors
    ///
    /// Returns `Error::Configuration` if a pattern built from `vendor_prefixes` fails to compile.
    pub fn new(context: RequestContext, vendor_prefixes: &[String]) -> Result<Self, Error> {
        let prefixes: Vec<String> = vendor_prefixes.iter().map(|p| p.trim()).filter(|p| !p.is_empty()).map(regex::escape).collect();
        let vendor = if prefixes.is_empty() { String::new() } else { format!("(?:-(?:{})-)?", prefixes.join("|")) };
        let quoted = r#"(?:"(?P<dq>[^"]+)"|'(?P<sq>[^']+)')"#;
        let url_arg = r#"(?:"(?P<dq>[^"]+)"|'(?P<sq>[^']+)'|(?P<bare>[^\s"')][^)]*?))"#;

        let compile = |pattern: String| Regex::new(&pattern).map_err(|e| Error::Configuration(format!("invalid `vendor_css_prefixes`: {e}")));

        Ok(Self {
            import_target: compile(format!(r"(?i)(?P<import>@{vendor}import\s*){quoted}"))?,
            any_url: compile(format!(r"(?i)(?P<url_>url\s*)(?P<open_bracket>\(\s*){url_arg}(?P<close_bracket>\s*\))"))?,
            import_quoted: compile(format!(r"(?i)@{vendor}import\s*{quoted}(?P<media>[^;]*?);"))?,
            import_url: compile(format!(r"(?i)@{vendor}import\s+url\s*\(\s*{url_arg}\s*\)(?P<media>[^;]*?);"))?,
            charset_rule: compile(format!(r"(?i)@{vendor}charset(?:\s+[^;]*?)?;"))?,
            import_rule: compile(format!(r"(?i)@{vendor}import(?:\s+[^;]*?)?;"))?,
            current_host: compile(format!(r"(?i)(?:[a-z0-9]+:)?//{}/", regex::escape(context.host())))?,
            context,
        })
    }

    /// Rewrite `@import "…"` and `url(…)` targets to absolute URLs.
    ///
    /// Relative targets resolve against `base`, or the current page when it is `None`.
    /// `data:` URIs are left alone, as is anything that cannot be parsed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` when no base host is available.
    pub fn resolve_relatives(&self, css: &str, base: Option<&str>) -> Result<String, Error> {
        if css.is_empty() {
            return Ok(String::new());
        }
        let css = try_replace_all(&self.import_target, css, |caps| {
            let (quote, target) = quoted_target(caps);
            Ok(format!("{}{quote}{}{quote}", &caps["import"], self.resolve(target, base)?))
        })?;
        try_replace_all(&self.any_url, &css, |caps| {
            let (quote, target) = quoted_target(caps);
            if is_data_uri(target) {
                return Ok(caps[0].to_string());
            }
            Ok(format!("{}{}{quote}{}{quote}{}", &caps["url_"], &caps["open_bracket"], self.resolve(target, base)?, &caps["close_bracket"]))
        })
    }

    fn resolve(&self, target: &str, base: Option<&str>) -> Result<String, Error> {
        match self.context.resolve(target, base) {
            Ok(resolved) => Ok(resolved),
            Err(UrlError::MissingBaseHost(url)) => Err(Error::Configuration(format!("no base host to resolve `{url}` against"))),
            Err(err) => {
                tracing::warn!(url = target, error = %err, "leaving unresolvable CSS URL as-is");
                Ok(target.to_string())
            }
        }
    }

    /// Replace `@import` rules for `media` with the fetched, resolved content they point at.
    ///
    /// Rules with no media qualifier or one equal to `media` are inlined; any
    /// other rule is kept. Inlining repeats while matching rules remain, up to
    /// [`MAX_IMPORT_DEPTH`] passes. A failed fetch inlines nothing.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` when an imported sheet's URLs cannot be resolved for lack of a host.
    pub fn resolve_imports(&self, css: &str, media: &str, fetcher: &dyn Fetcher) -> Result<String, Error> {
        let media = normalize_media(media);
        let mut css = css.to_string();

        for _ in 0..MAX_IMPORT_DEPTH {
            css = self.inline_imports(&self.import_quoted, &css, &media, fetcher)?;
            css = self.inline_imports(&self.import_url, &css, &media, fetcher)?;
            if !self.has_inlinable_import(&css, &media) {
                return Ok(css);
            }
        }
        tracing::warn!(depth = MAX_IMPORT_DEPTH, "stopped inlining nested CSS imports");
        Ok(css)
    }

    fn inline_imports(&self, pattern: &Regex, css: &str, media: &str, fetcher: &dyn Fetcher) -> Result<String, Error> {
        try_replace_all(pattern, css, |caps| {
            let (_, target) = quoted_target(caps);
            let target = target.trim();
            if target.is_empty() {
                return Ok(String::new());
            }
            if !import_applies(&caps["media"], media) {
                return Ok(caps[0].to_string());
            }
            match fetcher.fetch(target) {
                Ok(body) => {
                    let body = strip_utf8_bom(&body);
                    if body.is_empty() { Ok(String::new()) } else { self.resolve_relatives(body, Some(target)) }
                }
                Err(err) => {
                    tracing::warn!(url = target, error = %err, "unable to fetch CSS import; dropping it");
                    Ok(String::new())
                }
            }
        })
    }

    fn has_inlinable_import(&self, css: &str, media: &str) -> bool {
        [&self.import_quoted, &self.import_url]
            .into_iter()
            .any(|pattern| pattern.captures_iter(css).any(|caps| import_applies(&caps["media"], media)))
    }

    /// Hoist `@charset` rules, then `@import` rules, to the top of the sheet.
    pub fn move_special_at_rules_to_top(&self, css: &str) -> String {
        self.hoist(css, 0)
    }

    fn hoist(&self, css: &str, pass: usize) -> String {
        if css.is_empty() || pass >= MAX_HOIST_PASSES {
            return css.to_string();
        }
        let lower = css.to_lowercase();
        if !lower.contains("charset") && !lower.contains("import") {
            return css.to_string();
        }

        let mut rules: Vec<regex::Match<'_>> = self.charset_rule.find_iter(css).collect();
        if rules.is_empty() {
            rules = self.import_rule.find_iter(css).collect();
        }
        if rules.is_empty() {
            return css.to_string();
        }

        let mut rest = String::with_capacity(css.len());
        let mut last = 0;
        for rule in &rules {
            rest.push_str(&css[last..rule.start()]);
            last = rule.end();
        }
        rest.push_str(&css[last..]);

        let top: Vec<&str> = rules.iter().map(regex::Match::as_str).collect();
        format!("{}\n\n{}", top.join("\n\n"), self.hoist(&rest, pass + 1))
    }

    /// Drop every `@charset` rule and prepend a single UTF-8 one.
    pub fn strip_prepend_charset_utf8(&self, css: &str) -> String {
        let stripped = self.charset_rule.replace_all(css, "");
        let stripped = stripped.trim();
        if stripped.is_empty() {
            return String::new();
        }
        format!("@charset \"UTF-8\";\n{stripped}")
    }

    /// Turn absolute URLs on the current host into root-relative paths.
    pub fn force_abs_relative_paths(&self, css: &str) -> String {
        self.current_host.replace_all(css, "/").into_owned()
    }

    /// Pass every non-`data:` URL through the [`Hook::CssUrl`] filters.
    pub fn filter_urls(&self, css: &str, hooks: &HookApi) -> String {
        if css.is_empty() || !hooks.has_filter(Hook::CssUrl) {
            return css.to_string();
        }
        let css = self.import_target.replace_all(css, |caps: &Captures<'_>| {
            let (quote, target) = quoted_target(caps);
            format!("{}{quote}{}{quote}", &caps["import"], hooks.apply_filters(Hook::CssUrl, target.to_string(), ""))
        });
        self.any_url
            .replace_all(&css, |caps: &Captures<'_>| {
                let (quote, target) = quoted_target(caps);
                if is_data_uri(target) {
                    return caps[0].to_string();
                }
                let filtered = hooks.apply_filters(Hook::CssUrl, target.to_string(), "");
                format!("{}{}{quote}{filtered}{quote}{}", &caps["url_"], &caps["open_bracket"], &caps["close_bracket"])
            })
            .into_owned()
    }
}

/// Lower-cased media query; `all` when empty.
pub fn normalize_media(media: &str) -> String {
    let media = media.trim().to_lowercase();
    if media.is_empty() { "all".into() } else { media }
}

fn import_applies(import_media: &str, media: &str) -> bool {
    let import_media = import_media.trim().to_lowercase();
    import_media.is_empty() || import_media == media
}

fn is_data_uri(target: &str) -> bool {
    target.get(..5).is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}

/// The quote character used around a URL argument and the URL itself.
fn quoted_target<'c>(caps: &'c Captures<'_>) -> (&'static str, &'c str) {
    if let Some(m) = caps.name("dq") {
        ("\"", m.as_str())
    } else if let Some(m) = caps.name("sq") {
        ("'", m.as_str())
    } else {
        ("", caps.name("bare").map_or("", |m| m.as_str()))
    }
}

/// `Regex::replace_all` with a fallible replacement.
fn try_replace_all<F>(pattern: &Regex, text: &str, mut replace: F) -> Result<String, Error>
where
    F: FnMut(&Captures<'_>) -> Result<String, Error>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in pattern.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&replace(&caps)?);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}
