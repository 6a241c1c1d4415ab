//! CSS and JS tag fragments.

use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

use super::exclusions::{ExclusionReason, ExclusionRules};
use crate::fetch::url::{is_external, normalize_amps};
use htmlc_core::{CompressorConfig, Error};

const IF_OPEN: &str = r"(?P<if_open_tag><![^\[>]*?\[if\W[^\]]*?\][^>]*?>\s*)?";
const IF_CLOSE: &str = r"(?P<if_closing_tag>\s*<![^\[>]*?\[endif\][^>]*?>)?";

static CSS_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?is)(?P<all>{IF_OPEN}(?:(?P<link_self_closing_tag><link(?:\s+[^>]*?)?>)|(?P<style_open_tag><style(?:\s+[^>]*?)?>)(?P<style_css>.*?)(?P<style_closing_tag></style>)){IF_CLOSE})"
    ))
    .expect("valid css tag regex")
});

static JS_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?is)(?P<all>{IF_OPEN}(?P<script_open_tag><script(?:\s+[^>]*?)?>)(?P<script_js>.*?)(?P<script_closing_tag></script>){IF_CLOSE})"
    ))
    .expect("valid js tag regex")
});

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\s(?P<name>[a-z][a-z0-9_:.-]*)\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#).expect("valid attribute regex")
});

static ASYNC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\s(?:async|defer)(?:>|\s+[^=]|\s*=\s*(?:"(?:1|on|yes|true|async|defer)"|'(?:1|on|yes|true|async|defer)'))"#,
    )
    .expect("valid async regex")
});

/// What a fragment carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FragmentKind {
    /// `<link rel="stylesheet" href=…>`
    Link { href: String, media: String },
    /// `<style>…</style>`
    Style { css: String, media: String },
    /// `<script src=…></script>`
    Script { src: String, is_async: bool },
    /// `<script>…</script>` holding JavaScript.
    InlineScript { code: String, is_async: bool },
    /// `<script type="application/ld+json">…</script>`
    Json { code: String },
}

/// One matched CSS or JS tag occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagFragment {
    /// Full matched text, conditional comment included.
    pub all: String,
    pub if_open_tag: String,
    pub if_closing_tag: String,
    /// `<link …>`, `<style …>` or `<script …>`.
    pub open_tag: String,
    /// `</style>` or `</script>`; empty for `<link>`.
    pub closing_tag: String,
    pub kind: FragmentKind,
    pub exclude: bool,
    /// Byte span of `all` in the text it was extracted from.
    #[serde(skip)]
    pub span: Range<usize>,
}

impl TagFragment {
    /// CSS media; `all` for anything without one.
    pub fn media(&self) -> &str {
        match &self.kind {
            FragmentKind::Link { media, .. } | FragmentKind::Style { media, .. } => media,
            _ => "all",
        }
    }

    pub fn is_conditional(&self) -> bool {
        !self.if_open_tag.is_empty() || !self.if_closing_tag.is_empty()
    }

    fn is_async(&self) -> bool {
        matches!(self.kind, FragmentKind::Script { is_async: true, .. } | FragmentKind::InlineScript { is_async: true, .. })
    }

    /// External URL this fragment loads, if any.
    fn external_url(&self) -> Option<&str> {
        match &self.kind {
            FragmentKind::Link { href, .. } => Some(href),
            FragmentKind::Script { src, .. } => Some(src),
            _ => None,
        }
    }

    /// Text exclusion patterns are matched against.
    ///
    /// CSS: `link_tag style_open_tag style_css`; JS: `script_open_tag code`.
    /// Absent pieces stay empty, separators are always present.
    fn exclusion_subject(&self) -> String {
        match &self.kind {
            FragmentKind::Link { .. } => format!("{}  ", self.open_tag),
            FragmentKind::Style { css, .. } => format!(" {} {css}", self.open_tag),
            FragmentKind::Script { .. } => format!("{} ", self.open_tag),
            FragmentKind::InlineScript { code, .. } | FragmentKind::Json { code } => format!("{} {code}", self.open_tag),
        }
    }
}

/// Extracts tag fragments and decides their exclusion as they are built.
#[derive(Debug, Clone)]
pub struct TagExtractor {
    css_rules: ExclusionRules,
    js_rules: ExclusionRules,
    host: String,
    remote_allowed: bool,
}

impl TagExtractor {
    /// # Errors
    ///
    /// Returns `Error::Configuration` if a caller-supplied exclusion pattern is invalid.
    pub fn new(config: &CompressorConfig, host: &str) -> Result<Self, Error> {
        Ok(Self {
            css_rules: ExclusionRules::css(config)?,
            js_rules: ExclusionRules::js(config)?,
            host: host.to_string(),
            remote_allowed: config.compress_combine_remote_css_js,
        })
    }

    /// CSS `<link>`/`<style>` fragments in document order.
    pub fn css_frags(&self, html: &str) -> Vec<TagFragment> {
        CSS_TAG_RE.captures_iter(html).filter_map(|caps| self.css_frag(&caps)).collect()
    }

    /// `<script>` fragments holding JavaScript or JSON, in document order.
    pub fn js_frags(&self, html: &str) -> Vec<TagFragment> {
        JS_TAG_RE.captures_iter(html).filter_map(|caps| self.js_frag(&caps)).collect()
    }

    fn css_frag(&self, caps: &Captures<'_>) -> Option<TagFragment> {
        let kind = if let Some(link) = caps.name("link_self_closing_tag") {
            let tag = link.as_str();
            if !is_css_type(attr(tag, "type")) || attr(tag, "rel").is_some_and(|rel| !contains_ci(rel, "stylesheet")) {
                return None;
            }
            let href = attr(tag, "href").map(|href| normalize_amps(href).trim().to_string()).filter(|href| !href.is_empty())?;
            FragmentKind::Link { href, media: media(tag) }
        } else {
            let open = caps.name("style_open_tag")?.as_str();
            let css = caps.name("style_css").map_or("", |m| m.as_str()).trim();
            if css.is_empty() || !is_css_type(attr(open, "type")) {
                return None;
            }
            FragmentKind::Style { css: css.to_string(), media: media(open) }
        };

        let open_tag = caps.name("link_self_closing_tag").or_else(|| caps.name("style_open_tag"))?.as_str().to_string();
        let closing_tag = caps.name("style_closing_tag").map_or("", |m| m.as_str()).to_string();
        self.build(caps, open_tag, closing_tag, kind, &self.css_rules)
    }

    fn js_frag(&self, caps: &Captures<'_>) -> Option<TagFragment> {
        let open = caps.name("script_open_tag")?.as_str();
        let body = caps.name("script_js").map_or("", |m| m.as_str()).trim();
        let (type_attr, language) = (attr(open, "type"), attr(open, "language"));

        let kind = if is_javascript(type_attr, language) {
            let is_async = ASYNC_RE.is_match(open);
            match attr(open, "src").map(|src| normalize_amps(src).trim().to_string()).filter(|src| !src.is_empty()) {
                Some(src) => FragmentKind::Script { src, is_async },
                None if !body.is_empty() => FragmentKind::InlineScript { code: body.to_string(), is_async },
                None => return None,
            }
        } else if is_json(type_attr, language) && !body.is_empty() {
            FragmentKind::Json { code: body.to_string() }
        } else {
            return None;
        };

        let closing_tag = caps.name("script_closing_tag").map_or("", |m| m.as_str()).to_string();
        self.build(caps, open.to_string(), closing_tag, kind, &self.js_rules)
    }

    fn build(
        &self, caps: &Captures<'_>, open_tag: String, closing_tag: String, kind: FragmentKind, rules: &ExclusionRules,
    ) -> Option<TagFragment> {
        let all = caps.name("all")?;
        let mut frag = TagFragment {
            all: all.as_str().to_string(),
            if_open_tag: caps.name("if_open_tag").map_or("", |m| m.as_str()).to_string(),
            if_closing_tag: caps.name("if_closing_tag").map_or("", |m| m.as_str()).to_string(),
            open_tag,
            closing_tag,
            kind,
            exclude: false,
            span: all.range(),
        };

        if let Some(reason) = self.exclusion(&frag, rules) {
            tracing::debug!(?reason, tag = %frag.open_tag, "fragment excluded from combination");
            frag.exclude = true;
        }
        Some(frag)
    }

    fn exclusion(&self, frag: &TagFragment, rules: &ExclusionRules) -> Option<ExclusionReason> {
        if frag.is_conditional() {
            return Some(ExclusionReason::ConditionalComment);
        }
        if frag.is_async() {
            return Some(ExclusionReason::AsyncOrDefer);
        }
        if !self.remote_allowed && frag.external_url().is_some_and(|url| is_external(url, &self.host)) {
            return Some(ExclusionReason::RemoteDisabled);
        }
        rules.matches(&frag.exclusion_subject())
    }
}

/// First non-empty quoted value of attribute `name` in `tag`.
fn attr<'t>(tag: &'t str, name: &str) -> Option<&'t str> {
    ATTR_RE.captures_iter(tag).find_map(|caps| {
        if !caps["name"].eq_ignore_ascii_case(name) {
            return None;
        }
        caps.name("dq").or_else(|| caps.name("sq")).map(|m| m.as_str()).filter(|v| !v.is_empty())
    })
}

fn media(tag: &str) -> String {
    attr(tag, "media").map(|m| m.trim().to_lowercase()).filter(|m| !m.is_empty()).unwrap_or_else(|| "all".into())
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

fn is_css_type(type_attr: Option<&str>) -> bool {
    type_attr.is_none_or(|t| contains_ci(t, "css"))
}

fn is_javascript(type_attr: Option<&str>, language: Option<&str>) -> bool {
    [type_attr, language].into_iter().flatten().all(|value| !contains_ci(value, "json") && contains_ci(value, "javascript"))
}

fn is_json(type_attr: Option<&str>, language: Option<&str>) -> bool {
    let values = [type_attr, language];
    values.iter().flatten().any(|value| !contains_ci(value, "javascript")) && values.iter().flatten().any(|value| contains_ci(value, "json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(config: &CompressorConfig) -> TagExtractor {
        TagExtractor::new(config, "example.com").unwrap()
    }

    #[test]
    fn test_css_link_and_style() {
        let html = r#"<link rel="stylesheet" href="/a.css?x=1&amp;y=2" media="Screen ">
<style type="text/css">
  body { color: red }
</style>
<link rel="icon" href="/favicon.ico">
<style></style>"#;
        let frags = extractor(&CompressorConfig::default()).css_frags(html);
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0].kind, FragmentKind::Link { href: "/a.css?x=1&y=2".into(), media: "screen".into() });
        assert_eq!(frags[1].kind, FragmentKind::Style { css: "body { color: red }".into(), media: "all".into() });
        assert_eq!(frags[1].closing_tag, "</style>");
        assert!(frags.iter().all(|f| !f.exclude));
        assert_eq!(&html[frags[1].span.clone()], frags[1].all);
    }

    #[test]
    fn test_css_rejects_non_css_types() {
        let html = r#"<link rel="stylesheet" type="text/less" href="/a.less"><style type="text/x-template">{{x}}</style>"#;
        assert!(extractor(&CompressorConfig::default()).css_frags(html).is_empty());
    }

    #[test]
    fn test_conditional_comment_is_captured_and_excluded() {
        let html = "<!--[if lt IE 9]>\n<link rel=\"stylesheet\" href=\"/ie.css\">\n<![endif]-->";
        let frags = extractor(&CompressorConfig::default()).css_frags(html);
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].all, html);
        assert!(frags[0].is_conditional());
        assert!(frags[0].exclude);
    }

    #[test]
    fn test_js_classification() {
        let html = r#"<script src="/app.js"></script>
<script>var a = 1;</script>
<script type="application/ld+json">{"@context": "https://schema.org"}</script>
<script type="text/template"><p>hi</p></script>
<script language="JavaScript">var b = 2;</script>
<script></script>"#;
        let frags = extractor(&CompressorConfig::default()).js_frags(html);
        assert_eq!(frags.len(), 4);
        assert_eq!(frags[0].kind, FragmentKind::Script { src: "/app.js".into(), is_async: false });
        assert_eq!(frags[1].kind, FragmentKind::InlineScript { code: "var a = 1;".into(), is_async: false });
        assert_eq!(frags[2].kind, FragmentKind::Json { code: r#"{"@context": "https://schema.org"}"#.into() });
        assert!(matches!(frags[3].kind, FragmentKind::InlineScript { .. }));
    }

    #[test]
    fn test_async_and_defer_are_excluded() {
        let html = r#"<script async src="/a.js"></script><script src="/b.js" defer></script><script src="/c.js" async="false"></script><script src="/d.js" defer='defer'></script>"#;
        let frags = extractor(&CompressorConfig::default()).js_frags(html);
        let excluded: Vec<bool> = frags.iter().map(|f| f.exclude).collect();
        assert_eq!(excluded, vec![true, true, false, true]);
    }

    #[test]
    fn test_remote_exclusion_only_when_disabled() {
        let html = r#"<script src="https://cdn.other.com/lib.js"></script><script src="https://example.com/own.js"></script>"#;
        let frags = extractor(&CompressorConfig::default()).js_frags(html);
        assert!(frags.iter().all(|f| !f.exclude));

        let config = CompressorConfig { compress_combine_remote_css_js: false, ..Default::default() };
        let frags = extractor(&config).js_frags(html);
        assert!(frags[0].exclude);
        assert!(!frags[1].exclude);
    }

    #[test]
    fn test_user_and_built_in_patterns() {
        let html = r#"<script src="/track.php?id=1"></script><script>ga('create', 'UA-1');</script><script>var ok = 1;</script>"#;
        let frags = extractor(&CompressorConfig::default()).js_frags(html);
        let excluded: Vec<bool> = frags.iter().map(|f| f.exclude).collect();
        assert_eq!(excluded, vec![true, true, false]);
    }

    #[test]
    fn test_subject_keeps_separators_after_open_tag() {
        let config = CompressorConfig {
            regex_js_exclusions: Some(r#"src="/legacy\.js">\s"#.into()),
            regex_css_exclusions: Some(r#"href="/print\.css">\s\s$"#.into()),
            ..Default::default()
        };
        let extractor = extractor(&config);

        let frags = extractor.js_frags(r#"<script src="/legacy.js"></script><script src="/app.js"></script>"#);
        assert_eq!(frags.iter().map(|f| f.exclude).collect::<Vec<_>>(), vec![true, false]);

        let frags = extractor.css_frags(r#"<link rel="stylesheet" href="/print.css"><link rel="stylesheet" href="/site.css">"#);
        assert_eq!(frags.iter().map(|f| f.exclude).collect::<Vec<_>>(), vec![true, false]);
    }

    #[test]
    fn test_media_does_not_affect_js() {
        let frags = extractor(&CompressorConfig::default()).js_frags("<script>x()</script>");
        assert_eq!(frags[0].media(), "all");
    }

    #[test]
    fn test_attr_lookup() {
        let tag = r#"<link data-x="1" REL='StyleSheet' href="">"#;
        assert_eq!(attr(tag, "rel"), Some("StyleSheet"));
        assert_eq!(attr(tag, "href"), None);
        assert_eq!(attr(tag, "media"), None);
    }

    #[test]
    fn test_serialized_fragment_omits_span() {
        let frags = extractor(&CompressorConfig::default()).css_frags("<style>a{}</style>");
        let json = serde_json::to_string(&frags[0]).unwrap();
        assert!(!json.contains("span"));
        assert!(json.contains("\"type\":\"style\""));
    }
}
