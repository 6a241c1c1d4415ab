//! Regex-based fragment extraction from loosely structured HTML.
//!
//! ### Regions
//! - `<html>…</html>`: the whole document body, source of CSS tags and inline scripts
//! - `<head>…</head>`: insertion point for combined CSS and head JS
//! - `<!-- footer-scripts -->…<!-- footer-scripts -->`: footer JS insertion point
//!
//! ### Tags
//! - CSS: `<link>` and `<style>…</style>`, optionally wrapped in an IE conditional comment
//! - JS: `<script>…</script>`, classified as JavaScript, JSON, or neither
//!
//! No HTML parser is involved. Every extraction point is one compiled pattern
//! applied once; markup it does not recognize is left untouched.

pub mod exclusions;
pub mod tags;

use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex};

pub use exclusions::{ExclusionReason, ExclusionRules};
pub use tags::{FragmentKind, TagExtractor, TagFragment};

static HTML_FRAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(?P<open_tag><html(?:\s+[^>]*?)?>)(?P<contents>.*?)(?P<closing_tag></html>)").expect("valid html regex")
});

static HEAD_FRAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(?P<open_tag><head(?:\s+[^>]*?)?>)(?P<contents>.*?)(?P<closing_tag></head>)").expect("valid head regex")
});

static FOOTER_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<!--\s*footer[\s_-]+scripts\s*-->").expect("valid footer regex"));

/// A delimited region of a document with its byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlFrag {
    pub open_tag: String,
    pub contents: String,
    pub closing_tag: String,
    /// Span of the whole region, open tag through closing tag.
    pub span: Range<usize>,
    /// Span of `contents` alone.
    pub contents_span: Range<usize>,
}

impl HtmlFrag {
    fn from_captures(caps: &Captures<'_>) -> Option<Self> {
        let (open, contents, closing) = (caps.name("open_tag")?, caps.name("contents")?, caps.name("closing_tag")?);
        Some(Self {
            open_tag: open.as_str().to_string(),
            contents: contents.as_str().to_string(),
            closing_tag: closing.as_str().to_string(),
            span: open.start()..closing.end(),
            contents_span: contents.range(),
        })
    }
}

/// The `<html>…</html>` region.
pub fn html_frag(html: &str) -> Option<HtmlFrag> {
    HTML_FRAG_RE.captures(html).and_then(|caps| HtmlFrag::from_captures(&caps))
}

/// The first `<head>…</head>` region.
pub fn head_frag(html: &str) -> Option<HtmlFrag> {
    HEAD_FRAG_RE.captures(html).and_then(|caps| HtmlFrag::from_captures(&caps))
}

/// The region between two identical `<!-- footer-scripts -->` markers.
pub fn footer_scripts_frag(html: &str) -> Option<HtmlFrag> {
    let open = FOOTER_MARKER_RE.find(html)?;
    let close_at = open.end() + html[open.end()..].find(open.as_str())?;
    let close_end = close_at + open.as_str().len();

    Some(HtmlFrag {
        open_tag: open.as_str().to_string(),
        contents: html[open.end()..close_at].to_string(),
        closing_tag: open.as_str().to_string(),
        span: open.start()..close_end,
        contents_span: open.end()..close_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_frag() {
        let doc = "<!DOCTYPE html>\n<HTML lang=\"en\">\n<body>x</body>\n</HTML>";
        let frag = html_frag(doc).unwrap();
        assert_eq!(frag.open_tag, "<HTML lang=\"en\">");
        assert_eq!(frag.contents, "\n<body>x</body>\n");
        assert_eq!(&doc[frag.span.clone()], &doc[16..]);
        assert_eq!(&doc[frag.contents_span], frag.contents);
    }

    #[test]
    fn test_head_frag_ignores_header_tag() {
        let doc = "<html><header>no</header><head><title>t</title></head></html>";
        let frag = head_frag(doc).unwrap();
        assert_eq!(frag.open_tag, "<head>");
        assert_eq!(frag.contents, "<title>t</title>");
    }

    #[test]
    fn test_missing_regions() {
        assert!(html_frag("<p>fragment</p>").is_none());
        assert!(head_frag("<html><body></body></html>").is_none());
        assert!(footer_scripts_frag("<!-- footer-scripts --><script></script>").is_none());
    }

    #[test]
    fn test_footer_scripts_frag() {
        let doc = "<body><p>x</p><!-- footer scripts -->\n<script src=\"/a.js\"></script>\n<!-- footer scripts --></body>";
        let frag = footer_scripts_frag(doc).unwrap();
        assert_eq!(frag.open_tag, "<!-- footer scripts -->");
        assert_eq!(frag.closing_tag, frag.open_tag);
        assert_eq!(frag.contents.trim(), "<script src=\"/a.js\"></script>");
        assert_eq!(&doc[frag.span], "<!-- footer scripts -->\n<script src=\"/a.js\"></script>\n<!-- footer scripts -->");
    }

    #[test]
    fn test_footer_markers_must_match_exactly() {
        let doc = "<!-- footer-scripts --><script></script><!-- footer_scripts -->";
        assert!(footer_scripts_frag(doc).is_none());
    }
}
