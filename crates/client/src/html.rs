//! Final HTML whitespace and comment compression.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::LazyLock;

use regex::Regex;

/// Regions whose whitespace is significant, kept byte-for-byte.
static PRESERVATIONS_RE: LazyLock<Regex> = LazyLock::new(|| {
    let special_tags = ["pre", "code", "script", "style", "textarea"]
        .iter()
        .map(|tag| format!(r"<{tag}(?:\s+[^>]*?)?>.*?</{tag}>"))
        .collect::<Vec<_>>()
        .join("|");
    let conditional_comments = r"<![^\[>]*?\[if\W[^\]]*?\][^>]*?>.*?<![^\[>]*?\[endif\][^>]*?>";
    let special_attributes = r#"\s(?:style|on[a-z]+)\s*=\s*(?:"[^"]*"|'[^']*')"#;
    Regex::new(&format!("(?is){special_tags}|{conditional_comments}|{special_attributes}")).expect("valid preservation regex")
});

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid comment regex"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static SELF_CLOSING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+/>").expect("valid self-closing regex"));

/// `stem-<hex>`, freshly drawn and absent from `haystack`.
pub(crate) fn unique_marker(haystack: &str, stem: &str) -> String {
    let state = RandomState::new();
    let mut salt = 0u64;
    loop {
        let marker = format!("{stem}-{:016x}", state.hash_one(salt));
        if !haystack.contains(&marker) {
            return marker;
        }
        salt += 1;
    }
}

/// Strip comments and collapse whitespace, leaving preserved regions intact.
pub fn compress_html(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }

    let marker = unique_marker(html, "minify-html");
    let placeholder = |index: usize| format!("%%{marker}-{index}%%");

    let mut preserved: Vec<String> = Vec::new();
    let shielded = PRESERVATIONS_RE.replace_all(html, |caps: &regex::Captures<'_>| {
        preserved.push(caps[0].to_string());
        placeholder(preserved.len() - 1)
    });

    let compressed = COMMENT_RE.replace_all(&shielded, "");
    let compressed = WHITESPACE_RE.replace_all(&compressed, " ");
    let compressed = SELF_CLOSING_RE.replace_all(&compressed, "/>");

    let restored = preserved
        .iter()
        .enumerate()
        .fold(compressed.into_owned(), |out, (index, region)| out.replacen(&placeholder(index), region, 1));
    restored.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_whitespace_and_strips_comments() {
        let html = "<html>\n  <body>\n    <!-- note -->\n    <p>Hello   world</p>\n    <br   />\n  </body>\n</html>\n";
        assert_eq!(compress_html(html), "<html> <body> <p>Hello world</p> <br/> </body> </html>");
    }

    #[test]
    fn test_preserves_whitespace_sensitive_regions() {
        let html = "<div>\n<pre>\n  a\n   b\n</pre>\n<textarea name=\"t\">  x\n y </textarea>\n<script>\nvar a = 1; // <!-- not a comment -->\n</script>\n</div>";
        let out = compress_html(html);
        assert!(out.contains("<pre>\n  a\n   b\n</pre>"));
        assert!(out.contains("<textarea name=\"t\">  x\n y </textarea>"));
        assert!(out.contains("<script>\nvar a = 1; // <!-- not a comment -->\n</script>"));
    }

    #[test]
    fn test_preserves_conditional_comments_and_attributes() {
        let html = "<!--[if IE]>\n<link rel=\"stylesheet\" href=\"/ie.css\">\n<![endif]-->\n<a  onclick=\"go( 1,  2 )\"   style='color:  red'>x</a>";
        let out = compress_html(html);
        assert!(out.starts_with("<!--[if IE]>\n<link rel=\"stylesheet\" href=\"/ie.css\">\n<![endif]-->"));
        assert!(out.contains(r#"onclick="go( 1,  2 )""#));
        assert!(out.contains("style='color:  red'>x</a>"));
    }

    #[test]
    fn test_placeholder_lookalike_is_kept() {
        assert_eq!(compress_html("<p>%%minify-html-99%%</p>"), "<p>%%minify-html-99%%</p>");
        assert_eq!(compress_html("<pre> x </pre><p>%%minify-html-0%%</p>"), "<pre> x </pre><p>%%minify-html-0%%</p>");
    }

    #[test]
    fn test_unique_marker_avoids_haystack() {
        let first = unique_marker("", "stem");
        assert!(first.starts_with("stem-"));
        let second = unique_marker(&format!("text {first} text"), "stem");
        assert_ne!(first, second);
    }
}
