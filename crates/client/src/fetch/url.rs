//! URL parsing, unparsing and browser-style relative resolution.
//!
//! ### Normalization mask
//! - `SCHEME`: lower-case the scheme
//! - `HOST`: lower-case the host
//! - `PATH`: default to `/`, collapse separators, force a leading slash
//!
//! The remaining bits are carried for callers that want to name a component
//! but are not altered by normalization.

use std::ops::BitOr;
use std::sync::LazyLock;

use regex::Regex;

/// Error type for URL parsing and resolution failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unable to parse: `{0}`")]
    Unparsable(String),

    /// Neither the candidate nor its base carries a host.
    #[error("no base host to resolve `{0}` against")]
    MissingBaseHost(String),
}

/// Bitmask selecting which components `parse`/`unparse` normalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlNormalize(u8);

impl UrlNormalize {
    pub const NONE: Self = Self(0);
    pub const SCHEME: Self = Self(1);
    pub const USER: Self = Self(2);
    pub const PASS: Self = Self(4);
    pub const HOST: Self = Self(8);
    pub const PORT: Self = Self(16);
    pub const PATH: Self = Self(32);
    pub const QUERY: Self = Self(64);
    pub const FRAGMENT: Self = Self(128);
    pub const DEFAULT: Self = Self(1 | 8 | 32);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for UrlNormalize {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Default for UrlNormalize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Components of a URL. Missing components are empty (or `0` for the port).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParts {
    pub scheme: String,
    pub user: String,
    pub pass: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

/// Parse a URL, URI or relative reference.
///
/// A protocol-relative `//host/path` yields an empty scheme.
///
/// # Errors
///
/// Returns `UrlError::Unparsable` for an empty authority after `//` or a bad port.
pub fn parse(input: &str, mask: UrlNormalize) -> Result<UrlParts, UrlError> {
    let mut parts = UrlParts::default();
    let mut rest = input.trim();

    if let Some((before, fragment)) = rest.split_once('#') {
        parts.fragment = fragment.to_string();
        rest = before;
    }
    if let Some((before, query)) = rest.split_once('?') {
        parts.query = query.to_string();
        rest = before;
    }

    let (scheme, rest) = split_scheme(rest);
    parts.scheme = scheme.to_string();

    if let Some(after) = rest.strip_prefix("//") {
        let end = after.find('/').unwrap_or(after.len());
        let (authority, path) = after.split_at(end);
        parse_authority(authority, &mut parts).map_err(|()| UrlError::Unparsable(input.to_string()))?;
        parts.path = path.to_string();
    } else {
        parts.path = rest.to_string();
    }

    normalize(&mut parts, mask);
    Ok(parts)
}

fn split_scheme(value: &str) -> (&str, &str) {
    let Some(colon) = value.find(':') else {
        return ("", value);
    };
    let (scheme, after) = (&value[..colon], &value[colon + 1..]);

    let valid = scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    // `host:8080/path` has no scheme.
    let port_like = !after.starts_with("//") && after.chars().next().is_some_and(|c| c.is_ascii_digit());

    if valid && !port_like { (scheme, after) } else { ("", value) }
}

fn parse_authority(authority: &str, parts: &mut UrlParts) -> Result<(), ()> {
    let host_port = match authority.rsplit_once('@') {
        Some((userinfo, host_port)) => {
            match userinfo.split_once(':') {
                Some((user, pass)) => {
                    parts.user = user.to_string();
                    parts.pass = pass.to_string();
                }
                None => parts.user = userinfo.to_string(),
            }
            host_port
        }
        None => authority,
    };

    let (host, port) = if host_port.starts_with('[') {
        let close = host_port.find(']').ok_or(())?;
        let (host, tail) = host_port.split_at(close + 1);
        (host, tail.strip_prefix(':'))
    } else {
        match host_port.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        }
    };

    if host.is_empty() {
        return Err(());
    }
    parts.host = host.to_string();

    if let Some(port) = port.filter(|p| !p.is_empty()) {
        parts.port = port.parse().map_err(|_| ())?;
    }
    Ok(())
}

fn normalize(parts: &mut UrlParts, mask: UrlNormalize) {
    if mask.contains(UrlNormalize::SCHEME) {
        parts.scheme = parts.scheme.to_lowercase();
    }
    if mask.contains(UrlNormalize::HOST) {
        parts.host = parts.host.to_lowercase();
    }
    if mask.contains(UrlNormalize::PATH) {
        let path = normalize_path_seps(if parts.path.is_empty() { "/" } else { &parts.path });
        parts.path = if path.starts_with('/') { path } else { format!("/{path}") };
    }
}

/// Turn backslashes into `/` and collapse repeated separators.
pub fn normalize_path_seps(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars().map(|c| if c == '\\' { '/' } else { c }) {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Reassemble URL components.
pub fn unparse(parts: &UrlParts, mask: UrlNormalize) -> String {
    let mut parts = parts.clone();
    normalize(&mut parts, mask);

    let mut out = String::new();
    if !parts.scheme.is_empty() {
        out.push_str(&parts.scheme);
        out.push_str("://");
    } else if !parts.host.is_empty() {
        out.push_str("//");
    }
    if !parts.user.is_empty() {
        out.push_str(&parts.user);
        if !parts.pass.is_empty() {
            out.push(':');
            out.push_str(&parts.pass);
        }
        out.push('@');
    }
    out.push_str(&parts.host);
    if parts.port != 0 {
        out.push_str(&format!(":{}", parts.port));
    }
    out.push_str(&parts.path);
    if !parts.query.is_empty() {
        out.push('?');
        out.push_str(&parts.query);
    }
    if !parts.fragment.is_empty() {
        out.push('#');
        out.push_str(&parts.fragment);
    }
    out
}

/// Normalized `path?query#fragment` of a URL or URI.
///
/// # Errors
///
/// Returns `UrlError::Unparsable` if the input cannot be parsed.
pub fn parse_uri(input: &str) -> Result<String, UrlError> {
    let parts = parse(input, UrlNormalize::DEFAULT)?;
    Ok(unparse(&UrlParts { path: parts.path, query: parts.query, fragment: parts.fragment, ..UrlParts::default() }, UrlNormalize::PATH))
}

/// Resolve `relative` against an absolute `base` the way a browser does.
///
/// # Errors
///
/// Returns `UrlError::MissingBaseHost` if the candidate has no host and the
/// base has none either, or `UrlError::Unparsable` for malformed input.
pub fn resolve(relative: &str, base: &str) -> Result<String, UrlError> {
    let mut rel = parse(relative, UrlNormalize::NONE)?;
    rel.path = normalize_path_seps(&rel.path);

    if !rel.host.is_empty() {
        if rel.scheme.is_empty() {
            rel.scheme = parse(base, UrlNormalize::DEFAULT)?.scheme;
        }
        return Ok(unparse(&rel, UrlNormalize::DEFAULT));
    }

    let mut parts = parse(base, UrlNormalize::DEFAULT)?;
    if parts.host.is_empty() {
        return Err(UrlError::MissingBaseHost(relative.to_string()));
    }

    if !rel.path.is_empty() {
        let dir = if rel.path.starts_with('/') {
            ""
        } else {
            parts.path.rfind('/').map_or("", |slash| &parts.path[..slash])
        };
        let mut path = format!("{dir}{}{}", if rel.path.starts_with('/') { "" } else { "/" }, rel.path);

        loop {
            let (collapsed, count) = collapse_dot_segments(&path);
            path = collapsed;
            if count == 0 {
                break;
            }
        }
        parts.path = path.replace("../", "");
        parts.query = rel.query;
    } else if !rel.query.is_empty() {
        parts.query = rel.query;
    }
    parts.fragment = rel.fragment;

    Ok(unparse(&parts, UrlNormalize::DEFAULT))
}

/// One collapse pass: every `/./` turns into `/`, then every `/segment/../`
/// turns into `/` where the segment does not start with `..`.
/// Returns the new path and the number of replacements made.
fn collapse_dot_segments(path: &str) -> (String, usize) {
    let mut count = path.matches("/./").count();
    let path = path.replace("/./", "/");

    let mut out = String::with_capacity(path.len());
    let mut i = 0;
    while i < path.len() {
        if path[i..].starts_with('/')
            && let Some(len) = path[i + 1..].find('/')
        {
            let segment = &path[i + 1..i + 1 + len];
            let after = i + 1 + len;
            if !segment.is_empty() && !segment.starts_with("..") && path[after..].starts_with("/../") {
                out.push('/');
                i = after + 4;
                count += 1;
                continue;
            }
        }
        let c = path[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&path[i..i + c]);
        i += c;
    }
    (out, count)
}

static AMPS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"&amp;|&#0*38;|&#[xX]0*26;").expect("valid amps regex"));
static SCHEME_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^(?:[a-z0-9]+:)?//").expect("valid scheme regex"));

/// Decode HTML-escaped ampersands in a URL taken from markup.
pub fn normalize_amps(url: &str) -> String {
    if !url.contains('&') {
        return url.to_string();
    }
    AMPS_RE.replace_all(url, "&").into_owned()
}

/// Replace the scheme of an absolute or protocol-relative URL. `//` keeps it protocol-relative.
pub fn set_scheme(url: &str, scheme: &str) -> String {
    let prefix = if scheme == "//" { "//".to_string() } else { format!("{}://", scheme.to_lowercase()) };
    SCHEME_PREFIX_RE.replace(url, regex::NoExpand(&prefix)).into_owned()
}

/// Whether `url` points at a host other than `current_host`. Relative references are never external.
pub fn is_external(url: &str, current_host: &str) -> bool {
    if !url.contains("//") {
        return false;
    }
    !url.to_lowercase().contains(&format!("//{}", current_host.to_lowercase()))
}

/// Validate a resolved URL before it is sent over the wire.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Require an `http` or `https` scheme
/// 3. Lowercase the host
/// 4. Remove fragment (#...)
/// 5. Keep query string intact (do not reorder)
pub fn canonicalize(input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let mut parsed = url::Url::parse(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    parsed.set_fragment(None);

    Ok(parsed)
}
