//! Grouping of tag fragments into cacheable parts.
//!
//! ### Algorithm (one insertion point at a time)
//! 1. Hash the ordered fragment list, with excluded fragments reduced to a
//!    bare marker, into a manifest key
//! 2. A fresh manifest for that key is returned as-is
//! 3. Otherwise fragments are walked in order: excluded ones become
//!    placeholder parts at their position, the rest are fetched/resolved and
//!    appended to the open part
//! 4. Each part with code is hashed, minified, written to the public tree
//!    and given its output tag; the part list is written as the manifest
//!
//! Cache write failures abort; fetch and minify failures degrade.

mod css;
mod js;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::context::RequestContext;
use crate::css::CssResolver;
use crate::extract::TagFragment;
use crate::fetch::{Fetcher, UrlError, strip_utf8_bom};
use crate::minify::{Lang, Minifier, minify_or_original};
use htmlc_core::cache::hash::{content_hash, manifest_key};
use htmlc_core::{AssetKind, Benchmark, CacheStore, Error, Hook, HookApi};

/// Where compiled tags are inserted; passed to [`Hook::PartUrl`] filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertionPoint {
    Head,
    Foot,
}

impl InsertionPoint {
    pub fn as_str(self) -> &'static str {
        match self {
            InsertionPoint::Head => "head",
            InsertionPoint::Foot => "foot",
        }
    }
}

/// A group of same-context fragments, or a placeholder for one excluded fragment.
///
/// Position in the part list is the ordinal. Code is only held while compiling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPart {
    /// CSS media; `None` for JS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    /// Output markup; empty for placeholders.
    #[serde(default)]
    pub tag: String,
    /// Index of the excluded fragment this part stands in for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_frag: Option<usize>,
    #[serde(skip)]
    code: String,
}

impl AssetPart {
    /// Markup this part contributes: its tag, or the excluded fragment verbatim.
    pub fn markup<'a>(&'a self, frags: &'a [TagFragment]) -> &'a str {
        match self.exclude_frag {
            Some(index) => frags.get(index).map_or("", |frag| frag.all.as_str()),
            None => &self.tag,
        }
    }
}

/// Output tags for `parts`, one per line.
pub fn render_tags(parts: &[AssetPart], frags: &[TagFragment]) -> String {
    parts.iter().map(|part| part.markup(frags)).filter(|markup| !markup.is_empty()).collect::<Vec<_>>().join("\n")
}

/// Ordered parts under construction. Only the last part can be open.
#[derive(Debug, Default)]
struct PartList {
    parts: Vec<AssetPart>,
    open: bool,
}

impl PartList {
    fn placeholder(&mut self, frag_index: usize) {
        self.parts.push(AssetPart { exclude_frag: Some(frag_index), ..AssetPart::default() });
        self.open = false;
    }

    fn passthrough(&mut self, tag: &str) {
        self.parts.push(AssetPart { tag: tag.to_string(), ..AssetPart::default() });
        self.open = false;
    }

    fn open_part(&self) -> Option<&AssetPart> {
        self.parts.last().filter(|_| self.open)
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn append(&mut self, media: Option<&str>, code: &str) {
        if !self.open {
            self.parts.push(AssetPart { media: media.map(str::to_string), ..AssetPart::default() });
            self.open = true;
        }
        if let Some(part) = self.parts.last_mut() {
            if !part.code.is_empty() {
                part.code.push_str("\n\n");
            }
            part.code.push_str(code);
        }
    }

    fn into_parts(self) -> Vec<AssetPart> {
        self.parts
    }
}

/// Key entry: excluded fragments count only by position.
#[derive(Serialize)]
#[serde(untagged)]
enum KeyEntry<'a> {
    Excluded { exclude: bool },
    Fragment(&'a TagFragment),
}

fn fragments_key(frags: &[TagFragment]) -> Result<String, Error> {
    let entries: Vec<KeyEntry<'_>> =
        frags.iter().map(|frag| if frag.exclude { KeyEntry::Excluded { exclude: true } } else { KeyEntry::Fragment(frag) }).collect();
    manifest_key(&entries)
}

/// Compiles fragment lists into parts. Borrowed for one `compress()` call.
pub struct PartCompiler<'a> {
    pub context: &'a RequestContext,
    pub css: &'a CssResolver,
    pub store: &'a CacheStore,
    pub fetcher: &'a dyn Fetcher,
    pub minifier: &'a dyn Minifier,
    pub hooks: &'a HookApi,
    pub benchmark: &'a Benchmark,
    pub compress_css: bool,
    pub compress_js: bool,
}

impl PartCompiler<'_> {
    fn cached(&self, kind: AssetKind, key: &str) -> Option<Vec<AssetPart>> {
        let parts = self.store.read_manifest::<Vec<AssetPart>>(kind, key);
        tracing::debug!(kind = kind.ext(), key, hit = parts.is_some(), "parts manifest lookup");
        parts
    }

    /// Resolve `target` against the current page and fetch it.
    ///
    /// `None` when the URL is unusable or the fetch fails or comes back empty.
    fn fetch_resolved(&self, target: &str) -> Result<Option<(String, String)>, Error> {
        let url = match self.context.resolve(target, None) {
            Ok(url) => url,
            Err(UrlError::MissingBaseHost(url)) => return Err(Error::Configuration(format!("no base host to resolve `{url}` against"))),
            Err(err) => {
                tracing::warn!(url = target, error = %err, "skipping asset with an unresolvable URL");
                return Ok(None);
            }
        };

        match self.fetcher.fetch(&url) {
            Ok(body) => {
                let body = strip_utf8_bom(&body);
                tracing::debug!(%url, bytes = body.len(), "fetched asset");
                Ok((!body.is_empty()).then(|| (url, body.to_string())))
            }
            Err(err) => {
                tracing::warn!(%url, error = %err, "unable to fetch asset; it contributes no content");
                Ok(None)
            }
        }
    }

    /// Hash, minify and write one part's code. Returns the filtered public URL.
    fn store_part(&self, kind: AssetKind, point: InsertionPoint, code: &str) -> Result<String, Error> {
        let code_hash = content_hash(code);
        let (enabled, lang) = match kind {
            AssetKind::Css => (self.compress_css, Lang::Css),
            AssetKind::Js => (self.compress_js, Lang::Js),
        };
        let output = if enabled { minify_or_original(self.minifier, lang, code) } else { code.to_string() };

        let url = self.store.write_artifact(kind, &code_hash, &output)?;
        Ok(self.hooks.apply_filters(Hook::PartUrl, url, point.as_str()))
    }

    fn finish(&self, kind: AssetKind, key: &str, mut parts: Vec<AssetPart>) -> Result<Vec<AssetPart>, Error> {
        parts.retain(|part| part.exclude_frag.is_some() || !part.tag.is_empty());
        self.store.write_manifest(kind, key, &parts)?;

        let excluded = parts.iter().filter(|part| part.exclude_frag.is_some()).count();
        self.benchmark.add_data(
            &format!("{}_parts", kind.ext()),
            json!({ "key": key, "parts": parts.len() - excluded, "excluded": excluded }),
        );
        Ok(parts)
    }
}

/// Attribute-safe form of `value`.
pub(crate) fn esc_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;").replace('\'', "&#039;").replace('<', "&lt;").replace('>', "&gt;")
}
