//! The compression pipeline.
//!
//! ### Stages (fixed order)
//! 1. Bail out on input without `</html>` or on an excluded request URI
//! 2. Detect AMP documents and switch combination off for them
//! 3. Swap `<noscript>` regions for tokens
//! 4. Combine head/body CSS, head JS, footer JS
//! 5. Minify inline JS, then inline JSON, in place
//! 6. Restore tokens, compress the HTML itself
//! 7. Occasionally sweep the cache; append benchmark notes
//!
//! Every stage is a no-op when disabled or when it finds nothing to do.

use std::ops::Range;
use std::sync::LazyLock;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::time::{Instant, SystemTime};

use regex::Regex;

use crate::context::RequestContext;
use crate::css::CssResolver;
use crate::extract::{self, ExclusionRules, FragmentKind, HtmlFrag, TagExtractor, TagFragment};
use crate::fetch::Fetcher;
use crate::fetch::url::set_scheme;
use crate::html::{compress_html, unique_marker};
use crate::minify::{Lang, Minifier, try_minify};
use crate::parts::{InsertionPoint, PartCompiler, render_tags};
use htmlc_core::benchmark::Timer;
use htmlc_core::cache::CacheSettings;
use htmlc_core::cache::hash::content_hash;
use htmlc_core::{Benchmark, BenchmarkMode, CacheStore, CompressorConfig, Error, HookApi};

static CLOSING_HTML_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</html>").expect("valid closing html regex"));

static AMP_URI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)/amp/(?:$|[?&#])").expect("valid amp uri regex"));

static AMP_HTML_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<html(?:\s[^>]*?\s|\s)(?:⚡|amp)[\s=>]").expect("valid amp html regex"));

static NOSCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<noscript(?:\s[^>]*)?>.*?</noscript>").expect("valid noscript regex"));

static TAG_LINES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r">\s*?[\r\n]+\s*<").expect("valid tag lines regex"));

/// One in this many calls sweeps the cache.
const CLEANUP_ODDS: u64 = 20;

/// Stage switches for one call.
#[derive(Debug, Clone, Copy)]
struct Stages {
    head_body_css: bool,
    head_js: bool,
    footer_js: bool,
    inline_js: bool,
    html: bool,
}

/// `<noscript>` regions swapped out for the duration of one call.
#[derive(Debug)]
struct GlobalExclusions {
    marker: String,
    regions: Vec<String>,
}

impl GlobalExclusions {
    /// Swap every region of `html` for a token unique to this call.
    fn tokenize(html: &str) -> (Self, String) {
        let marker = unique_marker(html, "htmlc-gxt");
        let mut regions = Vec::new();
        let tokenized = NOSCRIPT_RE
            .replace_all(html, |caps: &regex::Captures<'_>| {
                regions.push(caps[0].to_string());
                token(&marker, regions.len() - 1)
            })
            .into_owned();
        (Self { marker, regions }, tokenized)
    }

    /// Put every region back, last token first.
    fn restore(self, html: String) -> String {
        let marker = self.marker;
        self.regions.into_iter().enumerate().rev().fold(html, |html, (index, region)| html.replacen(&token(&marker, index), &region, 1))
    }
}

fn token(marker: &str, index: usize) -> String {
    format!("<{marker}-{index} />")
}

/// Compresses complete HTML documents for one request context.
///
/// Not `Sync`: the benchmark sink is single-threaded. Build one per worker.
pub struct Compressor {
    config: CompressorConfig,
    context: RequestContext,
    store: CacheStore,
    extractor: TagExtractor,
    uri_rules: ExclusionRules,
    css: CssResolver,
    fetcher: Box<dyn Fetcher>,
    minifier: Box<dyn Minifier>,
    hooks: HookApi,
    benchmark: Benchmark,
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor").field("context", &self.context).field("store", &self.store).field("hooks", &self.hooks).finish()
    }
}

impl Compressor {
    /// Validate the request context and cache settings and compile every pattern.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` when the host, URI, a cache directory or the
    /// public URL base is missing, or when an exclusion pattern is invalid.
    pub fn new(config: CompressorConfig, fetcher: impl Fetcher + 'static, minifier: impl Minifier + 'static) -> Result<Self, Error> {
        let context = RequestContext::from_config(&config)?;

        let mut settings = CacheSettings::from_config(&config, context.host())?;
        settings.public_url = set_scheme(&settings.public_url, context.scheme());

        let store = CacheStore::new(settings);
        let extractor = TagExtractor::new(&config, context.host())?;
        let uri_rules = ExclusionRules::uri(&config)?;
        let css = CssResolver::new(context.clone(), &config.vendor_css_prefixes)?;
        let benchmark = Benchmark::new(config.benchmark == BenchmarkMode::Details);

        Ok(Self {
            config,
            context,
            store,
            extractor,
            uri_rules,
            css,
            fetcher: Box::new(fetcher),
            minifier: Box::new(minifier),
            hooks: HookApi::new(),
            benchmark,
        })
    }

    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn hooks(&self) -> &HookApi {
        &self.hooks
    }

    /// Register `PartUrl`/`CssUrl` filters here.
    pub fn hooks_mut(&mut self) -> &mut HookApi {
        &mut self.hooks
    }

    pub fn benchmark(&self) -> &Benchmark {
        &self.benchmark
    }

    /// Compress one document.
    ///
    /// Input without a closing `</html>` tag, or requested at an excluded URI,
    /// comes back byte-for-byte unchanged.
    ///
    /// # Errors
    ///
    /// Fatal errors only: `Error::CacheWrite` when a cache file cannot be written,
    /// `Error::Configuration` when a URL cannot be resolved for lack of a host.
    pub fn compress(&self, html: &str) -> Result<String, Error> {
        let started = Instant::now();
        let mark = self.benchmark.mark();

        if !CLOSING_HTML_RE.is_match(html) {
            tracing::debug!("no closing </html> tag; passing through");
            return Ok(html.to_string());
        }
        if self.uri_rules.is_match(self.context.uri()) {
            tracing::debug!(uri = self.context.uri(), "request URI excluded; passing through");
            return Ok(html.to_string());
        }

        let html = html.trim();
        let stages = self.stages_for(html);

        let (exclusions, mut html) = GlobalExclusions::tokenize(html);

        if stages.head_body_css {
            html = self.combine_head_body_css(html)?;
        }
        if stages.head_js {
            html = self.combine_head_js(html)?;
        }
        if stages.footer_js {
            html = self.combine_footer_js(html)?;
        }
        if stages.inline_js {
            html = self.compress_inline_scripts(html, Lang::Js);
            html = self.compress_inline_scripts(html, Lang::Json);
        }

        let mut html = exclusions.restore(html).trim().to_string();

        if stages.html {
            let mut timer = self.benchmark.timer("compress_html");
            html = compress_html(&html);
            self.describe(&mut timer, "compressing HTML", &html);
        }

        if self.config.cleanup_cache_dirs && cleanup_due() {
            self.store.cleanup();
        }

        if self.config.benchmark != BenchmarkMode::Off {
            html.push_str(&self.benchmark.comments(&self.config.product_title, mark, started.elapsed()));
        }
        Ok(html)
    }

    /// Compress, serving the input unchanged on any fatal error.
    pub fn compress_or_original(&self, html: &str) -> String {
        match self.compress(html) {
            Ok(compressed) => compressed,
            Err(err) => {
                tracing::error!(error = %err, "compression failed; serving the original document");
                html.to_string()
            }
        }
    }

    fn stages_for(&self, html: &str) -> Stages {
        let config = &self.config;
        let amp = config.amp_exclusions_enable && (AMP_URI_RE.is_match(self.context.uri()) || AMP_HTML_RE.is_match(html));
        if amp {
            tracing::debug!("AMP document; combination disabled");
        }
        Stages {
            head_body_css: config.compress_combine_head_body_css && !amp,
            head_js: config.compress_combine_head_js && !amp,
            footer_js: config.compress_combine_footer_js && !amp,
            inline_js: config.compress_js_code && config.compress_inline_js_code,
            html: config.compress_html_code,
        }
    }

    fn compiler(&self) -> PartCompiler<'_> {
        PartCompiler {
            context: &self.context,
            css: &self.css,
            store: &self.store,
            fetcher: self.fetcher.as_ref(),
            minifier: self.minifier.as_ref(),
            hooks: &self.hooks,
            benchmark: &self.benchmark,
            compress_css: self.config.compress_css_code,
            compress_js: self.config.compress_js_code,
        }
    }

    fn describe(&self, timer: &mut Timer<'_>, what: &str, html: &str) {
        if self.benchmark.is_enabled() {
            timer.task(format!("{what} in checksum: `{}`", content_hash(html)));
        }
    }

    /// Move every CSS tag in the document into combined parts at the end of `<head>`.
    fn combine_head_body_css(&self, html: String) -> Result<String, Error> {
        let mut timer = self.benchmark.timer("combine_head_body_css");
        let (Some(doc), Some(head)) = (extract::html_frag(&html), extract::head_frag(&html)) else {
            return Ok(html);
        };

        let mut frags = self.extractor.css_frags(&doc.contents);
        for frag in &mut frags {
            frag.span = shift(&frag.span, doc.contents_span.start);
        }
        if frags.is_empty() {
            return Ok(html);
        }
        if frags.iter().any(|frag| overlaps(&frag.span, &head.span) && !contains(&head.contents_span, &frag.span)) {
            tracing::warn!("CSS tag crosses the <head> boundary; leaving CSS uncombined");
            return Ok(html);
        }

        let parts = self.compiler().compile_css(&frags, InsertionPoint::Head)?;
        if parts.is_empty() {
            return Ok(html);
        }

        let (in_head, elsewhere): (Vec<&TagFragment>, Vec<&TagFragment>) =
            frags.iter().partition(|frag| contains(&head.contents_span, &frag.span));
        let head_spans = in_head.iter().map(|frag| shift_back(&frag.span, head.contents_span.start));
        let cleaned = cleanup_tag_lines(&remove_spans(&head.contents, head_spans));

        let mut edits: Vec<(Range<usize>, String)> = elsewhere.iter().map(|frag| (frag.span.clone(), String::new())).collect();
        edits.push((head.span.clone(), rebuild(&head, &cleaned, &render_tags(&parts, &frags))));

        let out = splice(&html, edits).trim().to_string();
        self.describe(&mut timer, "compressing/combining head/body CSS", &out);
        Ok(out)
    }

    fn combine_head_js(&self, html: String) -> Result<String, Error> {
        let mut timer = self.benchmark.timer("combine_head_js");
        let Some(head) = extract::head_frag(&html) else {
            return Ok(html);
        };
        let frags = self.extractor.js_frags(&head.contents);
        let parts = self.compiler().compile_js(&frags, InsertionPoint::Head)?;
        if parts.is_empty() {
            return Ok(html);
        }

        let cleaned = cleanup_tag_lines(&remove_spans(&head.contents, frags.iter().map(|frag| frag.span.clone())));
        let rebuilt = rebuild(&head, &cleaned, &render_tags(&parts, &frags));

        let out = splice(&html, vec![(head.span.clone(), rebuilt)]).trim().to_string();
        self.describe(&mut timer, "compressing/combining head JS", &out);
        Ok(out)
    }

    fn combine_footer_js(&self, html: String) -> Result<String, Error> {
        let mut timer = self.benchmark.timer("combine_footer_js");
        let Some(footer) = extract::footer_scripts_frag(&html) else {
            return Ok(html);
        };
        let frags = self.extractor.js_frags(&footer.contents);
        let parts = self.compiler().compile_js(&frags, InsertionPoint::Foot)?;
        if parts.is_empty() {
            return Ok(html);
        }

        let cleaned = remove_spans(&footer.contents, frags.iter().map(|frag| frag.span.clone()));
        let rebuilt = rebuild(&footer, &cleaned, &render_tags(&parts, &frags));

        let out = splice(&html, vec![(footer.span.clone(), rebuilt)]).trim().to_string();
        self.describe(&mut timer, "compressing/combining footer JS", &out);
        Ok(out)
    }

    /// Minify the body of every non-excluded inline script of `lang` in place.
    fn compress_inline_scripts(&self, html: String, lang: Lang) -> String {
        let mut timer = self.benchmark.timer(match lang {
            Lang::Json => "compress_inline_json",
            _ => "compress_inline_js",
        });
        let Some(doc) = extract::html_frag(&html) else {
            return html;
        };

        let edits: Vec<(Range<usize>, String)> = self
            .extractor
            .js_frags(&doc.contents)
            .into_iter()
            .filter(|frag| !frag.exclude)
            .filter_map(|frag| {
                let code = match (&frag.kind, lang) {
                    (FragmentKind::InlineScript { code, .. }, Lang::Js) | (FragmentKind::Json { code }, Lang::Json) => code,
                    _ => return None,
                };
                let body = match try_minify(self.minifier.as_ref(), lang, code) {
                    Some(minified) => format!("/*<![CDATA[*/{minified}/*]]>*/"),
                    None => code.clone(),
                };
                let markup = format!("{}{}{body}{}{}", frag.if_open_tag, frag.open_tag, frag.closing_tag, frag.if_closing_tag);
                Some((shift(&frag.span, doc.contents_span.start), markup))
            })
            .collect();
        if edits.is_empty() {
            return html;
        }

        let out = splice(&html, edits).trim().to_string();
        let what = match lang {
            Lang::Json => "compressing inline JSON",
            _ => "compressing inline JS",
        };
        self.describe(&mut timer, what, &out);
        out
    }
}

/// Whether this call should sweep the cache.
fn cleanup_due() -> bool {
    cleanup_drawn(RandomState::new().hash_one(SystemTime::now()))
}

fn cleanup_drawn(draw: u64) -> bool {
    draw % CLEANUP_ODDS == 0
}

/// `open\ncontents\ntags\nclose`, skipping empty pieces.
fn rebuild(region: &HtmlFrag, contents: &str, tags: &str) -> String {
    [region.open_tag.as_str(), contents, tags, region.closing_tag.as_str()]
        .into_iter()
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse whitespace runs between tags that contain a line break to a single `\n`.
fn cleanup_tag_lines(html: &str) -> String {
    TAG_LINES_RE.replace_all(html, ">\n<").trim().to_string()
}

fn shift(span: &Range<usize>, by: usize) -> Range<usize> {
    span.start + by..span.end + by
}

fn shift_back(span: &Range<usize>, by: usize) -> Range<usize> {
    span.start - by..span.end - by
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

fn contains(outer: &Range<usize>, inner: &Range<usize>) -> bool {
    outer.start <= inner.start && inner.end <= outer.end
}

fn remove_spans(text: &str, spans: impl Iterator<Item = Range<usize>>) -> String {
    splice(text, spans.map(|span| (span, String::new())).collect())
}

/// Apply non-overlapping `(span, replacement)` edits to `text`.
fn splice(text: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by_key(|(span, _)| span.start);
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (span, replacement) in edits {
        if span.start < last {
            continue;
        }
        out.push_str(&text[last..span.start]);
        out.push_str(&replacement);
        last = span.end;
    }
    out.push_str(&text[last..]);
    out
}
