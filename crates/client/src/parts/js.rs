use super::{AssetPart, InsertionPoint, PartCompiler, PartList, esc_attr, fragments_key};
use crate::extract::{FragmentKind, TagFragment};
use crate::fetch::strip_utf8_bom;
use htmlc_core::{AssetKind, Error};

/// Statement-terminate a script so concatenation cannot merge two statements.
fn terminate(code: &str) -> String {
    format!("{};", code.trim_end().trim_end_matches(';'))
}

impl PartCompiler<'_> {
    /// Group script fragments into parts, one `<script src>` per part.
    ///
    /// Inline JSON is never combined; each block becomes a passthrough part
    /// holding its original markup.
    ///
    /// # Errors
    ///
    /// Returns `Error::CacheWrite` if an artifact or the manifest cannot be written,
    /// or `Error::Configuration` if a URL cannot be resolved for lack of a host.
    pub fn compile_js(&self, frags: &[TagFragment], point: InsertionPoint) -> Result<Vec<AssetPart>, Error> {
        if frags.is_empty() {
            return Ok(Vec::new());
        }
        let mut timer = self.benchmark.timer("compile_js_parts");
        let key = fragments_key(frags)?;
        timer.task(format!("building parts based on JS tag frags in checksum: `{key}`"));

        if let Some(parts) = self.cached(AssetKind::Js, &key) {
            return Ok(parts);
        }

        let mut list = PartList::default();
        for (index, frag) in frags.iter().enumerate() {
            if frag.exclude {
                list.placeholder(index);
                continue;
            }
            match &frag.kind {
                FragmentKind::Script { src, .. } => {
                    if let Some((_, body)) = self.fetch_resolved(src)? {
                        list.append(None, &terminate(&body));
                    }
                }
                FragmentKind::InlineScript { code, .. } => list.append(None, &terminate(strip_utf8_bom(code))),
                FragmentKind::Json { .. } => list.passthrough(&frag.all),
                _ => {}
            }
        }

        let mut parts = list.into_parts();
        for part in parts.iter_mut().filter(|part| part.exclude_frag.is_none() && !part.code.is_empty()) {
            let url = self.store_part(AssetKind::Js, point, &part.code)?;
            part.tag = format!(r#"<script type="text/javascript" src="{}"></script>"#, esc_attr(&url));
            part.code.clear();
        }

        self.finish(AssetKind::Js, &key, parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parts::render_tags;
    use crate::testing::{Fixture, JoinLinesMinifier, MapFetcher};

    #[test]
    fn test_terminate() {
        assert_eq!(terminate("a()"), "a();");
        assert_eq!(terminate("a();;\n"), "a();");
    }

    #[test]
    fn test_scripts_are_combined_in_order() {
        let fixture = Fixture::new();
        let fetcher = MapFetcher::new().with("https://example.com/js/app.js", "\u{feff}var app = 1");
        let frags = fixture.extractor.js_frags(r#"<script src="/js/app.js"></script><script>app++;</script>"#);
        let parts = fixture.compiler(&fetcher, &JoinLinesMinifier).compile_js(&frags, InsertionPoint::Foot).unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].tag.starts_with(r#"<script type="text/javascript" src="https://example.com/cache/example-com/"#));
        assert_eq!(fixture.read_artifact(&parts[0].tag), "var app = 1;app++;");
    }

    #[test]
    fn test_json_is_passed_through() {
        let fixture = Fixture::new();
        let html = r#"<script>a();</script><script type="application/ld+json">{"a": 1}</script><script>b();</script>"#;
        let frags = fixture.extractor.js_frags(html);
        let parts = fixture.compiler(&MapFetcher::new(), &JoinLinesMinifier).compile_js(&frags, InsertionPoint::Head).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].tag, r#"<script type="application/ld+json">{"a": 1}</script>"#);
        assert_eq!(parts[1].exclude_frag, None);
        assert_ne!(parts[0].tag, parts[2].tag);
    }

    #[test]
    fn test_async_script_stays_in_place() {
        let fixture = Fixture::new();
        let html = r#"<script>a();</script><script async src="https://cdn.example.net/x.js"></script><script>b();</script>"#;
        let frags = fixture.extractor.js_frags(html);
        let fetcher = MapFetcher::new();
        let parts = fixture.compiler(&fetcher, &JoinLinesMinifier).compile_js(&frags, InsertionPoint::Head).unwrap();
        let tags = render_tags(&parts, &frags);
        assert_eq!(tags.lines().nth(1), Some(r#"<script async src="https://cdn.example.net/x.js"></script>"#));
        assert!(fetcher.calls().is_empty());
    }

    #[test]
    fn test_failed_fetch_contributes_nothing() {
        let fixture = Fixture::new();
        let frags = fixture.extractor.js_frags(r#"<script src="/missing.js"></script>"#);
        let parts = fixture.compiler(&MapFetcher::new(), &JoinLinesMinifier).compile_js(&frags, InsertionPoint::Head).unwrap();
        assert!(parts.is_empty());
    }

    #[test]
    fn test_cache_write_failure_is_fatal() {
        let fixture = Fixture::new();
        std::fs::write(fixture.dir.path().join("public"), "not a directory").unwrap();
        let frags = fixture.extractor.js_frags("<script>a();</script>");
        let err = fixture.compiler(&MapFetcher::new(), &JoinLinesMinifier).compile_js(&frags, InsertionPoint::Head).unwrap_err();
        assert!(err.is_fatal());
    }
}
