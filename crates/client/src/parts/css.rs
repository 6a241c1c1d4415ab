use super::{AssetPart, InsertionPoint, PartCompiler, PartList, esc_attr, fragments_key};
use crate::extract::{FragmentKind, TagFragment};
use crate::fetch::strip_utf8_bom;
use htmlc_core::{AssetKind, Error};

impl PartCompiler<'_> {
    /// Group CSS fragments into parts, one `<link>` per part.
    ///
    /// A new part starts whenever the media changes or the open part already
    /// holds an `@import` that could not be inlined.
    ///
    /// # Errors
    ///
    /// Returns `Error::CacheWrite` if an artifact or the manifest cannot be written,
    /// or `Error::Configuration` if a URL cannot be resolved for lack of a host.
    pub fn compile_css(&self, frags: &[TagFragment], point: InsertionPoint) -> Result<Vec<AssetPart>, Error> {
        if frags.is_empty() {
            return Ok(Vec::new());
        }
        let mut timer = self.benchmark.timer("compile_css_parts");
        let key = fragments_key(frags)?;
        timer.task(format!("building parts based on CSS tag frags in checksum: `{key}`"));

        if let Some(parts) = self.cached(AssetKind::Css, &key) {
            return Ok(parts);
        }

        let mut list = PartList::default();
        for (index, frag) in frags.iter().enumerate() {
            if frag.exclude {
                list.placeholder(index);
                continue;
            }
            let Some(code) = self.fragment_css(frag)? else {
                continue;
            };

            let media = frag.media();
            let starts_new = list
                .open_part()
                .is_some_and(|part| part.media.as_deref() != Some(media) || part.code.to_lowercase().contains("@import"));
            if starts_new {
                list.close();
            }
            list.append(Some(media), &code);
        }

        let mut parts = list.into_parts();
        for part in parts.iter_mut().filter(|part| part.exclude_frag.is_none() && !part.code.is_empty()) {
            let code = self.css.move_special_at_rules_to_top(&part.code);
            let code = self.css.strip_prepend_charset_utf8(&code);
            let code = self.css.force_abs_relative_paths(&code);
            let code = self.css.filter_urls(&code, self.hooks);
            if code.is_empty() {
                continue;
            }

            let url = self.store_part(AssetKind::Css, point, &code)?;
            let media = part.media.as_deref().unwrap_or("all");
            part.tag = format!(r#"<link type="text/css" rel="stylesheet" href="{}" media="{}" />"#, esc_attr(&url), esc_attr(media));
            part.code.clear();
        }

        self.finish(AssetKind::Css, &key, parts)
    }

    /// Resolved code of one fragment, `None` when it contributes nothing.
    fn fragment_css(&self, frag: &TagFragment) -> Result<Option<String>, Error> {
        let (code, base, media) = match &frag.kind {
            FragmentKind::Link { href, media } => match self.fetch_resolved(href)? {
                Some((url, body)) => (body, Some(url), media),
                None => return Ok(None),
            },
            FragmentKind::Style { css, media } => (strip_utf8_bom(css).to_string(), None, media),
            _ => return Ok(None),
        };

        let code = self.css.resolve_relatives(&code, base.as_deref())?;
        let code = self.css.resolve_imports(&code, media, self.fetcher)?;
        Ok((!code.trim().is_empty()).then_some(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingMinifier, Fixture, JoinLinesMinifier, MapFetcher};
    use htmlc_core::Hook;

    fn compile(fixture: &Fixture, fetcher: &MapFetcher, html: &str) -> (Vec<TagFragment>, Vec<AssetPart>) {
        let frags = fixture.extractor.css_frags(html);
        let parts = fixture.compiler(fetcher, &JoinLinesMinifier).compile_css(&frags, InsertionPoint::Head).unwrap();
        (frags, parts)
    }

    fn medias(parts: &[AssetPart]) -> Vec<Option<&str>> {
        parts.iter().map(|part| part.media.as_deref()).collect()
    }

    #[test]
    fn test_same_media_is_combined() {
        let fixture = Fixture::new();
        let (_, parts) = compile(&fixture, &MapFetcher::new(), "<style>a{color:red}</style>\n<style>b{color:blue}</style>");
        assert_eq!(parts.len(), 1);
        assert_eq!(fixture.read_artifact(&parts[0].tag), "@charset \"UTF-8\";a{color:red}b{color:blue}");
        assert!(parts[0].tag.ends_with(r#"media="all" />"#));
    }

    #[test]
    fn test_media_alternation_starts_new_parts() {
        let fixture = Fixture::new();
        let html = r#"<style>a{}</style><style media="print">b{}</style><style>c{}</style>"#;
        let (_, parts) = compile(&fixture, &MapFetcher::new(), html);
        assert_eq!(medias(&parts), vec![Some("all"), Some("print"), Some("all")]);

        let html = r#"<style>a{}</style><style media="print">b{}</style><style media="print">c{}</style><style>d{}</style>"#;
        let (_, parts) = compile(&fixture, &MapFetcher::new(), html);
        assert_eq!(medias(&parts), vec![Some("all"), Some("print"), Some("all")]);
    }

    #[test]
    fn test_failed_fetch_does_not_merge_media() {
        let fixture = Fixture::new();
        let fetcher = MapFetcher::new().with("https://example.com/p2.css", "p2{}");
        let html = r#"<style>a{}</style><link rel="stylesheet" href="/p1.css" media="print"><link rel="stylesheet" href="/p2.css" media="print">"#;
        let (_, parts) = compile(&fixture, &fetcher, html);
        assert_eq!(medias(&parts), vec![Some("all"), Some("print")]);
        assert_eq!(fetcher.calls(), vec!["https://example.com/p1.css".to_string(), "https://example.com/p2.css".to_string()]);
    }

    #[test]
    fn test_excluded_fragment_keeps_its_position() {
        let fixture = Fixture::new();
        let html = "<style>a{}</style>\n<!--[if IE]><link rel=\"stylesheet\" href=\"/ie.css\"><![endif]-->\n<style>b{}</style>";
        let (frags, parts) = compile(&fixture, &MapFetcher::new(), html);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].exclude_frag, Some(1));

        let tags = super::super::render_tags(&parts, &frags);
        let lines: Vec<&str> = tags.lines().collect();
        assert!(lines[0].starts_with("<link type=\"text/css\""));
        assert_eq!(lines[1], "<!--[if IE]><link rel=\"stylesheet\" href=\"/ie.css\"><![endif]-->");
        assert!(lines[2].starts_with("<link type=\"text/css\""));
    }

    #[test]
    fn test_unresolved_import_closes_the_part() {
        let fixture = Fixture::new();
        let html = r#"<style>@import url("https://cdn.example.net/p.css") print; a{}</style><style>b{}</style>"#;
        let (_, parts) = compile(&fixture, &MapFetcher::new(), html);
        assert_eq!(parts.len(), 2);
        assert!(fixture.read_artifact(&parts[0].tag).contains("@import url(\"https://cdn.example.net/p.css\") print;"));
    }

    #[test]
    fn test_linked_sheet_is_resolved_against_its_url() {
        let fixture = Fixture::new();
        let fetcher = MapFetcher::new().with("https://example.com/css/site.css", "a{background:url(../img/a.png)}");
        let (_, parts) = compile(&fixture, &fetcher, r#"<link rel="stylesheet" href="/css/site.css">"#);
        assert_eq!(fixture.read_artifact(&parts[0].tag), "@charset \"UTF-8\";a{background:url(/img/a.png)}");
    }

    #[test]
    fn test_identical_content_shares_an_artifact() {
        let fixture = Fixture::new();
        let fetcher = MapFetcher::new().with("https://example.com/a.css", "a{}");
        let (_, first) = compile(&fixture, &fetcher, "<style>a{}</style>");
        let (_, second) = compile(&fixture, &fetcher, r#"<style media="print">x{}</style><link rel="stylesheet" href="/a.css">"#);
        assert_eq!(second.len(), 2);
        assert_eq!(first[0].tag, second[1].tag);
    }

    #[test]
    fn test_manifest_fast_path_skips_fetching() {
        let fixture = Fixture::new();
        let fetcher = MapFetcher::new().with("https://example.com/a.css", "a{}");
        let html = r#"<link rel="stylesheet" href="/a.css">"#;
        let (_, first) = compile(&fixture, &fetcher, html);
        let (_, second) = compile(&fixture, &fetcher, html);
        assert_eq!(first, second);
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[test]
    fn test_minifier_failure_keeps_original_code() {
        let fixture = Fixture::new();
        let frags = fixture.extractor.css_frags("<style>a { color: red }</style>");
        let parts = fixture.compiler(&MapFetcher::new(), &FailingMinifier).compile_css(&frags, InsertionPoint::Head).unwrap();
        assert_eq!(fixture.read_artifact(&parts[0].tag), "@charset \"UTF-8\";\na { color: red }");
    }

    #[test]
    fn test_part_url_hook_receives_insertion_point() {
        let mut fixture = Fixture::new();
        fixture.hooks.add_filter(Hook::PartUrl, 10, |url, point| format!("{url}?at={point}"));
        let (_, parts) = compile(&fixture, &MapFetcher::new(), "<style>a{}</style>");
        assert!(parts[0].tag.contains(".css?at=head\""));
    }

    #[test]
    fn test_part_counts_are_recorded() {
        let fixture = Fixture::new();
        let html = "<style>a{}</style>\n<!--[if IE]><link rel=\"stylesheet\" href=\"/ie.css\"><![endif]-->\n<style media=\"print\">b{}</style>";
        compile(&fixture, &MapFetcher::new(), html);

        let data = fixture.benchmark.data();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].label, "css_parts");
        assert_eq!(data[0].data["parts"], serde_json::json!(2));
        assert_eq!(data[0].data["excluded"], serde_json::json!(1));
    }
}
