//! Sitemap discovery and parsing
//!
//! Sitemap roots come from robots.txt `Sitemap:` directives and from the
//! common well-known locations. A response is either a `<sitemapindex>`
//! (recursed into, bounded depth) or a `<urlset>` whose entries carry
//! `loc`/`lastmod`/`changefreq`/`priority` plus `xhtml:link` hreflang
//! alternates. Gzip-compressed sitemap files are decompressed transparently.

use flate2::read::GzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{HashSet, VecDeque};
use std::io::Read;

/// Well-known sitemap locations probed when robots.txt declares none
pub const COMMON_SITEMAP_PATHS: &[&str] = &["/sitemap.xml", "/sitemap_index.xml", "/sitemaps.xml"];

/// Maximum nesting of sitemap indexes followed
pub const MAX_SITEMAP_DEPTH: usize = 3;

/// One `<url>` entry from a urlset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: Option<String>,
    pub changefreq: Option<String>,
    pub priority: Option<f64>,
    /// `(language code, href)` pairs from `xhtml:link` alternates
    pub hreflangs: Vec<(String, String)>,
}

/// A parsed sitemap document
#[derive(Debug, Clone, PartialEq)]
pub enum SitemapDocument {
    /// `<sitemapindex>`: locations of child sitemaps
    Index(Vec<String>),
    /// `<urlset>`: page entries
    UrlSet(Vec<SitemapEntry>),
}

/// A page entry together with the sitemap it was found in
#[derive(Debug, Clone)]
pub struct DiscoveredUrl {
    pub entry: SitemapEntry,
    pub source_sitemap: String,
}

/// Strips a gzip envelope when present; sitemap files are often served as
/// `sitemap.xml.gz` without a Content-Encoding header.
pub fn maybe_gunzip(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() > 2 && bytes[0] == 0x1f && bytes[1] == 0x8b {
        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        if decoder.read_to_end(&mut out).is_ok() {
            return out;
        }
    }
    bytes.to_vec()
}

/// Parses a sitemap or sitemap index document.
pub fn parse_sitemap(xml: &str) -> Result<SitemapDocument, String> {
    let mut reader = Reader::from_str(xml);

    let mut root: Option<String> = None;
    let mut path: Vec<String> = Vec::new();
    let mut index_children: Vec<String> = Vec::new();
    let mut entries: Vec<SitemapEntry> = Vec::new();
    let mut current: Option<SitemapEntry> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if root.is_none() {
                    root = Some(name.clone());
                }
                if name == "url" {
                    current = Some(SitemapEntry::default());
                }
                if name == "link" {
                    read_link_alternate(&e, &mut current);
                }
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                if local_name(&e) == "link" {
                    read_link_alternate(&e, &mut current);
                }
            }
            Ok(Event::Text(t)) => {
                let text = match t.unescape() {
                    Ok(text) => text.trim().to_string(),
                    Err(_) => continue,
                };
                record_text(&path, &text, &mut index_children, &mut current);
            }
            Ok(Event::CData(t)) => {
                let text = String::from_utf8_lossy(&t.into_inner())
                    .trim()
                    .to_string();
                record_text(&path, &text, &mut index_children, &mut current);
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();
                if name == "url" {
                    if let Some(entry) = current.take() {
                        if !entry.loc.is_empty() {
                            entries.push(entry);
                        }
                    }
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(format!("XML parse error: {e}")),
        }
    }

    match root.as_deref() {
        Some("sitemapindex") => Ok(SitemapDocument::Index(index_children)),
        Some("urlset") => Ok(SitemapDocument::UrlSet(entries)),
        _ => Err("not a sitemap document".to_string()),
    }
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase()
}

fn read_link_alternate(e: &BytesStart, current: &mut Option<SitemapEntry>) {
    let entry = match current {
        Some(entry) => entry,
        None => return,
    };

    let mut hreflang = None;
    let mut href = None;
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_lowercase();
        let value = match attr.unescape_value() {
            Ok(v) => v.trim().to_string(),
            Err(_) => continue,
        };
        match key.as_str() {
            "hreflang" => hreflang = Some(value.to_lowercase()),
            "href" => href = Some(value),
            _ => {}
        }
    }

    if let (Some(lang), Some(href)) = (hreflang, href) {
        if !lang.is_empty() && !href.is_empty() {
            entry.hreflangs.push((lang, href));
        }
    }
}

fn record_text(
    path: &[String],
    text: &str,
    index_children: &mut Vec<String>,
    current: &mut Option<SitemapEntry>,
) {
    if text.is_empty() || path.len() < 2 {
        return;
    }

    let element = path[path.len() - 1].as_str();
    let parent = path[path.len() - 2].as_str();

    if parent == "sitemap" && element == "loc" {
        index_children.push(text.to_string());
        return;
    }

    if parent == "url" {
        if let Some(entry) = current {
            match element {
                "loc" => entry.loc = text.to_string(),
                "lastmod" => entry.lastmod = Some(text.to_string()),
                "changefreq" => entry.changefreq = Some(text.to_string()),
                "priority" => entry.priority = text.parse().ok(),
                _ => {}
            }
        }
    }
}

/// Discovers sitemap roots and walks them recursively.
pub struct SitemapDiscoverer<'a> {
    client: &'a reqwest::Client,
}

impl<'a> SitemapDiscoverer<'a> {
    pub fn new(client: &'a reqwest::Client) -> Self {
        Self { client }
    }

    /// Picks the initial sitemap list: robots-declared URLs when present,
    /// otherwise the first common location under `base` that yields a
    /// parseable document.
    pub async fn discover_roots(&self, base: &url::Url, robots_sitemaps: &[String]) -> Vec<String> {
        if !robots_sitemaps.is_empty() {
            return robots_sitemaps.to_vec();
        }

        for path in COMMON_SITEMAP_PATHS {
            let candidate = match base.join(path) {
                Ok(url) => url.to_string(),
                Err(_) => continue,
            };
            if self.fetch_document(&candidate).await.is_some() {
                tracing::debug!("found sitemap at common location {candidate}");
                return vec![candidate];
            }
        }
        Vec::new()
    }

    /// Walks the sitemap tree breadth-first, recursing into indexes up to
    /// [`MAX_SITEMAP_DEPTH`], and returns every page entry with provenance.
    pub async fn collect(&self, roots: Vec<String>) -> Vec<DiscoveredUrl> {
        let mut queue: VecDeque<(String, usize)> = roots.into_iter().map(|s| (s, 0)).collect();
        let mut visited: HashSet<String> = HashSet::new();
        let mut discovered = Vec::new();

        while let Some((sitemap_url, depth)) = queue.pop_front() {
            if !visited.insert(sitemap_url.clone()) {
                continue;
            }

            tracing::info!("processing sitemap {sitemap_url}");
            let document = match self.fetch_document(&sitemap_url).await {
                Some(doc) => doc,
                None => {
                    tracing::debug!("failed to fetch or parse sitemap {sitemap_url}");
                    continue;
                }
            };

            match document {
                SitemapDocument::Index(children) => {
                    if depth + 1 >= MAX_SITEMAP_DEPTH {
                        tracing::warn!(
                            "sitemap index {sitemap_url} exceeds depth {MAX_SITEMAP_DEPTH}, not recursing"
                        );
                        continue;
                    }
                    for child in children {
                        queue.push_back((child, depth + 1));
                    }
                }
                SitemapDocument::UrlSet(entries) => {
                    for entry in entries {
                        discovered.push(DiscoveredUrl {
                            entry,
                            source_sitemap: sitemap_url.clone(),
                        });
                    }
                }
            }
        }

        discovered
    }

    async fn fetch_document(&self, url: &str) -> Option<SitemapDocument> {
        let response = self.client.get(url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let bytes = response.bytes().await.ok()?;
        let xml_bytes = maybe_gunzip(&bytes);
        let xml = String::from_utf8_lossy(&xml_bytes);
        parse_sitemap(&xml).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const URLSET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"
        xmlns:xhtml="http://www.w3.org/1999/xhtml">
  <url>
    <loc>https://a.example/</loc>
    <lastmod>2024-03-01</lastmod>
    <changefreq>daily</changefreq>
    <priority>0.8</priority>
    <xhtml:link rel="alternate" hreflang="fr" href="https://a.example/fr/"/>
    <xhtml:link rel="alternate" hreflang="x-default" href="https://a.example/"/>
  </url>
  <url>
    <loc>https://a.example/about</loc>
  </url>
</urlset>"#;

    const INDEX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://a.example/sitemap-pages.xml</loc></sitemap>
  <sitemap><loc>https://a.example/sitemap-posts.xml</loc><lastmod>2024-01-01</lastmod></sitemap>
</sitemapindex>"#;

    #[test]
    fn test_parse_urlset() {
        let doc = parse_sitemap(URLSET).unwrap();
        let entries = match doc {
            SitemapDocument::UrlSet(entries) => entries,
            other => panic!("expected urlset, got {other:?}"),
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].loc, "https://a.example/");
        assert_eq!(entries[0].lastmod.as_deref(), Some("2024-03-01"));
        assert_eq!(entries[0].changefreq.as_deref(), Some("daily"));
        assert_eq!(entries[0].priority, Some(0.8));
        assert_eq!(entries[1].loc, "https://a.example/about");
        assert_eq!(entries[1].lastmod, None);
    }

    #[test]
    fn test_parse_urlset_hreflangs() {
        let doc = parse_sitemap(URLSET).unwrap();
        let entries = match doc {
            SitemapDocument::UrlSet(entries) => entries,
            other => panic!("expected urlset, got {other:?}"),
        };
        assert_eq!(
            entries[0].hreflangs,
            vec![
                ("fr".to_string(), "https://a.example/fr/".to_string()),
                ("x-default".to_string(), "https://a.example/".to_string()),
            ]
        );
        assert!(entries[1].hreflangs.is_empty());
    }

    #[test]
    fn test_parse_index() {
        let doc = parse_sitemap(INDEX).unwrap();
        assert_eq!(
            doc,
            SitemapDocument::Index(vec![
                "https://a.example/sitemap-pages.xml".to_string(),
                "https://a.example/sitemap-posts.xml".to_string(),
            ])
        );
    }

    #[test]
    fn test_entry_without_loc_dropped() {
        let xml = r#"<urlset><url><lastmod>2024-01-01</lastmod></url><url><loc>https://a.example/x</loc></url></urlset>"#;
        let doc = parse_sitemap(xml).unwrap();
        match doc {
            SitemapDocument::UrlSet(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].loc, "https://a.example/x");
            }
            other => panic!("expected urlset, got {other:?}"),
        }
    }

    #[test]
    fn test_cdata_loc() {
        let xml = "<urlset><url><loc><![CDATA[https://a.example/cdata]]></loc></url></urlset>";
        let doc = parse_sitemap(xml).unwrap();
        match doc {
            SitemapDocument::UrlSet(entries) => assert_eq!(entries[0].loc, "https://a.example/cdata"),
            other => panic!("expected urlset, got {other:?}"),
        }
    }

    #[test]
    fn test_non_sitemap_rejected() {
        assert!(parse_sitemap("<html><body>nope</body></html>").is_err());
        assert!(parse_sitemap("").is_err());
    }

    #[test]
    fn test_bad_priority_ignored() {
        let xml = "<urlset><url><loc>https://a.example/</loc><priority>high</priority></url></urlset>";
        let doc = parse_sitemap(xml).unwrap();
        match doc {
            SitemapDocument::UrlSet(entries) => assert_eq!(entries[0].priority, None),
            other => panic!("expected urlset, got {other:?}"),
        }
    }

    #[test]
    fn test_gunzip_roundtrip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(URLSET.as_bytes()).unwrap();
        let gzipped = encoder.finish().unwrap();

        let restored = maybe_gunzip(&gzipped);
        assert_eq!(restored, URLSET.as_bytes());
    }

    #[test]
    fn test_gunzip_passthrough_for_plain_bytes() {
        assert_eq!(maybe_gunzip(URLSET.as_bytes()), URLSET.as_bytes());
    }
}
