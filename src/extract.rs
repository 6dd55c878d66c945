//! HTML extraction
//!
//! Pulls the SEO-relevant structure out of a fetched page: title, meta
//! description, headings, canonical link, meta robots directives, hreflang
//! alternates, and the full anchor inventory. Parsing is tolerant; broken
//! markup is routine and a malformed attribute only loses that one value.

use crate::url::{classify_url, normalize_with_base, ClassifyContext, UrlClass};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// rel attribute bits recorded per anchor
pub const REL_NOFOLLOW: i64 = 1;
pub const REL_UGC: i64 = 2;
pub const REL_SPONSORED: i64 = 4;

/// One anchor occurrence in document order
#[derive(Debug, Clone)]
pub struct Anchor {
    /// The raw href attribute value
    pub href: String,
    /// Resolved and normalized absolute URL (mailto kept verbatim)
    pub resolved: String,
    /// Classification of the resolved target
    pub class: UrlClass,
    /// Trimmed, whitespace-collapsed anchor text
    pub text: String,
    /// Deterministic element path from the document root
    pub xpath: String,
    /// Bitmap of REL_* flags
    pub rel_flags: i64,
}

/// A hreflang alternate declared in the HTML head
#[derive(Debug, Clone)]
pub struct HreflangAlt {
    pub lang: String,
    pub href: String,
}

/// Everything extracted from one HTML document
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub h1_count: u32,
    pub h2_count: u32,
    pub first_h1: Option<String>,
    pub first_h2: Option<String>,
    pub word_count: u32,
    pub html_lang: Option<String>,
    /// Normalized canonical URL from `<link rel="canonical">`
    pub canonical: Option<String>,
    /// Ordered, deduplicated meta robots tokens
    pub meta_robots: Vec<String>,
    pub hreflangs: Vec<HreflangAlt>,
    pub anchors: Vec<Anchor>,
}

impl ExtractedPage {
    /// Meta robots tokens joined for interning, or None when absent.
    pub fn meta_robots_joined(&self) -> Option<String> {
        if self.meta_robots.is_empty() {
            None
        } else {
            Some(self.meta_robots.join(","))
        }
    }

    /// True unless meta robots contains a noindex directive.
    pub fn meta_allows_indexing(&self) -> bool {
        !self.meta_robots.iter().any(|d| d == "noindex" || d == "none")
    }
}

/// Extracts structure and links from an HTML document.
///
/// `final_url` is the base for resolving relative hrefs; `ctx` decides the
/// internal/external split of the anchor inventory.
pub fn extract_page(html: &str, final_url: &Url, ctx: &ClassifyContext) -> ExtractedPage {
    let document = Html::parse_document(html);

    let mut page = ExtractedPage {
        title: first_text(&document, "title"),
        meta_description: meta_content(&document, "description"),
        html_lang: html_lang(&document),
        ..Default::default()
    };

    extract_headings(&document, &mut page);
    page.word_count = visible_word_count(&document);
    page.canonical = extract_canonical(&document, final_url);
    page.meta_robots = meta_robots_tokens(&document);
    page.hreflangs = extract_hreflangs(&document);
    page.anchors = extract_anchors(&document, final_url, ctx);

    page
}

/// Collapses runs of whitespace to single spaces and trims.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document
        .select(&sel)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|s| !s.is_empty())
}

/// Reads the content of `<meta name="...">`, matching the name
/// case-insensitively the way browsers do.
fn meta_content(document: &Html, name: &str) -> Option<String> {
    let sel = Selector::parse("meta[name][content]").ok()?;
    document
        .select(&sel)
        .find(|el| {
            el.value()
                .attr("name")
                .map(|n| n.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
        .and_then(|el| el.value().attr("content"))
        .map(|c| collapse_whitespace(c))
        .filter(|s| !s.is_empty())
}

fn html_lang(document: &Html) -> Option<String> {
    document
        .root_element()
        .value()
        .attr("lang")
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
}

fn extract_headings(document: &Html, page: &mut ExtractedPage) {
    if let Ok(sel) = Selector::parse("h1") {
        for el in document.select(&sel) {
            page.h1_count += 1;
            if page.first_h1.is_none() {
                let text = collapse_whitespace(&el.text().collect::<String>());
                if !text.is_empty() {
                    page.first_h1 = Some(text);
                }
            }
        }
    }
    if let Ok(sel) = Selector::parse("h2") {
        for el in document.select(&sel) {
            page.h2_count += 1;
            if page.first_h2.is_none() {
                let text = collapse_whitespace(&el.text().collect::<String>());
                if !text.is_empty() {
                    page.first_h2 = Some(text);
                }
            }
        }
    }
}

/// Word count over visible text: whitespace tokenization with script and
/// style content excluded.
fn visible_word_count(document: &Html) -> u32 {
    let total: usize = document
        .root_element()
        .text()
        .map(|t| t.split_whitespace().count())
        .sum();

    let hidden: usize = match Selector::parse("script, style, noscript") {
        Ok(sel) => document
            .select(&sel)
            .flat_map(|el| el.text())
            .map(|t| t.split_whitespace().count())
            .sum(),
        Err(_) => 0,
    };

    total.saturating_sub(hidden) as u32
}

fn extract_canonical(document: &Html, final_url: &Url) -> Option<String> {
    let sel = Selector::parse("link[rel='canonical'][href]").ok()?;
    let href = document
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("href"))?;
    normalize_with_base(final_url, href)
        .ok()
        .map(|u| u.to_string())
}

fn meta_robots_tokens(document: &Html) -> Vec<String> {
    let content = match meta_content(document, "robots") {
        Some(c) => c,
        None => return Vec::new(),
    };
    parse_robots_tokens(&content)
}

/// Splits a robots directive string into ordered, deduplicated lowercase
/// tokens. Shared with the `X-Robots-Tag` header path.
pub fn parse_robots_tokens(content: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for raw in content.split(',') {
        let token = raw.trim().to_lowercase();
        if !token.is_empty() && !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}

fn extract_hreflangs(document: &Html) -> Vec<HreflangAlt> {
    let sel = match Selector::parse("link[rel='alternate'][hreflang][href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    document
        .select(&sel)
        .filter_map(|el| {
            let lang = el.value().attr("hreflang")?.trim().to_lowercase();
            let href = el.value().attr("href")?.trim().to_string();
            if lang.is_empty() || href.is_empty() {
                return None;
            }
            Some(HreflangAlt { lang, href })
        })
        .collect()
}

fn extract_anchors(document: &Html, final_url: &Url, ctx: &ClassifyContext) -> Vec<Anchor> {
    let sel = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut anchors = Vec::new();
    for el in document.select(&sel) {
        let href = match el.value().attr("href") {
            Some(h) => h.trim().to_string(),
            None => continue,
        };
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("tel:")
            || href.starts_with("data:")
        {
            continue;
        }

        let (resolved, class) = if href.starts_with("mailto:") {
            (href.clone(), UrlClass::Mail)
        } else {
            match normalize_with_base(final_url, &href) {
                Ok(url) => {
                    let class = classify_url(url.as_str(), ctx, false);
                    (url.to_string(), class)
                }
                // Unresolvable href: skip this anchor, keep the rest.
                Err(_) => continue,
            }
        };

        anchors.push(Anchor {
            resolved,
            class,
            text: collapse_whitespace(&el.text().collect::<String>()),
            xpath: xpath_of(&el),
            rel_flags: rel_flags(el.value().attr("rel")),
            href,
        });
    }
    anchors
}

fn rel_flags(rel: Option<&str>) -> i64 {
    let mut flags = 0;
    if let Some(rel) = rel {
        for token in rel.split_whitespace() {
            match token.to_lowercase().as_str() {
                "nofollow" => flags |= REL_NOFOLLOW,
                "ugc" => flags |= REL_UGC,
                "sponsored" => flags |= REL_SPONSORED,
                _ => {}
            }
        }
    }
    flags
}

/// Deterministic element path from the document root, e.g.
/// `/html[1]/body[1]/div[2]/a[1]`. Indexes count same-tag siblings in
/// document order, so the path is stable across parses of the same markup.
fn xpath_of(element: &ElementRef) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = **element;

    loop {
        let name = match ElementRef::wrap(current) {
            Some(el) => el.value().name().to_string(),
            None => break,
        };

        let mut index = 1;
        let mut sibling = current.prev_sibling();
        while let Some(node) = sibling {
            if let Some(el) = ElementRef::wrap(node) {
                if el.value().name() == name {
                    index += 1;
                }
            }
            sibling = node.prev_sibling();
        }

        parts.push(format!("{name}[{index}]"));
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }

    parts.reverse();
    format!("/{}", parts.join("/"))
}
