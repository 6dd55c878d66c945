//! URL handling: normalization, classification, and content kinds
//!
//! Every URL entering the system passes through [`normalize_url`] (or
//! [`normalize_with_base`] for relative references) so that equivalent URLs
//! compare equal, then through [`classify_url`] to decide whether it is ever
//! fetched.

mod normalize;

pub use normalize::{normalize_url, normalize_with_base};

/// Where a URL points relative to the crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlClass {
    /// Same host as the seed (optionally including subdomains)
    Internal,
    /// A different host
    External,
    /// A known social network host
    Social,
    /// A known CDN/hosting host, or an offsite URL listed in a sitemap
    Network,
    /// A mailto: address
    Mail,
    /// Anything else that is never fetched (tel:, javascript:, data:)
    Other,
}

impl UrlClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
            Self::Social => "social",
            Self::Network => "network",
            Self::Mail => "mail",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "internal" => Some(Self::Internal),
            "external" => Some(Self::External),
            "social" => Some(Self::Social),
            "network" => Some(Self::Network),
            "mail" => Some(Self::Mail),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// What kind of resource a URL resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlKind {
    Html,
    Sitemap,
    SitemapIndex,
    Image,
    Asset,
    Other,
}

impl UrlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Sitemap => "sitemap",
            Self::SitemapIndex => "sitemap_index",
            Self::Image => "image",
            Self::Asset => "asset",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "html" => Some(Self::Html),
            "sitemap" => Some(Self::Sitemap),
            "sitemap_index" => Some(Self::SitemapIndex),
            "image" => Some(Self::Image),
            "asset" => Some(Self::Asset),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// True for XML sitemap flavors
    pub fn is_sitemap(&self) -> bool {
        matches!(self, Self::Sitemap | Self::SitemapIndex)
    }
}

/// Social network hosts; subdomains match too.
const SOCIAL_HOSTS: &[&str] = &[
    "facebook.com",
    "fb.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "linkedin.com",
    "youtube.com",
    "tiktok.com",
    "snapchat.com",
    "pinterest.com",
    "reddit.com",
    "discord.com",
    "telegram.org",
    "whatsapp.com",
    "messenger.com",
];

/// Common CDN and hosting hosts; subdomains match too.
const NETWORK_HOSTS: &[&str] = &[
    "cloudfront.net",
    "akamaized.net",
    "akamaihd.net",
    "fastly.net",
    "amazonaws.com",
    "googleusercontent.com",
    "azureedge.net",
    "github.io",
    "netlify.app",
    "vercel.app",
    "herokuapp.com",
    "wpengine.com",
];

/// Context for deciding internal vs external
#[derive(Debug, Clone)]
pub struct ClassifyContext {
    /// Seed host, lowercase
    pub base_host: String,

    /// Treat subdomains of the seed host as internal
    pub include_subdomains: bool,
}

impl ClassifyContext {
    pub fn new(base_host: &str, include_subdomains: bool) -> Self {
        Self {
            base_host: strip_www(&base_host.to_lowercase()).to_string(),
            include_subdomains,
        }
    }
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

fn host_matches_any(host: &str, table: &[&str]) -> bool {
    table
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
}

/// Classifies a URL string for crawl purposes.
///
/// Offsite URLs that arrived via a sitemap are classified [`UrlClass::Network`]
/// rather than [`UrlClass::External`]: a site listing them in its own sitemap
/// vouches for them the way it vouches for its CDN hosts.
pub fn classify_url(url: &str, ctx: &ClassifyContext, from_sitemap: bool) -> UrlClass {
    let parsed = match url::Url::parse(url) {
        Ok(u) => u,
        Err(_) => return UrlClass::Other,
    };

    match parsed.scheme() {
        "http" | "https" => {}
        "mailto" => return UrlClass::Mail,
        _ => return UrlClass::Other,
    }

    let host = match parsed.host_str() {
        Some(h) => strip_www(&h.to_lowercase()).to_string(),
        None => return UrlClass::Other,
    };

    if host_matches_any(&host, SOCIAL_HOSTS) {
        return UrlClass::Social;
    }

    if host == ctx.base_host {
        return UrlClass::Internal;
    }
    if ctx.include_subdomains && host.ends_with(&format!(".{}", ctx.base_host)) {
        return UrlClass::Internal;
    }

    if host_matches_any(&host, NETWORK_HOSTS) {
        return UrlClass::Network;
    }

    if from_sitemap {
        return UrlClass::Network;
    }

    UrlClass::External
}

/// Decides whether a classified URL belongs in the frontier.
pub fn should_enqueue(class: UrlClass, allow_external: bool) -> bool {
    match class {
        UrlClass::Internal => true,
        UrlClass::Network => true,
        UrlClass::External => allow_external,
        UrlClass::Social | UrlClass::Mail | UrlClass::Other => false,
    }
}

/// Image and asset extensions used as a fallback when no Content-Type is
/// available.
const IMAGE_EXTS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".avif"];
const ASSET_EXTS: &[&str] = &[".css", ".js", ".pdf", ".zip", ".woff", ".woff2", ".ttf"];

/// Classifies the resource kind from a Content-Type header, falling back to
/// the URL extension.
pub fn kind_from_content_type(content_type: Option<&str>, url: &str) -> UrlKind {
    let ct = content_type.unwrap_or("").to_lowercase();
    if ct.starts_with("text/html") || ct.starts_with("application/xhtml") {
        return UrlKind::Html;
    }
    if ct.contains("xml") {
        // Concrete flavor (urlset vs index) is resolved after parsing.
        return UrlKind::Sitemap;
    }

    let lower = url.to_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or("");
    if IMAGE_EXTS.iter().any(|e| path.ends_with(e)) {
        return UrlKind::Image;
    }
    if ASSET_EXTS.iter().any(|e| path.ends_with(e)) {
        return UrlKind::Asset;
    }
    if path.ends_with(".xml") || path.ends_with(".xml.gz") {
        return UrlKind::Sitemap;
    }
    UrlKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ClassifyContext {
        ClassifyContext::new("example.com", false)
    }

    #[test]
    fn test_internal_same_host() {
        assert_eq!(
            classify_url("https://example.com/page", &ctx(), false),
            UrlClass::Internal
        );
    }

    #[test]
    fn test_internal_www_insensitive() {
        assert_eq!(
            classify_url("https://www.example.com/page", &ctx(), false),
            UrlClass::Internal
        );
        let www_ctx = ClassifyContext::new("www.example.com", false);
        assert_eq!(
            classify_url("https://example.com/", &www_ctx, false),
            UrlClass::Internal
        );
    }

    #[test]
    fn test_subdomain_external_by_default() {
        assert_eq!(
            classify_url("https://blog.example.com/", &ctx(), false),
            UrlClass::External
        );
    }

    #[test]
    fn test_subdomain_internal_when_enabled() {
        let wide = ClassifyContext::new("example.com", true);
        assert_eq!(
            classify_url("https://blog.example.com/", &wide, false),
            UrlClass::Internal
        );
    }

    #[test]
    fn test_social_hosts() {
        assert_eq!(
            classify_url("https://twitter.com/someone", &ctx(), false),
            UrlClass::Social
        );
        assert_eq!(
            classify_url("https://www.facebook.com/page", &ctx(), false),
            UrlClass::Social
        );
        assert_eq!(
            classify_url("https://m.youtube.com/watch?v=x", &ctx(), false),
            UrlClass::Social
        );
    }

    #[test]
    fn test_network_hosts() {
        assert_eq!(
            classify_url("https://d1abc.cloudfront.net/x.js", &ctx(), false),
            UrlClass::Network
        );
    }

    #[test]
    fn test_sitemap_offsite_is_network() {
        assert_eq!(
            classify_url("https://other.example.net/", &ctx(), true),
            UrlClass::Network
        );
        assert_eq!(
            classify_url("https://other.example.net/", &ctx(), false),
            UrlClass::External
        );
    }

    #[test]
    fn test_mail_and_other() {
        assert_eq!(
            classify_url("mailto:someone@example.com", &ctx(), false),
            UrlClass::Mail
        );
        assert_eq!(
            classify_url("tel:+15551234567", &ctx(), false),
            UrlClass::Other
        );
        assert_eq!(
            classify_url("javascript:void(0)", &ctx(), false),
            UrlClass::Other
        );
    }

    #[test]
    fn test_should_enqueue() {
        assert!(should_enqueue(UrlClass::Internal, false));
        assert!(should_enqueue(UrlClass::Network, false));
        assert!(!should_enqueue(UrlClass::External, false));
        assert!(should_enqueue(UrlClass::External, true));
        assert!(!should_enqueue(UrlClass::Social, true));
        assert!(!should_enqueue(UrlClass::Mail, true));
    }

    #[test]
    fn test_kind_from_content_type() {
        assert_eq!(
            kind_from_content_type(Some("text/html; charset=utf-8"), "https://e.com/"),
            UrlKind::Html
        );
        assert_eq!(
            kind_from_content_type(Some("application/xml"), "https://e.com/sitemap.xml"),
            UrlKind::Sitemap
        );
        assert_eq!(
            kind_from_content_type(None, "https://e.com/logo.PNG"),
            UrlKind::Image
        );
        assert_eq!(
            kind_from_content_type(None, "https://e.com/app.js?v=2"),
            UrlKind::Asset
        );
        assert_eq!(
            kind_from_content_type(None, "https://e.com/sitemap.xml"),
            UrlKind::Sitemap
        );
        assert_eq!(
            kind_from_content_type(Some("application/pdf"), "https://e.com/doc"),
            UrlKind::Other
        );
    }

    #[test]
    fn test_class_db_roundtrip() {
        for class in [
            UrlClass::Internal,
            UrlClass::External,
            UrlClass::Social,
            UrlClass::Network,
            UrlClass::Mail,
            UrlClass::Other,
        ] {
            assert_eq!(UrlClass::from_str(class.as_str()), Some(class));
        }
    }

    #[test]
    fn test_kind_db_roundtrip() {
        for kind in [
            UrlKind::Html,
            UrlKind::Sitemap,
            UrlKind::SitemapIndex,
            UrlKind::Image,
            UrlKind::Asset,
            UrlKind::Other,
        ] {
            assert_eq!(UrlKind::from_str(kind.as_str()), Some(kind));
        }
    }
}
