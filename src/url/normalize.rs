//! URL normalization
//!
//! Rewrites URLs into a canonical string form so that equivalent URLs compare
//! equal. Applied rules, in order:
//!
//! 1. Strip surrounding whitespace and smart quotes
//! 2. Lowercase the scheme and host (done by the URL parser)
//! 3. Drop default ports 80/443 (done by the URL parser)
//! 4. Collapse duplicate slashes and resolve `.`/`..` in the path
//! 5. Sort query parameters lexicographically by key
//! 6. Drop the fragment
//!
//! Normalization is idempotent: `norm(norm(x)) == norm(x)`.

use crate::UrlError;
use url::Url;

/// Characters stripped from both ends of the input before parsing. Smart
/// quotes show up routinely in hrefs pasted from word processors.
const CLEANUP_CHARS: &[char] = &['\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}', '"', '\''];

/// Normalizes an absolute URL string.
pub fn normalize_url(input: &str) -> Result<Url, UrlError> {
    let cleaned = cleanup(input);
    if cleaned.is_empty() {
        return Err(UrlError::Malformed(input.to_string()));
    }

    let url = Url::parse(&cleaned).map_err(|_| UrlError::Malformed(input.to_string()))?;
    finish(url)
}

/// Resolves a (possibly relative) href against a base URL, then normalizes.
pub fn normalize_with_base(base: &Url, href: &str) -> Result<Url, UrlError> {
    let cleaned = cleanup(href);
    if cleaned.is_empty() {
        return Err(UrlError::Malformed(href.to_string()));
    }

    let url = base
        .join(&cleaned)
        .map_err(|_| UrlError::Malformed(href.to_string()))?;
    finish(url)
}

fn cleanup(input: &str) -> String {
    input
        .trim()
        .trim_matches(CLEANUP_CHARS)
        .trim()
        .to_string()
}

fn finish(mut url: Url) -> Result<Url, UrlError> {
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    sort_query(&mut url);

    Ok(url)
}

/// Collapses duplicate slashes and resolves `.`/`..` segments. A trailing
/// slash is significant and preserved; the parent of the root is the root.
fn normalize_path(path: &str) -> String {
    let trailing_slash = path.len() > 1 && path.ends_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut result = format!("/{}", segments.join("/"));
    if trailing_slash {
        result.push('/');
    }
    result
}

fn sort_query(url: &mut Url) {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        url.set_query(None);
        return;
    }

    let mut sorted = pairs;
    // Stable sort: parameters sharing a key keep their document order.
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut editor = url.query_pairs_mut();
    editor.clear();
    for (k, v) in &sorted {
        editor.append_pair(k, v);
    }
    drop(editor);
}
