//! Indexability evaluation
//!
//! Combines the robots.txt verdict, the HTML `<meta name="robots">` tokens,
//! and the `X-Robots-Tag` response header into a single crawlability record
//! per URL. Reasons are kept as a bitmap so downstream queries can explain
//! the verdict without re-deriving it.

use crate::extract::parse_robots_tokens;
use crate::storage::crawl_store::IndexabilityRecord;

/// Reason bits recorded alongside the verdict
pub mod reasons {
    /// robots.txt disallows this URL
    pub const ROBOTS_DISALLOWED: i64 = 1;
    /// meta robots contains noindex
    pub const META_NOINDEX: i64 = 2;
    /// X-Robots-Tag contains noindex
    pub const HEADER_NOINDEX: i64 = 4;
    /// Final status outside [200, 299]
    pub const BAD_STATUS: i64 = 8;
    /// robots.txt could not be fetched; treated as permissive
    pub const ROBOTS_UNAVAILABLE: i64 = 16;
    /// The fetch itself failed (network error or timeout), status 0
    pub const FETCH_ERROR: i64 = 32;
}

/// Inputs to one indexability verdict
#[derive(Debug, Clone)]
pub struct IndexabilityInput {
    pub url_id: i64,
    pub robots_txt_allows: bool,
    pub robots_txt_unavailable: bool,
    /// Absence of noindex in meta robots; true when no HTML was parsed
    pub html_meta_allows: bool,
    /// Raw `X-Robots-Tag` header value, if present
    pub x_robots_tag: Option<String>,
    /// Final HTTP status; 0 when the fetch failed outright
    pub final_status: u16,
}

/// Whether an `X-Robots-Tag` value permits indexing.
pub fn header_allows_indexing(x_robots_tag: Option<&str>) -> bool {
    match x_robots_tag {
        Some(value) => !parse_robots_tokens(value)
            .iter()
            .any(|t| t == "noindex" || t == "none"),
        None => true,
    }
}

/// Produces the stored record for one URL.
pub fn evaluate(input: &IndexabilityInput) -> IndexabilityRecord {
    let http_header_allows = header_allows_indexing(input.x_robots_tag.as_deref());
    let status_ok = (200..=299).contains(&input.final_status);

    let mut bits = 0;
    if !input.robots_txt_allows {
        bits |= reasons::ROBOTS_DISALLOWED;
    }
    if input.robots_txt_unavailable {
        bits |= reasons::ROBOTS_UNAVAILABLE;
    }
    if !input.html_meta_allows {
        bits |= reasons::META_NOINDEX;
    }
    if !http_header_allows {
        bits |= reasons::HEADER_NOINDEX;
    }
    if input.final_status == 0 {
        bits |= reasons::FETCH_ERROR;
    } else if !status_ok {
        bits |= reasons::BAD_STATUS;
    }

    IndexabilityRecord {
        url_id: input.url_id,
        robots_txt_allows: input.robots_txt_allows,
        html_meta_allows: input.html_meta_allows,
        http_header_allows,
        overall_indexable: input.robots_txt_allows
            && input.html_meta_allows
            && http_header_allows
            && status_ok,
        reasons: bits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(url_id: i64) -> IndexabilityInput {
        IndexabilityInput {
            url_id,
            robots_txt_allows: true,
            robots_txt_unavailable: false,
            html_meta_allows: true,
            x_robots_tag: None,
            final_status: 200,
        }
    }

    #[test]
    fn test_clean_page_indexable() {
        let record = evaluate(&input(1));
        assert!(record.overall_indexable);
        assert_eq!(record.reasons, 0);
    }

    #[test]
    fn test_robots_disallow_blocks() {
        let record = evaluate(&IndexabilityInput {
            robots_txt_allows: false,
            ..input(1)
        });
        assert!(!record.overall_indexable);
        assert_eq!(record.reasons & reasons::ROBOTS_DISALLOWED, reasons::ROBOTS_DISALLOWED);
    }

    #[test]
    fn test_meta_noindex_blocks() {
        let record = evaluate(&IndexabilityInput {
            html_meta_allows: false,
            ..input(1)
        });
        assert!(!record.overall_indexable);
        assert_eq!(record.reasons, reasons::META_NOINDEX);
    }

    #[test]
    fn test_header_noindex_blocks() {
        let record = evaluate(&IndexabilityInput {
            x_robots_tag: Some("noindex, nofollow".to_string()),
            ..input(1)
        });
        assert!(!record.http_header_allows);
        assert!(!record.overall_indexable);
        assert_eq!(record.reasons, reasons::HEADER_NOINDEX);
    }

    #[test]
    fn test_header_nofollow_alone_allows() {
        let record = evaluate(&IndexabilityInput {
            x_robots_tag: Some("nofollow, noarchive".to_string()),
            ..input(1)
        });
        assert!(record.http_header_allows);
        assert!(record.overall_indexable);
    }

    #[test]
    fn test_non_2xx_blocks() {
        let record = evaluate(&IndexabilityInput {
            final_status: 404,
            ..input(1)
        });
        assert!(!record.overall_indexable);
        assert_eq!(record.reasons, reasons::BAD_STATUS);
    }

    #[test]
    fn test_fetch_failure_recorded() {
        let record = evaluate(&IndexabilityInput {
            final_status: 0,
            ..input(1)
        });
        assert!(!record.overall_indexable);
        assert_eq!(record.reasons, reasons::FETCH_ERROR);
    }

    #[test]
    fn test_robots_unavailable_flagged_but_permissive() {
        let record = evaluate(&IndexabilityInput {
            robots_txt_unavailable: true,
            ..input(1)
        });
        assert!(record.overall_indexable);
        assert_eq!(record.reasons, reasons::ROBOTS_UNAVAILABLE);
    }

    #[test]
    fn test_reasons_accumulate() {
        let record = evaluate(&IndexabilityInput {
            robots_txt_allows: false,
            html_meta_allows: false,
            x_robots_tag: Some("noindex".to_string()),
            final_status: 500,
            ..input(1)
        });
        assert_eq!(
            record.reasons,
            reasons::ROBOTS_DISALLOWED
                | reasons::META_NOINDEX
                | reasons::HEADER_NOINDEX
                | reasons::BAD_STATUS
        );
    }
}
