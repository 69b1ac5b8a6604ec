use http::header::{CACHE_CONTROL, IF_NONE_MATCH};
use http::HeaderMap;

/// Client `Cache-Control` directives relevant to freshness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestDirectives {
    /// Oldest acceptable entry age in seconds. `no-cache` maps to `0`.
    pub max_age: Option<u64>,
    /// Minimum remaining freshness in seconds.
    pub min_fresh: Option<u64>,
    /// The response to this request must not be written to the store.
    pub no_store: bool,
}

impl RequestDirectives {
    /// Parses every `Cache-Control` header value.
    ///
    /// Unknown directives and malformed numbers are ignored. Repeated
    /// directives keep the strictest value.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut directives = Self::default();

        let tokens = headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|token| token.trim().to_ascii_lowercase());

        for token in tokens {
            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (token.as_str(), None),
            };

            match (name, value) {
                ("max-age", Some(value)) => {
                    if let Ok(seconds) = value.parse::<u64>() {
                        directives.max_age = Some(directives.max_age.map_or(seconds, |v| v.min(seconds)));
                    }
                }
                ("min-fresh", Some(value)) => {
                    if let Ok(seconds) = value.parse::<u64>() {
                        directives.min_fresh =
                            Some(directives.min_fresh.map_or(seconds, |v| v.max(seconds)));
                    }
                }
                ("no-cache", _) => directives.max_age = Some(0),
                ("no-store", _) => directives.no_store = true,
                _ => {}
            }
        }

        directives
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Whether the request's `If-None-Match` header names `etag` (or `*`).
pub fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    let wanted = etag.trim_start_matches("W/");
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(values: &[&'static str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(CACHE_CONTROL, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn absent_header_means_no_constraint() {
        let directives = RequestDirectives::from_headers(&HeaderMap::new());
        assert!(directives.is_empty());
    }

    #[test]
    fn parses_max_age_and_min_fresh() {
        let directives = RequestDirectives::from_headers(&headers(&["max-age=5, min-fresh=2"]));
        assert_eq!(directives.max_age, Some(5));
        assert_eq!(directives.min_fresh, Some(2));
        assert!(!directives.no_store);
    }

    #[test]
    fn keeps_strictest_value_across_headers() {
        let directives = RequestDirectives::from_headers(&headers(&[
            "max-age=30, min-fresh=1",
            "Max-Age=10, min-fresh=4",
        ]));
        assert_eq!(directives.max_age, Some(10));
        assert_eq!(directives.min_fresh, Some(4));
    }

    #[test]
    fn no_cache_forces_zero_max_age() {
        let directives = RequestDirectives::from_headers(&headers(&["max-age=60", "no-cache"]));
        assert_eq!(directives.max_age, Some(0));
    }

    #[test]
    fn no_store_is_recognized() {
        let directives = RequestDirectives::from_headers(&headers(&["no-store"]));
        assert!(directives.no_store);
        assert_eq!(directives.max_age, None);
    }

    #[test]
    fn malformed_values_are_ignored() {
        let directives =
            RequestDirectives::from_headers(&headers(&["max-age=abc, min-fresh=-1, max-age"]));
        assert!(directives.is_empty());
    }

    #[test]
    fn quoted_values_are_accepted() {
        let directives = RequestDirectives::from_headers(&headers(&["max-age=\"7\""]));
        assert_eq!(directives.max_age, Some(7));
    }

    #[test]
    fn if_none_match_handles_lists_weak_tags_and_wildcard() {
        let mut request = HeaderMap::new();
        request.insert(IF_NONE_MATCH, HeaderValue::from_static("\"a\", W/\"b\""));
        assert!(if_none_match(&request, "\"b\""));
        assert!(!if_none_match(&request, "\"c\""));

        request.insert(IF_NONE_MATCH, HeaderValue::from_static("*"));
        assert!(if_none_match(&request, "\"anything\""));

        assert!(!if_none_match(&HeaderMap::new(), "\"a\""));
    }
}
