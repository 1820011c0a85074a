//! URL parsing into a match context
//!
//! A [`MatchContext`] is derived once per evaluation and shared by every
//! candidate rule, so the URL is only parsed a single time per selection.

use std::collections::HashMap;

use url::{form_urlencoded, Url};

/// Error type for URL parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("Malformed URL '{url}': {reason}")]
    MalformedUrl { url: String, reason: String },
}

// =============================================================================
// Scheme Check
// =============================================================================

/// Web schemes the engine evaluates rules for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebScheme {
    Http,
    Https,
}

/// Fast scheme check without URL parsing.
/// Returns None for anything that is not `http://` or `https://`.
#[inline]
pub fn web_scheme(url: &str) -> Option<WebScheme> {
    let bytes = url.trim_start().as_bytes();
    if bytes.len() >= 8 && bytes[..8].eq_ignore_ascii_case(b"https://") {
        Some(WebScheme::Https)
    } else if bytes.len() >= 7 && bytes[..7].eq_ignore_ascii_case(b"http://") {
        Some(WebScheme::Http)
    } else {
        None
    }
}

#[inline]
pub fn is_web_url(url: &str) -> bool {
    web_scheme(url).is_some()
}

// =============================================================================
// Match Context
// =============================================================================

/// Ephemeral view of a URL used for rule matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchContext {
    /// Lower-cased hostname, empty for host-less URLs
    pub hostname: String,
    /// Path, always starting with `/` for web URLs
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: String,
    /// Raw fragment without the leading `#`
    pub fragment: String,
    /// Decoded query parameters; the last value wins on duplicate keys
    pub search_params: HashMap<String, String>,
    /// Decoded fragment parameters, only populated when the fragment contains `=`
    pub fragment_params: HashMap<String, String>,
    /// Lower-cased serialized URL
    pub raw_url: String,
}

impl MatchContext {
    /// Parse a URL into a match context.
    pub fn parse(input: &str) -> Result<Self, UrlError> {
        let url = Url::parse(input.trim()).map_err(|e| UrlError::MalformedUrl {
            url: input.to_string(),
            reason: e.to_string(),
        })?;

        let query = url.query().unwrap_or("").to_string();
        let fragment = url.fragment().unwrap_or("").to_string();

        let search_params = decode_pairs(&query);
        let fragment_params = if fragment.contains('=') {
            decode_pairs(&fragment)
        } else {
            HashMap::new()
        };

        Ok(Self {
            hostname: url.host_str().unwrap_or("").to_string(),
            path: url.path().to_string(),
            query,
            fragment,
            search_params,
            fragment_params,
            raw_url: url.as_str().to_lowercase(),
        })
    }

    /// `hostname + path`, the form rule patterns are written in.
    pub fn host_path(&self) -> String {
        let mut out = String::with_capacity(self.hostname.len() + self.path.len());
        out.push_str(&self.hostname);
        out.push_str(&self.path);
        out
    }

    /// `hostname + path + "?" + query`, or just `hostname + path` without a query.
    pub fn host_path_query(&self) -> String {
        let mut out = self.host_path();
        if !self.query.is_empty() {
            out.push('?');
            out.push_str(&self.query);
        }
        out
    }
}

fn decode_pairs(input: &str) -> HashMap<String, String> {
    // Inserting in order gives last-value-wins on duplicates
    form_urlencoded::parse(input.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

// =============================================================================
// Host Suffix Check
// =============================================================================

/// True when `host` equals `domain` or is a sub-domain of it.
#[inline]
pub fn is_same_or_subdomain(host: &str, domain: &str) -> bool {
    if domain.is_empty() {
        return false;
    }
    match host.strip_suffix(domain) {
        Some("") => true,
        Some(prefix) => prefix.ends_with('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_web_scheme() {
        assert_eq!(web_scheme("https://example.com"), Some(WebScheme::Https));
        assert_eq!(web_scheme("HTTP://example.com"), Some(WebScheme::Http));
        assert_eq!(web_scheme("chrome://extensions"), None);
        assert_eq!(web_scheme("about:blank"), None);
        assert!(!is_web_url("file:///tmp/a.html"));
    }

    #[test]
    fn test_parse_components() {
        let ctx = MatchContext::parse("https://Shop.Example.com/Cart?id=7&x=a+b#section").unwrap();
        assert_eq!(ctx.hostname, "shop.example.com");
        assert_eq!(ctx.path, "/Cart");
        assert_eq!(ctx.query, "id=7&x=a+b");
        assert_eq!(ctx.fragment, "section");
        assert_eq!(ctx.search_params.get("x").map(String::as_str), Some("a b"));
        assert!(ctx.fragment_params.is_empty());
        assert_eq!(ctx.raw_url, "https://shop.example.com/cart?id=7&x=a+b#section");
    }

    #[test]
    fn test_default_path() {
        let ctx = MatchContext::parse("https://example.com").unwrap();
        assert_eq!(ctx.path, "/");
        assert_eq!(ctx.host_path(), "example.com/");
        assert_eq!(ctx.host_path_query(), "example.com/");
    }

    #[test]
    fn test_duplicate_query_keys_last_wins() {
        let ctx = MatchContext::parse("https://example.com/?a=1&a=2").unwrap();
        assert_eq!(ctx.search_params.get("a").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_fragment_params() {
        let ctx = MatchContext::parse("https://example.com/app#tab=inbox&id=3").unwrap();
        assert_eq!(ctx.fragment_params.get("tab").map(String::as_str), Some("inbox"));
        assert_eq!(ctx.fragment_params.get("id").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_host_path_query() {
        let ctx = MatchContext::parse("https://example.com/watch?v=1").unwrap();
        assert_eq!(ctx.host_path_query(), "example.com/watch?v=1");
    }

    #[test]
    fn test_malformed_url() {
        assert!(matches!(
            MatchContext::parse("not a url"),
            Err(UrlError::MalformedUrl { .. })
        ));
        assert!(MatchContext::parse("https://").is_err());
    }

    #[test]
    fn test_is_same_or_subdomain() {
        assert!(is_same_or_subdomain("example.com", "example.com"));
        assert!(is_same_or_subdomain("app.example.com", "example.com"));
        assert!(!is_same_or_subdomain("badexample.com", "example.com"));
        assert!(!is_same_or_subdomain("example.com", "app.example.com"));
        assert!(!is_same_or_subdomain("example.com", ""));
    }
}
