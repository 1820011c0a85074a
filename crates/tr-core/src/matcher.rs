//! Pattern Matcher
//!
//! Decides whether a single rule applies to a URL. Every failure mode here
//! (malformed URL, uncompilable regex) is a logged no-match, never an error.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use regex::{Regex, RegexBuilder};

use crate::types::{ExpectedValue, MatchKind, Parameter, Rule, RuleError};
use crate::url::{is_same_or_subdomain, MatchContext};

const REGEX_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(256) {
    Some(capacity) => capacity,
    None => panic!("regex cache capacity must be non-zero"),
};

// =============================================================================
// Regex Compilation
// =============================================================================

/// Compile a regex source with JS-style flags.
pub fn compile_regex(source: &str, flags: &str) -> Result<Regex, RuleError> {
    let mut builder = RegexBuilder::new(source);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'g' | 'y' | 'u' | 'd' => {}
            other => {
                return Err(RuleError::InvalidRegexPattern {
                    pattern: source.to_string(),
                    reason: format!("unsupported flag '{other}'"),
                });
            }
        }
    }
    builder.build().map_err(|e| RuleError::InvalidRegexPattern {
        pattern: source.to_string(),
        reason: e.to_string(),
    })
}

// =============================================================================
// Matcher
// =============================================================================

/// The pattern matching engine.
///
/// Holds a cache of compiled regexes so repeated evaluations of the same rule
/// list do not recompile. Invalid sources are cached as well, which means a
/// broken rule is logged once rather than on every navigation.
pub struct Matcher {
    regexes: Mutex<LruCache<String, Option<Regex>>>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher {
    pub fn new() -> Self {
        Self {
            regexes: Mutex::new(LruCache::new(REGEX_CACHE_CAPACITY)),
        }
    }

    /// Match a raw URL against a rule. Malformed URLs never match.
    pub fn matches_url(&self, url: &str, rule: &Rule) -> bool {
        match MatchContext::parse(url) {
            Ok(ctx) => self.matches(&ctx, rule),
            Err(err) => {
                log::warn!("{err}; treating as no match");
                false
            }
        }
    }

    /// Match a parsed context against a rule.
    pub fn matches(&self, ctx: &MatchContext, rule: &Rule) -> bool {
        if rule.pattern.is_empty() && rule.kind != MatchKind::Regex {
            return false;
        }

        match rule.kind {
            MatchKind::DomainOnly => is_same_or_subdomain(&ctx.hostname, &rule.pattern),
            // Case-sensitive, unlike RawContains and Regex
            MatchKind::DomainAndPath => ctx.host_path() == rule.pattern,
            MatchKind::DomainPathAndParams => {
                ctx.host_path() == rule.pattern && self.parameters_match(ctx, &rule.parameters)
            }
            MatchKind::RawContains => {
                let needle = rule.pattern.to_lowercase();
                ctx.raw_url.contains(&needle)
                    || ctx.host_path().to_lowercase() == needle
                    || ctx.host_path_query().to_lowercase() == needle
            }
            MatchKind::Regex => match self.regex(&rule.pattern, "", false) {
                Some(re) => re.is_match(&ctx.raw_url),
                None => false,
            },
        }
    }

    /// All parameters must hold; stops at the first failure.
    fn parameters_match(&self, ctx: &MatchContext, params: &[Parameter]) -> bool {
        params.iter().all(|param| self.parameter_matches(ctx, param))
    }

    fn parameter_matches(&self, ctx: &MatchContext, param: &Parameter) -> bool {
        let actual = if param.is_from_fragment {
            if param.key == "hash" {
                Some(ctx.fragment.as_str())
            } else {
                ctx.fragment_params.get(&param.key).map(String::as_str)
            }
        } else {
            ctx.search_params.get(&param.key).map(String::as_str)
        };

        match param.expected() {
            ExpectedValue::Any => true,
            ExpectedValue::Literal(expected) => actual == Some(expected),
            ExpectedValue::Pattern { source, flags } => match self.regex(source, flags, true) {
                Some(re) => re.is_match(actual.unwrap_or("")),
                None => false,
            },
        }
    }

    /// Fetch or compile a regex. `None` means the source does not compile.
    fn regex(&self, source: &str, flags: &str, force_case_insensitive: bool) -> Option<Regex> {
        let key = format!("{}\u{0}{}\u{0}{}", force_case_insensitive, flags, source);
        let mut cache = self.regexes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.get(&key) {
            return cached.clone();
        }

        let compiled = if force_case_insensitive && !flags.contains('i') {
            compile_regex(source, &format!("{flags}i"))
        } else {
            compile_regex(source, flags)
        };

        let compiled = match compiled {
            Ok(re) => Some(re),
            Err(err) => {
                log::warn!("{err}; rule treated as non-matching");
                None
            }
        };
        cache.put(key, compiled.clone());
        compiled
    }

    #[cfg(test)]
    fn cached_regex_count(&self) -> usize {
        self.regexes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(kind: MatchKind, pattern: &str) -> Rule {
        Rule {
            kind,
            pattern: pattern.to_string(),
            title_source: "Pinned".to_string(),
            parameters: Vec::new(),
            created_at: 1,
        }
    }

    fn params_rule(pattern: &str, parameters: Vec<Parameter>) -> Rule {
        Rule {
            parameters,
            ..rule(MatchKind::DomainPathAndParams, pattern)
        }
    }

    #[test]
    fn test_domain_only_exact_and_subdomain() {
        let m = Matcher::new();
        let r = rule(MatchKind::DomainOnly, "example.com");
        assert!(m.matches_url("https://example.com/", &r));
        assert!(m.matches_url("https://shop.example.com/cart", &r));
        assert!(m.matches_url("https://a.b.example.com/", &r));
        assert!(!m.matches_url("https://notexample.com/", &r));
        assert!(!m.matches_url("https://example.org/", &r));
    }

    #[test]
    fn test_domain_and_path_is_case_sensitive() {
        let m = Matcher::new();
        let r = rule(MatchKind::DomainAndPath, "example.com/Docs");
        assert!(m.matches_url("https://example.com/Docs?x=1#y", &r));
        assert!(!m.matches_url("https://example.com/docs", &r));
        assert!(!m.matches_url("https://example.com/Docs/more", &r));
    }

    #[test]
    fn test_raw_contains() {
        let m = Matcher::new();
        let r = rule(MatchKind::RawContains, "GitHub.com/Rust");
        assert!(m.matches_url("https://github.com/rust-lang/rust", &r));
        let exact = rule(MatchKind::RawContains, "example.com/watch?v=abc");
        assert!(m.matches_url("https://example.com/watch?v=abc", &exact));
        assert!(!m.matches_url("https://example.com/watch?v=xyz", &exact));
    }

    #[test]
    fn test_regex_over_lowercased_url() {
        let m = Matcher::new();
        let r = rule(MatchKind::Regex, r"^https://[a-z]+\.example\.com/issues/\d+$");
        assert!(m.matches_url("https://Tracker.Example.com/issues/42", &r));
        assert!(!m.matches_url("https://tracker.example.com/issues/abc", &r));
        // No implicit case-insensitive flag: upper-case patterns never see upper-case input
        let upper = rule(MatchKind::Regex, "ISSUES");
        assert!(!m.matches_url("https://example.com/ISSUES", &upper));
    }

    #[test]
    fn test_invalid_regex_never_matches() {
        let m = Matcher::new();
        let r = rule(MatchKind::Regex, "([a-z");
        assert!(!m.matches_url("https://example.com/", &r));
        assert!(!m.matches_url("https://example.com/", &r));
        assert_eq!(m.cached_regex_count(), 1);
    }

    #[test]
    fn test_malformed_url_never_matches() {
        let m = Matcher::new();
        for kind in [
            MatchKind::DomainOnly,
            MatchKind::DomainAndPath,
            MatchKind::DomainPathAndParams,
            MatchKind::RawContains,
            MatchKind::Regex,
        ] {
            assert!(!m.matches_url("::not a url::", &rule(kind, "")));
            assert!(!m.matches_url("::not a url::", &rule(kind, "example.com")));
        }
    }

    #[test]
    fn test_empty_pattern_never_matches_non_regex() {
        let m = Matcher::new();
        assert!(!m.matches_url("https://example.com/", &rule(MatchKind::RawContains, "")));
        assert!(!m.matches_url("https://example.com./", &rule(MatchKind::DomainOnly, "")));
    }

    #[test]
    fn test_params_empty_list_matches_on_path() {
        let m = Matcher::new();
        let r = params_rule("example.com/watch", Vec::new());
        assert!(m.matches_url("https://example.com/watch?v=1#t=3", &r));
        assert!(m.matches_url("https://example.com/watch", &r));
        assert!(!m.matches_url("https://example.com/other", &r));
    }

    #[test]
    fn test_params_regex_value() {
        let m = Matcher::new();
        let r = params_rule(
            "example.com/watch",
            vec![Parameter::query("v", "/^[a-z0-9]{11}$/").regex()],
        );
        assert!(m.matches_url("https://example.com/watch?v=dQw4w9WgXcQ", &r));
        assert!(!m.matches_url("https://example.com/watch?v=123", &r));
        assert!(!m.matches_url("https://example.com/watch", &r));
    }

    #[test]
    fn test_params_literal_value() {
        let m = Matcher::new();
        let r = params_rule(
            "example.com/search",
            vec![Parameter::query("q", "rust"), Parameter::query("page", "2")],
        );
        assert!(m.matches_url("https://example.com/search?page=2&q=rust", &r));
        assert!(!m.matches_url("https://example.com/search?q=rust", &r));
        assert!(!m.matches_url("https://example.com/search?q=Rust&page=2", &r));
    }

    #[test]
    fn test_params_blank_value_is_skipped() {
        let m = Matcher::new();
        let r = params_rule("example.com/item", vec![Parameter::query("id", "")]);
        assert!(m.matches_url("https://example.com/item?id=9", &r));
        assert!(m.matches_url("https://example.com/item", &r));
    }

    #[test]
    fn test_params_fragment_lookup() {
        let m = Matcher::new();
        let r = params_rule("mail.example.com/", vec![Parameter::fragment("folder", "inbox")]);
        assert!(m.matches_url("https://mail.example.com/#folder=inbox", &r));
        assert!(!m.matches_url("https://mail.example.com/#folder=sent", &r));
        assert!(!m.matches_url("https://mail.example.com/?folder=inbox", &r));
    }

    #[test]
    fn test_params_whole_hash() {
        let m = Matcher::new();
        let r = params_rule("app.example.com/", vec![Parameter::fragment("hash", "/settings")]);
        assert!(m.matches_url("https://app.example.com/#/settings", &r));
        assert!(!m.matches_url("https://app.example.com/#/profile", &r));
    }

    #[test]
    fn test_params_invalid_regex_value_fails() {
        let m = Matcher::new();
        let r = params_rule("example.com/", vec![Parameter::query("v", "([").regex()]);
        assert!(!m.matches_url("https://example.com/?v=(", &r));
    }

    #[test]
    fn test_regex_value_missing_param_tests_empty_string() {
        let m = Matcher::new();
        let r = params_rule("example.com/", vec![Parameter::query("v", "^$").regex()]);
        assert!(m.matches_url("https://example.com/", &r));
    }

    #[test]
    fn test_compile_regex_flags() {
        assert!(compile_regex("abc", "gi").unwrap().is_match("ABC"));
        assert!(compile_regex("^b", "m").unwrap().is_match("a\nb"));
        assert!(matches!(
            compile_regex("abc", "x"),
            Err(RuleError::InvalidRegexPattern { .. })
        ));
        // Look-around is not supported by the regex dialect
        assert!(compile_regex("a(?=b)", "").is_err());
    }

    #[test]
    fn test_regex_cache_is_bounded() {
        let m = Matcher::new();
        for i in 0..300 {
            let r = rule(MatchKind::Regex, &format!("^https://example\\.com/{i}$"));
            assert!(m.matches_url(&format!("https://example.com/{i}"), &r));
        }
        assert_eq!(m.cached_regex_count(), REGEX_CACHE_CAPACITY.get());
    }
}
