//! Rule list storage format
//!
//! The rule store persists a JSON document. Two record shapes are accepted on
//! read: the current [`Rule`] record, and the older record written by earlier
//! versions of the extension:
//!
//! ```json
//! { "type": "params", "pattern": "example.com/watch", "title": "Video",
//!   "params": { "v": "/^[a-z0-9]+$/i", "hash_t": "10" }, "createdAt": 1700000000000 }
//! ```
//!
//! Older records are migrated on read and always written back in the current
//! shape. The `/pattern/flags` string encoding of regex values is understood
//! only here and by [`Parameter::expected`](crate::types::Parameter::expected).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{MatchKind, Parameter, Rule};

/// Prefix marking a fragment parameter in older records.
pub const LEGACY_FRAGMENT_PREFIX: &str = "hash_";

/// Error type for decoding a stored rule document.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Invalid rule document: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Slash-encoded Regex Values
// =============================================================================

/// Split a `/pattern/flags` string into `(pattern, flags)`.
/// Returns None when the value is not in that encoding.
pub fn split_slash_pattern(value: &str) -> Option<(&str, &str)> {
    let rest = value.strip_prefix('/')?;
    let last = rest.rfind('/')?;
    Some((&rest[..last], &rest[last + 1..]))
}

#[inline]
pub fn is_slash_pattern(value: &str) -> bool {
    split_slash_pattern(value).is_some()
}

// =============================================================================
// Legacy Records
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LegacyKind {
    Domain,
    Path,
    Params,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRule {
    #[serde(rename = "type")]
    kind: LegacyKind,
    pattern: String,
    title: String,
    #[serde(default)]
    params: BTreeMap<String, String>,
    /// Some early records were written without a timestamp
    #[serde(default)]
    created_at: Option<u64>,
}

impl From<LegacyRule> for Rule {
    fn from(legacy: LegacyRule) -> Self {
        let kind = match legacy.kind {
            LegacyKind::Domain => MatchKind::DomainOnly,
            LegacyKind::Path => MatchKind::DomainAndPath,
            LegacyKind::Params => MatchKind::DomainPathAndParams,
        };

        let parameters = if kind == MatchKind::DomainPathAndParams {
            legacy
                .params
                .into_iter()
                .map(|(key, value)| {
                    let (key, is_from_fragment) = match key.strip_prefix(LEGACY_FRAGMENT_PREFIX) {
                        Some(stripped) => (stripped.to_string(), true),
                        None => (key, false),
                    };
                    Parameter {
                        key,
                        is_regex_value: is_slash_pattern(&value),
                        expected_value: value,
                        is_from_fragment,
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        Rule {
            kind,
            pattern: legacy.pattern,
            title_source: legacy.title,
            parameters,
            created_at: legacy.created_at.unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Current(Rule),
    Legacy(LegacyRule),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredDocument {
    Keyed { rules: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

#[derive(Serialize)]
struct OutputDocument<'a> {
    rules: &'a [Rule],
}

// =============================================================================
// Decode / Encode
// =============================================================================

/// Result of decoding a stored document.
#[derive(Debug, Clone, Default)]
pub struct DecodedRules {
    pub rules: Vec<Rule>,
    /// How many records were in the older shape
    pub migrated: usize,
    /// How many records could not be read in either shape and were dropped
    pub skipped: usize,
}

/// Decode a stored document, migrating older records.
///
/// Accepts either `{ "rules": [...] }` or a bare array. Only the document
/// shape can fail: each record is read on its own, and one that fits
/// neither record shape is logged and skipped. Records are not validated
/// here; a rule with a broken regex still loads and simply never matches.
///
/// Older records without a timestamp are given fresh ids above every id
/// in the document, in document order.
pub fn decode_rules(json: &str) -> Result<DecodedRules, FormatError> {
    let records = match serde_json::from_str::<StoredDocument>(json)? {
        StoredDocument::Keyed { rules } | StoredDocument::Bare(rules) => rules,
    };

    let mut decoded = DecodedRules {
        rules: Vec::with_capacity(records.len()),
        ..DecodedRules::default()
    };
    let mut unstamped = Vec::new();

    for (index, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<StoredRecord>(record) {
            Ok(StoredRecord::Current(rule)) => decoded.rules.push(rule),
            Ok(StoredRecord::Legacy(legacy)) => {
                decoded.migrated += 1;
                if legacy.created_at.is_none() {
                    unstamped.push(decoded.rules.len());
                }
                decoded.rules.push(legacy.into());
            }
            Err(e) => {
                log::warn!("skipping unreadable rule record {index}: {e}");
                decoded.skipped += 1;
            }
        }
    }

    if !unstamped.is_empty() {
        let mut next = decoded.rules.iter().map(Rule::id).max().unwrap_or(0);
        for slot in unstamped {
            next += 1;
            decoded.rules[slot].created_at = next;
        }
    }

    Ok(decoded)
}

/// Encode a rule list as `{ "rules": [...] }`.
pub fn encode_rules(rules: &[Rule]) -> Result<String, FormatError> {
    Ok(serde_json::to_string_pretty(&OutputDocument { rules })?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_slash_pattern() {
        assert_eq!(split_slash_pattern("/abc/i"), Some(("abc", "i")));
        assert_eq!(split_slash_pattern("/a/b/"), Some(("a/b", "")));
        assert_eq!(split_slash_pattern("/abc"), None);
        assert_eq!(split_slash_pattern("abc/"), None);
        assert_eq!(split_slash_pattern("/"), None);
    }

    #[test]
    fn test_decode_current_records() {
        let json = r#"{"rules":[{"kind":"DomainOnly","pattern":"example.com","titleSource":"Ex","createdAt":5}]}"#;
        let decoded = decode_rules(json).unwrap();
        assert_eq!(decoded.migrated, 0);
        assert_eq!(decoded.rules.len(), 1);
        assert_eq!(decoded.rules[0].kind, MatchKind::DomainOnly);
        assert!(decoded.rules[0].parameters.is_empty());
    }

    #[test]
    fn test_decode_legacy_params_record() {
        let json = r#"[{"type":"params","pattern":"example.com/watch","title":"Video",
            "params":{"v":"/^[a-z]+$/i","hash_t":"10","list":""},"createdAt":7}]"#;
        let decoded = decode_rules(json).unwrap();
        assert_eq!(decoded.migrated, 1);

        let rule = &decoded.rules[0];
        assert_eq!(rule.kind, MatchKind::DomainPathAndParams);
        assert_eq!(rule.title_source, "Video");
        assert_eq!(rule.created_at, 7);

        let t = rule.parameters.iter().find(|p| p.key == "t").unwrap();
        assert!(t.is_from_fragment);
        assert!(!t.is_regex_value);

        let v = rule.parameters.iter().find(|p| p.key == "v").unwrap();
        assert!(v.is_regex_value);
        assert!(!v.is_from_fragment);
        assert_eq!(v.expected_value, "/^[a-z]+$/i");
    }

    #[test]
    fn test_decode_legacy_domain_drops_params() {
        let json = r#"[{"type":"domain","pattern":"example.com","title":"Ex","params":{"a":"1"}}]"#;
        let decoded = decode_rules(json).unwrap();
        assert_eq!(decoded.rules[0].kind, MatchKind::DomainOnly);
        assert!(decoded.rules[0].parameters.is_empty());
        assert_eq!(decoded.rules[0].created_at, 1);
    }

    #[test]
    fn test_decode_assigns_distinct_ids_to_unstamped_records() {
        let json = r#"[
            {"type":"domain","pattern":"a.example","title":"A"},
            {"kind":"DomainOnly","pattern":"b.example","titleSource":"B","createdAt":40},
            {"type":"path","pattern":"c.example/x","title":"C"}
        ]"#;
        let decoded = decode_rules(json).unwrap();
        let ids: Vec<_> = decoded.rules.iter().map(Rule::id).collect();
        assert_eq!(ids, vec![41, 40, 42]);
    }

    #[test]
    fn test_decode_skips_unreadable_records() {
        let json = r#"{"rules":[
            {"kind":"DomainOnly","pattern":"example.com","titleSource":"Ex","createdAt":1},
            {"kind":"Wildcard","pattern":"*","titleSource":"W","createdAt":2},
            {"kind":"DomainAndPath","pattern":"example.com/a","titleSource":"A"},
            "not a record"
        ]}"#;
        let decoded = decode_rules(json).unwrap();
        assert_eq!(decoded.skipped, 3);
        assert_eq!(decoded.rules.len(), 1);
        assert_eq!(decoded.rules[0].title_source, "Ex");
    }

    #[test]
    fn test_decode_mixed_document() {
        let json = r#"{"rules":[
            {"type":"path","pattern":"example.com/a","title":"A","createdAt":1},
            {"kind":"Regex","pattern":"^https://","titleSource":"{title}","createdAt":2}
        ]}"#;
        let decoded = decode_rules(json).unwrap();
        assert_eq!(decoded.migrated, 1);
        assert_eq!(decoded.rules[0].kind, MatchKind::DomainAndPath);
        assert_eq!(decoded.rules[1].kind, MatchKind::Regex);
    }

    #[test]
    fn test_decode_keeps_invalid_regex_rules() {
        let json = r#"[{"kind":"Regex","pattern":"([","titleSource":"T","createdAt":1}]"#;
        let decoded = decode_rules(json).unwrap();
        assert_eq!(decoded.rules.len(), 1);
        assert!(decoded.rules[0].validate().is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_rules("{\"rules\": 3}").is_err());
        assert!(decode_rules("not json").is_err());
    }

    #[test]
    fn test_encode_then_decode_is_unchanged() {
        let json = r#"[{"kind":"DomainPathAndParams","pattern":"example.com/w","titleSource":"{title} | {query}",
            "parameters":[{"key":"v","expectedValue":"x","isRegexValue":false,"isFromFragment":true}],"createdAt":3}]"#;
        let first = decode_rules(json).unwrap().rules;
        let encoded = encode_rules(&first).unwrap();
        let second = decode_rules(&encoded).unwrap();
        assert_eq!(second.migrated, 0);
        assert_eq!(second.rules, first);
    }

    #[test]
    fn test_encode_keeps_empty_parameter_list() {
        let json = r#"[{"kind":"DomainPathAndParams","pattern":"example.com/w","titleSource":"W",
            "parameters":[],"createdAt":3}]"#;
        let rules = decode_rules(json).unwrap().rules;
        let encoded: serde_json::Value = serde_json::from_str(&encode_rules(&rules).unwrap()).unwrap();
        assert_eq!(encoded["rules"][0]["parameters"], serde_json::json!([]));
    }
}
