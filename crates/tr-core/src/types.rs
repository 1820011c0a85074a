//! Core type definitions for TabRenamer
//!
//! These types are the persisted rule records exchanged with the rule store
//! and the UI layer. Their serialized field names are part of the storage
//! format and must not change.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::format::split_slash_pattern;
use crate::matcher::compile_regex;

/// Identity of a rule inside a rule list.
///
/// Rules are identified by their creation timestamp; the rule book keeps
/// timestamps unique when it appends.
pub type RuleId = u64;

// =============================================================================
// Rule Errors
// =============================================================================

/// Error type for rule construction and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("Pattern must not be empty for {0:?} rules")]
    EmptyPattern(MatchKind),
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern { pattern: String, reason: String },
    #[error("Duplicate parameter key: {0}")]
    DuplicateParameter(String),
    #[error("Parameters are only allowed on DomainPathAndParams rules, not {0:?}")]
    ParametersNotAllowed(MatchKind),
}

// =============================================================================
// Match Kinds
// =============================================================================

/// Discriminator selecting which comparison a rule uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum MatchKind {
    /// Hostname equals the pattern or is a sub-domain of it
    DomainOnly,
    /// `hostname + path` equals the pattern (case-sensitive)
    DomainAndPath,
    /// `hostname + path` equals the pattern and every parameter is satisfied
    DomainPathAndParams,
    /// Lower-cased substring of the full URL
    RawContains,
    /// Regular expression over the lower-cased full URL
    Regex,
}

impl MatchKind {
    /// Parse from the short names used by the CLI and older stores.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "domain" | "domainonly" => Some(Self::DomainOnly),
            "path" | "domainandpath" => Some(Self::DomainAndPath),
            "params" | "domainpathandparams" => Some(Self::DomainPathAndParams),
            "contains" | "rawcontains" => Some(Self::RawContains),
            "regex" => Some(Self::Regex),
            _ => None,
        }
    }
}

// =============================================================================
// Parameters
// =============================================================================

/// One query or fragment parameter constraint of a `DomainPathAndParams` rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Parameter {
    pub key: String,
    pub expected_value: String,
    #[serde(default)]
    pub is_regex_value: bool,
    #[serde(default)]
    pub is_from_fragment: bool,
}

/// Interpreted form of a parameter's expected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedValue<'a> {
    /// Blank expectation: the parameter is not constrained
    Any,
    /// Exact string equality
    Literal(&'a str),
    /// Regular expression with JS-style flags
    Pattern { source: &'a str, flags: &'a str },
}

impl Parameter {
    /// Query-string parameter with an exact expected value.
    pub fn query(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            expected_value: value.into(),
            is_regex_value: false,
            is_from_fragment: false,
        }
    }

    /// Fragment parameter with an exact expected value.
    pub fn fragment(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            is_from_fragment: true,
            ..Self::query(key, value)
        }
    }

    /// Marks the expected value as a regular expression.
    pub fn regex(mut self) -> Self {
        self.is_regex_value = true;
        self
    }

    /// Interpret the expected value.
    ///
    /// Regex values may be written bare (`^abc$`) or in the older
    /// `/pattern/flags` encoding; both resolve to [`ExpectedValue::Pattern`].
    pub fn expected(&self) -> ExpectedValue<'_> {
        if self.expected_value.trim().is_empty() {
            return ExpectedValue::Any;
        }
        if !self.is_regex_value {
            return ExpectedValue::Literal(&self.expected_value);
        }
        match split_slash_pattern(&self.expected_value) {
            Some((source, flags)) => ExpectedValue::Pattern { source, flags },
            None => ExpectedValue::Pattern {
                source: &self.expected_value,
                flags: "",
            },
        }
    }
}

// =============================================================================
// Rule
// =============================================================================

/// A persisted matcher plus title-rendering directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Rule {
    pub kind: MatchKind,
    pub pattern: String,
    /// Literal title, or a template using `{title}`, `{domain}`, `{path}`, `{query}`
    pub title_source: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Creation timestamp in milliseconds; doubles as the rule's identity
    #[ts(type = "number")]
    pub created_at: u64,
}

impl Rule {
    /// Build a rule, enforcing the record invariants.
    pub fn new(
        kind: MatchKind,
        pattern: impl Into<String>,
        title_source: impl Into<String>,
        parameters: Vec<Parameter>,
        created_at: u64,
    ) -> Result<Self, RuleError> {
        let rule = Self {
            kind,
            pattern: pattern.into(),
            title_source: title_source.into(),
            parameters,
            created_at,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn id(&self) -> RuleId {
        self.created_at
    }

    /// Check the record invariants, returning the first violation.
    pub fn validate(&self) -> Result<(), RuleError> {
        match self.violations().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Every invariant violation of this record, in check order.
    pub fn violations(&self) -> Vec<RuleError> {
        let mut errors = Vec::new();

        if self.kind == MatchKind::Regex {
            if let Err(err) = compile_regex(&self.pattern, "") {
                errors.push(err);
            }
        } else if self.pattern.is_empty() {
            errors.push(RuleError::EmptyPattern(self.kind));
        }

        if !self.parameters.is_empty() && self.kind != MatchKind::DomainPathAndParams {
            errors.push(RuleError::ParametersNotAllowed(self.kind));
        }

        // Query and fragment keys live in separate namespaces
        let mut seen: HashSet<(&str, bool)> = HashSet::new();
        for param in &self.parameters {
            if !seen.insert((param.key.as_str(), param.is_from_fragment)) {
                errors.push(RuleError::DuplicateParameter(param.key.clone()));
            }
            if let ExpectedValue::Pattern { source, flags } = param.expected() {
                if let Err(err) = compile_regex(source, flags) {
                    errors.push(err);
                }
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_binding_exports_created_at_as_number() {
        let decl = Rule::decl();
        assert!(decl.contains("createdAt: number"), "{decl}");
        assert!(decl.contains("parameters: Array<Parameter>"), "{decl}");
    }

    #[test]
    fn test_rule_new_rejects_empty_pattern() {
        let err = Rule::new(MatchKind::DomainOnly, "", "Title", Vec::new(), 1).unwrap_err();
        assert_eq!(err, RuleError::EmptyPattern(MatchKind::DomainOnly));
    }

    #[test]
    fn test_rule_new_rejects_bad_regex() {
        let err = Rule::new(MatchKind::Regex, "[unbalanced", "Title", Vec::new(), 1).unwrap_err();
        assert!(matches!(err, RuleError::InvalidRegexPattern { .. }));
    }

    #[test]
    fn test_rule_new_allows_empty_regex() {
        assert!(Rule::new(MatchKind::Regex, "", "Title", Vec::new(), 1).is_ok());
    }

    #[test]
    fn test_duplicate_parameter_keys() {
        let params = vec![Parameter::query("v", "1"), Parameter::query("v", "2")];
        let err = Rule::new(MatchKind::DomainPathAndParams, "example.com/watch", "T", params, 1)
            .unwrap_err();
        assert_eq!(err, RuleError::DuplicateParameter("v".to_string()));
    }

    #[test]
    fn test_same_key_in_query_and_fragment() {
        let params = vec![Parameter::query("tab", "1"), Parameter::fragment("tab", "2")];
        assert!(Rule::new(MatchKind::DomainPathAndParams, "example.com/", "T", params, 1).is_ok());
    }

    #[test]
    fn test_parameters_only_on_param_rules() {
        let params = vec![Parameter::query("v", "1")];
        let err = Rule::new(MatchKind::DomainAndPath, "example.com/", "T", params, 1).unwrap_err();
        assert_eq!(err, RuleError::ParametersNotAllowed(MatchKind::DomainAndPath));
    }

    #[test]
    fn test_violations_collects_all() {
        let rule = Rule {
            kind: MatchKind::RawContains,
            pattern: String::new(),
            title_source: "T".to_string(),
            parameters: vec![Parameter::query("a", "1"), Parameter::query("a", "1")],
            created_at: 1,
        };
        assert_eq!(rule.violations().len(), 3);
    }

    #[test]
    fn test_expected_value_forms() {
        assert_eq!(Parameter::query("k", "  ").expected(), ExpectedValue::Any);
        assert_eq!(Parameter::query("k", "abc").expected(), ExpectedValue::Literal("abc"));
        assert_eq!(
            Parameter::query("k", "/^a+$/i").regex().expected(),
            ExpectedValue::Pattern { source: "^a+$", flags: "i" }
        );
        assert_eq!(
            Parameter::query("k", "^a+$").regex().expected(),
            ExpectedValue::Pattern { source: "^a+$", flags: "" }
        );
    }

    #[test]
    fn test_serialized_field_names() {
        let rule = Rule::new(
            MatchKind::DomainPathAndParams,
            "example.com/watch",
            "{title}",
            vec![Parameter::fragment("tab", "2").regex()],
            42,
        )
        .unwrap();
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["kind"], "DomainPathAndParams");
        assert_eq!(json["titleSource"], "{title}");
        assert_eq!(json["createdAt"], 42);
        assert_eq!(json["parameters"][0]["expectedValue"], "2");
        assert_eq!(json["parameters"][0]["isRegexValue"], true);
        assert_eq!(json["parameters"][0]["isFromFragment"], true);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!(MatchKind::from_str("domain"), Some(MatchKind::DomainOnly));
        assert_eq!(MatchKind::from_str("Regex"), Some(MatchKind::Regex));
        assert_eq!(MatchKind::from_str("nope"), None);
    }
}
