//! TabRenamer Core Library
//!
//! This crate provides the rule matching and title rendering engine for the
//! TabRenamer extension. It is synchronous and free of I/O; the per-page
//! runtime in `tr-runtime` drives it.
//!
//! # Architecture
//!
//! A URL is parsed once into a [`MatchContext`]. The selector walks the stored
//! rule list from most recent to oldest and asks the [`Matcher`] about each
//! candidate; the first match wins. The winning rule's title source is then
//! rendered against the page's original title and URL parts.
//!
//! # Modules
//!
//! - `types`: Persisted rule records and their invariants
//! - `url`: URL parsing into a match context
//! - `matcher`: Per-rule match decision, with a compiled regex cache
//! - `select`: Precedence policy and promotion
//! - `render`: Placeholder substitution for titles
//! - `format`: Stored document encoding and migration of older records

pub mod format;
pub mod matcher;
pub mod render;
pub mod select;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use format::{decode_rules, encode_rules, DecodedRules, FormatError};
pub use matcher::Matcher;
pub use render::{render, render_template, PageContext};
pub use select::{matching_indices, promote, select, select_in_context, Selection};
pub use types::{ExpectedValue, MatchKind, Parameter, Rule, RuleError, RuleId};
pub use crate::url::{is_web_url, MatchContext, UrlError};
