//! Title Renderer
//!
//! Substitutes a closed set of placeholders in a rule's title source. The
//! scan is single-pass: substituted values are never re-examined, so a page
//! title containing `{domain}` stays literal.

use crate::types::Rule;
use crate::url::MatchContext;

/// Named substitutions understood in a title source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Title,
    Domain,
    Path,
    Query,
}

const PLACEHOLDERS: [(&str, Placeholder); 4] = [
    ("{title}", Placeholder::Title),
    ("{domain}", Placeholder::Domain),
    ("{path}", Placeholder::Path),
    ("{query}", Placeholder::Query),
];

/// Page values available to a title template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageContext<'a> {
    /// Title the page had before any rule was applied
    pub original_title: &'a str,
    pub domain: &'a str,
    pub path: &'a str,
    /// Raw query string without the leading `?`
    pub query: &'a str,
}

impl<'a> PageContext<'a> {
    pub fn from_match(original_title: &'a str, ctx: &'a MatchContext) -> Self {
        Self {
            original_title,
            domain: &ctx.hostname,
            path: &ctx.path,
            query: &ctx.query,
        }
    }

    fn value(&self, placeholder: Placeholder) -> &'a str {
        match placeholder {
            Placeholder::Title => self.original_title,
            Placeholder::Domain => self.domain,
            Placeholder::Path => self.path,
            Placeholder::Query => self.query,
        }
    }
}

/// True when the title source contains at least one placeholder.
pub fn is_template(source: &str) -> bool {
    PLACEHOLDERS.iter().any(|(token, _)| source.contains(token))
}

/// Render the title for a matched rule.
pub fn render(rule: &Rule, page: &PageContext<'_>) -> String {
    render_template(&rule.title_source, page)
}

/// Render a title source against page values.
pub fn render_template(source: &str, page: &PageContext<'_>) -> String {
    if !is_template(source) {
        return source.to_string();
    }

    let mut out = String::with_capacity(source.len() + page.original_title.len());
    let mut rest = source;

    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match PLACEHOLDERS.iter().find(|(token, _)| tail.starts_with(token)) {
            Some((token, placeholder)) => {
                out.push_str(page.value(*placeholder));
                rest = &tail[token.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);

    out
}
