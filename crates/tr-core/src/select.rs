//! Rule Selector
//!
//! Precedence policy: rules are evaluated from the end of the stored list to
//! the start, so the most recently appended rule is tried first. The first
//! structural match wins and the rest are ignored.
//!
//! Promotion (optional, see `promote`) moves a matched rule into the
//! first-evaluated slot, which is the *end* of the stored list. Combined with
//! reverse traversal this makes a page's established rule sticky against
//! rules added later that also match.

use crate::matcher::Matcher;
use crate::types::{Rule, RuleId};
use crate::url::MatchContext;

/// The rule chosen for a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection<'a> {
    /// Position in the stored list
    pub index: usize,
    pub rule: &'a Rule,
}

/// Select the rule that applies to a URL.
pub fn select<'a>(matcher: &Matcher, url: &str, rules: &'a [Rule]) -> Option<Selection<'a>> {
    match MatchContext::parse(url) {
        Ok(ctx) => select_in_context(matcher, &ctx, rules),
        Err(err) => {
            log::warn!("{err}; no rule selected");
            None
        }
    }
}

/// Select against an already parsed context.
pub fn select_in_context<'a>(
    matcher: &Matcher,
    ctx: &MatchContext,
    rules: &'a [Rule],
) -> Option<Selection<'a>> {
    rules
        .iter()
        .enumerate()
        .rev()
        .find(|(_, rule)| matcher.matches(ctx, rule))
        .map(|(index, rule)| Selection { index, rule })
}

/// Every stored index whose rule matches the URL, in storage order.
///
/// Used by the UI to highlight matching rules; only the last of them (per
/// [`select`]) is ever applied.
pub fn matching_indices(matcher: &Matcher, url: &str, rules: &[Rule]) -> Vec<usize> {
    let ctx = match MatchContext::parse(url) {
        Ok(ctx) => ctx,
        Err(err) => {
            log::warn!("{err}; no rules highlighted");
            return Vec::new();
        }
    };

    rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| matcher.matches(&ctx, rule))
        .map(|(index, _)| index)
        .collect()
}

/// Move the rule with `id` into the first-evaluated slot.
///
/// Returns true when the list changed. Missing ids and rules already in
/// place leave the list untouched.
pub fn promote(rules: &mut Vec<Rule>, id: RuleId) -> bool {
    let Some(pos) = rules.iter().position(|rule| rule.id() == id) else {
        return false;
    };
    if pos + 1 == rules.len() {
        return false;
    }
    let rule = rules.remove(pos);
    rules.push(rule);
    true
}
