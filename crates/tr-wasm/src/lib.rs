//! WebAssembly bindings for TabRenamer

use std::sync::OnceLock;

use tr_core::{
    decode_rules, encode_rules, is_web_url, matching_indices, promote, render, select,
    MatchContext, Matcher, PageContext, Rule,
};
use wasm_bindgen::prelude::*;

static MATCHER: OnceLock<Matcher> = OnceLock::new();

fn matcher() -> &'static Matcher {
    MATCHER.get_or_init(Matcher::new)
}

fn load_rules(rules_json: &str) -> Option<Vec<Rule>> {
    match decode_rules(rules_json) {
        Ok(decoded) => Some(decoded.rules),
        Err(e) => {
            web_sys::console::warn_1(&JsValue::from_str(&format!("Ignoring rule list: {}", e)));
            None
        }
    }
}

fn selected(url: &str, rules: &[Rule]) -> Option<(usize, Rule)> {
    select(matcher(), url, rules).map(|s| (s.index, s.rule.clone()))
}

fn highlighted(url: &str, rules: &[Rule]) -> Vec<usize> {
    if !is_web_url(url) {
        return Vec::new();
    }
    matching_indices(matcher(), url, rules)
}

fn rendered_title(url: &str, original_title: &str, rule: &Rule) -> String {
    match MatchContext::parse(url) {
        Ok(ctx) => render(rule, &PageContext::from_match(original_title, &ctx)),
        Err(_) => rule.title_source.clone(),
    }
}

fn promoted(rules_json: &str, id: u64) -> Result<String, String> {
    let mut rules = decode_rules(rules_json).map_err(|e| e.to_string())?.rules;
    promote(&mut rules, id);
    encode_rules(&rules).map_err(|e| e.to_string())
}

fn rule_problems(rule_json: &str) -> Vec<String> {
    match serde_json::from_str::<Rule>(rule_json) {
        Ok(rule) => rule.violations().iter().map(|e| e.to_string()).collect(),
        Err(e) => vec![format!("Malformed rule: {}", e)],
    }
}

/// Rule that applies to `url`, with its rendered title.
///
/// Returns `null` when nothing matches or the rule list cannot be read.
#[wasm_bindgen]
pub fn select_rule(url: &str, original_title: &str, rules_json: &str) -> JsValue {
    if !is_web_url(url) {
        return JsValue::NULL;
    }
    let Some(rules) = load_rules(rules_json) else {
        return JsValue::NULL;
    };
    let Some((index, rule)) = selected(url, &rules) else {
        return JsValue::NULL;
    };

    let result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&result, &"index".into(), &JsValue::from(index as u32));
    let _ = js_sys::Reflect::set(&result, &"ruleId".into(), &JsValue::from(rule.id() as f64));
    let _ = js_sys::Reflect::set(
        &result,
        &"title".into(),
        &JsValue::from_str(&rendered_title(url, original_title, &rule)),
    );
    result.into()
}

/// Stored indices of every matching rule, for highlighting in the UI.
#[wasm_bindgen]
pub fn matching_rules(url: &str, rules_json: &str) -> js_sys::Array {
    let indices = js_sys::Array::new();
    if let Some(rules) = load_rules(rules_json) {
        for index in highlighted(url, &rules) {
            indices.push(&JsValue::from(index as u32));
        }
    }
    indices
}

#[wasm_bindgen]
pub fn matches_rule(url: &str, rule_json: &str) -> bool {
    match serde_json::from_str::<Rule>(rule_json) {
        Ok(rule) => matcher().matches_url(url, &rule),
        Err(_) => false,
    }
}

#[wasm_bindgen]
pub fn render_title(url: &str, original_title: &str, rule_json: &str) -> Result<String, JsValue> {
    let rule: Rule = serde_json::from_str(rule_json)
        .map_err(|e| JsValue::from_str(&format!("Malformed rule: {}", e)))?;
    Ok(rendered_title(url, original_title, &rule))
}

/// Messages for every problem with a rule; empty when it can be saved.
#[wasm_bindgen]
pub fn validate_rule(rule_json: &str) -> js_sys::Array {
    let problems = js_sys::Array::new();
    for problem in rule_problems(rule_json) {
        problems.push(&JsValue::from_str(&problem));
    }
    problems
}

/// Rewrite a stored document in the current record shape.
#[wasm_bindgen]
pub fn migrate_rules(rules_json: &str) -> Result<JsValue, JsValue> {
    let decoded = decode_rules(rules_json)
        .map_err(|e| JsValue::from_str(&format!("Failed to read rules: {}", e)))?;
    let json = encode_rules(&decoded.rules)
        .map_err(|e| JsValue::from_str(&format!("Failed to write rules: {}", e)))?;

    let result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&result, &"json".into(), &JsValue::from_str(&json));
    let _ = js_sys::Reflect::set(&result, &"migrated".into(), &JsValue::from(decoded.migrated as u32));
    let _ = js_sys::Reflect::set(&result, &"skipped".into(), &JsValue::from(decoded.skipped as u32));
    let _ = js_sys::Reflect::set(&result, &"total".into(), &JsValue::from(decoded.rules.len() as u32));
    Ok(result.into())
}

/// Move a rule into the first-evaluated slot and return the new document.
#[wasm_bindgen]
pub fn promote_rule(rules_json: &str, rule_id: f64) -> Result<String, JsValue> {
    promoted(rules_json, rule_id as u64).map_err(|e| JsValue::from_str(&e))
}

#[wasm_bindgen]
pub fn is_web_url_js(url: &str) -> bool {
    is_web_url(url)
}
