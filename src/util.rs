//! Small text helpers shared by the agent and orchestrator modules.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)```").unwrap());

/// Extract the first balanced JSON object from text that may contain other
/// content. Braces inside string literals are ignored.
pub fn extract_json_object(text: &str) -> Option<&str> {
    balanced_object_at(text, text.find('{')?)
}

/// Balanced `{...}` span starting at byte offset `start`.
fn balanced_object_at(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// First JSON object found by trying every `{` in turn.
fn first_embedded_object(text: &str) -> Option<Value> {
    text.match_indices('{')
        .filter_map(|(start, _)| balanced_object_at(text, start))
        .find_map(parse_object)
}

/// Structured payload carried by an agent's text output, if any.
///
/// Tried in order: the whole text, each fenced code block, then every
/// embedded object. Prose or code with braces ahead of the JSON is skipped.
pub fn parse_json_payload(text: &str) -> Option<Value> {
    if let Some(value) = parse_object(text) {
        return Some(value);
    }
    let fenced = FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| parse_object(m.as_str()).or_else(|| first_embedded_object(m.as_str())));
    fenced.or_else(|| first_embedded_object(text))
}

/// Truncate to at most `max` characters, appending `...` when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}...", cut)
}
