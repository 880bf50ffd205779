//! Robust extraction of a JSON object from an LLM text response.
//!
//! LLMs routinely wrap JSON in prose, fenced code blocks, or partial
//! markdown. This is the single shared fallback chain the Plan Builder
//! and the Placeholder Resolver both use, in the order each attempt is
//! tried.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static THINK_TAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)</think>(.*)").unwrap());
static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*([\s\S]*?)```").unwrap());
static OBJECT_SHAPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)(\{[\s\S]*\})").unwrap());
static TWO_KEY_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)\{\s*"([^"]+)"\s*:\s*"([^"]+)"\s*,\s*"([^"]+)"\s*:\s*"([\s\S]*?)"\s*\}"#).unwrap()
});

/// Strips a leading `<think>...</think>` block some models prepend to every
/// response, keeping whatever follows the closing tag. A no-op if the tag
/// isn't present.
pub fn strip_leading_think_block(content: &str) -> String {
    match THINK_TAIL.captures(content) {
        Some(caps) => caps.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
        None => content.to_string(),
    }
}

/// Extracts a JSON object from free-form LLM text, in order:
/// raw parse, fenced code block, first `{...}` match, two-string-key pair fallback.
/// Returns `None` (never panics) if nothing parses.
pub fn extract_json_object(content: &str) -> Option<Value> {
    if content.is_empty() {
        return None;
    }

    if let Ok(v) = serde_json::from_str::<Value>(content) {
        return Some(v);
    }

    if let Some(caps) = CODE_BLOCK.captures(content) {
        if let Some(inner) = caps.get(1) {
            if let Ok(v) = serde_json::from_str::<Value>(inner.as_str().trim()) {
                return Some(v);
            }
        }
    }

    if let Some(caps) = OBJECT_SHAPE.captures(content) {
        if let Some(inner) = caps.get(1) {
            if let Ok(v) = serde_json::from_str::<Value>(inner.as_str()) {
                return Some(v);
            }
        }
    }

    if let Some(caps) = TWO_KEY_PAIR.captures(content) {
        let key1 = caps.get(1)?.as_str();
        let val1 = caps.get(2)?.as_str();
        let key2 = caps.get(3)?.as_str();
        let val2 = caps.get(4)?.as_str();
        let mut map = serde_json::Map::new();
        map.insert(key1.to_string(), Value::String(val1.to_string()));
        map.insert(key2.to_string(), Value::String(val2.to_string()));
        return Some(Value::Object(map));
    }

    tracing::warn!(content, "could not extract JSON object from LLM response");
    None
}

/// Same fallback chain, returning an empty object instead of `None` — the
/// shape every per-step assessment call wants when it gives up.
pub fn extract_json_object_or_empty(content: &str) -> Value {
    extract_json_object(content).unwrap_or_else(|| Value::Object(serde_json::Map::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_raw_json() {
        let v = extract_json_object(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn parses_fenced_code_block() {
        let v = extract_json_object("here you go:\n```json\n{\"a\": 1}\n```\nthanks").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn parses_first_object_in_prose() {
        let v = extract_json_object("sure, the result is {\"a\": 1} and nothing else").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn returns_none_on_garbage() {
        assert!(extract_json_object("no json here at all").is_none());
    }

    #[test]
    fn strips_think_prefix() {
        assert_eq!(strip_leading_think_block("<think>reasoning</think>  需要"), "需要");
        assert_eq!(strip_leading_think_block("需要"), "需要");
    }
}
