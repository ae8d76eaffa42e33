//! The resilient JSON-from-prose extractor (spec §4.4).
//!
//! Grounded on `examples/block-goose/crates/goose/src/agents/planner.rs`'s
//! `extract_json` (fence-stripping, then brace-matching fallback) and
//! `orchestrator_agent.rs`'s analogous helper, generalized with an added
//! XML-tag-stripping step and generic deserialization. Pure, no I/O — a
//! capability the orchestrator (out of scope) calls, not a method on any
//! client.

use serde::de::DeserializeOwned;

use crate::error::ParseError;

/// Strategies applied in order until one parses, matching spec §4.4 exactly:
/// 1. strip a markdown code fence, 2. strip one outermost XML-like tag,
/// 3. direct parse, 4. brace-matching for objects, 5. bracket-matching for
/// arrays.
pub fn parse_json<T: DeserializeOwned>(input: &str) -> Result<T, ParseError> {
    let cleaned = clean(input);

    if let Ok(value) = serde_json::from_str::<T>(&cleaned) {
        return Ok(value);
    }

    if let Some(object_slice) = extract_object_slice(&cleaned) {
        if let Ok(value) = serde_json::from_str::<T>(object_slice) {
            return Ok(value);
        }
    }

    if let Some(array_slice) = extract_array_slice(&cleaned) {
        if let Ok(value) = serde_json::from_str::<T>(array_slice) {
            return Ok(value);
        }
    }

    Err(ParseError::new("could not locate valid JSON in input", input))
}

/// Runs just the fence/tag-stripping steps without attempting to parse —
/// exposed because it is idempotent (spec §8) and useful on its own when a
/// caller wants the cleaned text rather than a typed value.
pub fn clean(input: &str) -> String {
    let trimmed = input.trim();
    let defenced = strip_code_fence(trimmed);
    strip_outer_xml_tag(defenced.trim()).to_string()
}

fn strip_code_fence(s: &str) -> &str {
    let Some(after_open) = s.strip_prefix("```") else {
        return s;
    };
    // Skip an optional language tag (e.g. "json") up to the first newline.
    let after_lang = match after_open.find('\n') {
        Some(idx) => &after_open[idx + 1..],
        None => after_open,
    };
    let trimmed_end = after_lang.trim_end();
    trimmed_end.strip_suffix("```").unwrap_or(trimmed_end)
}

/// Strips a single outermost XML-like tag (`<tag attr="x">…</tag>`),
/// preserving any nested tags untouched. Only applies when the *entire*
/// residue is wrapped by one such tag pair.
fn strip_outer_xml_tag(s: &str) -> &str {
    if !s.starts_with('<') {
        return s;
    }
    let Some(open_end) = s.find('>') else {
        return s;
    };
    let open_tag = &s[1..open_end];
    let tag_name = open_tag.split_whitespace().next().unwrap_or(open_tag);
    if tag_name.is_empty() || tag_name.starts_with('/') {
        return s;
    }
    let closing = format!("</{tag_name}>");
    let Some(close_start) = s.rfind(&closing) else {
        return s;
    };
    if close_start <= open_end {
        return s;
    }
    let inner = &s[open_end + 1..close_start];
    // Only strip when this really is the outermost wrapper, i.e. the
    // residue outside the tag pair is empty.
    let trailing = &s[close_start + closing.len()..];
    if trailing.trim().is_empty() {
        inner.trim()
    } else {
        s
    }
}

fn extract_object_slice(s: &str) -> Option<&str> {
    extract_balanced_slice(s, '{', '}')
}

fn extract_array_slice(s: &str) -> Option<&str> {
    extract_balanced_slice(s, '[', ']')
}

fn extract_balanced_slice(s: &str, open: char, close: char) -> Option<&str> {
    let start = s.find(open)?;
    let mut depth: i32 = 0;
    let mut end_byte = None;
    for (offset, c) in s[start..].char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                end_byte = Some(start + offset + c.len_utf8());
                break;
            }
        }
    }
    let end = end_byte?;
    s.get(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn parses_plain_json() {
        let v: Value = parse_json(r#"{"ok":true}"#).unwrap();
        assert_eq!(v, serde_json::json!({"ok": true}));
    }

    #[test]
    fn strips_json_fence() {
        let v: Value = parse_json("```json\n{\"ok\":true}\n```").unwrap();
        assert_eq!(v, serde_json::json!({"ok": true}));
    }

    #[test]
    fn strips_plain_fence() {
        let v: Value = parse_json("```\n{\"ok\":true}\n```").unwrap();
        assert_eq!(v, serde_json::json!({"ok": true}));
    }

    #[test]
    fn strips_outer_xml_tag_preserving_nested() {
        let v: Value = parse_json(r#"<result>{"ok":true}</result>"#).unwrap();
        assert_eq!(v, serde_json::json!({"ok": true}));
    }

    #[test]
    fn scenario_fence_then_xml_tag() {
        // Fenced code block wrapping an XML-tagged JSON payload.
        let input = "```json\n<result>{\"ok\":true}</result>\n```";
        let v: Value = parse_json(input).unwrap();
        assert_eq!(v, serde_json::json!({"ok": true}));
    }

    #[test]
    fn finds_object_amid_prose() {
        let input = "Sure, here you go: {\"a\":1,\"b\":[1,2,3]} hope that helps!";
        let v: Value = parse_json(input).unwrap();
        assert_eq!(v, serde_json::json!({"a": 1, "b": [1, 2, 3]}));
    }

    #[test]
    fn finds_array_amid_prose() {
        let input = "the steps are: [1, 2, 3] done.";
        let v: Value = parse_json(input).unwrap();
        assert_eq!(v, serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn nested_tags_are_preserved() {
        let input = "<result><item>1</item><item>2</item></result>";
        let cleaned = clean(input);
        assert_eq!(cleaned, "<item>1</item><item>2</item>");
    }

    #[test]
    fn fails_gracefully_on_garbage() {
        let err = parse_json::<Value>("not json at all, sorry").unwrap_err();
        assert!(err.message.contains("could not locate"));
        assert!(err.truncated_input.len() <= "not json at all, sorry".len());
    }

    #[test]
    fn error_echo_is_truncated() {
        let long_garbage = "x".repeat(1000);
        let err = parse_json::<Value>(&long_garbage).unwrap_err();
        assert!(err.truncated_input.len() < 250);
    }

    #[test]
    fn clean_is_idempotent() {
        let input = "```json\n<result>{\"ok\":true}</result>\n```";
        let once = clean(input);
        let twice = clean(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn clean_is_idempotent_on_plain_input() {
        let input = r#"{"a": 1}"#;
        assert_eq!(clean(input), clean(&clean(input)));
    }
}
