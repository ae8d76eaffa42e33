//! Small helpers shared across transports.
//!
//! Grounded on `examples/block-goose/crates/goose/src/providers/utils.rs`'s
//! `sanitize_function_name`, generalized per SPEC_FULL.md §10 into a shared
//! utility every transport applies defensively rather than a Mistral-only
//! rule, plus the `data:`/`[DONE]` SSE line handling spec.md §4.3 describes.

use serde_json::Value;

/// Keeps only `[A-Za-z0-9_.-]`, matching the strictest vendor constraint
/// (Mistral) so the same sanitized name is safe to send anywhere.
pub fn sanitize_function_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        "tool".to_string()
    } else {
        cleaned
    }
}

/// Strips a line down to the JSON payload of an SSE `data:` line, or `None`
/// for blank lines, comments, or the `[DONE]` terminator (spec §4.3).
pub fn sse_data_payload(line: &str) -> Option<&str> {
    let line = line.trim_end_matches('\r');
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        None
    } else {
        Some(data)
    }
}

/// Extracts display text from a `delta.content`-shaped field that may be a
/// plain string, an array of `{type, text}` blocks, or absent (spec §4.2,
/// §4.3 "polymorphic content shape").
pub fn extract_text_content(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| {
                part.get("text")
                    .or_else(|| part.get("content"))
                    .and_then(Value::as_str)
            })
            .collect::<Vec<_>>()
            .join(""),
        Some(Value::Object(map)) => map
            .get("text")
            .or_else(|| map.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Some(_) => String::new(),
    }
}

/// True when a piece of streamed text is empty or whitespace-only and should
/// be dropped rather than forwarded to the sink (spec §4.3, §7).
pub fn is_blank_delta(text: &str) -> bool {
    text.is_empty() || text.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_strips_disallowed_characters() {
        assert_eq!(sanitize_function_name("search files!"), "searchfiles");
        assert_eq!(sanitize_function_name("get-weather_v2.0"), "get-weather_v2.0");
    }

    #[test]
    fn sanitize_keeps_suffix_after_hallucinated_json_prefix() {
        let name = r#"{"action":"search"}lookup_file"#;
        let sanitized = sanitize_function_name(name);
        assert!(sanitized.ends_with("lookup_file"));
    }

    #[test]
    fn sanitize_never_returns_empty() {
        assert_eq!(sanitize_function_name("!!!"), "tool");
    }

    #[test]
    fn sse_data_payload_skips_done_and_blank() {
        assert_eq!(sse_data_payload("data: [DONE]"), None);
        assert_eq!(sse_data_payload("data:"), None);
        assert_eq!(sse_data_payload(""), None);
        assert_eq!(sse_data_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
    }

    #[test]
    fn extract_text_content_handles_string_and_array() {
        assert_eq!(extract_text_content(Some(&json!("hi"))), "hi");
        assert_eq!(
            extract_text_content(Some(&json!([{"type": "text", "text": "he"}, {"type": "text", "text": "llo"}]))),
            "hello"
        );
        assert_eq!(extract_text_content(None), "");
    }

    #[test]
    fn is_blank_delta_detects_whitespace_only() {
        assert!(is_blank_delta(""));
        assert!(is_blank_delta("   \n"));
        assert!(!is_blank_delta(" hi "));
    }
}
