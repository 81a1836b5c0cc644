//! Response sanitization (§4.2): triage replies must never leak the
//! provider's raw JSON envelope or chain-of-thought/reasoning segments to the
//! player.

const REASONING_SUFFIX_MARKER: &str = "</redacted_reasoning>";

/// Extracts the innermost `text` field if `raw` is (or contains) valid JSON,
/// otherwise strips a trailing `</redacted_reasoning>...` suffix, otherwise
/// returns `raw` unchanged.
pub fn sanitize_reply_text(raw: &str) -> String {
    let trimmed = raw.trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(text) = find_text_field(&value) {
            return text;
        }
    }

    if let Some(idx) = trimmed.find(REASONING_SUFFIX_MARKER) {
        return trimmed[..idx].trim().to_string();
    }

    trimmed.to_string()
}

fn find_text_field(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => {
            if let Some(text) = map.get("text") {
                return find_text_field(text);
            }
            map.values().find_map(find_text_field)
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_text_field),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_plain_text() {
        assert_eq!(sanitize_reply_text("hi, how can I help?"), "hi, how can I help?");
    }

    #[test]
    fn extracts_nested_text_field() {
        let raw = r#"{"choices":[{"message":{"text":"refund processed"}}]}"#;
        assert_eq!(sanitize_reply_text(raw), "refund processed");
    }

    #[test]
    fn strips_reasoning_suffix() {
        let raw = "please wait a moment</redacted_reasoning>the user seems upset, I should...";
        assert_eq!(sanitize_reply_text(raw), "please wait a moment");
    }
}
