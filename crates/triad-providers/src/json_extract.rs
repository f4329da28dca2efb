//! §9 design note — "JSON extraction with fallbacks". Tactical-planner and
//! venue-scorer stages ask a provider to return JSON but, since none of
//! these vendors reliably honor a strict JSON-only mode end to end, the
//! response text may still arrive wrapped in prose or a fenced code block.
//! Three ordered strategies, first one that parses wins.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    Direct,
    FencedBlock,
    BalancedBraces,
}

#[derive(Debug)]
pub struct ExtractedJson {
    pub value: Value,
    pub strategy: ExtractionStrategy,
}

/// Try, in order: the whole string as JSON, a fenced ```json block, then
/// the first balanced `{...}` span. Returns `None` if nothing parses.
pub fn extract_json(text: &str) -> Option<ExtractedJson> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Some(ExtractedJson { value, strategy: ExtractionStrategy::Direct });
    }
    if let Some(fenced) = extract_fenced_block(text) {
        if let Ok(value) = serde_json::from_str::<Value>(fenced.trim()) {
            return Some(ExtractedJson { value, strategy: ExtractionStrategy::FencedBlock });
        }
    }
    if let Some(braces) = extract_balanced_braces(text) {
        if let Ok(value) = serde_json::from_str::<Value>(&braces) {
            return Some(ExtractedJson { value, strategy: ExtractionStrategy::BalancedBraces });
        }
    }
    None
}

fn extract_fenced_block(text: &str) -> Option<&str> {
    let fence_start = text.find("```")?;
    let after_fence = &text[fence_start + 3..];
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let fence_end = body.find("```")?;
    Some(&body[..fence_end])
}

/// First top-level balanced `{...}` span, tolerant of braces inside string
/// literals so a stray `}` in a quoted value doesn't truncate early.
fn extract_balanced_braces(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_parse_succeeds_on_clean_json() {
        let extracted = extract_json(r#"{"key": "value"}"#).unwrap();
        assert_eq!(extracted.strategy, ExtractionStrategy::Direct);
        assert_eq!(extracted.value["key"], "value");
    }

    #[test]
    fn fenced_block_is_extracted_when_wrapped_in_prose() {
        let text = "Here is the result:\n```json\n{\"a\": 1}\n```\nLet me know if you need more.";
        let extracted = extract_json(text).unwrap();
        assert_eq!(extracted.strategy, ExtractionStrategy::FencedBlock);
        assert_eq!(extracted.value["a"], 1);
    }

    #[test]
    fn balanced_braces_recovered_without_fences() {
        let text = "Sure, the venue list is {\"venues\": [\"a\", \"b\"]} as requested.";
        let extracted = extract_json(text).unwrap();
        assert_eq!(extracted.strategy, ExtractionStrategy::BalancedBraces);
        assert_eq!(extracted.value["venues"][1], "b");
    }

    #[test]
    fn braces_inside_string_values_do_not_truncate_the_span() {
        let text = r#"{"note": "use a } here"}"#;
        let extracted = extract_json(text).unwrap();
        assert_eq!(extracted.value["note"], "use a } here");
    }

    #[test]
    fn unparseable_text_yields_none() {
        assert!(extract_json("not json at all").is_none());
    }
}
