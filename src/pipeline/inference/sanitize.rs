//! Cleanup of raw backend output before JSON parsing.

use std::sync::LazyLock;

use regex::Regex;

static THINK_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));

static UNUSED_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<unused\d+>").expect("valid regex"));

/// Strip model artifacts from raw output:
/// `<think>...</think>` reasoning blocks, Gemma-style `<unusedN>thought` prefixes
/// and stray `<unusedN>` tokens.
pub fn sanitize_llm_output(raw: &str) -> String {
    let mut text = THINK_BLOCK_RE.replace_all(raw, "").to_string();

    if let Some(idx) = text.find("<unused") {
        if let Some(thought_offset) = text[idx..].find("thought\n") {
            text = text[idx + thought_offset + 8..].to_string();
        }
    }

    text = UNUSED_TOKEN_RE.replace_all(&text, "").to_string();
    text.trim().to_string()
}

/// Pull the JSON object out of a response that may be fenced or
/// surrounded by chatter. `None` when no object is present.
pub fn extract_json_block(response: &str) -> Option<&str> {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```json") {
        let after_fence = &trimmed[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return Some(after_fence[..end].trim());
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        if let Some(end) = after_fence.find("```") {
            let block = after_fence[..end].trim();
            if block.starts_with('{') {
                return Some(block);
            }
        }
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&trimmed[start..=end]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_think_block() {
        let raw = "<think>the date is probably 2022</think>\n{\"evidence\": []}";
        assert_eq!(sanitize_llm_output(raw), "{\"evidence\": []}");
    }

    #[test]
    fn strips_unused_thinking_prefix() {
        let raw = "<unused94>thought\nreasoning here\n{\"evidence\": []}";
        assert_eq!(sanitize_llm_output(raw), "reasoning here\n{\"evidence\": []}");
    }

    #[test]
    fn strips_stray_tokens() {
        assert_eq!(sanitize_llm_output("a <unused3>b"), "a b");
    }

    #[test]
    fn json_from_fence() {
        let raw = "Here you go:\n```json\n{\"evidence\": []}\n```\nDone.";
        assert_eq!(extract_json_block(raw), Some("{\"evidence\": []}"));
    }

    #[test]
    fn json_from_plain_fence() {
        let raw = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json_block(raw), Some("{\"a\": 1}"));
    }

    #[test]
    fn json_from_chatter() {
        let raw = "Sure! {\"evidence\": [{\"quote\": \"x\"}]} hope that helps";
        assert_eq!(extract_json_block(raw), Some("{\"evidence\": [{\"quote\": \"x\"}]}"));
    }

    #[test]
    fn no_json() {
        assert_eq!(extract_json_block("I could not find anything."), None);
        assert_eq!(extract_json_block("} backwards {"), None);
    }
}
