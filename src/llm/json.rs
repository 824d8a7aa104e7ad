use serde::de::DeserializeOwned;

use super::LlmError;

/// Locate the JSON payload in a model response.
///
/// Fenced blocks win: the first one tagged `json`, otherwise the first
/// untagged fence whose body is an object or array. Without a usable fence the
/// first balanced `{ ... }` object in the text is taken.
pub fn extract_json_block(response: &str) -> Result<&str, LlmError> {
    let fences = fenced_blocks(response);
    let tagged = fences
        .iter()
        .find(|(tag, _)| tag.eq_ignore_ascii_case("json"))
        .map(|(_, body)| *body);
    let untagged = || {
        fences
            .iter()
            .find(|(tag, body)| tag.is_empty() && body.starts_with(['{', '[']))
            .map(|(_, body)| *body)
    };

    tagged
        .or_else(untagged)
        .or_else(|| balanced_object(response))
        .ok_or_else(|| LlmError::JsonParsing("No JSON block found in LLM response".to_string()))
}

/// Extract and deserialize the JSON payload of a response.
pub fn parse_json_block<T: DeserializeOwned>(response: &str) -> Result<T, LlmError> {
    let block = extract_json_block(response)?;
    serde_json::from_str(block).map_err(|e| LlmError::JsonParsing(e.to_string()))
}

/// Closed ``` fences as `(info tag, trimmed body)` pairs. An unclosed
/// trailing fence is ignored.
fn fenced_blocks(text: &str) -> Vec<(&str, &str)> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let Some(close) = after.find("```") else {
            break;
        };
        let inner = &after[..close];
        // The info tag runs to the first newline; one-line fences have none.
        let (tag, body) = match inner.split_once('\n') {
            Some((tag, body)) if !tag.trim().starts_with(['{', '[']) => (tag.trim(), body),
            _ => ("", inner),
        };
        blocks.push((tag, body.trim()));
        rest = &after[close + 3..];
    }
    blocks
}

/// First `{` through its matching `}`, skipping braces inside strings.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
