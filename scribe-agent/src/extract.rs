//! JSON extraction from model text.
//!
//! Models asked for JSON still wrap it in Markdown fences or surround it
//! with prose. Extraction tries, in order: the whole text, the body of the
//! first fenced block, the first balanced `{...}` span.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Extraction failure, carrying the parser message and a text excerpt.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unparseable JSON ({message}): {excerpt}")]
pub struct ExtractError {
    pub message: String,
    pub excerpt: String,
}

const EXCERPT_CHARS: usize = 200;

fn fence_pattern() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").ok())
        .as_ref()
}

/// Parse model output into JSON.
pub fn extract_json(text: &str) -> Result<Value, ExtractError> {
    let trimmed = text.trim();

    let first_err = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if let Some(body) = fence_pattern()
        .and_then(|re| re.captures(trimmed))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
    {
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            return Ok(value);
        }
    }

    if let Some(span) = first_balanced_object(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(span) {
            return Ok(value);
        }
    }

    Err(ExtractError {
        message: first_err.to_string(),
        excerpt: trimmed.chars().take(EXCERPT_CHARS).collect(),
    })
}

/// Find the first `{...}` span whose braces balance, ignoring braces that
/// appear inside JSON string literals.
pub fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
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
                    return Some(&text[start..start + offset + 1]);
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
    use serde_json::json;

    #[test]
    fn test_plain_json() {
        assert_eq!(extract_json(" {\"a\": 1} ").unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_fenced_json() {
        let text = "Here you go:\n```json\n{\"title\": \"Catan\"}\n```\nEnjoy!";
        assert_eq!(extract_json(text).unwrap(), json!({"title": "Catan"}));
    }

    #[test]
    fn test_bare_fence() {
        let text = "```\n{\"x\": [1, 2]}\n```";
        assert_eq!(extract_json(text).unwrap(), json!({"x": [1, 2]}));
    }

    #[test]
    fn test_prose_wrapped_object() {
        let text = "Sure! {\"summary\": \"uses {braces} in text\", \"n\": {\"m\": 2}} Anything else?";
        assert_eq!(
            extract_json(text).unwrap(),
            json!({"summary": "uses {braces} in text", "n": {"m": 2}})
        );
    }

    #[test]
    fn test_first_object_wins() {
        let text = "{\"a\": 1} and then {\"b\": 2}";
        assert_eq!(extract_json(text).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let span = first_balanced_object(r#"x {"q": "say \"}\" now"} y"#).unwrap();
        assert_eq!(span, r#"{"q": "say \"}\" now"}"#);
    }

    #[test]
    fn test_unparseable() {
        let err = extract_json("no json here { broken").unwrap_err();
        assert!(err.excerpt.starts_with("no json here"));
    }
}
