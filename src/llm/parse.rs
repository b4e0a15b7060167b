//! Untrusted model output handling.
//!
//! Model responses are free text that is *expected* to contain JSON. Nothing
//! here assumes shape: fences are stripped, the JSON fragment is located,
//! common LLM quirks are repaired, and the result is validated field by field
//! before a typed value comes out.

use crate::util::truncate;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// One `{unitName, explanation}` pair returned for a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedExplanation {
    pub unit_name: String,
    pub explanation: String,
}

/// A validated vibe-edit response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedVibeEdit {
    pub summary: Option<String>,
    pub updated_content: String,
}

/// Strip markdown code fences from a response
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if let Some(rest) = trimmed.strip_prefix("```") {
        // Drop the info string (```json, ```JSON, ```javascript...) up to the first newline
        match rest.find('\n') {
            Some(idx) if !rest[..idx].contains(['[', '{']) => &rest[idx + 1..],
            _ => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
        }
    } else {
        trimmed
    };
    let clean = clean.trim_end();
    let clean = clean.strip_suffix("```").unwrap_or(clean);
    clean.trim()
}

/// Extract a JSON fragment between matching delimiters
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

fn trailing_comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([\]}])").expect("trailing comma regex is valid"))
}

/// Try to fix common JSON issues from LLM responses
fn fix_json_issues(json: &str) -> String {
    // Remove trailing commas before ] or }, across whitespace and newlines
    let mut fixed = trailing_comma_re().replace_all(json, "$1").into_owned();

    // Smart quotes to regular quotes
    fixed = fixed.replace(['\u{201C}', '\u{201D}'], "\"");
    fixed = fixed.replace(['\u{2018}', '\u{2019}'], "'");

    fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r')
        .collect()
}

/// Locate and decode the first JSON value in a response.
fn parse_json_value(response: &str, prefer: char) -> Result<Value, String> {
    let clean = strip_markdown_fences(response);
    if let Ok(value) = serde_json::from_str::<Value>(clean) {
        return Ok(value);
    }

    let (open, close, other_open, other_close) = if prefer == '[' {
        ('[', ']', '{', '}')
    } else {
        ('{', '}', '[', ']')
    };
    let fragment = extract_json_fragment(clean, open, close)
        .or_else(|| extract_json_fragment(clean, other_open, other_close))
        .ok_or_else(|| format!("no JSON found in response: {}", truncate(clean, 120)))?;

    serde_json::from_str::<Value>(fragment)
        .or_else(|_| serde_json::from_str::<Value>(&fix_json_issues(fragment)))
        .map_err(|e| format!("{} (response preview: {})", e, truncate(fragment, 120)))
}

/// Parse a batch explanation response of shape `[{unitName, explanation}]`.
///
/// Fails closed: if any entry is missing either string field the whole
/// response is rejected, and the caller falls back for every unit.
pub fn parse_explanations(response: &str) -> Result<Vec<ParsedExplanation>, String> {
    let value = parse_json_value(response, '[')?;

    // JSON mode models sometimes wrap the array in an object
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => {
            match ["explanations", "results", "units", "functions"]
                .iter()
                .find_map(|key| obj.remove(*key))
            {
                Some(Value::Array(items)) => items,
                _ => return Err("expected a JSON array of explanations".to_string()),
            }
        }
        _ => return Err("expected a JSON array of explanations".to_string()),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let unit_name = item.get("unitName").and_then(Value::as_str);
            let explanation = item.get("explanation").and_then(Value::as_str);
            match (unit_name, explanation) {
                (Some(name), Some(text)) => Ok(ParsedExplanation {
                    unit_name: name.to_string(),
                    explanation: text.trim().to_string(),
                }),
                _ => Err(format!(
                    "entry {} is missing a string unitName or explanation",
                    i + 1
                )),
            }
        })
        .collect()
}

/// Parse a vibe-edit response of shape `{summary?, updatedContent}`.
pub fn parse_vibe_edit(response: &str) -> Result<ParsedVibeEdit, String> {
    let value = parse_json_value(response, '{')?;
    let obj = value
        .as_object()
        .ok_or_else(|| "expected a JSON object".to_string())?;

    let updated_content = match obj.get("updatedContent") {
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err("updatedContent is not a string".to_string()),
        None => return Err("updatedContent is missing".to_string()),
    };
    let summary = obj
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(ParsedVibeEdit {
        summary,
        updated_content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markdown_fences_variants() {
        assert_eq!(strip_markdown_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_markdown_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_markdown_fences("```[1]```"), "[1]");
        assert_eq!(strip_markdown_fences("  [1]  "), "[1]");
    }

    #[test]
    fn test_parse_explanations_fenced_array() {
        let response = "```json\n[{\"unitName\": \"add\", \"explanation\": \"Adds two numbers.\"}]\n```";
        let parsed = parse_explanations(response).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].unit_name, "add");
        assert_eq!(parsed[0].explanation, "Adds two numbers.");
    }

    #[test]
    fn test_parse_explanations_with_prose_and_trailing_comma() {
        let response = "Here you go:\n[{\"unitName\": \"a\", \"explanation\": \"x\"},]\nHope it helps";
        let parsed = parse_explanations(response).unwrap();
        assert_eq!(parsed[0].unit_name, "a");
    }

    #[test]
    fn test_parse_explanations_trailing_comma_across_newlines() {
        let response = "```json\n[\n  {\"unitName\": \"a\", \"explanation\": \"x\",\n  },\n  {\"unitName\": \"b\", \"explanation\": \"y\"},\n]\n```";
        let parsed = parse_explanations(response).unwrap();
        let names: Vec<_> = parsed.iter().map(|p| p.unit_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(parsed[1].explanation, "y");
    }

    #[test]
    fn test_parse_explanations_accepts_wrapped_object() {
        let response = r#"{"explanations": [{"unitName": "a", "explanation": "x"}]}"#;
        assert_eq!(parse_explanations(response).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_explanations_rejects_missing_field() {
        let response = r#"[{"unitName": "a", "explanation": "x"}, {"unitName": "b"}]"#;
        assert!(parse_explanations(response).is_err());
    }

    #[test]
    fn test_parse_explanations_rejects_non_string_field() {
        let response = r#"[{"unitName": "a", "explanation": 42}]"#;
        assert!(parse_explanations(response).is_err());
    }

    #[test]
    fn test_parse_explanations_rejects_garbage() {
        assert!(parse_explanations("I could not analyze this code.").is_err());
        assert!(parse_explanations(r#"{"note": "no array"}"#).is_err());
    }

    #[test]
    fn test_parse_vibe_edit_without_summary() {
        let parsed = parse_vibe_edit(r#"{"updatedContent": "x = 1"}"#).unwrap();
        assert_eq!(parsed.updated_content, "x = 1");
        assert!(parsed.summary.is_none());
    }

    #[test]
    fn test_parse_vibe_edit_fenced_with_summary() {
        let response = "```json\n{\"summary\": \"Renamed x\", \"updatedContent\": \"y = 1\\n\"}\n```";
        let parsed = parse_vibe_edit(response).unwrap();
        assert_eq!(parsed.summary.as_deref(), Some("Renamed x"));
        assert_eq!(parsed.updated_content, "y = 1\n");
    }

    #[test]
    fn test_parse_vibe_edit_missing_content() {
        assert!(parse_vibe_edit(r#"{"summary": "nothing"}"#).is_err());
        assert!(parse_vibe_edit(r#"{"updatedContent": 3}"#).is_err());
        assert!(parse_vibe_edit("not json").is_err());
    }
}
