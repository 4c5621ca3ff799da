//! Scraping tool calls out of free-form model text
//!
//! Models that do not use native tool calling are asked to answer with
//! `{"name": ..., "arguments": {...}}` objects, either as one JSON array or as
//! objects scattered through prose. Two strategies are tried in order:
//!
//! 1. the whole (trimmed) text parsed as one JSON value
//! 2. a left-to-right scan for brace-balanced `{...}` spans, each parsed on its own
//!
//! Anything that does not parse, or parses without a `name` and an
//! `arguments`/`parameters` key, is silently dropped.

use serde_json::{Map, Value};

/// A tool call recovered from text. It has no correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Extract tool calls from `text`, in textual order. An empty result means
/// the model asked for nothing.
pub fn extract_tool_calls(text: &str) -> Vec<ExtractedToolCall> {
    let whole = parse_whole(text.trim());
    if !whole.is_empty() {
        return whole;
    }
    scan_objects(text)
}

fn parse_whole(text: &str) -> Vec<ExtractedToolCall> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => to_call(map),
                _ => None,
            })
            .collect(),
        Ok(Value::Object(map)) => to_call(map).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn scan_objects(text: &str) -> Vec<ExtractedToolCall> {
    let bytes = text.as_bytes();
    let mut calls = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] != b'{' {
            pos += 1;
            continue;
        }
        match balanced_end(bytes, pos) {
            Some(end) => {
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&text[pos..=end]) {
                    calls.extend(to_call(map));
                }
                pos = end + 1;
            }
            // Never closes: step past this brace so nested objects still get a chance.
            None => pos += 1,
        }
    }

    calls
}

/// Index of the `}` matching the `{` at `start`. Braces inside double-quoted
/// strings are ignored, and a backslash escapes the next byte only inside a string.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
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
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn to_call(mut map: Map<String, Value>) -> Option<ExtractedToolCall> {
    let name = match map.get("name") {
        Some(Value::String(name)) => name.clone(),
        _ => return None,
    };
    let arguments = map
        .remove("arguments")
        .or_else(|| map.remove("parameters"))?;
    Some(ExtractedToolCall { name, arguments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(calls: &[ExtractedToolCall]) -> Vec<&str> {
        calls.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_array_normalizes_parameters() {
        let text = r#"[
            {"name": "write_file", "arguments": {"path": "./a.txt", "content": "x"}},
            {"name": "read_file", "parameters": {"path": "./a.txt"}},
            {"name": "list_directory", "arguments": {}}
        ]"#;
        let calls = extract_tool_calls(text);
        assert_eq!(names(&calls), vec!["write_file", "read_file", "list_directory"]);
        assert_eq!(calls[1].arguments, json!({"path": "./a.txt"}));
        assert_eq!(calls[2].arguments, json!({}));
    }

    #[test]
    fn test_array_drops_invalid_elements() {
        let text = r#"[{"name": "a", "arguments": {}}, 42, {"name": "b"}, {"arguments": {}}, {"name": 7, "arguments": {}}]"#;
        assert_eq!(names(&extract_tool_calls(text)), vec!["a"]);
    }

    #[test]
    fn test_single_object() {
        let calls = extract_tool_calls(r#"  {"name": "read_file", "arguments": {"path": "x"}}  "#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["path"], "x");
    }

    #[test]
    fn test_arguments_preferred_over_parameters() {
        let calls =
            extract_tool_calls(r#"{"name": "t", "arguments": {"a": 1}, "parameters": {"b": 2}}"#);
        assert_eq!(calls[0].arguments, json!({"a": 1}));
    }

    #[test]
    fn test_newline_separated_objects_in_order() {
        let text = "{\"name\": \"write_file\", \"arguments\": {\"path\": \"./a.txt\", \"content\": \"x\"}}\n{\"name\": \"write_file\", \"arguments\": {\"path\": \"./b.txt\", \"content\": \"y\"}}";
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments["path"], "./a.txt");
        assert_eq!(calls[1].arguments["path"], "./b.txt");
    }

    #[test]
    fn test_braces_inside_strings() {
        let text = r#"Sure, writing it now:
{"name": "write_file", "arguments": {"path": "main.rs", "content": "fn main() { println!(\"}{\"); }"}}
Let me know if you need more."#;
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].arguments["content"],
            "fn main() { println!(\"}{\"); }"
        );
    }

    #[test]
    fn test_escaped_backslash_before_quote() {
        let text = r#"x {"name": "write_file", "arguments": {"path": "a", "content": "C:\\dir\\"}} y"#;
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["content"], "C:\\dir\\");
    }

    #[test]
    fn test_prose_yields_nothing() {
        assert!(extract_tool_calls("All done. The file has been created.").is_empty());
        assert!(extract_tool_calls("").is_empty());
    }

    #[test]
    fn test_non_call_objects_skipped() {
        let text = r#"Config is {"debug": true}. Then {"name": "run", "arguments": {"cmd": "ls"}}"#;
        assert_eq!(names(&extract_tool_calls(text)), vec!["run"]);
    }

    #[test]
    fn test_malformed_candidate_skipped() {
        let text = r#"{"name": "broken", "arguments": {,}} and {"name": "ok", "arguments": {}}"#;
        assert_eq!(names(&extract_tool_calls(text)), vec!["ok"]);
    }

    #[test]
    fn test_unclosed_brace_does_not_hide_later_calls() {
        let text = r#"{ oops {"name": "ok", "arguments": {"n": 1}}"#;
        assert_eq!(names(&extract_tool_calls(text)), vec!["ok"]);
    }

    #[test]
    fn test_whole_text_non_call_falls_through_to_scan() {
        // Valid JSON, but not a call; nested call objects are not searched
        // because the outer span is consumed as one candidate.
        let text = r#"{"plan": "x"}"#;
        assert!(extract_tool_calls(text).is_empty());
    }

    #[test]
    fn test_multibyte_text_around_objects() {
        let text = "Voilà ✓ {\"name\": \"write_file\", \"arguments\": {\"path\": \"é.txt\", \"content\": \"ü\"}} ✓";
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["path"], "é.txt");
    }
}
