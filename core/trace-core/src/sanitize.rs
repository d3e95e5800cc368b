//! Size caps for tool input and output before they leave the process.
//!
//! These bound what reaches the backend and the local store. They do not scrub
//! secrets: a short API key in a `command` argument passes through untouched.

use serde_json::{Map, Value};

/// Cap for individual input fields and for allow-listed fields.
pub const FIELD_LIMIT: usize = 500;
/// Cap for file `content` in tool input.
pub const CONTENT_LIMIT: usize = 200;
/// Cap for a whole string (or non-object) tool output.
pub const OUTPUT_LIMIT: usize = 1000;
/// Cap for captured prompt text.
pub const PROMPT_LIMIT: usize = 2000;

/// Fields kept verbatim (truncated) because they make a trace readable.
const KEPT_FIELDS: &[&str] = &["command", "file_path", "path", "pattern", "query", "url"];

/// First `max` characters of `s`, never splitting a character.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn size_marker(len: usize) -> Value {
    Value::String(format!("[{} chars]", len))
}

/// Plain-text rendering: strings as-is, everything else as compact JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn sanitize_input(input: &Value) -> Value {
    let Value::Object(fields) = input else {
        let raw = render(input);
        let mut wrapped = Map::new();
        let raw = truncate_chars(&raw, FIELD_LIMIT).to_string();
        wrapped.insert("raw".to_string(), Value::String(raw));
        return Value::Object(wrapped);
    };

    let safe = fields
        .iter()
        .map(|(key, value)| (key.clone(), sanitize_input_field(key, value)))
        .collect();
    Value::Object(safe)
}

fn sanitize_input_field(key: &str, value: &Value) -> Value {
    if KEPT_FIELDS.contains(&key) {
        if is_empty(value) {
            return Value::Null;
        }
        return Value::String(truncate_chars(&render(value), FIELD_LIMIT).to_string());
    }

    if key == "content" {
        let len = if is_empty(value) { 0 } else { char_len(&render(value)) };
        return if len > CONTENT_LIMIT {
            size_marker(len)
        } else {
            value.clone()
        };
    }

    cap_field(value)
}

/// Strings and nested structures over [`FIELD_LIMIT`] become size markers.
fn cap_field(value: &Value) -> Value {
    match value {
        Value::String(s) if char_len(s) > FIELD_LIMIT => size_marker(char_len(s)),
        Value::Object(_) | Value::Array(_) => {
            let len = char_len(&value.to_string());
            if len > FIELD_LIMIT {
                Value::String(format!("[{} chars JSON]", len))
            } else {
                value.clone()
            }
        }
        _ => value.clone(),
    }
}

pub fn sanitize_output(output: &Value) -> Value {
    match output {
        Value::Null => Value::Null,
        Value::String(s) => {
            let len = char_len(s);
            if len > OUTPUT_LIMIT {
                size_marker(len)
            } else {
                output.clone()
            }
        }
        Value::Object(fields) => {
            let safe = fields
                .iter()
                .map(|(key, value)| (key.clone(), cap_field(value)))
                .collect();
            Value::Object(safe)
        }
        other => {
            let len = char_len(&other.to_string());
            if len > OUTPUT_LIMIT {
                size_marker(len)
            } else {
                other.clone()
            }
        }
    }
}

/// Falsy in the loose sense hook payloads use: null, false, zero, or an empty container.
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
