//! Extracting structured data from raw model output.
//!
//! Models wrap JSON in prose, code fences, or both. The scan here finds the
//! first balanced object/array (string-aware, so braces inside string values
//! don't confuse it) and hands the span to serde.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no JSON found in model output")]
    NoJson,

    #[error("invalid JSON: {0}")]
    Json(String),
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("valid fence regex"))
}

/// Content of the first code fence, or the input unchanged.
pub fn strip_code_fences(raw: &str) -> &str {
    fence_re()
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw)
}

/// First balanced `{...}` span, ignoring braces inside JSON strings.
pub fn extract_object(raw: &str) -> Option<&str> {
    balanced_span(strip_code_fences(raw), '{', '}')
}

/// First balanced `[...]` span, ignoring brackets inside JSON strings.
pub fn extract_array(raw: &str) -> Option<&str> {
    balanced_span(strip_code_fences(raw), '[', ']')
}

pub fn parse_object<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    let span = extract_object(raw).ok_or(ParseError::NoJson)?;
    serde_json::from_str(span).map_err(|e| ParseError::Json(e.to_string()))
}

pub fn parse_array<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>, ParseError> {
    let span = extract_array(raw).ok_or(ParseError::NoJson)?;
    serde_json::from_str(span).map_err(|e| ParseError::Json(e.to_string()))
}

fn balanced_span(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in raw[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
