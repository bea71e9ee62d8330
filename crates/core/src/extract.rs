//! Structured Output Extraction
//!
//! Recovers exactly one JSON object from free-form model output. Models wrap
//! their answers in commentary, markdown fences, or get cut off mid-object;
//! this module either returns the object plus the text it discarded, or a
//! typed error whose category the pipeline uses to decide what to do next.
//!
//! Extraction order:
//! 1. A fenced code block (```` ``` ```` or ```` ```json ````): the object is
//!    searched inside the fence, everything outside is stripped commentary.
//! 2. Otherwise a brace-depth scan from the first `{`, ignoring braces inside
//!    string literals and honouring backslash escapes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

const FENCE: &str = "```";

/// A JSON object recovered from model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedJson {
    /// The extracted object
    pub value: Map<String, Value>,
    /// Text before and after the object, concatenated. `None` when the object
    /// (plus surrounding whitespace) was the whole input.
    pub stripped_text: Option<String>,
}

impl ExtractedJson {
    /// Borrow a string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    /// Deserialize the object into a typed payload.
    ///
    /// Shape mismatches are reported as schema violations.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T, ExtractError> {
        serde_json::from_value(Value::Object(self.value)).map_err(|e| {
            ExtractError::SchemaViolation {
                reason: e.to_string(),
                missing_key: None,
            }
        })
    }
}

/// Failure category reported by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractErrorKind {
    EmptyResponse,
    InvalidFormat,
    SchemaViolation,
    TruncatedOutput,
}

impl std::fmt::Display for ExtractErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractErrorKind::EmptyResponse => write!(f, "empty_response"),
            ExtractErrorKind::InvalidFormat => write!(f, "invalid_format"),
            ExtractErrorKind::SchemaViolation => write!(f, "schema_violation"),
            ExtractErrorKind::TruncatedOutput => write!(f, "truncated_output"),
        }
    }
}

/// Errors produced while extracting a JSON object.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// Input was empty or whitespace only
    #[error("Empty response")]
    Empty,

    /// No object could be located or the candidate did not parse
    #[error("Invalid format: {reason}")]
    InvalidFormat { reason: String },

    /// The value parsed but is not the expected shape
    #[error("Schema violation: {reason}")]
    SchemaViolation {
        reason: String,
        missing_key: Option<String>,
    },

    /// The object was still open when the input ended
    #[error("Truncated output: object still open at position {position} of {length}")]
    Truncated { position: usize, length: usize },
}

impl ExtractError {
    /// The failure category.
    pub fn kind(&self) -> ExtractErrorKind {
        match self {
            ExtractError::Empty => ExtractErrorKind::EmptyResponse,
            ExtractError::InvalidFormat { .. } => ExtractErrorKind::InvalidFormat,
            ExtractError::SchemaViolation { .. } => ExtractErrorKind::SchemaViolation,
            ExtractError::Truncated { .. } => ExtractErrorKind::TruncatedOutput,
        }
    }

    fn missing_key(key: &str) -> Self {
        ExtractError::SchemaViolation {
            reason: format!("missing required key '{}'", key),
            missing_key: Some(key.to_string()),
        }
    }
}

/// Byte range of a candidate object inside its containing text.
struct Span {
    start: usize,
    end: usize,
}

/// Extract a single JSON object from `text`.
pub fn extract_json(text: &str) -> Result<ExtractedJson, ExtractError> {
    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }

    if let Some(fenced) = extract_fenced(text) {
        return fenced;
    }

    let span = scan_object(text)?;
    let value = parse_object(&text[span.start..span.end], span.start)?;
    Ok(ExtractedJson {
        value,
        stripped_text: join_stripped(&[&text[..span.start], &text[span.end..]]),
    })
}

/// Extract a JSON object and check that every key in `required` is present.
pub fn extract_json_with_keys(
    text: &str,
    required: &[&str],
) -> Result<ExtractedJson, ExtractError> {
    let extracted = extract_json(text)?;
    if let Some(key) = required.iter().find(|k| !extracted.value.contains_key(**k)) {
        return Err(ExtractError::missing_key(key));
    }
    Ok(extracted)
}

/// Try the fenced-block path. Returns `None` when there is no fence or the
/// fence holds no object, so the caller can fall back to a plain scan.
fn extract_fenced(text: &str) -> Option<Result<ExtractedJson, ExtractError>> {
    let open = text.find(FENCE)?;
    let after_open = open + FENCE.len();

    // Skip an optional language tag on the opening line (```json, ```JSON, ...)
    let rest = &text[after_open..];
    let body_start = match rest.find('\n') {
        Some(nl) if !rest[..nl].contains('{') && !rest[..nl].contains('[') => after_open + nl + 1,
        _ => after_open,
    };

    let (body_end, outer_tail) = match text[body_start..].find(FENCE) {
        Some(close) => (body_start + close, body_start + close + FENCE.len()),
        // Unterminated fence: the model was cut off, the body runs to the end
        None => (text.len(), text.len()),
    };
    let body = &text[body_start..body_end];
    let trimmed = body.trim_start();

    if trimmed.starts_with('[') {
        return Some(match serde_json::from_str::<Value>(body.trim()) {
            Ok(_) => Err(ExtractError::SchemaViolation {
                reason: "expected a JSON object, found an array".to_string(),
                missing_key: None,
            }),
            Err(e) => Err(classify_parse_error(e, body_start, text.len())),
        });
    }

    if !body.contains('{') {
        return None;
    }

    Some(scan_object(body).and_then(|span| {
        let value = parse_object(&body[span.start..span.end], body_start + span.start)?;
        Ok(ExtractedJson {
            value,
            stripped_text: join_stripped(&[
                &text[..open],
                &body[..span.start],
                &body[span.end..],
                &text[outer_tail..],
            ]),
        })
    }))
}

/// Locate the first balanced `{ ... }` in `text`.
fn scan_object(text: &str) -> Result<Span, ExtractError> {
    let start = text.find('{').ok_or_else(|| ExtractError::InvalidFormat {
        reason: "no JSON object found".to_string(),
    })?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(Span {
                        start,
                        end: start + offset + ch.len_utf8(),
                    });
                }
            }
            _ => {}
        }
    }

    Err(ExtractError::Truncated {
        position: text.len(),
        length: text.len(),
    })
}

fn parse_object(candidate: &str, offset: usize) -> Result<Map<String, Value>, ExtractError> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ExtractError::SchemaViolation {
            reason: format!("expected a JSON object, found {}", value_kind(&other)),
            missing_key: None,
        }),
        Err(e) => Err(classify_parse_error(e, offset, offset + candidate.len())),
    }
}

fn classify_parse_error(err: serde_json::Error, offset: usize, length: usize) -> ExtractError {
    if err.is_eof() {
        ExtractError::Truncated {
            position: length,
            length,
        }
    } else {
        ExtractError::InvalidFormat {
            reason: format!("{} (candidate starts at byte {})", err, offset),
        }
    }
}

fn join_stripped(parts: &[&str]) -> Option<String> {
    let joined: String = parts.concat();
    if joined.trim().is_empty() {
        None
    } else {
        Some(joined)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
