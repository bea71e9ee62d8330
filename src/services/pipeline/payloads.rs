//! Model Response Payloads
//!
//! Typed views of the JSON objects each LLM-backed stage asks for, parsed
//! through the structured-output extractor.

use query_cascade_core::{extract_json_with_keys, ExtractError};
use serde::{Deserialize, Deserializer};

use crate::models::pipeline::{Intent, IntentPayload, PlanPayload};

/// Accept either `["step", ...]` or a single string for plan-like fields.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        List(Vec<String>),
        One(String),
        Null(()),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::List(items) => items,
        StringOrList::One(s) if s.trim().is_empty() => Vec::new(),
        StringOrList::One(s) => vec![s],
        StringOrList::Null(()) => Vec::new(),
    })
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    intent: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    tables: Vec<String>,
    #[serde(default)]
    clarification: Option<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    plan: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    #[serde(default, deserialize_with = "string_or_list")]
    plan: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    tables: Vec<String>,
}

/// SQL returned by generation or correction
#[derive(Debug, Clone, Deserialize)]
pub struct SqlResponse {
    pub sql: String,
    #[serde(default, alias = "explanation")]
    pub reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnswerResponse {
    answer: String,
}

/// Intent analysis result, with the plan when it was batched in
#[derive(Debug, Clone)]
pub struct ParsedIntent {
    pub intent: IntentPayload,
    pub plan: Option<PlanPayload>,
}

fn key_refs(required: &[String]) -> Vec<&str> {
    required.iter().map(String::as_str).collect()
}

fn schema_violation(reason: impl Into<String>) -> ExtractError {
    ExtractError::SchemaViolation {
        reason: reason.into(),
        missing_key: None,
    }
}

pub fn parse_intent(
    text: &str,
    required: &[String],
    batched: bool,
) -> Result<ParsedIntent, ExtractError> {
    let response: IntentResponse = extract_json_with_keys(text, &key_refs(required))?.into_typed()?;
    let intent = Intent::from_label(&response.intent)
        .ok_or_else(|| schema_violation(format!("unknown intent '{}'", response.intent)))?;

    let plan = if batched && intent == Intent::Data {
        Some(PlanPayload {
            steps: response.plan,
            tables: response.tables.clone(),
        })
    } else {
        None
    };

    Ok(ParsedIntent {
        intent: IntentPayload {
            intent,
            summary: response.summary.unwrap_or_default(),
            tables: response.tables,
            clarification: response.clarification.filter(|c| !c.trim().is_empty()),
        },
        plan,
    })
}

pub fn parse_plan(text: &str, required: &[String]) -> Result<PlanPayload, ExtractError> {
    let response: PlanResponse = extract_json_with_keys(text, &key_refs(required))?.into_typed()?;
    Ok(PlanPayload {
        steps: response.plan,
        tables: response.tables,
    })
}

/// Parse generated or corrected SQL. Blank SQL is a schema violation.
pub fn parse_sql(text: &str, required: &[String]) -> Result<SqlResponse, ExtractError> {
    let mut response: SqlResponse =
        extract_json_with_keys(text, &key_refs(required))?.into_typed()?;
    response.sql = response.sql.trim().to_string();
    if response.sql.is_empty() {
        return Err(schema_violation("'sql' is empty"));
    }
    Ok(response)
}

pub fn parse_answer(text: &str, required: &[String]) -> Result<String, ExtractError> {
    let response: AnswerResponse =
        extract_json_with_keys(text, &key_refs(required))?.into_typed()?;
    let answer = response.answer.trim().to_string();
    if answer.is_empty() {
        return Err(schema_violation("'answer' is empty"));
    }
    Ok(answer)
}
