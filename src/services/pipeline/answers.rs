//! Deterministic Answers
//!
//! Answer text used when synthesis does not spend an LLM call: clarification
//! requests, row summaries and failure explanations.

use query_cascade_core::QueryRows;
use serde_json::Value;

use crate::models::pipeline::{IntentPayload, StageFailure, TerminalStatus};

/// Rows listed in a deterministic summary
const SUMMARY_ROWS: usize = 10;

pub fn clarification(intent: Option<&IntentPayload>, question: &str) -> String {
    match intent.and_then(|i| i.clarification.as_deref()) {
        Some(text) => text.to_string(),
        None => format!(
            "Could you clarify what you are looking for in \"{}\"? \
             For example, which records, time period or measure you mean.",
            question
        ),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

pub fn summarize_rows(rows: &QueryRows) -> String {
    if rows.is_empty() {
        return "No matching rows were found.".to_string();
    }
    if rows.len() == 1 && rows.columns.len() == 1 {
        return format!("{}: {}", rows.columns[0], render(&rows.rows[0][0]));
    }

    let mut text = format!(
        "Found {} row(s){}:",
        rows.len(),
        if rows.truncated { " (truncated)" } else { "" }
    );
    for row in rows.rows.iter().take(SUMMARY_ROWS) {
        let fields: Vec<String> = rows
            .columns
            .iter()
            .zip(row)
            .map(|(col, value)| format!("{}={}", col, render(value)))
            .collect();
        text.push_str("\n- ");
        text.push_str(&fields.join(", "));
    }
    if rows.len() > SUMMARY_ROWS {
        text.push_str(&format!("\n... and {} more", rows.len() - SUMMARY_ROWS));
    }
    text
}

/// Explain a non-successful outcome, including the last SQL when there is one.
pub fn explain_failure(
    status: TerminalStatus,
    error: Option<&StageFailure>,
    sql: Option<&str>,
) -> String {
    let mut text = match (status, error) {
        (TerminalStatus::Cancelled, _) => "The query was cancelled before it finished.".to_string(),
        (TerminalStatus::Blocked, Some(e)) => {
            format!("The generated SQL was blocked by the safety checks: {}", e.message)
        }
        (TerminalStatus::Blocked, None) => {
            "The generated SQL was blocked by the safety checks.".to_string()
        }
        (_, Some(e)) => format!("I couldn't answer this question ({}): {}", e.kind, e.message),
        (_, None) => "I couldn't answer this question.".to_string(),
    };
    if let Some(sql) = sql.filter(|_| status != TerminalStatus::Cancelled) {
        text.push_str(&format!("\nLast SQL: {}", sql));
    }
    text
}
