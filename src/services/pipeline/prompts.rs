//! Stage Prompts
//!
//! Builds the `GenerationRequest` for every LLM-backed stage. Each prompt
//! asks for a single JSON object so the extractor can recover it.

use query_cascade_core::QueryRows;
use query_cascade_guards::SafetyRules;
use query_cascade_llm::GenerationRequest;

use crate::models::pipeline::{IntentPayload, PlanPayload, StageFailure};

use super::controller::SchemaContext;

pub const SYSTEM_PROMPT: &str = "You translate questions about a SQLite database into SQL. \
Only use tables and columns listed in the schema. Join tables only along the listed \
foreign keys. Reply with exactly one JSON object and nothing else.";

const INTENT_MAX_TOKENS: u32 = 400;
const PLAN_MAX_TOKENS: u32 = 400;
const SQL_MAX_TOKENS: u32 = 600;
const SYNTHESIS_MAX_TOKENS: u32 = 400;

/// Rows included in the synthesis prompt
const SYNTHESIS_SAMPLE_ROWS: usize = 20;

fn schema_block(schema: &SchemaContext) -> String {
    format!(
        "Schema:\n{}\n\nForeign keys:\n{}",
        schema.compact, schema.relationships
    )
}

fn rules_block(rules: &SafetyRules) -> String {
    let mut lines = vec!["- a single read-only SELECT (or WITH ... SELECT) statement".to_string()];
    if rules.forbid_select_star {
        lines.push("- name the columns explicitly, never SELECT *".to_string());
    }
    if rules.require_limit {
        match rules.max_limit {
            Some(max) => lines.push(format!("- end with a LIMIT of at most {}", max)),
            None => lines.push("- end with a LIMIT clause".to_string()),
        }
    }
    lines.join("\n")
}

/// Tell the model why its previous reply to this stage was rejected.
fn feedback_block(feedback: Option<&StageFailure>) -> String {
    match feedback {
        Some(error) => format!(
            "\n\nYour previous reply could not be used ({}): {}\n\
             Reply with only the JSON object described above.",
            error.kind, error.message
        ),
        None => String::new(),
    }
}

fn request(prompt: String, label: &str, max_tokens: u32) -> GenerationRequest {
    GenerationRequest::new(prompt)
        .with_system(SYSTEM_PROMPT)
        .with_max_tokens(max_tokens)
        .with_label(label)
}

/// Classify the question; with `batched` also ask for the plan.
pub fn intent_request(
    question: &str,
    schema: &SchemaContext,
    batched: bool,
    feedback: Option<&StageFailure>,
) -> GenerationRequest {
    let mut prompt = format!(
        "{}\n\nQuestion: {}\n\n\
         Classify the question:\n\
         - \"data\": answerable by querying rows\n\
         - \"meta\": about the schema itself (tables, columns, relationships)\n\
         - \"ambiguous\": cannot be answered without clarification\n\n\
         Respond with JSON: {{\"intent\": \"data|meta|ambiguous\", \"summary\": \"...\", \
         \"tables\": [\"...\"], \"clarification\": \"question to ask the user, only when ambiguous\"",
        schema_block(schema),
        question
    );
    if batched {
        prompt.push_str(", \"plan\": [\"step\", ...] (only when intent is data)");
    }
    prompt.push('}');
    prompt.push_str(&feedback_block(feedback));
    request(prompt, "intent", INTENT_MAX_TOKENS)
}

pub fn plan_request(
    question: &str,
    schema: &SchemaContext,
    intent: Option<&IntentPayload>,
    feedback: Option<&StageFailure>,
) -> GenerationRequest {
    let hint = intent
        .filter(|i| !i.tables.is_empty())
        .map(|i| format!("\nLikely tables: {}", i.tables.join(", ")))
        .unwrap_or_default();
    let prompt = format!(
        "{}\n\nQuestion: {}{}\n\n\
         Outline how to answer the question with one SQL query: which tables, which joins \
         along foreign keys, which filters and aggregates.\n\n\
         Respond with JSON: {{\"plan\": [\"step\", ...], \"tables\": [\"...\"]}}{}",
        schema_block(schema),
        question,
        hint,
        feedback_block(feedback)
    );
    request(prompt, "planning", PLAN_MAX_TOKENS)
}

/// Ask for SQL. `previous` carries the last statement and its error when
/// regenerating after a failed correction.
pub fn sql_request(
    question: &str,
    schema: &SchemaContext,
    plan: Option<&PlanPayload>,
    rules: &SafetyRules,
    previous: Option<(&str, &StageFailure)>,
) -> GenerationRequest {
    let mut prompt = format!("{}\n\nQuestion: {}\n", schema_block(schema), question);
    if let Some(plan) = plan.filter(|p| !p.steps.is_empty()) {
        prompt.push_str("\nPlan:\n");
        for (i, step) in plan.steps.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, step));
        }
    }
    if let Some((sql, error)) = previous {
        prompt.push_str(&format!(
            "\nA previous attempt failed.\nSQL: {}\nError ({}): {}\n",
            sql, error.kind, error.message
        ));
    }
    prompt.push_str(&format!(
        "\nWrite the SQL. It must be:\n{}\n\n\
         Respond with JSON: {{\"sql\": \"...\", \"reasoning\": \"one sentence\"}}",
        rules_block(rules)
    ));
    request(prompt, "sql_generation", SQL_MAX_TOKENS)
}

pub fn correction_request(
    question: &str,
    schema: &SchemaContext,
    sql: &str,
    error: &StageFailure,
    attempt: u32,
    rules: &SafetyRules,
) -> GenerationRequest {
    let prompt = format!(
        "{}\n\nQuestion: {}\n\n\
         This SQL failed (correction attempt {}):\n{}\n\n\
         Error ({}): {}\n\n\
         Fix the SQL. It must be:\n{}\n\n\
         Respond with JSON: {{\"sql\": \"...\", \"explanation\": \"what was wrong\"}}",
        schema_block(schema),
        question,
        attempt,
        sql,
        error.kind,
        error.message,
        rules_block(rules)
    );
    request(prompt, "correction", SQL_MAX_TOKENS)
}

pub fn synthesis_request(question: &str, sql: &str, rows: &QueryRows) -> GenerationRequest {
    let sample: Vec<_> = rows
        .to_records()
        .into_iter()
        .take(SYNTHESIS_SAMPLE_ROWS)
        .collect();
    let sample = serde_json::to_string(&sample).unwrap_or_else(|_| "[]".to_string());
    let prompt = format!(
        "Question: {}\n\nSQL: {}\n\nResult ({} row(s){}): {}\n\n\
         Answer the question in one or two plain sentences using only this result.\n\n\
         Respond with JSON: {{\"answer\": \"...\"}}",
        question,
        sql,
        rows.len(),
        if rows.truncated { ", truncated" } else { "" },
        sample
    );
    request(prompt, "response_synthesis", SYNTHESIS_MAX_TOKENS)
}
