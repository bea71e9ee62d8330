//! Pipeline Models
//!
//! Stage, status and trace types for one run of the query pipeline.

use chrono::{DateTime, Utc};
use query_cascade_core::{ExtractError, ExtractErrorKind, QueryRows};
use query_cascade_guards::{GuardKind, GuardReport};
use query_cascade_llm::{CallBudget, GatewayError};
use serde::{Deserialize, Serialize};

// ============================================================================
// Stages & Statuses
// ============================================================================

/// One discrete step of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    IntentAnalysis,
    Planning,
    SchemaIntrospection,
    SqlGeneration,
    SafetyValidation,
    Execution,
    Correction,
    ResponseSynthesis,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::IntentAnalysis => write!(f, "intent_analysis"),
            Stage::Planning => write!(f, "planning"),
            Stage::SchemaIntrospection => write!(f, "schema_introspection"),
            Stage::SqlGeneration => write!(f, "sql_generation"),
            Stage::SafetyValidation => write!(f, "safety_validation"),
            Stage::Execution => write!(f, "execution"),
            Stage::Correction => write!(f, "correction"),
            Stage::ResponseSynthesis => write!(f, "response_synthesis"),
        }
    }
}

/// Status vocabulary shared by every stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Ok,
    Ambiguous,
    Error,
    /// Recoverable failure, the correction loop may fix it
    Retry,
    /// Rejected by the guards with no correction attempts left
    Blocked,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Ok => write!(f, "ok"),
            StageStatus::Ambiguous => write!(f, "ambiguous"),
            StageStatus::Error => write!(f, "error"),
            StageStatus::Retry => write!(f, "retry"),
            StageStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// Route chosen by intent analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Answerable with a SQL query
    Data,
    /// A question about the schema itself
    Meta,
    /// Needs clarification before any SQL can be written
    Ambiguous,
}

impl Intent {
    /// Parse the label a model returns; unknown labels yield `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "data" | "query" | "sql" | "data_query" => Some(Intent::Data),
            "meta" | "schema" | "schema_question" => Some(Intent::Meta),
            "ambiguous" | "unclear" | "clarify" => Some(Intent::Ambiguous),
            _ => None,
        }
    }
}

/// Terminal status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Success,
    Clarification,
    Blocked,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalStatus::Success => write!(f, "success"),
            TerminalStatus::Clarification => write!(f, "clarification"),
            TerminalStatus::Blocked => write!(f, "blocked"),
            TerminalStatus::Failed => write!(f, "failed"),
            TerminalStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error taxonomy recorded in the trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyResponse,
    InvalidFormat,
    SchemaViolation,
    TruncatedOutput,
    ProviderQuotaExceeded,
    ProviderFailure,
    RateLimited,
    BudgetExceeded,
    SafetyViolation,
    JoinInvalid,
    ExecutionError,
    MaxRetriesExceeded,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::EmptyResponse => "empty_response",
            ErrorKind::InvalidFormat => "invalid_format",
            ErrorKind::SchemaViolation => "schema_violation",
            ErrorKind::TruncatedOutput => "truncated_output",
            ErrorKind::ProviderQuotaExceeded => "provider_quota_exceeded",
            ErrorKind::ProviderFailure => "provider_failure",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::BudgetExceeded => "budget_exceeded",
            ErrorKind::SafetyViolation => "safety_violation",
            ErrorKind::JoinInvalid => "join_invalid",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::MaxRetriesExceeded => "max_retries_exceeded",
            ErrorKind::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl From<ExtractErrorKind> for ErrorKind {
    fn from(kind: ExtractErrorKind) -> Self {
        match kind {
            ExtractErrorKind::EmptyResponse => ErrorKind::EmptyResponse,
            ExtractErrorKind::InvalidFormat => ErrorKind::InvalidFormat,
            ExtractErrorKind::SchemaViolation => ErrorKind::SchemaViolation,
            ExtractErrorKind::TruncatedOutput => ErrorKind::TruncatedOutput,
        }
    }
}

impl From<GuardKind> for ErrorKind {
    fn from(kind: GuardKind) -> Self {
        match kind {
            GuardKind::Safety => ErrorKind::SafetyViolation,
            GuardKind::Join => ErrorKind::JoinInvalid,
        }
    }
}

/// A classified failure with its message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Query was cancelled")
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&ExtractError> for StageFailure {
    fn from(err: &ExtractError) -> Self {
        Self::new(err.kind().into(), err.to_string())
    }
}

impl From<&GatewayError> for StageFailure {
    fn from(err: &GatewayError) -> Self {
        let kind = match err {
            GatewayError::RateLimited { .. } => ErrorKind::RateLimited,
            GatewayError::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            GatewayError::QuotaExhausted { .. } => ErrorKind::ProviderQuotaExceeded,
            GatewayError::ProviderFailure { .. } | GatewayError::NoProviders => {
                ErrorKind::ProviderFailure
            }
        };
        Self::new(kind, err.to_string())
    }
}

// ============================================================================
// Stage Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentPayload {
    pub intent: Intent,
    pub summary: String,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPayload {
    pub steps: Vec<String>,
    #[serde(default)]
    pub tables: Vec<String>,
}

/// Where a SQL statement came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlSource {
    Generated,
    Corrected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlPayload {
    pub sql: String,
    pub source: SqlSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPayload {
    pub columns: Vec<String>,
    pub row_count: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionPayload {
    pub attempt: u32,
    /// The error fed back to the model
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaAnswerPayload {
    pub tables: Vec<String>,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub answer: String,
    /// Whether the answer text came from a model call
    pub llm_generated: bool,
}

/// Stage-specific structured payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StagePayload {
    Intent(IntentPayload),
    Plan(PlanPayload),
    Sql(SqlPayload),
    Validation(GuardReport),
    Execution(ExecutionPayload),
    Correction(CorrectionPayload),
    SchemaAnswer(SchemaAnswerPayload),
    Answer(AnswerPayload),
    Failure(StageFailure),
    Empty,
}

// ============================================================================
// Stage Output & Trace
// ============================================================================

/// Result of one pipeline stage; one is appended to the trace per transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    pub stage: Stage,
    pub status: StageStatus,
    pub payload: StagePayload,
    pub reasoning: String,
    /// Whether this stage spent an LLM call
    pub llm_call: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl StageOutput {
    pub fn new(
        stage: Stage,
        status: StageStatus,
        payload: StagePayload,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            status,
            payload,
            reasoning: reasoning.into(),
            llm_call: false,
            provider: None,
            duration_ms: 0,
            recorded_at: Utc::now(),
        }
    }

    /// A stage that failed with a classified error
    pub fn failure(stage: Stage, status: StageStatus, failure: StageFailure) -> Self {
        let reasoning = failure.message.clone();
        Self::new(stage, status, StagePayload::Failure(failure), reasoning)
    }

    /// Mark that an LLM call was made for this stage
    pub fn with_llm(mut self, provider: Option<String>) -> Self {
        self.llm_call = true;
        self.provider = provider;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn failure_payload(&self) -> Option<&StageFailure> {
        match &self.payload {
            StagePayload::Failure(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Mutable state of one query as it moves through the pipeline
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub query_id: String,
    pub question: String,
    pub trace: Vec<StageOutput>,
    pub budget: CallBudget,
    pub correction_attempts: u32,
    pub intent: Option<IntentPayload>,
    pub plan: Option<PlanPayload>,
    /// Plan steps returned together with the intent when batching
    pub batched_plan: Option<PlanPayload>,
    pub last_sql: Option<String>,
    pub last_error: Option<StageFailure>,
    /// Corrected SQL waiting to be adopted by the next generation stage
    pub pending_sql: Option<String>,
    /// Why the last intent or plan reply was unusable; shown to the model
    /// when that stage asks again
    pub reprompt: Option<StageFailure>,
    pub rows: Option<QueryRows>,
    pub schema_answer: Option<SchemaAnswerPayload>,
    pub answer: Option<String>,
    /// Set once a terminal outcome is decided; unset until then
    pub terminal: Option<TerminalStatus>,
}

impl PipelineState {
    pub fn new(question: impl Into<String>, budget: CallBudget) -> Self {
        Self {
            query_id: uuid::Uuid::new_v4().to_string(),
            question: question.into(),
            trace: Vec::new(),
            budget,
            correction_attempts: 0,
            intent: None,
            plan: None,
            batched_plan: None,
            last_sql: None,
            last_error: None,
            pending_sql: None,
            reprompt: None,
            rows: None,
            schema_answer: None,
            answer: None,
            terminal: None,
        }
    }

    /// Short id for log lines
    pub fn short_id(&self) -> &str {
        self.query_id.get(..8).unwrap_or(&self.query_id)
    }

    pub fn intent_kind(&self) -> Option<Intent> {
        self.intent.as_ref().map(|i| i.intent)
    }

    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.correction_attempts < max_retries
    }

    /// Record a terminal outcome. The first decision wins.
    pub fn halt(&mut self, status: TerminalStatus, failure: StageFailure) {
        if self.terminal.is_none() {
            self.terminal = Some(status);
            self.last_error = Some(failure);
        }
    }

    pub fn is_halted(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn llm_calls(&self) -> u32 {
        self.budget.calls_made
    }
}

/// Final outcome returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub query_id: String,
    pub question: String,
    pub status: TerminalStatus,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<QueryRows>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageFailure>,
    pub trace: Vec<StageOutput>,
    pub llm_calls: u32,
    pub tokens_used: u32,
    pub correction_attempts: u32,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == TerminalStatus::Success
    }

    /// Stages in execution order
    pub fn stages(&self) -> Vec<Stage> {
        self.trace.iter().map(|o| o.stage).collect()
    }

    /// Number of trace entries that spent an LLM call
    pub fn llm_stage_count(&self) -> usize {
        self.trace.iter().filter(|o| o.llm_call).count()
    }
}
