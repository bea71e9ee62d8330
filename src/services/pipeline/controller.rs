//! Pipeline Controller
//!
//! Drives one question through the stage state machine:
//!
//! ```text
//! IntentAnalysis -> Planning -> SqlGeneration -> SafetyValidation -> Execution -> ResponseSynthesis
//!       |                            ^   |               |              |
//!       |                            |   +------+--------+--------------+  (retry)
//!       |                            |          v
//!       |                            +----- Correction
//!       +-> SchemaIntrospection -> ResponseSynthesis
//! ```
//!
//! Every visited stage appends exactly one `StageOutput` to the trace. An
//! unusable intent or plan reply repeats that stage with the parse error in
//! the prompt. Those repeats and the SQL corrections share one counter
//! bounded by `max_retries`, and every LLM call goes through the gateway
//! against the query's `CallBudget`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use query_cascade_core::{QueryDatabase, SchemaGraph, SchemaSnapshot};
use query_cascade_guards::GuardPipeline;
use query_cascade_llm::{GatewayResponse, GenerationRequest, LlmGateway};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::pipeline::{
    AnswerPayload, CorrectionPayload, ErrorKind, ExecutionPayload, Intent, PipelineResult,
    PipelineState, SqlPayload, SqlSource, Stage, StageFailure, StageOutput, StagePayload,
    StageStatus, TerminalStatus,
};
use crate::models::settings::{AppConfig, RequiredKeys};
use crate::utils::error::AppResult;

use super::{answers, introspection, payloads, prompts};

// ============================================================================
// Schema Context
// ============================================================================

/// Schema snapshot plus everything derived from it
#[derive(Debug, Clone)]
pub struct SchemaContext {
    pub snapshot: SchemaSnapshot,
    pub graph: SchemaGraph,
    /// Compact rendering used in prompts
    pub compact: String,
    pub relationships: String,
}

impl SchemaContext {
    pub fn new(snapshot: SchemaSnapshot, max_hops: usize) -> Self {
        let graph = SchemaGraph::from_snapshot(&snapshot).with_max_hops(max_hops);
        let compact = snapshot.render_compact();
        let relationships = graph.describe_relationships();
        Self {
            snapshot,
            graph,
            compact,
            relationships,
        }
    }
}

// ============================================================================
// Transitions
// ============================================================================

/// What the controller does after a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Next(Stage),
    Done,
}

/// Facts the transition function needs besides the stage and its status
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionContext {
    pub intent: Option<Intent>,
    pub can_retry: bool,
    pub halted: bool,
}

/// Pure transition function of the stage machine.
///
/// Once a terminal outcome is recorded every stage goes straight to
/// `ResponseSynthesis`, and synthesis always ends the run.
pub fn transition(stage: Stage, status: StageStatus, ctx: &TransitionContext) -> Step {
    if stage == Stage::ResponseSynthesis {
        return Step::Done;
    }
    if ctx.halted {
        return Step::Next(Stage::ResponseSynthesis);
    }

    let next = match (stage, status) {
        (Stage::IntentAnalysis, StageStatus::Ok) => match ctx.intent {
            Some(Intent::Data) => Stage::Planning,
            Some(Intent::Meta) => Stage::SchemaIntrospection,
            _ => Stage::ResponseSynthesis,
        },
        (Stage::IntentAnalysis | Stage::Planning, StageStatus::Retry) if ctx.can_retry => stage,
        (Stage::Planning, StageStatus::Ok) => Stage::SqlGeneration,
        (Stage::SqlGeneration, StageStatus::Ok) => Stage::SafetyValidation,
        (Stage::SafetyValidation, StageStatus::Ok) => Stage::Execution,
        (Stage::SqlGeneration | Stage::SafetyValidation | Stage::Execution, StageStatus::Retry)
            if ctx.can_retry =>
        {
            Stage::Correction
        }
        (Stage::Correction, StageStatus::Ok | StageStatus::Retry) => Stage::SqlGeneration,
        _ => Stage::ResponseSynthesis,
    };
    Step::Next(next)
}

// ============================================================================
// Controller
// ============================================================================

pub struct QueryPipeline {
    config: AppConfig,
    gateway: Arc<LlmGateway>,
    database: Arc<dyn QueryDatabase>,
    guards: GuardPipeline,
    schema: RwLock<Arc<SchemaContext>>,
}

impl QueryPipeline {
    /// Create the controller and load the schema once.
    pub async fn new(
        config: AppConfig,
        gateway: Arc<LlmGateway>,
        database: Arc<dyn QueryDatabase>,
    ) -> AppResult<Self> {
        let snapshot = database.get_schema().await?;
        let schema = SchemaContext::new(snapshot, config.pipeline.max_join_hops);
        info!(
            "Pipeline ready: {} tables, {} foreign keys, {} provider(s)",
            schema.snapshot.tables.len(),
            schema.graph.edges().len(),
            gateway.provider_count()
        );

        Ok(Self {
            guards: GuardPipeline::new(config.safety.clone()),
            config,
            gateway,
            database,
            schema: RwLock::new(Arc::new(schema)),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<LlmGateway> {
        &self.gateway
    }

    /// Current schema context. Queries already running keep the one they
    /// started with.
    pub async fn schema(&self) -> Arc<SchemaContext> {
        self.schema.read().await.clone()
    }

    /// Re-read the schema from the database and rebuild the graph.
    pub async fn reload_schema(&self) -> AppResult<()> {
        let snapshot = self.database.get_schema().await?;
        let schema = SchemaContext::new(snapshot, self.config.pipeline.max_join_hops);
        info!("Schema reloaded: {} tables", schema.snapshot.tables.len());
        *self.schema.write().await = Arc::new(schema);
        Ok(())
    }

    /// Answer one question.
    pub async fn run(&self, question: &str) -> PipelineResult {
        self.run_with_cancellation(question, CancellationToken::new())
            .await
    }

    /// Answer one question; cancelling `token` ends the run at the next
    /// await point with `TerminalStatus::Cancelled`.
    pub async fn run_with_cancellation(
        &self,
        question: &str,
        token: CancellationToken,
    ) -> PipelineResult {
        let schema = self.schema().await;
        let mut state = PipelineState::new(question, self.config.gateway.new_budget());
        info!("[{}] Query started: {}", state.short_id(), question);

        let mut stage = Stage::IntentAnalysis;
        loop {
            let started = Instant::now();
            let output = if token.is_cancelled()
                && !state.is_halted()
                && stage != Stage::ResponseSynthesis
            {
                self.abort(stage, &mut state, StageFailure::cancelled())
            } else {
                self.run_stage(stage, &mut state, &schema, &token).await
            };
            let output = output.with_duration(started.elapsed().as_millis() as u64);
            let status = output.status;

            info!(
                "[{}] {} -> {} ({}ms){}",
                state.short_id(),
                stage,
                status,
                output.duration_ms,
                if output.llm_call { " [llm]" } else { "" }
            );
            state.trace.push(output);

            let ctx = TransitionContext {
                intent: state.intent_kind(),
                can_retry: state.can_retry(self.config.pipeline.max_retries),
                halted: state.is_halted(),
            };
            match transition(stage, status, &ctx) {
                Step::Next(next) => stage = next,
                Step::Done => break,
            }
        }

        self.finish(state)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        state: &mut PipelineState,
        schema: &SchemaContext,
        token: &CancellationToken,
    ) -> StageOutput {
        match stage {
            Stage::IntentAnalysis => self.analyze_intent(state, schema, token).await,
            Stage::Planning => self.plan(state, schema, token).await,
            Stage::SchemaIntrospection => self.introspect(state, schema),
            Stage::SqlGeneration => self.generate_sql(state, schema, token).await,
            Stage::SafetyValidation => self.validate(state, schema),
            Stage::Execution => self.execute(state, token).await,
            Stage::Correction => self.correct(state, schema, token).await,
            Stage::ResponseSynthesis => self.synthesize(state, token).await,
        }
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    /// One gateway call, raced against cancellation.
    async fn call_llm(
        &self,
        state: &mut PipelineState,
        request: GenerationRequest,
        token: &CancellationToken,
    ) -> Result<GatewayResponse, StageFailure> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(StageFailure::cancelled()),
            result = self.gateway.generate(&request, &mut state.budget) => {
                result.map_err(|e| StageFailure::from(&e))
            }
        }
    }

    /// Record a terminal failure and emit the stage's error output.
    fn abort(&self, stage: Stage, state: &mut PipelineState, failure: StageFailure) -> StageOutput {
        let terminal = if failure.kind == ErrorKind::Cancelled {
            TerminalStatus::Cancelled
        } else {
            TerminalStatus::Failed
        };
        warn!("[{}] {} aborted: {}", state.short_id(), stage, failure);
        state.halt(terminal, failure.clone());
        StageOutput::failure(stage, StageStatus::Error, failure)
    }

    /// A gateway failure ends the query. Budget, rate-limit and quota
    /// failures are not correctable by rewriting SQL.
    fn gateway_failure(
        &self,
        stage: Stage,
        state: &mut PipelineState,
        failure: StageFailure,
        calls_before: u32,
    ) -> StageOutput {
        let spent = state.budget.calls_made > calls_before;
        let output = self.abort(stage, state, failure);
        if spent {
            output.with_llm(None)
        } else {
            output
        }
    }

    /// A failure the correction loop may fix: `Retry` while attempts remain,
    /// otherwise a terminal `Failed`.
    fn recoverable(
        &self,
        stage: Stage,
        state: &mut PipelineState,
        failure: StageFailure,
    ) -> StageOutput {
        state.last_error = Some(failure.clone());
        if state.can_retry(self.config.pipeline.max_retries) {
            debug!("[{}] {} failed, will correct: {}", state.short_id(), stage, failure);
            return StageOutput::failure(stage, StageStatus::Retry, failure);
        }
        let failure = self.exhausted(state, failure);
        state.halt(TerminalStatus::Failed, failure.clone());
        StageOutput::failure(stage, StageStatus::Error, failure)
    }

    /// An unusable intent or plan reply. While attempts remain the stage is
    /// asked again with the parse error.
    fn reprompt(
        &self,
        stage: Stage,
        state: &mut PipelineState,
        failure: StageFailure,
    ) -> StageOutput {
        let output = self.recoverable(stage, state, failure.clone());
        if output.status == StageStatus::Retry {
            state.reprompt = Some(failure);
        } else {
            warn!("[{}] {} aborted: {}", state.short_id(), stage, failure);
        }
        output
    }

    /// Take the pending parse error for a repeated stage, counting the repeat
    /// as a correction attempt.
    fn take_reprompt(&self, stage: Stage, state: &mut PipelineState) -> Option<StageFailure> {
        let feedback = state.reprompt.take()?;
        state.correction_attempts += 1;
        info!(
            "[{}] Asking {} again, attempt {}/{}: {}",
            state.short_id(),
            stage,
            state.correction_attempts,
            self.config.pipeline.max_retries,
            feedback
        );
        Some(feedback)
    }

    fn exhausted(&self, state: &PipelineState, failure: StageFailure) -> StageFailure {
        if state.correction_attempts == 0 {
            return failure;
        }
        StageFailure::new(
            ErrorKind::MaxRetriesExceeded,
            format!(
                "Gave up after {} correction attempt(s); last error ({}): {}",
                state.correction_attempts, failure.kind, failure.message
            ),
        )
    }

    fn keys(&self) -> &RequiredKeys {
        &self.config.pipeline.required_keys
    }

    // ========================================================================
    // Stages
    // ========================================================================

    async fn analyze_intent(
        &self,
        state: &mut PipelineState,
        schema: &SchemaContext,
        token: &CancellationToken,
    ) -> StageOutput {
        let stage = Stage::IntentAnalysis;
        let batched = self.config.pipeline.batch_intent_and_plan;
        let feedback = self.take_reprompt(stage, state);
        let request =
            prompts::intent_request(&state.question, schema, batched, feedback.as_ref());
        let calls_before = state.budget.calls_made;

        let response = match self.call_llm(state, request, token).await {
            Ok(response) => response,
            Err(failure) => return self.gateway_failure(stage, state, failure, calls_before),
        };

        match payloads::parse_intent(&response.text, &self.keys().intent, batched) {
            Ok(parsed) => {
                let status = if parsed.intent.intent == Intent::Ambiguous {
                    StageStatus::Ambiguous
                } else {
                    StageStatus::Ok
                };
                let reasoning = if parsed.intent.summary.is_empty() {
                    format!("Classified as {:?}", parsed.intent.intent)
                } else {
                    parsed.intent.summary.clone()
                };
                state.intent = Some(parsed.intent.clone());
                state.batched_plan = parsed.plan;
                StageOutput::new(stage, status, StagePayload::Intent(parsed.intent), reasoning)
                    .with_llm(Some(response.provider))
            }
            Err(err) => self
                .reprompt(stage, state, StageFailure::from(&err))
                .with_llm(Some(response.provider)),
        }
    }

    async fn plan(
        &self,
        state: &mut PipelineState,
        schema: &SchemaContext,
        token: &CancellationToken,
    ) -> StageOutput {
        let stage = Stage::Planning;
        if let Some(plan) = state.batched_plan.take() {
            state.plan = Some(plan.clone());
            return StageOutput::new(
                stage,
                StageStatus::Ok,
                StagePayload::Plan(plan),
                "Plan returned with intent analysis",
            );
        }

        let feedback = self.take_reprompt(stage, state);
        let request = prompts::plan_request(
            &state.question,
            schema,
            state.intent.as_ref(),
            feedback.as_ref(),
        );
        let calls_before = state.budget.calls_made;
        let response = match self.call_llm(state, request, token).await {
            Ok(response) => response,
            Err(failure) => return self.gateway_failure(stage, state, failure, calls_before),
        };

        match payloads::parse_plan(&response.text, &self.keys().plan) {
            Ok(plan) => {
                state.plan = Some(plan.clone());
                let reasoning = format!("{} step(s) planned", plan.steps.len());
                StageOutput::new(stage, StageStatus::Ok, StagePayload::Plan(plan), reasoning)
                    .with_llm(Some(response.provider))
            }
            Err(err) => self
                .reprompt(stage, state, StageFailure::from(&err))
                .with_llm(Some(response.provider)),
        }
    }

    fn introspect(&self, state: &mut PipelineState, schema: &SchemaContext) -> StageOutput {
        let hinted = state
            .intent
            .as_ref()
            .map(|i| i.tables.clone())
            .unwrap_or_default();
        let answer = introspection::answer_schema_question(
            &state.question,
            &hinted,
            &schema.snapshot,
            &schema.graph,
        );
        let reasoning = format!("Answered from schema ({} table(s))", answer.tables.len());
        state.schema_answer = Some(answer.clone());
        StageOutput::new(
            Stage::SchemaIntrospection,
            StageStatus::Ok,
            StagePayload::SchemaAnswer(answer),
            reasoning,
        )
    }

    async fn generate_sql(
        &self,
        state: &mut PipelineState,
        schema: &SchemaContext,
        token: &CancellationToken,
    ) -> StageOutput {
        let stage = Stage::SqlGeneration;

        if let Some(sql) = state.pending_sql.take() {
            state.last_sql = Some(sql.clone());
            let reasoning = format!(
                "Using SQL from correction attempt {}",
                state.correction_attempts
            );
            return StageOutput::new(
                stage,
                StageStatus::Ok,
                StagePayload::Sql(SqlPayload {
                    sql,
                    source: SqlSource::Corrected,
                }),
                reasoning,
            );
        }

        let previous = match (&state.last_sql, &state.last_error) {
            (Some(sql), Some(err)) => Some((sql.clone(), err.clone())),
            _ => None,
        };
        let request = prompts::sql_request(
            &state.question,
            schema,
            state.plan.as_ref(),
            &self.config.safety,
            previous.as_ref().map(|(sql, err)| (sql.as_str(), err)),
        );
        let calls_before = state.budget.calls_made;
        let response = match self.call_llm(state, request, token).await {
            Ok(response) => response,
            Err(failure) => return self.gateway_failure(stage, state, failure, calls_before),
        };

        match payloads::parse_sql(&response.text, &self.keys().sql) {
            Ok(parsed) => {
                debug!("[{}] Generated SQL: {}", state.short_id(), parsed.sql);
                state.last_sql = Some(parsed.sql.clone());
                StageOutput::new(
                    stage,
                    StageStatus::Ok,
                    StagePayload::Sql(SqlPayload {
                        sql: parsed.sql,
                        source: SqlSource::Generated,
                    }),
                    parsed.reasoning.unwrap_or_else(|| "SQL generated".to_string()),
                )
                .with_llm(Some(response.provider))
            }
            Err(err) => self
                .recoverable(stage, state, StageFailure::from(&err))
                .with_llm(Some(response.provider)),
        }
    }

    fn validate(&self, state: &mut PipelineState, schema: &SchemaContext) -> StageOutput {
        let stage = Stage::SafetyValidation;
        let Some(sql) = state.last_sql.clone() else {
            let failure = StageFailure::new(ErrorKind::InvalidFormat, "No SQL to validate");
            return self.abort(stage, state, failure);
        };

        let report = self.guards.run(&sql, &schema.graph);
        if report.passed {
            return StageOutput::new(
                stage,
                StageStatus::Ok,
                StagePayload::Validation(report),
                "Safety and join checks passed",
            );
        }

        let kind = report
            .failed_guard()
            .map(ErrorKind::from)
            .unwrap_or(ErrorKind::SafetyViolation);
        let failure = StageFailure::new(kind, report.feedback());
        state.last_error = Some(failure.clone());

        if state.can_retry(self.config.pipeline.max_retries) {
            debug!("[{}] Guards rejected SQL: {}", state.short_id(), failure);
            return StageOutput::new(
                stage,
                StageStatus::Retry,
                StagePayload::Validation(report),
                failure.message,
            );
        }

        warn!("[{}] SQL blocked: {}", state.short_id(), failure);
        state.halt(TerminalStatus::Blocked, failure.clone());
        StageOutput::new(
            stage,
            StageStatus::Blocked,
            StagePayload::Validation(report),
            failure.message,
        )
    }

    async fn execute(&self, state: &mut PipelineState, token: &CancellationToken) -> StageOutput {
        let stage = Stage::Execution;
        let Some(sql) = state.last_sql.clone() else {
            let failure = StageFailure::new(ErrorKind::ExecutionError, "No SQL to execute");
            return self.abort(stage, state, failure);
        };

        let timeout_secs = self.config.database.execution_timeout_secs;
        let timeout = Duration::from_secs(timeout_secs);
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = tokio::time::timeout(timeout, self.database.execute(&sql)) => Some(result),
        };
        let Some(outcome) = outcome else {
            return self.abort(stage, state, StageFailure::cancelled());
        };

        match outcome {
            Ok(Ok(rows)) => {
                let payload = StagePayload::Execution(ExecutionPayload {
                    columns: rows.columns.clone(),
                    row_count: rows.len(),
                    truncated: rows.truncated,
                });

                if rows.is_empty()
                    && self.config.pipeline.retry_on_empty_result
                    && state.can_retry(self.config.pipeline.max_retries)
                {
                    let failure = StageFailure::new(
                        ErrorKind::ExecutionError,
                        "Query returned no rows; check the filters and join conditions",
                    );
                    state.last_error = Some(failure.clone());
                    return StageOutput::new(stage, StageStatus::Retry, payload, failure.message);
                }

                let reasoning = if rows.is_empty() {
                    "Query returned no rows".to_string()
                } else {
                    format!(
                        "{} row(s){}",
                        rows.len(),
                        if rows.truncated { ", truncated" } else { "" }
                    )
                };
                state.rows = Some(rows);
                StageOutput::new(stage, StageStatus::Ok, payload, reasoning)
            }
            Ok(Err(err)) => {
                let failure = StageFailure::new(ErrorKind::ExecutionError, err.to_string());
                self.recoverable(stage, state, failure)
            }
            Err(_) => {
                let failure = StageFailure::new(
                    ErrorKind::ExecutionError,
                    format!("Query timed out after {}s", timeout_secs),
                );
                self.recoverable(stage, state, failure)
            }
        }
    }

    async fn correct(
        &self,
        state: &mut PipelineState,
        schema: &SchemaContext,
        token: &CancellationToken,
    ) -> StageOutput {
        let stage = Stage::Correction;
        state.correction_attempts += 1;
        let attempt = state.correction_attempts;
        let error = state.last_error.clone().unwrap_or_else(|| {
            StageFailure::new(ErrorKind::ExecutionError, "Previous SQL was rejected")
        });
        let sql = state.last_sql.clone().unwrap_or_default();

        info!(
            "[{}] Correction attempt {}/{}: {}",
            state.short_id(),
            attempt,
            self.config.pipeline.max_retries,
            error
        );

        let request = prompts::correction_request(
            &state.question,
            schema,
            &sql,
            &error,
            attempt,
            &self.config.safety,
        );
        let calls_before = state.budget.calls_made;
        let response = match self.call_llm(state, request, token).await {
            Ok(response) => response,
            Err(failure) => return self.gateway_failure(stage, state, failure, calls_before),
        };

        match payloads::parse_sql(&response.text, &self.keys().correction) {
            Ok(parsed) => {
                state.pending_sql = Some(parsed.sql.clone());
                let reasoning = parsed
                    .reasoning
                    .clone()
                    .unwrap_or_else(|| format!("Corrected after {}", error.kind));
                StageOutput::new(
                    stage,
                    StageStatus::Ok,
                    StagePayload::Correction(CorrectionPayload {
                        attempt,
                        error: error.message,
                        corrected_sql: Some(parsed.sql),
                        explanation: parsed.reasoning,
                    }),
                    reasoning,
                )
                .with_llm(Some(response.provider))
            }
            Err(err) => StageOutput::new(
                stage,
                StageStatus::Retry,
                StagePayload::Correction(CorrectionPayload {
                    attempt,
                    error: error.message,
                    corrected_sql: None,
                    explanation: Some(format!("Unusable correction response: {}", err)),
                }),
                "Correction response unusable; regenerating SQL",
            )
            .with_llm(Some(response.provider)),
        }
    }

    /// Settle the terminal status if no stage has yet.
    fn resolve_terminal(&self, state: &mut PipelineState) -> TerminalStatus {
        if let Some(status) = state.terminal {
            return status;
        }
        let status = match state.intent_kind() {
            Some(Intent::Ambiguous) => TerminalStatus::Clarification,
            _ if state.schema_answer.is_some() || state.rows.is_some() => TerminalStatus::Success,
            _ => {
                if state.last_error.is_none() {
                    state.last_error = Some(StageFailure::new(
                        ErrorKind::ExecutionError,
                        "Pipeline ended without a result",
                    ));
                }
                TerminalStatus::Failed
            }
        };
        state.terminal = Some(status);
        status
    }

    async fn synthesize(&self, state: &mut PipelineState, token: &CancellationToken) -> StageOutput {
        let stage = Stage::ResponseSynthesis;
        let terminal = self.resolve_terminal(state);

        let (status, answer, provider) = match terminal {
            TerminalStatus::Clarification => (
                StageStatus::Ambiguous,
                answers::clarification(state.intent.as_ref(), &state.question),
                None,
            ),
            TerminalStatus::Success => {
                if let Some(schema_answer) = &state.schema_answer {
                    (StageStatus::Ok, schema_answer.answer.clone(), None)
                } else {
                    let (answer, provider) = self.phrase_rows(state, token).await;
                    (StageStatus::Ok, answer, provider)
                }
            }
            TerminalStatus::Blocked | TerminalStatus::Failed | TerminalStatus::Cancelled => {
                let status = if terminal == TerminalStatus::Blocked {
                    StageStatus::Blocked
                } else {
                    StageStatus::Error
                };
                (
                    status,
                    answers::explain_failure(
                        terminal,
                        state.last_error.as_ref(),
                        state.last_sql.as_deref(),
                    ),
                    None,
                )
            }
        };

        state.answer = Some(answer.clone());
        let llm_generated = provider.is_some();
        let output = StageOutput::new(
            stage,
            status,
            StagePayload::Answer(AnswerPayload {
                answer,
                llm_generated,
            }),
            format!("Query {}", terminal),
        );
        if llm_generated {
            output.with_llm(provider)
        } else {
            output
        }
    }

    /// Phrase a successful result, with one LLM call when allowed. Any
    /// failure falls back to the deterministic summary.
    async fn phrase_rows(
        &self,
        state: &mut PipelineState,
        token: &CancellationToken,
    ) -> (String, Option<String>) {
        let Some(rows) = state.rows.clone() else {
            return (answers::summarize_rows(&Default::default()), None);
        };
        let fallback = answers::summarize_rows(&rows);

        if rows.is_empty()
            || !self.config.pipeline.llm_synthesis
            || !state.budget.has_remaining()
            || token.is_cancelled()
        {
            return (fallback, None);
        }

        let sql = state.last_sql.clone().unwrap_or_default();
        let request = prompts::synthesis_request(&state.question, &sql, &rows);
        match self.call_llm(state, request, token).await {
            Ok(response) => match payloads::parse_answer(&response.text, &self.keys().answer) {
                Ok(answer) => (answer, Some(response.provider)),
                Err(err) => {
                    warn!("[{}] Unusable synthesis response: {}", state.short_id(), err);
                    (fallback, None)
                }
            },
            Err(failure) => {
                warn!("[{}] Synthesis call failed: {}", state.short_id(), failure);
                (fallback, None)
            }
        }
    }

    fn finish(&self, state: PipelineState) -> PipelineResult {
        let status = state.terminal.unwrap_or(TerminalStatus::Failed);
        let error = match status {
            TerminalStatus::Success | TerminalStatus::Clarification => None,
            _ => state.last_error.clone(),
        };

        match status {
            TerminalStatus::Success | TerminalStatus::Clarification => info!(
                "[{}] Query finished: {} ({} LLM call(s), {} correction(s))",
                state.short_id(),
                status,
                state.llm_calls(),
                state.correction_attempts
            ),
            _ => error!(
                "[{}] Query finished: {}{}",
                state.short_id(),
                status,
                error
                    .as_ref()
                    .map(|e| format!(" - {}", e))
                    .unwrap_or_default()
            ),
        }

        PipelineResult {
            llm_calls: state.llm_calls(),
            tokens_used: state.budget.tokens_used,
            correction_attempts: state.correction_attempts,
            query_id: state.query_id,
            question: state.question,
            status,
            answer: state.answer.unwrap_or_default(),
            sql: state.last_sql,
            rows: state.rows,
            error,
            trace: state.trace,
        }
    }
}
