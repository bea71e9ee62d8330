//! Pipeline Controller Integration Tests
//!
//! End-to-end runs of `QueryPipeline` against an in-memory SQLite database
//! with scripted model replies:
//! - Routing for data, meta and ambiguous questions
//! - The bounded correction loop (execution errors, guard rejections, empty results)
//! - Budget, rate-limit, quota and cancellation outcomes
//! - Trace bookkeeping

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use query_cascade::models::pipeline::{
    ErrorKind, SqlSource, Stage, StagePayload, StageStatus, TerminalStatus,
};
use query_cascade::{QueryPipeline, SqliteDatabase};
use query_cascade_core::QueryDatabase;
use query_cascade_llm::KeyPool;

use crate::support::*;

const GOOD_SQL: &str = "SELECT COUNT(*) AS AlbumCount FROM Album al \
    JOIN Artist ar ON al.ArtistId = ar.ArtistId WHERE ar.Name = 'AC/DC' LIMIT 1";
const BAD_COLUMN_SQL: &str = "SELECT Titel FROM Album LIMIT 5";
const SKIPPED_HOP_SQL: &str =
    "SELECT t.Name FROM Artist a JOIN Track t ON t.AlbumId = a.ArtistId LIMIT 10";
const IMPLICIT_SKIPPED_HOP_SQL: &str = "SELECT t.Name FROM Artist ar, Track t \
    WHERE t.AlbumId = ar.ArtistId AND ar.Name = 'AC/DC' LIMIT 10";
const EMPTY_SQL: &str = "SELECT al.Title FROM Album al JOIN Artist ar ON al.ArtistId = ar.ArtistId \
    WHERE ar.Name = 'Aerosmith' LIMIT 10";

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_data_question_happy_path() {
    let provider = MockProvider::new(
        "mock",
        vec![
            data_intent("Count albums by AC/DC"),
            sql(GOOD_SQL),
            answer("AC/DC has 2 albums."),
        ],
    );
    let pipeline = pipeline(test_config(), &provider).await;

    let result = pipeline.run("How many albums does AC/DC have?").await;

    assert_eq!(result.status, TerminalStatus::Success);
    assert_eq!(result.answer, "AC/DC has 2 albums.");
    assert_eq!(result.sql.as_deref(), Some(GOOD_SQL));
    assert_eq!(result.rows.as_ref().unwrap().rows[0][0], serde_json::json!(2));
    assert!(result.error.is_none());
    assert_eq!(
        result.stages(),
        vec![
            Stage::IntentAnalysis,
            Stage::Planning,
            Stage::SqlGeneration,
            Stage::SafetyValidation,
            Stage::Execution,
            Stage::ResponseSynthesis,
        ]
    );

    // Batched planning spends no call of its own
    assert!(!result.trace[1].llm_call);
    assert_eq!(result.llm_calls, 3);
    assert_eq!(result.llm_stage_count(), 3);
    assert_eq!(result.tokens_used, 90);
    assert_eq!(result.correction_attempts, 0);
    assert_eq!(result.trace[0].provider.as_deref(), Some("mock"));

    // Prompts carry the schema and its relationships
    let prompts = provider.prompts();
    assert!(prompts[0].contains("Album.ArtistId -> Artist.ArtistId"));
    assert!(prompts[1].contains("1. Count albums by AC/DC"));
}

#[tokio::test]
async fn test_unbatched_planning_spends_a_call() {
    let mut config = test_config();
    config.pipeline.batch_intent_and_plan = false;
    let provider = MockProvider::new(
        "mock",
        vec![
            reply(r#"{"intent": "data", "summary": "count albums", "tables": ["Album"]}"#),
            reply(r#"{"plan": ["Count rows in Album"], "tables": ["Album"]}"#),
            sql("SELECT COUNT(*) AS Albums FROM Album LIMIT 1"),
            answer("There are 4 albums."),
        ],
    );
    let pipeline = pipeline(config, &provider).await;

    let result = pipeline.run("How many albums are there?").await;

    assert!(result.is_success());
    assert!(result.trace[1].llm_call);
    assert_eq!(result.llm_calls, 4);
    let prompts = provider.prompts();
    assert!(!prompts[0].contains("\"plan\""));
    assert!(prompts[2].contains("1. Count rows in Album"));
}

#[tokio::test]
async fn test_meta_question_is_answered_from_schema() {
    let provider = MockProvider::new(
        "mock",
        vec![reply(
            r#"{"intent": "meta", "summary": "columns of Track", "tables": ["Track"]}"#,
        )],
    );
    let pipeline = pipeline(test_config(), &provider).await;

    let result = pipeline.run("What columns does the Track table have?").await;

    assert_eq!(result.status, TerminalStatus::Success);
    assert_eq!(
        result.stages(),
        vec![
            Stage::IntentAnalysis,
            Stage::SchemaIntrospection,
            Stage::ResponseSynthesis
        ]
    );
    assert!(result
        .answer
        .contains("Track has columns: TrackId (INTEGER, primary key)"));
    assert!(result.answer.contains("Track.GenreId = Genre.GenreId"));
    assert!(result.sql.is_none());
    assert_eq!(result.llm_calls, 1);
}

#[tokio::test]
async fn test_ambiguous_question_asks_for_clarification() {
    let provider = MockProvider::new(
        "mock",
        vec![reply(
            r#"{"intent": "ambiguous", "clarification": "Which artist do you mean?"}"#,
        )],
    );
    let pipeline = pipeline(test_config(), &provider).await;

    let result = pipeline.run("Show me the best ones").await;

    assert_eq!(result.status, TerminalStatus::Clarification);
    assert_eq!(result.answer, "Which artist do you mean?");
    assert_eq!(result.trace[0].status, StageStatus::Ambiguous);
    assert_eq!(result.trace[1].status, StageStatus::Ambiguous);
    assert_eq!(result.trace.len(), 2);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_unparseable_intent_is_asked_again() {
    let provider = MockProvider::new(
        "mock",
        vec![
            reply("I think this is a data question about albums."),
            data_intent("Count albums by AC/DC"),
            sql(GOOD_SQL),
            answer("AC/DC has 2 albums."),
        ],
    );
    let pipeline = pipeline(test_config(), &provider).await;

    let result = pipeline.run("How many albums does AC/DC have?").await;

    assert_eq!(result.status, TerminalStatus::Success);
    assert_eq!(result.answer, "AC/DC has 2 albums.");
    assert_eq!(result.correction_attempts, 1);
    assert_eq!(result.llm_calls, 4);
    assert_eq!(provider.remaining(), 0);
    assert_eq!(
        result.stages(),
        vec![
            Stage::IntentAnalysis,
            Stage::IntentAnalysis,
            Stage::Planning,
            Stage::SqlGeneration,
            Stage::SafetyValidation,
            Stage::Execution,
            Stage::ResponseSynthesis,
        ]
    );

    let first = &result.trace[0];
    assert_eq!(first.status, StageStatus::Retry);
    assert!(first.llm_call);
    assert_eq!(
        first.failure_payload().map(|f| f.kind),
        Some(ErrorKind::InvalidFormat)
    );
    assert!(provider.prompts()[1].contains("Your previous reply could not be used (invalid_format)"));
}

#[tokio::test]
async fn test_unparseable_intent_fails_when_retries_run_out() {
    let mut config = test_config();
    config.pipeline.max_retries = 1;
    let provider = MockProvider::new(
        "mock",
        vec![
            reply("I am not sure what you mean."),
            reply("Still not sure."),
        ],
    );
    let pipeline = pipeline(config, &provider).await;

    let result = pipeline.run("???").await;

    assert_eq!(result.status, TerminalStatus::Failed);
    assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::MaxRetriesExceeded);
    assert_eq!(result.correction_attempts, 1);
    assert_eq!(result.llm_calls, 2);
    assert_eq!(
        result.stages(),
        vec![
            Stage::IntentAnalysis,
            Stage::IntentAnalysis,
            Stage::ResponseSynthesis
        ]
    );
}

#[tokio::test]
async fn test_unparseable_intent_without_retries_fails() {
    let mut config = test_config();
    config.pipeline.max_retries = 0;
    let provider = MockProvider::new("mock", vec![reply("I am not sure what you mean.")]);
    let pipeline = pipeline(config, &provider).await;

    let result = pipeline.run("???").await;

    assert_eq!(result.status, TerminalStatus::Failed);
    assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::InvalidFormat);
    assert_eq!(
        result.stages(),
        vec![Stage::IntentAnalysis, Stage::ResponseSynthesis]
    );
}

#[tokio::test]
async fn test_unparseable_plan_is_asked_again() {
    let mut config = test_config();
    config.pipeline.batch_intent_and_plan = false;
    let provider = MockProvider::new(
        "mock",
        vec![
            reply(r#"{"intent": "data", "summary": "count albums", "tables": ["Album"]}"#),
            reply("Here is my plan: count the albums."),
            reply(r#"{"plan": ["Count rows in Album"], "tables": ["Album"]}"#),
            sql("SELECT COUNT(*) AS Albums FROM Album LIMIT 1"),
            answer("There are 4 albums."),
        ],
    );
    let pipeline = pipeline(config, &provider).await;

    let result = pipeline.run("How many albums are there?").await;

    assert!(result.is_success());
    assert_eq!(result.correction_attempts, 1);
    assert_eq!(result.llm_calls, 5);
    assert_eq!(
        result.stages(),
        vec![
            Stage::IntentAnalysis,
            Stage::Planning,
            Stage::Planning,
            Stage::SqlGeneration,
            Stage::SafetyValidation,
            Stage::Execution,
            Stage::ResponseSynthesis,
        ]
    );
    assert_eq!(result.trace[1].status, StageStatus::Retry);
    assert_eq!(result.trace[2].status, StageStatus::Ok);

    let prompts = provider.prompts();
    assert!(prompts[2].contains("Your previous reply could not be used"));
    assert!(prompts[3].contains("1. Count rows in Album"));
}

// ============================================================================
// Correction loop
// ============================================================================

#[tokio::test]
async fn test_execution_error_is_corrected() {
    let provider = MockProvider::new(
        "mock",
        vec![
            data_intent("List album titles"),
            sql(BAD_COLUMN_SQL),
            correction("SELECT Title FROM Album ORDER BY AlbumId LIMIT 5"),
            answer("There are four albums."),
        ],
    );
    let pipeline = pipeline(test_config(), &provider).await;

    let result = pipeline.run("List album titles").await;

    assert!(result.is_success());
    assert_eq!(result.correction_attempts, 1);
    assert_eq!(result.llm_calls, 4);
    assert_eq!(result.rows.as_ref().unwrap().len(), 4);
    assert_eq!(
        result.stages(),
        vec![
            Stage::IntentAnalysis,
            Stage::Planning,
            Stage::SqlGeneration,
            Stage::SafetyValidation,
            Stage::Execution,
            Stage::Correction,
            Stage::SqlGeneration,
            Stage::SafetyValidation,
            Stage::Execution,
            Stage::ResponseSynthesis,
        ]
    );
    assert_eq!(result.trace[4].status, StageStatus::Retry);

    // The corrected statement is adopted without another call
    let adopted = &result.trace[6];
    assert!(!adopted.llm_call);
    match &adopted.payload {
        StagePayload::Sql(payload) => assert_eq!(payload.source, SqlSource::Corrected),
        other => panic!("unexpected payload: {:?}", other),
    }

    // The database error was fed back to the model
    assert!(provider.prompts()[2].contains("no such column: Titel"));
}

#[tokio::test]
async fn test_unparseable_sql_goes_through_correction() {
    let provider = MockProvider::new(
        "mock",
        vec![
            data_intent("Count albums"),
            reply("Sorry, I can't write that query."),
            correction("SELECT COUNT(*) AS Albums FROM Album LIMIT 1"),
            answer("There are 4 albums."),
        ],
    );
    let pipeline = pipeline(test_config(), &provider).await;

    let result = pipeline.run("How many albums?").await;

    assert!(result.is_success());
    let generation = &result.trace[2];
    assert_eq!(generation.status, StageStatus::Retry);
    assert!(generation.llm_call);
    assert_eq!(
        generation.failure_payload().map(|f| f.kind),
        Some(ErrorKind::InvalidFormat)
    );
}

#[tokio::test]
async fn test_invalid_join_is_blocked_when_retries_run_out() {
    let mut config = test_config();
    config.pipeline.max_retries = 1;
    let provider = MockProvider::new(
        "mock",
        vec![
            data_intent("Tracks by artist"),
            sql(SKIPPED_HOP_SQL),
            correction(SKIPPED_HOP_SQL),
        ],
    );
    let pipeline = pipeline(config, &provider).await;

    let result = pipeline.run("Which tracks did AC/DC record?").await;

    assert_eq!(result.status, TerminalStatus::Blocked);
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::JoinInvalid);
    assert!(error.message.contains("Track -> Album -> Artist"));
    assert!(result.answer.contains("blocked"));
    assert!(result.rows.is_none());

    assert_eq!(result.trace[3].status, StageStatus::Retry);
    let last_validation = &result.trace[result.trace.len() - 2];
    assert_eq!(last_validation.stage, Stage::SafetyValidation);
    assert_eq!(last_validation.status, StageStatus::Blocked);
    assert_eq!(
        result.trace.last().map(|o| o.status),
        Some(StageStatus::Blocked)
    );

    // The suggested path reached the correction prompt
    assert!(provider.prompts()[2].contains("suggested path: Track -> Album -> Artist"));
    assert_eq!(result.llm_calls, 3);
}

#[tokio::test]
async fn test_implicit_join_is_checked_against_foreign_keys() {
    let provider = MockProvider::new(
        "mock",
        vec![
            data_intent("Tracks by artist"),
            sql(IMPLICIT_SKIPPED_HOP_SQL),
            correction(
                "SELECT t.Name FROM Artist ar, Album al, Track t \
                 WHERE al.ArtistId = ar.ArtistId AND t.AlbumId = al.AlbumId \
                 AND ar.Name = 'AC/DC' ORDER BY t.TrackId LIMIT 10",
            ),
            answer("AC/DC recorded two of these tracks."),
        ],
    );
    let pipeline = pipeline(test_config(), &provider).await;

    let result = pipeline.run("Which tracks did AC/DC record?").await;

    assert!(result.is_success());
    assert_eq!(result.correction_attempts, 1);
    assert_eq!(result.rows.as_ref().unwrap().len(), 2);
    assert_eq!(
        result.stages(),
        vec![
            Stage::IntentAnalysis,
            Stage::Planning,
            Stage::SqlGeneration,
            Stage::SafetyValidation,
            Stage::Correction,
            Stage::SqlGeneration,
            Stage::SafetyValidation,
            Stage::Execution,
            Stage::ResponseSynthesis,
        ]
    );
    assert_eq!(result.trace[3].status, StageStatus::Retry);
    assert!(provider.prompts()[2].contains("Track.AlbumId = Artist.ArtistId"));
}

#[tokio::test]
async fn test_unsafe_sql_without_retries_is_never_executed() {
    let mut config = test_config();
    config.pipeline.max_retries = 0;
    let db = SqliteDatabase::new_in_memory(100).unwrap();
    db.execute_batch(CHINOOK).unwrap();
    let provider = MockProvider::new(
        "mock",
        vec![data_intent("Remove tracks"), sql("DELETE FROM Track")],
    );
    let gateway = gateway(
        vec![(provider.clone(), KeyPool::new("mock", keys(1)))],
        &config,
    );
    let pipeline = QueryPipeline::new(config, gateway, Arc::new(db.clone()))
        .await
        .unwrap();

    let result = pipeline.run("Delete every track").await;

    assert_eq!(result.status, TerminalStatus::Blocked);
    assert_eq!(
        result.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::SafetyViolation)
    );
    assert!(!result.stages().contains(&Stage::Execution));
    assert!(!result.stages().contains(&Stage::Correction));

    let rows = db.execute("SELECT COUNT(*) FROM Track").await.unwrap();
    assert_eq!(rows.rows[0][0], serde_json::json!(4));
}

#[tokio::test]
async fn test_max_retries_exceeded() {
    let mut config = test_config();
    config.pipeline.max_retries = 2;
    config.gateway.max_calls_per_query = 10;
    let provider = MockProvider::new(
        "mock",
        vec![
            data_intent("List titles"),
            sql(BAD_COLUMN_SQL),
            correction(BAD_COLUMN_SQL),
            correction(BAD_COLUMN_SQL),
        ],
    );
    let pipeline = pipeline(config, &provider).await;

    let result = pipeline.run("List album titles").await;

    assert_eq!(result.status, TerminalStatus::Failed);
    assert_eq!(result.correction_attempts, 2);
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::MaxRetriesExceeded);
    assert!(error.message.contains("no such column"));
    let corrections = result
        .stages()
        .into_iter()
        .filter(|s| *s == Stage::Correction)
        .count();
    assert_eq!(corrections, 2);
    assert_eq!(result.llm_calls, 4);
    assert!(result.answer.contains("Last SQL: SELECT Titel FROM Album LIMIT 5"));
}

#[tokio::test]
async fn test_empty_result_triggers_correction() {
    let provider = MockProvider::new(
        "mock",
        vec![
            data_intent("Albums by Aerosmith"),
            sql(EMPTY_SQL),
            correction("SELECT ar.Name FROM Artist ar WHERE ar.Name LIKE 'Aero%' LIMIT 10"),
            answer("Aerosmith has no albums in the catalog."),
        ],
    );
    let pipeline = pipeline(test_config(), &provider).await;

    let result = pipeline.run("Which albums did Aerosmith release?").await;

    assert!(result.is_success());
    assert_eq!(result.trace[4].status, StageStatus::Retry);
    assert_eq!(result.correction_attempts, 1);
    assert!(provider.prompts()[2].contains("Query returned no rows"));
}

#[tokio::test]
async fn test_empty_result_accepted_when_not_retrying() {
    let mut config = test_config();
    config.pipeline.retry_on_empty_result = false;
    let provider = MockProvider::new(
        "mock",
        vec![data_intent("Albums by Aerosmith"), sql(EMPTY_SQL)],
    );
    let pipeline = pipeline(config, &provider).await;

    let result = pipeline.run("Which albums did Aerosmith release?").await;

    assert!(result.is_success());
    assert_eq!(result.answer, "No matching rows were found.");
    // No synthesis call for an empty result
    assert_eq!(result.llm_calls, 2);
}

// ============================================================================
// Gateway outcomes
// ============================================================================

#[tokio::test]
async fn test_budget_exhaustion_ends_the_query() {
    let mut config = test_config();
    config.gateway.max_calls_per_query = 3;
    let provider = MockProvider::new(
        "mock",
        vec![
            data_intent("List titles"),
            sql(BAD_COLUMN_SQL),
            correction(BAD_COLUMN_SQL),
            correction("SELECT Title FROM Album LIMIT 5"),
        ],
    );
    let pipeline = pipeline(config, &provider).await;

    let result = pipeline.run("List album titles").await;

    assert_eq!(result.status, TerminalStatus::Failed);
    assert_eq!(
        result.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::BudgetExceeded)
    );
    assert_eq!(result.llm_calls, 3);
    assert_eq!(provider.calls(), 3);
    assert_eq!(provider.remaining(), 1);

    let failed = &result.trace[result.trace.len() - 2];
    assert_eq!(failed.stage, Stage::Correction);
    assert_eq!(failed.status, StageStatus::Error);
    assert!(!failed.llm_call);
}

#[tokio::test]
async fn test_quota_falls_back_to_next_provider() {
    let config = test_config();
    let primary = MockProvider::new("primary", vec![quota(), quota()]);
    let backup = MockProvider::new(
        "backup",
        vec![data_intent("Count"), sql(GOOD_SQL), answer("Two albums.")],
    );
    let gateway = gateway(
        vec![
            (primary.clone(), KeyPool::new("primary", keys(2))),
            (backup.clone(), KeyPool::keyless("backup")),
        ],
        &config,
    );
    let pipeline = QueryPipeline::new(config, gateway.clone(), chinook())
        .await
        .unwrap();

    let result = pipeline.run("How many albums does AC/DC have?").await;

    assert!(result.is_success());
    assert_eq!(result.llm_calls, 3);
    assert_eq!(
        primary.keys_seen(),
        vec![Some("sk-test-1".to_string()), Some("sk-test-2".to_string())]
    );
    assert!(result
        .trace
        .iter()
        .filter(|o| o.llm_call)
        .all(|o| o.provider.as_deref() == Some("backup")));

    let status = gateway.provider_status();
    assert_eq!(status[0].exhausted_keys, 2);
    assert_eq!(status[1].exhausted_keys, 0);
}

#[tokio::test]
async fn test_all_keys_exhausted_fails_with_quota_error() {
    let provider = MockProvider::new("mock", vec![quota(), quota()]);
    let config = test_config();
    let gateway = gateway(
        vec![(provider.clone(), KeyPool::new("mock", keys(2)))],
        &config,
    );
    let pipeline = QueryPipeline::new(config, gateway, chinook()).await.unwrap();

    let result = pipeline.run("How many albums?").await;

    assert_eq!(result.status, TerminalStatus::Failed);
    assert_eq!(
        result.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::ProviderQuotaExceeded)
    );
    assert_eq!(
        result.stages(),
        vec![Stage::IntentAnalysis, Stage::ResponseSynthesis]
    );
    assert_eq!(result.llm_calls, 1);
}

#[tokio::test]
async fn test_provider_failure_is_terminal() {
    let provider = MockProvider::new("mock", vec![server_error()]);
    let pipeline = pipeline(test_config(), &provider).await;

    let result = pipeline.run("How many albums?").await;

    assert_eq!(result.status, TerminalStatus::Failed);
    assert_eq!(
        result.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::ProviderFailure)
    );
}

#[tokio::test]
async fn test_rate_limited_synthesis_falls_back_to_summary() {
    let mut config = test_config();
    config.gateway.rate_limit.max_requests = 2;
    let provider = MockProvider::new(
        "mock",
        vec![data_intent("Count"), sql(GOOD_SQL), answer("unused")],
    );
    let pipeline = pipeline(config, &provider).await;

    let result = pipeline.run("How many albums does AC/DC have?").await;

    assert_eq!(result.status, TerminalStatus::Success);
    assert_eq!(result.answer, "AlbumCount: 2");
    let synthesis = result.trace.last().unwrap();
    assert!(!synthesis.llm_call);
    match &synthesis.payload {
        StagePayload::Answer(payload) => assert!(!payload.llm_generated),
        other => panic!("unexpected payload: {:?}", other),
    }
    assert_eq!(result.llm_calls, 2);
    assert_eq!(provider.remaining(), 1);
}

#[tokio::test]
async fn test_rate_limit_during_generation_fails_the_query() {
    let mut config = test_config();
    config.gateway.rate_limit.max_requests = 1;
    let provider = MockProvider::new("mock", vec![data_intent("Count"), sql(GOOD_SQL)]);
    let pipeline = pipeline(config, &provider).await;

    let result = pipeline.run("How many albums does AC/DC have?").await;

    assert_eq!(result.status, TerminalStatus::Failed);
    assert_eq!(
        result.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::RateLimited)
    );
    assert_eq!(
        result.stages(),
        vec![
            Stage::IntentAnalysis,
            Stage::Planning,
            Stage::SqlGeneration,
            Stage::ResponseSynthesis
        ]
    );
    assert_eq!(provider.calls(), 1);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_before_start() {
    let provider = MockProvider::new("mock", vec![data_intent("Count")]);
    let pipeline = pipeline(test_config(), &provider).await;
    let token = CancellationToken::new();
    token.cancel();

    let result = pipeline.run_with_cancellation("How many albums?", token).await;

    assert_eq!(result.status, TerminalStatus::Cancelled);
    assert_eq!(result.answer, "The query was cancelled before it finished.");
    assert_eq!(
        result.stages(),
        vec![Stage::IntentAnalysis, Stage::ResponseSynthesis]
    );
    assert_eq!(provider.calls(), 0);
    assert_eq!(result.llm_calls, 0);
}

#[tokio::test]
async fn test_cancel_interrupts_a_slow_call() {
    let provider = MockProvider::slow("mock", vec![data_intent("Count")], Duration::from_secs(5));
    let pipeline = pipeline(test_config(), &provider).await;
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let result = pipeline.run_with_cancellation("How many albums?", token).await;

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(result.status, TerminalStatus::Cancelled);
    assert_eq!(
        result.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::Cancelled)
    );
    assert!(result.trace[0].llm_call);
}

// ============================================================================
// Trace & schema
// ============================================================================

#[tokio::test]
async fn test_result_serializes_with_trace() {
    let provider = MockProvider::new(
        "mock",
        vec![data_intent("Count"), sql(GOOD_SQL), answer("Two.")],
    );
    let pipeline = pipeline(test_config(), &provider).await;

    let result = pipeline.run("How many albums does AC/DC have?").await;
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["status"], "success");
    assert_eq!(json["trace"][0]["stage"], "intent_analysis");
    assert_eq!(json["trace"][3]["payload"]["kind"], "validation");
    assert_eq!(json["trace"][3]["payload"]["data"]["passed"], true);
    assert!(result
        .trace
        .windows(2)
        .all(|w| w[0].recorded_at <= w[1].recorded_at));
}

#[tokio::test]
async fn test_reload_schema_picks_up_new_tables() {
    let db = SqliteDatabase::new_in_memory(100).unwrap();
    db.execute_batch(CHINOOK).unwrap();
    let config = test_config();
    let provider = MockProvider::new("mock", Vec::new());
    let gateway = gateway(
        vec![(provider.clone(), KeyPool::new("mock", keys(1)))],
        &config,
    );
    let pipeline = QueryPipeline::new(config, gateway, Arc::new(db.clone()))
        .await
        .unwrap();
    assert!(!pipeline.schema().await.graph.contains_table("Playlist"));

    db.execute_batch(
        "CREATE TABLE Playlist (PlaylistId INTEGER PRIMARY KEY, Name TEXT);
         CREATE TABLE PlaylistTrack (
             PlaylistId INTEGER REFERENCES Playlist(PlaylistId),
             TrackId INTEGER REFERENCES Track(TrackId)
         );",
    )
    .unwrap();
    pipeline.reload_schema().await.unwrap();

    let schema = pipeline.schema().await;
    assert!(schema.graph.contains_table("Playlist"));
    let path = schema.graph.find_path("Playlist", "Album", 3).unwrap();
    assert_eq!(path.describe(), "Playlist -> PlaylistTrack -> Track -> Album");
}
