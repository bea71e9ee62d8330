//! Gateway Integration Tests
//!
//! Gateway state that outlives a single query:
//! - The sliding-window limiter is shared by every query
//! - Call budgets are per query
//! - Exhausted keys stay exhausted for later queries
//! - Concurrent queries share one gateway safely

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use query_cascade::models::pipeline::{ErrorKind, TerminalStatus};
use query_cascade::QueryPipeline;
use query_cascade_llm::{
    CompletionRequest, KeyPool, LlmGateway, LlmProvider, LlmResponse, LlmResult,
    ProviderConfig, StopReason, UsageStats,
};

use crate::support::*;

/// Answers by looking at which stage the prompt belongs to, so replies stay
/// correct when queries interleave.
struct StageAwareProvider {
    config: ProviderConfig,
    calls: AtomicUsize,
}

impl StageAwareProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            config: ProviderConfig::default(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for StageAwareProvider {
    fn name(&self) -> &str {
        "stage-aware"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        _api_key: Option<&str>,
    ) -> LlmResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let text = if request.prompt.contains("Classify the question") {
            r#"{"intent": "data", "summary": "count", "tables": ["Album"], "plan": ["Count albums"]}"#
        } else if request.prompt.contains("Write the SQL") {
            r#"{"sql": "SELECT COUNT(*) AS Albums FROM Album LIMIT 1"}"#
        } else {
            r#"{"answer": "There are 4 albums."}"#
        };
        Ok(LlmResponse {
            content: Some(text.to_string()),
            stop_reason: StopReason::EndTurn,
            usage: UsageStats {
                input_tokens: 20,
                output_tokens: 10,
            },
            model: "mock-model".to_string(),
        })
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

async fn stage_aware_pipeline(
    config: query_cascade::AppConfig,
    provider: &Arc<StageAwareProvider>,
) -> (QueryPipeline, Arc<LlmGateway>) {
    let gateway = Arc::new(LlmGateway::new(
        vec![(
            provider.clone() as Arc<dyn LlmProvider>,
            KeyPool::keyless("stage-aware"),
        )],
        config.gateway.gateway_config(),
    ));
    let pipeline = QueryPipeline::new(config, gateway.clone(), chinook())
        .await
        .unwrap();
    (pipeline, gateway)
}

#[tokio::test]
async fn test_limiter_is_shared_across_queries() {
    let mut config = test_config();
    config.gateway.rate_limit.max_requests = 4;
    let provider = StageAwareProvider::new();
    let (pipeline, gateway) = stage_aware_pipeline(config, &provider).await;

    let first = pipeline.run("How many albums?").await;
    assert!(first.is_success());
    assert_eq!(first.llm_calls, 3);

    // One slot left in the window: intent succeeds, generation is refused
    let second = pipeline.run("How many albums again?").await;
    assert_eq!(second.status, TerminalStatus::Failed);
    assert_eq!(
        second.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::RateLimited)
    );
    assert_eq!(provider.calls(), 4);
    assert_eq!(gateway.limiter().in_window(), 4);
}

#[tokio::test]
async fn test_budget_is_per_query() {
    let mut config = test_config();
    config.gateway.max_calls_per_query = 3;
    let provider = StageAwareProvider::new();
    let (pipeline, _) = stage_aware_pipeline(config, &provider).await;

    for _ in 0..3 {
        let result = pipeline.run("How many albums?").await;
        assert!(result.is_success());
        assert_eq!(result.llm_calls, 3);
    }
    assert_eq!(provider.calls(), 9);
}

#[tokio::test]
async fn test_concurrent_queries_share_one_gateway() {
    let mut config = test_config();
    config.gateway.rate_limit.max_requests = 6;
    let provider = StageAwareProvider::new();
    let (pipeline, gateway) = stage_aware_pipeline(config, &provider).await;

    let (a, b) = tokio::join!(
        pipeline.run("How many albums?"),
        pipeline.run("Count the albums")
    );

    assert!(a.is_success());
    assert!(b.is_success());
    assert_ne!(a.query_id, b.query_id);
    assert_eq!(a.llm_calls + b.llm_calls, 6);
    assert_eq!(gateway.limiter().in_window(), 6);
}

#[tokio::test]
async fn test_exhausted_keys_persist_between_queries() {
    let config = test_config();
    let primary = MockProvider::new("primary", vec![quota()]);
    let backup = MockProvider::new(
        "backup",
        vec![
            data_intent("Count"),
            sql("SELECT COUNT(*) AS Albums FROM Album LIMIT 1"),
            answer("Four."),
            data_intent("Count"),
            sql("SELECT COUNT(*) AS Albums FROM Album LIMIT 1"),
            answer("Four again."),
        ],
    );
    let gateway = gateway(
        vec![
            (primary.clone(), KeyPool::new("primary", keys(1))),
            (backup.clone(), KeyPool::keyless("backup")),
        ],
        &config,
    );
    let pipeline = QueryPipeline::new(config, gateway.clone(), chinook())
        .await
        .unwrap();

    assert!(pipeline.run("How many albums?").await.is_success());
    let second = pipeline.run("How many albums now?").await;
    assert!(second.is_success());
    assert_eq!(second.answer, "Four again.");

    // The exhausted key was tried once, never again
    assert_eq!(primary.calls(), 1);
    assert_eq!(gateway.provider_status()[0].exhausted_keys, 1);

    gateway.reset_exhausted_keys();
    assert_eq!(gateway.provider_status()[0].exhausted_keys, 0);
}
