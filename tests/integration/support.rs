//! Shared fixtures: a scripted LLM provider and a small Chinook database.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use query_cascade::models::settings::AppConfig;
use query_cascade::{QueryPipeline, SqliteDatabase};
use query_cascade_core::QueryDatabase;
use query_cascade_llm::{
    CompletionRequest, KeyPool, LlmError, LlmGateway, LlmProvider, LlmResponse, LlmResult,
    ProviderConfig, RateLimitConfig, StopReason, UsageStats,
};

// ============================================================================
// Scripted provider
// ============================================================================

/// Replays scripted outcomes in order and records every prompt it sees.
pub struct MockProvider {
    name: String,
    config: ProviderConfig,
    script: Mutex<VecDeque<LlmResult<String>>>,
    prompts: Mutex<Vec<String>>,
    keys_seen: Mutex<Vec<Option<String>>>,
    delay: Option<Duration>,
}

impl MockProvider {
    pub fn new(name: &str, script: Vec<LlmResult<String>>) -> Arc<Self> {
        Arc::new(Self::build(name, script, None))
    }

    pub fn slow(name: &str, script: Vec<LlmResult<String>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(name, script, Some(delay)))
    }

    fn build(name: &str, script: Vec<LlmResult<String>>, delay: Option<Duration>) -> Self {
        Self {
            name: name.to_string(),
            config: ProviderConfig::default(),
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
            keys_seen: Mutex::new(Vec::new()),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn keys_seen(&self) -> Vec<Option<String>> {
        self.keys_seen.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        api_key: Option<&str>,
    ) -> LlmResult<LlmResponse> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        self.keys_seen
            .lock()
            .unwrap()
            .push(api_key.map(str::to_string));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(LlmError::Other {
                message: "script exhausted".to_string(),
            })
        });
        next.map(|text| LlmResponse {
            content: Some(text),
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

pub fn reply(text: &str) -> LlmResult<String> {
    Ok(text.to_string())
}

pub fn quota() -> LlmResult<String> {
    Err(LlmError::QuotaExceeded {
        message: "insufficient_quota".to_string(),
        status: Some(429),
    })
}

pub fn server_error() -> LlmResult<String> {
    Err(LlmError::ServerError {
        message: "upstream overloaded".to_string(),
        status: Some(503),
    })
}

// Canned model replies
pub fn data_intent(plan: &str) -> LlmResult<String> {
    reply(&format!(
        r#"{{"intent": "data", "summary": "data question", "tables": ["Album", "Artist"], "plan": ["{}"]}}"#,
        plan
    ))
}

pub fn sql(sql: &str) -> LlmResult<String> {
    reply(&serde_json::json!({ "sql": sql, "reasoning": "generated" }).to_string())
}

pub fn correction(sql: &str) -> LlmResult<String> {
    reply(&serde_json::json!({ "sql": sql, "explanation": "fixed" }).to_string())
}

pub fn answer(text: &str) -> LlmResult<String> {
    reply(&serde_json::json!({ "answer": text }).to_string())
}

// ============================================================================
// Gateway & database
// ============================================================================

pub fn keys(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("sk-test-{}", i)).collect()
}

/// Gateway over mock providers, each with its own key pool.
pub fn gateway(
    chain: Vec<(Arc<MockProvider>, KeyPool)>,
    config: &AppConfig,
) -> Arc<LlmGateway> {
    let chain = chain
        .into_iter()
        .map(|(p, pool)| (p as Arc<dyn LlmProvider>, pool))
        .collect();
    Arc::new(LlmGateway::new(chain, config.gateway.gateway_config()))
}

pub const CHINOOK: &str = "
    CREATE TABLE Artist (ArtistId INTEGER PRIMARY KEY, Name NVARCHAR(120));
    CREATE TABLE Album (
        AlbumId INTEGER PRIMARY KEY,
        Title NVARCHAR(160) NOT NULL,
        ArtistId INTEGER NOT NULL REFERENCES Artist(ArtistId)
    );
    CREATE TABLE Genre (GenreId INTEGER PRIMARY KEY, Name NVARCHAR(120));
    CREATE TABLE Track (
        TrackId INTEGER PRIMARY KEY,
        Name NVARCHAR(200) NOT NULL,
        AlbumId INTEGER REFERENCES Album(AlbumId),
        GenreId INTEGER REFERENCES Genre(GenreId),
        Milliseconds INTEGER NOT NULL,
        UnitPrice NUMERIC(10,2) NOT NULL
    );
    INSERT INTO Artist VALUES (1, 'AC/DC'), (2, 'Accept'), (3, 'Aerosmith');
    INSERT INTO Album VALUES
        (1, 'For Those About To Rock We Salute You', 1),
        (2, 'Balls to the Wall', 2),
        (3, 'Restless and Wild', 2),
        (4, 'Let There Be Rock', 1);
    INSERT INTO Genre VALUES (1, 'Rock'), (2, 'Jazz');
    INSERT INTO Track VALUES
        (1, 'For Those About To Rock (We Salute You)', 1, 1, 343719, 0.99),
        (2, 'Balls to the Wall', 2, 1, 342562, 0.99),
        (3, 'Fast As a Shark', 3, 1, 230619, 0.99),
        (4, 'Go Down', 4, 1, 331180, 0.99);
";

pub fn chinook() -> Arc<dyn QueryDatabase> {
    let db = SqliteDatabase::new_in_memory(100).unwrap();
    db.execute_batch(CHINOOK).unwrap();
    Arc::new(db)
}

/// Defaults with a rate limit high enough not to interfere.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.gateway.rate_limit = RateLimitConfig {
        max_requests: 100,
        window_secs: 60,
    };
    config
}

/// Pipeline with a single keyed mock provider.
pub async fn pipeline(config: AppConfig, provider: &Arc<MockProvider>) -> QueryPipeline {
    let gateway = gateway(
        vec![(provider.clone(), KeyPool::new("mock", keys(1)))],
        &config,
    );
    QueryPipeline::new(config, gateway, chinook()).await.unwrap()
}
