//! Settings Models
//!
//! Application configuration stored in config.json.

use std::path::PathBuf;

use query_cascade_guards::SafetyRules;
use query_cascade_llm::{CallBudget, GatewayConfig, ProviderConfig, RateLimitConfig};
use serde::{Deserialize, Serialize};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
    /// Provider chain, tried in order
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub safety: SafetyRules,
}

/// Keys each stage's JSON response must contain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredKeys {
    #[serde(default = "default_intent_keys")]
    pub intent: Vec<String>,
    #[serde(default = "default_plan_keys")]
    pub plan: Vec<String>,
    #[serde(default = "default_sql_keys")]
    pub sql: Vec<String>,
    #[serde(default = "default_sql_keys")]
    pub correction: Vec<String>,
    #[serde(default = "default_answer_keys")]
    pub answer: Vec<String>,
}

fn default_intent_keys() -> Vec<String> {
    vec!["intent".to_string()]
}

fn default_plan_keys() -> Vec<String> {
    vec!["plan".to_string()]
}

fn default_sql_keys() -> Vec<String> {
    vec!["sql".to_string()]
}

fn default_answer_keys() -> Vec<String> {
    vec!["answer".to_string()]
}

impl Default for RequiredKeys {
    fn default() -> Self {
        Self {
            intent: default_intent_keys(),
            plan: default_plan_keys(),
            sql: default_sql_keys(),
            correction: default_sql_keys(),
            answer: default_answer_keys(),
        }
    }
}

/// Pipeline controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Maximum correction attempts per query
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Ask for intent and plan in a single call
    #[serde(default = "default_true")]
    pub batch_intent_and_plan: bool,
    /// Treat an empty result as a failure worth correcting
    #[serde(default = "default_true")]
    pub retry_on_empty_result: bool,
    /// Longest foreign-key path suggested in join diagnostics
    #[serde(default = "default_max_join_hops")]
    pub max_join_hops: usize,
    /// Use one LLM call to phrase successful answers
    #[serde(default = "default_true")]
    pub llm_synthesis: bool,
    #[serde(default)]
    pub required_keys: RequiredKeys,
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_max_join_hops() -> usize {
    3
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            batch_intent_and_plan: true,
            retry_on_empty_result: true,
            max_join_hops: default_max_join_hops(),
            llm_synthesis: true,
            required_keys: RequiredKeys::default(),
        }
    }
}

/// Gateway limits and numeric discipline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default = "default_max_calls_per_query")]
    pub max_calls_per_query: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens_per_query: Option<u32>,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_temperature")]
    pub max_temperature: f32,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_max_calls_per_query() -> u32 {
    5
}

fn default_max_output_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_temperature() -> f32 {
    0.2
}

fn default_call_timeout_secs() -> u64 {
    30
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            max_calls_per_query: default_max_calls_per_query(),
            max_tokens_per_query: None,
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            max_temperature: default_max_temperature(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl GatewaySettings {
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
            max_temperature: self.max_temperature,
            call_timeout_secs: self.call_timeout_secs,
            rate_limit: self.rate_limit.clone(),
        }
    }

    /// Fresh budget for one query.
    pub fn new_budget(&self) -> CallBudget {
        CallBudget::new(self.max_calls_per_query, self.max_tokens_per_query)
    }
}

/// Target database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file; defaults to ~/.query-cascade/query.db
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Rows fetched per query before the result is marked truncated
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_max_rows() -> usize {
    200
}

fn default_execution_timeout_secs() -> u64 {
    15
}

fn default_pool_size() -> u32 {
    4
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: None,
            max_rows: default_max_rows(),
            execution_timeout_secs: default_execution_timeout_secs(),
            pool_size: default_pool_size(),
        }
    }
}

impl AppConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.pipeline.max_retries > 10 {
            return Err("pipeline.max_retries cannot exceed 10".to_string());
        }
        if self.pipeline.max_join_hops == 0 || self.pipeline.max_join_hops > 6 {
            return Err(format!(
                "Invalid pipeline.max_join_hops: {}. Must be between 1 and 6",
                self.pipeline.max_join_hops
            ));
        }

        let gateway = &self.gateway;
        if gateway.max_calls_per_query == 0 {
            return Err("gateway.max_calls_per_query must be at least 1".to_string());
        }
        if gateway.rate_limit.max_requests == 0 || gateway.rate_limit.window_secs == 0 {
            return Err("gateway.rate_limit must allow at least 1 request per window".to_string());
        }
        if gateway.max_output_tokens < 16 {
            return Err("gateway.max_output_tokens must be at least 16".to_string());
        }
        if !(0.0..=2.0).contains(&gateway.max_temperature) {
            return Err(format!(
                "Invalid gateway.max_temperature: {}. Must be between 0.0 and 2.0",
                gateway.max_temperature
            ));
        }
        if gateway.temperature < 0.0 {
            return Err("gateway.temperature cannot be negative".to_string());
        }
        if gateway.call_timeout_secs == 0 {
            return Err("gateway.call_timeout_secs must be at least 1 second".to_string());
        }

        for (i, provider) in self.providers.iter().enumerate() {
            if provider.model.trim().is_empty() {
                return Err(format!("providers[{}] ({}) has no model", i, provider.label()));
            }
        }

        if self.database.max_rows == 0 {
            return Err("database.max_rows must be at least 1".to_string());
        }
        if self.database.pool_size == 0 {
            return Err("database.pool_size must be at least 1".to_string());
        }

        Ok(())
    }
}
