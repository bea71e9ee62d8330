//! Query Cascade LLM
//!
//! Quota-aware access to language models for the query pipeline:
//! - Provider clients: OpenAI-compatible chat completions, Anthropic, Ollama
//! - Sliding-window rate limiter shared across queries
//! - Per-query call/token budget
//! - Credential pools with rotation on quota failures
//! - The gateway that ties them into an ordered fallback chain

pub mod anthropic;
pub mod budget;
pub mod gateway;
pub mod http_client;
pub mod keys;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod rate_limiter;
pub mod types;

// Re-export main types
pub use anthropic::AnthropicProvider;
pub use budget::{BudgetLimit, CallBudget};
pub use gateway::{
    build_provider, FailureReason, GatewayConfig, GatewayError, GatewayResponse,
    GenerationRequest, LlmGateway, ProviderAttempt, ProviderStatus,
};
pub use http_client::build_http_client;
pub use keys::{KeyPool, KeySelection, ProviderKey};
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
pub use provider::LlmProvider;
pub use rate_limiter::{RateLimitConfig, SlidingWindowLimiter};
pub use types::*;
