//! LLM Gateway
//!
//! The single `generate` entry point the pipeline uses for every model call.
//! Hides quota management behind it:
//!
//! 1. Per-query budget check (calls and optional token cap)
//! 2. Sliding-window rate limit, rejected requests fail fast
//! 3. Ordered provider chain: on a quota failure the active key is marked
//!    exhausted and the same provider is retried with its next key; any other
//!    failure (including a timeout) falls through to the next provider
//! 4. Output-token cap and temperature clamp on every call
//!
//! Shared state (key pools, rate window) sits behind `std::sync::Mutex` and is
//! never held across a provider call.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::anthropic::AnthropicProvider;
use crate::budget::{BudgetLimit, CallBudget};
use crate::keys::{KeyPool, KeySelection};
use crate::ollama::OllamaProvider;
use crate::openai::OpenAIProvider;
use crate::provider::LlmProvider;
use crate::rate_limiter::{RateLimitConfig, SlidingWindowLimiter};
use crate::types::{CompletionRequest, LlmError, ProviderConfig, ProviderType, StopReason, UsageStats};

// ============================================================================
// Configuration
// ============================================================================

/// Numeric discipline and limits applied to every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Hard cap on generated tokens per call
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Temperature used when a request does not set one
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper clamp for any requested temperature
    #[serde(default = "default_max_temperature")]
    pub max_temperature: f32,
    /// Timeout for a single provider call
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Caller-side rate limit
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
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

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            max_temperature: default_max_temperature(),
            call_timeout_secs: default_call_timeout_secs(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

// ============================================================================
// Requests & Responses
// ============================================================================

/// One logical generation request from the pipeline.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Short tag for logs, e.g. the pipeline stage
    pub label: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Why a provider attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Quota,
    Timeout,
    Network,
    Unavailable,
    Server,
    Auth,
    InvalidResponse,
    Other,
}

impl FailureReason {
    pub fn from_error(err: &LlmError) -> Self {
        if err.is_quota() {
            return FailureReason::Quota;
        }
        match err {
            LlmError::Timeout { .. } => FailureReason::Timeout,
            LlmError::NetworkError { .. } => FailureReason::Network,
            LlmError::ProviderUnavailable { .. } | LlmError::ModelNotFound { .. } => {
                FailureReason::Unavailable
            }
            LlmError::ServerError { .. } => FailureReason::Server,
            LlmError::AuthenticationFailed { .. } => FailureReason::Auth,
            LlmError::ParseError { .. } | LlmError::InvalidRequest { .. } => {
                FailureReason::InvalidResponse
            }
            _ => FailureReason::Other,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Quota => write!(f, "quota"),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Network => write!(f, "network"),
            FailureReason::Unavailable => write!(f, "unavailable"),
            FailureReason::Server => write!(f, "server"),
            FailureReason::Auth => write!(f, "auth"),
            FailureReason::InvalidResponse => write!(f, "invalid_response"),
            FailureReason::Other => write!(f, "other"),
        }
    }
}

/// Record of one provider/key attempt within a `generate` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub key_label: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl ProviderAttempt {
    fn success(provider: &str, key_label: &str, duration_ms: u64) -> Self {
        Self {
            provider: provider.to_string(),
            key_label: key_label.to_string(),
            success: true,
            failure_reason: None,
            error_message: None,
            duration_ms,
        }
    }

    fn failure(provider: &str, key_label: &str, err: &LlmError, duration_ms: u64) -> Self {
        Self {
            provider: provider.to_string(),
            key_label: key_label.to_string(),
            success: false,
            failure_reason: Some(FailureReason::from_error(err)),
            error_message: Some(err.to_string()),
            duration_ms,
        }
    }
}

/// Successful generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub key_label: String,
    pub usage: UsageStats,
    pub stop_reason: StopReason,
    /// Every attempt made, the last one is the success
    pub attempts: Vec<ProviderAttempt>,
}

/// Gateway failures. All of them end the current query.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("LLM budget exceeded: {used} of {max} {limit} used")]
    BudgetExceeded {
        limit: BudgetLimit,
        used: u32,
        max: u32,
    },

    #[error("Provider quota exceeded: every provider credential is exhausted")]
    QuotaExhausted { attempts: Vec<ProviderAttempt> },

    #[error("All providers failed: {last_error}")]
    ProviderFailure {
        last_error: String,
        attempts: Vec<ProviderAttempt>,
    },

    #[error("No LLM providers configured")]
    NoProviders,
}

impl GatewayError {
    pub fn attempts(&self) -> &[ProviderAttempt] {
        match self {
            GatewayError::QuotaExhausted { attempts }
            | GatewayError::ProviderFailure { attempts, .. } => attempts,
            _ => &[],
        }
    }
}

/// Snapshot of one provider's credential state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub model: String,
    pub total_keys: usize,
    pub exhausted_keys: usize,
    pub active_key: String,
}

// ============================================================================
// Gateway
// ============================================================================

/// Quota-aware front for an ordered chain of providers.
pub struct LlmGateway {
    providers: Vec<Arc<dyn LlmProvider>>,
    pools: Mutex<Vec<KeyPool>>,
    limiter: SlidingWindowLimiter,
    config: GatewayConfig,
}

impl LlmGateway {
    /// Build a gateway from providers paired with their credential pools, in
    /// fallback order.
    pub fn new(chain: Vec<(Arc<dyn LlmProvider>, KeyPool)>, config: GatewayConfig) -> Self {
        let (providers, pools): (Vec<_>, Vec<_>) = chain.into_iter().unzip();
        let limiter = SlidingWindowLimiter::from_config(&config.rate_limit);
        Self {
            providers,
            pools: Mutex::new(pools),
            limiter,
            config,
        }
    }

    /// Build providers from configuration, in the listed order.
    pub fn from_configs(configs: &[ProviderConfig], config: GatewayConfig) -> Self {
        let chain = configs
            .iter()
            .map(|cfg| {
                let label = cfg.label();
                let pool = if cfg.provider.requires_api_key() {
                    KeyPool::new(&label, cfg.api_keys.clone())
                } else {
                    KeyPool::keyless(&label)
                };
                (build_provider(cfg.clone()), pool)
            })
            .collect();
        Self::new(chain, config)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Credential state of every provider in chain order.
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        let pools = self.lock_pools();
        self.providers
            .iter()
            .zip(pools.iter())
            .map(|(provider, pool)| ProviderStatus {
                provider: provider.name().to_string(),
                model: provider.model().to_string(),
                total_keys: pool.len(),
                exhausted_keys: pool.exhausted_count(),
                active_key: pool.current_label(),
            })
            .collect()
    }

    /// Make every exhausted key usable again. Never called by the pipeline.
    pub fn reset_exhausted_keys(&self) {
        let mut pools = self.lock_pools();
        for pool in pools.iter_mut() {
            pool.reset_exhausted();
        }
        info!("Reset exhausted keys for {} providers", pools.len());
    }

    /// Apply the output-token cap and temperature clamp.
    pub fn completion_request(
        &self,
        request: &GenerationRequest,
        budget: &CallBudget,
    ) -> CompletionRequest {
        let mut max_tokens = request
            .max_tokens
            .unwrap_or(self.config.max_output_tokens)
            .min(self.config.max_output_tokens);
        if let Some(remaining) = budget.remaining_tokens() {
            max_tokens = max_tokens.min(remaining.max(1));
        }

        let temperature = request
            .temperature
            .unwrap_or(self.config.temperature)
            .clamp(0.0, self.config.max_temperature);

        CompletionRequest {
            prompt: request.prompt.clone(),
            system: request.system.clone(),
            max_tokens,
            temperature,
        }
    }

    /// Run one logical generation through budget, rate limit and the
    /// provider chain.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        budget: &mut CallBudget,
    ) -> Result<GatewayResponse, GatewayError> {
        let label = request.label.as_deref().unwrap_or("generate");

        if self.providers.is_empty() {
            return Err(GatewayError::NoProviders);
        }

        if let Err(limit) = budget.check() {
            let (used, max) = match limit {
                BudgetLimit::Calls => (budget.calls_made, budget.max_calls),
                BudgetLimit::Tokens => (budget.tokens_used, budget.max_tokens.unwrap_or(0)),
            };
            warn!("[{}] LLM budget exceeded: {} of {} {}", label, used, max, limit);
            return Err(GatewayError::BudgetExceeded { limit, used, max });
        }

        if let Err(wait) = self.limiter.try_acquire() {
            let retry_after_secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            warn!("[{}] Rate limited, retry after {}s", label, retry_after_secs);
            return Err(GatewayError::RateLimited { retry_after_secs });
        }

        budget.record_call();
        let completion = self.completion_request(request, budget);
        debug!(
            "[{}] prompt {} chars, max_tokens {}, temperature {}",
            label,
            completion.prompt.len(),
            completion.max_tokens,
            completion.temperature
        );

        let timeout = Duration::from_secs(self.config.call_timeout_secs);
        let mut attempts: Vec<ProviderAttempt> = Vec::new();
        let mut last_non_quota: Option<String> = None;

        for (idx, provider) in self.providers.iter().enumerate() {
            loop {
                let Some((key_index, secret, key_label)) = self.select_key(idx) else {
                    debug!("[{}] {} has no usable keys, skipping", label, provider.name());
                    break;
                };

                info!("[{}] Calling {} with key {}", label, provider.name(), key_label);
                let started = Instant::now();
                let outcome =
                    tokio::time::timeout(timeout, provider.complete(&completion, secret.as_deref()))
                        .await
                        .unwrap_or(Err(LlmError::Timeout {
                            seconds: self.config.call_timeout_secs,
                        }));
                let duration_ms = started.elapsed().as_millis() as u64;

                match outcome {
                    Ok(response) => {
                        attempts.push(ProviderAttempt::success(
                            provider.name(),
                            &key_label,
                            duration_ms,
                        ));
                        budget.record_tokens(response.usage.total_tokens());
                        info!(
                            "[{}] {} succeeded in {}ms ({} tokens)",
                            label,
                            provider.name(),
                            duration_ms,
                            response.usage.total_tokens()
                        );
                        return Ok(GatewayResponse {
                            text: response.text().to_string(),
                            provider: provider.name().to_string(),
                            model: response.model,
                            key_label,
                            usage: response.usage,
                            stop_reason: response.stop_reason,
                            attempts,
                        });
                    }
                    Err(err) if err.is_quota() => {
                        attempts.push(ProviderAttempt::failure(
                            provider.name(),
                            &key_label,
                            &err,
                            duration_ms,
                        ));
                        let next = self.lock_pools()[idx].mark_exhausted(key_index);
                        match next {
                            Some(_) => warn!(
                                "[{}] {} key {} exhausted ({}), rotating",
                                label,
                                provider.name(),
                                key_label,
                                err
                            ),
                            None => warn!(
                                "[{}] {} key {} exhausted ({}), no keys left, falling back",
                                label,
                                provider.name(),
                                key_label,
                                err
                            ),
                        }
                    }
                    Err(err) => {
                        attempts.push(ProviderAttempt::failure(
                            provider.name(),
                            &key_label,
                            &err,
                            duration_ms,
                        ));
                        warn!(
                            "[{}] {} failed: {} (reason: {}), falling back",
                            label,
                            provider.name(),
                            err,
                            FailureReason::from_error(&err)
                        );
                        last_non_quota = Some(format!("{}: {}", provider.name(), err));
                        break;
                    }
                }
            }
        }

        match last_non_quota {
            Some(last_error) => {
                error!("[{}] All providers failed, last error: {}", label, last_error);
                Err(GatewayError::ProviderFailure {
                    last_error,
                    attempts,
                })
            }
            None => {
                error!("[{}] Every provider credential is exhausted", label);
                Err(GatewayError::QuotaExhausted { attempts })
            }
        }
    }

    /// Active slot of provider `idx`: (slot index, secret, label).
    fn select_key(&self, idx: usize) -> Option<(usize, Option<String>, String)> {
        let pools = self.lock_pools();
        let pool = pools.get(idx)?;
        let slot = pool.active_index()?;
        match pool.current() {
            KeySelection::Key(key) => Some((slot, Some(key.secret().to_string()), key.label.clone())),
            KeySelection::Keyless => Some((slot, None, pool.current_label())),
            KeySelection::Exhausted => None,
        }
    }

    fn lock_pools(&self) -> MutexGuard<'_, Vec<KeyPool>> {
        self.pools
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Instantiate the client for one provider config.
pub fn build_provider(config: ProviderConfig) -> Arc<dyn LlmProvider> {
    match config.provider {
        ProviderType::OpenAI => Arc::new(OpenAIProvider::new(config)),
        ProviderType::Anthropic => Arc::new(AnthropicProvider::new(config)),
        ProviderType::Ollama => Arc::new(OllamaProvider::new(config)),
    }
}
