//! Ollama Provider
//!
//! Implementation of the LlmProvider trait for Ollama local inference
//! using the ollama-rs native SDK. No API key is needed.

use async_trait::async_trait;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::chat::{ChatMessage, ChatMessageResponse};
use ollama_rs::models::ModelOptions;
use ollama_rs::Ollama;

use crate::provider::LlmProvider;
use crate::types::{
    CompletionRequest, LlmError, LlmResponse, LlmResult, ProviderConfig, StopReason, UsageStats,
};

/// Default Ollama API endpoint
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Ollama provider for local inference
pub struct OllamaProvider {
    config: ProviderConfig,
    label: String,
    client: Ollama,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(OLLAMA_DEFAULT_URL);
        let client = Self::create_client(base_url);
        let label = config.label();
        Self {
            config,
            label,
            client,
        }
    }

    /// Create an Ollama SDK client from a base URL string.
    ///
    /// `Ollama::new()` takes host and port separately; unparseable URLs fall
    /// back to `Ollama::default()`.
    fn create_client(base_url: &str) -> Ollama {
        match url::Url::parse(base_url) {
            Ok(parsed) => {
                let scheme = parsed.scheme();
                let host = parsed.host_str().unwrap_or("localhost");
                let port = parsed.port().unwrap_or(11434);
                Ollama::new(format!("{}://{}", scheme, host), port)
            }
            Err(_) => Ollama::default(),
        }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(OLLAMA_DEFAULT_URL)
    }

    fn build_chat_request(&self, request: &CompletionRequest) -> ChatMessageRequest {
        let mut messages = Vec::new();
        if let Some(sys) = &request.system {
            messages.push(ChatMessage::system(sys.clone()));
        }
        messages.push(ChatMessage::user(request.prompt.clone()));

        let mut opts = ModelOptions::default().temperature(request.temperature);
        if request.max_tokens > 0 {
            opts = opts.num_predict(request.max_tokens as i32);
        }

        ChatMessageRequest::new(self.config.model.clone(), messages).options(opts)
    }

    fn convert_response(&self, response: &ChatMessageResponse, max_tokens: u32) -> LlmResponse {
        let usage = response
            .final_data
            .as_ref()
            .map(|data| UsageStats {
                input_tokens: data.prompt_eval_count as u32,
                output_tokens: data.eval_count as u32,
            })
            .unwrap_or_default();

        // Ollama does not report a finish reason; hitting num_predict is the
        // only way generation stops at the cap.
        let stop_reason = if max_tokens > 0 && usage.output_tokens >= max_tokens {
            StopReason::MaxTokens
        } else {
            StopReason::EndTurn
        };

        let content = response.message.content.clone();
        LlmResponse {
            content: if content.is_empty() { None } else { Some(content) },
            stop_reason,
            usage,
            model: response.model.clone(),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.label
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        _api_key: Option<&str>,
    ) -> LlmResult<LlmResponse> {
        let chat_request = self.build_chat_request(request);

        let response = self
            .client
            .send_chat_messages(chat_request)
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("connect") || msg.contains("Connection refused") {
                    LlmError::ProviderUnavailable {
                        message: format!(
                            "Cannot connect to Ollama at {}: {}",
                            self.base_url(),
                            msg
                        ),
                    }
                } else if msg.contains("not found") || msg.contains("404") {
                    LlmError::ModelNotFound {
                        model: self.config.model.clone(),
                    }
                } else {
                    LlmError::NetworkError { message: msg }
                }
            })?;

        Ok(self.convert_response(&response, request.max_tokens))
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}
