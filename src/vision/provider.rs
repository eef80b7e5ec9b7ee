//! [`VisionModel`] adapter over an `edgequake_llm` provider.
//!
//! Lets any vision-capable provider the factory knows about (OpenAI,
//! Anthropic, Gemini, Azure, Ollama, …) serve figure extraction. The
//! provider API is request/response only, so streamed requests fall back to
//! the trait's single-chunk default.

use super::{VisionCompletion, VisionModel, VisionRequest};
use crate::error::VisionError;
use crate::observer::TokenUsage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tokio::time::timeout;

/// Vision model backed by an [`LLMProvider`].
pub struct ProviderVision {
    provider: Arc<dyn LLMProvider>,
    model: String,
}

impl ProviderVision {
    /// Wrap an already configured provider. `model` is reported as the
    /// default model name in section metadata.
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Build a provider by name (`"openai"`, `"anthropic"`, …) through
    /// [`ProviderFactory::create_llm_provider`]; API keys come from the
    /// environment.
    pub fn from_factory(provider_name: &str, model: &str) -> Result<Self, VisionError> {
        let provider = ProviderFactory::create_llm_provider(provider_name, model)
            .map_err(|e| VisionError::Request(format!("provider '{provider_name}': {e}")))?;
        Ok(Self::new(provider, model))
    }
}

#[async_trait]
impl VisionModel for ProviderVision {
    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &VisionRequest) -> Result<VisionCompletion, VisionError> {
        let messages = vec![ChatMessage::user_with_images(
            request.prompt.as_str(),
            vec![request.image.to_image_data()],
        )];
        let options = CompletionOptions {
            max_tokens: Some(request.max_tokens as usize),
            ..Default::default()
        };

        let response = timeout(request.timeout, self.provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| VisionError::Timeout {
                secs: request.timeout.as_secs(),
            })?
            .map_err(|e| VisionError::Request(e.to_string()))?;

        let prompt_tokens = response.prompt_tokens as usize;
        let completion_tokens = response.completion_tokens as usize;
        Ok(VisionCompletion {
            content: response.content,
            usage: Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }
}
