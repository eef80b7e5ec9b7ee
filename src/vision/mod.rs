//! Vision-model clients.
//!
//! [`VisionModel`] is the narrow request/response contract the vision stage
//! talks to. Two implementations ship with the crate:
//!
//! - [`openai::OpenAiVision`]: direct HTTP client for OpenAI-compatible
//!   chat-completions endpoints, with server-sent-event streaming.
//! - [`provider::ProviderVision`]: adapter over any
//!   [`edgequake_llm::LLMProvider`] (non-streaming).
//!
//! Streaming and non-streaming calls share one final contract: a single
//! content string per image, see [`collect_stream`].

pub mod openai;
pub mod provider;

use crate::error::VisionError;
use crate::observer::TokenUsage;
use crate::pipeline::encode::EncodedImage;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::time::Duration;

pub use openai::OpenAiVision;
pub use provider::ProviderVision;

/// One image-plus-prompt request.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub model: String,
    pub prompt: String,
    pub image: EncodedImage,
    pub max_tokens: u32,
    /// Budget for the whole request, stream consumption included.
    pub timeout: Duration,
    pub stream: bool,
}

/// A complete (non-streamed or fully collected) answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisionCompletion {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// One increment of a streamed answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisionChunk {
    /// Text fragment; `None` or empty for role-only and usage-only chunks.
    pub delta: Option<String>,
    pub usage: Option<TokenUsage>,
}

pub type VisionStream = BoxStream<'static, Result<VisionChunk, VisionError>>;

/// A vision-language model reachable over some API.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Model used when the caller does not name one.
    fn default_model(&self) -> &str;

    /// Send the request and wait for the full answer.
    async fn complete(&self, request: &VisionRequest) -> Result<VisionCompletion, VisionError>;

    /// Send the request and return the answer as a stream of fragments.
    ///
    /// The default wraps [`VisionModel::complete`] in a single-chunk stream,
    /// for backends without streaming support.
    async fn complete_stream(&self, request: &VisionRequest) -> Result<VisionStream, VisionError> {
        let completion = self.complete(request).await?;
        let chunk = VisionChunk {
            delta: Some(completion.content),
            usage: completion.usage,
        };
        Ok(stream::once(async move { Ok(chunk) }).boxed())
    }
}

/// Concatenate a stream's fragments in arrival order.
///
/// Empty and absent fragments are ignored. The last usage report wins. The
/// first error aborts collection.
pub async fn collect_stream(mut chunks: VisionStream) -> Result<VisionCompletion, VisionError> {
    let mut completion = VisionCompletion::default();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if let Some(delta) = chunk.delta.filter(|d| !d.is_empty()) {
            completion.content.push_str(&delta);
        }
        if chunk.usage.is_some() {
            completion.usage = chunk.usage;
        }
    }
    Ok(completion)
}
