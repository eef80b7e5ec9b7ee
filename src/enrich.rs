//! Document-level metadata enrichment.
//!
//! After sections are assembled the parser joins their text and hands it to
//! a [`MetadataEnricher`]. An empty map means "nothing to add" and is not an
//! error. Failures are logged by the parser and the document is produced
//! with empty `enriched_metadata`.

use crate::error::EnrichmentError;
use crate::prompts::{metadata_request, METADATA_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Characters of document text sent by default.
pub const DEFAULT_MAX_CHARS: usize = 12_000;

/// Produces document-level metadata from the document's text.
#[async_trait]
pub trait MetadataEnricher: Send + Sync {
    async fn enrich(&self, text: &str) -> Result<Map<String, Value>, EnrichmentError>;
}

/// [`MetadataEnricher`] that asks an LLM for title, summary, keywords,
/// document type and language.
pub struct LlmMetadataEnricher {
    provider: Arc<dyn LLMProvider>,
    max_chars: usize,
    max_tokens: usize,
}

impl LlmMetadataEnricher {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            max_chars: DEFAULT_MAX_CHARS,
            max_tokens: 1024,
        }
    }

    /// Only the first `max_chars` characters of the text are sent.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(1);
        self
    }
}

#[async_trait]
impl MetadataEnricher for LlmMetadataEnricher {
    async fn enrich(&self, text: &str) -> Result<Map<String, Value>, EnrichmentError> {
        let excerpt = truncate_chars(text, self.max_chars);
        debug!(
            "Metadata enrichment over {} of {} chars",
            excerpt.chars().count(),
            text.chars().count()
        );

        let messages = vec![
            ChatMessage::system(METADATA_SYSTEM_PROMPT),
            ChatMessage::user(metadata_request(excerpt)),
        ];
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| EnrichmentError::Provider(e.to_string()))?;

        parse_metadata(&response.content)
    }
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").unwrap());

/// Extract the JSON object from a model reply.
///
/// Accepts a bare object, an object inside a code fence, or an object
/// surrounded by prose (first `{` to last `}`).
pub fn parse_metadata(reply: &str) -> Result<Map<String, Value>, EnrichmentError> {
    let body = RE_FENCED
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reply)
        .trim();

    let candidate = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => body,
    };

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(EnrichmentError::InvalidResponse(format!(
            "expected an object, got {other}"
        ))),
        Err(e) => Err(EnrichmentError::InvalidResponse(format!(
            "{e}: {}",
            reply.chars().take(200).collect::<String>()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_object() {
        let m = parse_metadata(r#"{"title": "Annual Report", "language": "en"}"#).unwrap();
        assert_eq!(m["title"], "Annual Report");
        assert_eq!(m["language"], "en");
    }

    #[test]
    fn fenced_object() {
        let reply = "```json\n{\"title\": null, \"keywords\": [\"revenue\", \"q3\"]}\n```";
        let m = parse_metadata(reply).unwrap();
        assert!(m["title"].is_null());
        assert_eq!(m["keywords"][1], "q3");
    }

    #[test]
    fn object_inside_prose() {
        let reply = "Here is the metadata:\n{\"document_type\": \"report\"}\nHope this helps.";
        let m = parse_metadata(reply).unwrap();
        assert_eq!(m["document_type"], "report");
    }

    #[test]
    fn empty_object_is_valid() {
        assert!(parse_metadata("{}").unwrap().is_empty());
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(matches!(
            parse_metadata("[1, 2]"),
            Err(EnrichmentError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_metadata("I cannot help with that."),
            Err(EnrichmentError::InvalidResponse(_))
        ));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("", 3), "");
    }
}
