//! OpenAI-compatible chat-completions client for image understanding.
//!
//! Request body:
//!
//! ```json
//! {
//!   "model": "gpt-4o",
//!   "messages": [{"role": "user", "content": [
//!       {"type": "text", "text": "<prompt>"},
//!       {"type": "image_url", "image_url": {"url": "data:image/png;base64,…", "detail": "high"}}
//!   ]}],
//!   "max_tokens": 4096,
//!   "stream": true,
//!   "seed": 25
//! }
//! ```
//!
//! `seed` is only sent to `gpt*` models. Streamed answers arrive as
//! server-sent events (`data: {chunk}` lines, ending with `data: [DONE]`);
//! each chunk's `choices[0].delta.content` is forwarded as a [`VisionChunk`].

use super::{VisionChunk, VisionCompletion, VisionModel, VisionRequest, VisionStream};
use crate::error::VisionError;
use crate::observer::TokenUsage;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Fixed sampling seed for reproducible extractions on models that accept one.
const GPT_SEED: u64 = 25;

/// HTTP client for `/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiVision {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
}

impl OpenAiVision {
    pub fn new(api_key: impl Into<String>, default_model: impl Into<String>) -> Result<Self, VisionError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VisionError::Request(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            default_model: default_model.into(),
        })
    }

    /// Point at another OpenAI-compatible server (Azure OpenAI proxy, vLLM, …).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn send(&self, request: &VisionRequest, stream: bool) -> Result<Response, VisionError> {
        let body = ChatRequest::build(request, stream);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VisionError::Timeout {
                        secs: request.timeout.as_secs(),
                    }
                } else {
                    VisionError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &text))
    }
}

#[async_trait]
impl VisionModel for OpenAiVision {
    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: &VisionRequest) -> Result<VisionCompletion, VisionError> {
        let response = self.send(request, false).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| VisionError::Request(format!("decoding response: {e}")))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(VisionCompletion {
            content,
            usage: body.usage.map(Into::into),
        })
    }

    async fn complete_stream(&self, request: &VisionRequest) -> Result<VisionStream, VisionError> {
        let response = self.send(request, true).await?;
        debug!("Vision stream opened for model {}", request.model);

        let bytes = response
            .bytes_stream()
            .map(|r| r.map(|b| b.to_vec()).map_err(|e| e.to_string()))
            .boxed();

        Ok(chunk_stream(bytes))
    }
}

fn classify_failure(status: StatusCode, body: &str) -> VisionError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return VisionError::RateLimited;
    }
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(500).collect());
    VisionError::Api {
        status: status.as_u16(),
        message,
    }
}

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

impl<'a> ChatRequest<'a> {
    fn build(request: &'a VisionRequest, stream: bool) -> Self {
        ChatRequest {
            model: &request.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: &request.prompt,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: request.image.data_uri(),
                            detail: "high",
                        },
                    },
                ],
            }],
            max_tokens: request.max_tokens,
            stream,
            seed: request.model.starts_with("gpt").then_some(GPT_SEED),
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
    #[serde(default)]
    total_tokens: usize,
}

impl From<Usage> for TokenUsage {
    fn from(u: Usage) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

// ── Server-sent events ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum SseEvent {
    Data(String),
    Done,
}

/// Splits a byte stream into `data:` payloads.
///
/// Bytes are buffered until a full line is available, so UTF-8 sequences and
/// JSON payloads split across network chunks are reassembled.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a final line that was not newline-terminated.
    fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(line: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(line);
    let payload = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?.trim_start();
    if payload.is_empty() {
        None
    } else if payload == "[DONE]" {
        Some(SseEvent::Done)
    } else {
        Some(SseEvent::Data(payload.to_string()))
    }
}

fn parse_chunk(payload: &str) -> Result<VisionChunk, VisionError> {
    let chunk: StreamResponse =
        serde_json::from_str(payload).map_err(|e| VisionError::Stream(format!("bad chunk: {e}")))?;
    Ok(VisionChunk {
        delta: chunk.choices.into_iter().next().and_then(|c| c.delta.content),
        usage: chunk.usage.map(Into::into),
    })
}

struct StreamState {
    bytes: BoxStream<'static, Result<Vec<u8>, String>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<VisionChunk, VisionError>>,
    finished: bool,
}

impl StreamState {
    /// Queue decoded events; returns true once `[DONE]` was seen.
    fn enqueue(&mut self, events: Vec<SseEvent>) -> bool {
        for event in events {
            match event {
                SseEvent::Done => return true,
                SseEvent::Data(payload) => {
                    let parsed = parse_chunk(&payload);
                    let failed = parsed.is_err();
                    self.pending.push_back(parsed);
                    if failed {
                        return true;
                    }
                }
            }
        }
        false
    }
}

fn chunk_stream(bytes: BoxStream<'static, Result<Vec<u8>, String>>) -> VisionStream {
    let state = StreamState {
        bytes,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(bytes)) => {
                    let events = st.decoder.push(&bytes);
                    st.finished = st.enqueue(events);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.pending.push_back(Err(VisionError::Stream(e)));
                }
                None => {
                    st.finished = true;
                    let tail = st.decoder.finish().into_iter().collect();
                    st.enqueue(tail);
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::EncodedImage;
    use crate::vision::collect_stream;

    fn request(model: &str) -> VisionRequest {
        VisionRequest {
            model: model.into(),
            prompt: "Describe the chart".into(),
            image: EncodedImage {
                data: "iVBORw0KGgo=".into(),
                mime_type: "image/png".into(),
            },
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
            stream: true,
        }
    }

    #[test]
    fn request_body_shape_for_gpt_model() {
        let req = request("gpt-4o");
        let body = serde_json::to_value(ChatRequest::build(&req, true)).unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["seed"], 25);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 4096);
        let content = &body["messages"][0]["content"];
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "Describe the chart");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["detail"], "high");
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/png;base64,iVBORw0KGgo="
        );
    }

    #[test]
    fn non_gpt_model_has_no_seed_and_no_stream_options() {
        let req = request("llava-13b");
        let body = serde_json::to_value(ChatRequest::build(&req, false)).unwrap();
        assert!(body.get("seed").is_none());
        assert!(body.get("stream_options").is_none());
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn decoder_reassembles_split_lines() {
        let mut d = SseDecoder::default();
        assert!(d.push(b"data: {\"choices\":[{\"delta\":{\"con").is_empty());
        let events = d.push(b"tent\":\"Hi\"}}]}\n\n: keep-alive\ndata: [DONE]\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("{\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}".into()),
                SseEvent::Done
            ]
        );
    }

    #[test]
    fn decoder_handles_crlf_and_unterminated_tail() {
        let mut d = SseDecoder::default();
        assert_eq!(d.push(b"data: {}\r\n"), vec![SseEvent::Data("{}".into())]);
        assert!(d.push(b"data: [DONE]").is_empty());
        assert_eq!(d.finish(), Some(SseEvent::Done));
        assert_eq!(d.finish(), None);
    }

    #[test]
    fn chunk_without_content_is_empty_delta() {
        let c = parse_chunk(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap();
        assert_eq!(c.delta, None);
        let c = parse_chunk(r#"{"choices":[],"usage":{"prompt_tokens":7,"completion_tokens":3,"total_tokens":10}}"#)
            .unwrap();
        assert_eq!(c.usage.map(|u| u.total_tokens), Some(10));
        assert!(parse_chunk("not json").is_err());
    }

    fn byte_chunks(parts: &[&str]) -> BoxStream<'static, Result<Vec<u8>, String>> {
        let owned: Vec<Result<Vec<u8>, String>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned).boxed()
    }

    #[tokio::test]
    async fn stream_aggregates_deltas_until_done() {
        let bytes = byte_chunks(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"{\\\"type\\\": \"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"\\\"pie\\\"}\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"after done\"}}]}\n\n",
        ]);
        let out = collect_stream(chunk_stream(bytes)).await.unwrap();
        assert_eq!(out.content, "{\"type\": \"pie\"}");
    }

    #[tokio::test]
    async fn transport_error_surfaces_as_stream_error() {
        let parts: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n".to_vec()),
            Err("connection reset".into()),
        ];
        let err = collect_stream(chunk_stream(stream::iter(parts).boxed()))
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::Stream(m) if m == "connection reset"));
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, ""),
            VisionError::RateLimited
        ));
        match classify_failure(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Invalid image","type":"invalid_request_error"}}"#,
        ) {
            VisionError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid image");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(classify_failure(StatusCode::BAD_GATEWAY, "upstream").is_retryable());
    }

    #[test]
    fn non_streamed_response_decodes() {
        let body: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"{}"}}],
                "usage":{"prompt_tokens":1,"completion_tokens":2,"total_tokens":3}}"#,
        )
        .unwrap();
        assert_eq!(body.choices[0].message.content.as_deref(), Some("{}"));
        assert_eq!(body.usage.map(|u| u.completion_tokens), Some(2));
    }
}
