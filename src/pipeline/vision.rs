//! Vision enrichment: cropped figure images → figure sections.
//!
//! Images are processed one at a time, so at most one vision request is in
//! flight per document. For each image:
//!
//! 1. load and re-encode as base64 PNG,
//! 2. send to the [`VisionModel`] (streamed or not) under the request timeout,
//! 3. retry transient failures with exponential backoff
//!    (`retry_backoff * 2^(n-1)` before retry `n`),
//! 4. record [`ExtractionOutcome::Extracted`] or [`ExtractionOutcome::Skipped`].
//!
//! A failing image never aborts the batch. [`to_sections`] turns the
//! extracted outcomes into figure [`Section`]s and drops the skipped ones.

use crate::error::VisionError;
use crate::observer::VisionObserver;
use crate::output::{CroppedImage, Section, SectionKind};
use crate::pipeline::encode::encode_image_file;
use crate::pipeline::geometry::section_viewport;
use crate::prompts::DEFAULT_VISION_PROMPT;
use crate::vision::{collect_stream, VisionCompletion, VisionModel, VisionRequest};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Request-level knobs for the vision stage.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionSettings {
    pub max_tokens: u32,
    /// Per-request budget, stream consumption included.
    pub timeout: Duration,
    pub stream: bool,
    /// Retries after the first attempt, for transient errors only.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
            stream: true,
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// What happened to one image.
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    /// The model returned non-empty text.
    Extracted(String),
    /// Nothing usable came back; the reason is kept for diagnostics.
    Skipped(VisionError),
}

impl ExtractionOutcome {
    /// Extracted text, or `""` when skipped.
    pub fn content(&self) -> &str {
        match self {
            ExtractionOutcome::Extracted(text) => text,
            ExtractionOutcome::Skipped(_) => "",
        }
    }

    pub fn is_extracted(&self) -> bool {
        matches!(self, ExtractionOutcome::Extracted(_))
    }
}

/// One image and its extraction result.
#[derive(Debug, Clone)]
pub struct FigureExtraction {
    pub image: CroppedImage,
    /// Model that served (or was asked to serve) the request.
    pub model: String,
    pub outcome: ExtractionOutcome,
}

/// Sends cropped figures to a vision model.
pub struct VisionEnricher {
    model: Arc<dyn VisionModel>,
    observer: Arc<dyn VisionObserver>,
    settings: VisionSettings,
}

impl VisionEnricher {
    pub fn new(
        model: Arc<dyn VisionModel>,
        observer: Arc<dyn VisionObserver>,
        settings: VisionSettings,
    ) -> Self {
        Self {
            model,
            observer,
            settings,
        }
    }

    /// Extract content from every image, in order.
    ///
    /// `prompt` defaults to [`DEFAULT_VISION_PROMPT`], `model` to the vision
    /// model's own default. Always returns one entry per input image.
    pub async fn enrich_images(
        &self,
        images: &[CroppedImage],
        prompt: Option<&str>,
        model: Option<&str>,
    ) -> Vec<FigureExtraction> {
        let prompt = prompt.unwrap_or(DEFAULT_VISION_PROMPT);
        let model = model.unwrap_or_else(|| self.model.default_model()).to_string();
        let total = images.len();

        info!("Vision extraction for {} image(s) with {}", total, model);

        let mut results = Vec::with_capacity(total);
        for (index, image) in images.iter().enumerate() {
            self.observer.on_image_start(index, total);
            let outcome = self.extract_one(image, prompt, &model).await;

            match &outcome {
                ExtractionOutcome::Extracted(text) => debug!(
                    "Image {}/{} ({}): {} chars",
                    index + 1,
                    total,
                    image.file_name,
                    text.len()
                ),
                ExtractionOutcome::Skipped(reason) => warn!(
                    "Image {}/{} ({}) skipped: {}",
                    index + 1,
                    total,
                    image.file_name,
                    reason
                ),
            }
            self.observer
                .on_image_complete(index, total, outcome.is_extracted());

            results.push(FigureExtraction {
                image: image.clone(),
                model: model.clone(),
                outcome,
            });
        }

        let extracted = results.iter().filter(|r| r.outcome.is_extracted()).count();
        info!("Vision extraction done: {}/{} image(s) yielded content", extracted, total);
        results
    }

    async fn extract_one(&self, image: &CroppedImage, prompt: &str, model: &str) -> ExtractionOutcome {
        let encoded = match encode_image_file(&image.image_path) {
            Ok(encoded) => encoded,
            Err(e) => return ExtractionOutcome::Skipped(e),
        };

        let request = VisionRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            image: encoded,
            max_tokens: self.settings.max_tokens,
            timeout: self.settings.timeout,
            stream: self.settings.stream,
        };

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let backoff = retry_delay(self.settings.retry_backoff, attempt);
                warn!(
                    "{}: retry {}/{} after {:?}",
                    image.file_name, attempt, self.settings.max_retries, backoff
                );
                sleep(backoff).await;
            }

            let start = Instant::now();
            match self.request_once(&request).await {
                Ok(completion) => {
                    let usage = completion.usage.unwrap_or_default();
                    self.observer.on_request_complete(&usage, start.elapsed());
                    return if completion.content.trim().is_empty() {
                        ExtractionOutcome::Skipped(VisionError::EmptyResponse)
                    } else {
                        ExtractionOutcome::Extracted(completion.content)
                    };
                }
                Err(e) => {
                    self.observer.on_request_failed(&e, start.elapsed());
                    if !e.is_retryable() || attempt >= self.settings.max_retries {
                        return ExtractionOutcome::Skipped(e);
                    }
                    debug!("{}: attempt {} failed: {}", image.file_name, attempt + 1, e);
                }
            }
            attempt += 1;
        }
    }

    async fn request_once(&self, request: &VisionRequest) -> Result<VisionCompletion, VisionError> {
        let call = async {
            if request.stream {
                let chunks = self.model.complete_stream(request).await?;
                collect_stream(chunks).await
            } else {
                self.model.complete(request).await
            }
        };

        timeout(request.timeout, call)
            .await
            .map_err(|_| VisionError::Timeout {
                secs: request.timeout.as_secs(),
            })?
    }
}

/// Delay before retry `retry` (1-based): `base * 2^(retry - 1)`, saturating.
fn retry_delay(base: Duration, retry: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
}

/// Figure sections for every extracted image, in input order.
///
/// Sections carry no `offset`; they are appended after the ordered
/// paragraph and table sections.
pub fn to_sections(extractions: &[FigureExtraction]) -> Vec<Section> {
    extractions
        .iter()
        .filter_map(|extraction| match &extraction.outcome {
            ExtractionOutcome::Extracted(content) => Some(figure_section(extraction, content)),
            ExtractionOutcome::Skipped(_) => None,
        })
        .collect()
}

fn figure_section(extraction: &FigureExtraction, content: &str) -> Section {
    let image = &extraction.image;

    let mut metadata = Map::new();
    metadata.insert("extraction_method".into(), Value::from("vision"));
    metadata.insert("model".into(), Value::from(extraction.model.as_str()));
    metadata.insert("caption".into(), Value::from(image.caption.as_str()));
    if let Some(id) = &image.figure_id {
        metadata.insert("figure_id".into(), Value::from(id.as_str()));
    }
    if !image.spans.is_empty() {
        let spans = image
            .spans
            .iter()
            .map(|s| json!({ "offset": s.offset, "length": s.length }))
            .collect();
        metadata.insert("spans".into(), Value::Array(spans));
    }

    Section {
        content: content.to_string(),
        kind: SectionKind::Figure,
        viewport: section_viewport(&image.bounding_region.polygon),
        page_number: image.page_number,
        offset: None,
        role: None,
        row_count: None,
        column_count: None,
        metadata,
    }
}
