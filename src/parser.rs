//! Document parsing entry point.
//!
//! ```text
//! bytes ─▶ analyze ─▶ normalize ─▶ [crop ─▶ vision] ─▶ [metadata] ─▶ EnrichedDocument
//!          (fatal)                 (best effort)      (best effort)
//! ```
//!
//! Only the analysis stage can fail a parse. Cropping, vision extraction and
//! metadata enrichment log their failures and the document is produced
//! without their contribution. Cropped images live in a per-document scratch
//! directory that is removed when the parse returns, whatever the outcome.
//! If the parse future is dropped mid-crop, the blocking crop task keeps the
//! directory alive and removes it when it finishes.

use crate::analysis::{AnalysisGateway, AnalysisService};
use crate::config::ParserConfig;
use crate::enrich::MetadataEnricher;
use crate::error::ParseError;
use crate::observer::{NoopObserver, SharedObserver, VisionObserver};
use crate::output::{DocumentStats, EnrichedDocument, FigureDescriptor, PageInfoMap, Section};
use crate::pipeline::crop::{cleanup_cropped_images, FigureCropper, ScratchDir};
use crate::pipeline::input::load_document;
use crate::pipeline::normalize::normalize;
use crate::pipeline::rasterize::{PdfiumRasterizer, Rasterizer};
use crate::pipeline::vision::{to_sections, VisionEnricher};
use crate::vision::VisionModel;
use serde_json::Map;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs the full enrichment pipeline over PDF documents.
///
/// A parser holds no per-document state; one instance can serve any number
/// of concurrent `parse` calls.
///
/// # Example
/// ```rust,no_run
/// use docenrich::analysis::azure::LayoutClient;
/// use docenrich::vision::OpenAiVision;
/// use docenrich::{DocumentParser, ParserConfig};
/// use std::sync::Arc;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let analysis = LayoutClient::new("https://example.cognitiveservices.azure.com", "key")?;
/// let vision = OpenAiVision::new("sk-…", "gpt-4o")?;
///
/// let parser = DocumentParser::builder(Arc::new(analysis))
///     .vision_model(Arc::new(vision))
///     .config(ParserConfig::builder().dpi(200).build()?)
///     .build();
///
/// let document = parser.parse_input("report.pdf").await?;
/// println!("{}", document.to_json_pretty()?);
/// # Ok(())
/// # }
/// ```
pub struct DocumentParser {
    gateway: AnalysisGateway,
    cropper: FigureCropper,
    vision: Option<VisionEnricher>,
    enricher: Option<Arc<dyn MetadataEnricher>>,
    config: ParserConfig,
}

impl DocumentParser {
    pub fn builder(analysis: Arc<dyn AnalysisService>) -> DocumentParserBuilder {
        DocumentParserBuilder {
            analysis,
            vision_model: None,
            rasterizer: None,
            enricher: None,
            observer: None,
            config: ParserConfig::default(),
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Whether figures will be sent to a vision model.
    pub fn vision_enabled(&self) -> bool {
        self.vision.is_some()
    }

    /// Load a local path or HTTP(S) URL and parse it.
    pub async fn parse_input(&self, input: &str) -> Result<EnrichedDocument, ParseError> {
        let document = load_document(input, self.config.download_timeout).await?;
        info!("Loaded {} ({} bytes)", document.file_name, document.bytes.len());
        let document_id = Uuid::new_v4().to_string();
        self.parse(&document.bytes, &document_id).await
    }

    /// Parse one document.
    ///
    /// `document_id` names the scratch directory for cropped images, so
    /// concurrent parses must use distinct ids. An empty id gets a random
    /// directory name.
    ///
    /// # Errors
    /// [`ParseError::Analysis`] once the analysis retry budget is spent.
    /// Later stages never fail the parse.
    pub async fn parse(
        &self,
        document: &[u8],
        document_id: &str,
    ) -> Result<EnrichedDocument, ParseError> {
        let start = Instant::now();
        let scratch = Arc::new(ScratchDir::new(&self.config.scratch_root, document_id));
        info!("Parsing document {}", document_id);

        let raw = self.gateway.analyze(document, &self.config.model_id).await?;

        let normalized = normalize(
            &raw,
            self.config.include_tables,
            self.config.include_figures,
        );
        info!(
            "Extracted {} section(s) and {} figure(s)",
            normalized.sections.len(),
            normalized.figures.len()
        );

        let mut sections = normalized.sections;
        let page_info = normalized.page_info;
        let figures = normalized.figures;

        if let Some(vision) = &self.vision {
            if !figures.is_empty() {
                let figure_sections = self
                    .figure_sections(vision, document, &figures, &page_info, &scratch)
                    .await;
                if !figure_sections.is_empty() {
                    info!("Added {} vision-extracted section(s)", figure_sections.len());
                    sections.extend(figure_sections);
                }
            }
        }

        let enriched_metadata = match &self.enricher {
            Some(enricher) if !sections.is_empty() => {
                let text = sections_text(&sections);
                match enricher.enrich(&text).await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        warn!("Metadata enrichment failed, continuing without it: {}", e);
                        Map::new()
                    }
                }
            }
            _ => Map::new(),
        };

        let metadata = DocumentStats {
            total_pages: page_info.len(),
            total_sections: sections.len(),
            total_figures: figures.len(),
            vision_extraction_enabled: self.vision_enabled(),
        };

        info!(
            "Parsed document {} in {}ms: {} page(s), {} section(s)",
            document_id,
            start.elapsed().as_millis(),
            metadata.total_pages,
            metadata.total_sections
        );

        Ok(EnrichedDocument {
            sections,
            page_info,
            enriched_metadata,
            metadata,
        })
    }

    /// Crop, extract and convert figures. Any failure yields fewer (or no)
    /// sections rather than an error.
    async fn figure_sections(
        &self,
        vision: &VisionEnricher,
        document: &[u8],
        figures: &[FigureDescriptor],
        page_info: &PageInfoMap,
        scratch: &Arc<ScratchDir>,
    ) -> Vec<Section> {
        let cropper = self.cropper.clone();
        let bytes = document.to_vec();
        let figures = figures.to_vec();
        let page_info = page_info.clone();
        let scratch = Arc::clone(scratch);

        let crop = tokio::task::spawn_blocking(move || {
            cropper.crop_figures(&bytes, &figures, &page_info, scratch.path())
        })
        .await;

        let outcome = match crop {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!("Figure cropping failed, skipping vision extraction: {}", e);
                return Vec::new();
            }
            Err(e) => {
                warn!("Figure cropping task panicked: {}", e);
                return Vec::new();
            }
        };

        if !outcome.skipped.is_empty() {
            debug!("{} figure region(s) could not be cropped", outcome.skipped.len());
        }
        if outcome.images.is_empty() {
            return Vec::new();
        }

        let extractions = vision
            .enrich_images(
                &outcome.images,
                self.config.vision_prompt.as_deref(),
                self.config.vision_model.as_deref(),
            )
            .await;

        let paths: Vec<PathBuf> = outcome.images.iter().map(|i| i.image_path.clone()).collect();
        cleanup_cropped_images(&paths);

        to_sections(&extractions)
    }
}

/// Section contents joined by blank lines.
fn sections_text(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .filter(|c| !c.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builder for [`DocumentParser`].
pub struct DocumentParserBuilder {
    analysis: Arc<dyn AnalysisService>,
    vision_model: Option<Arc<dyn VisionModel>>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    enricher: Option<Arc<dyn MetadataEnricher>>,
    observer: Option<SharedObserver>,
    config: ParserConfig,
}

impl DocumentParserBuilder {
    /// Enable figure extraction through this model.
    pub fn vision_model(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.vision_model = Some(model);
        self
    }

    /// Page renderer for cropping. Default: [`PdfiumRasterizer`].
    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn enricher(mut self, enricher: Arc<dyn MetadataEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Receives per-request vision usage. Default: [`NoopObserver`].
    pub fn observer(mut self, observer: Arc<dyn VisionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(mut self, config: ParserConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> DocumentParser {
        let config = self.config;

        let rasterizer = self.rasterizer.unwrap_or_else(|| {
            Arc::new(match &config.pdfium_library_path {
                Some(path) => PdfiumRasterizer::with_library_path(path.clone()),
                None => PdfiumRasterizer::new(),
            })
        });

        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(NoopObserver) as SharedObserver);

        let vision = match self.vision_model {
            Some(model) if config.enable_vision => {
                Some(VisionEnricher::new(model, observer, config.vision_settings()))
            }
            _ => None,
        };

        DocumentParser {
            gateway: AnalysisGateway::new(self.analysis, config.retry_policy()),
            cropper: FigureCropper::new(rasterizer, config.dpi),
            vision,
            enricher: self.enricher,
            config,
        }
    }
}
