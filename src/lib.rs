//! # docenrich
//!
//! Turn PDF documents into structured, enriched JSON for downstream indexing.
//!
//! ## Why this crate?
//!
//! A layout-analysis service recovers paragraphs, tables and figure regions
//! from a PDF, but figures come back as bare bounding boxes: the charts and
//! infographics inside them carry no text. This crate normalises the layout
//! result into ordered sections, crops every figure out of the rendered page
//! and asks a vision model to describe it, then attaches document-level
//! metadata from an LLM.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Analyze    remote layout analysis with retry and polling timeout
//!  ├─ 2. Normalize  paragraphs + HTML tables in reading order, page info, figures
//!  ├─ 3. Crop       rasterise figure regions via pdfium (spawn_blocking)
//!  ├─ 4. Vision     one request per cropped figure, streamed, best effort
//!  ├─ 5. Enrich     document metadata from the joined section text, best effort
//!  └─ 6. Output     EnrichedDocument → JSON
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docenrich::analysis::azure::LayoutClient;
//! use docenrich::vision::OpenAiVision;
//! use docenrich::DocumentParser;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let analysis = LayoutClient::new(
//!         std::env::var("DOCENRICH_ANALYSIS_ENDPOINT")?,
//!         std::env::var("DOCENRICH_ANALYSIS_KEY")?,
//!     )?;
//!     let vision = OpenAiVision::new(std::env::var("OPENAI_API_KEY")?, "gpt-4o")?;
//!
//!     let parser = DocumentParser::builder(Arc::new(analysis))
//!         .vision_model(Arc::new(vision))
//!         .build();
//!
//!     let document = parser.parse_input("report.pdf").await?;
//!     eprintln!(
//!         "{} sections, {} figures",
//!         document.metadata.total_sections, document.metadata.total_figures
//!     );
//!     println!("{}", document.to_json_pretty()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docenrich` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docenrich = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analysis;
pub mod config;
pub mod enrich;
pub mod error;
pub mod observer;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod prompts;
pub mod vision;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analysis::{AnalysisGateway, AnalysisService, PendingAnalysis, RawResult, RetryPolicy};
pub use config::{ParserConfig, ParserConfigBuilder};
pub use enrich::{LlmMetadataEnricher, MetadataEnricher};
pub use error::{
    AnalysisError, CropError, EnrichmentError, GeometryError, ParseError, RegionCropError,
    ServiceError, VisionError,
};
pub use observer::{NoopObserver, TokenUsage, TracingObserver, VisionObserver};
pub use output::{
    BoundingRegion, CroppedImage, DocumentStats, EnrichedDocument, FigureDescriptor, LengthUnit,
    PageInfo, PageInfoMap, Section, SectionKind, TextSpan,
};
pub use parser::{DocumentParser, DocumentParserBuilder};
pub use pipeline::rasterize::{PdfiumRasterizer, RasterDocument, Rasterizer};
pub use vision::{VisionModel, VisionRequest};
