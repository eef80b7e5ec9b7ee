//! Error types for the docenrich library.
//!
//! Errors are split by how far they are allowed to travel:
//!
//! * [`ParseError`]: **Fatal**, the document cannot be produced at all
//!   (analysis service exhausted its retries, bad input, invalid config).
//!   Returned as `Err(ParseError)` from [`crate::parser::DocumentParser::parse`].
//!
//! * [`CropError`], [`RegionCropError`], [`VisionError`], [`EnrichmentError`]:
//!   **Non-fatal**: an optional stage or a single region/image failed. They are
//!   recorded in [`crate::pipeline::crop::CropOutcome`] and
//!   [`crate::pipeline::vision::ExtractionOutcome`] or logged by the parser,
//!   and the document is still produced without the affected content.
//!
//! * [`AnalysisError`] / [`ServiceError`]: the analysis gateway's view of the
//!   remote service. The gateway retries on [`ServiceError`] according to its
//!   kind and surfaces [`AnalysisError`] once the attempt budget is spent.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the docenrich library.
#[derive(Debug, Error)]
pub enum ParseError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'")]
    InputNotFound { path: PathBuf },

    /// The bytes were read but are not a PDF.
    #[error("Input is not a valid PDF: '{input}'\nFirst bytes: {magic:?}")]
    NotAPdf { input: String, magic: Vec<u8> },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    Download { url: String, reason: String },

    // ── Analysis ──────────────────────────────────────────────────────────
    /// The mandatory layout-analysis stage failed irrecoverably.
    #[error("Document parsing failed: {0}")]
    Analysis(#[from] AnalysisError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure reported by an analysis-service client for a single request.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// HTTP 429: the service asked us to slow down.
    #[error("analysis service rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    /// The service refused the request outright (bad document, auth, quota).
    /// Retrying the same request cannot succeed.
    #[error("analysis service rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The request was accepted but the service reported the analysis itself
    /// as failed (unsupported content, corrupt file, …).
    #[error("analysis operation failed ({code}): {message}")]
    OperationFailed { code: String, message: String },

    /// Network blip, 5xx, or any other failure worth another attempt.
    #[error("transient analysis service failure: {0}")]
    Transient(String),

    /// The service answered but the payload could not be decoded. Treated as
    /// transient: a truncated or garbled body is usually a one-off.
    #[error("malformed analysis response: {0}")]
    Malformed(String),
}

impl ServiceError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::RateLimited { .. }
                | ServiceError::Transient(_)
                | ServiceError::Malformed(_)
        )
    }
}

/// The analysis gateway gave up on a document.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Every attempt ended in the polling timeout.
    #[error("layout analysis timed out after {secs}s on each of {attempts} attempt(s)")]
    Timeout { attempts: u32, secs: u64 },

    /// The last attempt failed for a reason other than the polling timeout,
    /// or the failure was not retryable.
    #[error("layout analysis failed after {attempts} attempt(s): {source}")]
    Failed {
        attempts: u32,
        #[source]
        source: ServiceError,
    },
}

/// A polygon could not be turned into a bounding box.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("polygon needs at least 8 coordinates (4 corners), got {len}")]
    TooFewCoordinates { len: usize },

    #[error("polygon contains a non-finite coordinate")]
    NonFinite,
}

/// The cropping stage could not run at all for this document.
///
/// The parser treats this as "no vision for this document", not as a fatal error.
#[derive(Debug, Error)]
pub enum CropError {
    /// No pdfium library could be bound.
    #[error("PDF renderer unavailable: {0}")]
    RendererUnavailable(String),

    /// The document bytes could not be opened for rasterisation.
    #[error("Failed to open document for rasterisation: {0}")]
    DocumentOpen(String),

    /// The scratch directory could not be created.
    #[error("Failed to create output directory '{path}': {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single bounding region could not be rasterised. The region is skipped.
#[derive(Debug, Clone, Error)]
pub enum RegionCropError {
    #[error("invalid region geometry: {0}")]
    InvalidGeometry(#[from] GeometryError),

    #[error("page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: u32, total: usize },

    #[error("rendering page {page} failed: {detail}")]
    Render { page: u32, detail: String },

    #[error("region on page {page} is empty after clipping to the page")]
    EmptyRegion { page: u32 },

    #[error("failed to save cropped image '{path}': {detail}")]
    Save { path: PathBuf, detail: String },
}

/// A single image failed vision extraction.
///
/// Never propagated out of the vision stage; it becomes
/// [`crate::pipeline::vision::ExtractionOutcome::Skipped`].
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum VisionError {
    #[error("could not load image '{path}': {detail}")]
    ImageLoad { path: String, detail: String },

    #[error("vision request failed: {0}")]
    Request(String),

    #[error("vision API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("vision API rate limited the request")]
    RateLimited,

    #[error("vision call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("vision stream interrupted: {0}")]
    Stream(String),

    #[error("vision model returned no content")]
    EmptyResponse,
}

impl VisionError {
    /// Whether the same request is worth sending again.
    pub fn is_retryable(&self) -> bool {
        match self {
            VisionError::Request(_)
            | VisionError::RateLimited
            | VisionError::Timeout { .. }
            | VisionError::Stream(_) => true,
            VisionError::Api { status, .. } => *status >= 500,
            VisionError::ImageLoad { .. } | VisionError::EmptyResponse => false,
        }
    }
}

/// The text-enrichment collaborator failed.
#[derive(Debug, Clone, Error)]
pub enum EnrichmentError {
    #[error("enrichment provider failed: {0}")]
    Provider(String),

    #[error("enrichment response is not a JSON object: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_failed_display_carries_cause() {
        let e = ParseError::from(AnalysisError::Failed {
            attempts: 3,
            source: ServiceError::Transient("connection reset".into()),
        });
        let msg = e.to_string();
        assert!(msg.contains("3 attempt"), "got: {msg}");
        assert!(msg.contains("connection reset"), "got: {msg}");
    }

    #[test]
    fn timeout_display() {
        let e = AnalysisError::Timeout {
            attempts: 2,
            secs: 300,
        };
        assert!(e.to_string().contains("300s"));
    }

    #[test]
    fn service_error_retryability() {
        assert!(ServiceError::RateLimited { retry_after: None }.is_retryable());
        assert!(ServiceError::Transient("503".into()).is_retryable());
        assert!(!ServiceError::Rejected {
            status: 400,
            message: "InvalidContent".into()
        }
        .is_retryable());
        assert!(ServiceError::Malformed("eof".into()).is_retryable());
        assert!(!ServiceError::OperationFailed {
            code: "InvalidRequest".into(),
            message: "corrupt".into()
        }
        .is_retryable());
    }

    #[test]
    fn vision_error_retryability() {
        assert!(VisionError::Timeout { secs: 60 }.is_retryable());
        assert!(VisionError::Api {
            status: 502,
            message: "bad gateway".into()
        }
        .is_retryable());
        assert!(!VisionError::Api {
            status: 401,
            message: "invalid key".into()
        }
        .is_retryable());
        assert!(!VisionError::EmptyResponse.is_retryable());
    }

    #[test]
    fn geometry_error_display() {
        let e = GeometryError::TooFewCoordinates { len: 6 };
        assert!(e.to_string().contains("got 6"));
    }
}
