//! PDF rasterisation behind a small trait so the cropper can be driven by
//! pdfium in production and by a synthetic renderer in tests.
//!
//! pdfium is a blocking C library. Every method here is synchronous; the
//! parser calls into the cropper from `tokio::task::spawn_blocking`.
//!
//! ## Library lookup
//!
//! [`PdfiumRasterizer`] binds to pdfium on each `with_document` call, trying in order:
//!
//! 1. the explicitly configured library path,
//! 2. `PDFIUM_LIB_PATH`,
//! 3. the platform library name in the working directory,
//! 4. the system library search path.

use crate::error::CropError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An opened document that can render whole pages.
pub trait RasterDocument {
    /// Number of pages in the document.
    fn page_count(&self) -> usize;

    /// Render the 0-based page `index`, scaling one PDF point to `scale` pixels.
    fn render_page(&self, index: usize, scale: f32) -> Result<DynamicImage, String>;
}

/// Something that can open PDF bytes for rendering.
///
/// The document only lives for the duration of `f`, so the backing handle is
/// released before `with_document` returns on every path.
pub trait Rasterizer: Send + Sync {
    fn with_document(
        &self,
        bytes: &[u8],
        f: &mut dyn FnMut(&dyn RasterDocument),
    ) -> Result<(), CropError>;
}

/// pdfium-backed [`Rasterizer`].
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    /// Use the default lookup order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer the library at `path` (a file, e.g. `/opt/pdfium/lib/libpdfium.so`).
    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }

    fn bind(&self) -> Result<Pdfium, CropError> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(p) = &self.library_path {
            candidates.push(p.clone());
        }
        if let Ok(p) = std::env::var("PDFIUM_LIB_PATH") {
            candidates.push(PathBuf::from(p));
        }
        candidates.push(PathBuf::from(Pdfium::pdfium_platform_library_name_at_path("./")));

        let mut last_error = String::from("no candidate library");
        for candidate in &candidates {
            match bind_at(candidate) {
                Ok(pdfium) => {
                    debug!("Bound pdfium at {}", candidate.display());
                    return Ok(pdfium);
                }
                Err(e) => last_error = format!("{}: {e:?}", candidate.display()),
            }
        }

        Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|e| CropError::RendererUnavailable(format!("{last_error}; system library: {e:?}")))
    }
}

fn bind_at(path: &Path) -> Result<Pdfium, PdfiumError> {
    Pdfium::bind_to_library(path).map(Pdfium::new)
}

struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
}

impl RasterDocument for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn render_page(&self, index: usize, scale: f32) -> Result<DynamicImage, String> {
        let index = u16::try_from(index).map_err(|_| format!("page index {index} exceeds u16"))?;
        let page = self
            .document
            .pages()
            .get(index)
            .map_err(|e| format!("{e:?}"))?;

        let config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let bitmap = page.render_with_config(&config).map_err(|e| format!("{e:?}"))?;
        Ok(bitmap.as_image())
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn with_document(
        &self,
        bytes: &[u8],
        f: &mut dyn FnMut(&dyn RasterDocument),
    ) -> Result<(), CropError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| CropError::DocumentOpen(format!("{e:?}")))?;

        let document = PdfiumDocument { document };
        debug!("Opened document for rasterisation: {} pages", document.page_count());
        f(&document);
        Ok(())
    }
}
