//! Figure cropping: rasterise each figure bounding region to a PNG file.
//!
//! ```text
//! FigureDescriptor ─┬─ region 1 ── plan ── render page ── crop ── save ──▶ CroppedImage
//!                   └─ region 2 ── plan ✗ (too few coordinates) ─────────▶ SkippedRegion
//! ```
//!
//! Regions are independent. A region that cannot be planned, rendered or
//! saved is recorded in [`CropOutcome::skipped`] and the rest carry on. The
//! call as a whole fails only when the document cannot be opened or the
//! output directory cannot be created.
//!
//! Everything here is blocking; the parser runs it inside `spawn_blocking`.

use crate::error::{CropError, RegionCropError};
use crate::output::{BoundingRegion, CroppedImage, FigureDescriptor, PageInfoMap};
use crate::pipeline::geometry::{polygon_to_bbox, scale_to_pixels, PixelRect, POINTS_PER_INCH};
use crate::pipeline::rasterize::{RasterDocument, Rasterizer};
use image::{DynamicImage, ImageFormat};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default crop resolution.
pub const DEFAULT_DPI: u32 = 300;

/// A region that was not turned into an image.
#[derive(Debug, Clone)]
pub struct SkippedRegion {
    /// Index of the figure in the input slice.
    pub figure_index: usize,
    pub page_number: u32,
    pub reason: RegionCropError,
}

/// Result of [`FigureCropper::crop_figures`].
#[derive(Debug, Clone, Default)]
pub struct CropOutcome {
    /// One entry per successfully rasterised region, in figure/region order.
    pub images: Vec<CroppedImage>,
    pub skipped: Vec<SkippedRegion>,
}

/// A validated region, ready to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RegionPlan {
    page_index: usize,
    rect: PixelRect,
}

/// Crops figure regions out of rendered PDF pages.
#[derive(Clone)]
pub struct FigureCropper {
    rasterizer: Arc<dyn Rasterizer>,
    dpi: u32,
}

impl FigureCropper {
    pub fn new(rasterizer: Arc<dyn Rasterizer>, dpi: u32) -> Self {
        Self { rasterizer, dpi }
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    /// Rasterise every bounding region of every figure into `output_dir`.
    ///
    /// `page_info` supplies the unit of each page's coordinates; pages not in
    /// the map are assumed to be in inches.
    pub fn crop_figures(
        &self,
        document: &[u8],
        figures: &[FigureDescriptor],
        page_info: &PageInfoMap,
        output_dir: &Path,
    ) -> Result<CropOutcome, CropError> {
        std::fs::create_dir_all(output_dir).map_err(|source| CropError::OutputDir {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let mut outcome = CropOutcome::default();
        let scale = self.dpi as f32 / POINTS_PER_INCH as f32;

        self.rasterizer.with_document(document, &mut |doc: &dyn RasterDocument| {
            let mut page_cache: Option<(usize, DynamicImage)> = None;

            for (figure_index, figure) in figures.iter().enumerate() {
                for region in &figure.bounding_regions {
                    let result = self
                        .plan_region(region, page_info, doc.page_count())
                        .and_then(|plan| {
                            crop_region(doc, plan, region.page_number, scale, &mut page_cache)
                        })
                        .and_then(|cropped| save_region(&cropped, region, figure, output_dir));

                    match result {
                        Ok(image) => {
                            debug!(
                                "Cropped figure {} region on page {} → {}",
                                figure_index,
                                region.page_number,
                                image.file_name
                            );
                            outcome.images.push(image);
                        }
                        Err(reason) => {
                            warn!(
                                "Skipping figure {} region on page {}: {}",
                                figure_index, region.page_number, reason
                            );
                            outcome.skipped.push(SkippedRegion {
                                figure_index,
                                page_number: region.page_number,
                                reason,
                            });
                        }
                    }
                }
            }
        })?;

        info!(
            "Cropped {} region(s) from {} figure(s), skipped {}",
            outcome.images.len(),
            figures.len(),
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    fn plan_region(
        &self,
        region: &BoundingRegion,
        page_info: &PageInfoMap,
        page_count: usize,
    ) -> Result<RegionPlan, RegionCropError> {
        let bbox = polygon_to_bbox(&region.polygon)?;

        let page_index = (region.page_number as usize)
            .checked_sub(1)
            .filter(|&i| i < page_count)
            .ok_or(RegionCropError::PageOutOfRange {
                page: region.page_number,
                total: page_count,
            })?;

        let unit = page_info
            .get(&region.page_number)
            .map(|p| p.unit)
            .unwrap_or_default();

        Ok(RegionPlan {
            page_index,
            rect: scale_to_pixels(&bbox, unit.points_per_unit(), self.dpi),
        })
    }
}

fn crop_region(
    doc: &dyn RasterDocument,
    plan: RegionPlan,
    page_number: u32,
    scale: f32,
    page_cache: &mut Option<(usize, DynamicImage)>,
) -> Result<DynamicImage, RegionCropError> {
    let cached = matches!(page_cache, Some((idx, _)) if *idx == plan.page_index);
    if !cached {
        let rendered = doc
            .render_page(plan.page_index, scale)
            .map_err(|detail| RegionCropError::Render {
                page: page_number,
                detail,
            })?;
        *page_cache = Some((plan.page_index, rendered));
    }

    let Some((_, page)) = page_cache.as_ref() else {
        return Err(RegionCropError::Render {
            page: page_number,
            detail: "page image missing after render".into(),
        });
    };

    let rect = plan
        .rect
        .clamp_to(page.width(), page.height())
        .ok_or(RegionCropError::EmptyRegion { page: page_number })?;

    Ok(page.crop_imm(rect.x, rect.y, rect.width, rect.height))
}

fn save_region(
    cropped: &DynamicImage,
    region: &BoundingRegion,
    figure: &FigureDescriptor,
    output_dir: &Path,
) -> Result<CroppedImage, RegionCropError> {
    let file_uid = Uuid::new_v4().to_string();
    let file_name = format!("{}_page_{}.png", file_uid, region.page_number);
    let image_path = output_dir.join(&file_name);

    cropped
        .save_with_format(&image_path, ImageFormat::Png)
        .map_err(|e| RegionCropError::Save {
            path: image_path.clone(),
            detail: e.to_string(),
        })?;

    Ok(CroppedImage {
        image_path,
        file_name,
        file_uid,
        bounding_region: region.clone(),
        page_number: region.page_number,
        spans: figure.spans.clone(),
        caption: figure.caption.clone(),
        figure_id: figure.id.clone(),
    })
}

/// Delete transient image files, returning how many were removed.
///
/// Paths that no longer exist are ignored, so calling this twice is harmless.
pub fn cleanup_cropped_images(paths: &[PathBuf]) -> usize {
    let mut deleted = 0;
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => deleted += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
        }
    }
    if deleted > 0 {
        debug!("Deleted {} cropped image(s)", deleted);
    }
    deleted
}

/// Per-document scratch directory, removed with its contents on drop.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// `root/<document_id>`. Path separators and other unusual characters in
    /// the id are replaced with `_`. An empty id gets a random name so the
    /// directory is never `root` itself. Nothing is created on disk here.
    pub fn new(root: &Path, document_id: &str) -> Self {
        let safe: String = document_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let mut path = root.join(&safe);
        if safe.is_empty() || path == root {
            let fallback = Uuid::new_v4().to_string();
            warn!(
                "Document id {:?} gives no scratch subdirectory, using {}",
                document_id, fallback
            );
            path = root.join(fallback);
        }
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed scratch directory {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}
