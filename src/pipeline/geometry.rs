//! Polygon and rectangle arithmetic shared by the normaliser and the cropper.
//!
//! The analysis service reports positions as flattened polygons
//! `[x1, y1, x2, y2, …]` in page units (inches for PDFs). Rasterising a
//! region needs an axis-aligned rectangle in pixels at a chosen DPI:
//!
//! ```text
//! polygon (units) ──▶ bbox (units) ──▶ × points_per_unit ──▶ × dpi/72 ──▶ pixels
//! ```

use crate::error::GeometryError;

/// PDF user-space points per inch.
pub const POINTS_PER_INCH: f64 = 72.0;

/// Minimum number of coordinates in a usable polygon (4 corners).
pub const MIN_POLYGON_COORDS: usize = 8;

/// Axis-aligned rectangle `(x0, y0)`–`(x1, y1)` with `x0 ≤ x1`, `y0 ≤ y1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}

/// Integer pixel rectangle, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Intersect with an image of `width × height` pixels.
    ///
    /// Returns `None` when nothing of the rectangle lies inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<PixelRect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(PixelRect {
            x: self.x,
            y: self.y,
            width: w,
            height: h,
        })
    }
}

/// Bounding box `(min_x, min_y, max_x, max_y)` of a flattened polygon.
///
/// Needs at least [`MIN_POLYGON_COORDS`] values. A trailing odd coordinate is
/// ignored.
pub fn polygon_to_bbox(polygon: &[f64]) -> Result<BBox, GeometryError> {
    if polygon.len() < MIN_POLYGON_COORDS {
        return Err(GeometryError::TooFewCoordinates { len: polygon.len() });
    }
    if polygon.iter().any(|v| !v.is_finite()) {
        return Err(GeometryError::NonFinite);
    }

    let mut bbox = BBox {
        x0: f64::INFINITY,
        y0: f64::INFINITY,
        x1: f64::NEG_INFINITY,
        y1: f64::NEG_INFINITY,
    };
    for point in polygon.chunks_exact(2) {
        bbox.x0 = bbox.x0.min(point[0]);
        bbox.y0 = bbox.y0.min(point[1]);
        bbox.x1 = bbox.x1.max(point[0]);
        bbox.y1 = bbox.y1.max(point[1]);
    }
    Ok(bbox)
}

/// `polygon` as a section viewport, or empty when it is not a usable
/// quadrilateral (too short, odd length or non-finite).
pub fn section_viewport(polygon: &[f64]) -> Vec<f64> {
    if polygon.len() % 2 == 0 && polygon_to_bbox(polygon).is_ok() {
        polygon.to_vec()
    } else {
        Vec::new()
    }
}

/// Pixels per source unit when rendering at `dpi`.
pub fn pixel_scale(points_per_unit: f64, dpi: u32) -> f64 {
    points_per_unit * f64::from(dpi) / POINTS_PER_INCH
}

/// Convert a bounding box in source units to pixels at `dpi`.
///
/// Units are first converted to points (`points_per_unit`, 72 for inches),
/// then scaled by `dpi / 72`. The origin is floored and the far edge ceiled so
/// the rectangle never loses a partially covered pixel. Negative coordinates
/// are clamped to 0.
pub fn scale_to_pixels(bbox: &BBox, points_per_unit: f64, dpi: u32) -> PixelRect {
    let scale = pixel_scale(points_per_unit, dpi);
    let x0 = (bbox.x0 * scale).floor().max(0.0);
    let y0 = (bbox.y0 * scale).floor().max(0.0);
    let x1 = (bbox.x1 * scale).ceil().max(x0);
    let y1 = (bbox.y1 * scale).ceil().max(y0);

    PixelRect {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    }
}
