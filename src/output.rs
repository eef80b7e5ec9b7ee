//! Data model produced by the enrichment pipeline.
//!
//! Everything here serialises to the terminal JSON shape consumed by the
//! indexing side:
//!
//! ```text
//! {
//!   "sections":          [ {content, type, viewport, page_number, offset?, role?, metadata?}, … ],
//!   "page_info":         { "<page_number>": {width, height, unit, angle}, … },
//!   "enriched_metadata": { … } | {},
//!   "metadata":          { total_pages, total_sections, total_figures, vision_extraction_enabled }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Page-info map keyed by 1-based page number.
///
/// `BTreeMap<u32, _>` keeps pages in numeric order and serialises the keys as
/// JSON strings (`"1"`, `"2"`, …).
pub type PageInfoMap = BTreeMap<u32, PageInfo>;

/// Length unit used by the analysis service for a page's coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    /// PDF and other vector inputs.
    #[default]
    Inch,
    /// Raster inputs (images).
    Pixel,
}

impl LengthUnit {
    /// PDF points (1/72 inch) per unit.
    ///
    /// Pixels are taken at the CSS reference density of 96 per inch.
    pub fn points_per_unit(self) -> f64 {
        match self {
            LengthUnit::Inch => 72.0,
            LengthUnit::Pixel => 0.75,
        }
    }
}

/// Dimensions of one physical page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub width: f64,
    pub height: f64,
    pub unit: LengthUnit,
    /// Detected text rotation in degrees. 0 when the service reports none.
    pub angle: f64,
}

/// What kind of content a [`Section`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Paragraph,
    Table,
    Figure,
}

/// One extracted content unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: SectionKind,
    /// Flattened polygon `[x1, y1, x2, y2, …]` in page units; empty when unknown.
    pub viewport: Vec<f64>,
    /// 1-based page number.
    pub page_number: u32,
    /// Character offset of the section in the analysed document text.
    ///
    /// `None` for vision-derived figure sections, which are appended after the
    /// ordered paragraph/table sections rather than interleaved with them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// Paragraph role (`title`, `sectionHeading`, `pageHeader`, …) verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Section {
    /// Ordering key for reading order: `(page_number, offset)`.
    pub fn reading_order_key(&self) -> (u32, usize) {
        (self.page_number, self.offset.unwrap_or(0))
    }
}

/// A character span in the analysed document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextSpan {
    pub offset: usize,
    pub length: usize,
}

/// A page number plus the polygon describing where content sits on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingRegion {
    pub page_number: u32,
    /// Flattened polygon in page units. May be shorter than 8 values when the
    /// service returned a degenerate shape; the cropper skips those.
    pub polygon: Vec<f64>,
}

/// A figure detected by the analysis service, ready for cropping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureDescriptor {
    pub bounding_regions: Vec<BoundingRegion>,
    pub caption: String,
    pub spans: Vec<TextSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// One bounding region of a figure rasterised to an image file.
///
/// The file at `image_path` is transient: it lives inside the per-document
/// scratch directory and is deleted when the parse finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CroppedImage {
    pub image_path: PathBuf,
    pub file_name: String,
    pub file_uid: String,
    pub bounding_region: BoundingRegion,
    pub page_number: u32,
    pub spans: Vec<TextSpan>,
    pub caption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub figure_id: Option<String>,
}

/// Document-level counters stored under `"metadata"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentStats {
    pub total_pages: usize,
    pub total_sections: usize,
    pub total_figures: usize,
    pub vision_extraction_enabled: bool,
}

/// The pipeline's terminal artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedDocument {
    pub sections: Vec<Section>,
    pub page_info: PageInfoMap,
    pub enriched_metadata: Map<String, Value>,
    pub metadata: DocumentStats,
}

impl EnrichedDocument {
    /// Serialise to the pretty-printed JSON shape written by the CLI.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Sections of the given kind, in list order.
    pub fn sections_of(&self, kind: SectionKind) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(move |s| s.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(page: u32, offset: Option<usize>) -> Section {
        Section {
            content: "Hello".into(),
            kind: SectionKind::Paragraph,
            viewport: vec![],
            page_number: page,
            offset,
            role: None,
            row_count: None,
            column_count: None,
            metadata: Map::new(),
        }
    }

    #[test]
    fn section_serialises_type_and_omits_empty_fields() {
        let json = serde_json::to_value(paragraph(2, Some(14))).unwrap();
        assert_eq!(json["type"], "paragraph");
        assert_eq!(json["offset"], 14);
        assert!(json.get("role").is_none());
        assert!(json.get("metadata").is_none());
        assert!(json.get("row_count").is_none());
    }

    #[test]
    fn figure_section_without_offset_omits_key() {
        let mut s = paragraph(1, None);
        s.kind = SectionKind::Figure;
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["type"], "figure");
        assert!(json.get("offset").is_none());
        assert_eq!(s.reading_order_key(), (1, 0));
    }

    #[test]
    fn page_info_keys_serialise_as_strings() {
        let mut pages = PageInfoMap::new();
        pages.insert(
            10,
            PageInfo {
                width: 8.5,
                height: 11.0,
                unit: LengthUnit::Inch,
                angle: 0.0,
            },
        );
        pages.insert(
            2,
            PageInfo {
                width: 1700.0,
                height: 2200.0,
                unit: LengthUnit::Pixel,
                angle: 0.5,
            },
        );
        let json = serde_json::to_string(&pages).unwrap();
        assert!(json.starts_with(r#"{"2":"#), "got: {json}");
        assert!(json.contains(r#""10":{"width":8.5"#));
        assert!(json.contains(r#""unit":"pixel""#));
    }

    #[test]
    fn points_per_unit() {
        assert_eq!(LengthUnit::Inch.points_per_unit(), 72.0);
        assert_eq!(LengthUnit::Pixel.points_per_unit(), 0.75);
    }
}
