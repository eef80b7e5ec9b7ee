//! Typed model of a raw layout-analysis result.
//!
//! Field names follow the service's camelCase JSON. Every field the
//! normaliser reads is either required-with-default or an explicit `Option`,
//! so a partially populated payload decodes instead of failing:
//!
//! | Field | Absent means |
//! |-------|--------------|
//! | `angle` | 0 |
//! | `unit` | inch |
//! | `content` | empty string |
//! | `spans` / `boundingRegions` / `cells` / `polygon` | empty list |
//! | `role` / `caption` / `id` | `None` |
//! | cell `kind` | `content` |
//! | cell `rowSpan` / `columnSpan` | 1 |

use crate::output::{BoundingRegion, LengthUnit, TextSpan};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawResult {
    pub pages: Vec<RawPage>,
    pub paragraphs: Vec<RawParagraph>,
    pub tables: Vec<RawTable>,
    pub figures: Vec<RawFigure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPage {
    pub page_number: u32,
    pub width: f64,
    pub height: f64,
    pub unit: LengthUnit,
    pub angle: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSpan {
    pub offset: usize,
    pub length: usize,
}

impl From<RawSpan> for TextSpan {
    fn from(span: RawSpan) -> Self {
        TextSpan {
            offset: span.offset,
            length: span.length,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawBoundingRegion {
    pub page_number: Option<u32>,
    /// Already flattened by the service: `[x1, y1, x2, y2, …]`.
    pub polygon: Vec<f64>,
}

impl RawBoundingRegion {
    /// Convert to the output model, defaulting a missing page to 1.
    pub fn to_region(&self) -> BoundingRegion {
        BoundingRegion {
            page_number: self.page_number.unwrap_or(1),
            polygon: self.polygon.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawParagraph {
    pub content: String,
    pub spans: Vec<RawSpan>,
    pub bounding_regions: Vec<RawBoundingRegion>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTable {
    pub row_count: u32,
    pub column_count: u32,
    pub cells: Vec<RawCell>,
    pub spans: Vec<RawSpan>,
    pub bounding_regions: Vec<RawBoundingRegion>,
}

/// Semantic role of a table cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CellKind {
    #[default]
    Content,
    ColumnHeader,
    RowHeader,
    StubHead,
    Description,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawCell {
    pub kind: CellKind,
    pub row_index: u32,
    pub column_index: u32,
    pub row_span: Option<u32>,
    pub column_span: Option<u32>,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawCaption {
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawFigure {
    pub id: Option<String>,
    pub bounding_regions: Vec<RawBoundingRegion>,
    pub spans: Vec<RawSpan>,
    pub caption: Option<RawCaption>,
}
