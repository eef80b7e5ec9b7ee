//! Normalisation: raw layout result → page info, ordered sections, figures.
//!
//! Every element is converted independently and missing fields fall back to
//! the defaults documented on [`crate::analysis::result`], so one malformed
//! paragraph or table never costs the rest of the document.
//!
//! ## Reading order
//!
//! After conversion the section list is sorted by `(page_number, offset)`.
//! The sort is stable: elements sharing a key keep their service order
//! (paragraphs before tables). Consumers rely on this order.

use crate::analysis::result::{
    CellKind, RawBoundingRegion, RawCell, RawFigure, RawParagraph, RawResult, RawSpan, RawTable,
};
use crate::output::{FigureDescriptor, PageInfo, PageInfoMap, Section, SectionKind};
use crate::pipeline::geometry::section_viewport;
use serde_json::Map;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{debug, info};

/// Output of [`normalize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    /// Paragraph and table sections in reading order.
    pub sections: Vec<Section>,
    pub page_info: PageInfoMap,
    pub figures: Vec<FigureDescriptor>,
}

/// Convert a raw analysis result into sections, page info and figure descriptors.
pub fn normalize(raw: &RawResult, include_tables: bool, include_figures: bool) -> Normalized {
    let page_info: PageInfoMap = raw
        .pages
        .iter()
        .map(|page| {
            (
                page.page_number,
                PageInfo {
                    width: page.width,
                    height: page.height,
                    unit: page.unit,
                    angle: page.angle.unwrap_or(0.0),
                },
            )
        })
        .collect();

    let mut sections: Vec<Section> = raw.paragraphs.iter().map(paragraph_section).collect();

    if include_tables {
        sections.extend(raw.tables.iter().map(table_section));
    }

    let figures: Vec<FigureDescriptor> = if include_figures {
        raw.figures.iter().map(figure_descriptor).collect()
    } else {
        Vec::new()
    };

    sections.sort_by_key(Section::reading_order_key);

    info!(
        "Normalised {} sections, {} figures from {} pages",
        sections.len(),
        figures.len(),
        page_info.len()
    );

    Normalized {
        sections,
        page_info,
        figures,
    }
}

/// Viewport, page number and offset shared by paragraphs and tables.
fn placement(regions: &[RawBoundingRegion], spans: &[RawSpan]) -> (Vec<f64>, u32, usize) {
    let first = regions.first();
    let viewport = first.map(|r| section_viewport(&r.polygon)).unwrap_or_default();
    let page_number = first.and_then(|r| r.page_number).unwrap_or(1);
    let offset = spans.first().map(|s| s.offset).unwrap_or(0);
    (viewport, page_number, offset)
}

fn paragraph_section(paragraph: &RawParagraph) -> Section {
    let (viewport, page_number, offset) = placement(&paragraph.bounding_regions, &paragraph.spans);
    Section {
        content: paragraph.content.clone(),
        kind: SectionKind::Paragraph,
        viewport,
        page_number,
        offset: Some(offset),
        role: paragraph.role.clone(),
        row_count: None,
        column_count: None,
        metadata: Map::new(),
    }
}

fn table_section(table: &RawTable) -> Section {
    let (viewport, page_number, offset) = placement(&table.bounding_regions, &table.spans);
    debug!(
        "Table on page {}: {}x{} ({} cells)",
        page_number,
        table.row_count,
        table.column_count,
        table.cells.len()
    );
    Section {
        content: table_to_html(table),
        kind: SectionKind::Table,
        viewport,
        page_number,
        offset: Some(offset),
        role: None,
        row_count: Some(table.row_count),
        column_count: Some(table.column_count),
        metadata: Map::new(),
    }
}

fn figure_descriptor(figure: &RawFigure) -> FigureDescriptor {
    FigureDescriptor {
        bounding_regions: figure
            .bounding_regions
            .iter()
            .map(RawBoundingRegion::to_region)
            .collect(),
        caption: figure
            .caption
            .as_ref()
            .map(|c| c.content.clone())
            .unwrap_or_default(),
        spans: figure.spans.iter().copied().map(Into::into).collect(),
        id: figure.id.clone(),
    }
}

/// Render a table as HTML markup.
///
/// Cells are grouped by `row_index` and ordered by `column_index`.
/// `columnHeader` cells become `<th>`, everything else `<td>`. `colspan` /
/// `rowspan` are written only when greater than 1. Rows without cells
/// (covered entirely by row spans, or missing) are left out. Cell text is
/// HTML-escaped.
pub fn table_to_html(table: &RawTable) -> String {
    let mut rows: BTreeMap<u32, Vec<&RawCell>> = BTreeMap::new();
    for cell in &table.cells {
        rows.entry(cell.row_index).or_default().push(cell);
    }

    let mut html = String::from("<table>\n");
    for row in rows.values_mut() {
        row.sort_by_key(|c| c.column_index);
        html.push_str("  <tr>");
        for cell in row.iter() {
            let tag = if cell.kind == CellKind::ColumnHeader {
                "th"
            } else {
                "td"
            };
            html.push('<');
            html.push_str(tag);
            if let Some(span) = cell.column_span.filter(|&s| s > 1) {
                let _ = write!(html, " colspan='{span}'");
            }
            if let Some(span) = cell.row_span.filter(|&s| s > 1) {
                let _ = write!(html, " rowspan='{span}'");
            }
            let _ = write!(html, ">{}</{tag}>", escape_html(&cell.content));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</table>");
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::result::{RawCaption, RawPage};
    use crate::output::LengthUnit;

    fn region(page: u32) -> RawBoundingRegion {
        RawBoundingRegion {
            page_number: Some(page),
            polygon: vec![1.0, 1.0, 3.0, 1.0, 3.0, 2.0, 1.0, 2.0],
        }
    }

    fn para(content: &str, page: u32, offset: usize) -> RawParagraph {
        RawParagraph {
            content: content.into(),
            spans: vec![RawSpan { offset, length: content.len() }],
            bounding_regions: vec![region(page)],
            role: None,
        }
    }

    fn cell(row: u32, col: u32, content: &str) -> RawCell {
        RawCell {
            row_index: row,
            column_index: col,
            content: content.into(),
            ..Default::default()
        }
    }

    #[test]
    fn two_by_two_table_uses_body_cells() {
        let table = RawTable {
            row_count: 2,
            column_count: 2,
            cells: vec![
                cell(0, 0, "r0c0"),
                cell(0, 1, "r0c1"),
                cell(1, 0, "r1c0"),
                cell(1, 1, "r1c1"),
            ],
            ..Default::default()
        };
        let html = table_to_html(&table);
        assert_eq!(
            html,
            "<table>\n  <tr><td>r0c0</td><td>r0c1</td></tr>\n  <tr><td>r1c0</td><td>r1c1</td></tr>\n</table>"
        );
        assert_eq!(html.matches("<tr>").count(), 2);
        assert_eq!(html.matches("<td>").count(), 4);
        assert!(!html.contains("<th"));
    }

    #[test]
    fn column_header_cell_uses_th() {
        let mut header = cell(0, 0, "Year");
        header.kind = CellKind::ColumnHeader;
        let table = RawTable {
            row_count: 2,
            column_count: 1,
            cells: vec![header, cell(1, 0, "2024")],
            ..Default::default()
        };
        let html = table_to_html(&table);
        assert!(html.contains("<tr><th>Year</th></tr>"), "got: {html}");
        assert!(html.contains("<tr><td>2024</td></tr>"), "got: {html}");
    }

    #[test]
    fn row_header_is_not_a_header_cell() {
        let mut c = cell(0, 0, "Total");
        c.kind = CellKind::RowHeader;
        let table = RawTable {
            row_count: 1,
            column_count: 1,
            cells: vec![c],
            ..Default::default()
        };
        assert!(table_to_html(&table).contains("<td>Total</td>"));
    }

    #[test]
    fn spans_only_when_greater_than_one() {
        let mut wide = cell(0, 0, "wide");
        wide.column_span = Some(2);
        wide.row_span = Some(1);
        let mut tall = cell(1, 0, "tall");
        tall.row_span = Some(2);
        tall.column_span = Some(1);
        let mut both = cell(1, 1, "both");
        both.row_span = Some(2);
        both.column_span = Some(3);
        let table = RawTable {
            row_count: 3,
            column_count: 4,
            cells: vec![wide, tall, both],
            ..Default::default()
        };
        let html = table_to_html(&table);
        assert!(html.contains("<td colspan='2'>wide</td>"), "got: {html}");
        assert!(html.contains("<td rowspan='2'>tall</td>"), "got: {html}");
        assert!(html.contains("<td colspan='3' rowspan='2'>both</td>"), "got: {html}");
        // Row 2 is fully covered by row spans and has no cells of its own.
        assert_eq!(html.matches("<tr>").count(), 2);
    }

    #[test]
    fn cells_out_of_order_are_rendered_row_major() {
        let table = RawTable {
            row_count: 2,
            column_count: 2,
            cells: vec![cell(1, 1, "d"), cell(0, 1, "b"), cell(1, 0, "c"), cell(0, 0, "a")],
            ..Default::default()
        };
        let html = table_to_html(&table);
        assert!(html.contains("<tr><td>a</td><td>b</td></tr>\n  <tr><td>c</td><td>d</td></tr>"));
    }

    #[test]
    fn cell_text_is_escaped_and_overflow_rows_kept() {
        let table = RawTable {
            row_count: 1,
            column_count: 1,
            cells: vec![cell(0, 0, "a < b & c"), cell(3, 0, "late")],
            ..Default::default()
        };
        let html = table_to_html(&table);
        assert!(html.contains("<td>a &lt; b &amp; c</td>"));
        assert!(html.contains("<td>late</td>"));
    }

    #[test]
    fn huge_row_index_renders_only_present_rows() {
        let raw: RawResult = serde_json::from_value(serde_json::json!({
            "tables": [{
                "rowCount": 1,
                "columnCount": 1,
                "cells": [
                    {"rowIndex": 0, "columnIndex": 0, "content": "first"},
                    {"rowIndex": 4294967295u32, "columnIndex": 0, "content": "last"}
                ]
            }]
        }))
        .unwrap();

        let out = normalize(&raw, true, true);
        assert_eq!(
            out.sections[0].content,
            "<table>\n  <tr><td>first</td></tr>\n  <tr><td>last</td></tr>\n</table>"
        );
    }

    #[test]
    fn short_or_odd_polygon_gives_empty_viewport() {
        let raw: RawResult = serde_json::from_value(serde_json::json!({
            "paragraphs": [
                {"content": "six", "boundingRegions": [{"pageNumber": 1, "polygon": [1, 1, 2, 1, 2, 2]}]},
                {"content": "nine", "boundingRegions": [{"pageNumber": 1, "polygon": [1, 1, 2, 1, 2, 2, 1, 2, 5]}]},
                {"content": "eight", "boundingRegions": [{"pageNumber": 1, "polygon": [1, 1, 2, 1, 2, 2, 1, 2]}]}
            ],
            "tables": [{
                "rowCount": 1,
                "columnCount": 1,
                "cells": [{"rowIndex": 0, "columnIndex": 0, "content": "t"}],
                "boundingRegions": [{"pageNumber": 1, "polygon": [0, 0, 1, 0]}]
            }]
        }))
        .unwrap();

        let out = normalize(&raw, true, true);
        let viewports: Vec<usize> = out.sections.iter().map(|s| s.viewport.len()).collect();
        assert_eq!(viewports, vec![0, 0, 8, 0]);
    }

    #[test]
    fn sections_sorted_by_page_then_offset() {
        let raw = RawResult {
            pages: vec![
                RawPage { page_number: 1, width: 8.5, height: 11.0, unit: LengthUnit::Inch, angle: None },
                RawPage { page_number: 2, width: 8.5, height: 11.0, unit: LengthUnit::Inch, angle: Some(-0.3) },
            ],
            paragraphs: vec![para("p2-late", 2, 400), para("p1-b", 1, 50), para("p2-early", 2, 300), para("p1-a", 1, 0)],
            tables: vec![RawTable {
                row_count: 1,
                column_count: 1,
                cells: vec![cell(0, 0, "t")],
                spans: vec![RawSpan { offset: 100, length: 10 }],
                bounding_regions: vec![region(1)],
            }],
            figures: vec![],
        };

        let out = normalize(&raw, true, true);
        let order: Vec<(u32, Option<usize>)> =
            out.sections.iter().map(|s| (s.page_number, s.offset)).collect();
        assert_eq!(
            order,
            vec![(1, Some(0)), (1, Some(50)), (1, Some(100)), (2, Some(300)), (2, Some(400))]
        );
        assert_eq!(out.sections[2].kind, SectionKind::Table);
        assert_eq!(out.sections[2].row_count, Some(1));
        assert!(out
            .sections
            .windows(2)
            .all(|w| w[0].reading_order_key() <= w[1].reading_order_key()));

        assert_eq!(out.page_info.len(), 2);
        assert_eq!(out.page_info[&1].angle, 0.0);
        assert_eq!(out.page_info[&2].angle, -0.3);
    }

    #[test]
    fn paragraph_defaults_when_fields_missing() {
        let raw = RawResult {
            paragraphs: vec![RawParagraph {
                content: "orphan".into(),
                role: Some("sectionHeading".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let out = normalize(&raw, true, true);
        let s = &out.sections[0];
        assert_eq!(s.page_number, 1);
        assert_eq!(s.offset, Some(0));
        assert!(s.viewport.is_empty());
        assert_eq!(s.role.as_deref(), Some("sectionHeading"));
    }

    #[test]
    fn tables_and_figures_can_be_excluded() {
        let raw = RawResult {
            tables: vec![RawTable::default()],
            figures: vec![RawFigure::default()],
            ..Default::default()
        };
        let out = normalize(&raw, false, false);
        assert!(out.sections.is_empty());
        assert!(out.figures.is_empty());
    }

    #[test]
    fn multi_region_figure_with_caption() {
        let raw = RawResult {
            figures: vec![RawFigure {
                id: Some("1.1".into()),
                bounding_regions: vec![region(1), region(2)],
                spans: vec![RawSpan { offset: 10, length: 5 }, RawSpan { offset: 40, length: 2 }],
                caption: Some(RawCaption {
                    content: "Figure 1: Revenue".into(),
                }),
            }],
            ..Default::default()
        };
        let out = normalize(&raw, true, true);
        let fig = &out.figures[0];
        assert_eq!(fig.bounding_regions.len(), 2);
        assert_eq!(fig.bounding_regions[1].page_number, 2);
        assert_eq!(fig.caption, "Figure 1: Revenue");
        assert_eq!(fig.spans.len(), 2);
        assert_eq!(fig.spans[1].offset, 40);
        assert_eq!(fig.id.as_deref(), Some("1.1"));
    }

    #[test]
    fn figure_without_caption_has_empty_caption() {
        let raw = RawResult {
            figures: vec![RawFigure::default()],
            ..Default::default()
        };
        let out = normalize(&raw, true, true);
        assert_eq!(out.figures[0].caption, "");
        assert!(out.figures[0].bounding_regions.is_empty());
    }
}
