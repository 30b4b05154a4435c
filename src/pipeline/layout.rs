//! Geometric layout analysis for text spans pulled out of a PDF page.
//!
//! Spans are grouped into visual rows, rows are split into cells on wide
//! horizontal gaps, and runs of consecutive rows with matching column
//! structure become tables. Text blocks are built from *all* rows, table
//! rows included; the merger later drops whatever falls inside a table.

use crate::output::{BoundingBox, PageContent, TableBlock, TableCell, TextBlock};
use crate::pipeline::pdf::RawPage;
use tracing::debug;

/// Tuning knobs for [`analyze_page`]. Distances are in PDF points.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutOptions {
    /// Minimum vertical tolerance when deciding if two spans share a row.
    pub row_tolerance: f32,
    /// Horizontal gap above which two spans on a row are separate cells.
    pub cell_gap: f32,
    /// A vertical gap larger than this fraction of the line height starts a new paragraph.
    pub paragraph_gap_ratio: f32,
    /// A vertical gap larger than this multiple of the row height ends a table.
    pub max_row_gap_ratio: f32,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            row_tolerance: 3.0,
            cell_gap: 10.0,
            paragraph_gap_ratio: 0.9,
            max_row_gap_ratio: 2.0,
        }
    }
}

/// Text blocks and tables found on one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub text_blocks: Vec<TextBlock>,
    pub tables: Vec<TableBlock>,
}

// ── Internal row model ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Cell {
    bbox: BoundingBox,
    text: String,
}

#[derive(Debug, Clone)]
struct Row {
    bbox: BoundingBox,
    cells: Vec<Cell>,
}

impl Row {
    fn text(&self) -> String {
        self.cells
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ── Analysis ─────────────────────────────────────────────────────────────

/// Analyse the spans of one page.
pub fn analyze_page(spans: &[TextBlock], opts: &LayoutOptions) -> PageLayout {
    let rows = group_rows(spans, opts);
    let runs = table_runs(&rows, opts);

    let tables = runs
        .iter()
        .map(|&(start, end)| {
            let slice = &rows[start..end];
            let grid = slice
                .iter()
                .map(|r| r.cells.iter().map(|c| c.text.clone()).collect())
                .collect();
            let bbox = slice
                .iter()
                .skip(1)
                .fold(slice[0].bbox, |acc, r| acc.union(&r.bbox));
            TableBlock::from_grid(grid, Some(bbox))
        })
        .collect::<Vec<_>>();

    let membership: Vec<Option<usize>> = (0..rows.len())
        .map(|i| runs.iter().position(|&(s, e)| i >= s && i < e))
        .collect();

    let mut text_blocks = Vec::new();
    let mut current: Option<(BoundingBox, Vec<String>)> = None;
    for (i, row) in rows.iter().enumerate() {
        let starts_new = i == 0 || membership[i] != membership[i - 1] || {
            let prev = &rows[i - 1];
            let gap = row.bbox.y0 - prev.bbox.y1;
            gap > prev.bbox.height().max(1.0) * opts.paragraph_gap_ratio
        };
        if starts_new {
            if let Some((bbox, lines)) = current.take() {
                text_blocks.push(TextBlock::new(bbox, lines.join("\n")));
            }
            current = Some((row.bbox, vec![row.text()]));
        } else if let Some((bbox, lines)) = current.as_mut() {
            *bbox = bbox.union(&row.bbox);
            lines.push(row.text());
        }
    }
    if let Some((bbox, lines)) = current {
        text_blocks.push(TextBlock::new(bbox, lines.join("\n")));
    }

    debug!(
        "Layout: {} rows, {} text blocks, {} tables",
        rows.len(),
        text_blocks.len(),
        tables.len()
    );

    PageLayout {
        text_blocks,
        tables,
    }
}

/// Turn a raw pdfium page into page content.
pub fn build_page(raw: RawPage, opts: &LayoutOptions) -> PageContent {
    let layout = analyze_page(&raw.spans, opts);
    PageContent {
        page_number: raw.page_number,
        width: raw.width,
        height: raw.height,
        text_blocks: layout.text_blocks,
        tables: layout.tables,
        images: raw.images,
    }
}

fn group_rows(spans: &[TextBlock], opts: &LayoutOptions) -> Vec<Row> {
    let mut sorted: Vec<&TextBlock> = spans.iter().filter(|s| !s.text.trim().is_empty()).collect();
    sorted.sort_by(|a, b| {
        a.bbox
            .center_y()
            .total_cmp(&b.bbox.center_y())
            .then(a.bbox.x0.total_cmp(&b.bbox.x0))
    });

    let mut grouped: Vec<Vec<&TextBlock>> = Vec::new();
    for span in sorted {
        let tolerance = opts.row_tolerance.max(span.bbox.height() * 0.4);
        match grouped.last_mut() {
            Some(row) if (span.bbox.center_y() - row[0].bbox.center_y()).abs() <= tolerance => {
                row.push(span)
            }
            _ => grouped.push(vec![span]),
        }
    }

    grouped
        .into_iter()
        .map(|mut spans| {
            spans.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
            let mut cells: Vec<Cell> = Vec::new();
            for span in spans {
                let text = span.text.trim();
                match cells.last_mut() {
                    Some(cell) if span.bbox.x0 - cell.bbox.x1 <= opts.cell_gap => {
                        cell.bbox = cell.bbox.union(&span.bbox);
                        if !cell.text.ends_with(' ') && !span.text.starts_with(' ') {
                            cell.text.push(' ');
                        }
                        cell.text.push_str(text);
                    }
                    _ => cells.push(Cell {
                        bbox: span.bbox,
                        text: text.to_string(),
                    }),
                }
            }
            let bbox = cells
                .iter()
                .skip(1)
                .fold(cells[0].bbox, |acc, c| acc.union(&c.bbox));
            Row { bbox, cells }
        })
        .collect()
}

/// `[start, end)` ranges of rows that form tables.
fn table_runs(rows: &[Row], opts: &LayoutOptions) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=rows.len() {
        let continues = i < rows.len() && rows_align(&rows[i - 1], &rows[i], opts);
        if !continues {
            if i - start >= 2 {
                runs.push((start, i));
            }
            start = i;
        }
    }
    runs
}

fn rows_align(prev: &Row, next: &Row, opts: &LayoutOptions) -> bool {
    if prev.cells.len() < 2 || prev.cells.len() != next.cells.len() {
        return false;
    }
    let gap = next.bbox.y0 - prev.bbox.y1;
    if gap > prev.bbox.height().max(1.0) * opts.max_row_gap_ratio {
        return false;
    }
    prev.cells
        .iter()
        .zip(&next.cells)
        .all(|(a, b)| a.bbox.x0 <= b.bbox.x1 && b.bbox.x0 <= a.bbox.x1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(x0: f32, y0: f32, x1: f32, y1: f32, text: &str) -> TextBlock {
        TextBlock::new(BoundingBox::new(x0, y0, x1, y1), text)
    }

    fn table_and_paragraph() -> Vec<TextBlock> {
        vec![
            span(50.0, 100.0, 60.0, 110.0, "A"),
            span(200.0, 100.0, 210.0, 110.0, "B"),
            span(50.0, 115.0, 60.0, 125.0, "1"),
            span(200.0, 115.0, 210.0, 125.0, "2"),
            span(50.0, 160.0, 300.0, 170.0, "Some text below"),
        ]
    }

    #[test]
    fn detects_two_by_two_table() {
        let layout = analyze_page(&table_and_paragraph(), &LayoutOptions::default());
        assert_eq!(layout.tables.len(), 1);
        let table = &layout.tables[0];
        let header: Vec<_> = table.header.as_ref().unwrap().iter().map(|c| c.text.as_str()).collect();
        assert_eq!(header, ["A", "B"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][0].text, "1");
        assert_eq!(table.bbox, Some(BoundingBox::new(50.0, 100.0, 210.0, 125.0)));
    }

    #[test]
    fn table_rows_become_their_own_text_block() {
        let layout = analyze_page(&table_and_paragraph(), &LayoutOptions::default());
        assert_eq!(layout.text_blocks.len(), 2);
        assert_eq!(layout.text_blocks[0].text, "A B\n1 2");
        assert_eq!(layout.text_blocks[1].text, "Some text below");
        let table_box = layout.tables[0].bbox.unwrap();
        assert!(layout.text_blocks[0].bbox.intersects(&table_box));
        assert!(!layout.text_blocks[1].bbox.intersects(&table_box));
    }

    #[test]
    fn close_spans_merge_into_one_line() {
        let spans = vec![
            span(10.0, 10.0, 40.0, 20.0, "Hello"),
            span(44.0, 10.5, 80.0, 20.5, "world"),
        ];
        let layout = analyze_page(&spans, &LayoutOptions::default());
        assert!(layout.tables.is_empty());
        assert_eq!(layout.text_blocks.len(), 1);
        assert_eq!(layout.text_blocks[0].text, "Hello world");
    }

    #[test]
    fn consecutive_lines_form_a_paragraph() {
        let spans = vec![
            span(10.0, 10.0, 200.0, 20.0, "first line"),
            span(10.0, 22.0, 200.0, 32.0, "second line"),
            span(10.0, 60.0, 200.0, 70.0, "new paragraph"),
        ];
        let layout = analyze_page(&spans, &LayoutOptions::default());
        let texts: Vec<_> = layout.text_blocks.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, ["first line\nsecond line", "new paragraph"]);
    }

    #[test]
    fn single_aligned_row_is_not_a_table() {
        let spans = vec![
            span(10.0, 10.0, 20.0, 20.0, "x"),
            span(100.0, 10.0, 110.0, 20.0, "y"),
        ];
        let layout = analyze_page(&spans, &LayoutOptions::default());
        assert!(layout.tables.is_empty());
    }

    #[test]
    fn blank_spans_are_ignored() {
        let spans = vec![span(0.0, 0.0, 5.0, 5.0, "   ")];
        assert_eq!(analyze_page(&spans, &LayoutOptions::default()), PageLayout::default());
    }

    #[test]
    fn build_page_keeps_geometry_and_images() {
        let raw = RawPage {
            page_number: 3,
            width: 612.0,
            height: 792.0,
            spans: table_and_paragraph(),
            images: Vec::new(),
        };
        let page = build_page(raw, &LayoutOptions::default());
        assert_eq!(page.page_number, 3);
        assert_eq!(page.width, 612.0);
        assert_eq!(page.tables.len(), 1);
    }
}
