//! Table Renderer: `TableBlock` → GFM table syntax.
//!
//! Rules:
//!
//! * No header row → empty string. The caller omits the table entirely.
//! * Header row first, then a separator row with one alignment token per
//!   column (`-`, `-:` or `:-:`).
//! * Every cell is repeated `colspan` times; spans below 1 count as 1.
//! * Body rows whose cells are all blank after trimming are skipped.
//! * The table is as wide as its widest expanded row; shorter rows, the
//!   header included, are padded with empty cells.

use crate::output::{Alignment, TableBlock, TableCell};

/// Render a table to Markdown, or `""` when there is nothing to show.
pub fn render_table(table: &TableBlock) -> String {
    let mut header = match &table.header {
        Some(h) => expand_row(h),
        None => return String::new(),
    };

    let body: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|r| expand_row(r))
        .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
        .collect();

    let header_blank = header.iter().all(|c| c.trim().is_empty());
    if header.is_empty() || (header_blank && body.is_empty()) {
        return String::new();
    }

    let columns = body.iter().map(Vec::len).fold(header.len(), usize::max);
    header.resize(columns, String::new());
    let mut lines = Vec::with_capacity(body.len() + 2);
    lines.push(pipe_row(&header));

    let separator: Vec<String> = (0..columns)
        .map(|i| {
            table
                .alignments
                .get(i)
                .copied()
                .unwrap_or(Alignment::Default)
                .token()
                .to_string()
        })
        .collect();
    lines.push(pipe_row(&separator));

    for mut row in body {
        if row.len() < columns {
            row.resize(columns, String::new());
        }
        lines.push(pipe_row(&row));
    }

    lines.join("\n")
}

/// Repeat each cell's text by its clamped colspan.
fn expand_row(cells: &[TableCell]) -> Vec<String> {
    let mut out = Vec::with_capacity(cells.len());
    for cell in cells {
        let span = cell.colspan.max(1) as usize;
        let text = escape_cell(&cell.text);
        out.extend(std::iter::repeat_n(text, span));
    }
    out
}

fn escape_cell(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

fn pipe_row(cells: &[String]) -> String {
    format!("| {} |", cells.join(" | "))
}
