//! Spatial Text/Table Merger.
//!
//! Extraction engines often report a table's cell text twice: once inside the
//! table structure and once as loose text blocks. A text block whose box
//! overlaps any table region on the same page is dropped. The surviving blocks
//! keep the order the extractor produced them in.

use crate::output::{BoundingBox, TableBlock, TextBlock};
use tracing::debug;

/// Regions of the tables that reported one. Tables without a region exclude nothing.
pub fn table_regions(tables: &[TableBlock]) -> Vec<BoundingBox> {
    tables.iter().filter_map(|t| t.bbox).collect()
}

/// Text blocks that do not intersect any of `regions`, in their original order.
pub fn merge_page_text<'a>(
    text_blocks: &'a [TextBlock],
    regions: &[BoundingBox],
) -> Vec<&'a TextBlock> {
    text_blocks
        .iter()
        .filter(|block| {
            let inside = regions.iter().any(|r| block.bbox.intersects(r));
            if inside {
                debug!("Dropping text block inside table: {:?}", block.text);
            }
            !inside
        })
        .collect()
}
