//! Markdown construction: table rendering, text/table merging, fragment
//! building and whitespace cleanup.

pub mod builder;
pub mod merge;
pub mod table;
pub mod tidy;

pub use builder::MarkdownBuilder;
pub use merge::{merge_page_text, table_regions};
pub use table::render_table;
pub use tidy::tidy_markdown;
