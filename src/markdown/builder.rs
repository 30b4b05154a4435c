//! Ordered fragment builder for Markdown documents.
//!
//! Blocks are separated by one blank line. Page breaks carry their own
//! whitespace and are inserted verbatim.

#[derive(Debug, Clone)]
enum Fragment {
    Block(String),
    Break(String),
}

/// Accumulates Markdown fragments in order and joins them once at the end.
#[derive(Debug, Clone, Default)]
pub struct MarkdownBuilder {
    fragments: Vec<Fragment>,
}

impl MarkdownBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `#` repeated `level` times (clamped to 1..=6), then the text.
    pub fn heading(&mut self, level: usize, text: &str) -> &mut Self {
        let text = text.trim();
        if !text.is_empty() {
            let hashes = "#".repeat(level.clamp(1, 6));
            self.fragments
                .push(Fragment::Block(format!("{hashes} {text}")));
        }
        self
    }

    /// A paragraph. Blank text is ignored.
    pub fn paragraph(&mut self, text: &str) -> &mut Self {
        let text = text.trim();
        if !text.is_empty() {
            self.fragments.push(Fragment::Block(text.to_string()));
        }
        self
    }

    pub fn image(&mut self, alt: &str, url: &str) -> &mut Self {
        self.fragments
            .push(Fragment::Block(format!("![{alt}]({url})")));
        self
    }

    pub fn link(&mut self, text: &str, href: &str) -> &mut Self {
        self.fragments
            .push(Fragment::Block(format!("[{}]({href})", text.trim())));
        self
    }

    /// An already-rendered table. Empty renders are dropped.
    pub fn table(&mut self, rendered: &str) -> &mut Self {
        if !rendered.trim().is_empty() {
            self.fragments.push(Fragment::Block(rendered.to_string()));
        }
        self
    }

    /// Raw text inserted as its own block, untouched.
    pub fn raw(&mut self, text: impl Into<String>) -> &mut Self {
        let text = text.into();
        if !text.is_empty() {
            self.fragments.push(Fragment::Block(text));
        }
        self
    }

    /// A page break marker, already carrying its surrounding newlines.
    pub fn page_break(&mut self, marker: impl Into<String>) -> &mut Self {
        self.fragments.push(Fragment::Break(marker.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn build(self) -> String {
        let mut out = String::new();
        let mut need_gap = false;
        for fragment in self.fragments {
            match fragment {
                Fragment::Block(text) => {
                    if need_gap {
                        out.push_str("\n\n");
                    }
                    out.push_str(&text);
                    need_gap = true;
                }
                Fragment::Break(marker) => {
                    out.push_str(&marker);
                    need_gap = false;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_join_with_blank_line() {
        let mut b = MarkdownBuilder::new();
        b.heading(1, "Title").paragraph("Body");
        assert_eq!(b.build(), "# Title\n\nBody");
    }

    #[test]
    fn page_break_inserted_verbatim() {
        let mut b = MarkdownBuilder::new();
        b.paragraph("one")
            .page_break("\n\n---\n\n")
            .paragraph("two");
        assert_eq!(b.build(), "one\n\n---\n\ntwo");
    }

    #[test]
    fn blank_fragments_ignored() {
        let mut b = MarkdownBuilder::new();
        b.paragraph("  ").table("").heading(2, "");
        assert!(b.is_empty());
        assert_eq!(b.build(), "");
    }

    #[test]
    fn heading_level_clamped() {
        let mut b = MarkdownBuilder::new();
        b.heading(9, "Deep");
        assert_eq!(b.build(), "###### Deep");
    }

    #[test]
    fn image_and_link_syntax() {
        let mut b = MarkdownBuilder::new();
        b.image("Image", "https://x/a.png").link(" Home ", "https://x/");
        assert_eq!(b.build(), "![Image](https://x/a.png)\n\n[Home](https://x/)");
    }
}
