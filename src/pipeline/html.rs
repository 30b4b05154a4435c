//! HTML → Markdown for the open-source web path, plus the `<img>` pre-rewrite
//! used before handing HTML to the layout engine.
//!
//! Only `p`, `h1`..`h6`, `img` and `table` elements are converted, in document
//! order. Script and style content never reaches the output.

use crate::markdown::{render_table, MarkdownBuilder};
use crate::output::{Alignment, PendingImage, TableBlock, TableCell};
use crate::resolve::normalise_web_extension;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::Url;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, warn};

static SEL_CONTENT: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("h1, h2, h3, h4, h5, h6, p, img, table").unwrap()
});
static SEL_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static SEL_TR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());

static RE_DATA_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^data:image/([A-Za-z0-9.+-]+);base64,(.*)$").unwrap());
static RE_TEXT_ALIGN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)text-align\s*:\s*([a-z]+)").unwrap());
static RE_IMG_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<img\b[^>]*>").unwrap());
static RE_SRC_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());
static RE_ALT_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)\balt\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

/// Elements whose text is never visible.
const HIDDEN: [&str; 4] = ["script", "style", "noscript", "template"];

/// Result of converting one HTML page.
#[derive(Debug, Clone, Default)]
pub struct HtmlDocument {
    pub markdown: String,
    /// Images referenced from `markdown`, in document order.
    pub images: Vec<PendingImage>,
    pub title: Option<String>,
    pub table_count: usize,
}

/// Convert an HTML page to Markdown.
pub fn html_to_markdown(html: &str, page_url: &Url) -> HtmlDocument {
    let document = Html::parse_document(html);
    let mut md = MarkdownBuilder::new();
    let mut images = Vec::new();
    let mut table_count = 0;

    let title = document
        .select(&SEL_TITLE)
        .next()
        .map(|t| collapse(&visible_text(t)))
        .filter(|t| !t.is_empty());
    if let Some(title) = &title {
        md.heading(1, title);
    }

    for el in document.select(&SEL_CONTENT) {
        let name = el.value().name();
        if name != "img" && has_ancestor(el, &["table"]) {
            continue;
        }
        if has_ancestor(el, &HIDDEN) {
            continue;
        }
        match name {
            "p" => {
                md.paragraph(&collapse(&visible_text(el)));
            }
            "img" => {
                if let Some(image) = pending_image(el, page_url) {
                    md.image("Image", &image.reference);
                    images.push(image);
                }
            }
            "table" => {
                let rendered = render_table(&parse_table(el));
                if !rendered.is_empty() {
                    table_count += 1;
                    md.table(&rendered);
                }
            }
            heading => {
                let level = heading[1..].parse().unwrap_or(1);
                md.heading(level, &collapse(&visible_text(el)));
            }
        }
    }

    debug!(
        "HTML converted: {} images, {} tables",
        images.len(),
        table_count
    );

    HtmlDocument {
        markdown: md.build(),
        images,
        title,
        table_count,
    }
}

/// Replace every `<img src=..>` with `<p>![alt](absolute-src)</p>`.
///
/// Relative sources are resolved against `page_url`; tags without a `src`
/// are left alone.
pub fn rewrite_img_tags(html: &str, page_url: &Url) -> String {
    RE_IMG_TAG
        .replace_all(html, |caps: &Captures<'_>| {
            let tag = &caps[0];
            let Some(src) = attr(&RE_SRC_ATTR, tag).filter(|s| !s.trim().is_empty()) else {
                return tag.to_string();
            };
            let absolute = page_url
                .join(src.trim())
                .map(|u| u.to_string())
                .unwrap_or_else(|_| src.trim().to_string());
            let alt = attr(&RE_ALT_ATTR, tag)
                .map(|a| collapse(&a))
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| "Image".to_string());
            format!("<p>![{}]({})</p>", alt, absolute)
        })
        .into_owned()
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn attr(re: &Regex, tag: &str) -> Option<String> {
    re.captures(tag)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
}

fn has_ancestor(el: ElementRef<'_>, names: &[&str]) -> bool {
    el.ancestors().any(|node| {
        node.value()
            .as_element()
            .is_some_and(|e| names.contains(&e.name()))
    })
}

/// Descendant text, skipping hidden elements.
fn visible_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(e) if HIDDEN.contains(&e.name()) => {}
            Node::Element(e) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    if e.name() == "br" {
                        out.push(' ');
                    }
                    out.push_str(&visible_text(child_el));
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
    out
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn pending_image(el: ElementRef<'_>, page_url: &Url) -> Option<PendingImage> {
    let src = el.value().attr("src")?.trim();
    if src.is_empty() {
        return None;
    }
    if src.starts_with("data:") {
        return decode_data_uri(src);
    }
    match page_url.join(src) {
        Ok(url) => Some(PendingImage::remote(url.to_string())),
        Err(e) => {
            warn!("Skipping image with unresolvable src {:?}: {}", src, e);
            None
        }
    }
}

/// `data:image/<type>;base64,<payload>` → inline image keyed by the URI itself.
fn decode_data_uri(src: &str) -> Option<PendingImage> {
    let compact: String = src.chars().filter(|c| !c.is_whitespace()).collect();
    let caps = RE_DATA_URI.captures(&compact)?;
    let extension = normalise_web_extension(&caps[1]);
    match base64::engine::general_purpose::STANDARD.decode(&caps[2]) {
        Ok(bytes) => Some(PendingImage::inline(compact.clone(), bytes, extension)),
        Err(e) => {
            warn!("Skipping undecodable data URI image: {}", e);
            None
        }
    }
}

fn cell_alignment(cell: ElementRef<'_>) -> Alignment {
    if let Some(align) = cell.value().attr("align") {
        return Alignment::from_hint(align);
    }
    cell.value()
        .attr("style")
        .and_then(|s| RE_TEXT_ALIGN.captures(s))
        .map(|c| Alignment::from_hint(&c[1]))
        .unwrap_or_default()
}

fn row_cells(tr: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    tr.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| matches!(c.value().name(), "td" | "th"))
        .collect()
}

fn to_cells(cells: &[ElementRef<'_>]) -> Vec<TableCell> {
    cells
        .iter()
        .map(|c| {
            let colspan = c
                .value()
                .attr("colspan")
                .and_then(|v| v.trim().parse::<i32>().ok())
                .unwrap_or(1);
            TableCell::spanning(collapse(&visible_text(*c)), colspan)
        })
        .collect()
}

/// Header from `thead` (or the first row), alignment from header cells.
fn parse_table(table: ElementRef<'_>) -> TableBlock {
    let own_rows: Vec<ElementRef<'_>> = table
        .select(&SEL_TR)
        .filter(|tr| {
            tr.ancestors()
                .find(|n| n.value().as_element().is_some_and(|e| e.name() == "table"))
                .is_some_and(|n| n.id() == table.id())
        })
        .collect();

    let in_thead = |tr: &ElementRef<'_>| {
        tr.ancestors()
            .take_while(|n| n.id() != table.id())
            .any(|n| n.value().as_element().is_some_and(|e| e.name() == "thead"))
    };

    let (header_row, body_rows): (Option<ElementRef<'_>>, Vec<ElementRef<'_>>) =
        match own_rows.iter().position(|tr| in_thead(tr)) {
            Some(i) => (
                Some(own_rows[i]),
                own_rows.iter().copied().filter(|tr| !in_thead(tr)).collect(),
            ),
            None => {
                let mut rows = own_rows.into_iter();
                (rows.next(), rows.collect())
            }
        };

    let Some(header_row) = header_row else {
        return TableBlock::default();
    };
    let header_cells = row_cells(header_row);
    let mut alignments = Vec::new();
    for cell in &header_cells {
        let span = cell
            .value()
            .attr("colspan")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        alignments.extend(std::iter::repeat_n(cell_alignment(*cell), span));
    }

    TableBlock {
        bbox: None,
        header: Some(to_cells(&header_cells)),
        rows: body_rows.into_iter().map(|tr| to_cells(&row_cells(tr))).collect(),
        alignments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ImageSource;

    fn url() -> Url {
        Url::parse("https://example.com/blog/post.html").unwrap()
    }

    #[test]
    fn title_headings_and_paragraphs_in_order() {
        let html = r#"<html><head><title> My  Page </title><style>p{color:red}</style></head>
            <body><h2>Intro</h2><p>Hello <b>bold</b> world</p><script>var x = 1;</script>
            <p>Second</p></body></html>"#;
        let doc = html_to_markdown(html, &url());
        assert_eq!(doc.title.as_deref(), Some("My Page"));
        assert_eq!(
            doc.markdown,
            "# My Page\n\n## Intro\n\nHello bold world\n\nSecond"
        );
        assert!(!doc.markdown.contains("var x"));
    }

    #[test]
    fn relative_images_resolve_against_page() {
        let html = r#"<body><img src="../img/a.png"><img src="https://cdn.x/b.jpg"></body>"#;
        let doc = html_to_markdown(html, &url());
        let refs: Vec<_> = doc.images.iter().map(|i| i.reference.as_str()).collect();
        assert_eq!(refs, ["https://example.com/img/a.png", "https://cdn.x/b.jpg"]);
        assert!(doc.markdown.contains("![Image](https://example.com/img/a.png)"));
    }

    #[test]
    fn data_uri_images_decode_inline() {
        let html = r#"<img src="data:image/svg+xml;base64,PHN2Zy8+">"#;
        let doc = html_to_markdown(html, &url());
        assert_eq!(doc.images.len(), 1);
        match &doc.images[0].source {
            ImageSource::Inline { bytes, extension } => {
                assert_eq!(bytes, b"<svg/>");
                assert_eq!(extension, "png");
            }
            other => panic!("unexpected source: {other:?}"),
        }
        assert!(doc.markdown.contains(&format!("![Image]({})", doc.images[0].reference)));
    }

    #[test]
    fn table_with_thead_alignment_and_colspan() {
        let html = r#"<table>
            <thead><tr><th>Name</th><th align="right">Qty</th><th style="text-align: center">Note</th></tr></thead>
            <tbody><tr><td>apple</td><td colspan="2">n/a</td></tr>
            <tr><td> </td><td></td><td></td></tr></tbody></table>"#;
        let doc = html_to_markdown(html, &url());
        assert_eq!(doc.table_count, 1);
        assert_eq!(
            doc.markdown,
            "| Name | Qty | Note |\n| - | -: | :-: |\n| apple | n/a | n/a |"
        );
    }

    #[test]
    fn table_without_thead_uses_first_row() {
        let html = "<table><tr><td>A</td><td>B</td></tr><tr><td>1</td><td>2</td></tr></table>";
        let doc = html_to_markdown(html, &url());
        assert_eq!(doc.markdown, "| A | B |\n| - | - |\n| 1 | 2 |");
    }

    #[test]
    fn paragraphs_inside_tables_are_not_repeated() {
        let html = "<table><tr><td><p>cell</p></td><td>x</td></tr><tr><td>1</td><td>2</td></tr></table>";
        let doc = html_to_markdown(html, &url());
        assert_eq!(doc.markdown.matches("cell").count(), 1);
    }

    #[test]
    fn empty_table_is_omitted() {
        let doc = html_to_markdown("<table></table><p>after</p>", &url());
        assert_eq!(doc.table_count, 0);
        assert_eq!(doc.markdown, "after");
    }

    #[test]
    fn img_tags_rewritten_for_layout_engine() {
        let html = r#"<div><img class="x" src="/a.png" alt="Logo"><img src='b.gif'><img alt="none"></div>"#;
        let out = rewrite_img_tags(html, &url());
        assert!(out.contains("<p>![Logo](https://example.com/a.png)</p>"));
        assert!(out.contains("<p>![Image](https://example.com/blog/b.gif)</p>"));
        assert!(out.contains(r#"<img alt="none">"#));
    }
}
