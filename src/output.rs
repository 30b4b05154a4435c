//! Output and data-model types shared by every stage of the pipeline.
//!
//! The page-structured types ([`PageContent`], [`TextBlock`], [`TableBlock`],
//! [`ImageRef`]) are what the page-oriented backends produce. The request-level
//! types ([`ExtractionResult`], [`ExtractionResponse`], [`StoredResource`]) are
//! what the orchestrator hands back to the caller.

use crate::error::AssemblyError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Source / storage vocabulary ──────────────────────────────────────────

/// Kind of source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Web,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Pdf => "pdf",
            SourceType::Web => "web",
        }
    }

    /// Top-level storage prefix, e.g. `pdf_sources`.
    pub fn prefix(&self) -> String {
        format!("{}_sources", self.as_str())
    }

    /// Value recorded in the `content_type` metadata field.
    pub fn content_kind(&self) -> &'static str {
        match self {
            SourceType::Pdf => "document",
            SourceType::Web => "webpage",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Second level of the storage key namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Raw,
    ExtractedMarkdown,
    ExtractedImages,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::Raw,
        Category::ExtractedMarkdown,
        Category::ExtractedImages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Raw => "raw",
            Category::ExtractedMarkdown => "extracted_markdown",
            Category::ExtractedImages => "extracted_images",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Geometry ─────────────────────────────────────────────────────────────

/// Axis-aligned rectangle in page coordinates, origin top-left, y grows down.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    /// Build a box from two corners in any order.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    /// Bounding box of a flat `[x, y, x, y, ...]` polygon.
    pub fn from_polygon(points: &[f32]) -> Option<Self> {
        if points.len() < 4 {
            return None;
        }
        let xs = points.iter().step_by(2);
        let ys = points.iter().skip(1).step_by(2);
        let (mut x0, mut x1) = (f32::MAX, f32::MIN);
        let (mut y0, mut y1) = (f32::MAX, f32::MIN);
        for &x in xs {
            x0 = x0.min(x);
            x1 = x1.max(x);
        }
        for &y in ys {
            y0 = y0.min(y);
            y1 = y1.max(y);
        }
        Some(Self { x0, y0, x1, y1 })
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center_y(&self) -> f32 {
        (self.y0 + self.y1) / 2.0
    }

    /// Any positive-area overlap. Boxes that only share an edge do not intersect.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

// ── Page content ─────────────────────────────────────────────────────────

/// A run of text with its position on the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub bbox: BoundingBox,
    pub text: String,
}

impl TextBlock {
    pub fn new(bbox: BoundingBox, text: impl Into<String>) -> Self {
        Self {
            bbox,
            text: text.into(),
        }
    }
}

/// Column alignment hint for a rendered table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Default,
    Right,
    Center,
}

impl Alignment {
    /// Parse an HTML `align` attribute or `text-align` style value.
    pub fn from_hint(hint: &str) -> Self {
        match hint.trim().to_ascii_lowercase().as_str() {
            "right" => Alignment::Right,
            "center" | "centre" => Alignment::Center,
            _ => Alignment::Default,
        }
    }

    /// Separator-row token.
    pub fn token(&self) -> &'static str {
        match self {
            Alignment::Default => "-",
            Alignment::Right => "-:",
            Alignment::Center => ":-:",
        }
    }
}

/// One table cell. `colspan` values below 1 are treated as 1 when rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCell {
    pub text: String,
    pub colspan: i32,
}

impl TableCell {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            colspan: 1,
        }
    }

    pub fn spanning(text: impl Into<String>, colspan: i32) -> Self {
        Self {
            text: text.into(),
            colspan,
        }
    }
}

/// A detected or reported table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableBlock {
    /// Region on the page. `None` when the source reported no region.
    pub bbox: Option<BoundingBox>,
    pub header: Option<Vec<TableCell>>,
    pub rows: Vec<Vec<TableCell>>,
    /// Per-column alignment; missing entries fall back to [`Alignment::Default`].
    pub alignments: Vec<Alignment>,
}

impl TableBlock {
    /// Build a table from a grid of strings, taking the first row as header.
    pub fn from_grid(grid: Vec<Vec<String>>, bbox: Option<BoundingBox>) -> Self {
        let mut rows = grid
            .into_iter()
            .map(|r| r.into_iter().map(TableCell::new).collect::<Vec<_>>());
        let header = rows.next();
        Self {
            bbox,
            header,
            rows: rows.collect(),
            alignments: Vec::new(),
        }
    }
}

/// A raster image embedded in a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    /// 1-based position within the page.
    pub index: usize,
    pub bbox: Option<BoundingBox>,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// Lower-case extension without the dot.
    pub extension: String,
}

/// One page of page-structured extraction output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageContent {
    /// 1-based, unique within a document.
    pub page_number: usize,
    pub width: f32,
    pub height: f32,
    pub text_blocks: Vec<TextBlock>,
    pub tables: Vec<TableBlock>,
    pub images: Vec<ImageRef>,
}

impl PageContent {
    pub fn new(page_number: usize) -> Self {
        Self {
            page_number,
            ..Default::default()
        }
    }
}

// ── Images referenced from pre-rendered Markdown ─────────────────────────

/// Where the bytes of a referenced image come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// Bytes already in hand (e.g. a decoded `data:` URI).
    Inline { bytes: Vec<u8>, extension: String },
    /// Must be downloaded before it can be persisted.
    Remote { url: String },
}

/// An image referenced as `![..](reference)` inside pre-rendered Markdown.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingImage {
    /// The exact URL text used in the Markdown.
    pub reference: String,
    pub source: ImageSource,
}

impl PendingImage {
    pub fn remote(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            reference: url.clone(),
            source: ImageSource::Remote { url },
        }
    }

    pub fn inline(reference: impl Into<String>, bytes: Vec<u8>, extension: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            source: ImageSource::Inline {
                bytes,
                extension: extension.into(),
            },
        }
    }
}

// ── Request results ──────────────────────────────────────────────────────

/// Free-form descriptive fields attached to a result.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// The assembled document, before it is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub source_type: SourceType,
    pub document_id: String,
    /// Present only for page-structured backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<PageContent>>,
    pub markdown: String,
    /// Positional image key (`p{page}_{index}` or `img_{n}`) → durable URL.
    pub images: BTreeMap<String, String>,
    pub metadata: Metadata,
    /// Non-fatal problems encountered during assembly.
    pub warnings: Vec<AssemblyError>,
}

impl ExtractionResult {
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Any artifact written to durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResource {
    pub key: String,
    pub url: String,
    pub content_type: String,
}

/// What the caller receives once a request has finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResponse {
    pub status: String,
    pub document_id: String,
    pub markdown_url: String,
    pub image_urls: BTreeMap<String, String>,
    pub metadata: Metadata,
}

/// Per-request lifecycle. `Failed` is reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingState {
    Received,
    UploadingRaw,
    Extracting,
    Assembling,
    Persisting,
    Done,
    Failed,
}

impl ProcessingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingState::Done | ProcessingState::Failed)
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessingState::Received => "RECEIVED",
            ProcessingState::UploadingRaw => "UPLOADING_RAW",
            ProcessingState::Extracting => "EXTRACTING",
            ProcessingState::Assembling => "ASSEMBLING",
            ProcessingState::Persisting => "PERSISTING",
            ProcessingState::Done => "DONE",
            ProcessingState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}
