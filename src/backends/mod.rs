//! Extraction backends.
//!
//! Every backend implements [`Extractor`]: it turns a validated source into an
//! [`ExtractorOutput`], either page-structured content for the assembler to
//! lay out or Markdown that is already rendered.
//!
//! | Backend | PDF | Web page |
//! |---------|-----|----------|
//! | [`Backend::OpenSource`] | pdfium text + layout analysis | HTML parsing |
//! | [`Backend::Enterprise`] | document-analysis service + pdfium images | crawl job |
//! | [`Backend::Layout`]     | layout engine | layout engine on the fetched HTML |

pub mod crawl;
pub mod enterprise;
pub mod layout;
pub mod opensource;

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::output::{Metadata, PageContent, PendingImage, SourceType};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use crawl::{ApifyClient, CrawlExtractor, CrawlService};
pub use enterprise::{DocumentAnalysis, EnterpriseExtractor, FormRecognizerClient};
pub use layout::LayoutExtractor;
pub use opensource::OpenSourceExtractor;

// ── Backend tag ──────────────────────────────────────────────────────────

/// Which extraction strategy handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    OpenSource,
    Enterprise,
    Layout,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::OpenSource => "opensource",
            Backend::Enterprise => "enterprise",
            Backend::Layout => "layout",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "opensource" | "open source" | "open-source" => Ok(Backend::OpenSource),
            "enterprise" => Ok(Backend::Enterprise),
            "layout" | "docling" => Ok(Backend::Layout),
            _ => Err(IngestError::UnknownBackend { tag: s.to_string() }),
        }
    }
}

// ── Extractor capability ─────────────────────────────────────────────────

/// The raw source handed to an extractor.
#[derive(Debug, Clone)]
pub enum SourcePayload {
    /// PDF bytes as read back from storage.
    Pdf { filename: String, bytes: Vec<u8> },
    /// A web page. `html` is the stored snapshot, when the extractor asked for one.
    Web { url: Url, html: Option<String> },
}

impl SourcePayload {
    pub fn source_type(&self) -> SourceType {
        match self {
            SourcePayload::Pdf { .. } => SourceType::Pdf,
            SourcePayload::Web { .. } => SourceType::Web,
        }
    }
}

/// Layout flavour of page-structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStyle {
    /// Content only.
    Plain,
    /// `## Page N`, page dimensions and `**Text Content:**` / `**Table:**` labels.
    Annotated,
}

/// Order of content kinds within a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOrder {
    TextImagesTables,
    TablesImagesText,
}

/// How strictly reference rewriting treats failed images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteMode {
    /// Every reference must be persisted; one failure skips the whole rewrite.
    Strict,
    /// References that were persisted are rewritten; failed ones keep their source URL.
    Lenient,
}

/// Page-structured extraction output.
#[derive(Debug, Clone)]
pub struct PagedDocument {
    pub pages: Vec<PageContent>,
    /// Level-1 heading emitted before the first page.
    pub title: Option<String>,
    pub style: PageStyle,
    pub order: BlockOrder,
    pub metadata: Metadata,
}

/// Markdown rendered by the backend, with the images it references.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub markdown: String,
    pub images: Vec<PendingImage>,
    pub rewrite: RewriteMode,
    pub metadata: Metadata,
}

/// What an [`Extractor`] produces.
#[derive(Debug, Clone)]
pub enum ExtractorOutput {
    Paged(PagedDocument),
    Rendered(RenderedDocument),
}

impl ExtractorOutput {
    pub fn metadata(&self) -> &Metadata {
        match self {
            ExtractorOutput::Paged(p) => &p.metadata,
            ExtractorOutput::Rendered(r) => &r.metadata,
        }
    }
}

/// One extraction strategy for one kind of source.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Value recorded in the `processor` metadata field.
    fn name(&self) -> &'static str;

    /// Whether the orchestrator should fetch and store the page HTML first.
    fn wants_page_html(&self) -> bool {
        true
    }

    async fn extract(&self, source: &SourcePayload) -> Result<ExtractorOutput, IngestError>;
}

/// Build the extractor for `backend` and `source`.
pub fn extractor_for(
    backend: Backend,
    source: SourceType,
    config: &IngestConfig,
) -> Result<Box<dyn Extractor>, IngestError> {
    match (backend, source) {
        (Backend::OpenSource, _) => Ok(Box::new(OpenSourceExtractor::default())),
        (Backend::Enterprise, SourceType::Pdf) => {
            let cfg = config
                .enterprise
                .clone()
                .ok_or_else(|| IngestError::BackendNotConfigured {
                    backend: backend.to_string(),
                    hint: "Set AZURE_FORM_RECOGNIZER_ENDPOINT and AZURE_FORM_RECOGNIZER_KEY."
                        .into(),
                })?;
            let client = FormRecognizerClient::new(config.http()?, cfg);
            Ok(Box::new(EnterpriseExtractor::new(Arc::new(client))))
        }
        (Backend::Enterprise, SourceType::Web) => {
            let cfg = config
                .crawl
                .clone()
                .ok_or_else(|| IngestError::BackendNotConfigured {
                    backend: backend.to_string(),
                    hint: "Set APIFY_API_TOKEN and ACTOR_ID.".into(),
                })?;
            let poll = Duration::from_secs(cfg.poll_interval_secs);
            let max_wait = cfg.max_wait_secs.map(Duration::from_secs);
            let service = ApifyClient::new(config.http()?, cfg);
            Ok(Box::new(CrawlExtractor::new(Arc::new(service), poll, max_wait)))
        }
        (Backend::Layout, _) => Ok(Box::new(LayoutExtractor::new(
            config.http()?,
            config.layout.clone(),
        ))),
    }
}
