//! # edgequake-ingest
//!
//! Ingest PDF documents and web pages through pluggable extraction backends,
//! normalise the result into Markdown with durable image references, and
//! persist every artifact to object storage under a predictable key layout.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes / URL
//!  │
//!  ├─ 1. Validate   magic bytes, URL shape, document id      (RECEIVED)
//!  ├─ 2. Raw        store the PDF or HTML snapshot           (UPLOADING_RAW)
//!  ├─ 3. Extract    opensource | enterprise | layout backend (EXTRACTING)
//!  ├─ 4. Assemble   tables, text merge, images, rewriting    (ASSEMBLING)
//!  ├─ 5. Persist    Markdown to {pdf|web}_sources/...        (PERSISTING)
//!  └─ 6. Respond    document id, Markdown URL, image map     (DONE)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ingest::{ingest, Backend, IngestConfig, IngestRequest, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryStore::default();
//!     let config = IngestConfig::from_env();
//!     let bytes = std::fs::read("report.pdf")?;
//!     let request = IngestRequest::pdf("report.pdf", bytes, Backend::OpenSource);
//!     let response = ingest(request, &config, &store).await?;
//!     println!("{}", response.markdown_url);
//!     Ok(())
//! }
//! ```
//!
//! ## Backends
//!
//! | Backend | PDF | Web page | Needs |
//! |---------|-----|----------|-------|
//! | `opensource` | pdfium text, geometric tables, embedded images | HTML tags | pdfium |
//! | `enterprise` | document-analysis OCR + pdfium images | hosted crawl job | service credentials |
//! | `layout`     | layout-engine conversion | layout-engine conversion | a Docling-compatible server |
//!
//! ## Storage Layout
//!
//! | Key | Content |
//! |-----|---------|
//! | `{pdf,web}_sources/raw/{id}/{file}` | uploaded PDF or fetched HTML |
//! | `{pdf,web}_sources/extracted_markdown/{id}/{name}.md` | final Markdown |
//! | `{pdf,web}_sources/extracted_images/{id}/image_*.{ext}` | persisted images |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ingest2md` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assemble;
pub mod backends;
pub mod config;
pub mod error;
pub mod ingest;
pub mod markdown;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod resolve;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assemble::Assembler;
pub use backends::{extractor_for, Backend, Extractor, ExtractorOutput, SourcePayload};
pub use config::{
    CrawlConfig, FormRecognizerConfig, IngestConfig, IngestConfigBuilder, LayoutEngineConfig,
    PageSeparator,
};
pub use error::{AssemblyError, ErrorCategory, IngestError};
pub use ingest::{ingest, ingest_with, IngestRequest, Source};
pub use output::{
    BoundingBox, ExtractionResponse, ExtractionResult, PageContent, ProcessingState, SourceType,
    StoredResource, TableBlock, TableCell, TextBlock,
};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use resolve::{rewrite_references, ImageFetcher, Rewritten};
pub use storage::{BlobStore, FsStore, MemoryStore, ResourceKey, S3Config, S3Store};
