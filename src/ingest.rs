//! Request orchestration.
//!
//! One request runs sequentially through
//! `RECEIVED → UPLOADING_RAW → EXTRACTING → ASSEMBLING → PERSISTING → DONE`.
//! Any error moves it to `FAILED` and is returned to the caller. Objects
//! already written stay in place; keys are deterministic, so a re-run
//! overwrites them.

use crate::assemble::Assembler;
use crate::backends::{extractor_for, Backend, Extractor, SourcePayload};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::output::{ExtractionResponse, Metadata, ProcessingState, SourceType};
use crate::pipeline::input::{
    document_id_for_file, document_id_for_url, domain_slug, fetch_page, file_name, file_stem,
    validate_pdf, validate_url, TIMESTAMP_FORMAT,
};
use crate::progress::IngestProgressCallback;
use crate::storage::{
    BlobStore, ResourceKey, HTML_CONTENT_TYPE, MARKDOWN_CONTENT_TYPE, PDF_CONTENT_TYPE,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// What to ingest.
#[derive(Debug, Clone)]
pub enum Source {
    /// An uploaded PDF.
    Pdf { filename: String, bytes: Vec<u8> },
    /// A web page. `html` may carry an already-fetched snapshot.
    Web { url: String, html: Option<String> },
}

impl Source {
    pub fn source_type(&self) -> SourceType {
        match self {
            Source::Pdf { .. } => SourceType::Pdf,
            Source::Web { .. } => SourceType::Web,
        }
    }
}

/// One extraction request.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub source: Source,
    pub backend: Backend,
}

impl IngestRequest {
    pub fn pdf(filename: impl Into<String>, bytes: Vec<u8>, backend: Backend) -> Self {
        Self {
            source: Source::Pdf {
                filename: filename.into(),
                bytes,
            },
            backend,
        }
    }

    pub fn web(url: impl Into<String>, backend: Backend) -> Self {
        Self {
            source: Source::Web {
                url: url.into(),
                html: None,
            },
            backend,
        }
    }
}

/// Run one request with the backend it names.
pub async fn ingest(
    request: IngestRequest,
    config: &IngestConfig,
    store: &dyn BlobStore,
) -> Result<ExtractionResponse, IngestError> {
    let extractor = extractor_for(request.backend, request.source.source_type(), config)?;
    ingest_with(request.source, extractor.as_ref(), config, store).await
}

/// Run one request with a caller-supplied extractor.
pub async fn ingest_with(
    source: Source,
    extractor: &dyn Extractor,
    config: &IngestConfig,
    store: &dyn BlobStore,
) -> Result<ExtractionResponse, IngestError> {
    let now = Utc::now();
    let document_id = match &source {
        Source::Pdf { filename, .. } => document_id_for_file(filename, now),
        Source::Web { url, .. } => match validate_url(url) {
            Ok(u) => document_id_for_url(&u, now),
            Err(_) => format!("invalid_url_{}", now.format(TIMESTAMP_FORMAT)),
        },
    };
    let tracker = Tracker::new(&document_id, config.callback());
    tracker.enter(ProcessingState::Received);

    let run = Run {
        source,
        extractor,
        config,
        store,
        tracker: &tracker,
        document_id: &document_id,
        processing_date: now.format(TIMESTAMP_FORMAT).to_string(),
    };
    match run.execute().await {
        Ok(response) => Ok(response),
        Err(e) => {
            error!("Request {} failed: {}", document_id, e);
            tracker.enter(ProcessingState::Failed);
            tracker.callback.on_failed(&document_id, &e.to_string());
            Err(e)
        }
    }
}

/// Emits state transitions to the log and the progress callback.
struct Tracker<'a> {
    document_id: &'a str,
    callback: Arc<dyn IngestProgressCallback>,
}

impl<'a> Tracker<'a> {
    fn new(document_id: &'a str, callback: Arc<dyn IngestProgressCallback>) -> Self {
        Self {
            document_id,
            callback,
        }
    }

    fn enter(&self, state: ProcessingState) {
        info!("{} → {}", self.document_id, state);
        self.callback.on_state_change(self.document_id, state);
    }
}

struct Run<'a> {
    source: Source,
    extractor: &'a dyn Extractor,
    config: &'a IngestConfig,
    store: &'a dyn BlobStore,
    tracker: &'a Tracker<'a>,
    document_id: &'a str,
    processing_date: String,
}

impl Run<'_> {
    async fn execute(&self) -> Result<ExtractionResponse, IngestError> {
        let source_type = self.source.source_type();

        // Validation happens before any write.
        let (payload, markdown_stem, mut metadata) = match &self.source {
            Source::Pdf { filename, bytes } => {
                validate_pdf(filename, bytes)?;
                self.tracker.enter(ProcessingState::UploadingRaw);
                let name = file_name(filename);
                let key = ResourceKey::raw(source_type, self.document_id, &name);
                let stored = self
                    .store
                    .store(&key, bytes.clone(), PDF_CONTENT_TYPE, false)
                    .await?;
                info!("Stored raw PDF at {}", stored.key);
                let bytes = self.store.get(&stored.key).await?;

                let mut metadata = Metadata::new();
                metadata.insert("original_filename".into(), json!(name));
                metadata.insert("raw_url".into(), json!(stored.url));
                (
                    SourcePayload::Pdf {
                        filename: name,
                        bytes,
                    },
                    file_stem(filename),
                    metadata,
                )
            }
            Source::Web { url, html } => {
                let url = validate_url(url)?;
                self.tracker.enter(ProcessingState::UploadingRaw);
                let slug = domain_slug(&url);
                let html = match html {
                    Some(h) => Some(h.clone()),
                    None if self.extractor.wants_page_html() => {
                        Some(fetch_page(&self.config.http()?, &url).await?)
                    }
                    None => None,
                };

                let mut metadata = Metadata::new();
                if let Some(h) = &html {
                    let key = ResourceKey::raw(source_type, self.document_id, &format!("{slug}.html"));
                    let stored = self
                        .store
                        .store(&key, h.clone().into_bytes(), HTML_CONTENT_TYPE, false)
                        .await?;
                    info!("Stored page snapshot at {}", stored.key);
                    metadata.insert("raw_url".into(), json!(stored.url));
                }
                metadata.insert("source_url".into(), json!(url.as_str()));
                (SourcePayload::Web { url, html }, slug, metadata)
            }
        };

        self.tracker.enter(ProcessingState::Extracting);
        let output = self.extractor.extract(&payload).await?;

        self.tracker.enter(ProcessingState::Assembling);
        let assembler = Assembler::new(self.store, self.config, source_type, self.document_id)?;
        let result = assembler.assemble(output).await?;

        self.tracker.enter(ProcessingState::Persisting);
        let key = ResourceKey::markdown(source_type, self.document_id, &format!("{markdown_stem}.md"));
        let stored = self
            .store
            .store(&key, result.markdown.clone().into_bytes(), MARKDOWN_CONTENT_TYPE, true)
            .await?;
        info!("Stored Markdown at {}", stored.key);

        metadata.insert("source_type".into(), json!(source_type.as_str()));
        metadata.insert("content_type".into(), json!(source_type.content_kind()));
        metadata.insert("processor".into(), json!(self.extractor.name()));
        metadata.insert("processing_date".into(), json!(self.processing_date));
        metadata.extend(result.metadata);
        if !result.warnings.is_empty() {
            metadata.insert(
                "warnings".into(),
                json!(result.warnings.iter().map(|w| w.to_string()).collect::<Vec<_>>()),
            );
        }

        self.tracker.enter(ProcessingState::Done);
        self.tracker
            .callback
            .on_complete(self.document_id, &stored.url, result.images.len());

        Ok(ExtractionResponse {
            status: "success".into(),
            document_id: self.document_id.to_string(),
            markdown_url: stored.url,
            image_urls: result.images,
            metadata,
        })
    }
}
