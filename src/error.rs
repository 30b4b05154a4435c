//! Error types for the edgequake-ingest library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`IngestError`]: **Fatal.** The request cannot proceed (bad input,
//!   extraction service down, raw source or final Markdown could not be
//!   written). Returned as `Err(IngestError)` from [`crate::ingest::ingest`].
//!
//! * [`AssemblyError`]: **Non-fatal.** One image could not be persisted, or
//!   image references could not be rewritten. The document is still produced
//!   and the problem is recorded in its metadata as a degraded result.
//!
//! Callers that only need the coarse taxonomy use [`IngestError::category`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Coarse failure taxonomy surfaced to callers alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad file type, empty or corrupt source, invalid URL or backend tag.
    InputValidation,
    /// Commercial service, crawl job or layout engine unreachable or failed.
    ExternalService,
    /// The durable store rejected a read or write.
    StorageWrite,
    /// Anything that indicates a bug rather than a bad input or a bad peer.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::InputValidation => "input_validation",
            ErrorCategory::ExternalService => "external_service",
            ErrorCategory::StorageWrite => "storage_write",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// All fatal errors returned by the edgequake-ingest library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The backend tag is not one of `opensource`, `enterprise`, `layout`.
    #[error("Unknown backend '{tag}'\nExpected one of: opensource, enterprise, layout.")]
    UnknownBackend { tag: String },

    /// The web source is not an absolute HTTP/HTTPS URL.
    #[error("Invalid URL '{input}': {reason}")]
    InvalidUrl { input: String, reason: String },

    /// The uploaded source has no bytes.
    #[error("Source '{name}' is empty")]
    EmptySource { name: String },

    /// The upload was read but is not a PDF.
    #[error("File is not a valid PDF: '{name}'\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: Vec<u8> },

    /// pdfium could not parse the document.
    #[error("PDF '{name}' is corrupt: {detail}")]
    CorruptPdf { name: String, detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── External service errors ───────────────────────────────────────────
    /// The selected backend is missing credentials or an endpoint.
    #[error("Backend '{backend}' is not configured.\n{hint}")]
    BackendNotConfigured { backend: String, hint: String },

    /// Transport-level failure talking to an extraction service.
    #[error("Request to {service} failed: {detail}")]
    ServiceRequest { service: String, detail: String },

    /// The service answered but reported a failure status.
    #[error("{service} reported failure: {detail}")]
    ServiceFailed { service: String, detail: String },

    /// The crawl job reached a terminal failure status.
    #[error("Crawl run '{run_id}' ended with status {status}")]
    CrawlFailed { run_id: String, status: String },

    /// The crawl job did not finish within the configured wait.
    #[error("Crawl run '{run_id}' did not finish within {secs}s\nIncrease --crawl-max-wait or pass 0 to wait indefinitely.")]
    CrawlTimeout { run_id: String, secs: u64 },

    /// Fetching the web page itself failed.
    #[error("Failed to fetch '{url}': {reason}")]
    FetchFailed { url: String, reason: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Storage errors ────────────────────────────────────────────────────
    /// The store rejected a write (credentials, quota, connectivity).
    #[error("Failed to write '{key}' to storage: {detail}")]
    StorageWrite { key: String, detail: String },

    /// The store could not return an object that should exist.
    #[error("Failed to read '{key}' from storage: {detail}")]
    StorageRead { key: String, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Map this error onto the coarse category reported to callers.
    pub fn category(&self) -> ErrorCategory {
        match self {
            IngestError::UnknownBackend { .. }
            | IngestError::InvalidUrl { .. }
            | IngestError::EmptySource { .. }
            | IngestError::NotAPdf { .. }
            | IngestError::CorruptPdf { .. }
            | IngestError::InvalidConfig(_) => ErrorCategory::InputValidation,

            IngestError::BackendNotConfigured { .. }
            | IngestError::ServiceRequest { .. }
            | IngestError::ServiceFailed { .. }
            | IngestError::CrawlFailed { .. }
            | IngestError::CrawlTimeout { .. }
            | IngestError::FetchFailed { .. }
            | IngestError::PdfiumBindingFailed(_) => ErrorCategory::ExternalService,

            IngestError::StorageWrite { .. } | IngestError::StorageRead { .. } => {
                ErrorCategory::StorageWrite
            }

            IngestError::Internal(_) => ErrorCategory::Internal,
        }
    }

    pub(crate) fn service_request(service: &str, detail: impl fmt::Display) -> Self {
        IngestError::ServiceRequest {
            service: service.to_string(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn service_failed(service: &str, detail: impl fmt::Display) -> Self {
        IngestError::ServiceFailed {
            service: service.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// A non-fatal problem encountered while assembling a document.
///
/// Stored in [`crate::output::ExtractionResult::warnings`]; the request still
/// succeeds and the metadata carries `degraded: true`.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssemblyError {
    /// Original and durable image lists differ in length.
    #[error("Image lists are mismatched ({originals} originals vs {durables} stored); references left unchanged")]
    ImageListMismatch { originals: usize, durables: usize },

    /// There were image references but nothing to map them to.
    #[error("Image lists are empty; references left unchanged")]
    EmptyImageList,

    /// One image could not be fetched or persisted and was left out.
    #[error("Image '{reference}' skipped: {detail}")]
    ImageSkipped { reference: String, detail: String },
}
