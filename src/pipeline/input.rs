//! Input validation, document ids and web page fetch.
//!
//! Every check here runs before anything is written to storage, so a bad
//! upload or a malformed URL is rejected without side effects.

use crate::error::IngestError;
use chrono::{DateTime, Utc};
use reqwest::Url;
use std::path::Path;
use tracing::{debug, info};

/// Timestamp suffix of document ids and the `processing_date` field.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Reject empty uploads and anything without the `%PDF` magic bytes.
pub fn validate_pdf(name: &str, bytes: &[u8]) -> Result<(), IngestError> {
    if bytes.is_empty() {
        return Err(IngestError::EmptySource {
            name: name.to_string(),
        });
    }
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(IngestError::NotAPdf {
            name: name.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

/// Parse and check an absolute HTTP(S) URL with a host.
pub fn validate_url(input: &str) -> Result<Url, IngestError> {
    let invalid = |reason: &str| IngestError::InvalidUrl {
        input: input.to_string(),
        reason: reason.to_string(),
    };
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid("URL is empty"));
    }
    let url = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("only http and https URLs are supported"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("URL has no host"));
    }
    Ok(url)
}

/// `docs.example.com:8080` → `docs_example_com_8080`.
pub fn domain_slug(url: &Url) -> String {
    let host = url.host_str().unwrap_or("unknown");
    let netloc = match url.port() {
        Some(port) => format!("{host}_{port}"),
        None => host.to_string(),
    };
    netloc.replace(['.', ':'], "_")
}

/// File name without directories or extension; falls back to `document`.
pub fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document")
        .to_string()
}

/// Final path component of an uploaded file name.
pub fn file_name(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document.pdf")
        .to_string()
}

/// `{stem}_{timestamp}` for uploaded files.
pub fn document_id_for_file(filename: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}", file_stem(filename), at.format(TIMESTAMP_FORMAT))
}

/// `{domain slug}_{timestamp}` for web pages.
pub fn document_id_for_url(url: &Url, at: DateTime<Utc>) -> String {
    format!("{}_{}", domain_slug(url), at.format(TIMESTAMP_FORMAT))
}

/// GET a page and return its body as text.
pub async fn fetch_page(client: &reqwest::Client, url: &Url) -> Result<String, IngestError> {
    info!("Fetching page: {}", url);
    let fetch_err = |reason: String| IngestError::FetchFailed {
        url: url.to_string(),
        reason,
    };
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| fetch_err(e.to_string()))?;
    if !response.status().is_success() {
        return Err(fetch_err(format!("HTTP {}", response.status())));
    }
    let html = response.text().await.map_err(|e| fetch_err(e.to_string()))?;
    debug!("Fetched {} bytes of HTML", html.len());
    Ok(html)
}
