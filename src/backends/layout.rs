//! Layout-engine backend: PDFs and fetched HTML are posted to a
//! Docling-compatible conversion service, which returns finished Markdown
//! with images embedded inline.

use super::{Extractor, ExtractorOutput, RenderedDocument, RewriteMode, SourcePayload};
use crate::config::LayoutEngineConfig;
use crate::error::IngestError;
use crate::output::Metadata;
use crate::pipeline::html::rewrite_img_tags;
use crate::pipeline::input::domain_slug;
use crate::storage::{HTML_CONTENT_TYPE, PDF_CONTENT_TYPE};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

const SERVICE: &str = "layout engine";

#[derive(Debug, Default, Deserialize)]
pub struct ConvertResponse {
    #[serde(default)]
    pub document: Option<ConvertedDocument>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConvertedDocument {
    #[serde(default)]
    pub md_content: Option<String>,
}

/// Pull the Markdown out of a conversion response.
///
/// `success` and `partial_success` are accepted; anything else, or a missing
/// document, is a service failure.
pub fn markdown_from_response(response: ConvertResponse) -> Result<String, IngestError> {
    match response.status.as_str() {
        "success" => {}
        "partial_success" => warn!(
            "Layout engine reported partial success: {} errors",
            response.errors.len()
        ),
        other => {
            let detail = if response.errors.is_empty() {
                format!("status '{}'", other)
            } else {
                format!("status '{}': {}", other, json!(response.errors))
            };
            return Err(IngestError::service_failed(SERVICE, detail));
        }
    }
    response
        .document
        .and_then(|d| d.md_content)
        .ok_or_else(|| IngestError::service_failed(SERVICE, "response has no Markdown content"))
}

/// The layout-engine extractor.
#[derive(Debug, Clone)]
pub struct LayoutExtractor {
    http: reqwest::Client,
    config: LayoutEngineConfig,
}

impl LayoutExtractor {
    pub fn new(http: reqwest::Client, config: LayoutEngineConfig) -> Self {
        Self { http, config }
    }

    fn form(&self, file: Part) -> Form {
        Form::new()
            .part("files", file)
            .text("to_formats", "md")
            .text("image_export_mode", "embedded")
            .text("do_ocr", self.config.do_ocr.to_string())
            .text("do_table_structure", self.config.do_table_structure.to_string())
    }

    async fn convert(&self, bytes: Vec<u8>, filename: String, mime: &str) -> Result<String, IngestError> {
        let part = Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime)
            .map_err(|e| IngestError::Internal(format!("multipart part: {e}")))?;

        let url = self.config.convert_url();
        info!("Submitting document to {} at {}", SERVICE, url);
        let mut request = self.http.post(&url).multipart(self.form(part));
        if let Some(key) = &self.config.api_key {
            request = request.header("X-Api-Key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| IngestError::service_request(SERVICE, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::service_failed(
                SERVICE,
                format!("HTTP {}: {}", status, body),
            ));
        }
        let parsed: ConvertResponse = response
            .json()
            .await
            .map_err(|e| IngestError::service_request(SERVICE, e))?;
        markdown_from_response(parsed)
    }
}

#[async_trait]
impl Extractor for LayoutExtractor {
    fn name(&self) -> &'static str {
        "layout"
    }

    async fn extract(&self, source: &SourcePayload) -> Result<ExtractorOutput, IngestError> {
        let mut metadata = Metadata::new();
        let markdown = match source {
            SourcePayload::Pdf { filename, bytes } => {
                metadata.insert("original_filename".into(), json!(filename));
                self.convert(bytes.clone(), filename.clone(), PDF_CONTENT_TYPE)
                    .await?
            }
            SourcePayload::Web { url, html } => {
                let html = html.as_deref().ok_or_else(|| {
                    IngestError::Internal("page HTML was not fetched before extraction".into())
                })?;
                let prepared = rewrite_img_tags(html, url);
                metadata.insert("source_url".into(), json!(url.as_str()));
                metadata.insert("domain".into(), json!(url.host_str().unwrap_or_default()));
                let filename = format!("{}.html", domain_slug(url));
                self.convert(prepared.into_bytes(), filename, HTML_CONTENT_TYPE)
                    .await?
            }
        };
        info!("Layout engine returned {} bytes of Markdown", markdown.len());

        Ok(ExtractorOutput::Rendered(RenderedDocument {
            markdown,
            images: Vec::new(),
            rewrite: RewriteMode::Strict,
            metadata,
        }))
    }
}
