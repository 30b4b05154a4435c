//! Enterprise PDF backend: a commercial document-analysis service supplies
//! OCR text lines and structured tables; raster images come from the PDF
//! itself via pdfium.

use super::{BlockOrder, Extractor, ExtractorOutput, PageStyle, PagedDocument, SourcePayload};
use crate::config::FormRecognizerConfig;
use crate::error::IngestError;
use crate::output::{BoundingBox, Metadata, PageContent, TableBlock, TableCell, TextBlock};
use crate::pipeline::pdf::{extract_pages, ExtractOptions};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const SERVICE: &str = "document-analysis service";

/// Heading placed above the first page.
pub const DOCUMENT_TITLE: &str = "PDF Extraction Output";

// ── Service response model ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
    #[serde(default)]
    pub pages: Vec<AnalyzedPage>,
    #[serde(default)]
    pub tables: Vec<AnalyzedTable>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedPage {
    pub page_number: usize,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,
    #[serde(default)]
    pub lines: Vec<AnalyzedLine>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzedLine {
    pub content: String,
    #[serde(default)]
    pub polygon: Vec<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedTable {
    pub row_count: usize,
    pub column_count: usize,
    #[serde(default)]
    pub cells: Vec<AnalyzedCell>,
    #[serde(default)]
    pub bounding_regions: Vec<BoundingRegion>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedCell {
    pub row_index: usize,
    pub column_index: usize,
    #[serde(default)]
    pub content: String,
    #[serde(default = "one")]
    pub column_span: usize,
    #[serde(default)]
    pub kind: Option<String>,
}

fn one() -> usize {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingRegion {
    pub page_number: usize,
    #[serde(default)]
    pub polygon: Vec<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum OperationStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: OperationStatus,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

// ── Service seam ─────────────────────────────────────────────────────────

/// Submit a PDF and wait for its analysis.
#[async_trait]
pub trait DocumentAnalysis: Send + Sync {
    async fn analyze(&self, pdf: &[u8]) -> Result<AnalyzeResult, IngestError>;
}

/// REST client for the Azure Form Recognizer `documentModels:analyze` API.
#[derive(Debug, Clone)]
pub struct FormRecognizerClient {
    http: reqwest::Client,
    config: FormRecognizerConfig,
}

impl FormRecognizerClient {
    pub fn new(http: reqwest::Client, config: FormRecognizerConfig) -> Self {
        Self { http, config }
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/formrecognizer/documentModels/{}:analyze?api-version={}",
            self.config.endpoint, self.config.model_id, self.config.api_version
        )
    }
}

#[async_trait]
impl DocumentAnalysis for FormRecognizerClient {
    async fn analyze(&self, pdf: &[u8]) -> Result<AnalyzeResult, IngestError> {
        info!("Submitting {} bytes to {}", pdf.len(), SERVICE);
        let response = self
            .http
            .post(self.analyze_url())
            .header("Ocp-Apim-Subscription-Key", &self.config.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(pdf.to_vec())
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
        let operation_url = response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                IngestError::service_failed(SERVICE, "response has no Operation-Location header")
            })?;

        let deadline = Instant::now() + Duration::from_secs(self.config.max_wait_secs);
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            let op: AnalyzeOperation = self
                .http
                .get(&operation_url)
                .header("Ocp-Apim-Subscription-Key", &self.config.api_key)
                .send()
                .await
                .map_err(|e| IngestError::service_request(SERVICE, e))?
                .json()
                .await
                .map_err(|e| IngestError::service_request(SERVICE, e))?;

            match op.status {
                OperationStatus::Succeeded => {
                    return op.analyze_result.ok_or_else(|| {
                        IngestError::service_failed(SERVICE, "succeeded without a result")
                    });
                }
                OperationStatus::Failed => {
                    let detail = op
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "analysis failed".into());
                    return Err(IngestError::service_failed(SERVICE, detail));
                }
                OperationStatus::NotStarted | OperationStatus::Running | OperationStatus::Unknown => {
                    if Instant::now() >= deadline {
                        return Err(IngestError::service_failed(
                            SERVICE,
                            format!(
                                "analysis did not finish within {}s",
                                self.config.max_wait_secs
                            ),
                        ));
                    }
                    debug!("Analysis {:?}; polling again", op.status);
                    tokio::time::sleep(poll).await;
                }
            }
        }
    }
}

// ── Normalisation ────────────────────────────────────────────────────────

/// Convert the service result into page content.
///
/// Each table is attached to the page of its first bounding region, which is
/// created if the analysis reported no such page. A table without a region
/// goes to the first page and has no bounding box, so it
/// excludes no text.
pub fn analysis_to_pages(result: AnalyzeResult) -> Vec<PageContent> {
    let mut pages: Vec<PageContent> = result
        .pages
        .into_iter()
        .map(|p| PageContent {
            page_number: p.page_number,
            width: p.width,
            height: p.height,
            text_blocks: p
                .lines
                .into_iter()
                .map(|l| {
                    TextBlock::new(
                        BoundingBox::from_polygon(&l.polygon).unwrap_or_default(),
                        l.content,
                    )
                })
                .collect(),
            ..Default::default()
        })
        .collect();
    pages.sort_by_key(|p| p.page_number);

    for table in result.tables {
        let region = table.bounding_regions.first();
        let bbox = region.and_then(|r| BoundingBox::from_polygon(&r.polygon));
        let target = region.map(|r| r.page_number);
        let block = table_block(&table, bbox);

        let idx = match target {
            Some(n) => pages.iter().position(|p| p.page_number == n),
            None => (!pages.is_empty()).then_some(0),
        };
        match idx.and_then(|i| pages.get_mut(i)) {
            Some(page) => page.tables.push(block),
            None => {
                let mut page = PageContent::new(target.unwrap_or(1));
                page.tables.push(block);
                pages.push(page);
            }
        }
    }
    pages.sort_by_key(|p| p.page_number);
    pages
}

/// Grid of cell text, first row as header. Cells covered by a span are not repeated.
fn table_block(table: &AnalyzedTable, bbox: Option<BoundingBox>) -> TableBlock {
    let mut rows: Vec<Vec<TableCell>> = Vec::with_capacity(table.row_count);
    for r in 0..table.row_count {
        let mut row = Vec::new();
        let mut c = 0;
        while c < table.column_count {
            match table
                .cells
                .iter()
                .find(|cell| cell.row_index == r && cell.column_index == c)
            {
                Some(cell) => {
                    let span = cell.column_span.max(1);
                    row.push(TableCell::spanning(cell.content.clone(), span as i32));
                    c += span;
                }
                None => {
                    row.push(TableCell::new(""));
                    c += 1;
                }
            }
        }
        rows.push(row);
    }
    let mut rows = rows.into_iter();
    TableBlock {
        bbox,
        header: rows.next(),
        rows: rows.collect(),
        alignments: Vec::new(),
    }
}

// ── Extractor ────────────────────────────────────────────────────────────

/// The enterprise PDF extractor.
pub struct EnterpriseExtractor {
    analysis: Arc<dyn DocumentAnalysis>,
}

impl EnterpriseExtractor {
    pub fn new(analysis: Arc<dyn DocumentAnalysis>) -> Self {
        Self { analysis }
    }
}

#[async_trait]
impl Extractor for EnterpriseExtractor {
    fn name(&self) -> &'static str {
        "enterprise"
    }

    async fn extract(&self, source: &SourcePayload) -> Result<ExtractorOutput, IngestError> {
        let SourcePayload::Pdf { filename, bytes } = source else {
            return Err(IngestError::Internal(
                "enterprise PDF extractor received a web source".into(),
            ));
        };

        let result = self.analysis.analyze(bytes).await?;
        let mut pages = analysis_to_pages(result);

        let raw = extract_pages(filename, bytes.clone(), ExtractOptions::IMAGES_ONLY).await?;
        for raw_page in raw {
            if let Some(page) = pages
                .iter_mut()
                .find(|p| p.page_number == raw_page.page_number)
            {
                page.images = raw_page.images;
            } else if !raw_page.images.is_empty() {
                let mut page = PageContent::new(raw_page.page_number);
                page.width = raw_page.width;
                page.height = raw_page.height;
                page.images = raw_page.images;
                pages.push(page);
            }
        }

        let tables: usize = pages.iter().map(|p| p.tables.len()).sum();
        info!(
            "Enterprise extraction: {} pages, {} tables",
            pages.len(),
            tables
        );

        let mut metadata = Metadata::new();
        metadata.insert("original_filename".into(), json!(filename));
        metadata.insert("tables_found".into(), json!(tables));
        Ok(ExtractorOutput::Paged(PagedDocument {
            pages,
            title: Some(DOCUMENT_TITLE.to_string()),
            style: PageStyle::Annotated,
            order: BlockOrder::TextImagesTables,
            metadata,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AnalyzeResult {
        serde_json::from_value(json!({
            "pages": [
                { "pageNumber": 2, "width": 8.5, "height": 11.0, "lines": [
                    { "content": "second page", "polygon": [1.0, 1.0, 3.0, 1.0, 3.0, 1.2, 1.0, 1.2] }
                ]},
                { "pageNumber": 1, "width": 8.5, "height": 11.0, "lines": [
                    { "content": "Intro", "polygon": [1.0, 0.5, 2.0, 0.5, 2.0, 0.7, 1.0, 0.7] },
                    { "content": "A", "polygon": [1.0, 2.0, 1.2, 2.0, 1.2, 2.2, 1.0, 2.2] }
                ]}
            ],
            "tables": [
                { "rowCount": 2, "columnCount": 2,
                  "cells": [
                    { "rowIndex": 0, "columnIndex": 0, "content": "A", "kind": "columnHeader" },
                    { "rowIndex": 0, "columnIndex": 1, "content": "B", "kind": "columnHeader" },
                    { "rowIndex": 1, "columnIndex": 0, "content": "1" },
                    { "rowIndex": 1, "columnIndex": 1, "content": "2" }
                  ],
                  "boundingRegions": [
                    { "pageNumber": 1, "polygon": [0.9, 1.9, 4.0, 1.9, 4.0, 3.0, 0.9, 3.0] }
                  ]
                },
                { "rowCount": 1, "columnCount": 3,
                  "cells": [
                    { "rowIndex": 0, "columnIndex": 0, "content": "wide", "columnSpan": 2 },
                    { "rowIndex": 0, "columnIndex": 2, "content": "z" }
                  ]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn pages_sorted_and_tables_grouped_by_region() {
        let pages = analysis_to_pages(sample());
        assert_eq!(pages.iter().map(|p| p.page_number).collect::<Vec<_>>(), [1, 2]);
        assert_eq!(pages[0].tables.len(), 2);
        assert!(pages[1].tables.is_empty());
        let t = &pages[0].tables[0];
        assert!(t.bbox.is_some());
        assert_eq!(t.header.as_ref().unwrap()[1].text, "B");
        assert_eq!(t.rows[0][0].text, "1");
    }

    #[test]
    fn regionless_table_has_no_bbox_and_keeps_spans() {
        let pages = analysis_to_pages(sample());
        let t = &pages[0].tables[1];
        assert!(t.bbox.is_none());
        let header = t.header.as_ref().unwrap();
        assert_eq!(header.len(), 2);
        assert_eq!(header[0].colspan, 2);
    }

    #[test]
    fn lines_become_text_blocks_with_polygon_boxes() {
        let pages = analysis_to_pages(sample());
        let intro = &pages[0].text_blocks[0];
        assert_eq!(intro.text, "Intro");
        assert_eq!(intro.bbox, BoundingBox::new(1.0, 0.5, 2.0, 0.7));
    }

    #[test]
    fn table_without_pages_creates_one() {
        let result: AnalyzeResult = serde_json::from_value(json!({
            "tables": [{ "rowCount": 1, "columnCount": 1,
                "cells": [{ "rowIndex": 0, "columnIndex": 0, "content": "x" }] }]
        }))
        .unwrap();
        let pages = analysis_to_pages(result);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_number, 1);
    }

    #[test]
    fn table_on_unreported_page_gets_its_own_page() {
        let result: AnalyzeResult = serde_json::from_value(json!({
            "pages": [
                { "pageNumber": 1, "lines": [
                    { "content": "page one text", "polygon": [1.0, 1.0, 3.0, 1.0, 3.0, 1.2, 1.0, 1.2] }
                ]}
            ],
            "tables": [{ "rowCount": 1, "columnCount": 1,
                "cells": [{ "rowIndex": 0, "columnIndex": 0, "content": "x" }],
                "boundingRegions": [
                    { "pageNumber": 3, "polygon": [0.0, 0.0, 5.0, 0.0, 5.0, 5.0, 0.0, 5.0] }
                ]
            }]
        }))
        .unwrap();
        let pages = analysis_to_pages(result);
        let layout: Vec<_> = pages
            .iter()
            .map(|p| (p.page_number, p.tables.len()))
            .collect();
        assert_eq!(layout, [(1, 0), (3, 1)]);
        assert_eq!(pages[0].text_blocks.len(), 1);
    }

    #[test]
    fn analyze_url_shape() {
        let client = FormRecognizerClient::new(
            reqwest::Client::new(),
            FormRecognizerConfig::new("https://fr.example.com/", "k"),
        );
        assert_eq!(
            client.analyze_url(),
            "https://fr.example.com/formrecognizer/documentModels/prebuilt-document:analyze?api-version=2023-07-31"
        );
    }
}
