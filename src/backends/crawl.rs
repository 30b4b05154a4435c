//! Enterprise web backend: a hosted crawl job renders the page and returns
//! structured elements, which are laid out as Markdown here.
//!
//! The job is started, polled at a fixed interval until it reaches a
//! terminal status, and its dataset is downloaded. Waiting is bounded by
//! `max_wait` unless that is `None`.

use super::{Extractor, ExtractorOutput, RenderedDocument, RewriteMode, SourcePayload};
use crate::config::CrawlConfig;
use crate::error::IngestError;
use crate::markdown::{render_table, MarkdownBuilder};
use crate::output::{Metadata, PendingImage, TableBlock};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SERVICE: &str = "crawl service";

/// Page-extraction script run by the crawl actor on every page.
pub const PAGE_FUNCTION: &str = r#"
async function pageFunction(context) {
    const $ = context.jQuery;
    const baseUrl = new URL(context.request.url);
    const extractedData = [];

    $('*').each((_, el) => {
        const tag = el.tagName.toLowerCase();
        const text = $(el).contents().map(function() {
            return (this.nodeType === 3) ? this.nodeValue.trim() : ' ';
        }).get().join(' ').replace(/\s+/g, ' ').trim();

        if (/^h[1-6]$/.test(tag)) {
            if (text) extractedData.push({ type: 'heading', tag, text });
        } else if (tag === 'p' || tag === 'span' || tag === 'div') {
            if (text) extractedData.push({ type: 'text', text });
        } else if (tag === 'img') {
            const src = $(el).attr('src');
            if (src) extractedData.push({ type: 'image', src: new URL(src, baseUrl).href });
        } else if (tag === 'a') {
            const href = $(el).attr('href');
            if (href) extractedData.push({ type: 'link', href: new URL(href, baseUrl).href, text });
        } else if (tag === 'table') {
            const rows = [];
            $(el).find('tr').each((_, row) => {
                const cells = [];
                $(row).find('th, td').each((_, cell) => {
                    const cellText = $(cell).text().replace(/\s+/g, ' ').trim();
                    if (cellText) cells.push(cellText);
                });
                if (cells.length) rows.push(cells);
            });
            if (rows.length) extractedData.push({ type: 'table', rows });
        }
    });

    return { url: context.request.url, pageTitle: document.title, extractedData };
}"#;

// ── Service model ────────────────────────────────────────────────────────

/// Identifiers of a started crawl run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub run_id: String,
    pub dataset_id: String,
}

/// Status of a crawl run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Ready,
    Running,
    Succeeded,
    Failed,
    Aborting,
    Aborted,
    #[serde(rename = "TIMING-OUT")]
    TimingOut,
    #[serde(rename = "TIMED-OUT")]
    TimedOut,
    #[serde(other)]
    Other,
}

impl RunStatus {
    /// Terminal statuses other than success.
    pub fn is_failure(&self) -> bool {
        matches!(self, RunStatus::Failed | RunStatus::Aborted | RunStatus::TimedOut)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Ready => "READY",
            RunStatus::Running => "RUNNING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
            RunStatus::Aborting => "ABORTING",
            RunStatus::Aborted => "ABORTED",
            RunStatus::TimingOut => "TIMING-OUT",
            RunStatus::TimedOut => "TIMED-OUT",
            RunStatus::Other => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// One crawled page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetItem {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub page_title: Option<String>,
    #[serde(default)]
    pub extracted_data: Vec<ExtractedElement>,
}

/// One element reported by the page function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExtractedElement {
    Heading {
        #[serde(default)]
        text: String,
    },
    Text {
        #[serde(default)]
        text: String,
    },
    Image {
        #[serde(default)]
        src: String,
    },
    Link {
        #[serde(default)]
        href: String,
        #[serde(default)]
        text: Option<String>,
    },
    Table {
        #[serde(default)]
        rows: Vec<Vec<String>>,
    },
    #[serde(other)]
    Other,
}

/// The crawl-job API.
#[async_trait]
pub trait CrawlService: Send + Sync {
    async fn start_run(&self, url: &str) -> Result<RunHandle, IngestError>;
    async fn run_status(&self, run_id: &str) -> Result<RunStatus, IngestError>;
    async fn dataset_items(&self, dataset_id: &str) -> Result<Vec<DatasetItem>, IngestError>;
}

// ── Apify client ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunData {
    id: String,
    #[serde(default)]
    default_dataset_id: String,
    #[serde(default)]
    status: Option<RunStatus>,
}

/// REST client for an Apify actor.
#[derive(Debug, Clone)]
pub struct ApifyClient {
    http: reqwest::Client,
    config: CrawlConfig,
}

impl ApifyClient {
    pub fn new(http: reqwest::Client, config: CrawlConfig) -> Self {
        Self { http, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, IngestError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(|e| IngestError::service_request(SERVICE, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::service_failed(SERVICE, format!("HTTP {}", status)));
        }
        response
            .json()
            .await
            .map_err(|e| IngestError::service_request(SERVICE, e))
    }
}

#[async_trait]
impl CrawlService for ApifyClient {
    async fn start_run(&self, url: &str) -> Result<RunHandle, IngestError> {
        let body = json!({
            "startUrls": [{ "url": url }],
            "pageFunction": PAGE_FUNCTION,
        });
        let response = self
            .http
            .post(self.url(&format!("acts/{}/runs", self.config.actor_id)))
            .bearer_auth(&self.config.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| IngestError::service_request(SERVICE, e))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IngestError::service_failed(
                SERVICE,
                format!("HTTP {}: {}", status, text),
            ));
        }
        let run: Envelope<RunData> = response
            .json()
            .await
            .map_err(|e| IngestError::service_request(SERVICE, e))?;
        Ok(RunHandle {
            run_id: run.data.id,
            dataset_id: run.data.default_dataset_id,
        })
    }

    async fn run_status(&self, run_id: &str) -> Result<RunStatus, IngestError> {
        let run: Envelope<RunData> = self
            .get_json(self.url(&format!("acts/{}/runs/{}", self.config.actor_id, run_id)))
            .await?;
        Ok(run.data.status.unwrap_or(RunStatus::Other))
    }

    async fn dataset_items(&self, dataset_id: &str) -> Result<Vec<DatasetItem>, IngestError> {
        self.get_json(self.url(&format!("datasets/{}/items?format=json", dataset_id)))
            .await
    }
}

// ── Markdown layout ──────────────────────────────────────────────────────

/// Lay dataset items out as Markdown and collect their image references.
pub fn dataset_to_markdown(items: &[DatasetItem]) -> (String, Vec<PendingImage>, bool) {
    let mut md = MarkdownBuilder::new();
    let mut images = Vec::new();
    let mut seen = HashSet::new();
    let mut has_tables = false;

    for item in items {
        md.raw(format!("**URL:** {}", item.url.as_deref().unwrap_or("No URL")));
        for element in &item.extracted_data {
            match element {
                ExtractedElement::Heading { text } => {
                    md.heading(2, text);
                }
                ExtractedElement::Text { text } => {
                    md.paragraph(text);
                }
                ExtractedElement::Image { src } => {
                    let src = src.trim();
                    if !src.is_empty() {
                        md.image("Image", src);
                        if seen.insert(src.to_string()) {
                            images.push(PendingImage::remote(src));
                        }
                    }
                }
                ExtractedElement::Link { href, text } => {
                    let href = href.trim();
                    if !href.is_empty() {
                        let text = text
                            .as_deref()
                            .map(str::trim)
                            .filter(|t| !t.is_empty())
                            .unwrap_or("No Text");
                        md.link(text, href);
                    }
                }
                ExtractedElement::Table { rows } => {
                    let rendered = render_table(&TableBlock::from_grid(rows.clone(), None));
                    if !rendered.is_empty() {
                        has_tables = true;
                        md.table(&rendered);
                    }
                }
                ExtractedElement::Other => {}
            }
        }
        md.raw("---");
    }
    (md.build(), images, has_tables)
}

// ── Extractor ────────────────────────────────────────────────────────────

/// The enterprise web extractor.
pub struct CrawlExtractor {
    service: Arc<dyn CrawlService>,
    poll_interval: Duration,
    max_wait: Option<Duration>,
}

impl CrawlExtractor {
    pub fn new(service: Arc<dyn CrawlService>, poll_interval: Duration, max_wait: Option<Duration>) -> Self {
        Self {
            service,
            poll_interval,
            max_wait,
        }
    }

    async fn wait_for_run(&self, run_id: &str) -> Result<(), IngestError> {
        let started = Instant::now();
        loop {
            let status = self.service.run_status(run_id).await?;
            debug!("Crawl run {} status {}", run_id, status);
            if status == RunStatus::Succeeded {
                return Ok(());
            }
            if status.is_failure() {
                warn!("Crawl run {} ended with {}", run_id, status);
                return Err(IngestError::CrawlFailed {
                    run_id: run_id.to_string(),
                    status: status.to_string(),
                });
            }
            if let Some(max_wait) = self.max_wait {
                if started.elapsed() >= max_wait {
                    return Err(IngestError::CrawlTimeout {
                        run_id: run_id.to_string(),
                        secs: max_wait.as_secs(),
                    });
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl Extractor for CrawlExtractor {
    fn name(&self) -> &'static str {
        "enterprise"
    }

    fn wants_page_html(&self) -> bool {
        false
    }

    async fn extract(&self, source: &SourcePayload) -> Result<ExtractorOutput, IngestError> {
        let SourcePayload::Web { url, .. } = source else {
            return Err(IngestError::Internal(
                "crawl extractor received a PDF source".into(),
            ));
        };

        let run = self.service.start_run(url.as_str()).await?;
        info!("Crawl run {} started for {}", run.run_id, url);
        self.wait_for_run(&run.run_id).await?;
        let items = self.service.dataset_items(&run.dataset_id).await?;
        info!("Crawl run {} returned {} items", run.run_id, items.len());

        let (markdown, images, has_tables) = dataset_to_markdown(&items);
        Ok(ExtractorOutput::Rendered(RenderedDocument {
            markdown,
            images,
            rewrite: RewriteMode::Strict,
            metadata: crawl_metadata(url, &items, has_tables),
        }))
    }
}

fn crawl_metadata(url: &Url, items: &[DatasetItem], has_tables: bool) -> Metadata {
    let domain = url.host_str().unwrap_or_default().to_string();
    let title = items
        .first()
        .and_then(|i| i.page_title.clone())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| domain.clone());
    let mut metadata = Metadata::new();
    metadata.insert("source_url".into(), json!(url.as_str()));
    metadata.insert("domain".into(), json!(domain));
    metadata.insert("title".into(), json!(title));
    metadata.insert("has_tables".into(), json!(has_tables));
    metadata
}
