//! Offline end-to-end tests for the request pipeline.
//!
//! Every external dependency is replaced with an in-process fake: storage is
//! a `MemoryStore` (or an `FsStore` in a temp dir), image downloads go
//! through a scripted `ImageFetcher`, and the crawl service is scripted.
//! PDF tests use extractors that emit synthetic pdfium spans, so no pdfium
//! library is needed.

use async_trait::async_trait;
use edgequake_ingest::backends::crawl::{
    CrawlExtractor, CrawlService, DatasetItem, ExtractedElement, RunHandle, RunStatus,
};
use edgequake_ingest::backends::{
    BlockOrder, OpenSourceExtractor, PageStyle, PagedDocument, RenderedDocument, RewriteMode,
};
use edgequake_ingest::output::ImageRef;
use edgequake_ingest::pipeline::layout::{build_page, LayoutOptions};
use edgequake_ingest::pipeline::pdf::RawPage;
use edgequake_ingest::{
    ingest, ingest_with, Backend, BoundingBox, ErrorCategory, Extractor, ExtractorOutput,
    FsStore, ImageFetcher, IngestConfig, IngestError, IngestProgressCallback, IngestRequest,
    MemoryStore, ProcessingState, Source, SourcePayload, TextBlock,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Serves a PNG for every URL except those containing "broken".
struct ScriptedFetcher;

#[async_trait]
impl ImageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<(Vec<u8>, String), IngestError> {
        if url.contains("broken") {
            return Err(IngestError::FetchFailed {
                url: url.to_string(),
                reason: "HTTP 404".into(),
            });
        }
        Ok((vec![0x89, b'P', b'N', b'G'], "png".into()))
    }
}

/// Records every callback event in order.
#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<ProcessingState>>,
    persisted: Mutex<Vec<String>>,
    skipped: Mutex<Vec<String>>,
    failed: Mutex<Option<String>>,
    completed: Mutex<Option<(String, usize)>>,
}

impl IngestProgressCallback for Recorder {
    fn on_state_change(&self, _document_id: &str, state: ProcessingState) {
        self.states.lock().unwrap().push(state);
    }
    fn on_image_persisted(&self, key: &str, _url: &str) {
        self.persisted.lock().unwrap().push(key.to_string());
    }
    fn on_image_skipped(&self, reference: &str, _error: &str) {
        self.skipped.lock().unwrap().push(reference.to_string());
    }
    fn on_complete(&self, _document_id: &str, markdown_url: &str, image_count: usize) {
        *self.completed.lock().unwrap() = Some((markdown_url.to_string(), image_count));
    }
    fn on_failed(&self, _document_id: &str, error: &str) {
        *self.failed.lock().unwrap() = Some(error.to_string());
    }
}

/// Stands in for the pdfium-backed extractor: lays out synthetic spans with
/// the real layout analysis.
struct SyntheticPdf {
    pages: Vec<RawPage>,
}

#[async_trait]
impl Extractor for SyntheticPdf {
    fn name(&self) -> &'static str {
        "opensource"
    }

    async fn extract(&self, _source: &SourcePayload) -> Result<ExtractorOutput, IngestError> {
        let opts = LayoutOptions::default();
        Ok(ExtractorOutput::Paged(PagedDocument {
            pages: self.pages.iter().cloned().map(|p| build_page(p, &opts)).collect(),
            title: None,
            style: PageStyle::Plain,
            order: BlockOrder::TablesImagesText,
            metadata: Default::default(),
        }))
    }
}

/// Returns fixed Markdown that references two remote images.
struct FixedMarkdown {
    rewrite: RewriteMode,
    references: Vec<&'static str>,
}

#[async_trait]
impl Extractor for FixedMarkdown {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn extract(&self, _source: &SourcePayload) -> Result<ExtractorOutput, IngestError> {
        let markdown = self
            .references
            .iter()
            .map(|r| format!("![Image]({r})"))
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(ExtractorOutput::Rendered(RenderedDocument {
            markdown,
            images: self
                .references
                .iter()
                .map(|r| edgequake_ingest::output::PendingImage::remote(*r))
                .collect(),
            rewrite: self.rewrite,
            metadata: Default::default(),
        }))
    }
}

struct ScriptedCrawl {
    statuses: Mutex<Vec<RunStatus>>,
    items: Vec<DatasetItem>,
}

impl ScriptedCrawl {
    fn new(statuses: Vec<RunStatus>, items: Vec<DatasetItem>) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses),
            items,
        })
    }
}

#[async_trait]
impl CrawlService for ScriptedCrawl {
    async fn start_run(&self, _url: &str) -> Result<RunHandle, IngestError> {
        Ok(RunHandle {
            run_id: "run-1".into(),
            dataset_id: "ds-1".into(),
        })
    }

    async fn run_status(&self, _run_id: &str) -> Result<RunStatus, IngestError> {
        let mut s = self.statuses.lock().unwrap();
        Ok(if s.len() > 1 { s.remove(0) } else { s[0] })
    }

    async fn dataset_items(&self, _dataset_id: &str) -> Result<Vec<DatasetItem>, IngestError> {
        Ok(self.items.clone())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn span(x0: f32, y0: f32, x1: f32, y1: f32, text: &str) -> TextBlock {
    TextBlock::new(BoundingBox::new(x0, y0, x1, y1), text)
}

fn table_page(page_number: usize) -> RawPage {
    RawPage {
        page_number,
        width: 612.0,
        height: 792.0,
        spans: vec![
            span(50.0, 100.0, 60.0, 110.0, "A"),
            span(200.0, 100.0, 210.0, 110.0, "B"),
            span(50.0, 115.0, 60.0, 125.0, "1"),
            span(200.0, 115.0, 210.0, 125.0, "2"),
            span(50.0, 160.0, 300.0, 170.0, "Some text below"),
        ],
        images: Vec::new(),
    }
}

fn png(index: usize) -> ImageRef {
    ImageRef {
        index,
        bbox: None,
        bytes: vec![0x89, b'P', b'N', b'G'],
        extension: "png".into(),
    }
}

fn pdf_source() -> Source {
    Source::Pdf {
        filename: "report.pdf".into(),
        bytes: b"%PDF-1.7 synthetic".to_vec(),
    }
}

fn web_source(html: &str) -> Source {
    Source::Web {
        url: "https://example.com/post".into(),
        html: Some(html.into()),
    }
}

fn config_with(recorder: Option<Arc<Recorder>>) -> IngestConfig {
    let mut builder = IngestConfig::builder().image_fetcher(Arc::new(ScriptedFetcher));
    if let Some(r) = recorder {
        builder = builder.progress_callback(r);
    }
    builder.build().unwrap()
}

// ── PDF path ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pdf_table_renders_once_before_paragraph() {
    let store = MemoryStore::default();
    let extractor = SyntheticPdf {
        pages: vec![table_page(1)],
    };
    let response = ingest_with(pdf_source(), &extractor, &config_with(None), &store)
        .await
        .unwrap();

    let id = &response.document_id;
    let md = store
        .text(&format!("pdf_sources/extracted_markdown/{id}/report.md"))
        .unwrap();
    assert_eq!(md, "| A | B |\n| - | - |\n| 1 | 2 |\n\nSome text below\n");
    assert_eq!(
        response.markdown_url,
        format!("memory://store/pdf_sources/extracted_markdown/{id}/report.md")
    );
    assert!(store.contains(&format!("pdf_sources/raw/{id}/report.pdf")));
    assert!(store.object(&format!("pdf_sources/extracted_markdown/{id}/report.md")).unwrap().public);
    assert!(response.image_urls.is_empty());
}

#[tokio::test]
async fn pdf_images_get_positional_keys() {
    let store = MemoryStore::default();
    let mut page1 = table_page(1);
    page1.images = vec![png(1), png(2)];
    let mut page2 = table_page(2);
    page2.images = vec![png(1)];
    let extractor = SyntheticPdf {
        pages: vec![page2, page1],
    };
    let response = ingest_with(pdf_source(), &extractor, &config_with(None), &store)
        .await
        .unwrap();

    let id = &response.document_id;
    let keys: Vec<_> = response.image_urls.keys().map(String::as_str).collect();
    assert_eq!(keys, ["p1_1", "p1_2", "p2_1"]);
    for name in ["image_p1_1.png", "image_p1_2.png", "image_p2_1.png"] {
        assert!(store.contains(&format!("pdf_sources/extracted_images/{id}/{name}")));
    }
    assert_eq!(response.metadata["image_count"], 3);

    let md = store
        .text(&format!("pdf_sources/extracted_markdown/{id}/report.md"))
        .unwrap();
    let first = md.find("image_p1_1.png").unwrap();
    let second = md.find("image_p2_1.png").unwrap();
    assert!(first < second);
    assert!(md.contains("\n---\n"));
}

#[tokio::test]
async fn pdf_image_write_failure_is_skipped() {
    let store = MemoryStore::default();
    store.fail_writes_matching("image_p1_1");
    let recorder = Arc::new(Recorder::default());
    let mut page = table_page(1);
    page.images = vec![png(1), png(2)];
    let extractor = SyntheticPdf { pages: vec![page] };

    let response = ingest_with(
        pdf_source(),
        &extractor,
        &config_with(Some(Arc::clone(&recorder))),
        &store,
    )
    .await
    .unwrap();

    assert_eq!(response.status, "success");
    let keys: Vec<_> = response.image_urls.keys().map(String::as_str).collect();
    assert_eq!(keys, ["p1_2"]);
    assert_eq!(response.metadata["degraded"], true);
    assert_eq!(response.metadata["warnings"].as_array().unwrap().len(), 1);
    assert_eq!(recorder.skipped.lock().unwrap().len(), 1);
    assert_eq!(recorder.persisted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn successful_request_walks_every_state() {
    let store = MemoryStore::default();
    let recorder = Arc::new(Recorder::default());
    let extractor = SyntheticPdf {
        pages: vec![table_page(1)],
    };
    let response = ingest_with(
        pdf_source(),
        &extractor,
        &config_with(Some(Arc::clone(&recorder))),
        &store,
    )
    .await
    .unwrap();

    assert_eq!(
        *recorder.states.lock().unwrap(),
        [
            ProcessingState::Received,
            ProcessingState::UploadingRaw,
            ProcessingState::Extracting,
            ProcessingState::Assembling,
            ProcessingState::Persisting,
            ProcessingState::Done,
        ]
    );
    assert_eq!(
        *recorder.completed.lock().unwrap(),
        Some((response.markdown_url, 0))
    );
    assert!(recorder.failed.lock().unwrap().is_none());
}

// ── Web path ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn web_images_are_rewritten_to_durable_urls() {
    let store = MemoryStore::default();
    let html = r#"<html><head><title>Post</title></head><body>
        <p>Intro</p>
        <img src="/a.png">
        <img src="https://cdn.example.com/b.png">
    </body></html>"#;
    let response = ingest_with(
        web_source(html),
        &OpenSourceExtractor::default(),
        &config_with(None),
        &store,
    )
    .await
    .unwrap();

    let id = &response.document_id;
    let base = format!("memory://store/web_sources/extracted_images/{id}");
    assert_eq!(response.image_urls["img_1"], format!("{base}/image_1.png"));
    assert_eq!(response.image_urls["img_2"], format!("{base}/image_2.png"));

    let md = store
        .text(&format!("web_sources/extracted_markdown/{id}/example_com.md"))
        .unwrap();
    assert!(md.starts_with("# Post\n\nIntro"));
    assert!(md.contains(&format!("![Image]({base}/image_1.png)")));
    assert!(md.contains(&format!("![Image]({base}/image_2.png)")));
    assert!(!md.contains("https://example.com/a.png"));
    assert!(!md.contains("cdn.example.com"));
    assert_eq!(response.metadata["processor"], "opensource");
    assert_eq!(response.metadata["title"], "Post");
    assert!(response.metadata.get("degraded").is_none());
}

#[tokio::test]
async fn web_failed_image_keeps_source_url() {
    let store = MemoryStore::default();
    let recorder = Arc::new(Recorder::default());
    let html = r#"<body><img src="https://example.com/ok.png"><img src="https://example.com/broken.png"></body>"#;
    let response = ingest_with(
        web_source(html),
        &OpenSourceExtractor::default(),
        &config_with(Some(Arc::clone(&recorder))),
        &store,
    )
    .await
    .unwrap();

    let id = &response.document_id;
    let md = store
        .text(&format!("web_sources/extracted_markdown/{id}/example_com.md"))
        .unwrap();
    assert!(md.contains("![Image](https://example.com/broken.png)"));
    assert!(!md.contains("https://example.com/ok.png"));
    assert_eq!(response.image_urls.len(), 1);
    assert_eq!(response.metadata["degraded"], true);
    assert_eq!(
        *recorder.skipped.lock().unwrap(),
        ["https://example.com/broken.png"]
    );
}

#[tokio::test]
async fn strict_rewrite_is_skipped_when_an_image_fails() {
    let store = MemoryStore::default();
    let extractor = FixedMarkdown {
        rewrite: RewriteMode::Strict,
        references: vec!["https://x.test/one.png", "https://x.test/broken.png"],
    };
    let response = ingest_with(web_source("<p/>"), &extractor, &config_with(None), &store)
        .await
        .unwrap();

    let id = &response.document_id;
    let md = store
        .text(&format!("web_sources/extracted_markdown/{id}/example_com.md"))
        .unwrap();
    assert_eq!(
        md,
        "![Image](https://x.test/one.png)\n\n![Image](https://x.test/broken.png)"
    );
    assert_eq!(response.metadata["image_rewrite"], "skipped");
    assert_eq!(response.metadata["degraded"], true);
    // The image that did persist is still reported.
    assert_eq!(response.image_urls.len(), 1);
}

#[tokio::test]
async fn markdown_write_failure_fails_request() {
    let store = MemoryStore::default();
    store.fail_writes_matching("extracted_markdown");
    let recorder = Arc::new(Recorder::default());
    let err = ingest_with(
        web_source("<p>hi</p>"),
        &OpenSourceExtractor::default(),
        &config_with(Some(Arc::clone(&recorder))),
        &store,
    )
    .await
    .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::StorageWrite);
    assert_eq!(
        recorder.states.lock().unwrap().last(),
        Some(&ProcessingState::Failed)
    );
    assert!(recorder.failed.lock().unwrap().is_some());
    assert!(recorder.completed.lock().unwrap().is_none());
}

// ── Crawl path ───────────────────────────────────────────────────────────────

fn crawl_items() -> Vec<DatasetItem> {
    vec![DatasetItem {
        url: Some("https://example.com/post".into()),
        page_title: Some("Crawled".into()),
        extracted_data: vec![
            ExtractedElement::Heading {
                text: "Intro".into(),
            },
            ExtractedElement::Image {
                src: "https://cdn.example.com/pic.png".into(),
            },
            ExtractedElement::Table {
                rows: vec![
                    vec!["k".into(), "v".into()],
                    vec!["a".into(), "1".into()],
                ],
            },
        ],
    }]
}

fn crawl_source() -> Source {
    Source::Web {
        url: "https://example.com/post".into(),
        html: None,
    }
}

#[tokio::test]
async fn crawl_success_rewrites_and_skips_raw_snapshot() {
    let store = MemoryStore::default();
    let service = ScriptedCrawl::new(
        vec![RunStatus::Running, RunStatus::Succeeded],
        crawl_items(),
    );
    let extractor = CrawlExtractor::new(service, Duration::ZERO, None);
    let response = ingest_with(crawl_source(), &extractor, &config_with(None), &store)
        .await
        .unwrap();

    let id = &response.document_id;
    assert!(store.keys().iter().all(|k| !k.contains("/raw/")));
    let md = store
        .text(&format!("web_sources/extracted_markdown/{id}/example_com.md"))
        .unwrap();
    assert!(md.starts_with("**URL:** https://example.com/post"));
    assert!(md.contains("## Intro"));
    assert!(md.contains(&format!(
        "![Image](memory://store/web_sources/extracted_images/{id}/image_1.png)"
    )));
    assert!(md.contains("| k | v |"));
    assert_eq!(response.metadata["processor"], "enterprise");
    assert_eq!(response.metadata["has_tables"], true);
    assert_eq!(response.metadata["title"], "Crawled");
}

#[tokio::test]
async fn crawl_failure_persists_no_markdown() {
    let store = MemoryStore::default();
    let recorder = Arc::new(Recorder::default());
    let service = ScriptedCrawl::new(vec![RunStatus::Running, RunStatus::Failed], Vec::new());
    let extractor = CrawlExtractor::new(service, Duration::ZERO, None);

    let err = ingest_with(
        crawl_source(),
        &extractor,
        &config_with(Some(Arc::clone(&recorder))),
        &store,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, IngestError::CrawlFailed { ref status, .. } if status == "FAILED"));
    assert_eq!(err.category(), ErrorCategory::ExternalService);
    assert!(store.keys().iter().all(|k| !k.contains("extracted_markdown")));
    assert_eq!(
        *recorder.states.lock().unwrap(),
        [
            ProcessingState::Received,
            ProcessingState::UploadingRaw,
            ProcessingState::Extracting,
            ProcessingState::Failed,
        ]
    );
}

#[tokio::test]
async fn crawl_times_out_when_bounded() {
    let store = MemoryStore::default();
    let service = ScriptedCrawl::new(vec![RunStatus::Running], Vec::new());
    let extractor = CrawlExtractor::new(service, Duration::from_millis(5), Some(Duration::ZERO));
    let err = ingest_with(crawl_source(), &extractor, &config_with(None), &store)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::CrawlTimeout { .. }));
}

// ── Backend selection ────────────────────────────────────────────────────────

#[test]
fn unknown_backend_is_rejected() {
    let err = "quantum".parse::<Backend>().unwrap_err();
    assert!(matches!(err, IngestError::UnknownBackend { ref tag } if tag == "quantum"));
    assert_eq!(err.category(), ErrorCategory::InputValidation);
    assert_eq!("Open Source".parse::<Backend>().unwrap(), Backend::OpenSource);
}

#[tokio::test]
async fn unconfigured_enterprise_writes_nothing() {
    let store = MemoryStore::default();
    let request = IngestRequest::pdf("a.pdf", b"%PDF-1.7".to_vec(), Backend::Enterprise);
    let err = ingest(request, &IngestConfig::default(), &store)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::BackendNotConfigured { .. }));
    assert!(store.keys().is_empty());
}

// ── Filesystem store ─────────────────────────────────────────────────────────

#[test]
fn fs_store_receives_the_same_layout() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path());
    let response = tokio_test::block_on(ingest_with(
        web_source("<html><body><p>Hello</p></body></html>"),
        &OpenSourceExtractor::default(),
        &config_with(None),
        &store,
    ))
    .unwrap();

    let id = &response.document_id;
    let md_path = dir
        .path()
        .join(format!("web_sources/extracted_markdown/{id}/example_com.md"));
    assert_eq!(std::fs::read_to_string(md_path).unwrap(), "Hello");
    assert!(dir
        .path()
        .join(format!("web_sources/raw/{id}/example_com.html"))
        .exists());
    assert!(response.markdown_url.starts_with("file://"));
}
