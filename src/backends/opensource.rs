//! Open-source backend: pdfium text and images with local layout analysis for
//! PDFs, HTML parsing for web pages. No external services.

use super::{
    BlockOrder, Extractor, ExtractorOutput, PageStyle, PagedDocument, RenderedDocument,
    RewriteMode, SourcePayload,
};
use crate::error::IngestError;
use crate::output::Metadata;
use crate::pipeline::html::html_to_markdown;
use crate::pipeline::input::domain_slug;
use crate::pipeline::layout::{build_page, LayoutOptions};
use crate::pipeline::pdf::{extract_pages, ExtractOptions};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// The open-source extractor.
#[derive(Debug, Clone, Default)]
pub struct OpenSourceExtractor {
    pub layout: LayoutOptions,
}

#[async_trait]
impl Extractor for OpenSourceExtractor {
    fn name(&self) -> &'static str {
        "opensource"
    }

    async fn extract(&self, source: &SourcePayload) -> Result<ExtractorOutput, IngestError> {
        match source {
            SourcePayload::Pdf { filename, bytes } => {
                let raw = extract_pages(filename, bytes.clone(), ExtractOptions::ALL).await?;
                let pages: Vec<_> = raw
                    .into_iter()
                    .map(|p| build_page(p, &self.layout))
                    .collect();
                let tables: usize = pages.iter().map(|p| p.tables.len()).sum();
                info!("Open-source extraction: {} pages, {} tables", pages.len(), tables);

                let mut metadata = Metadata::new();
                metadata.insert("original_filename".into(), json!(filename));
                metadata.insert("tables_found".into(), json!(tables));
                Ok(ExtractorOutput::Paged(PagedDocument {
                    pages,
                    title: None,
                    style: PageStyle::Plain,
                    order: BlockOrder::TablesImagesText,
                    metadata,
                }))
            }
            SourcePayload::Web { url, html } => {
                let html = html.as_deref().ok_or_else(|| {
                    IngestError::Internal("page HTML was not fetched before extraction".into())
                })?;
                let doc = html_to_markdown(html, url);
                let domain = domain_slug(url);
                info!(
                    "Open-source web extraction: {} images, {} tables",
                    doc.images.len(),
                    doc.table_count
                );

                let mut metadata = Metadata::new();
                metadata.insert("source_url".into(), json!(url.as_str()));
                metadata.insert("domain".into(), json!(url.host_str().unwrap_or(&domain)));
                metadata.insert("title".into(), json!(doc.title.as_deref().unwrap_or(&domain)));
                metadata.insert("tables_found".into(), json!(doc.table_count));
                Ok(ExtractorOutput::Rendered(RenderedDocument {
                    markdown: doc.markdown,
                    images: doc.images,
                    rewrite: RewriteMode::Lenient,
                    metadata,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;

    #[tokio::test]
    async fn web_page_renders_with_metadata() {
        let url = Url::parse("https://example.com/post").unwrap();
        let html = "<html><head><title>Post</title></head><body><p>Body</p><img src=\"/a.png\"></body></html>";
        let out = OpenSourceExtractor::default()
            .extract(&SourcePayload::Web {
                url,
                html: Some(html.into()),
            })
            .await
            .unwrap();
        let ExtractorOutput::Rendered(doc) = out else {
            panic!("expected rendered output");
        };
        assert_eq!(doc.rewrite, RewriteMode::Lenient);
        assert_eq!(doc.images.len(), 1);
        assert_eq!(doc.metadata["title"], "Post");
        assert_eq!(doc.metadata["domain"], "example.com");
        assert!(doc.markdown.starts_with("# Post\n\nBody"));
    }

    #[test]
    fn missing_html_is_internal_error() {
        let url = Url::parse("https://example.com/").unwrap();
        let err = tokio_test::block_on(
            OpenSourceExtractor::default().extract(&SourcePayload::Web { url, html: None }),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::Internal(_)));
    }
}
