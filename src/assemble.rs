//! Document Assembler: turns extractor output into one Markdown document and
//! an image map, persisting every image on the way.
//!
//! Page-structured output is laid out page by page in ascending page order,
//! with a separator between pages and a fixed per-backend order of text,
//! images and tables inside each page. Pre-rendered Markdown passes through
//! untouched apart from image reference rewriting.

use crate::backends::{
    BlockOrder, ExtractorOutput, PageStyle, PagedDocument, RenderedDocument, RewriteMode,
};
use crate::config::IngestConfig;
use crate::error::{AssemblyError, IngestError};
use crate::markdown::{merge_page_text, render_table, table_regions, tidy_markdown, MarkdownBuilder};
use crate::output::{ExtractionResult, ImageSource, Metadata, PageContent, SourceType};
use crate::progress::IngestProgressCallback;
use crate::resolve::{
    normalise_web_extension, pdf_image_filename, rewrite_references, web_image_filename,
    ImageFetcher, ImageResolver, Rewritten,
};
use crate::storage::BlobStore;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Assembles one document.
pub struct Assembler<'a> {
    store: &'a dyn BlobStore,
    config: &'a IngestConfig,
    source: SourceType,
    document_id: &'a str,
    fetcher: Arc<dyn ImageFetcher>,
    callback: Arc<dyn IngestProgressCallback>,
}

/// Accumulated image state while assembling.
#[derive(Default)]
struct ImageLedger {
    urls: BTreeMap<String, String>,
    keys: HashSet<String>,
    warnings: Vec<AssemblyError>,
}

impl<'a> Assembler<'a> {
    pub fn new(
        store: &'a dyn BlobStore,
        config: &'a IngestConfig,
        source: SourceType,
        document_id: &'a str,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            store,
            config,
            source,
            document_id,
            fetcher: config.fetcher()?,
            callback: config.callback(),
        })
    }

    /// Build the final Markdown and image map.
    pub async fn assemble(&self, output: ExtractorOutput) -> Result<ExtractionResult, IngestError> {
        let (markdown, pages, mut metadata, ledger, rewrite_skipped) = match output {
            ExtractorOutput::Paged(doc) => {
                let (markdown, pages, metadata, ledger) = self.assemble_pages(doc).await;
                (markdown, Some(pages), metadata, ledger, false)
            }
            ExtractorOutput::Rendered(doc) => {
                let (markdown, metadata, ledger, skipped) = self.assemble_rendered(doc).await;
                (markdown, None, metadata, ledger, skipped)
            }
        };

        metadata.insert("image_count".into(), json!(ledger.urls.len()));
        if !ledger.warnings.is_empty() {
            metadata.insert("degraded".into(), json!(true));
        }
        if rewrite_skipped {
            metadata.insert("image_rewrite".into(), json!("skipped"));
        }

        info!(
            "Assembled {}: {} chars, {} images, {} warnings",
            self.document_id,
            markdown.len(),
            ledger.urls.len(),
            ledger.warnings.len()
        );

        Ok(ExtractionResult {
            source_type: self.source,
            document_id: self.document_id.to_string(),
            pages,
            markdown,
            images: ledger.urls,
            metadata,
            warnings: ledger.warnings,
        })
    }

    // ── Page-structured output ───────────────────────────────────────────

    async fn assemble_pages(
        &self,
        doc: PagedDocument,
    ) -> (String, Vec<PageContent>, Metadata, ImageLedger) {
        let PagedDocument {
            mut pages,
            title,
            style,
            order,
            metadata,
        } = doc;
        pages.sort_by_key(|p| p.page_number);

        let resolver = ImageResolver::new(self.store, self.source, self.document_id);
        let annotated = style == PageStyle::Annotated;
        let mut ledger = ImageLedger::default();
        let mut md = MarkdownBuilder::new();
        if let Some(title) = &title {
            md.heading(1, title);
        }

        for (i, page) in pages.iter_mut().enumerate() {
            let n = page.page_number;
            if i > 0 {
                md.page_break(self.config.page_separator.render(n));
            }
            if annotated {
                md.heading(2, &format!("Page {}", n));
                md.paragraph(&format!("**Page Dimensions:** {} x {}", page.width, page.height));
            }

            let sections: [Section; 3] = match order {
                BlockOrder::TextImagesTables => [Section::Text, Section::Images, Section::Tables],
                BlockOrder::TablesImagesText => [Section::Tables, Section::Images, Section::Text],
            };
            for section in sections {
                match section {
                    Section::Text => {
                        let regions = table_regions(&page.tables);
                        let kept = merge_page_text(&page.text_blocks, &regions);
                        if annotated && !kept.is_empty() {
                            md.paragraph("**Text Content:**");
                        }
                        for block in kept {
                            md.paragraph(&block.text);
                        }
                    }
                    Section::Tables => {
                        for table in &page.tables {
                            let rendered = render_table(table);
                            if rendered.is_empty() {
                                continue;
                            }
                            if annotated {
                                md.paragraph("**Table:**");
                            }
                            md.table(&rendered);
                        }
                    }
                    Section::Images => {
                        self.persist_page_images(&resolver, page, &mut md, &mut ledger)
                            .await;
                    }
                }
            }
        }

        let mut markdown = md.build();
        if self.config.tidy_output {
            markdown = tidy_markdown(&markdown);
        }
        (markdown, pages, metadata, ledger)
    }

    async fn persist_page_images(
        &self,
        resolver: &ImageResolver<'_>,
        page: &mut PageContent,
        md: &mut MarkdownBuilder,
        ledger: &mut ImageLedger,
    ) {
        let n = page.page_number;
        for (pos, image) in page.images.iter_mut().enumerate() {
            let index = if image.index == 0 { pos + 1 } else { image.index };
            let ext = if image.extension.is_empty() {
                "png".to_string()
            } else {
                image.extension.to_ascii_lowercase()
            };

            let mut slot = index.to_string();
            let mut filename = pdf_image_filename(n, index, &ext);
            let mut suffix = 1;
            while !ledger.keys.insert(filename.clone()) {
                suffix += 1;
                slot = format!("{}_{}", index, suffix);
                filename = format!("image_p{}_{}.{}", n, slot, ext);
            }

            let key = resolver.key_for(&filename);
            let bytes = std::mem::take(&mut image.bytes);
            match resolver.persist(bytes, &key, &ext).await {
                Ok(url) => {
                    self.callback.on_image_persisted(&key.to_string(), &url);
                    md.image(&format!("Image {}-{}", n, slot), &url);
                    ledger.urls.insert(format!("p{}_{}", n, slot), url);
                }
                Err(e) => self.skip_image(ledger, key.to_string(), &e),
            }
        }
    }

    // ── Pre-rendered output ──────────────────────────────────────────────

    async fn assemble_rendered(
        &self,
        doc: RenderedDocument,
    ) -> (String, Metadata, ImageLedger, bool) {
        let RenderedDocument {
            markdown,
            images,
            rewrite,
            metadata,
        } = doc;

        let mut ledger = ImageLedger::default();
        let mut seen = HashSet::new();
        let pending: Vec<_> = images
            .into_iter()
            .filter(|img| seen.insert(img.reference.clone()))
            .collect();
        if pending.is_empty() {
            return (markdown, metadata, ledger, false);
        }

        let resolver = ImageResolver::new(self.store, self.source, self.document_id);
        let mut all_refs = Vec::with_capacity(pending.len());
        let mut originals = Vec::new();
        let mut durables = Vec::new();

        let fetched: Vec<_> = stream::iter(pending.into_iter().map(|image| {
            let fetcher = Arc::clone(&self.fetcher);
            async move {
                let result = match &image.source {
                    ImageSource::Inline { bytes, extension } => {
                        Ok((bytes.clone(), normalise_web_extension(extension)))
                    }
                    ImageSource::Remote { url } => fetcher.fetch(url).await,
                };
                (image, result)
            }
        }))
        .buffered(self.config.image_concurrency.max(1))
        .collect()
        .await;

        for (i, (image, fetched)) in fetched.into_iter().enumerate() {
            let n = i + 1;
            all_refs.push(image.reference.clone());
            let (bytes, ext) = match fetched {
                Ok(b) => b,
                Err(e) => {
                    self.skip_image(&mut ledger, short_ref(&image.reference), &e);
                    continue;
                }
            };

            let filename = web_image_filename(n, &ext);
            ledger.keys.insert(filename.clone());
            let key = resolver.key_for(&filename);
            match resolver.persist(bytes, &key, &ext).await {
                Ok(url) => {
                    self.callback.on_image_persisted(&key.to_string(), &url);
                    ledger.urls.insert(format!("img_{}", n), url.clone());
                    originals.push(image.reference);
                    durables.push(url);
                }
                Err(e) => self.skip_image(&mut ledger, short_ref(&image.reference), &e),
            }
        }

        let originals = match rewrite {
            RewriteMode::Strict => all_refs,
            RewriteMode::Lenient => originals,
        };
        match rewrite_references(&markdown, &originals, &durables) {
            Rewritten::Applied(out) => {
                debug!("Rewrote {} image references", durables.len());
                (out, metadata, ledger, false)
            }
            Rewritten::Skipped { markdown, reason } => {
                ledger.warnings.push(reason);
                (markdown, metadata, ledger, true)
            }
        }
    }

    fn skip_image(&self, ledger: &mut ImageLedger, reference: String, error: &IngestError) {
        warn!("Skipping image {}: {}", reference, error);
        self.callback.on_image_skipped(&reference, &error.to_string());
        ledger.warnings.push(AssemblyError::ImageSkipped {
            reference,
            detail: error.to_string(),
        });
    }
}

#[derive(Debug, Clone, Copy)]
enum Section {
    Text,
    Images,
    Tables,
}

/// Data URIs are shortened for logs and warnings.
fn short_ref(reference: &str) -> String {
    if reference.starts_with("data:") && reference.len() > 48 {
        let end = reference
            .char_indices()
            .nth(40)
            .map(|(i, _)| i)
            .unwrap_or(reference.len());
        format!("{}…", &reference[..end])
    } else {
        reference.to_string()
    }
}
