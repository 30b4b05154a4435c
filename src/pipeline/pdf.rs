//! PDF content extraction via pdfium: positioned text spans and embedded
//! raster images, page by page.
//!
//! pdfium is not async-safe, so everything runs inside `spawn_blocking`.
//! Coordinates are converted from PDF space (origin bottom-left) to a
//! top-down space so that `y0 < y1` reads from the top of the page.

use crate::error::IngestError;
use crate::output::{BoundingBox, ImageRef, TextBlock};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use tracing::{debug, info, warn};

/// What to pull out of each page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub text: bool,
    pub images: bool,
}

impl ExtractOptions {
    pub const ALL: Self = Self {
        text: true,
        images: true,
    };
    pub const IMAGES_ONLY: Self = Self {
        text: false,
        images: true,
    };
}

/// One page as pdfium sees it.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    /// 1-based.
    pub page_number: usize,
    pub width: f32,
    pub height: f32,
    /// Text segments in content-stream order.
    pub spans: Vec<TextBlock>,
    pub images: Vec<ImageRef>,
}

/// Bind to pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the system.
pub fn bind_pdfium() -> Result<Pdfium, IngestError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.trim().is_empty() => Pdfium::bind_to_library(path.trim()),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| IngestError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// Extract spans and/or images from every page of a PDF held in memory.
pub async fn extract_pages(
    name: &str,
    bytes: Vec<u8>,
    options: ExtractOptions,
) -> Result<Vec<RawPage>, IngestError> {
    let name = name.to_string();
    tokio::task::spawn_blocking(move || extract_pages_blocking(&name, &bytes, options))
        .await
        .map_err(|e| IngestError::Internal(format!("PDF extraction task panicked: {}", e)))?
}

/// Blocking implementation of page extraction.
fn extract_pages_blocking(
    name: &str,
    bytes: &[u8],
    options: ExtractOptions,
) -> Result<Vec<RawPage>, IngestError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| IngestError::CorruptPdf {
            name: name.to_string(),
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let mut out = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let page_number = idx + 1;
        let width = page.width().value;
        let height = page.height().value;
        let mut raw = RawPage {
            page_number,
            width,
            height,
            ..Default::default()
        };

        if options.text {
            match page.text() {
                Ok(text) => {
                    for segment in text.segments().iter() {
                        let content = segment.text();
                        if content.trim().is_empty() {
                            continue;
                        }
                        let bbox = to_top_down(&segment.bounds(), height);
                        raw.spans.push(TextBlock::new(bbox, content));
                    }
                }
                Err(e) => warn!("Page {}: no text layer ({:?})", page_number, e),
            }
        }

        if options.images {
            for object in page.objects().iter() {
                let Some(image_object) = object.as_image_object() else {
                    continue;
                };
                let index = raw.images.len() + 1;
                match image_object.get_raw_image() {
                    Ok(img) => match encode_png(&img) {
                        Ok(png) => raw.images.push(ImageRef {
                            index,
                            bbox: None,
                            bytes: png,
                            extension: "png".to_string(),
                        }),
                        Err(e) => warn!("Page {} image {}: encode failed: {}", page_number, index, e),
                    },
                    Err(e) => warn!("Page {} image {}: unreadable: {:?}", page_number, index, e),
                }
            }
        }

        debug!(
            "Page {}: {} spans, {} images",
            page_number,
            raw.spans.len(),
            raw.images.len()
        );
        out.push(raw);
    }

    Ok(out)
}

/// PDF-space rectangle → top-down [`BoundingBox`].
fn to_top_down(rect: &PdfRect, page_height: f32) -> BoundingBox {
    BoundingBox::new(
        rect.left().value,
        page_height - rect.top().value,
        rect.right().value,
        page_height - rect.bottom().value,
    )
}

/// Lossless PNG bytes for an extracted image.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}
