//! Local extraction stages shared by the backends.
//!
//! Each submodule implements exactly one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! PDF bytes ──▶ input ──▶ pdf ──▶ layout ──▶ PageContent
//!              (validate) (pdfium) (rows, tables)
//!
//! URL ──▶ input ──▶ html ──▶ Markdown + pending images
//!        (fetch)   (scraper)
//! ```
//!
//! 1. [`input`]: validate the source, derive the document id, fetch web pages
//! 2. [`pdf`]: text spans and raster images via pdfium; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`layout`]: group spans into rows, detect tables, build text blocks
//! 4. [`html`]: HTML to Markdown for the open-source web path, and the
//!    `<img>` pre-rewrite for the layout engine

pub mod html;
pub mod input;
pub mod layout;
pub mod pdf;
