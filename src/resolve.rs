//! Image Resource Resolver.
//!
//! Two jobs:
//!
//! * [`ImageResolver::persist`] writes one image to durable storage and returns
//!   its public URL.
//! * [`rewrite_references`] swaps source-document image URLs for durable ones
//!   inside already-generated Markdown, by exact URL match.
//!
//! Filenames are unique within a document: `image_p{page}_{index}.{ext}` for
//! PDFs (page and index are both unique per image) and `image_{n}.{ext}` for
//! web pages (`n` is a running counter).

use crate::error::{AssemblyError, IngestError};
use crate::output::SourceType;
use crate::storage::{image_content_type, BlobStore, ResourceKey};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{info, warn};

/// Image extensions kept as-is for web images; anything else becomes `png`.
const WEB_IMAGE_EXTENSIONS: [&str; 4] = ["jpeg", "jpg", "png", "gif"];

// ── Filename schemes ─────────────────────────────────────────────────────

pub fn pdf_image_filename(page_number: usize, index: usize, extension: &str) -> String {
    format!("image_p{page_number}_{index}.{extension}")
}

pub fn web_image_filename(n: usize, extension: &str) -> String {
    format!("image_{n}.{extension}")
}

/// Lower-case `ext` and fold anything outside jpeg/jpg/png/gif into `png`.
pub fn normalise_web_extension(ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    if WEB_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        ext
    } else {
        "png".to_string()
    }
}

// ── Persistence ──────────────────────────────────────────────────────────

/// Persists the images of one document.
pub struct ImageResolver<'a> {
    store: &'a dyn BlobStore,
    source: SourceType,
    document_id: &'a str,
}

impl<'a> ImageResolver<'a> {
    pub fn new(store: &'a dyn BlobStore, source: SourceType, document_id: &'a str) -> Self {
        Self {
            store,
            source,
            document_id,
        }
    }

    /// Storage key for `filename` in this document's image folder.
    pub fn key_for(&self, filename: &str) -> ResourceKey {
        ResourceKey::image(self.source, self.document_id, filename)
    }

    /// Write `bytes` publicly at `key` and return the URL.
    ///
    /// The caller decides whether a failure skips this image or aborts.
    pub async fn persist(
        &self,
        bytes: Vec<u8>,
        key: &ResourceKey,
        extension: &str,
    ) -> Result<String, IngestError> {
        let content_type = image_content_type(extension);
        let stored = self.store.store(key, bytes, &content_type, true).await?;
        info!("Persisted image {} ({})", stored.key, content_type);
        Ok(stored.url)
    }
}

// ── Remote download ──────────────────────────────────────────────────────

/// HTTP client with the timeout and user agent used for page and image fetches.
pub fn http_client(timeout_secs: u64, user_agent: &str) -> Result<reqwest::Client, IngestError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(user_agent)
        .build()
        .map_err(|e| IngestError::Internal(format!("HTTP client: {e}")))
}

/// Download an image and work out its extension.
///
/// The extension comes from the `Content-Type` header, else the URL path,
/// else `png`, and is then normalised with [`normalise_web_extension`].
pub async fn download_image(
    client: &reqwest::Client,
    url: &str,
) -> Result<(Vec<u8>, String), IngestError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| IngestError::FetchFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    if !response.status().is_success() {
        return Err(IngestError::FetchFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }
    let from_header = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(extension_from_content_type);
    let ext = from_header
        .or_else(|| extension_from_url(url))
        .unwrap_or_else(|| "png".to_string());
    let bytes = response
        .bytes()
        .await
        .map_err(|e| IngestError::FetchFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    Ok((bytes.to_vec(), normalise_web_extension(&ext)))
}

/// Source of remote image bytes. Returns the bytes and a normalised extension.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<(Vec<u8>, String), IngestError>;
}

/// [`ImageFetcher`] over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<(Vec<u8>, String), IngestError> {
        download_image(&self.client, url).await
    }
}

/// `image/jpeg; charset=...` → `jpeg`.
pub fn extension_from_content_type(content_type: &str) -> Option<String> {
    let mime = content_type.split(';').next()?.trim();
    let (kind, sub) = mime.split_once('/')?;
    if !kind.eq_ignore_ascii_case("image") || sub.is_empty() {
        return None;
    }
    Some(sub.trim_start_matches("x-").to_ascii_lowercase())
}

/// `https://x/a/b.JPG?w=1` → `jpg`.
pub fn extension_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

// ── Reference rewriting ──────────────────────────────────────────────────

/// Opening of an image reference, up to and including the `(`.
static RE_IMAGE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\(").unwrap());

/// Outcome of [`rewrite_references`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewritten {
    /// References were substituted.
    Applied(String),
    /// Preconditions failed; the Markdown is the input, unchanged.
    Skipped {
        markdown: String,
        reason: AssemblyError,
    },
}

impl Rewritten {
    pub fn markdown(&self) -> &str {
        match self {
            Rewritten::Applied(m) => m,
            Rewritten::Skipped { markdown, .. } => markdown,
        }
    }

    pub fn into_markdown(self) -> String {
        match self {
            Rewritten::Applied(m) => m,
            Rewritten::Skipped { markdown, .. } => markdown,
        }
    }
}

/// Replace `![alt](original)` with `![alt](durable)` for every aligned pair.
///
/// The lists must be non-empty and of equal length; otherwise nothing is
/// rewritten and [`Rewritten::Skipped`] carries the reason. Every occurrence
/// of an original URL is replaced, not just the first. Alt text is kept.
///
/// Targets are matched as exact strings followed by `)`, longest original
/// first, so URLs containing parentheses are rewritten too.
pub fn rewrite_references(markdown: &str, originals: &[String], durables: &[String]) -> Rewritten {
    if originals.is_empty() || durables.is_empty() {
        warn!("Image lists are empty; skipping reference rewrite");
        return Rewritten::Skipped {
            markdown: markdown.to_string(),
            reason: AssemblyError::EmptyImageList,
        };
    }
    if originals.len() != durables.len() {
        warn!(
            "Image lists are mismatched ({} vs {}); skipping reference rewrite",
            originals.len(),
            durables.len()
        );
        return Rewritten::Skipped {
            markdown: markdown.to_string(),
            reason: AssemblyError::ImageListMismatch {
                originals: originals.len(),
                durables: durables.len(),
            },
        };
    }

    let mut pairs: Vec<(&str, &str)> = originals
        .iter()
        .map(String::as_str)
        .zip(durables.iter().map(String::as_str))
        .collect();
    pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut out = String::with_capacity(markdown.len());
    let mut cursor = 0;
    for open in RE_IMAGE_OPEN.find_iter(markdown) {
        if open.start() < cursor {
            continue;
        }
        let target = &markdown[open.end()..];
        let hit = pairs.iter().find(|(original, _)| {
            target
                .strip_prefix(original)
                .is_some_and(|rest| rest.starts_with(')'))
        });
        if let Some((original, durable)) = hit {
            out.push_str(&markdown[cursor..open.end()]);
            out.push_str(durable);
            cursor = open.end() + original.len();
        }
    }
    out.push_str(&markdown[cursor..]);
    Rewritten::Applied(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn rewrites_every_occurrence() {
        let md = "![Image](http://src/a.png)\ntext\n![Image](http://src/a.png)\n![Image](http://src/b.png)";
        let out = rewrite_references(
            md,
            &s(&["http://src/a.png", "http://src/b.png"]),
            &s(&["https://store/a.png", "https://store/b.png"]),
        );
        let Rewritten::Applied(out) = out else {
            panic!("expected rewrite")
        };
        assert_eq!(out.matches("![Image](https://store/a.png)").count(), 2);
        assert_eq!(out.matches("![Image](https://store/b.png)").count(), 1);
        assert!(!out.contains("http://src/"));
    }

    #[test]
    fn mismatched_lists_are_noop() {
        let md = "![Image](http://src/a.png)";
        let out = rewrite_references(
            md,
            &s(&["http://src/a.png", "http://src/b.png"]),
            &s(&["https://store/a.png"]),
        );
        assert_eq!(out.markdown(), md);
        assert!(matches!(
            out,
            Rewritten::Skipped {
                reason: AssemblyError::ImageListMismatch {
                    originals: 2,
                    durables: 1
                },
                ..
            }
        ));
    }

    #[test]
    fn empty_lists_are_noop() {
        let md = "![Image](http://src/a.png)";
        for (o, d) in [
            (s(&[]), s(&["x"])),
            (s(&["http://src/a.png"]), s(&[])),
            (s(&[]), s(&[])),
        ] {
            let out = rewrite_references(md, &o, &d);
            assert_eq!(out.markdown(), md);
            assert!(matches!(out, Rewritten::Skipped { .. }));
        }
    }

    #[test]
    fn alt_text_preserved_and_unknown_urls_untouched() {
        let md = "![Chart 1](http://src/a.png) ![logo](http://other/z.png)";
        let out = rewrite_references(md, &s(&["http://src/a.png"]), &s(&["https://store/a.png"]));
        assert_eq!(
            out.into_markdown(),
            "![Chart 1](https://store/a.png) ![logo](http://other/z.png)"
        );
    }

    #[test]
    fn urls_with_parentheses_are_rewritten() {
        let md = "![Image](https://upload.example.org/Foo_(bar).png) and ![x](https://upload.example.org/Foo_(bar).png)";
        let out = rewrite_references(
            md,
            &s(&["https://upload.example.org/Foo_(bar).png"]),
            &s(&["https://store/image_1.png"]),
        );
        assert_eq!(
            out,
            Rewritten::Applied(
                "![Image](https://store/image_1.png) and ![x](https://store/image_1.png)".into()
            )
        );
    }

    #[test]
    fn longest_original_wins() {
        let md = "![a](http://src/a.png?x=1) ![b](http://src/a.png)";
        let out = rewrite_references(
            md,
            &s(&["http://src/a.png", "http://src/a.png?x=1"]),
            &s(&["https://store/1.png", "https://store/2.png"]),
        );
        assert_eq!(
            out.into_markdown(),
            "![a](https://store/2.png) ![b](https://store/1.png)"
        );
    }

    #[test]
    fn plain_links_not_rewritten() {
        let md = "[see](http://src/a.png)";
        let out = rewrite_references(md, &s(&["http://src/a.png"]), &s(&["https://store/a.png"]));
        assert_eq!(out.into_markdown(), md);
    }

    #[test]
    fn filename_schemes() {
        assert_eq!(pdf_image_filename(2, 3, "jpeg"), "image_p2_3.jpeg");
        assert_eq!(web_image_filename(7, "png"), "image_7.png");
    }

    #[test]
    fn extension_detection() {
        assert_eq!(extension_from_content_type("image/jpeg; q=1").as_deref(), Some("jpeg"));
        assert_eq!(extension_from_content_type("image/x-icon").as_deref(), Some("icon"));
        assert_eq!(extension_from_content_type("text/html"), None);
        assert_eq!(extension_from_url("https://x/a/b.JPG?w=1").as_deref(), Some("jpg"));
        assert_eq!(extension_from_url("https://x/a/b"), None);
        assert_eq!(normalise_web_extension("webp"), "png");
        assert_eq!(normalise_web_extension("GIF"), "gif");
    }

    #[tokio::test]
    async fn persist_uses_extension_content_type() {
        let store = MemoryStore::default();
        let resolver = ImageResolver::new(&store, SourceType::Pdf, "doc_1");
        let key = resolver.key_for(&pdf_image_filename(1, 1, "png"));
        let url = resolver.persist(vec![1, 2, 3], &key, "png").await.unwrap();
        assert_eq!(
            url,
            "memory://store/pdf_sources/extracted_images/doc_1/image_p1_1.png"
        );
        let obj = store
            .object("pdf_sources/extracted_images/doc_1/image_p1_1.png")
            .unwrap();
        assert_eq!(obj.content_type, "image/png");
        assert!(obj.public);

        let key = resolver.key_for(&pdf_image_filename(1, 2, "jb2"));
        resolver.persist(vec![9], &key, "jb2").await.unwrap();
        assert_eq!(
            store
                .object("pdf_sources/extracted_images/doc_1/image_p1_2.jb2")
                .unwrap()
                .content_type,
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn persist_failure_surfaces_storage_error() {
        let store = MemoryStore::default();
        store.fail_writes_matching("extracted_images");
        let resolver = ImageResolver::new(&store, SourceType::Web, "doc");
        let err = resolver
            .persist(vec![1], &resolver.key_for("image_1.png"), "png")
            .await
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::StorageWrite);
    }
}
