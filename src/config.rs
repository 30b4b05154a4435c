//! Configuration types for document ingestion.
//!
//! All request behaviour is controlled through [`IngestConfig`], built via its
//! [`IngestConfigBuilder`]. Service credentials for the external backends live
//! in their own small structs so a caller that only uses the open-source path
//! never has to think about them.

use crate::error::IngestError;
use crate::progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
use crate::resolve::{http_client, HttpImageFetcher, ImageFetcher};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Browser-like user agent used for page fetches and image downloads.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Configuration for one or many ingestion requests.
///
/// Built via [`IngestConfig::builder()`] or using [`IngestConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_ingest::{IngestConfig, PageSeparator};
///
/// let config = IngestConfig::builder()
///     .page_separator(PageSeparator::Comment)
///     .http_timeout_secs(30)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Marker placed between pages of page-structured output. Default: `---`.
    pub page_separator: PageSeparator,

    /// Apply whitespace cleanup to page-structured output. Default: true.
    ///
    /// Pre-rendered Markdown from the layout engine or the crawl path is never
    /// touched by this pass.
    pub tidy_output: bool,

    /// Timeout for page fetches, image downloads and service calls. Default: 120.
    pub http_timeout_secs: u64,

    /// User agent sent on page fetches and image downloads.
    pub user_agent: String,

    /// Maximum concurrent image downloads for pre-rendered Markdown. Default: 4.
    pub image_concurrency: usize,

    /// Commercial document-analysis service. Required for `enterprise` PDFs.
    pub enterprise: Option<FormRecognizerConfig>,

    /// Crawl-job service. Required for `enterprise` web pages.
    pub crawl: Option<CrawlConfig>,

    /// Layout-engine conversion service.
    pub layout: LayoutEngineConfig,

    /// Optional per-request event sink.
    pub progress_callback: Option<ProgressCallback>,

    /// Pre-constructed image fetcher. If None, images are downloaded over HTTP
    /// with `http_timeout_secs` and `user_agent`.
    pub image_fetcher: Option<Arc<dyn ImageFetcher>>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            page_separator: PageSeparator::default(),
            tidy_output: true,
            http_timeout_secs: 120,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            image_concurrency: 4,
            enterprise: None,
            crawl: None,
            layout: LayoutEngineConfig::default(),
            progress_callback: None,
            image_fetcher: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("page_separator", &self.page_separator)
            .field("tidy_output", &self.tidy_output)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("image_concurrency", &self.image_concurrency)
            .field("enterprise", &self.enterprise)
            .field("crawl", &self.crawl)
            .field("layout", &self.layout)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn IngestProgressCallback>"),
            )
            .field(
                "image_fetcher",
                &self.image_fetcher.as_ref().map(|_| "<dyn ImageFetcher>"),
            )
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults plus whatever service settings are present in the environment.
    ///
    /// Reads `AZURE_FORM_RECOGNIZER_ENDPOINT` / `AZURE_FORM_RECOGNIZER_KEY`,
    /// `APIFY_API_TOKEN` / `ACTOR_ID` and `DOCLING_SERVE_URL` /
    /// `DOCLING_SERVE_API_KEY`. Unset services stay unconfigured.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let (Some(endpoint), Some(key)) = (
            env_nonempty("AZURE_FORM_RECOGNIZER_ENDPOINT"),
            env_nonempty("AZURE_FORM_RECOGNIZER_KEY"),
        ) {
            config.enterprise = Some(FormRecognizerConfig::new(endpoint, key));
        }
        if let (Some(token), Some(actor)) =
            (env_nonempty("APIFY_API_TOKEN"), env_nonempty("ACTOR_ID"))
        {
            config.crawl = Some(CrawlConfig::new(token, actor));
        }
        if let Some(url) = env_nonempty("DOCLING_SERVE_URL") {
            config.layout.base_url = url;
        }
        config.layout.api_key = env_nonempty("DOCLING_SERVE_API_KEY");
        config
    }

    /// The configured callback, or a no-op.
    pub(crate) fn callback(&self) -> Arc<dyn IngestProgressCallback> {
        self.progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback))
    }

    /// HTTP client for page fetches and service calls.
    pub(crate) fn http(&self) -> Result<reqwest::Client, IngestError> {
        http_client(self.http_timeout_secs, &self.user_agent)
    }

    /// The configured fetcher, or an HTTP one.
    pub(crate) fn fetcher(&self) -> Result<Arc<dyn ImageFetcher>, IngestError> {
        match &self.image_fetcher {
            Some(f) => Ok(Arc::clone(f)),
            None => Ok(Arc::new(HttpImageFetcher::new(self.http()?))),
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn tidy_output(mut self, v: bool) -> Self {
        self.config.tidy_output = v;
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn image_concurrency(mut self, n: usize) -> Self {
        self.config.image_concurrency = n;
        self
    }

    pub fn enterprise(mut self, cfg: FormRecognizerConfig) -> Self {
        self.config.enterprise = Some(cfg);
        self
    }

    pub fn crawl(mut self, cfg: CrawlConfig) -> Self {
        self.config.crawl = Some(cfg);
        self
    }

    pub fn layout(mut self, cfg: LayoutEngineConfig) -> Self {
        self.config.layout = cfg;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn image_fetcher(mut self, fetcher: Arc<dyn ImageFetcher>) -> Self {
        self.config.image_fetcher = Some(fetcher);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.http_timeout_secs == 0 {
            return Err(IngestError::InvalidConfig(
                "HTTP timeout must be ≥ 1 second".into(),
            ));
        }
        if c.image_concurrency == 0 {
            return Err(IngestError::InvalidConfig(
                "Image concurrency must be ≥ 1".into(),
            ));
        }
        if let Some(e) = &c.enterprise {
            if !e.endpoint.starts_with("http") {
                return Err(IngestError::InvalidConfig(format!(
                    "Document-analysis endpoint must be an http(s) URL, got '{}'",
                    e.endpoint
                )));
            }
        }
        if let Some(cr) = &c.crawl {
            if cr.poll_interval_secs == 0 {
                return Err(IngestError::InvalidConfig(
                    "Crawl poll interval must be ≥ 1 second".into(),
                ));
            }
        }
        if !c.layout.base_url.starts_with("http") {
            return Err(IngestError::InvalidConfig(format!(
                "Layout engine URL must be an http(s) URL, got '{}'",
                c.layout.base_url
            )));
        }
        Ok(self.config)
    }
}

// ── Service configs ──────────────────────────────────────────────────────

/// Connection settings for the commercial document-analysis service.
#[derive(Clone, Serialize, Deserialize)]
pub struct FormRecognizerConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model_id: String,
    pub api_version: String,
    pub poll_interval_ms: u64,
    /// Upper bound on waiting for an analysis to finish.
    pub max_wait_secs: u64,
}

impl FormRecognizerConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model_id: "prebuilt-document".to_string(),
            api_version: "2023-07-31".to_string(),
            poll_interval_ms: 1000,
            max_wait_secs: 600,
        }
    }
}

impl fmt::Debug for FormRecognizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormRecognizerConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("model_id", &self.model_id)
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Connection settings for the crawl-job service.
#[derive(Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    pub api_base: String,
    pub api_token: String,
    pub actor_id: String,
    pub poll_interval_secs: u64,
    /// `None` waits until the run reaches a terminal status, however long.
    pub max_wait_secs: Option<u64>,
}

impl CrawlConfig {
    pub fn new(api_token: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self {
            api_base: "https://api.apify.com/v2".to_string(),
            api_token: api_token.into(),
            actor_id: actor_id.into(),
            poll_interval_secs: 5,
            max_wait_secs: Some(1800),
        }
    }
}

impl fmt::Debug for CrawlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrawlConfig")
            .field("api_base", &self.api_base)
            .field("api_token", &"<redacted>")
            .field("actor_id", &self.actor_id)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("max_wait_secs", &self.max_wait_secs)
            .finish()
    }
}

/// Connection settings for the layout-engine conversion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutEngineConfig {
    pub base_url: String,
    pub convert_path: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub do_ocr: bool,
    pub do_table_structure: bool,
}

impl Default for LayoutEngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5001".to_string(),
            convert_path: "/v1/convert/file".to_string(),
            api_key: None,
            do_ocr: true,
            do_table_structure: true,
        }
    }
}

impl LayoutEngineConfig {
    pub fn convert_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.convert_path.trim_start_matches('/')
        )
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How to separate pages in page-structured output.
///
/// A marker is always emitted between consecutive pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Horizontal rule: "\n\n---\n\n". (default)
    #[default]
    HorizontalRule,
    /// HTML comment with the number of the page that follows: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before page `page_num` (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds() {
        let c = IngestConfig::builder().build().unwrap();
        assert_eq!(c.http_timeout_secs, 120);
        assert!(c.tidy_output);
        assert_eq!(c.page_separator, PageSeparator::HorizontalRule);
        assert!(c.enterprise.is_none());
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = IngestConfig::builder().http_timeout_secs(0).build();
        assert!(matches!(err, Err(IngestError::InvalidConfig(_))));
        let err = IngestConfig::builder().image_concurrency(0).build();
        assert!(matches!(err, Err(IngestError::InvalidConfig(_))));
    }

    #[test]
    fn bad_layout_url_rejected() {
        let layout = LayoutEngineConfig {
            base_url: "localhost:5001".into(),
            ..Default::default()
        };
        assert!(IngestConfig::builder().layout(layout).build().is_err());
    }

    #[test]
    fn separators_render() {
        assert_eq!(PageSeparator::HorizontalRule.render(2), "\n\n---\n\n");
        assert_eq!(PageSeparator::Comment.render(3), "\n\n<!-- page 3 -->\n\n");
        assert_eq!(
            PageSeparator::Custom("***".into()).render(1),
            "\n\n***\n\n"
        );
    }

    #[test]
    fn convert_url_joins_cleanly() {
        let l = LayoutEngineConfig {
            base_url: "http://docling:5001/".into(),
            ..Default::default()
        };
        assert_eq!(l.convert_url(), "http://docling:5001/v1/convert/file");
    }

    #[test]
    fn debug_redacts_secrets() {
        let fr = FormRecognizerConfig::new("https://x.cognitiveservices.azure.com/", "secret");
        assert_eq!(fr.endpoint, "https://x.cognitiveservices.azure.com");
        let dbg = format!("{:?}", fr);
        assert!(!dbg.contains("secret"));

        let cr = CrawlConfig::new("tok123", "actor");
        assert!(!format!("{:?}", cr).contains("tok123"));
        assert_eq!(cr.max_wait_secs, Some(1800));
    }
}
