//! CLI binary for edgequake-ingest.
//!
//! A thin shim over the library crate that maps CLI flags to `IngestConfig`,
//! builds the blob store, runs one request and prints the response.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_ingest::{
    ingest, Backend, BlobStore, CrawlConfig, ExtractionResponse, FormRecognizerConfig, FsStore,
    IngestConfig, IngestProgressCallback, IngestRequest, LayoutEngineConfig, PageSeparator,
    ProcessingState, ProgressCallback, S3Config, S3Store,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one spinner that follows the request state, plus a log
/// line per persisted or skipped image.
struct CliProgressCallback {
    bar: ProgressBar,
    images: AtomicUsize,
    skipped: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            images: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        })
    }
}

fn state_label(state: ProcessingState) -> &'static str {
    match state {
        ProcessingState::Received => "Received",
        ProcessingState::UploadingRaw => "Uploading source",
        ProcessingState::Extracting => "Extracting",
        ProcessingState::Assembling => "Assembling",
        ProcessingState::Persisting => "Persisting",
        ProcessingState::Done => "Done",
        ProcessingState::Failed => "Failed",
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_state_change(&self, document_id: &str, state: ProcessingState) {
        self.bar.set_prefix(state_label(state));
        self.bar.set_message(document_id.to_string());
    }

    fn on_image_persisted(&self, key: &str, _url: &str) {
        self.images.fetch_add(1, Ordering::SeqCst);
        self.bar
            .println(format!("  {} {}", green("✓"), dim(key)));
    }

    fn on_image_skipped(&self, reference: &str, error: &str) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), reference, red(&msg)));
    }

    fn on_complete(&self, _document_id: &str, markdown_url: &str, image_count: usize) {
        self.bar.finish_and_clear();
        let skipped = self.skipped.load(Ordering::SeqCst);
        eprintln!(
            "{} {}  {} images{}",
            if skipped == 0 { green("✔") } else { cyan("⚠") },
            bold(markdown_url),
            image_count,
            if skipped == 0 {
                String::new()
            } else {
                format!("  ({} skipped)", red(&skipped.to_string()))
            }
        );
    }

    fn on_failed(&self, _document_id: &str, error: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), error);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Open-source extraction of a local PDF into S3
  ingest2md report.pdf --bucket my-bucket

  # Web page through the layout engine, stored in a local directory
  ingest2md https://example.com/post --backend layout --output-dir ./out

  # Enterprise PDF extraction, JSON response
  ingest2md scan.pdf --backend enterprise --json

  # Create the folder layout and verify bucket access only
  ingest2md --check-storage

BACKENDS:
  opensource   pdfium text + geometric tables (PDF), HTML tags (web)
  enterprise   document-analysis service (PDF), hosted crawl job (web)
  layout       Docling-compatible conversion server (PDF and web)

ENVIRONMENT VARIABLES:
  AWS_S3_BUCKET_NAME               Target bucket
  AWS_REGION                       Bucket region
  AWS_S3_ENDPOINT                  S3-compatible endpoint (MinIO, R2, LocalStack)
  AWS_S3_PUBLIC_URL                Base for returned object URLs
  AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY   Standard AWS credentials
  AZURE_FORM_RECOGNIZER_ENDPOINT   Document-analysis endpoint (enterprise PDF)
  AZURE_FORM_RECOGNIZER_KEY        Document-analysis key
  APIFY_API_TOKEN                  Crawl service token (enterprise web)
  ACTOR_ID                         Crawl actor id
  DOCLING_SERVE_URL                Layout engine base URL
  DOCLING_SERVE_API_KEY            Layout engine API key
  PDFIUM_LIB_PATH                  Path to libpdfium
"#;

/// Ingest PDF files and web pages into Markdown on object storage.
#[derive(Parser, Debug)]
#[command(
    name = "ingest2md",
    version,
    about = "Ingest PDF files and web pages into Markdown on object storage",
    long_about = "Extract PDF documents and web pages to Markdown through an open-source, \
enterprise or layout-engine backend. The raw source, the Markdown and every extracted image \
are written to S3 (or a local directory) under {pdf,web}_sources/{raw,extracted_markdown,extracted_images}/.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    #[arg(required_unless_present = "check_storage")]
    input: Option<String>,

    /// Extraction backend: opensource, enterprise, layout.
    #[arg(short, long, env = "INGEST2MD_BACKEND", default_value = "opensource")]
    backend: String,

    /// S3 bucket for all artifacts.
    #[arg(long, env = "AWS_S3_BUCKET_NAME")]
    bucket: Option<String>,

    /// S3 region.
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Custom S3-compatible endpoint.
    #[arg(long, env = "AWS_S3_ENDPOINT")]
    endpoint: Option<String>,

    /// Base URL used for returned object URLs.
    #[arg(long, env = "AWS_S3_PUBLIC_URL")]
    public_url: Option<String>,

    /// Write artifacts to this directory instead of S3 (takes precedence over --bucket).
    #[arg(short, long, env = "INGEST2MD_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Create the folder layout, check storage access and exit.
    #[arg(long)]
    check_storage: bool,

    /// Page separator: hr, comment, or custom string.
    #[arg(long, env = "INGEST2MD_SEPARATOR", default_value = "hr")]
    separator: String,

    /// Leave page-structured Markdown exactly as assembled.
    #[arg(long)]
    no_tidy: bool,

    /// Document-analysis endpoint (enterprise PDFs).
    #[arg(long, env = "AZURE_FORM_RECOGNIZER_ENDPOINT")]
    form_recognizer_endpoint: Option<String>,

    /// Document-analysis key.
    #[arg(long, env = "AZURE_FORM_RECOGNIZER_KEY", hide_env_values = true)]
    form_recognizer_key: Option<String>,

    /// Crawl service API token (enterprise web pages).
    #[arg(long, env = "APIFY_API_TOKEN", hide_env_values = true)]
    apify_token: Option<String>,

    /// Crawl actor id.
    #[arg(long, env = "ACTOR_ID")]
    actor_id: Option<String>,

    /// Maximum seconds to wait for a crawl run; 0 waits indefinitely.
    #[arg(long, env = "INGEST2MD_CRAWL_MAX_WAIT", default_value_t = 1800)]
    crawl_max_wait: u64,

    /// Layout engine base URL.
    #[arg(long, env = "DOCLING_SERVE_URL", default_value = "http://localhost:5001")]
    layout_url: String,

    /// Layout engine API key.
    #[arg(long, env = "DOCLING_SERVE_API_KEY", hide_env_values = true)]
    layout_api_key: Option<String>,

    /// Maximum concurrent image downloads.
    #[arg(long, env = "INGEST2MD_IMAGE_CONCURRENCY", default_value_t = 4)]
    image_concurrency: usize,

    /// HTTP timeout in seconds for page fetches, image downloads and service calls.
    #[arg(long, env = "INGEST2MD_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Print the full extraction response as JSON.
    #[arg(long)]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "INGEST2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INGEST2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "INGEST2MD_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Storage ──────────────────────────────────────────────────────────
    let store = build_store(&cli).await?;
    store
        .initialize()
        .await
        .context("Failed to create the storage folder layout")?;
    store
        .health_check()
        .await
        .with_context(|| format!("Storage '{}' is not reachable", store.name()))?;

    if cli.check_storage {
        if !cli.quiet {
            eprintln!("{} storage '{}' ready", green("✔"), store.name());
        }
        return Ok(());
    }

    // ── Request ──────────────────────────────────────────────────────────
    let input = cli
        .input
        .clone()
        .context("An input PDF path or URL is required")?;
    let backend: Backend = cli.backend.parse()?;
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn IngestProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let request = build_request(&input, backend).await?;

    let response = ingest(request, &config, store.as_ref())
        .await
        .context("Ingestion failed")?;

    print_response(&cli, &response)?;
    Ok(())
}

/// S3 unless `--output-dir` is given.
async fn build_store(cli: &Cli) -> Result<Box<dyn BlobStore>> {
    if let Some(dir) = &cli.output_dir {
        return Ok(Box::new(FsStore::new(dir)));
    }
    let bucket = cli
        .bucket
        .clone()
        .context("No storage configured: pass --bucket (or AWS_S3_BUCKET_NAME) or --output-dir")?;
    let config = S3Config {
        bucket,
        region: cli.region.clone(),
        endpoint_url: cli.endpoint.clone(),
        public_base_url: cli.public_url.clone(),
    };
    let store = S3Store::connect(config)
        .await
        .context("Failed to configure S3 client")?;
    Ok(Box::new(store))
}

/// Map CLI args to `IngestConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<IngestConfig> {
    let mut builder = IngestConfig::builder()
        .page_separator(parse_separator(&cli.separator))
        .tidy_output(!cli.no_tidy)
        .http_timeout_secs(cli.timeout)
        .image_concurrency(cli.image_concurrency)
        .layout(LayoutEngineConfig {
            base_url: cli.layout_url.clone(),
            api_key: cli.layout_api_key.clone(),
            ..LayoutEngineConfig::default()
        });

    if let (Some(endpoint), Some(key)) = (&cli.form_recognizer_endpoint, &cli.form_recognizer_key) {
        builder = builder.enterprise(FormRecognizerConfig::new(endpoint, key));
    }
    if let (Some(token), Some(actor)) = (&cli.apify_token, &cli.actor_id) {
        let mut crawl = CrawlConfig::new(token, actor);
        crawl.max_wait_secs = (cli.crawl_max_wait > 0).then_some(cli.crawl_max_wait);
        builder = builder.crawl(crawl);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// URL inputs become web requests; anything else is read as a PDF file.
async fn build_request(input: &str, backend: Backend) -> Result<IngestRequest> {
    if input.starts_with("http://") || input.starts_with("https://") {
        return Ok(IngestRequest::web(input, backend));
    }
    let path = Path::new(input);
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.to_string());
    Ok(IngestRequest::pdf(filename, bytes, backend))
}

fn print_response(cli: &Cli, response: &ExtractionResponse) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(response).context("Failed to serialise response")?;
        println!("{json}");
    } else {
        println!("{}", response.markdown_url);
        // The spinner already printed a summary line.
        if !cli.quiet && cli.no_progress {
            eprintln!(
                "Stored {} ({} images)",
                response.document_id,
                response.image_urls.len()
            );
        }
    }
    Ok(())
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}
