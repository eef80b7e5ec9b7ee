//! CLI binary for docenrich.
//!
//! A thin shim over the library crate that maps CLI flags to `ParserConfig`,
//! wires the bundled clients together and writes the enriched JSON.

use anyhow::{Context, Result};
use clap::Parser;
use docenrich::analysis::azure::LayoutClient;
use docenrich::vision::{OpenAiVision, ProviderVision};
use docenrich::{
    DocumentParser, EnrichedDocument, LlmMetadataEnricher, ParserConfig, TokenUsage, VisionError,
    VisionModel, VisionObserver,
};
use edgequake_llm::ProviderFactory;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

// ── CLI vision observer using indicatif ──────────────────────────────────────

/// Spinner plus one log line per figure.
struct CliObserver {
    bar: ProgressBar,
    prompt_tokens: AtomicUsize,
    completion_tokens: AtomicUsize,
    failures: AtomicUsize,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Analyzing");
        bar.set_message("waiting for layout analysis…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            prompt_tokens: AtomicUsize::new(0),
            completion_tokens: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn tokens(&self) -> (usize, usize) {
        (
            self.prompt_tokens.load(Ordering::SeqCst),
            self.completion_tokens.load(Ordering::SeqCst),
        )
    }
}

impl VisionObserver for CliObserver {
    fn on_image_start(&self, index: usize, total: usize) {
        self.bar.set_prefix("Vision");
        self.bar.set_message(format!("figure {}/{}", index + 1, total));
    }

    fn on_request_complete(&self, usage: &TokenUsage, _latency: Duration) {
        self.prompt_tokens
            .fetch_add(usage.prompt_tokens, Ordering::SeqCst);
        self.completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::SeqCst);
    }

    fn on_request_failed(&self, error: &VisionError, latency: Duration) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        let msg = error.to_string();
        let msg = if msg.chars().count() > 80 {
            format!("{}\u{2026}", msg.chars().take(79).collect::<String>())
        } else {
            msg
        };
        self.bar.println(format!(
            "  {} {}  {}",
            red("✗"),
            red(&msg),
            dim(&format!("{:.1}s", latency.as_secs_f64())),
        ));
    }

    fn on_image_complete(&self, index: usize, total: usize, extracted: bool) {
        let mark = if extracted { green("✓") } else { red("–") };
        self.bar.println(format!(
            "  {} Figure {:>3}/{:<3}  {}",
            mark,
            index + 1,
            total,
            dim(if extracted { "extracted" } else { "skipped" }),
        ));
        if index + 1 == total {
            self.bar.set_prefix("Enriching");
            self.bar.set_message("document metadata…");
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Parse to stdout
  docenrich report.pdf

  # Write JSON to a file
  docenrich report.pdf -o report.json

  # Layout only, no figure extraction
  docenrich --no-vision report.pdf

  # Faster, cheaper figure crops
  docenrich --dpi 150 report.pdf

  # Vision through another provider (API key from its usual env var)
  docenrich --vision-provider anthropic --vision-model claude-sonnet-4-20250514 report.pdf

  # Add document metadata (title, summary, keywords, …)
  docenrich --enrich-provider openai --enrich-model gpt-4.1-nano report.pdf

  # Parse from URL
  docenrich https://example.com/annual-report.pdf -o annual.json

ENVIRONMENT VARIABLES:
  DOCENRICH_ANALYSIS_ENDPOINT  Layout service endpoint (required)
  DOCENRICH_ANALYSIS_KEY       Layout service key (required)
  OPENAI_API_KEY               OpenAI key for figure extraction
  OPENAI_BASE_URL              OpenAI-compatible server for figure extraction
  DOCENRICH_VISION_MODEL       Vision model (default gpt-4o)
  PDFIUM_LIB_PATH              Path to libpdfium used to crop figures
  RUST_LOG                     Log filter (default docenrich=info)
"#;

/// Turn PDF documents into enriched JSON sections.
#[derive(Parser, Debug)]
#[command(
    name = "docenrich",
    version,
    about = "Turn PDF documents into enriched JSON sections",
    long_about = "Analyse a PDF (local file or URL) with a layout-analysis service, describe \
its charts and infographics with a vision model, and print the enriched document as JSON.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "DOCENRICH_OUTPUT")]
    output: Option<PathBuf>,

    /// Layout-analysis service endpoint.
    #[arg(long, env = "DOCENRICH_ANALYSIS_ENDPOINT")]
    endpoint: String,

    /// Layout-analysis service key.
    #[arg(long, env = "DOCENRICH_ANALYSIS_KEY", hide_env_values = true)]
    analysis_key: String,

    /// Layout model requested from the service.
    #[arg(long, env = "DOCENRICH_MODEL_ID", default_value = "prebuilt-layout")]
    model_id: String,

    /// Analysis attempts before giving up.
    #[arg(long, env = "DOCENRICH_ANALYSIS_ATTEMPTS", default_value_t = 3)]
    analysis_attempts: u32,

    /// Seconds one analysis attempt may take.
    #[arg(long, env = "DOCENRICH_POLLING_TIMEOUT", default_value_t = 300)]
    polling_timeout: u64,

    /// Leave tables out of the output.
    #[arg(long)]
    no_tables: bool,

    /// Skip figure extraction.
    #[arg(long, env = "DOCENRICH_NO_VISION")]
    no_vision: bool,

    /// Vision model ID.
    #[arg(long, env = "DOCENRICH_VISION_MODEL", default_value = "gpt-4o")]
    vision_model: String,

    /// Serve vision through an edgequake-llm provider (openai, anthropic, gemini, …)
    /// instead of the built-in OpenAI client.
    #[arg(long, env = "DOCENRICH_VISION_PROVIDER")]
    vision_provider: Option<String>,

    /// OpenAI API key for the built-in vision client.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// OpenAI-compatible base URL for the built-in vision client.
    #[arg(long, env = "OPENAI_BASE_URL")]
    openai_base_url: Option<String>,

    /// Path to a text file containing a custom vision prompt.
    #[arg(long, env = "DOCENRICH_VISION_PROMPT")]
    vision_prompt: Option<PathBuf>,

    /// Max output tokens per figure.
    #[arg(long, env = "DOCENRICH_VISION_MAX_TOKENS", default_value_t = 4096)]
    vision_max_tokens: u32,

    /// Per-figure vision timeout in seconds.
    #[arg(long, env = "DOCENRICH_VISION_TIMEOUT", default_value_t = 120)]
    vision_timeout: u64,

    /// Request complete vision responses instead of streaming.
    #[arg(long)]
    no_stream: bool,

    /// Figure crop DPI (72–600).
    #[arg(long, env = "DOCENRICH_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Provider for document metadata enrichment. Off when unset.
    #[arg(long, env = "DOCENRICH_ENRICH_PROVIDER")]
    enrich_provider: Option<String>,

    /// Model for document metadata enrichment.
    #[arg(long, env = "DOCENRICH_ENRICH_MODEL", default_value = "gpt-4.1-nano")]
    enrich_model: String,

    /// Path to libpdfium.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Parent directory for per-document scratch files.
    #[arg(long, env = "DOCENRICH_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOCENRICH_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Compact JSON instead of pretty-printed.
    #[arg(long)]
    compact: bool,

    /// Disable progress spinner.
    #[arg(long, env = "DOCENRICH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCENRICH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCENRICH_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs unless verbose output was asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.verbose;
    let filter = if cli.verbose {
        "docenrich=debug"
    } else if cli.quiet || show_progress {
        "docenrich=error"
    } else {
        "docenrich=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let start = Instant::now();
    let observer = show_progress.then(CliObserver::new);
    let parser = build_parser(&cli, observer.clone()).await?;

    let result = parser.parse_input(&cli.input).await;
    if let Some(ref obs) = observer {
        obs.finish();
    }
    let document = result.context("Parsing failed")?;

    let json = if cli.compact {
        serde_json::to_string(&document)
    } else {
        document.to_json_pretty()
    }
    .context("Failed to serialise output")?;

    match cli.output {
        Some(ref path) => {
            tokio::fs::write(path, json.as_bytes())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(json.as_bytes())
                .context("Failed to write to stdout")?;
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet {
        print_summary(&document, observer.as_deref(), start.elapsed(), cli.output.as_ref());
    }

    Ok(())
}

/// Map CLI args to a configured `DocumentParser`.
async fn build_parser(cli: &Cli, observer: Option<Arc<CliObserver>>) -> Result<DocumentParser> {
    let vision_prompt = if let Some(ref path) = cli.vision_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read vision prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ParserConfig::builder()
        .model_id(&cli.model_id)
        .analysis_attempts(cli.analysis_attempts)
        .polling_timeout(Duration::from_secs(cli.polling_timeout))
        .include_tables(!cli.no_tables)
        .enable_vision(!cli.no_vision)
        .dpi(cli.dpi)
        .vision_model(&cli.vision_model)
        .vision_max_tokens(cli.vision_max_tokens)
        .vision_timeout(Duration::from_secs(cli.vision_timeout))
        .vision_stream(!cli.no_stream)
        .download_timeout(Duration::from_secs(cli.download_timeout));

    if let Some(prompt) = vision_prompt {
        builder = builder.vision_prompt(prompt);
    }
    if let Some(ref path) = cli.pdfium_lib {
        builder = builder.pdfium_library_path(path);
    }
    if let Some(ref dir) = cli.scratch_dir {
        builder = builder.scratch_root(dir);
    }
    let config = builder.build().context("Invalid configuration")?;

    let analysis = LayoutClient::new(&cli.endpoint, &cli.analysis_key)
        .context("Failed to create layout-analysis client")?;

    let mut parser = DocumentParser::builder(Arc::new(analysis));

    if !cli.no_vision {
        match vision_model(cli)? {
            Some(model) => parser = parser.vision_model(model),
            None => {
                if !cli.quiet {
                    eprintln!(
                        "{} no OPENAI_API_KEY or --vision-provider set; figures will not be extracted",
                        red("⚠")
                    );
                }
            }
        }
    }

    if let Some(ref name) = cli.enrich_provider {
        let provider = ProviderFactory::create_llm_provider(name, &cli.enrich_model)
            .map_err(|e| anyhow::anyhow!("Failed to create enrichment provider '{name}': {e}"))?;
        parser = parser.enricher(Arc::new(LlmMetadataEnricher::new(provider)));
    }

    if let Some(obs) = observer {
        parser = parser.observer(obs);
    }

    Ok(parser.config(config).build())
}

/// The vision model named by the flags, if any is usable.
fn vision_model(cli: &Cli) -> Result<Option<Arc<dyn VisionModel>>> {
    if let Some(ref provider) = cli.vision_provider {
        let vision = ProviderVision::from_factory(provider, &cli.vision_model)
            .context("Failed to create vision provider")?;
        return Ok(Some(Arc::new(vision)));
    }

    match cli.openai_api_key.as_deref() {
        Some(key) if !key.is_empty() => {
            let mut vision = OpenAiVision::new(key, &cli.vision_model)
                .context("Failed to create vision client")?;
            if let Some(ref url) = cli.openai_base_url {
                vision = vision.with_base_url(url);
            }
            Ok(Some(Arc::new(vision)))
        }
        _ => Ok(None),
    }
}

fn print_summary(
    document: &EnrichedDocument,
    observer: Option<&CliObserver>,
    elapsed: Duration,
    output: Option<&PathBuf>,
) {
    let stats = &document.metadata;
    let target = output
        .map(|p| format!("  →  {}", bold(&p.display().to_string())))
        .unwrap_or_default();
    eprintln!(
        "{}  {} pages  {} sections  {} figures  {}ms{}",
        green("✔"),
        stats.total_pages,
        stats.total_sections,
        stats.total_figures,
        elapsed.as_millis(),
        target,
    );

    if let Some(obs) = observer {
        let (prompt, completion) = obs.tokens();
        if prompt + completion > 0 {
            eprintln!(
                "   {} tokens in  /  {} tokens out",
                dim(&prompt.to_string()),
                dim(&completion.to_string()),
            );
        }
        let failures = obs.failures.load(Ordering::SeqCst);
        if failures > 0 {
            eprintln!("   {} vision request(s) failed", red(&failures.to_string()));
        }
    }
}
