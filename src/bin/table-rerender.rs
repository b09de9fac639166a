//! CLI binary for table-rerender.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs the pipeline and delivers the result.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use table_rerender::{
    check_dependencies, inspect, rebuild, HttpUploadSink, LocalDirSink, OutputSink, PageReport,
    PipelineConfig, PipelineRun, ProgressCallback, RasterBackend, RetryPolicy,
    RunProgressCallback, RunVerdict, ToolPaths,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

const TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished page. Pages finish out
/// of order; the bar only counts.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    regenerated: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            regenerated: AtomicUsize::new(0),
        })
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Processing");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Scanning {total_pages} pages for tables…"))
        ));
    }

    fn on_page_start(&self, page: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap()
            .insert(page, Instant::now());
        self.bar.set_message(format!("page {page}"));
    }

    fn on_page_complete(&self, page: usize, total: usize, report: &PageReport) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&page)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        let elapsed = dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0));

        let line = match (&report.error, &report.render_error) {
            (Some(e), _) => {
                let msg = e.describe();
                let msg = if msg.chars().count() > 80 {
                    format!("{}\u{2026}", msg.chars().take(79).collect::<String>())
                } else {
                    msg
                };
                format!("  {} Page {page:>3}/{total:<3}  {}  {elapsed}", red("✗"), red(&msg))
            }
            (None, Some(_)) => format!(
                "  {} Page {page:>3}/{total:<3}  {}  {elapsed}",
                yellow("⚠"),
                yellow("table found, render failed")
            ),
            (None, None) if report.rendered_path.is_some() => {
                self.regenerated.fetch_add(1, Ordering::SeqCst);
                format!(
                    "  {} Page {page:>3}/{total:<3}  {}  {elapsed}",
                    green("✓"),
                    green("table re-rendered")
                )
            }
            (None, None) => format!(
                "  {} Page {page:>3}/{total:<3}  {}  {elapsed}",
                green("✓"),
                dim("no table")
            ),
        };
        self.bar.println(line);
        self.bar.inc(1);
    }

    fn on_merge_start(&self, _total_pages: usize) {
        self.bar.set_prefix("Merging");
        self.bar.set_message("assembling output…");
    }

    fn on_run_complete(&self, total_pages: usize, failed_pages: usize, verdict: RunVerdict) {
        self.bar.finish_and_clear();
        let regenerated = self.regenerated.load(Ordering::SeqCst);
        let mark = match verdict {
            RunVerdict::Success => green("✔"),
            RunVerdict::Degraded => yellow("⚠"),
            RunVerdict::Failed => red("✘"),
        };
        eprintln!(
            "{mark} {}  {} of {total_pages} pages re-rendered  ({} failed)",
            bold(&verdict.to_string()),
            bold(&regenerated.to_string()),
            if failed_pages == 0 {
                failed_pages.to_string()
            } else {
                red(&failed_pages.to_string())
            },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Rebuild into an explicit file
  table-rerender statement.pdf -o statement_rebuilt.pdf

  # Save under ./output/<client>/ with a unique name
  table-rerender statement.pdf --out-dir output --sub-folder "client a"

  # Send the result to a collection endpoint
  table-rerender statement.pdf --upload-url https://files.example.com/ingest

  # Use another chat provider through edgequake-llm
  table-rerender --provider openai --model gpt-4.1-mini statement.pdf -o out.pdf

  # Check that pdftoppm, tesseract and wkhtmltopdf are installed
  table-rerender --check-deps

  # Machine-readable run report, JSON logs
  table-rerender --json --log-json statement.pdf -o out.pdf > run.json

EXIT CODES:
  0  every page processed, no fallbacks
  2  output written, but some pages failed or fell back to the original
  1  no output produced, or a fatal error

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY                 Google Gemini API key (default backend)
  OPENAI_API_KEY, ANTHROPIC_...  Keys for --provider backends
  TABLE_RERENDER_*               Default for the matching flag
  RUST_LOG                       Log filter override
  PDFIUM_LIB_PATH                libpdfium location for --raster pdfium
"#;

/// Re-render table pages of a PDF from a vision-model HTML replica.
#[derive(Parser, Debug)]
#[command(
    name = "table-rerender",
    version,
    about = "Rebuild PDF pages that contain tables from a vision-model HTML replica",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    #[arg(required_unless_present = "check_deps")]
    input: Option<String>,

    /// Write the rebuilt PDF to this file.
    #[arg(short, long, env = "TABLE_RERENDER_OUTPUT")]
    output: Option<PathBuf>,

    /// Without -o: directory receiving `<name>_<uuid>.pdf`.
    #[arg(long, env = "TABLE_RERENDER_OUT_DIR", default_value = "output")]
    out_dir: PathBuf,

    /// Without -o: sub-folder of --out-dir (sanitised).
    #[arg(long, env = "TABLE_RERENDER_SUB_FOLDER")]
    sub_folder: Option<String>,

    /// Without -o: POST the result as multipart `file` to this URL.
    #[arg(long, env = "TABLE_RERENDER_UPLOAD_URL")]
    upload_url: Option<String>,

    /// Model ID. Default: gemini-2.0-flash.
    #[arg(long, env = "TABLE_RERENDER_MODEL")]
    model: Option<String>,

    /// Chat provider (gemini, openai, anthropic, ollama, …).
    #[arg(long, env = "TABLE_RERENDER_PROVIDER")]
    provider: Option<String>,

    /// Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Rasterisation DPI (72–600).
    #[arg(long, env = "TABLE_RERENDER_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Maximum pages processed at once (1-4, further capped at the CPU count).
    #[arg(short, long, env = "TABLE_RERENDER_WORKERS", default_value_t = 4,
          value_parser = clap::value_parser!(u64).range(1..=4))]
    workers: u64,

    /// Rasteriser backend.
    #[arg(long, env = "TABLE_RERENDER_RASTER", value_enum, default_value = "poppler")]
    raster: RasterArg,

    /// Tesseract language code(s), e.g. `eng` or `eng+deu`.
    #[arg(long, env = "TABLE_RERENDER_OCR_LANG", default_value = "eng")]
    ocr_lang: String,

    /// OCR timeout per page in seconds.
    #[arg(long, env = "TABLE_RERENDER_OCR_TIMEOUT", default_value_t = 60)]
    ocr_timeout: u64,

    /// Timeout for pdftoppm and wkhtmltopdf in seconds.
    #[arg(long, env = "TABLE_RERENDER_TOOL_TIMEOUT", default_value_t = 120)]
    tool_timeout: u64,

    /// Attempts per page for table detection.
    #[arg(long, env = "TABLE_RERENDER_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Backoff before the second attempt in ms; doubles each attempt.
    #[arg(long, env = "TABLE_RERENDER_RETRY_BASE_MS", default_value_t = 5_000)]
    retry_base_ms: u64,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "TABLE_RERENDER_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Text file with a custom table-detection prompt (`{pdf_page_text}`).
    #[arg(long, env = "TABLE_RERENDER_CLASSIFY_PROMPT")]
    classify_prompt: Option<PathBuf>,

    /// Text file with a custom markup prompt (`{image_reference}`, `{ocr_page_text}`).
    #[arg(long, env = "TABLE_RERENDER_MARKUP_PROMPT")]
    markup_prompt: Option<PathBuf>,

    #[arg(long, env = "TABLE_RERENDER_PDFTOPPM", default_value = "pdftoppm")]
    pdftoppm: PathBuf,

    #[arg(long, env = "TABLE_RERENDER_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    #[arg(long, env = "TABLE_RERENDER_WKHTMLTOPDF", default_value = "wkhtmltopdf")]
    wkhtmltopdf: PathBuf,

    /// Where the per-run work area is created. Default: system temp dir.
    #[arg(long, env = "TABLE_RERENDER_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Keep the work area (split pages, images, markup) after the run.
    #[arg(long, env = "TABLE_RERENDER_KEEP_WORK_DIR")]
    keep_work_dir: bool,

    /// Reject inputs larger than this many MiB (0 = no limit).
    #[arg(long, env = "TABLE_RERENDER_MAX_INPUT_MB", default_value_t = 10)]
    max_input_mb: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "TABLE_RERENDER_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the run report as JSON on stdout.
    #[arg(long, env = "TABLE_RERENDER_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "TABLE_RERENDER_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only.
    #[arg(long)]
    inspect_only: bool,

    /// Report external tool availability and exit.
    #[arg(long)]
    check_deps: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "TABLE_RERENDER_LOG_JSON")]
    log_json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TABLE_RERENDER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "TABLE_RERENDER_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RasterArg {
    Poppler,
    Pdfium,
}

impl From<RasterArg> for RasterBackend {
    fn from(v: RasterArg) -> Self {
        match v {
            RasterArg::Poppler => RasterBackend::Poppler,
            RasterArg::Pdfium => RasterBackend::Pdfium,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // With the progress bar active only errors are logged; the bar covers
    // the rest.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.log_json;
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    init_logging(level, cli.log_json)?;

    let tools = ToolPaths {
        pdftoppm: cli.pdftoppm.clone(),
        tesseract: cli.tesseract.clone(),
        wkhtmltopdf: cli.wkhtmltopdf.clone(),
    };

    // ── Dependency check ─────────────────────────────────────────────────
    if cli.check_deps {
        let statuses = check_dependencies(&tools).await;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&statuses).context("Failed to serialise report")?
            );
        } else {
            for s in &statuses {
                match (&s.path, &s.version) {
                    (Some(path), version) => println!(
                        "{} {:<12} {}  {}",
                        green("✓"),
                        s.tool,
                        path.display(),
                        dim(version.as_deref().unwrap_or("version unknown"))
                    ),
                    (None, _) => println!("{} {:<12} {}", red("✗"), s.tool, red("not found")),
                }
            }
        }
        let all_ok = statuses.iter().all(|s| s.is_available());
        return Ok(if all_ok { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    let input = cli
        .input
        .clone()
        .context("An input PDF path or URL is required")?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let meta = inspect(&input).await.context("Failed to inspect PDF")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialise metadata")?
            );
        } else {
            println!("File:         {input}");
            if let Some(ref t) = meta.title {
                println!("Title:        {t}");
            }
            if let Some(ref a) = meta.author {
                println!("Author:       {a}");
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
            println!("Size:         {} bytes", meta.file_size);
            if let Some(ref p) = meta.producer {
                println!("Producer:     {p}");
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn RunProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, tools, progress).await?;

    // ── Run ──────────────────────────────────────────────────────────────
    // Without -o the result is produced in a scratch directory and handed
    // to a sink afterwards.
    let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
    let output_name = format!("{}_rebuilt.pdf", input_stem(&input));
    let target = match cli.output {
        Some(ref path) => path.clone(),
        None => scratch.path().join(&output_name),
    };

    let run = rebuild(&input, &target, &config)
        .await
        .context("Rebuild failed")?;

    let location = match (&run.output_path, &cli.output) {
        (None, _) => None,
        (Some(path), Some(_)) => Some(path.display().to_string()),
        (Some(path), None) => Some(deliver(&cli, path, &output_name).await?),
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&run).context("Failed to serialise run report")?
        );
    } else if !cli.quiet {
        print_summary(&run, location.as_deref(), show_progress);
    }

    Ok(match run.verdict {
        RunVerdict::Success => ExitCode::SUCCESS,
        RunVerdict::Degraded => ExitCode::from(2),
        RunVerdict::Failed => ExitCode::FAILURE,
    })
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .boxed()
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(
    cli: &Cli,
    tools: ToolPaths,
    progress: Option<ProgressCallback>,
) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .dpi(cli.dpi)
        .max_workers(cli.workers as usize)
        .raster_backend(cli.raster.into())
        .ocr_language(cli.ocr_lang.clone())
        .ocr_timeout_secs(cli.ocr_timeout)
        .tool_timeout_secs(cli.tool_timeout)
        .retry(RetryPolicy {
            max_attempts: cli.max_retries,
            base_delay_ms: cli.retry_base_ms,
        })
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .keep_work_dir(cli.keep_work_dir)
        .tools(tools);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(ref dir) = cli.work_dir {
        builder = builder.work_dir(dir.clone());
    }
    if let Some(limit) = input_limit_bytes(cli.max_input_mb) {
        builder = builder.max_input_bytes(limit);
    }
    if let Some(ref path) = cli.classify_prompt {
        builder = builder.classification_prompt(read_prompt(path).await?);
    }
    if let Some(ref path) = cli.markup_prompt {
        builder = builder.markup_prompt(read_prompt(path).await?);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn read_prompt(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read prompt template from {}", path.display()))
}

async fn deliver(cli: &Cli, artifact: &Path, name: &str) -> Result<String> {
    let sink: Box<dyn OutputSink> = match cli.upload_url {
        Some(ref url) => Box::new(HttpUploadSink::new(url.clone())?),
        None => {
            let mut sink = LocalDirSink::new(cli.out_dir.clone());
            if let Some(ref sub) = cli.sub_folder {
                sink = sink.with_sub_folder(sub);
            }
            Box::new(sink)
        }
    };
    sink.deliver(artifact, name)
        .await
        .context("Failed to deliver output")
}

/// File stem of a path or of the last URL segment, `document` as fallback.
fn input_stem(input: &str) -> String {
    let without_query = input.split(['?', '#']).next().unwrap_or(input);
    let last = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(without_query);
    Path::new(last)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

fn print_summary(run: &PipelineRun, location: Option<&str>, progress_shown: bool) {
    if !progress_shown {
        eprintln!(
            "{}: {}/{} pages re-rendered, {} failed, {}ms",
            run.verdict,
            run.regenerated_pages().len(),
            run.total_pages,
            run.failed_pages,
            run.total_duration_ms
        );
    }
    if let Some(ref summary) = run.summary {
        eprintln!("   {}", dim(summary));
    }
    match location {
        Some(loc) => eprintln!("   →  {}", bold(loc)),
        None => eprintln!("   {}", red("no output written")),
    }
    if let Some(ref dir) = run.work_dir {
        eprintln!("   work area kept at {}", dim(&dir.display().to_string()));
    }
}

/// `--max-input-mb` in bytes; `0` disables the limit.
fn input_limit_bytes(mb: u64) -> Option<u64> {
    (mb > 0).then(|| mb.saturating_mul(1024 * 1024))
}
