//! Configuration types for a table re-rendering run.
//!
//! All run behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The config is an explicit value handed to the
//! [`crate::orchestrator::Orchestrator`] at construction: nothing (API keys,
//! tool locations, output choices) is read from process-global state during
//! a run, so several runs with different settings can coexist.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use crate::prompts::{MARKUP_PLACEHOLDERS, TABLE_DETECTION_PLACEHOLDER};
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default model for both classification and synthesis.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Default Gemini REST endpoint.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Hard ceiling on concurrent page tasks, whatever `max_workers` asks for.
pub const MAX_WORKERS: usize = 4;

/// Configuration for one run of the table re-rendering pipeline.
///
/// # Example
/// ```rust
/// use table_rerender::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .api_key("test-key")
///     .max_workers(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 300);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rasterisation resolution. Default: 300.
    ///
    /// The OCR engine and the multimodal model both read the same image, so
    /// this is tuned for tesseract, which wants ~300 DPI for body text.
    pub dpi: u32,

    /// Upper bound on concurrently running page tasks. Default: 4.
    ///
    /// The effective pool size is `min(max_workers, 4, available_parallelism)`,
    /// see [`PipelineConfig::effective_workers`].
    pub max_workers: usize,

    /// Tesseract language pack(s), e.g. `"eng"` or `"fra+eng"`. Default: `"eng"`.
    pub ocr_language: String,

    /// OCR time budget per page in seconds. Default: 60.
    pub ocr_timeout_secs: u64,

    /// Time budget for rasteriser and renderer invocations in seconds. Default: 120.
    pub tool_timeout_secs: u64,

    /// Retry policy for the classification endpoint.
    pub retry: RetryPolicy,

    /// Model identifier. If None, uses [`DEFAULT_MODEL`] for Gemini or the
    /// provider default for other providers.
    pub model: Option<String>,

    /// Provider name. `None` or `"gemini"` selects the native Gemini REST
    /// backend; anything else is passed to `edgequake_llm::ProviderFactory`.
    pub provider_name: Option<String>,

    /// Pre-constructed chat provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// API key for the Gemini backend.
    pub api_key: Option<String>,

    /// Base URL of the Gemini REST API. Default: [`DEFAULT_GEMINI_BASE_URL`].
    pub api_base_url: String,

    /// Sampling temperature. Default: 0.1.
    ///
    /// The classifier must return a strict two-field JSON object; a low
    /// temperature keeps the model on format.
    pub temperature: f32,

    /// Maximum tokens generated per call. Default: 8192.
    ///
    /// A full-page HTML replica with embedded CSS routinely exceeds 4 000
    /// tokens.
    pub max_tokens: usize,

    /// Per-call timeout for generative endpoints in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Custom classification template; must contain `{pdf_page_text}`.
    pub classification_prompt: Option<String>,

    /// Custom markup template; must contain `{image_reference}` and `{ocr_page_text}`.
    pub markup_prompt: Option<String>,

    /// Locations of the external tools.
    pub tools: ToolPaths,

    /// Which rasteriser turns pages into images. Default: poppler.
    pub raster_backend: RasterBackend,

    /// Directory in which the per-run work area is created. Default: system temp.
    pub work_dir: Option<PathBuf>,

    /// Leave the work area on disk after the run. Default: false.
    pub keep_work_dir: bool,

    /// Reject inputs larger than this many bytes. Default: no limit.
    pub max_input_bytes: Option<u64>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Receives per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_workers: 4,
            ocr_language: "eng".to_string(),
            ocr_timeout_secs: 60,
            tool_timeout_secs: 120,
            retry: RetryPolicy::default(),
            model: None,
            provider_name: None,
            provider: None,
            api_key: None,
            api_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            temperature: 0.1,
            max_tokens: 8192,
            api_timeout_secs: 120,
            classification_prompt: None,
            markup_prompt: None,
            tools: ToolPaths::default(),
            raster_backend: RasterBackend::default(),
            work_dir: None,
            keep_work_dir: false,
            max_input_bytes: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("max_workers", &self.max_workers)
            .field("ocr_language", &self.ocr_language)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("retry", &self.retry)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("tools", &self.tools)
            .field("raster_backend", &self.raster_backend)
            .field("work_dir", &self.work_dir)
            .field("keep_work_dir", &self.keep_work_dir)
            .field("max_input_bytes", &self.max_input_bytes)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Number of page tasks allowed to run at once:
    /// `min(max_workers, MAX_WORKERS, available_parallelism)`, never below 1.
    pub fn effective_workers(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.max_workers.min(MAX_WORKERS).min(cpus).max(1)
    }

    /// Model name to request from the Gemini backend.
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n;
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout_secs = secs;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn classification_prompt(mut self, template: impl Into<String>) -> Self {
        self.config.classification_prompt = Some(template.into());
        self
    }

    pub fn markup_prompt(mut self, template: impl Into<String>) -> Self {
        self.config.markup_prompt = Some(template.into());
        self
    }

    pub fn tools(mut self, tools: ToolPaths) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn raster_backend(mut self, backend: RasterBackend) -> Self {
        self.config.raster_backend = backend;
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    pub fn keep_work_dir(mut self, v: bool) -> Self {
        self.config.keep_work_dir = v;
        self
    }

    pub fn max_input_bytes(mut self, limit: u64) -> Self {
        self.config.max_input_bytes = Some(limit);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if !(72..=600).contains(&c.dpi) {
            return Err(PipelineError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.max_workers == 0 {
            return Err(PipelineError::InvalidConfig("max_workers must be ≥ 1".into()));
        }
        if c.retry.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "retry.max_attempts must be ≥ 1".into(),
            ));
        }
        if c.ocr_timeout_secs == 0 || c.tool_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "tool timeouts must be ≥ 1s".into(),
            ));
        }
        if let Some(ref t) = c.classification_prompt {
            if !t.contains(TABLE_DETECTION_PLACEHOLDER) {
                return Err(PipelineError::InvalidConfig(format!(
                    "classification prompt must contain {TABLE_DETECTION_PLACEHOLDER}"
                )));
            }
        }
        if let Some(ref t) = c.markup_prompt {
            if let Some(missing) = MARKUP_PLACEHOLDERS.iter().find(|p| !t.contains(**p)) {
                return Err(PipelineError::InvalidConfig(format!(
                    "markup prompt must contain {missing}"
                )));
            }
        }
        Ok(self.config)
    }
}

/// Exponential backoff for the classification endpoint.
///
/// With the defaults the call is attempted 3 times, sleeping 5 s after the
/// first failure and 10 s after the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Default: 3.
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in milliseconds. Default: 5000.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based):
    /// `base_delay * 2^(attempt - 1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << exp))
    }
}

/// Rasteriser implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterBackend {
    /// Shell out to poppler's `pdftoppm`.
    #[default]
    Poppler,
    /// Render in-process with pdfium. Needs the `pdfium` feature.
    Pdfium,
}

/// Executable names or absolute paths of the external tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    /// Poppler rasteriser. Default: `pdftoppm`.
    pub pdftoppm: PathBuf,
    /// OCR engine. Default: `tesseract`.
    pub tesseract: PathBuf,
    /// HTML-to-PDF converter. Default: `wkhtmltopdf`.
    pub wkhtmltopdf: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            pdftoppm: PathBuf::from("pdftoppm"),
            tesseract: PathBuf::from("tesseract"),
            wkhtmltopdf: PathBuf::from("wkhtmltopdf"),
        }
    }
}
