//! Configuration for document parsing.
//!
//! Every knob lives in [`ParserConfig`], built through
//! [`ParserConfig::builder()`]. Builder setters clamp obviously out-of-range
//! values; [`ParserConfigBuilder::build`] rejects combinations that cannot
//! work.

use crate::analysis::RetryPolicy;
use crate::error::ParseError;
use crate::pipeline::vision::VisionSettings;
use std::path::PathBuf;
use std::time::Duration;

/// Lowest accepted crop resolution.
pub const MIN_DPI: u32 = 72;
/// Highest accepted crop resolution.
pub const MAX_DPI: u32 = 600;

/// Configuration for a [`crate::parser::DocumentParser`].
///
/// # Example
/// ```rust
/// use docenrich::ParserConfig;
/// use std::time::Duration;
///
/// let config = ParserConfig::builder()
///     .dpi(150)
///     .analysis_attempts(5)
///     .polling_timeout(Duration::from_secs(600))
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 150);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ParserConfig {
    /// Layout model requested from the analysis service. Default: `prebuilt-layout`.
    pub model_id: String,

    /// Total analysis attempts, first one included. Default: 3.
    pub analysis_attempts: u32,

    /// Base delay for analysis retries. Default: 5 s.
    ///
    /// Timeouts wait `delay × attempt`, rate limits `delay × 2^attempt`,
    /// other transient failures `delay`.
    pub analysis_retry_delay: Duration,

    /// Budget for one analysis attempt to complete. Default: 300 s.
    pub polling_timeout: Duration,

    /// Emit table sections. Default: true.
    pub include_tables: bool,

    /// Collect figures for cropping. Default: true.
    pub include_figures: bool,

    /// Run the vision stage when a vision model is configured. Default: true.
    pub enable_vision: bool,

    /// Crop resolution. Range: 72–600. Default: 300.
    ///
    /// 300 DPI keeps axis labels and legends legible to the vision model;
    /// 150 halves the edge length (a quarter of the pixels) for faster,
    /// cheaper runs.
    pub dpi: u32,

    /// Model name sent with vision requests. `None` uses the vision client's
    /// own default (`gpt-4o` for the bundled OpenAI client).
    pub vision_model: Option<String>,

    /// `max_tokens` for each vision request. Default: 4096.
    pub vision_max_tokens: u32,

    /// Budget for one vision request, stream included. Default: 120 s.
    pub vision_timeout: Duration,

    /// Ask for streamed vision responses. Default: true.
    pub vision_stream: bool,

    /// Vision prompt override. `None` uses [`crate::prompts::DEFAULT_VISION_PROMPT`].
    pub vision_prompt: Option<String>,

    /// Retries per image after the first attempt. Default: 2.
    pub vision_max_retries: u32,

    /// Base backoff between vision retries in milliseconds. Default: 500.
    pub vision_retry_backoff_ms: u64,

    /// Parent of the per-document scratch directories holding cropped
    /// images. Default: `$TMPDIR/docenrich`.
    pub scratch_root: PathBuf,

    /// Explicit pdfium library file. `None` falls back to `PDFIUM_LIB_PATH`,
    /// the working directory, then the system library path.
    pub pdfium_library_path: Option<PathBuf>,

    /// Timeout for downloading a document given as a URL. Default: 120 s.
    pub download_timeout: Duration,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            model_id: "prebuilt-layout".to_string(),
            analysis_attempts: 3,
            analysis_retry_delay: Duration::from_secs(5),
            polling_timeout: Duration::from_secs(300),
            include_tables: true,
            include_figures: true,
            enable_vision: true,
            dpi: 300,
            vision_model: None,
            vision_max_tokens: 4096,
            vision_timeout: Duration::from_secs(120),
            vision_stream: true,
            vision_prompt: None,
            vision_max_retries: 2,
            vision_retry_backoff_ms: 500,
            scratch_root: std::env::temp_dir().join("docenrich"),
            pdfium_library_path: None,
            download_timeout: Duration::from_secs(120),
        }
    }
}

impl ParserConfig {
    /// Create a new builder for `ParserConfig`.
    pub fn builder() -> ParserConfigBuilder {
        ParserConfigBuilder {
            config: Self::default(),
        }
    }

    /// Analysis retry policy derived from this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.analysis_attempts,
            base_delay: self.analysis_retry_delay,
            polling_timeout: self.polling_timeout,
        }
    }

    /// Vision request settings derived from this config.
    pub fn vision_settings(&self) -> VisionSettings {
        VisionSettings {
            max_tokens: self.vision_max_tokens,
            timeout: self.vision_timeout,
            stream: self.vision_stream,
            max_retries: self.vision_max_retries,
            retry_backoff: Duration::from_millis(self.vision_retry_backoff_ms),
        }
    }
}

/// Builder for [`ParserConfig`].
#[derive(Debug)]
pub struct ParserConfigBuilder {
    config: ParserConfig,
}

impl ParserConfigBuilder {
    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.config.model_id = model_id.into();
        self
    }

    pub fn analysis_attempts(mut self, n: u32) -> Self {
        self.config.analysis_attempts = n.max(1);
        self
    }

    pub fn analysis_retry_delay(mut self, delay: Duration) -> Self {
        self.config.analysis_retry_delay = delay;
        self
    }

    pub fn polling_timeout(mut self, timeout: Duration) -> Self {
        self.config.polling_timeout = timeout;
        self
    }

    pub fn include_tables(mut self, v: bool) -> Self {
        self.config.include_tables = v;
        self
    }

    pub fn include_figures(mut self, v: bool) -> Self {
        self.config.include_figures = v;
        self
    }

    pub fn enable_vision(mut self, v: bool) -> Self {
        self.config.enable_vision = v;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(MIN_DPI, MAX_DPI);
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = Some(model.into());
        self
    }

    pub fn vision_max_tokens(mut self, n: u32) -> Self {
        self.config.vision_max_tokens = n;
        self
    }

    pub fn vision_timeout(mut self, timeout: Duration) -> Self {
        self.config.vision_timeout = timeout;
        self
    }

    pub fn vision_stream(mut self, v: bool) -> Self {
        self.config.vision_stream = v;
        self
    }

    pub fn vision_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.vision_prompt = Some(prompt.into());
        self
    }

    pub fn vision_max_retries(mut self, n: u32) -> Self {
        self.config.vision_max_retries = n;
        self
    }

    pub fn vision_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.vision_retry_backoff_ms = ms;
        self
    }

    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = root.into();
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.config.download_timeout = timeout;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ParserConfig, ParseError> {
        let c = &self.config;
        if c.dpi < MIN_DPI || c.dpi > MAX_DPI {
            return Err(ParseError::InvalidConfig(format!(
                "DPI must be {MIN_DPI}–{MAX_DPI}, got {}",
                c.dpi
            )));
        }
        if c.model_id.trim().is_empty() {
            return Err(ParseError::InvalidConfig("model_id must not be empty".into()));
        }
        if c.analysis_attempts == 0 {
            return Err(ParseError::InvalidConfig(
                "analysis_attempts must be ≥ 1".into(),
            ));
        }
        if c.polling_timeout.is_zero() {
            return Err(ParseError::InvalidConfig(
                "polling_timeout must be > 0".into(),
            ));
        }
        if c.vision_timeout.is_zero() {
            return Err(ParseError::InvalidConfig(
                "vision_timeout must be > 0".into(),
            ));
        }
        if c.vision_max_tokens == 0 {
            return Err(ParseError::InvalidConfig(
                "vision_max_tokens must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ParserConfig::default();
        assert_eq!(c.model_id, "prebuilt-layout");
        assert_eq!(c.analysis_attempts, 3);
        assert_eq!(c.analysis_retry_delay, Duration::from_secs(5));
        assert_eq!(c.polling_timeout, Duration::from_secs(300));
        assert!(c.include_tables && c.include_figures && c.enable_vision);
        assert_eq!(c.dpi, 300);
        assert_eq!(c.vision_max_tokens, 4096);
        assert_eq!(c.vision_timeout, Duration::from_secs(120));
        assert!(c.vision_stream);
        assert!(c.scratch_root.ends_with("docenrich"));
    }

    #[test]
    fn builder_clamps_dpi_and_attempts() {
        let c = ParserConfig::builder()
            .dpi(10)
            .analysis_attempts(0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, MIN_DPI);
        assert_eq!(c.analysis_attempts, 1);

        let c = ParserConfig::builder().dpi(5000).build().unwrap();
        assert_eq!(c.dpi, MAX_DPI);
    }

    #[test]
    fn build_rejects_zero_timeouts() {
        let err = ParserConfig::builder()
            .polling_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidConfig(m) if m.contains("polling_timeout")));

        assert!(ParserConfig::builder()
            .vision_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(ParserConfig::builder().model_id("  ").build().is_err());
    }

    #[test]
    fn derived_policies() {
        let c = ParserConfig::builder()
            .analysis_attempts(4)
            .analysis_retry_delay(Duration::from_secs(2))
            .vision_retry_backoff_ms(250)
            .vision_stream(false)
            .build()
            .unwrap();

        let policy = c.retry_policy();
        assert_eq!(policy.attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_secs(2));

        let vision = c.vision_settings();
        assert_eq!(vision.retry_backoff, Duration::from_millis(250));
        assert!(!vision.stream);
    }
}
