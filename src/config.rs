//! Configuration for the editorial analysis pipeline.
//!
//! Every knob lives in [`AnalysisConfig`], built through
//! [`AnalysisConfigBuilder`]. One struct is shared (by `Arc`) between all
//! sessions of a [`crate::SessionManager`], so a config value never changes
//! while a session is running.

use crate::error::BriefError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for detecting editorial pages and writing briefs.
///
/// # Example
/// ```rust
/// use editorial_brief::AnalysisConfig;
///
/// let config = AnalysisConfig::builder()
///     .extract_dpi(200)
///     .max_candidate_pages(4)
///     .model("gemini-2.0-flash")
///     .build()
///     .unwrap();
/// assert_eq!(config.scan_pages, 12);
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Number of leading pages sent to the classifier. Default: 12.
    ///
    /// Editorial sections of a daily sit well inside the first dozen pages;
    /// scanning more costs image tokens without finding more.
    pub scan_pages: usize,

    /// DPI of the detection thumbnails. Default: 72.
    ///
    /// Only the section headings must be legible at this stage.
    pub scan_dpi: u32,

    /// DPI used to re-render the confirmed pages for summarisation. Default: 300.
    pub extract_dpi: u32,

    /// Longest edge, in pixels, of any rendered page. Default: 8000.
    ///
    /// A broadsheet at 300 DPI is close to 7000 px tall; the cap keeps a
    /// mis-sized page from allocating gigabytes of pixels.
    pub max_rendered_pixels: u32,

    /// Upper bound on pages analysed per document. Default: 6.
    ///
    /// Applies to detected pages (lowest pages kept) and manual page lists
    /// (longer lists are rejected).
    pub max_candidate_pages: usize,

    /// Upper bound on briefs taken from one page. Default: 4.
    pub max_articles_per_page: usize,

    /// Simultaneous inference requests across all sessions. Default: 4.
    pub inference_concurrency: usize,

    /// Simultaneous page renders within one stage. Default: 2.
    pub render_concurrency: usize,

    /// LLM model identifier, e.g. "gemini-2.0-flash", "gpt-4.1-mini".
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens per model reply. Default: 4096.
    pub max_tokens: usize,

    /// Per-request timeout for the inference service, in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Delay before the single retry of a failed inference call. Default: 1000.
    ///
    /// Rate-limited calls wait four times as long.
    pub retry_backoff_ms: u64,

    /// How long a session waits for a manual page list. Default: 10 minutes.
    pub manual_pages_timeout: Duration,

    /// Invalid manual page lists tolerated before the session fails. Default: 3.
    pub max_manual_attempts: u32,

    /// Replace the built-in detection prompt.
    pub detection_prompt: Option<String>,

    /// Replace the built-in brief prompt.
    pub brief_prompt: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            scan_pages: 12,
            scan_dpi: 72,
            extract_dpi: 300,
            max_rendered_pixels: 8000,
            max_candidate_pages: 6,
            max_articles_per_page: 4,
            inference_concurrency: 4,
            render_concurrency: 2,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 4096,
            api_timeout_secs: 120,
            retry_backoff_ms: 1000,
            manual_pages_timeout: Duration::from_secs(600),
            max_manual_attempts: 3,
            detection_prompt: None,
            brief_prompt: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("scan_pages", &self.scan_pages)
            .field("scan_dpi", &self.scan_dpi)
            .field("extract_dpi", &self.extract_dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("max_candidate_pages", &self.max_candidate_pages)
            .field("max_articles_per_page", &self.max_articles_per_page)
            .field("inference_concurrency", &self.inference_concurrency)
            .field("render_concurrency", &self.render_concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("manual_pages_timeout", &self.manual_pages_timeout)
            .field("max_manual_attempts", &self.max_manual_attempts)
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn scan_pages(mut self, n: usize) -> Self {
        self.config.scan_pages = n;
        self
    }

    pub fn scan_dpi(mut self, dpi: u32) -> Self {
        self.config.scan_dpi = dpi;
        self
    }

    pub fn extract_dpi(mut self, dpi: u32) -> Self {
        self.config.extract_dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_candidate_pages(mut self, n: usize) -> Self {
        self.config.max_candidate_pages = n;
        self
    }

    pub fn max_articles_per_page(mut self, n: usize) -> Self {
        self.config.max_articles_per_page = n;
        self
    }

    pub fn inference_concurrency(mut self, n: usize) -> Self {
        self.config.inference_concurrency = n.max(1);
        self
    }

    pub fn render_concurrency(mut self, n: usize) -> Self {
        self.config.render_concurrency = n.max(1);
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

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn manual_pages_timeout(mut self, timeout: Duration) -> Self {
        self.config.manual_pages_timeout = timeout;
        self
    }

    pub fn max_manual_attempts(mut self, n: u32) -> Self {
        self.config.max_manual_attempts = n;
        self
    }

    pub fn detection_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.detection_prompt = Some(prompt.into());
        self
    }

    pub fn brief_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.brief_prompt = Some(prompt.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, BriefError> {
        let c = &self.config;
        if c.scan_pages == 0 {
            return Err(BriefError::InvalidConfig("scan_pages must be ≥ 1".into()));
        }
        if c.scan_dpi == 0 || c.extract_dpi == 0 {
            return Err(BriefError::InvalidConfig(format!(
                "DPI must be positive, got scan={} extract={}",
                c.scan_dpi, c.extract_dpi
            )));
        }
        if c.scan_dpi > c.extract_dpi {
            return Err(BriefError::InvalidConfig(format!(
                "scan DPI ({}) must not exceed extract DPI ({})",
                c.scan_dpi, c.extract_dpi
            )));
        }
        if c.max_candidate_pages == 0 || c.max_articles_per_page == 0 {
            return Err(BriefError::InvalidConfig(
                "page and article caps must be ≥ 1".into(),
            ));
        }
        if c.inference_concurrency == 0 || c.render_concurrency == 0 {
            return Err(BriefError::InvalidConfig(
                "concurrency limits must be ≥ 1".into(),
            ));
        }
        if c.max_manual_attempts == 0 {
            return Err(BriefError::InvalidConfig(
                "max_manual_attempts must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_newspaper_workflow() {
        let c = AnalysisConfig::default();
        assert_eq!(c.scan_pages, 12);
        assert_eq!(c.scan_dpi, 72);
        assert_eq!(c.extract_dpi, 300);
        assert_eq!(c.manual_pages_timeout, Duration::from_secs(600));
    }

    #[test]
    fn builder_rejects_zero_dpi() {
        let err = AnalysisConfig::builder().extract_dpi(0).build().unwrap_err();
        assert!(matches!(err, BriefError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_scan_above_extract() {
        assert!(AnalysisConfig::builder()
            .scan_dpi(400)
            .extract_dpi(300)
            .build()
            .is_err());
    }

    #[test]
    fn builder_clamps_concurrency() {
        let c = AnalysisConfig::builder()
            .inference_concurrency(0)
            .render_concurrency(0)
            .build()
            .unwrap();
        assert_eq!(c.inference_concurrency, 1);
        assert_eq!(c.render_concurrency, 1);
    }

    #[test]
    fn debug_hides_provider() {
        let s = format!("{:?}", AnalysisConfig::default());
        assert!(s.contains("provider: None"));
    }
}
