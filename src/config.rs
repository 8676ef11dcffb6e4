//! Configuration for a page-fit run.
//!
//! Everything that varies between deployments lives in [`FitConfig`]: which
//! model to call, which LaTeX program and poppler tools to run, and how long
//! each external call may take. The convergence thresholds do **not** live
//! here; they are fixed policy in [`crate::policy`].
//!
//! # Design choice: builder over constructor
//! Most callers only set a model and maybe a LaTeX engine. The builder lets
//! them set just that and rely on documented defaults for the rest, while
//! `build()` is the single place where invalid combinations are rejected.

use crate::error::FitError;
use crate::pipeline::input::Asset;
use crate::pipeline::metrics::PopplerTools;
use crate::pipeline::oracle::RequestShape;
use crate::policy::{COMPILE_TIMEOUT_SECS, PREVIEW_TIMEOUT_SECS};
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Configuration for a page-fit run.
///
/// Built via [`FitConfig::builder()`] or using [`FitConfig::default()`].
///
/// # Example
/// ```rust
/// use resume_pagefit::FitConfig;
///
/// let config = FitConfig::builder()
///     .dpi(150)
///     .latex_program("xelatex")
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct FitConfig {
    /// Rasterisation DPI for page images sent to the oracle. Range: 72–400. Default: 150.
    ///
    /// 150 DPI keeps résumé body text legible to a vision model while holding
    /// the image-token cost of a two-page condensation request down.
    pub dpi: u32,

    /// Maximum raster dimension (width or height) in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// LLM model identifier, e.g. "gpt-4.1", "claude-sonnet-4-20250514".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Overrides the request shape derived from the provider name.
    pub request_shape: Option<RequestShape>,

    /// Sampling temperature. Default: 0.2.
    ///
    /// Rewrites should stay close to the user's own wording; a little
    /// temperature helps the model find shorter phrasings when condensing.
    pub temperature: f32,

    /// Maximum tokens the oracle may generate per call. Default: 8192.
    ///
    /// Every rewrite returns the *whole* document, so this must comfortably
    /// exceed the size of the longest résumé; too low and replies are cut off
    /// mid-document (the decoder tolerates that, the compiler will not).
    pub max_tokens: usize,

    /// Per-oracle-call timeout in seconds. Default: 180.
    pub api_timeout_secs: u64,

    /// LaTeX program invoked by the compiler adapter. Default: "pdflatex".
    pub latex_program: String,

    /// Files copied next to the document in every compile directory.
    pub assets: Vec<Asset>,

    /// Timeout for compiles inside the loop. Default: 60.
    pub compile_timeout_secs: u64,

    /// Timeout for single-shot preview compiles. Default: 30.
    pub preview_timeout_secs: u64,

    /// Poppler programs used for measurement.
    pub tools: PopplerTools,

    /// Per-tool-invocation timeout in seconds. Default: 30.
    pub tool_timeout_secs: u64,

    /// Compile the untouched input alongside the run and report it via
    /// [`crate::progress::FitProgressCallback::on_preview`]. Default: false.
    pub preview_original: bool,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,

    /// Checked between states; once cancelled the run stops with
    /// [`FitError::Cancelled`].
    pub cancellation: Option<CancellationToken>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            model: None,
            provider_name: None,
            provider: None,
            request_shape: None,
            temperature: 0.2,
            max_tokens: 8192,
            api_timeout_secs: 180,
            latex_program: "pdflatex".to_string(),
            assets: Vec::new(),
            compile_timeout_secs: COMPILE_TIMEOUT_SECS,
            preview_timeout_secs: PREVIEW_TIMEOUT_SECS,
            tools: PopplerTools::default(),
            tool_timeout_secs: 30,
            preview_original: false,
            progress_callback: None,
            cancellation: None,
        }
    }
}

impl fmt::Debug for FitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FitConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("request_shape", &self.request_shape)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("latex_program", &self.latex_program)
            .field("assets", &self.assets.iter().map(|a| &a.name).collect::<Vec<_>>())
            .field("compile_timeout_secs", &self.compile_timeout_secs)
            .field("tools", &self.tools)
            .field("preview_original", &self.preview_original)
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<callback>"))
            .field("cancellation", &self.cancellation.is_some())
            .finish()
    }
}

impl FitConfig {
    /// Create a new builder for `FitConfig`.
    pub fn builder() -> FitConfigBuilder {
        FitConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`FitConfig`].
#[derive(Debug)]
pub struct FitConfigBuilder {
    config: FitConfig,
}

impl FitConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
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

    pub fn request_shape(mut self, shape: RequestShape) -> Self {
        self.config.request_shape = Some(shape);
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

    pub fn latex_program(mut self, program: impl Into<String>) -> Self {
        self.config.latex_program = program.into();
        self
    }

    pub fn asset(mut self, asset: Asset) -> Self {
        self.config.assets.push(asset);
        self
    }

    pub fn assets(mut self, assets: Vec<Asset>) -> Self {
        self.config.assets = assets;
        self
    }

    pub fn compile_timeout_secs(mut self, secs: u64) -> Self {
        self.config.compile_timeout_secs = secs;
        self
    }

    pub fn preview_timeout_secs(mut self, secs: u64) -> Self {
        self.config.preview_timeout_secs = secs;
        self
    }

    pub fn tools(mut self, tools: PopplerTools) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout_secs = secs;
        self
    }

    pub fn preview_original(mut self, v: bool) -> Self {
        self.config.preview_original = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.config.cancellation = Some(token);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<FitConfig, FitError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(FitError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_tokens == 0 {
            return Err(FitError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        for (name, secs) in [
            ("api_timeout_secs", c.api_timeout_secs),
            ("compile_timeout_secs", c.compile_timeout_secs),
            ("preview_timeout_secs", c.preview_timeout_secs),
            ("tool_timeout_secs", c.tool_timeout_secs),
        ] {
            if secs == 0 {
                return Err(FitError::InvalidConfig(format!("{name} must be ≥ 1")));
            }
        }
        if c.latex_program.trim().is_empty() {
            return Err(FitError::InvalidConfig("latex_program must not be empty".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let c = FitConfig::default();
        assert_eq!(c.dpi, 150);
        assert_eq!(c.compile_timeout_secs, 60);
        assert_eq!(c.preview_timeout_secs, 30);
        assert_eq!(c.latex_program, "pdflatex");
        assert!(c.cancellation.is_none());
    }

    #[test]
    fn builder_clamps_dpi() {
        let c = FitConfig::builder().dpi(1000).build().unwrap();
        assert_eq!(c.dpi, 400);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = FitConfig::builder().compile_timeout_secs(0).build().unwrap_err();
        assert!(err.to_string().contains("compile_timeout_secs"));
    }

    #[test]
    fn empty_latex_program_is_rejected() {
        assert!(FitConfig::builder().latex_program(" ").build().is_err());
    }

    #[test]
    fn cancellation_is_observed() {
        let token = CancellationToken::new();
        let c = FitConfig::builder().cancellation(token.clone()).build().unwrap();
        token.cancel();
        assert!(c.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled));
    }
}
