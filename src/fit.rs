//! The page-fit convergence loop and its entry points.
//!
//! ## States
//!
//! ```text
//! Drafting ─▶ Compiling ─┬─▶ FixingCompileError* ─▶ (Done: page_count 0)
//!                        └─▶ MeasuringPages ─┬─▶ 1 page ─▶ RemediatingUnderflow (attempt 1) ─▶ Done
//!                                            └─▶ ≥2 pages ─▶ RemediatingOverflow ─┬─▶ AwaitingChoice
//!                                                                                  ├─▶ Done (attempts exhausted)
//!                                                                                  └─▶ Compiling
//! ```
//!
//! The loop is strictly sequential. The only concurrent work is the optional
//! preview compile of the untouched input, which is detached and can never
//! change the outcome.
//!
//! Compile failures, rejected fix candidates and leftover overflow all end in
//! [`FitOutcome::Done`] with a summary saying what went wrong. Only oracle
//! failures, measurement failures, invalid input and cancellation are errors.

use crate::config::FitConfig;
use crate::error::FitError;
use crate::output::{
    FitOutcome, FitRequest, FitResult, FitStats, FitStatus, OverflowChoice, PdfReport,
};
use crate::pipeline::compile::{CompileResult, DocumentCompiler, LatexCompiler};
use crate::pipeline::decode::{decode, DecodedResponse};
use crate::pipeline::input;
use crate::pipeline::metrics::{PdfMetrics, PopplerMetrics};
use crate::pipeline::oracle::{Oracle, OracleMessage, ProviderOracle, RequestShape};
use crate::pipeline::validate::validate;
use crate::policy::{
    MAX_COMPILE_FIX_ATTEMPTS, MAX_RETRY_ATTEMPTS, SMALL_OVERFLOW_THRESHOLD_PCT,
    UNDERFLOW_THRESHOLD_PCT,
};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::prompts;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Runs the convergence loop against a set of collaborators.
///
/// [`FitEngine::from_config`] wires the real LaTeX compiler, poppler tools
/// and LLM provider; [`FitEngine::new`] accepts any implementations, which is
/// how the integration tests drive the loop with scripted doubles.
pub struct FitEngine {
    compiler: Arc<dyn DocumentCompiler>,
    preview_compiler: Arc<dyn DocumentCompiler>,
    metrics: Arc<dyn PdfMetrics>,
    oracle: Arc<dyn Oracle>,
    progress: ProgressCallback,
    cancellation: Option<CancellationToken>,
    preview_original: bool,
}

impl FitEngine {
    pub fn new(
        compiler: Arc<dyn DocumentCompiler>,
        metrics: Arc<dyn PdfMetrics>,
        oracle: Arc<dyn Oracle>,
    ) -> Self {
        Self {
            preview_compiler: Arc::clone(&compiler),
            compiler,
            metrics,
            oracle,
            progress: Arc::new(NoopProgressCallback),
            cancellation: None,
            preview_original: false,
        }
    }

    /// Build an engine from configuration, resolving the LLM provider.
    pub async fn from_config(config: &FitConfig) -> Result<Self, FitError> {
        let (provider, provider_name) = resolve_provider(config).await?;
        let shape = config
            .request_shape
            .unwrap_or_else(|| RequestShape::for_provider(&provider_name));
        debug!("Using provider '{}' with {:?} requests", provider_name, shape);

        let oracle = ProviderOracle::new(
            provider,
            shape,
            config.temperature,
            config.max_tokens,
            config.api_timeout_secs,
        );
        let compiler = LatexCompiler::new(&config.latex_program, config.compile_timeout_secs)
            .with_assets(config.assets.clone());
        let preview = LatexCompiler::new(&config.latex_program, config.preview_timeout_secs)
            .with_assets(config.assets.clone());
        let metrics = PopplerMetrics::new(
            config.tools.clone(),
            config.dpi,
            config.max_rendered_pixels,
            config.tool_timeout_secs,
        );

        let mut engine = Self::new(Arc::new(compiler), Arc::new(metrics), Arc::new(oracle))
            .with_preview_compiler(Arc::new(preview))
            .preview_original(config.preview_original);
        if let Some(ref cb) = config.progress_callback {
            engine = engine.with_progress(Arc::clone(cb));
        }
        if let Some(ref token) = config.cancellation {
            engine = engine.with_cancellation(token.clone());
        }
        Ok(engine)
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Compiler used for the detached preview of the untouched input.
    pub fn with_preview_compiler(mut self, compiler: Arc<dyn DocumentCompiler>) -> Self {
        self.preview_compiler = compiler;
        self
    }

    pub fn preview_original(mut self, enabled: bool) -> Self {
        self.preview_original = enabled;
        self
    }

    /// Run the loop to a terminal outcome.
    ///
    /// # Errors
    /// - [`FitError::InvalidInput`] when the document or target is blank
    /// - [`FitError::OracleFailed`] / [`FitError::OracleTimeout`] from any oracle call
    /// - [`FitError::MeasurementFailed`] when a compiled PDF cannot be measured
    /// - [`FitError::Cancelled`] once the cancellation token fires
    pub async fn run(&self, request: &FitRequest) -> Result<FitOutcome, FitError> {
        if request.document.trim().is_empty() {
            return Err(FitError::missing("document"));
        }
        if request.target.trim().is_empty() {
            return Err(FitError::missing("target"));
        }
        info!(
            "Starting page fit ({} chars, force_condense={})",
            request.document.len(),
            request.force_condense
        );

        if self.preview_original {
            self.spawn_preview(&request.document);
        }

        let mut session = Session::new(self);

        // ── Drafting ─────────────────────────────────────────────────────
        self.checkpoint("drafting")?;
        self.progress.on_status(if request.follow_up_text().is_some() {
            "Applying follow-up"
        } else {
            "Drafting tailored résumé"
        });
        let draft = session
            .ask("drafting", &prompts::draft_messages(request))
            .await?;
        let mut document = draft.document;
        let summary = draft.summary;
        let mut attempt: u32 = 1;

        loop {
            // ── Compiling ────────────────────────────────────────────────
            self.checkpoint("compiling")?;
            self.progress.on_attempt(attempt, MAX_RETRY_ATTEMPTS);
            self.progress.on_compiling(attempt);
            let mut compiled = session.compile(&document).await;

            // ── FixingCompileError ───────────────────────────────────────
            if !is_usable(&compiled) {
                let snapshot = document.clone();
                let mut rejection: Option<String> = None;
                let mut fix = 0;
                while !is_usable(&compiled) && fix < MAX_COMPILE_FIX_ATTEMPTS {
                    fix += 1;
                    self.checkpoint("fixing")?;
                    self.progress.on_compile_fix(fix, MAX_COMPILE_FIX_ATTEMPTS);
                    let error = compiled.error_excerpt();
                    info!("Compile failed on attempt {}, fix {}: {}", attempt, fix, first_line(&error));

                    let messages = prompts::fix_messages(
                        &document,
                        &error,
                        &compiled.diagnostics,
                        &request.document,
                    );
                    let candidate = session.ask("fixing", &messages).await?;
                    let verdict = validate(&snapshot, &candidate.document);
                    if !verdict.is_valid {
                        let reason = verdict.reason.unwrap_or_default();
                        warn!("Discarding fix candidate: {}", reason);
                        self.progress.on_candidate_rejected(&reason);
                        document = snapshot.clone();
                        rejection = Some(reason);
                        break;
                    }

                    document = candidate.document;
                    self.checkpoint("compiling")?;
                    self.progress.on_compiling(attempt);
                    compiled = session.compile(&document).await;
                }

                if !is_usable(&compiled) {
                    warn!("Giving up after {} fix attempt(s); returning for manual review", fix);
                    let summary = compile_failure_summary(&compiled, fix, rejection.as_deref());
                    let result =
                        session.finish(document, summary, 0, attempt, FitStatus::CompileFailed, None);
                    return Ok(self.complete(result));
                }
            }

            let pdf = compiled.pdf.unwrap_or_default();

            // ── MeasuringPages ───────────────────────────────────────────
            self.checkpoint("measuring")?;
            let page_count = self.metrics.page_count(&pdf).await?;
            if page_count == 0 {
                return Err(FitError::MeasurementFailed {
                    tool: "page count".into(),
                    detail: "compiled PDF reports zero pages".into(),
                });
            }
            info!("Attempt {}: {} page(s)", attempt, page_count);
            self.progress.on_measured(page_count);

            if page_count == 1 {
                // ── RemediatingUnderflow ─────────────────────────────────
                let expanded = if attempt == 1 {
                    self.try_expand(&mut session, request, &document, &pdf).await?
                } else {
                    None
                };
                let (document, pdf) = expanded.unwrap_or((document, pdf));
                let attempts_used = if attempt > 1 { attempt - 1 } else { 1 };
                let result = session.finish(
                    document,
                    summary,
                    1,
                    attempts_used,
                    FitStatus::Fitted,
                    Some(pdf),
                );
                return Ok(self.complete(result));
            }

            // ── RemediatingOverflow ──────────────────────────────────────
            let overflow = self.metrics.analyze_overflow(&pdf, page_count).await?;
            info!(
                "Overflow: {} of {} words ({}%) beyond page 1",
                overflow.overflow_words, overflow.total_words, overflow.overflow_percentage
            );

            if attempt == 1
                && overflow.overflow_percentage <= SMALL_OVERFLOW_THRESHOLD_PCT
                && !request.force_condense
            {
                info!("Small overflow; awaiting caller's choice");
                let choice = OverflowChoice {
                    document,
                    summary,
                    page_count,
                    overflow_percentage: overflow.overflow_percentage,
                    pdf: Some(pdf),
                };
                self.progress.on_awaiting_choice(&choice);
                return Ok(FitOutcome::AwaitingChoice(choice));
            }

            if attempt >= MAX_RETRY_ATTEMPTS {
                warn!(
                    "Still {} pages after {} attempts; returning best effort",
                    page_count, attempt
                );
                let summary = format!(
                    "{summary}\n\nWarning: the résumé still spans {page_count} pages after \
                     {attempt} attempts ({}% of the words overflow). Trim it manually before sending.",
                    overflow.overflow_percentage
                );
                let result = session.finish(
                    document,
                    summary,
                    page_count,
                    attempt,
                    FitStatus::Overflowing,
                    Some(pdf),
                );
                return Ok(self.complete(result));
            }

            self.checkpoint("condensing")?;
            self.progress.on_status("Condensing to one page");
            let images = self.metrics.rasterize(&pdf).await?;
            let messages = prompts::condense_messages(
                &document,
                &request.target,
                page_count,
                &overflow,
                images,
            );
            let condensed = session.ask("condensing", &messages).await?;
            document = condensed.document;
            attempt += 1;
        }
    }

    /// One opportunistic expansion pass. `None` keeps the current document.
    async fn try_expand(
        &self,
        session: &mut Session<'_>,
        request: &FitRequest,
        document: &str,
        pdf: &[u8],
    ) -> Result<Option<(String, Vec<u8>)>, FitError> {
        self.checkpoint("expanding")?;
        let fill = self.metrics.analyze_page_fill(pdf).await?;
        if fill.blank_percentage <= UNDERFLOW_THRESHOLD_PCT {
            debug!("Page is {}% blank; no expansion", fill.blank_percentage);
            return Ok(None);
        }
        info!("Page is {}% blank; requesting expansion", fill.blank_percentage);
        self.progress.on_status("Filling unused space");

        let images = self.metrics.rasterize(pdf).await?;
        let messages = prompts::expand_messages(document, &request.target, &fill, images);
        let candidate = session.ask("expanding", &messages).await?;

        self.checkpoint("compiling")?;
        let compiled = session.compile(&candidate.document).await;
        if !is_usable(&compiled) {
            info!("Expanded candidate failed to compile; keeping previous version");
            return Ok(None);
        }
        let expanded_pdf = compiled.pdf.unwrap_or_default();
        let pages = self.metrics.page_count(&expanded_pdf).await?;
        if pages != 1 {
            info!("Expanded candidate spans {} pages; keeping previous version", pages);
            return Ok(None);
        }
        Ok(Some((candidate.document, expanded_pdf)))
    }

    fn checkpoint(&self, stage: &'static str) -> Result<(), FitError> {
        if self
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            info!("Run cancelled before {}", stage);
            return Err(FitError::Cancelled { stage });
        }
        Ok(())
    }

    fn complete(&self, result: FitResult) -> FitOutcome {
        info!(
            "Page fit finished: {:?}, {} page(s), {} oracle call(s), {} compile(s), {}ms",
            result.status,
            result.page_count,
            result.stats.oracle_calls,
            result.stats.compile_runs,
            result.stats.total_duration_ms
        );
        self.progress.on_complete(&result);
        FitOutcome::Done(result)
    }

    /// Compile the untouched input on a detached task.
    fn spawn_preview(&self, document: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available; skipping preview compile");
            return;
        };
        let compiler = Arc::clone(&self.preview_compiler);
        let progress = Arc::clone(&self.progress);
        let document = document.to_string();
        handle.spawn(async move {
            let result = compiler.compile(&document).await;
            if !result.success {
                debug!("Preview compile failed: {}", first_line(&result.error_excerpt()));
            }
            progress.on_preview(&result);
        });
    }
}

/// Per-run counters and the oracle/compiler calls that update them.
struct Session<'a> {
    engine: &'a FitEngine,
    stats: FitStats,
    started: Instant,
}

impl<'a> Session<'a> {
    fn new(engine: &'a FitEngine) -> Self {
        Self {
            engine,
            stats: FitStats::default(),
            started: Instant::now(),
        }
    }

    async fn ask(
        &mut self,
        stage: &'static str,
        messages: &[OracleMessage],
    ) -> Result<DecodedResponse, FitError> {
        self.stats.oracle_calls += 1;
        let reply = self.engine.oracle.send(stage, messages).await?;
        self.stats.input_tokens += reply.input_tokens;
        self.stats.output_tokens += reply.output_tokens;
        Ok(decode(&reply.text))
    }

    async fn compile(&mut self, document: &str) -> CompileResult {
        self.stats.compile_runs += 1;
        self.engine.compiler.compile(document).await
    }

    fn finish(
        mut self,
        document: String,
        summary: String,
        page_count: usize,
        attempts_used: u32,
        status: FitStatus,
        pdf: Option<Vec<u8>>,
    ) -> FitResult {
        self.stats.total_duration_ms = self.started.elapsed().as_millis() as u64;
        FitResult {
            document,
            summary,
            page_count,
            attempts_used,
            status,
            pdf,
            artifact_path: None,
            stats: self.stats,
        }
    }
}

fn is_usable(result: &CompileResult) -> bool {
    result.success && result.pdf.as_ref().is_some_and(|p| !p.is_empty())
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

fn compile_failure_summary(last: &CompileResult, fixes: u32, rejection: Option<&str>) -> String {
    let mut summary = String::from("The résumé could not be compiled");
    match rejection {
        Some(reason) => summary.push_str(&format!(
            ". A proposed fix was discarded because {reason}; the last version that keeps \
             all of your content is returned."
        )),
        None => summary.push_str(&format!(" after {fixes} automatic fix attempt(s).")),
    }
    summary.push_str(&format!(
        "\n\nLast compiler error:\n{}\n\nPlease review and fix the document manually.",
        last.error_excerpt()
    ));
    summary
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Tailor a résumé and fit it to one page.
///
/// This is the primary entry point for the library.
///
/// # Example
/// ```rust,no_run
/// use resume_pagefit::{fit, FitConfig, FitOutcome, FitRequest};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let tex = std::fs::read_to_string("resume.tex")?;
/// let request = FitRequest::new(tex, "Senior backend engineer, payments");
/// match fit(&request, &FitConfig::default()).await? {
///     FitOutcome::Done(result) => println!("{} page(s)", result.page_count),
///     FitOutcome::AwaitingChoice(c) => println!("{}% overflow", c.overflow_percentage),
/// }
/// # Ok(())
/// # }
/// ```
pub async fn fit(request: &FitRequest, config: &FitConfig) -> Result<FitOutcome, FitError> {
    FitEngine::from_config(config).await?.run(request).await
}

/// Synchronous wrapper around [`fit`].
///
/// Creates a temporary tokio runtime internally.
pub fn fit_sync(request: &FitRequest, config: &FitConfig) -> Result<FitOutcome, FitError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FitError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(fit(request, config))
}

/// Run [`fit`] and write the result next to `output_path`.
///
/// On [`FitOutcome::Done`] the document goes to `output_path` (a `.tex`
/// path) and the compiled PDF, when there is one, to the same path with a
/// `.pdf` extension. Both writes are atomic (temp file + rename).
/// `artifact_path` points at the PDF, or at the source when nothing compiled.
/// On [`FitOutcome::AwaitingChoice`] nothing is written.
pub async fn fit_to_file(
    request: &FitRequest,
    output_path: impl AsRef<Path>,
    config: &FitConfig,
) -> Result<FitOutcome, FitError> {
    let outcome = fit(request, config).await?;
    write_outcome(outcome, output_path.as_ref()).await
}

pub(crate) async fn write_outcome(
    outcome: FitOutcome,
    output_path: &Path,
) -> Result<FitOutcome, FitError> {
    let FitOutcome::Done(mut result) = outcome else {
        return Ok(outcome);
    };

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FitError::OutputWriteFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }

    write_atomic(output_path, result.document.as_bytes()).await?;
    let mut artifact = output_path.to_path_buf();
    if let Some(ref pdf) = result.pdf {
        let pdf_path = output_path.with_extension("pdf");
        write_atomic(&pdf_path, pdf).await?;
        artifact = pdf_path;
    }
    info!("Wrote {}", artifact.display());
    result.artifact_path = Some(artifact);
    Ok(FitOutcome::Done(result))
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), FitError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| FitError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| FitError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Compile a document once with the preview timeout, outside any loop.
///
/// Does not require an LLM provider or API key.
pub async fn preview(document: &str, config: &FitConfig) -> CompileResult {
    LatexCompiler::new(&config.latex_program, config.preview_timeout_secs)
        .with_assets(config.assets.clone())
        .compile(document)
        .await
}

/// Measure an existing PDF without rewriting anything.
///
/// Does not require an LLM provider or API key.
pub async fn measure(pdf_path: impl AsRef<Path>, config: &FitConfig) -> Result<PdfReport, FitError> {
    let pdf = input::read_file(pdf_path.as_ref()).await?;
    let metrics = PopplerMetrics::new(
        config.tools.clone(),
        config.dpi,
        config.max_rendered_pixels,
        config.tool_timeout_secs,
    );
    let page_count = metrics.page_count(&pdf).await?;
    let overflow = metrics.analyze_overflow(&pdf, page_count).await?;
    let fill = metrics.analyze_page_fill(&pdf).await?;
    Ok(PdfReport {
        page_count,
        overflow,
        fill,
    })
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, FitError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        FitError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) plus `config.model`.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, both set.
/// 4. **OpenAI** when `OPENAI_API_KEY` is present.
/// 5. **Full auto-detection** via [`ProviderFactory::from_env`].
///
/// Also returns the provider name, used to pick the [`RequestShape`].
async fn resolve_provider(
    config: &FitConfig,
) -> Result<(Arc<dyn LLMProvider>, String), FitError> {
    if let Some(ref provider) = config.provider {
        let name = config.provider_name.clone().unwrap_or_else(|| "custom".into());
        return Ok((Arc::clone(provider), name));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return Ok((create_provider(name, model)?, name.clone()));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return Ok((create_provider(&prov, &model)?, prov));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return Ok((create_provider("openai", model)?, "openai".into()));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| FitError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok((llm_provider, "auto".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usable_requires_non_empty_pdf() {
        assert!(is_usable(&CompileResult::succeeded(vec![1], "")));
        assert!(!is_usable(&CompileResult::succeeded(Vec::new(), "")));
        assert!(!is_usable(&CompileResult::failed("! Emergency stop.")));
    }

    #[test]
    fn failure_summary_mentions_rejection() {
        let last = CompileResult::failed("! Undefined control sequence.\nl.12 \\foo");
        let s = compile_failure_summary(&last, 1, Some("candidate keeps 1 of 4 sections"));
        assert!(s.contains("discarded because candidate keeps 1 of 4 sections"));
        assert!(s.contains("! Undefined control sequence."));
        assert!(s.contains("manually"));

        let s = compile_failure_summary(&last, 2, None);
        assert!(s.contains("after 2 automatic fix attempt(s)"));
    }

    #[tokio::test]
    async fn awaiting_choice_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("resume.tex");
        let outcome = FitOutcome::AwaitingChoice(OverflowChoice {
            document: "doc".into(),
            summary: "s".into(),
            page_count: 2,
            overflow_percentage: 5,
            pdf: None,
        });
        let outcome = write_outcome(outcome, &out).await.unwrap();
        assert!(matches!(outcome, FitOutcome::AwaitingChoice(_)));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn done_writes_source_and_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("resume.tex");
        let outcome = FitOutcome::Done(FitResult {
            document: "\\documentclass{article}".into(),
            summary: "ok".into(),
            page_count: 1,
            attempts_used: 1,
            status: FitStatus::Fitted,
            pdf: Some(b"%PDF-1.5".to_vec()),
            artifact_path: None,
            stats: FitStats::default(),
        });
        let FitOutcome::Done(result) = write_outcome(outcome, &out).await.unwrap() else {
            panic!("expected Done");
        };
        let pdf_path = dir.path().join("nested").join("resume.pdf");
        assert_eq!(result.artifact_path.as_deref(), Some(pdf_path.as_path()));
        assert_eq!(std::fs::read(&pdf_path).unwrap(), b"%PDF-1.5");
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "\\documentclass{article}"
        );
        assert!(!dir.path().join("nested").join("resume.tex.tmp").exists());
    }
}
