//! CLI binary for resume-pagefit.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `FitConfig` / `FitRequest` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use resume_pagefit::pipeline::input::{load_asset, load_document};
use resume_pagefit::{
    fit, fit_stream, fit_to_file, measure, preview, CompileResult, FitConfig, FitEvent,
    FitOutcome, FitProgressCallback, FitRequest, FitResult, FitStatus, HistoryTurn,
    OverflowChoice, ProgressCallback,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit status when the run stops for a small-overflow decision.
const EXIT_AWAITING_CHOICE: i32 = 2;

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner showing the current state plus one
/// log line per attempt, fix and measurement.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading résumé…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl FitProgressCallback for CliProgressCallback {
    fn on_status(&self, message: &str) {
        self.bar.set_message(format!("{message}…"));
    }

    fn on_attempt(&self, attempt: u32, max: u32) {
        self.bar.set_prefix(format!("Attempt {attempt}/{max}"));
    }

    fn on_compiling(&self, _attempt: u32) {
        self.bar.set_message("Compiling…");
    }

    fn on_compile_fix(&self, fix: u32, max: u32) {
        self.bar.println(format!(
            "  {} Compile failed, asking for fix {fix}/{max}",
            yellow("!")
        ));
        self.bar.set_message("Fixing compile error…");
    }

    fn on_candidate_rejected(&self, reason: &str) {
        self.bar
            .println(format!("  {} Fix rejected: {}", red("✗"), reason));
    }

    fn on_measured(&self, page_count: usize) {
        let mark = if page_count == 1 { green("✓") } else { yellow("↺") };
        self.bar.println(format!(
            "  {} {} {}",
            mark,
            bold(&page_count.to_string()),
            if page_count == 1 { "page" } else { "pages" }
        ));
    }

    fn on_preview(&self, result: &CompileResult) {
        let line = if result.success {
            format!("  {} Original compiles", dim("·"))
        } else {
            format!("  {} Original does not compile", dim("·"))
        };
        self.bar.println(line);
    }

    fn on_awaiting_choice(&self, _choice: &OverflowChoice) {
        self.bar.finish_and_clear();
    }

    fn on_complete(&self, _result: &FitResult) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Tailor and fit, print the document to stdout
  pagefit resume.tex --target "Senior backend engineer, payments"

  # Read the job ad from a file, write resume.onepage.tex/.pdf into out/
  pagefit resume.tex --target-file job.txt -o out/

  # The overflow was small and the run stopped; condense anyway
  pagefit resume.tex --target-file job.txt --force-condense -o out/

  # Follow-up on an earlier run, with the conversation so far
  pagefit out/resume.onepage.tex --target-file job.txt \
          --history chat.json --follow-up "Drop the hobbies section"

  # Resume uses a logo and a custom class
  pagefit resume.tex --target-file job.txt --asset logo.png --asset resume.cls

  # Measure an existing PDF (no API key needed)
  pagefit --measure resume.pdf

  # Stream progress events as JSON lines
  pagefit resume.tex --target-file job.txt --events

EXTERNAL TOOLS:
  pdflatex (or --latex)   compiling
  pdfinfo                 page count
  pdftoppm                page images for the model
  pdftotext               overflow and page-fill measurement

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PAGEFIT_*               Fallback for most flags, e.g. PAGEFIT_LATEX=xelatex

EXIT STATUS:
  0  finished (check the summary: the result may still overflow or not compile)
  1  error
  2  small overflow; re-run with --force-condense to condense anyway
"#;

/// Tailor a LaTeX résumé to a role and fit it on exactly one page.
#[derive(Parser, Debug)]
#[command(
    name = "pagefit",
    version,
    about = "Tailor a LaTeX résumé to a role and fit it on exactly one page",
    long_about = "Rewrites a LaTeX résumé for a target role with a vision LLM, then compiles, \
measures and condenses it until it typesets to exactly one page. Supports OpenAI, Anthropic, \
Google Gemini, Azure OpenAI, and any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// LaTeX résumé source.
    #[arg(required_unless_present = "measure")]
    input: Option<PathBuf>,

    /// Target role description.
    #[arg(long, env = "PAGEFIT_TARGET", conflicts_with = "target_file")]
    target: Option<String>,

    /// Read the target role description from a file.
    #[arg(long, env = "PAGEFIT_TARGET_FILE")]
    target_file: Option<PathBuf>,

    /// Extra instructions for the initial rewrite.
    #[arg(long, env = "PAGEFIT_INSTRUCTIONS")]
    instructions: Option<String>,

    /// Follow-up change to apply instead of a fresh tailoring pass.
    #[arg(long)]
    follow_up: Option<String>,

    /// JSON file with prior turns: [{"role":"user","text":"…"}, …].
    #[arg(long)]
    history: Option<PathBuf>,

    /// Condense even when the overflow is small.
    #[arg(long)]
    force_condense: bool,

    /// Write <stem>.onepage.tex and .pdf into this directory instead of printing.
    #[arg(short, long, env = "PAGEFIT_OUTPUT")]
    output: Option<PathBuf>,

    /// File copied next to the document for every compile (repeatable).
    #[arg(long = "asset")]
    assets: Vec<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Page-image DPI sent to the model (72–400).
    #[arg(long, env = "PAGEFIT_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// LaTeX program.
    #[arg(long, env = "PAGEFIT_LATEX", default_value = "pdflatex")]
    latex: String,

    /// Compile timeout in seconds.
    #[arg(long, env = "PAGEFIT_COMPILE_TIMEOUT", default_value_t = 60)]
    compile_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PAGEFIT_API_TIMEOUT", default_value_t = 180)]
    api_timeout: u64,

    /// Print the outcome as JSON.
    #[arg(long, env = "PAGEFIT_JSON")]
    json: bool,

    /// Print every progress event as a JSON line.
    #[arg(long, conflicts_with_all = ["json", "output"])]
    events: bool,

    /// Disable progress output.
    #[arg(long, env = "PAGEFIT_NO_PROGRESS")]
    no_progress: bool,

    /// Measure this PDF and exit. No LLM is called.
    #[arg(long, value_name = "PDF")]
    measure: Option<PathBuf>,

    /// Compile the input once and report, without rewriting.
    #[arg(long)]
    preview: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAGEFIT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PAGEFIT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides the feedback that matters; library INFO logs
    // would only tear through it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.events;
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

    // ── Measure-only mode ────────────────────────────────────────────────
    if let Some(ref pdf) = cli.measure {
        let config = build_config(&cli, None).await?;
        let report = measure(pdf, &config).await.context("Failed to measure PDF")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else {
            println!("File:         {}", pdf.display());
            println!("Pages:        {}", report.page_count);
            println!(
                "Overflow:     {}% ({} of {} words, {} lines)",
                report.overflow.overflow_percentage,
                report.overflow.overflow_words,
                report.overflow.total_words,
                report.overflow.overflow_lines
            );
            println!(
                "Page 1 blank: {}% ({:.0}pt of {:.0}pt)",
                report.fill.blank_percentage, report.fill.blank_space, report.fill.page_height
            );
        }
        return Ok(());
    }

    let input = cli
        .input
        .clone()
        .context("An input .tex file is required")?;
    let document = load_document(&input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;

    // ── Preview-only mode ────────────────────────────────────────────────
    if cli.preview {
        let config = build_config(&cli, None).await?;
        let result = preview(&document, &config).await;
        if result.success {
            if let (Some(dir), Some(pdf)) = (&cli.output, &result.pdf) {
                let path = write_preview(dir, &input, pdf).await?;
                eprintln!("{} compiled  →  {}", green("✔"), bold(&path.display().to_string()));
            } else if !cli.quiet {
                eprintln!("{} compiles", green("✔"));
            }
            return Ok(());
        }
        eprintln!("{} does not compile\n{}", red("✘"), result.error_excerpt());
        std::process::exit(1);
    }

    let request = build_request(&cli, document).await?;

    // ── Event-stream mode ────────────────────────────────────────────────
    if cli.events {
        let config = build_config(&cli, None).await?;
        let mut events = fit_stream(request, &config).await.context("Failed to start")?;
        let stdout = io::stdout();
        while let Some(event) = events.next().await {
            let line = serde_json::to_string(&event).context("Failed to serialise event")?;
            let mut handle = stdout.lock();
            writeln!(handle, "{line}").context("Failed to write to stdout")?;
            if event.is_terminal() {
                match event {
                    FitEvent::AwaitingChoice { .. } => std::process::exit(EXIT_AWAITING_CHOICE),
                    FitEvent::Failed { .. } => std::process::exit(1),
                    _ => break,
                }
            }
        }
        return Ok(());
    }

    // ── Fit ──────────────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn FitProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    let outcome = match cli.output {
        Some(ref dir) => fit_to_file(&request, output_path(dir, &input), &config).await,
        None => fit(&request, &config).await,
    }
    .context("Page fit failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&outcome).context("Failed to serialise outcome")?;
        println!("{json}");
    }

    match outcome {
        FitOutcome::AwaitingChoice(choice) => {
            if !cli.quiet {
                eprintln!(
                    "{} The résumé overflows onto page {} by only {}%.",
                    yellow("?"),
                    choice.page_count,
                    bold(&choice.overflow_percentage.to_string())
                );
                eprintln!("  Re-run with --force-condense to condense it to one page.");
            }
            std::process::exit(EXIT_AWAITING_CHOICE);
        }
        FitOutcome::Done(result) => {
            if !cli.json && cli.output.is_none() {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                handle
                    .write_all(result.document.as_bytes())
                    .context("Failed to write to stdout")?;
                if !result.document.ends_with('\n') {
                    handle.write_all(b"\n").ok();
                }
            }
            if !cli.quiet && !cli.json {
                print_summary(&result);
            }
        }
    }

    Ok(())
}

fn print_summary(result: &FitResult) {
    let mark = match result.status {
        FitStatus::Fitted => green("✔"),
        FitStatus::Overflowing => yellow("⚠"),
        FitStatus::CompileFailed => red("✘"),
    };
    let target = result
        .artifact_path
        .as_ref()
        .map(|p| format!("  →  {}", bold(&p.display().to_string())))
        .unwrap_or_default();
    eprintln!(
        "{}  {} page(s)  {} attempt(s){}",
        mark, result.page_count, result.attempts_used, target
    );
    eprintln!("{}", result.summary);
    eprintln!(
        "   {} oracle calls, {} compiles, {} tokens in  /  {} tokens out  —  {}ms total",
        dim(&result.stats.oracle_calls.to_string()),
        dim(&result.stats.compile_runs.to_string()),
        dim(&result.stats.input_tokens.to_string()),
        dim(&result.stats.output_tokens.to_string()),
        result.stats.total_duration_ms,
    );
    if result.status == FitStatus::CompileFailed {
        eprintln!("{}", cyan("   The returned document needs a manual fix before it compiles."));
    }
}

/// Write a preview PDF to `<dir>/<stem>.onepage.pdf`, creating `dir`.
async fn write_preview(dir: &Path, input: &Path, pdf: &[u8]) -> Result<PathBuf> {
    let path = output_path(dir, input).with_extension("pdf");
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    tokio::fs::write(&path, pdf)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// `<dir>/<stem>.onepage.tex`.
fn output_path(dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "resume".to_string());
    dir.join(format!("{stem}.onepage.tex"))
}

/// Map CLI args to `FitRequest`.
async fn build_request(cli: &Cli, document: String) -> Result<FitRequest> {
    let target = match (&cli.target, &cli.target_file) {
        (Some(t), _) => t.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read target from {:?}", path))?,
        (None, None) => anyhow::bail!("Either --target or --target-file is required"),
    };

    let history: Vec<HistoryTurn> = match cli.history {
        Some(ref path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read history from {:?}", path))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid history JSON in {:?}", path))?
        }
        None => Vec::new(),
    };

    let mut request = FitRequest::new(document, target)
        .with_history(history)
        .force_condense(cli.force_condense);
    if let Some(ref i) = cli.instructions {
        request = request.with_instructions(i.clone());
    }
    if let Some(ref f) = cli.follow_up {
        request = request.with_follow_up(f.clone());
    }
    Ok(request)
}

/// Map CLI args to `FitConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<FitConfig> {
    let mut assets = Vec::with_capacity(cli.assets.len());
    for path in &cli.assets {
        assets.push(
            load_asset(path)
                .await
                .with_context(|| format!("Failed to read asset {}", path.display()))?,
        );
    }

    let mut builder = FitConfig::builder()
        .dpi(cli.dpi)
        .latex_program(cli.latex.clone())
        .assets(assets)
        .compile_timeout_secs(cli.compile_timeout)
        .api_timeout_secs(cli.api_timeout)
        .preview_original(!cli.quiet && !cli.json);

    if let Some(ref m) = cli.model {
        builder = builder.model(m.clone());
    }
    if let Some(ref p) = cli.provider {
        builder = builder.provider_name(p.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_uses_onepage_suffix() {
        let path = output_path(Path::new("out"), Path::new("cv/jane.tex"));
        assert_eq!(path, Path::new("out/jane.onepage.tex"));
    }

    #[tokio::test]
    async fn preview_is_written_next_to_created_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested/out");
        let path = write_preview(&dir, Path::new("jane.tex"), b"%PDF-1.5").await.unwrap();
        assert_eq!(path, dir.join("jane.onepage.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.5");
    }

    #[tokio::test]
    async fn unusable_output_dir_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("taken");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let err = write_preview(&blocker, Path::new("jane.tex"), b"%PDF")
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to create"), "{err:#}");
    }
}
