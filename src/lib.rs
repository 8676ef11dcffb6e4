//! # resume-pagefit
//!
//! Tailor a LaTeX résumé to a target role and make it fit on exactly one
//! printed page, using a vision LLM for the rewrites and a real LaTeX
//! toolchain as the judge.
//!
//! ## Why this crate?
//!
//! A language model can rewrite a résumé, but it cannot see how long the
//! result typesets. Asking it to "keep it to one page" works some of the
//! time. This crate closes the loop: every candidate is compiled, the pages
//! are counted and measured with poppler, and the model is shown the rendered
//! pages together with hard numbers (how many words spill over, how much of
//! the page is blank) until the document fits or the attempt budget runs out.
//!
//! ## Loop Overview
//!
//! ```text
//! .tex + target role
//!  │
//!  ├─ 1. Draft     oracle rewrites the résumé (JSON reply)
//!  ├─ 2. Compile   pdflatex in a throwaway directory
//!  ├─ 3. Fix       up to 2 oracle fixes per attempt, integrity-checked
//!  ├─ 4. Measure   pdfinfo page count
//!  ├─ 5a. 1 page   optional one-shot expansion into blank space → done
//!  └─ 5b. ≥2 pages small overflow → ask the caller; otherwise condense
//!                  with page images and retry (3 attempts)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resume_pagefit::{fit, FitConfig, FitOutcome, FitRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = FitConfig::default();
//!     let tex = std::fs::read_to_string("resume.tex")?;
//!     let request = FitRequest::new(tex, "Senior data engineer, streaming platforms");
//!     match fit(&request, &config).await? {
//!         FitOutcome::Done(result) => {
//!             println!("{}", result.document);
//!             eprintln!("{} page(s): {}", result.page_count, result.summary);
//!         }
//!         FitOutcome::AwaitingChoice(choice) => {
//!             eprintln!("{}% overflow; re-run with force_condense", choice.overflow_percentage);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## External Tools
//!
//! | Tool | Used for |
//! |------|----------|
//! | `pdflatex` (configurable) | compiling candidates |
//! | `pdfinfo` | page count |
//! | `pdftoppm` | page images for the oracle |
//! | `pdftotext` | overflow (`-layout`) and page fill (`-bbox`) |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pagefit` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! resume-pagefit = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod fit;
pub mod output;
pub mod pipeline;
pub mod policy;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{FitConfig, FitConfigBuilder};
pub use error::FitError;
pub use fit::{fit, fit_sync, fit_to_file, measure, preview, FitEngine};
pub use output::{
    FitOutcome, FitRequest, FitResult, FitStats, FitStatus, HistoryTurn, OverflowChoice,
    PdfReport,
};
pub use pipeline::compile::{CompileResult, DocumentCompiler, LatexCompiler};
pub use pipeline::metrics::{OverflowAnalysis, PageFillAnalysis, PdfMetrics, PopplerTools};
pub use pipeline::oracle::{Oracle, OracleMessage, OracleReply, RequestShape, Role};
pub use progress::{FitProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{fit_stream, FitEvent, FitEventStream};
