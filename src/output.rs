//! Request and result types for a page-fit run.

use crate::pipeline::metrics::{OverflowAnalysis, PageFillAnalysis};
use crate::pipeline::oracle::Role;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One prior conversation turn forwarded to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub text: String,
}

impl HistoryTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Everything the caller supplies for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FitRequest {
    /// Full LaTeX source, preamble included. Never mutated by the loop.
    pub document: String,
    /// Description of the role the résumé is being tailored to.
    pub target: String,
    /// Optional free-form instructions for the initial rewrite.
    #[serde(default)]
    pub instructions: Option<String>,
    /// Prior turns; only the most recent few are sent.
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
    /// A non-empty follow-up switches the draft to follow-up framing.
    #[serde(default)]
    pub follow_up: Option<String>,
    /// Skip the small-overflow choice and condense straight away.
    #[serde(default)]
    pub force_condense: bool,
}

impl FitRequest {
    pub fn new(document: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_history(mut self, history: Vec<HistoryTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_follow_up(mut self, follow_up: impl Into<String>) -> Self {
        self.follow_up = Some(follow_up.into());
        self
    }

    pub fn force_condense(mut self, force: bool) -> Self {
        self.force_condense = force;
        self
    }

    /// The follow-up text, if one was given and is not blank.
    pub fn follow_up_text(&self) -> Option<&str> {
        self.follow_up.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// How a finished run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    /// Compiled to exactly one page.
    Fitted,
    /// Attempts ran out with more than one page.
    Overflowing,
    /// Could not be made to compile; `page_count` is 0.
    CompileFailed,
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitStats {
    pub oracle_calls: usize,
    pub compile_runs: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_duration_ms: u64,
}

/// Terminal payload of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    pub document: String,
    pub summary: String,
    pub page_count: usize,
    pub attempts_used: u32,
    pub status: FitStatus,
    /// Last compiled PDF for `document`; absent when nothing compiled.
    #[serde(skip)]
    pub pdf: Option<Vec<u8>>,
    /// Set by [`crate::fit::fit_to_file`] once the artifacts are on disk.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub artifact_path: Option<PathBuf>,
    pub stats: FitStats,
}

/// A small overflow surfaced to the caller instead of condensing automatically.
///
/// Re-run with [`FitRequest::force_condense`] set to condense anyway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverflowChoice {
    pub document: String,
    pub summary: String,
    pub page_count: usize,
    pub overflow_percentage: u32,
    #[serde(skip)]
    pub pdf: Option<Vec<u8>>,
}

/// What [`crate::fit::FitEngine::run`] returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FitOutcome {
    Done(FitResult),
    AwaitingChoice(OverflowChoice),
}

/// Measurement of an existing PDF, without any rewriting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfReport {
    pub page_count: usize,
    pub overflow: OverflowAnalysis,
    pub fill: PageFillAnalysis,
}
