//! Convergence-loop tests against scripted collaborators.
//!
//! No LaTeX, poppler or network is needed. The fake compiler "renders" a
//! document by copying its text into the PDF bytes, and the fake metrics read
//! `PAGES=`, `OVERFLOW=` and `BLANK=` markers back out of those bytes, so each
//! test controls what every candidate measures as simply by what the scripted
//! oracle returns.

use async_trait::async_trait;
use resume_pagefit::output::HistoryTurn;
use resume_pagefit::pipeline::metrics::{OverflowAnalysis, PageFillAnalysis};
use resume_pagefit::stream::stream_run;
use resume_pagefit::{
    CompileResult, DocumentCompiler, FitEngine, FitError, FitEvent, FitOutcome,
    FitProgressCallback, FitRequest, FitResult, FitStatus, Oracle, OracleMessage, OracleReply,
    OverflowChoice, PdfMetrics, Role,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

// ── Fixtures ─────────────────────────────────────────────────────────────

/// A résumé with 3 sections and 6 items; `tag` carries the measurement markers.
fn doc(tag: &str) -> String {
    format!(
        "\\documentclass{{article}}\n% {tag}\n\\begin{{document}}\n\
         \\section{{Experience}}\n\\begin{{itemize}}\n\
         \\item Led migration of billing services to Rust\n\
         \\item Cut p99 latency of the payments API by 40 percent\n\
         \\item Mentored four engineers\n\\end{{itemize}}\n\
         \\section{{Projects}}\n\\begin{{itemize}}\n\
         \\item Open-source contributor to a tracing library\n\
         \\item Built an internal feature-flag service\n\\end{{itemize}}\n\
         \\section{{Education}}\n\\begin{{itemize}}\n\
         \\item BSc Computer Science\n\\end{{itemize}}\n\
         \\end{{document}}"
    )
}

fn json_reply(document: &str, summary: &str) -> String {
    serde_json::json!({ "document": document, "summary": summary }).to_string()
}

fn marker(text: &str, key: &str) -> Option<u32> {
    let start = text.find(key)? + key.len();
    let digits: String = text[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

// ── Doubles ──────────────────────────────────────────────────────────────

/// Fails any document containing `BROKEN`; otherwise the PDF is the text.
#[derive(Default)]
struct FakeCompiler {
    runs: AtomicUsize,
}

#[async_trait]
impl DocumentCompiler for FakeCompiler {
    async fn compile(&self, document: &str) -> CompileResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if document.contains("BROKEN") {
            CompileResult::failed(
                "This is pdfTeX\n! Undefined control sequence.\nl.7 \\brokenmacro\nNo pages of output.",
            )
        } else {
            CompileResult::succeeded(document.as_bytes().to_vec(), "Output written on document.pdf")
        }
    }
}

struct FakeMetrics;

#[async_trait]
impl PdfMetrics for FakeMetrics {
    async fn page_count(&self, pdf: &[u8]) -> Result<usize, FitError> {
        let text = String::from_utf8_lossy(pdf);
        if text.contains("UNMEASURABLE") {
            return Err(FitError::MeasurementFailed {
                tool: "pdfinfo".into(),
                detail: "no 'Pages:' line".into(),
            });
        }
        Ok(marker(&text, "PAGES=").unwrap_or(1) as usize)
    }

    async fn rasterize(&self, pdf: &[u8]) -> Result<Vec<String>, FitError> {
        let pages = self.page_count(pdf).await?;
        Ok((1..=pages).map(|p| format!("page-{p}")).collect())
    }

    async fn analyze_overflow(
        &self,
        pdf: &[u8],
        page_count: usize,
    ) -> Result<OverflowAnalysis, FitError> {
        if page_count <= 1 {
            return Ok(OverflowAnalysis::default());
        }
        let pct = marker(&String::from_utf8_lossy(pdf), "OVERFLOW=").unwrap_or(0);
        Ok(OverflowAnalysis {
            overflow_lines: (pct / 2) as usize,
            overflow_words: pct as usize * 4,
            total_lines: 50,
            total_words: 400,
            overflow_percentage: pct,
        })
    }

    async fn analyze_page_fill(&self, pdf: &[u8]) -> Result<PageFillAnalysis, FitError> {
        let pct = marker(&String::from_utf8_lossy(pdf), "BLANK=").unwrap_or(0);
        let blank = 792.0 * pct as f64 / 100.0;
        Ok(PageFillAnalysis {
            page_height: 792.0,
            content_bottom_y: 792.0 - blank,
            blank_space: blank,
            blank_percentage: pct,
        })
    }
}

/// Replies from a fixed script and records every call.
struct ScriptedOracle {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(&'static str, Vec<OracleMessage>)>>,
}

impl ScriptedOracle {
    fn new(replies: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn stages(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    fn call(&self, i: usize) -> Vec<OracleMessage> {
        self.calls.lock().unwrap()[i].1.clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn send(
        &self,
        stage: &'static str,
        messages: &[OracleMessage],
    ) -> Result<OracleReply, FitError> {
        self.calls.lock().unwrap().push((stage, messages.to_vec()));
        match self.replies.lock().unwrap().pop_front() {
            Some(text) => Ok(OracleReply {
                text,
                input_tokens: 100,
                output_tokens: 50,
            }),
            None => Err(FitError::OracleFailed {
                stage,
                message: "503 Service Unavailable".into(),
            }),
        }
    }
}

/// Delays every call before delegating, to hold the loop inside a stage.
struct Slow<T> {
    inner: Arc<T>,
    delay: Duration,
}

#[async_trait]
impl<T: Oracle> Oracle for Slow<T> {
    async fn send(
        &self,
        stage: &'static str,
        messages: &[OracleMessage],
    ) -> Result<OracleReply, FitError> {
        tokio::time::sleep(self.delay).await;
        self.inner.send(stage, messages).await
    }
}

#[async_trait]
impl<T: DocumentCompiler> DocumentCompiler for Slow<T> {
    async fn compile(&self, document: &str) -> CompileResult {
        tokio::time::sleep(self.delay).await;
        self.inner.compile(document).await
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    cancel_on_measure: Option<CancellationToken>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
    fn push(&self, s: String) {
        self.events.lock().unwrap().push(s);
    }
}

impl FitProgressCallback for Recorder {
    fn on_attempt(&self, attempt: u32, max: u32) {
        self.push(format!("attempt {attempt}/{max}"));
    }
    fn on_compile_fix(&self, fix: u32, max: u32) {
        self.push(format!("fix {fix}/{max}"));
    }
    fn on_candidate_rejected(&self, reason: &str) {
        self.push(format!("rejected: {reason}"));
    }
    fn on_measured(&self, page_count: usize) {
        self.push(format!("measured {page_count}"));
        if let Some(ref t) = self.cancel_on_measure {
            t.cancel();
        }
    }
    fn on_preview(&self, result: &CompileResult) {
        self.push(format!("preview {}", result.success));
    }
    fn on_awaiting_choice(&self, choice: &OverflowChoice) {
        self.push(format!("awaiting {}", choice.overflow_percentage));
    }
    fn on_complete(&self, result: &FitResult) {
        self.push(format!("complete {}", result.page_count));
    }
}

struct Harness {
    compiler: Arc<FakeCompiler>,
    oracle: Arc<ScriptedOracle>,
    recorder: Arc<Recorder>,
    engine: FitEngine,
}

fn harness(replies: Vec<String>) -> Harness {
    harness_with(replies, Recorder::default())
}

fn harness_with(replies: Vec<String>, recorder: Recorder) -> Harness {
    let compiler = Arc::new(FakeCompiler::default());
    let oracle = ScriptedOracle::new(replies);
    let recorder = Arc::new(recorder);
    let engine = FitEngine::new(compiler.clone(), Arc::new(FakeMetrics), oracle.clone())
        .with_progress(recorder.clone());
    Harness {
        compiler,
        oracle,
        recorder,
        engine,
    }
}

fn request() -> FitRequest {
    FitRequest::new(doc("ORIGINAL PAGES=2 OVERFLOW=20"), "Staff backend engineer, payments")
}

fn done(outcome: FitOutcome) -> FitResult {
    match outcome {
        FitOutcome::Done(r) => r,
        FitOutcome::AwaitingChoice(c) => panic!("expected Done, got AwaitingChoice({}%)", c.overflow_percentage),
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_page_draft_finishes_in_one_attempt() {
    let drafted = doc("PAGES=1 BLANK=5");
    let h = harness(vec![json_reply(&drafted, "Emphasised payments work.")]);

    let result = done(h.engine.run(&request()).await.unwrap());

    assert_eq!(result.page_count, 1);
    assert_eq!(result.attempts_used, 1);
    assert_eq!(result.status, FitStatus::Fitted);
    assert_eq!(result.document, drafted);
    assert_eq!(result.summary, "Emphasised payments work.");
    assert_eq!(result.pdf.as_deref(), Some(drafted.as_bytes()));
    assert_eq!(h.oracle.stages(), vec!["drafting"]);
    assert_eq!(h.compiler.runs.load(Ordering::SeqCst), 1);
    assert_eq!(result.stats.oracle_calls, 1);
    assert_eq!(result.stats.compile_runs, 1);
    assert_eq!(result.stats.input_tokens, 100);
    assert_eq!(result.stats.output_tokens, 50);
    assert_eq!(
        h.recorder.events(),
        vec!["attempt 1/3", "measured 1", "complete 1"]
    );
}

#[tokio::test]
async fn small_overflow_awaits_choice_without_condensing() {
    let drafted = doc("PAGES=2 OVERFLOW=8");
    let h = harness(vec![json_reply(&drafted, "Tailored.")]);

    let outcome = h.engine.run(&request()).await.unwrap();

    let FitOutcome::AwaitingChoice(choice) = outcome else {
        panic!("expected AwaitingChoice");
    };
    assert_eq!(choice.overflow_percentage, 8);
    assert_eq!(choice.page_count, 2);
    assert_eq!(choice.document, drafted);
    assert_eq!(choice.summary, "Tailored.");
    assert_eq!(h.oracle.stages(), vec!["drafting"]);
    assert!(h.recorder.events().contains(&"awaiting 8".to_string()));
}

#[tokio::test]
async fn forced_condense_fits_and_credits_first_attempt() {
    let drafted = doc("PAGES=2 OVERFLOW=8");
    let condensed = doc("PAGES=1 BLANK=3 condensed");
    let h = harness(vec![json_reply(&drafted, "Tailored."), condensed.clone()]);

    let result = done(h.engine.run(&request().force_condense(true)).await.unwrap());

    assert_eq!(result.page_count, 1);
    assert_eq!(result.attempts_used, 1);
    assert_eq!(result.document, condensed);
    assert_eq!(result.summary, "Tailored.");
    assert_eq!(h.oracle.stages(), vec!["drafting", "condensing"]);

    let condense = h.oracle.call(1);
    assert_eq!(condense[0].role, Role::System);
    assert_eq!(condense[1].images, vec!["page-1".to_string(), "page-2".to_string()]);
    assert!(condense[1].text.contains("roughly 13%"), "{}", condense[1].text);
}

#[tokio::test]
async fn valid_fix_recovers_without_extra_attempts() {
    let broken = doc("BROKEN PAGES=1");
    let fixed = doc("PAGES=1 fixed");
    let h = harness(vec![json_reply(&broken, "Tailored."), fixed.clone()]);

    let result = done(h.engine.run(&request()).await.unwrap());

    assert_eq!(result.page_count, 1);
    assert_eq!(result.attempts_used, 1);
    assert_eq!(result.document, fixed);
    assert_eq!(h.oracle.stages(), vec!["drafting", "fixing"]);
    assert_eq!(h.compiler.runs.load(Ordering::SeqCst), 2);

    let fix = h.oracle.call(1);
    assert!(fix[1].text.contains("! Undefined control sequence."));
    assert!(fix[1].text.contains("ORIGINAL"), "original is sent as reference");
    assert_eq!(
        h.recorder.events(),
        vec!["attempt 1/3", "fix 1/2", "measured 1", "complete 1"]
    );
}

#[tokio::test]
async fn gutted_fix_is_rejected_and_snapshot_returned() {
    let broken = doc("BROKEN PAGES=1");
    let gutted = "\\documentclass{article}\\begin{document}Hi\\end{document}".to_string();
    let h = harness(vec![json_reply(&broken, "Tailored."), gutted]);

    let result = done(h.engine.run(&request()).await.unwrap());

    assert_eq!(result.page_count, 0);
    assert_eq!(result.status, FitStatus::CompileFailed);
    assert_eq!(result.document, broken);
    assert!(result.pdf.is_none());
    assert!(result.summary.contains("manually"), "{}", result.summary);
    assert!(result.summary.contains("discarded"), "{}", result.summary);
    assert_eq!(h.oracle.stages(), vec!["drafting", "fixing"]);
    assert_eq!(h.compiler.runs.load(Ordering::SeqCst), 1, "rejected candidate is never compiled");
    assert!(h
        .recorder
        .events()
        .iter()
        .any(|e| e.starts_with("rejected: candidate is")));
}

#[tokio::test]
async fn fix_budget_exhaustion_returns_latest_valid_document() {
    let broken = doc("BROKEN PAGES=1 v0");
    let fix1 = doc("BROKEN PAGES=1 v1");
    let fix2 = doc("BROKEN PAGES=1 v2");
    let h = harness(vec![json_reply(&broken, "Tailored."), fix1, fix2.clone()]);

    let result = done(h.engine.run(&request()).await.unwrap());

    assert_eq!(result.status, FitStatus::CompileFailed);
    assert_eq!(result.page_count, 0);
    assert_eq!(result.document, fix2);
    assert!(result.summary.contains("after 2 automatic fix attempt(s)"));
    assert_eq!(h.oracle.stages(), vec!["drafting", "fixing", "fixing"]);
    assert_eq!(h.compiler.runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn rejected_second_fix_restores_pre_fix_document() {
    let broken = doc("BROKEN PAGES=1 v0");
    let fix1 = doc("BROKEN PAGES=1 v1");
    let gutted = "\\documentclass{article}\\begin{document}Hi\\end{document}".to_string();
    let h = harness(vec![json_reply(&broken, "Tailored."), fix1, gutted]);

    let result = done(h.engine.run(&request()).await.unwrap());

    assert_eq!(result.status, FitStatus::CompileFailed);
    assert_eq!(result.page_count, 0);
    assert_eq!(result.document, broken, "falls back past the accepted fix");
    assert!(result.summary.contains("discarded"), "{}", result.summary);
    assert_eq!(h.oracle.stages(), vec!["drafting", "fixing", "fixing"]);
    assert_eq!(h.compiler.runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn broken_condensed_candidate_is_fixed_on_later_attempt() {
    let drafted = doc("PAGES=2 OVERFLOW=30");
    let condensed = doc("BROKEN PAGES=1 condensed");
    let fixed = doc("PAGES=1 BLANK=40 fixed");
    let h = harness(vec![json_reply(&drafted, "Tailored."), condensed, fixed.clone()]);

    let result = done(h.engine.run(&request()).await.unwrap());

    assert_eq!(result.status, FitStatus::Fitted);
    assert_eq!(result.page_count, 1);
    assert_eq!(result.attempts_used, 1);
    assert_eq!(result.document, fixed);
    assert_eq!(h.oracle.stages(), vec!["drafting", "condensing", "fixing"]);
    let fix = h.oracle.call(2);
    assert!(fix[1].text.contains("BROKEN PAGES=1 condensed"), "fix starts from the condensed text");
    assert_eq!(h.compiler.runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn persistent_overflow_stops_after_max_attempts() {
    let h = harness(vec![
        json_reply(&doc("PAGES=3 OVERFLOW=40"), "Tailored."),
        doc("PAGES=2 OVERFLOW=25 a"),
        doc("PAGES=2 OVERFLOW=20 b"),
    ]);

    let result = done(h.engine.run(&request()).await.unwrap());

    assert_eq!(result.status, FitStatus::Overflowing);
    assert_eq!(result.page_count, 2);
    assert_eq!(result.attempts_used, 3);
    assert!(result.document.contains("OVERFLOW=20 b"));
    assert!(result.summary.starts_with("Tailored."));
    assert!(result.summary.contains("Warning"));
    assert_eq!(h.oracle.stages(), vec!["drafting", "condensing", "condensing"]);
    assert_eq!(
        h.recorder.events(),
        vec![
            "attempt 1/3",
            "measured 3",
            "attempt 2/3",
            "measured 2",
            "attempt 3/3",
            "measured 2",
            "complete 2",
        ]
    );
}

#[tokio::test]
async fn small_overflow_after_first_attempt_is_condensed() {
    let h = harness(vec![
        json_reply(&doc("PAGES=2 OVERFLOW=30"), "Tailored."),
        doc("PAGES=2 OVERFLOW=5 a"),
        doc("PAGES=1 BLANK=2 b"),
    ]);

    let result = done(h.engine.run(&request()).await.unwrap());

    assert_eq!(result.page_count, 1);
    assert_eq!(result.attempts_used, 2);
    assert_eq!(h.oracle.stages(), vec!["drafting", "condensing", "condensing"]);
}

#[tokio::test]
async fn underflow_expansion_is_adopted_when_it_still_fits() {
    let expanded = doc("PAGES=1 BLANK=4 EXPANDED");
    let h = harness(vec![
        json_reply(&doc("PAGES=1 BLANK=30"), "Tailored."),
        expanded.clone(),
    ]);

    let result = done(h.engine.run(&request()).await.unwrap());

    assert_eq!(result.page_count, 1);
    assert_eq!(result.document, expanded);
    assert_eq!(result.pdf.as_deref(), Some(expanded.as_bytes()));
    assert_eq!(h.oracle.stages(), vec!["drafting", "expanding"]);
    let expand = h.oracle.call(1);
    assert_eq!(expand[1].images.len(), 1);
    assert!(expand[1].text.contains("30% of the page is blank"));
}

#[tokio::test]
async fn underflow_expansion_that_overflows_is_discarded() {
    let drafted = doc("PAGES=1 BLANK=30");
    let h = harness(vec![
        json_reply(&drafted, "Tailored."),
        doc("PAGES=2 OVERFLOW=3 too much"),
    ]);

    let result = done(h.engine.run(&request()).await.unwrap());

    assert_eq!(result.page_count, 1);
    assert_eq!(result.document, drafted);
    assert_eq!(result.status, FitStatus::Fitted);
    assert_eq!(h.oracle.stages(), vec!["drafting", "expanding"]);
}

#[tokio::test]
async fn underflow_expansion_that_breaks_compile_is_discarded() {
    let drafted = doc("PAGES=1 BLANK=30");
    let h = harness(vec![json_reply(&drafted, "Tailored."), doc("BROKEN PAGES=1")]);

    let result = done(h.engine.run(&request()).await.unwrap());

    assert_eq!(result.document, drafted);
    assert_eq!(result.pdf.as_deref(), Some(drafted.as_bytes()));
    assert_eq!(h.compiler.runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn underflow_is_not_remediated_after_condensing() {
    let condensed = doc("PAGES=1 BLANK=50");
    let h = harness(vec![
        json_reply(&doc("PAGES=2 OVERFLOW=30"), "Tailored."),
        condensed.clone(),
    ]);

    let result = done(h.engine.run(&request()).await.unwrap());

    assert_eq!(result.document, condensed);
    assert_eq!(h.oracle.stages(), vec!["drafting", "condensing"]);
}

// ── Errors ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn oracle_failure_while_drafting_is_fatal() {
    let h = harness(vec![]);
    let err = h.engine.run(&request()).await.unwrap_err();
    assert!(matches!(err, FitError::OracleFailed { stage: "drafting", .. }), "{err}");
    assert_eq!(h.compiler.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn oracle_failure_while_fixing_is_fatal() {
    let h = harness(vec![json_reply(&doc("BROKEN"), "Tailored.")]);
    let err = h.engine.run(&request()).await.unwrap_err();
    assert!(matches!(err, FitError::OracleFailed { stage: "fixing", .. }), "{err}");
}

#[tokio::test]
async fn blank_target_is_rejected_before_any_call() {
    let h = harness(vec![json_reply(&doc("PAGES=1"), "x")]);
    let req = FitRequest::new(doc("ORIGINAL"), "   ");
    let err = h.engine.run(&req).await.unwrap_err();
    assert!(matches!(err, FitError::InvalidInput { field: "target", .. }));
    assert!(h.oracle.stages().is_empty());
}

#[tokio::test]
async fn unmeasurable_pdf_is_fatal() {
    let h = harness(vec![json_reply(&doc("UNMEASURABLE"), "x")]);
    let err = h.engine.run(&request()).await.unwrap_err();
    assert!(matches!(err, FitError::MeasurementFailed { .. }));
}

// ── Cancellation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_token_stops_before_drafting() {
    let token = CancellationToken::new();
    token.cancel();
    let h = harness(vec![json_reply(&doc("PAGES=1"), "x")]);
    let engine = h.engine.with_cancellation(token);

    let err = engine.run(&request()).await.unwrap_err();

    assert!(matches!(err, FitError::Cancelled { stage: "drafting" }));
    assert!(h.oracle.stages().is_empty());
}

#[tokio::test]
async fn cancellation_mid_run_stops_at_next_checkpoint() {
    let token = CancellationToken::new();
    let recorder = Recorder {
        cancel_on_measure: Some(token.clone()),
        ..Default::default()
    };
    let h = harness_with(
        vec![json_reply(&doc("PAGES=2 OVERFLOW=30"), "x"), doc("PAGES=1")],
        recorder,
    );
    let engine = h.engine.with_cancellation(token);

    let err = engine.run(&request()).await.unwrap_err();

    assert!(matches!(err, FitError::Cancelled { stage: "condensing" }), "{err}");
    assert_eq!(h.oracle.stages(), vec!["drafting"]);
}

// ── Framing, streaming, preview ──────────────────────────────────────────

#[test]
fn follow_up_uses_history_window() {
    let h = harness(vec![json_reply(&doc("PAGES=1"), "Removed hobbies.")]);
    let history = (0..6)
        .map(|i| {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            HistoryTurn::new(role, format!("turn {i}"))
        })
        .collect();
    let req = request()
        .with_history(history)
        .with_follow_up("Drop the hobbies section");

    let result = done(tokio_test::block_on(h.engine.run(&req)).unwrap());

    assert_eq!(result.summary, "Removed hobbies.");
    let draft = h.oracle.call(0);
    assert_eq!(draft.len(), 6);
    assert_eq!(draft[1].text, "turn 2");
    assert!(draft[5].text.starts_with("Apply this follow-up"));
    assert!(draft[5].text.contains("Drop the hobbies section"));
}

#[tokio::test]
async fn stream_yields_events_until_done() {
    let compiler = Arc::new(FakeCompiler::default());
    let oracle = ScriptedOracle::new(vec![json_reply(&doc("PAGES=1"), "Tailored.")]);
    let engine = FitEngine::new(compiler, Arc::new(FakeMetrics), oracle);

    let events: Vec<FitEvent> = stream_run(engine, request(), None).collect().await;

    assert!(matches!(events.first(), Some(FitEvent::Status { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, FitEvent::Attempt { attempt: 1, max: 3 })));
    assert!(events
        .iter()
        .any(|e| matches!(e, FitEvent::Measured { page_count: 1 })));
    match events.last() {
        Some(FitEvent::Done { result }) => assert_eq!(result.page_count, 1),
        other => panic!("expected Done, got {other:?}"),
    }
}

#[tokio::test]
async fn stream_reports_fatal_errors() {
    let engine = FitEngine::new(
        Arc::new(FakeCompiler::default()),
        Arc::new(FakeMetrics),
        ScriptedOracle::new(vec![]),
    );

    let events: Vec<FitEvent> = stream_run(engine, request(), None).collect().await;

    match events.last() {
        Some(FitEvent::Failed { message }) => assert!(message.contains("503")),
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn preview_of_original_is_reported_and_does_not_affect_outcome() {
    let h = harness(vec![json_reply(&doc("PAGES=1"), "Tailored.")]);
    let engine = h.engine.preview_original(true);
    let req = FitRequest::new(doc("BROKEN original"), "SRE");

    let result = done(engine.run(&req).await.unwrap());
    assert_eq!(result.page_count, 1);

    for _ in 0..100 {
        if h.recorder.events().iter().any(|e| e.starts_with("preview")) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.recorder.events().contains(&"preview false".to_string()));
}

#[tokio::test]
async fn dropping_stream_mid_draft_prevents_compile() {
    let compiler = Arc::new(FakeCompiler::default());
    let oracle = ScriptedOracle::new(vec![json_reply(&doc("PAGES=1"), "Tailored.")]);
    let slow = Arc::new(Slow {
        inner: oracle.clone(),
        delay: Duration::from_millis(200),
    });
    let engine = FitEngine::new(compiler.clone(), Arc::new(FakeMetrics), slow);

    let events = stream_run(engine, request(), None);
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(events);
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(oracle.stages(), vec!["drafting"]);
    assert_eq!(compiler.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn late_preview_does_not_hold_stream_open() {
    let compiler = Arc::new(FakeCompiler::default());
    let oracle = ScriptedOracle::new(vec![json_reply(&doc("PAGES=1"), "Tailored.")]);
    let preview = Arc::new(Slow {
        inner: Arc::new(FakeCompiler::default()),
        delay: Duration::from_secs(5),
    });
    let engine = FitEngine::new(compiler, Arc::new(FakeMetrics), oracle)
        .with_preview_compiler(preview)
        .preview_original(true);

    let events: Vec<FitEvent> = tokio::time::timeout(
        Duration::from_secs(2),
        stream_run(engine, request(), None).collect(),
    )
    .await
    .expect("stream ends with the run");

    assert!(matches!(events.last(), Some(FitEvent::Done { .. })));
    assert!(!events.iter().any(|e| matches!(e, FitEvent::Preview { .. })));
}
