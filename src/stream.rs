//! Streaming API: observe a run as a sequence of events.
//!
//! ## Why stream?
//!
//! A full run takes several oracle round-trips and LaTeX compiles, often a
//! minute or more. A server can forward [`FitEvent`]s to a browser as
//! server-sent events so the user sees "attempt 2/3, compiling…" instead of a
//! spinner. Every event is `Serialize`, so forwarding is a `serde_json` call.
//!
//! The loop runs on a spawned task. Dropping the stream cancels the run at
//! the next checkpoint, which is how an abandoned HTTP request stops spending
//! oracle tokens.

use crate::config::FitConfig;
use crate::error::FitError;
use crate::fit::FitEngine;
use crate::output::{FitRequest, FitResult, OverflowChoice};
use crate::pipeline::compile::CompileResult;
use crate::progress::FitProgressCallback;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A boxed stream of run events. Ends after `Done`, `AwaitingChoice` or `Failed`;
/// a preview that finishes later than the run is not reported.
pub type FitEventStream = Pin<Box<dyn Stream<Item = FitEvent> + Send>>;

/// One observable step of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FitEvent {
    Status { message: String },
    Attempt { attempt: u32, max: u32 },
    Compiling { attempt: u32 },
    CompileFix { fix: u32, max: u32 },
    CandidateRejected { reason: String },
    Measured { page_count: usize },
    Preview { result: CompileResult },
    AwaitingChoice { choice: OverflowChoice },
    Done { result: Box<FitResult> },
    Failed { message: String },
}

impl FitEvent {
    /// True for the last event a stream yields.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FitEvent::Done { .. } | FitEvent::AwaitingChoice { .. } | FitEvent::Failed { .. }
        )
    }
}

/// Forwards callbacks into a channel; a closed channel cancels the run.
///
/// The sender is released after the terminal event, so a detached preview
/// task still holding this callback cannot keep the stream open.
struct ChannelProgress {
    tx: Mutex<Option<UnboundedSender<FitEvent>>>,
    token: CancellationToken,
}

impl ChannelProgress {
    fn new(tx: UnboundedSender<FitEvent>, token: CancellationToken) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            token,
        }
    }

    fn emit(&self, event: FitEvent) {
        let Ok(mut slot) = self.tx.lock() else {
            return;
        };
        let Some(tx) = slot.as_ref() else {
            return;
        };
        let terminal = event.is_terminal();
        if tx.send(event).is_err() && !self.token.is_cancelled() {
            info!("Event stream dropped; cancelling run");
            self.token.cancel();
        }
        if terminal {
            *slot = None;
        }
    }

    fn close(&self) {
        if let Ok(mut slot) = self.tx.lock() {
            slot.take();
        }
    }
}

impl FitProgressCallback for ChannelProgress {
    fn on_status(&self, message: &str) {
        self.emit(FitEvent::Status {
            message: message.to_string(),
        });
    }

    fn on_attempt(&self, attempt: u32, max: u32) {
        self.emit(FitEvent::Attempt { attempt, max });
    }

    fn on_compiling(&self, attempt: u32) {
        self.emit(FitEvent::Compiling { attempt });
    }

    fn on_compile_fix(&self, fix: u32, max: u32) {
        self.emit(FitEvent::CompileFix { fix, max });
    }

    fn on_candidate_rejected(&self, reason: &str) {
        self.emit(FitEvent::CandidateRejected {
            reason: reason.to_string(),
        });
    }

    fn on_measured(&self, page_count: usize) {
        self.emit(FitEvent::Measured { page_count });
    }

    fn on_preview(&self, result: &CompileResult) {
        self.emit(FitEvent::Preview {
            result: result.clone(),
        });
    }

    fn on_awaiting_choice(&self, choice: &OverflowChoice) {
        self.emit(FitEvent::AwaitingChoice {
            choice: choice.clone(),
        });
    }

    fn on_complete(&self, result: &FitResult) {
        self.emit(FitEvent::Done {
            result: Box::new(result.clone()),
        });
    }
}

/// Start a run and return its event stream.
///
/// Provider resolution happens before this returns, so configuration errors
/// surface as `Err` rather than as a `Failed` event.
///
/// # Example
/// ```rust,no_run
/// use resume_pagefit::{stream::fit_stream, FitConfig, FitRequest};
/// use tokio_stream::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let request = FitRequest::new(std::fs::read_to_string("resume.tex")?, "Staff SRE");
/// let mut events = fit_stream(request, &FitConfig::default()).await?;
/// while let Some(event) = events.next().await {
///     println!("{}", serde_json::to_string(&event)?);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn fit_stream(request: FitRequest, config: &FitConfig) -> Result<FitEventStream, FitError> {
    let engine = FitEngine::from_config(config).await?;
    Ok(stream_run(engine, request, config.cancellation.as_ref()))
}

/// Run an already-built engine on a spawned task and stream its events.
///
/// The run is cancelled when `parent` fires or the stream is dropped. Must be
/// called from within a tokio runtime.
pub fn stream_run(
    engine: FitEngine,
    request: FitRequest,
    parent: Option<&CancellationToken>,
) -> FitEventStream {
    let (tx, rx) = unbounded_channel();
    let token = parent.map_or_else(CancellationToken::new, CancellationToken::child_token);
    let progress = Arc::new(ChannelProgress::new(tx.clone(), token.clone()));
    let engine = engine
        .with_progress(progress.clone())
        .with_cancellation(token.clone());
    let finished = CancellationToken::new();

    // Cancel as soon as the receiver goes away, not only on the next event.
    let run_finished = finished.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tx.closed() => {
                if !token.is_cancelled() {
                    info!("Event stream dropped; cancelling run");
                    token.cancel();
                }
            }
            _ = token.cancelled() => {}
            _ = run_finished.cancelled() => {}
        }
    });

    tokio::spawn(async move {
        let _finished = finished.drop_guard();
        if let Err(e) = engine.run(&request).await {
            debug!("Streamed run failed: {}", e);
            progress.emit(FitEvent::Failed {
                message: e.to_string(),
            });
        }
        progress.close();
    });

    Box::pin(UnboundedReceiverStream::new(rx))
}
