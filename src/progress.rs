//! Progress-callback trait for convergence-loop events.
//!
//! Inject an [`Arc<dyn FitProgressCallback>`] via
//! [`crate::config::FitConfigBuilder::progress_callback`] to receive events
//! as the loop moves between states.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal progress bar, a server-sent event
//! stream or a log without the library knowing how the host communicates.
//! [`crate::stream`] is itself built on this trait.
//!
//! # Example
//!
//! ```rust
//! use resume_pagefit::{FitConfig, FitProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicU32, Ordering}};
//!
//! struct AttemptCounter(AtomicU32);
//!
//! impl FitProgressCallback for AttemptCounter {
//!     fn on_attempt(&self, attempt: u32, max: u32) {
//!         self.0.store(attempt, Ordering::SeqCst);
//!         eprintln!("attempt {attempt}/{max}");
//!     }
//! }
//!
//! let config = FitConfig::builder()
//!     .progress_callback(Arc::new(AttemptCounter(AtomicU32::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{FitResult, OverflowChoice};
use crate::pipeline::compile::CompileResult;
use std::sync::Arc;

/// Called by the convergence loop at each checkpoint.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events arrive in loop order from a single task,
/// except [`on_preview`](Self::on_preview), which comes from the detached
/// preview compile and may interleave with the others.
pub trait FitProgressCallback: Send + Sync {
    /// Free-form status line ("Drafting…", "Condensing…").
    fn on_status(&self, message: &str) {
        let _ = message;
    }

    /// An outer attempt is starting.
    ///
    /// # Arguments
    /// * `attempt` — 1-indexed outer attempt
    /// * `max`     — attempt budget
    fn on_attempt(&self, attempt: u32, max: u32) {
        let _ = (attempt, max);
    }

    /// The working document is about to be compiled.
    fn on_compiling(&self, attempt: u32) {
        let _ = attempt;
    }

    /// An oracle-assisted compile fix is starting.
    fn on_compile_fix(&self, fix: u32, max: u32) {
        let _ = (fix, max);
    }

    /// A fix candidate failed integrity validation and was discarded.
    fn on_candidate_rejected(&self, reason: &str) {
        let _ = reason;
    }

    /// The compiled working document has `page_count` pages.
    fn on_measured(&self, page_count: usize) {
        let _ = page_count;
    }

    /// The untouched input finished compiling (only with `preview_original`).
    fn on_preview(&self, result: &CompileResult) {
        let _ = result;
    }

    /// The run stopped to let the caller decide about a small overflow.
    fn on_awaiting_choice(&self, choice: &OverflowChoice) {
        let _ = choice;
    }

    /// The run reached `Done`.
    fn on_complete(&self, result: &FitResult) {
        let _ = result;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl FitProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::FitConfig`].
pub type ProgressCallback = Arc<dyn FitProgressCallback>;
