//! Error types for the resume-pagefit library.
//!
//! Only *fatal* conditions are errors. The convergence loop treats several
//! failure modes as ordinary data instead:
//!
//! * a LaTeX compile failure is a [`crate::pipeline::compile::CompileResult`]
//!   with `success = false` and drives the fix sub-loop;
//! * a gutted rewrite is a [`crate::pipeline::validate::ValidationVerdict`]
//!   with `is_valid = false` and is discarded;
//! * overflow after the last attempt is a successful
//!   [`crate::output::FitResult`] with `page_count > 1`.
//!
//! Everything below aborts the current run and is surfaced to the caller
//! unchanged: bad input, oracle transport failures (never retried), a PDF that
//! the measurement tools cannot read, or cancellation.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the resume-pagefit library.
#[derive(Debug, Error)]
pub enum FitError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// A required request field is missing or blank.
    #[error("Invalid input: {field} {reason}")]
    InvalidInput { field: &'static str, reason: String },

    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    // ── Oracle errors ─────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The oracle call failed. Not retried: the run stops here.
    #[error("Oracle call failed while {stage}: {message}")]
    OracleFailed { stage: &'static str, message: String },

    /// The oracle call exceeded the configured timeout.
    #[error("Oracle call timed out after {secs}s while {stage}")]
    OracleTimeout { stage: &'static str, secs: u64 },

    // ── Measurement errors ────────────────────────────────────────────────
    /// An external tool could not be started, timed out, or exited non-zero.
    #[error("External tool '{tool}' failed: {detail}")]
    ToolFailed { tool: String, detail: String },

    /// A tool ran but its output could not be interpreted.
    ///
    /// A freshly compiled PDF should always be measurable, so this is fatal
    /// rather than defaulted.
    #[error("Could not measure PDF with '{tool}': {detail}")]
    MeasurementFailed { tool: String, detail: String },

    // ── Control ───────────────────────────────────────────────────────────
    /// The run was abandoned by its caller.
    #[error("Run cancelled before {stage}")]
    Cancelled { stage: &'static str },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not write the fitted document or its PDF.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FitError {
    /// Shorthand for a blank/missing request field.
    pub(crate) fn missing(field: &'static str) -> Self {
        FitError::InvalidInput {
            field,
            reason: "must not be empty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oracle_failed_display() {
        let e = FitError::OracleFailed {
            stage: "drafting",
            message: "401 Unauthorized".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("drafting"), "got: {msg}");
        assert!(msg.contains("401"), "got: {msg}");
    }

    #[test]
    fn oracle_timeout_display() {
        let e = FitError::OracleTimeout {
            stage: "condensing",
            secs: 180,
        };
        assert!(e.to_string().contains("180s"));
    }

    #[test]
    fn missing_field_display() {
        let e = FitError::missing("target");
        assert_eq!(e.to_string(), "Invalid input: target must not be empty");
    }

    #[test]
    fn measurement_failed_names_tool() {
        let e = FitError::MeasurementFailed {
            tool: "pdfinfo".into(),
            detail: "no 'Pages:' line".into(),
        };
        assert!(e.to_string().contains("pdfinfo"));
    }
}
