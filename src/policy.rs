//! Fixed policy constants for the page-fit convergence loop.
//!
//! These numbers are the "physics" of the whole system: how many times the
//! loop may retry, how much content a rewrite may drop before it is rejected,
//! and when a page is considered too empty or only slightly overflowing. They
//! are deliberately constants rather than [`crate::config::FitConfig`] fields
//! so that two runs with different configs still obey the same convergence
//! rules.

// ── Loop budgets ─────────────────────────────────────────────────────────

/// Outer compile → measure → remediate attempts before giving up on one page.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Oracle-assisted compile-error fixes allowed within a single outer attempt.
pub const MAX_COMPILE_FIX_ATTEMPTS: u32 = 2;

/// Blank space on page 1 (percent) above which one expansion pass is attempted.
pub const UNDERFLOW_THRESHOLD_PCT: u32 = 10;

/// Overflow (percent of words) at or below which the user is asked to choose
/// between condensing and accepting two pages.
pub const SMALL_OVERFLOW_THRESHOLD_PCT: u32 = 10;

/// Number of prior conversation turns forwarded to the oracle.
pub const HISTORY_WINDOW: usize = 4;

// ── Content-integrity thresholds ─────────────────────────────────────────

/// Minimum candidate/original length ratio.
pub const MIN_LENGTH_RATIO: f64 = 0.60;

/// Minimum fraction of section headings a candidate must keep.
pub const MIN_SECTION_RATIO: f64 = 0.50;

/// Minimum fraction of list items a candidate must keep.
pub const MIN_ITEM_RATIO: f64 = 0.40;

/// The list-item check only applies when the original has more items than this.
pub const ITEM_CHECK_FLOOR: usize = 5;

// ── Condensation / expansion guidance ────────────────────────────────────

/// Extra percentage points added to the measured overflow when asking for cuts.
pub const CUT_TARGET_MARGIN_PCT: u32 = 5;

/// Upper bound on the requested cut, to avoid gutting the document.
pub const CUT_TARGET_CAP_PCT: u32 = 30;

// ── Compiler adapter ─────────────────────────────────────────────────────

/// Loop compile timeout.
pub const COMPILE_TIMEOUT_SECS: u64 = 60;

/// Timeout for ad-hoc single-shot preview compiles.
pub const PREVIEW_TIMEOUT_SECS: u64 = 30;

/// Diagnostics are truncated to their last this-many characters.
pub const DIAGNOSTIC_TAIL_CHARS: usize = 5000;

// ── Page geometry ────────────────────────────────────────────────────────

/// Fallback page height (US Letter, 612 × 792 pt) when the bbox header is unreadable.
pub const LETTER_HEIGHT_PT: f64 = 792.0;

/// A page-number artifact must start inside the bottom fraction of the page.
pub const FOOTER_BAND: f64 = 0.10;

/// …and be horizontally centred within this middle fraction of the width.
pub const CENTER_BAND: f64 = 0.40;

// ── LaTeX structural markers ─────────────────────────────────────────────

/// Marker a decoded document must contain to be accepted from a JSON scan.
pub const DOCUMENT_CLASS_MARKER: &str = "\\documentclass";
pub const BEGIN_DOCUMENT_MARKER: &str = "\\begin{document}";
pub const END_DOCUMENT_MARKER: &str = "\\end{document}";

/// Percentage of the document the oracle is asked to cut.
///
/// `min(overflow + 5, 30)`: a little more than the measured overflow so one
/// pass usually suffices, but never more than 30 %.
pub fn cut_target_pct(overflow_pct: u32) -> u32 {
    (overflow_pct + CUT_TARGET_MARGIN_PCT).min(CUT_TARGET_CAP_PCT)
}

/// Rough number of one-line bullet equivalents that would fill the blank space.
///
/// Returns `(low, high)` = `(blank/3, blank/2)`, each at least 1.
pub fn expansion_estimate(blank_pct: u32) -> (u32, u32) {
    ((blank_pct / 3).max(1), (blank_pct / 2).max(1))
}

/// Integer percentage rounded half away from zero; zero when `whole` is zero.
pub fn percentage(part: f64, whole: f64) -> u32 {
    if whole <= 0.0 {
        return 0;
    }
    ((part / whole) * 100.0).round().clamp(0.0, 100.0) as u32
}
