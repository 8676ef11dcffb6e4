//! Content-integrity validation of oracle rewrites.
//!
//! When asked to fix a compile error, a model will sometimes "fix" it by
//! deleting half the résumé. [`validate`] compares a candidate against the
//! document it is meant to replace and rejects rewrites that look gutted.
//!
//! Checks run in order and the first failure wins:
//!
//! 1. length ratio ≥ [`MIN_LENGTH_RATIO`]
//! 2. `\section` count ≥ [`MIN_SECTION_RATIO`] of the original (when it has any)
//! 3. `\item` count ≥ [`MIN_ITEM_RATIO`] of the original (when it has more than
//!    [`ITEM_CHECK_FLOOR`])
//! 4. both `\begin{document}` and `\end{document}` present

use crate::policy::{
    BEGIN_DOCUMENT_MARKER, END_DOCUMENT_MARKER, ITEM_CHECK_FLOOR, MIN_ITEM_RATIO,
    MIN_LENGTH_RATIO, MIN_SECTION_RATIO,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_SECTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\section\b").unwrap());
static RE_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\item\b").unwrap());

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    pub reason: Option<String>,
}

impl ValidationVerdict {
    fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    fn invalid(reason: String) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason),
        }
    }
}

/// Number of section headings (`\section`, `\section*`).
pub fn count_sections(doc: &str) -> usize {
    RE_SECTION.find_iter(doc).count()
}

/// Number of list items (`\item`, not `\itemsep`).
pub fn count_items(doc: &str) -> usize {
    RE_ITEM.find_iter(doc).count()
}

/// Decide whether `candidate` plausibly preserves the content of `original`.
///
/// Pure and deterministic.
pub fn validate(original: &str, candidate: &str) -> ValidationVerdict {
    let original_len = original.chars().count();
    let candidate_len = candidate.chars().count();

    if original_len > 0 {
        let ratio = candidate_len as f64 / original_len as f64;
        if ratio < MIN_LENGTH_RATIO {
            return ValidationVerdict::invalid(format!(
                "candidate is {:.0}% of the original length ({} vs {} characters)",
                ratio * 100.0,
                candidate_len,
                original_len
            ));
        }
    }

    let original_sections = count_sections(original);
    let candidate_sections = count_sections(candidate);
    if original_sections >= 1
        && (candidate_sections as f64) < original_sections as f64 * MIN_SECTION_RATIO
    {
        return ValidationVerdict::invalid(format!(
            "candidate keeps {candidate_sections} of {original_sections} sections"
        ));
    }

    let original_items = count_items(original);
    let candidate_items = count_items(candidate);
    if original_items > ITEM_CHECK_FLOOR
        && (candidate_items as f64) < original_items as f64 * MIN_ITEM_RATIO
    {
        return ValidationVerdict::invalid(format!(
            "candidate keeps {candidate_items} of {original_items} list items"
        ));
    }

    if !candidate.contains(BEGIN_DOCUMENT_MARKER) {
        return ValidationVerdict::invalid(format!("candidate is missing {BEGIN_DOCUMENT_MARKER}"));
    }
    if !candidate.contains(END_DOCUMENT_MARKER) {
        return ValidationVerdict::invalid(format!("candidate is missing {END_DOCUMENT_MARKER}"));
    }

    ValidationVerdict::valid()
}
