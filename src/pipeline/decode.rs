//! Response decoding: raw oracle text → `(document, summary)`.
//!
//! The oracle is asked for `{"document": "...", "summary": "..."}` in
//! drafting mode and for the bare LaTeX source in fix / condense / expand
//! mode. Models disobey both instructions in creative ways: fenced code
//! blocks around the JSON, unescaped quotes inside the document string, or a
//! reply cut off mid-string by the token limit. [`decode`] never fails; it
//! walks down a ladder of increasingly tolerant strategies:
//!
//! 1. strip an outer code fence
//! 2. strict JSON parse
//! 3. tolerant scan of the `document` string value (a character state machine)
//! 4. regex recovery of `summary`
//! 5. fall back to the whole cleaned text as the document

use crate::policy::DOCUMENT_CLASS_MARKER;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Summary used when the reply does not carry one.
pub const DEFAULT_SUMMARY: &str = "Document updated successfully.";

/// A decoded oracle reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedResponse {
    pub document: String,
    pub summary: String,
}

/// Decode a raw oracle reply. Never fails.
pub fn decode(raw: &str) -> DecodedResponse {
    let cleaned = strip_code_fence(raw);

    if let Some(decoded) = decode_strict(&cleaned) {
        debug!("Decoded reply as strict JSON");
        return decoded;
    }

    if let Some(document) = scan_document_field(&cleaned) {
        let summary = scan_summary_field(&cleaned).unwrap_or_else(|| DEFAULT_SUMMARY.to_string());
        debug!("Recovered document field with tolerant scan ({} chars)", document.len());
        return DecodedResponse { document, summary };
    }

    debug!("Reply has no JSON envelope; using raw text as document");
    DecodedResponse {
        document: cleaned,
        summary: DEFAULT_SUMMARY.to_string(),
    }
}

// ── Step 1: code fences ──────────────────────────────────────────────────

static RE_OPEN_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_+-]*[ \t]*\r?\n?").unwrap());
static RE_CLOSE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n?```\s*$").unwrap());

/// Remove a leading ```` ```lang ```` line and a trailing ```` ``` ````, then trim.
pub fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_open = RE_OPEN_FENCE.replace(trimmed, "");
    let without_close = RE_CLOSE_FENCE.replace(&without_open, "");
    without_close.trim().to_string()
}

// ── Step 2: strict JSON ──────────────────────────────────────────────────

fn decode_strict(text: &str) -> Option<DecodedResponse> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let document = value.get("document")?.as_str()?.to_string();
    let summary = value
        .get("summary")
        .and_then(|s| s.as_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_SUMMARY)
        .to_string();
    Some(DecodedResponse { document, summary })
}

// ── Step 3: tolerant scan ────────────────────────────────────────────────

static RE_DOCUMENT_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']document["']\s*:\s*(["'])"#).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Inside the string value.
    Text,
    /// The previous character was a backslash.
    Escape,
}

/// Find the raw (still escaped) string value that starts at `start` and is
/// delimited by `quote`.
///
/// A backslash always consumes the next character. A `quote` only ends the
/// value when it is followed, after optional whitespace, by `,`, `}` or the
/// end of the text; any other quote is kept as content. Reaching the end of
/// the text without a terminator returns everything scanned (a truncated
/// reply), minus a dangling backslash.
fn scan_string_value(text: &str, start: usize, quote: char) -> &str {
    let mut state = ScanState::Text;
    for (offset, ch) in text[start..].char_indices() {
        let pos = start + offset;
        match state {
            ScanState::Escape => state = ScanState::Text,
            ScanState::Text if ch == '\\' => state = ScanState::Escape,
            ScanState::Text if ch == quote => {
                let rest = text[pos + ch.len_utf8()..].trim_start();
                if rest.is_empty() || rest.starts_with(',') || rest.starts_with('}') {
                    return &text[start..pos];
                }
            }
            ScanState::Text => {}
        }
    }
    let tail = &text[start..];
    if state == ScanState::Escape {
        &tail[..tail.len() - 1]
    } else {
        tail
    }
}

fn scan_document_field(text: &str) -> Option<String> {
    let caps = RE_DOCUMENT_KEY.captures(text)?;
    let quote_match = caps.get(1)?;
    let quote = quote_match.as_str().chars().next()?;
    let raw = scan_string_value(text, quote_match.end(), quote);
    let document = unescape(raw);
    if document.contains(DOCUMENT_CLASS_MARKER) {
        Some(document)
    } else {
        None
    }
}

// ── Step 4: summary ──────────────────────────────────────────────────────

static RE_SUMMARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']summary["']\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

fn scan_summary_field(text: &str) -> Option<String> {
    let caps = RE_SUMMARY.captures(text)?;
    let summary = unescape(caps.get(1)?.as_str());
    if summary.trim().is_empty() {
        None
    } else {
        Some(summary)
    }
}

// ── Unescaping ───────────────────────────────────────────────────────────

/// Unescape a JSON string body, falling back to a manual pass when it is not
/// valid JSON (lone quotes, invalid escapes such as `\d` from raw LaTeX).
pub fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| unescape_manual(raw))
}

fn unescape_manual(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
