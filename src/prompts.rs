//! Oracle prompts and the message lists built around them.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing what the oracle is told (e.g. a
//!    new formatting rule) means editing exactly one place.
//!
//! 2. **Testability** — unit tests inspect the built message lists directly
//!    without a real model, so a builder that forgets to attach the page
//!    images or the cut target is caught immediately.
//!
//! Two reply modes exist. The draft uses [`STRUCTURED_SYSTEM_PROMPT`] and
//! expects `{"document": …, "summary": …}`; the fix, condense and expand
//! sub-flows use [`RAW_DOCUMENT_SYSTEM_PROMPT`] and expect the bare document.
//! [`crate::pipeline::decode::decode`] handles both.

use crate::output::FitRequest;
use crate::pipeline::compile::tail_chars;
use crate::pipeline::metrics::{OverflowAnalysis, PageFillAnalysis};
use crate::pipeline::oracle::{OracleMessage, Role};
use crate::policy::{cut_target_pct, expansion_estimate, HISTORY_WINDOW};

/// Diagnostics forwarded in a fix request are cut to this many trailing characters.
pub const FIX_DIAGNOSTIC_CHARS: usize = 2000;

/// System prompt for the initial or follow-up rewrite (structured JSON mode).
pub const STRUCTURED_SYSTEM_PROMPT: &str = r#"You are an expert résumé writer and LaTeX typesetter. You tailor an existing LaTeX résumé to a target role.

Follow these rules precisely:

1. CONTENT
   - Keep every fact truthful: never invent employers, dates, degrees or metrics
   - Reorder, rephrase and emphasise existing material to match the target role
   - Keep all sections unless the user explicitly asks to remove one

2. LATEX
   - Return a complete, compilable document: preamble, \begin{document} and \end{document}
   - Keep the existing document class, packages and custom macros
   - Escape special characters (&, %, $, #, _) in text

3. LENGTH
   - The result must fit on exactly one printed page

4. OUTPUT FORMAT
   - Respond with a single JSON object and nothing else:
     {"document": "<full LaTeX source>", "summary": "<two or three sentences describing what changed>"}
   - Escape the LaTeX inside the JSON string correctly (backslashes as \\, quotes as \", newlines as \n)
   - Do NOT wrap the JSON in ``` fences"#;

/// System prompt for fix, condense and expand requests (raw-document mode).
pub const RAW_DOCUMENT_SYSTEM_PROMPT: &str = r#"You are an expert LaTeX typesetter editing a one-page résumé.

Follow these rules precisely:
   - Return ONLY the full LaTeX document, from \documentclass to \end{document}
   - Do NOT wrap it in ``` fences
   - Do NOT add commentary, explanations or JSON
   - Keep every fact truthful; never invent content that is not supported by the original
   - Preserve the document class, packages and custom macros"#;

/// Messages for the drafting state.
///
/// Uses follow-up framing when [`FitRequest::follow_up_text`] is set and
/// initial framing otherwise. The last [`HISTORY_WINDOW`] history turns sit
/// between the system prompt and the new user turn.
pub fn draft_messages(request: &FitRequest) -> Vec<OracleMessage> {
    let mut messages = vec![OracleMessage::system(STRUCTURED_SYSTEM_PROMPT)];

    let skip = request.history.len().saturating_sub(HISTORY_WINDOW);
    for turn in &request.history[skip..] {
        messages.push(match turn.role {
            Role::System => OracleMessage::system(turn.text.clone()),
            Role::User => OracleMessage::user(turn.text.clone()),
            Role::Assistant => OracleMessage::assistant(turn.text.clone()),
        });
    }

    let body = match request.follow_up_text() {
        Some(follow_up) => format!(
            "Apply this follow-up change to the current résumé.\n\n\
             ## Follow-up\n{follow_up}\n\n\
             ## Target role\n{}\n\n\
             ## Current résumé\n{}",
            request.target, request.document
        ),
        None => {
            let mut s = format!(
                "Tailor this résumé to the target role.\n\n## Target role\n{}\n\n",
                request.target
            );
            if let Some(extra) = request
                .instructions
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
            {
                s.push_str(&format!("## Additional instructions\n{extra}\n\n"));
            }
            s.push_str(&format!("## Résumé\n{}", request.document));
            s
        }
    };
    messages.push(OracleMessage::user(body));
    messages
}

/// Messages asking the oracle to repair a document that failed to compile.
///
/// `original` is the session's untouched input, sent so the oracle repairs
/// syntax without dropping content.
pub fn fix_messages(
    document: &str,
    error: &str,
    diagnostics: &str,
    original: &str,
) -> Vec<OracleMessage> {
    let body = format!(
        "This LaTeX résumé fails to compile. Fix the error with the smallest possible change. \
         Do not remove sections, bullet points or other content.\n\n\
         ## Compile error\n{error}\n\n\
         ## Compiler output (tail)\n{}\n\n\
         ## Failing document\n{document}\n\n\
         ## Original document (for reference; all of its content must survive)\n{original}",
        tail_chars(diagnostics, FIX_DIAGNOSTIC_CHARS)
    );
    vec![
        OracleMessage::system(RAW_DOCUMENT_SYSTEM_PROMPT),
        OracleMessage::user(body),
    ]
}

/// Messages asking the oracle to cut a multi-page document back to one page.
///
/// `images` are the rendered pages in order.
pub fn condense_messages(
    document: &str,
    target: &str,
    page_count: usize,
    overflow: &OverflowAnalysis,
    images: Vec<String>,
) -> Vec<OracleMessage> {
    let cut = cut_target_pct(overflow.overflow_percentage);
    let body = format!(
        "The résumé renders to {page_count} pages; it must fit on exactly one. \
         The attached images show every page.\n\n\
         ## Overflow\n\
         - {} lines and {} words beyond page 1\n\
         - {} lines and {} words in total\n\
         - {}% of the words overflow\n\n\
         Condense by roughly {cut}% of the content. Prefer tightening wording, merging \
         short bullets and dropping the least relevant details for the target role over \
         removing whole sections. Do not shrink fonts or margins below legibility.\n\n\
         ## Target role\n{target}\n\n\
         ## Document\n{document}",
        overflow.overflow_lines,
        overflow.overflow_words,
        overflow.total_lines,
        overflow.total_words,
        overflow.overflow_percentage,
    );
    vec![
        OracleMessage::system(RAW_DOCUMENT_SYSTEM_PROMPT),
        OracleMessage::user_with_images(body, images),
    ]
}

/// Messages asking the oracle to use the blank space left on a one-page document.
pub fn expand_messages(
    document: &str,
    target: &str,
    fill: &PageFillAnalysis,
    images: Vec<String>,
) -> Vec<OracleMessage> {
    let (low, high) = expansion_estimate(fill.blank_percentage);
    let body = format!(
        "The résumé fits on one page but {}% of the page is blank \
         (content ends at {:.0}pt of {:.0}pt). The attached image shows the page.\n\n\
         Add roughly {low} to {high} one-line bullet points' worth of relevant material \
         drawn from the existing content, emphasising what matters for the target role. \
         The result must still fit on exactly one page.\n\n\
         ## Target role\n{target}\n\n\
         ## Document\n{document}",
        fill.blank_percentage, fill.content_bottom_y, fill.page_height,
    );
    vec![
        OracleMessage::system(RAW_DOCUMENT_SYSTEM_PROMPT),
        OracleMessage::user_with_images(body, images),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::HistoryTurn;

    #[test]
    fn structured_prompt_asks_for_json() {
        assert!(STRUCTURED_SYSTEM_PROMPT.contains("\"document\""));
        assert!(STRUCTURED_SYSTEM_PROMPT.contains("\"summary\""));
        assert!(RAW_DOCUMENT_SYSTEM_PROMPT.contains("ONLY the full LaTeX document"));
    }

    #[test]
    fn draft_keeps_last_four_history_turns() {
        let history = (0..6)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                HistoryTurn::new(role, format!("turn {i}"))
            })
            .collect();
        let req = FitRequest::new("\\documentclass{article}", "SRE").with_history(history);
        let msgs = draft_messages(&req);
        assert_eq!(msgs.len(), 1 + 4 + 1);
        assert_eq!(msgs[1].text, "turn 2");
        assert_eq!(msgs[4].text, "turn 5");
        assert_eq!(msgs[4].role, Role::Assistant);
    }

    #[test]
    fn draft_framing_switches_on_follow_up() {
        let req = FitRequest::new("DOC", "Data engineer").with_instructions("Keep it formal");
        let initial = draft_messages(&req);
        let last = &initial.last().unwrap().text;
        assert!(last.starts_with("Tailor this résumé"));
        assert!(last.contains("Keep it formal"));

        let req = req.with_follow_up("Drop the hobbies section");
        let follow = draft_messages(&req);
        let last = &follow.last().unwrap().text;
        assert!(last.starts_with("Apply this follow-up"));
        assert!(last.contains("Drop the hobbies section"));
        assert!(!last.contains("Keep it formal"));
    }

    #[test]
    fn condense_carries_cut_target_and_images() {
        let overflow = OverflowAnalysis {
            overflow_lines: 4,
            overflow_words: 30,
            total_lines: 60,
            total_words: 500,
            overflow_percentage: 6,
        };
        let msgs = condense_messages("DOC", "PM", 2, &overflow, vec!["a".into(), "b".into()]);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[1].images.len(), 2);
        assert!(msgs[1].text.contains("roughly 11%"));
        assert!(msgs[1].text.contains("renders to 2 pages"));
    }

    #[test]
    fn expand_carries_bullet_estimate() {
        let fill = PageFillAnalysis {
            page_height: 792.0,
            content_bottom_y: 554.0,
            blank_space: 238.0,
            blank_percentage: 30,
        };
        let msgs = expand_messages("DOC", "PM", &fill, vec!["img".into()]);
        assert!(msgs[1].text.contains("30% of the page is blank"));
        assert!(msgs[1].text.contains("roughly 10 to 15"));
        assert_eq!(msgs[1].images, vec!["img".to_string()]);
    }

    #[test]
    fn fix_includes_original_and_error() {
        let msgs = fix_messages("BROKEN", "! Undefined control sequence.", "log", "ORIGINAL");
        let body = &msgs[1].text;
        assert!(body.contains("! Undefined control sequence."));
        assert!(body.contains("BROKEN"));
        assert!(body.contains("ORIGINAL"));
    }
}
