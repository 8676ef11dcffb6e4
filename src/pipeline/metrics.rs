//! PDF measurement: page count, page rasters, overflow and page fill.
//!
//! The loop's only enforced constraint is the page count of a *real*
//! compiled PDF, so measurement goes through the poppler command-line tools
//! rather than any estimate:
//!
//! | operation | tool |
//! |-----------|------|
//! | [`PdfMetrics::page_count`] | `pdfinfo` (`Pages: N`) |
//! | [`PdfMetrics::rasterize`] | `pdftoppm -png -r <dpi>` |
//! | [`PdfMetrics::analyze_overflow`] | `pdftotext -layout` |
//! | [`PdfMetrics::analyze_page_fill`] | `pdftotext -bbox` |
//!
//! Each call writes the PDF to its own temp file, which is removed when the
//! call returns. All parsing is done by pure functions so it can be tested
//! against captured tool output without the tools installed.

use crate::error::FitError;
use crate::pipeline::encode;
use crate::policy::{percentage, CENTER_BAND, FOOTER_BAND, LETTER_HEIGHT_PT};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tokio::process::Command;
use tracing::{debug, warn};

// ── Results ──────────────────────────────────────────────────────────────

/// How much text spilled past page 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverflowAnalysis {
    pub overflow_lines: usize,
    pub overflow_words: usize,
    pub total_lines: usize,
    pub total_words: usize,
    /// `round(overflow_words / total_words × 100)`, 0 when there are no words.
    pub overflow_percentage: u32,
}

/// How much of page 1 is left blank below the last line of content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PageFillAnalysis {
    pub page_height: f64,
    pub content_bottom_y: f64,
    /// `max(page_height − content_bottom_y, 0)`.
    pub blank_space: f64,
    /// `round(blank_space / page_height × 100)`.
    pub blank_percentage: u32,
}

// ── Trait ────────────────────────────────────────────────────────────────

/// Measurements over a compiled PDF.
#[async_trait]
pub trait PdfMetrics: Send + Sync {
    /// Number of pages. Fails if the count cannot be read.
    async fn page_count(&self, pdf: &[u8]) -> Result<usize, FitError>;

    /// One base64 PNG per page, in page order.
    async fn rasterize(&self, pdf: &[u8]) -> Result<Vec<String>, FitError>;

    /// Words and lines past page 1. All zero when `page_count <= 1`.
    async fn analyze_overflow(&self, pdf: &[u8], page_count: usize)
        -> Result<OverflowAnalysis, FitError>;

    /// Blank space at the bottom of page 1, ignoring page-number footers.
    async fn analyze_page_fill(&self, pdf: &[u8]) -> Result<PageFillAnalysis, FitError>;
}

// ── Poppler implementation ───────────────────────────────────────────────

/// Program names (or paths) of the poppler tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopplerTools {
    pub pdfinfo: String,
    pub pdftoppm: String,
    pub pdftotext: String,
}

impl Default for PopplerTools {
    fn default() -> Self {
        Self {
            pdfinfo: "pdfinfo".to_string(),
            pdftoppm: "pdftoppm".to_string(),
            pdftotext: "pdftotext".to_string(),
        }
    }
}

/// [`PdfMetrics`] backed by the poppler command-line tools.
#[derive(Debug, Clone)]
pub struct PopplerMetrics {
    tools: PopplerTools,
    dpi: u32,
    max_pixels: u32,
    timeout: Duration,
}

impl PopplerMetrics {
    pub fn new(tools: PopplerTools, dpi: u32, max_pixels: u32, timeout_secs: u64) -> Self {
        Self {
            tools,
            dpi,
            max_pixels,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn run(&self, program: &str, args: &[&str], pdf: &Path) -> Result<String, FitError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(pdf)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        self.run_command(program, cmd).await
    }

    async fn run_command(&self, program: &str, mut cmd: Command) -> Result<String, FitError> {
        debug!("Running {}", program);
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| FitError::ToolFailed {
                tool: program.to_string(),
                detail: format!("timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| FitError::ToolFailed {
                tool: program.to_string(),
                detail: format!("failed to start: {e}"),
            })?;

        if !output.status.success() {
            return Err(FitError::ToolFailed {
                tool: program.to_string(),
                detail: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Write `pdf` to a fresh temp file that is removed on drop.
fn stage_pdf(pdf: &[u8]) -> Result<NamedTempFile, FitError> {
    let mut tmp = tempfile::Builder::new()
        .prefix("pagefit-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| FitError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(pdf)
        .map_err(|e| FitError::Internal(format!("tempfile write: {e}")))?;
    Ok(tmp)
}

fn release(tmp: NamedTempFile) {
    if let Err(e) = tmp.close() {
        warn!("Failed to remove temp PDF: {}", e);
    }
}

#[async_trait]
impl PdfMetrics for PopplerMetrics {
    async fn page_count(&self, pdf: &[u8]) -> Result<usize, FitError> {
        let tmp = stage_pdf(pdf)?;
        let info = self.run(&self.tools.pdfinfo, &[], tmp.path()).await;
        release(tmp);
        let info = info?;
        let pages = parse_page_count(&info).ok_or_else(|| FitError::MeasurementFailed {
            tool: self.tools.pdfinfo.clone(),
            detail: "no 'Pages:' line in output".to_string(),
        })?;
        debug!("PDF has {} pages", pages);
        Ok(pages)
    }

    async fn rasterize(&self, pdf: &[u8]) -> Result<Vec<String>, FitError> {
        let tmp = stage_pdf(pdf)?;
        let out_dir = TempDir::with_prefix("pagefit-raster-")
            .map_err(|e| FitError::Internal(format!("tempdir: {e}")))?;
        let prefix = out_dir.path().join("page");

        let mut cmd = Command::new(&self.tools.pdftoppm);
        cmd.arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(tmp.path())
            .arg(&prefix)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let ran = self.run_command(&self.tools.pdftoppm, cmd).await;
        release(tmp);
        ran?;

        let pages = collect_page_images(out_dir.path()).await;
        if let Err(e) = out_dir.close() {
            warn!("Failed to remove raster directory: {}", e);
        }
        let pages = pages?;

        let mut encoded = Vec::with_capacity(pages.len());
        for (page_num, png) in pages {
            let b64 = encode::encode_png(&png, self.max_pixels).map_err(|e| {
                FitError::MeasurementFailed {
                    tool: self.tools.pdftoppm.clone(),
                    detail: format!("page {page_num} is not a readable PNG: {e}"),
                }
            })?;
            encoded.push(b64);
        }
        debug!("Rasterised {} pages at {} DPI", encoded.len(), self.dpi);
        Ok(encoded)
    }

    async fn analyze_overflow(
        &self,
        pdf: &[u8],
        page_count: usize,
    ) -> Result<OverflowAnalysis, FitError> {
        if page_count <= 1 {
            return Ok(OverflowAnalysis::default());
        }
        let tmp = stage_pdf(pdf)?;
        let last = page_count.to_string();
        let texts = async {
            let first = self
                .run_to_stdout(&["-layout", "-f", "1", "-l", "1"], tmp.path())
                .await?;
            let rest = self
                .run_to_stdout(&["-layout", "-f", "2", "-l", &last], tmp.path())
                .await?;
            Ok::<_, FitError>((first, rest))
        }
        .await;
        release(tmp);
        let (first_page, rest) = texts?;
        let analysis = overflow_from_text(&first_page, &rest);
        debug!(
            "Overflow: {} of {} words ({}%)",
            analysis.overflow_words, analysis.total_words, analysis.overflow_percentage
        );
        Ok(analysis)
    }

    async fn analyze_page_fill(&self, pdf: &[u8]) -> Result<PageFillAnalysis, FitError> {
        let tmp = stage_pdf(pdf)?;
        let bbox = self.run_to_stdout(&["-bbox", "-f", "1", "-l", "1"], tmp.path()).await;
        release(tmp);
        let fill = page_fill_from_bbox(&bbox?);
        debug!(
            "Page fill: content ends at {:.1}/{:.1}pt ({}% blank)",
            fill.content_bottom_y, fill.page_height, fill.blank_percentage
        );
        Ok(fill)
    }
}

impl PopplerMetrics {
    /// `pdftotext <args> <pdf> -` (text on stdout).
    async fn run_to_stdout(&self, args: &[&str], pdf: &Path) -> Result<String, FitError> {
        let mut cmd = Command::new(&self.tools.pdftotext);
        cmd.args(args)
            .arg(pdf)
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        self.run_command(&self.tools.pdftotext, cmd).await
    }
}

/// Read `page-N.png` files (N possibly zero-padded) sorted by page number.
async fn collect_page_images(dir: &Path) -> Result<Vec<(usize, Vec<u8>)>, FitError> {
    let io_err = |e: std::io::Error| FitError::Internal(format!("reading rasters: {e}"));
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut numbered = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(n) = raster_page_number(&name) {
            numbered.push((n, entry.path()));
        }
    }
    numbered.sort_by_key(|(n, _)| *n);

    let mut pages = Vec::with_capacity(numbered.len());
    for (n, path) in numbered {
        pages.push((n, tokio::fs::read(&path).await.map_err(io_err)?));
    }
    Ok(pages)
}

// ── Pure parsers ─────────────────────────────────────────────────────────

static RE_PAGES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^Pages:\s+(\d+)").unwrap());

/// Parse `Pages: N` from `pdfinfo` output.
pub fn parse_page_count(info: &str) -> Option<usize> {
    RE_PAGES.captures(info)?.get(1)?.as_str().parse().ok()
}

/// Page number from a `pdftoppm` output name such as `page-3.png` or `page-03.png`.
pub fn raster_page_number(file_name: &str) -> Option<usize> {
    let stem = file_name.strip_suffix(".png")?;
    let (_, number) = stem.rsplit_once('-')?;
    number.parse().ok()
}

/// Non-blank lines and whitespace-delimited words.
pub fn count_lines_and_words(text: &str) -> (usize, usize) {
    text.lines().fold((0, 0), |(lines, words), line| {
        let n = line.split_whitespace().count();
        if n == 0 {
            (lines, words)
        } else {
            (lines + 1, words + n)
        }
    })
}

/// Compare page-1 text with the text of every later page.
pub fn overflow_from_text(first_page: &str, rest: &str) -> OverflowAnalysis {
    let (first_lines, first_words) = count_lines_and_words(first_page);
    let (overflow_lines, overflow_words) = count_lines_and_words(rest);
    let total_words = first_words + overflow_words;
    OverflowAnalysis {
        overflow_lines,
        overflow_words,
        total_lines: first_lines + overflow_lines,
        total_words,
        overflow_percentage: percentage(overflow_words as f64, total_words as f64),
    }
}

static RE_PAGE_BOX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<page\s+width="([0-9.]+)"\s+height="([0-9.]+)""#).unwrap()
});

static RE_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"<word\s+xMin="(-?[0-9.]+)"\s+yMin="(-?[0-9.]+)"\s+xMax="(-?[0-9.]+)"\s+yMax="(-?[0-9.]+)"\s*>(.*?)</word>"#,
    )
    .unwrap()
});

static RE_PAGE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:\d{1,2}|page\s*\d+|\d+\s*/\s*\d+)$").unwrap()
});

/// A positioned word from `pdftotext -bbox`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxedWord {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
    pub text: String,
}

/// Does `text` look like a page number ("3", "Page 3", "3 / 4")?
pub fn is_page_number_text(text: &str) -> bool {
    RE_PAGE_NUMBER.is_match(text.trim())
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Parse the page size and words of a `pdftotext -bbox` dump.
pub fn parse_bbox(html: &str) -> (Option<(f64, f64)>, Vec<BoxedWord>) {
    let page = RE_PAGE_BOX.captures(html).and_then(|c| {
        let w: f64 = c.get(1)?.as_str().parse().ok()?;
        let h: f64 = c.get(2)?.as_str().parse().ok()?;
        (w > 0.0 && h > 0.0).then_some((w, h))
    });
    let words = RE_WORD
        .captures_iter(html)
        .filter_map(|c| {
            Some(BoxedWord {
                x_min: c.get(1)?.as_str().parse().ok()?,
                y_min: c.get(2)?.as_str().parse().ok()?,
                x_max: c.get(3)?.as_str().parse().ok()?,
                y_max: c.get(4)?.as_str().parse().ok()?,
                text: decode_entities(c.get(5)?.as_str()),
            })
        })
        .collect();
    (page, words)
}

/// Flag words that are page-number footers.
///
/// A word is an artifact only if it starts in the bottom [`FOOTER_BAND`] of
/// the page, is centred within the middle [`CENTER_BAND`] of the width, and
/// its text (alone, or joined with the other such words on its line, for
/// multi-word forms like "Page 2") matches [`is_page_number_text`].
pub fn page_number_artifacts(words: &[BoxedWord], width: f64, height: f64) -> Vec<bool> {
    let footer_top = height * (1.0 - FOOTER_BAND);
    let center_lo = width * (0.5 - CENTER_BAND / 2.0);
    let center_hi = width * (0.5 + CENTER_BAND / 2.0);

    let in_zone: Vec<bool> = words
        .iter()
        .map(|w| {
            let cx = (w.x_min + w.x_max) / 2.0;
            w.y_min >= footer_top && cx >= center_lo && cx <= center_hi
        })
        .collect();

    let mut artifact = vec![false; words.len()];
    for (i, word) in words.iter().enumerate() {
        if !in_zone[i] || artifact[i] {
            continue;
        }
        let line: Vec<usize> = (0..words.len())
            .filter(|&j| in_zone[j] && (words[j].y_min - word.y_min).abs() < 2.0)
            .collect();
        let joined = line
            .iter()
            .map(|&j| words[j].text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if is_page_number_text(&joined) {
            for j in line {
                artifact[j] = true;
            }
        } else if is_page_number_text(&word.text) {
            artifact[i] = true;
        }
    }
    artifact
}

/// Compute page-1 fill from a `pdftotext -bbox` dump.
///
/// An unreadable page header is reported as a full Letter page (zero blank
/// space), so a parsing problem never triggers an expansion.
pub fn page_fill_from_bbox(html: &str) -> PageFillAnalysis {
    let (page, words) = parse_bbox(html);
    let Some((width, height)) = page else {
        warn!("Could not read page size from bbox output; assuming a full Letter page");
        return PageFillAnalysis {
            page_height: LETTER_HEIGHT_PT,
            content_bottom_y: LETTER_HEIGHT_PT,
            blank_space: 0.0,
            blank_percentage: 0,
        };
    };
    let artifacts = page_number_artifacts(&words, width, height);
    let content_bottom_y = words
        .iter()
        .zip(&artifacts)
        .filter(|(_, &is_artifact)| !is_artifact)
        .map(|(w, _)| w.y_max)
        .fold(0.0_f64, f64::max);

    let blank_space = (height - content_bottom_y).max(0.0);
    PageFillAnalysis {
        page_height: height,
        content_bottom_y,
        blank_space,
        blank_percentage: percentage(blank_space, height),
    }
}
