//! Document compilation: LaTeX source → PDF bytes via an external program.
//!
//! Every compile gets a fresh [`TempDir`] so concurrent runs never collide,
//! and the directory (source, assets, aux files, PDF) is removed on every
//! exit path: success, failure, timeout, or panic. Removal failures are
//! logged and swallowed.
//!
//! Compile failures are *data*, not errors: [`DocumentCompiler::compile`]
//! always returns a [`CompileResult`] whose diagnostics feed the fix sub-loop.

use crate::pipeline::input::Asset;
use crate::policy::DIAGNOSTIC_TAIL_CHARS;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

const SOURCE_NAME: &str = "document.tex";
const PDF_NAME: &str = "document.pdf";
const LOG_NAME: &str = "document.log";

/// Outcome of one compile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileResult {
    pub success: bool,
    /// The PDF, present only when `success` is true.
    #[serde(skip)]
    pub pdf: Option<Vec<u8>>,
    /// Tail of the compiler's output (or log file), at most
    /// [`DIAGNOSTIC_TAIL_CHARS`] characters.
    pub diagnostics: String,
}

impl CompileResult {
    pub fn failed(diagnostics: impl Into<String>) -> Self {
        Self {
            success: false,
            pdf: None,
            diagnostics: tail_chars(&diagnostics.into(), DIAGNOSTIC_TAIL_CHARS),
        }
    }

    pub fn succeeded(pdf: Vec<u8>, diagnostics: impl Into<String>) -> Self {
        Self {
            success: true,
            pdf: Some(pdf),
            diagnostics: tail_chars(&diagnostics.into(), DIAGNOSTIC_TAIL_CHARS),
        }
    }

    /// The LaTeX error lines (`! …`) with their `l.<n>` context line.
    ///
    /// Falls back to the last few diagnostic lines when no `!` line exists
    /// (timeouts, missing program).
    pub fn error_excerpt(&self) -> String {
        let lines: Vec<&str> = self.diagnostics.lines().collect();
        let mut excerpt: Vec<&str> = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if !line.starts_with('!') {
                continue;
            }
            excerpt.push(line);
            if let Some(context) = lines[i + 1..]
                .iter()
                .take(6)
                .find(|l| l.starts_with("l."))
            {
                excerpt.push(context);
            }
        }
        if excerpt.is_empty() {
            let start = lines.len().saturating_sub(5);
            return lines[start..].join("\n");
        }
        excerpt.join("\n")
    }
}

/// Turns document source into a PDF.
#[async_trait]
pub trait DocumentCompiler: Send + Sync {
    /// Compile `document`. Never errors; failures are reported in the result.
    async fn compile(&self, document: &str) -> CompileResult;
}

/// [`DocumentCompiler`] that shells out to a `pdflatex`-compatible program.
#[derive(Debug, Clone)]
pub struct LatexCompiler {
    program: String,
    timeout: Duration,
    assets: Vec<Asset>,
}

impl LatexCompiler {
    pub fn new(program: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(timeout_secs),
            assets: Vec::new(),
        }
    }

    /// Files copied next to the source in every working directory.
    pub fn with_assets(mut self, assets: Vec<Asset>) -> Self {
        self.assets = assets;
        self
    }

    async fn compile_in(&self, dir: &Path, document: &str) -> CompileResult {
        let source = dir.join(SOURCE_NAME);
        if let Err(e) = tokio::fs::write(&source, document).await {
            return CompileResult::failed(format!("Failed to write source file: {e}"));
        }
        for asset in &self.assets {
            if !is_plain_file_name(&asset.name) {
                return CompileResult::failed(format!(
                    "Refusing to stage asset '{}': not a plain file name",
                    asset.name
                ));
            }
            if let Err(e) = tokio::fs::write(dir.join(&asset.name), &asset.bytes).await {
                return CompileResult::failed(format!("Failed to stage asset '{}': {e}", asset.name));
            }
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg("-interaction=nonstopmode")
            .arg("-halt-on-error")
            .arg("-output-directory")
            .arg(dir)
            .arg(&source)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                warn!("{} timed out after {}s", self.program, self.timeout.as_secs());
                let log = read_log(dir).await;
                return CompileResult::failed(format!(
                    "Compilation timed out after {}s\n{}",
                    self.timeout.as_secs(),
                    log.unwrap_or_default()
                ));
            }
            Ok(Err(e)) => {
                return CompileResult::failed(format!("Failed to start '{}': {e}", self.program));
            }
            Ok(Ok(output)) => output,
        };

        let mut diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            diagnostics.push('\n');
            diagnostics.push_str(&stderr);
        }
        if diagnostics.trim().is_empty() {
            diagnostics = read_log(dir).await.unwrap_or_default();
        }

        if !output.status.success() {
            debug!("{} exited with {}", self.program, output.status);
            return CompileResult::failed(diagnostics);
        }

        match tokio::fs::read(dir.join(PDF_NAME)).await {
            Ok(pdf) if !pdf.is_empty() => CompileResult::succeeded(pdf, diagnostics),
            Ok(_) => CompileResult::failed(format!("Compiler produced an empty PDF\n{diagnostics}")),
            Err(_) => CompileResult::failed(format!("Compiler produced no PDF\n{diagnostics}")),
        }
    }
}

#[async_trait]
impl DocumentCompiler for LatexCompiler {
    async fn compile(&self, document: &str) -> CompileResult {
        let start = Instant::now();
        let dir = match TempDir::with_prefix("pagefit-") {
            Ok(d) => d,
            Err(e) => return CompileResult::failed(format!("Failed to create working directory: {e}")),
        };

        let result = self.compile_in(dir.path(), document).await;

        if let Err(e) = dir.close() {
            warn!("Failed to remove compile directory: {}", e);
        }

        info!(
            "Compile {} in {}ms ({} bytes PDF)",
            if result.success { "succeeded" } else { "failed" },
            start.elapsed().as_millis(),
            result.pdf.as_ref().map_or(0, |p| p.len())
        );
        result
    }
}

/// A single normal path component, so the asset lands inside the working directory.
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

async fn read_log(dir: &Path) -> Option<String> {
    tokio::fs::read(dir.join(LOG_NAME))
        .await
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Keep the last `max` characters of `s`.
pub(crate) fn tail_chars(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        return s.to_string();
    }
    s.chars().skip(count - max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_are_truncated_to_tail() {
        let long = format!("{}END", "x".repeat(DIAGNOSTIC_TAIL_CHARS + 100));
        let r = CompileResult::failed(long);
        assert_eq!(r.diagnostics.chars().count(), DIAGNOSTIC_TAIL_CHARS);
        assert!(r.diagnostics.ends_with("END"));
    }

    #[test]
    fn tail_chars_respects_char_boundaries() {
        assert_eq!(tail_chars("ééé", 2), "éé");
        assert_eq!(tail_chars("ab", 5), "ab");
    }

    #[test]
    fn error_excerpt_picks_bang_lines_with_context() {
        let r = CompileResult::failed(
            "This is pdfTeX\n(./document.tex\n! Undefined control sequence.\nl.12 \\resumeItm\n                {Built things}\n? \n",
        );
        assert_eq!(r.error_excerpt(), "! Undefined control sequence.\nl.12 \\resumeItm");
    }

    #[test]
    fn error_excerpt_falls_back_to_tail() {
        let r = CompileResult::failed("a\nb\nc\nd\ne\nf\nCompilation timed out after 60s");
        assert_eq!(r.error_excerpt(), "c\nd\ne\nf\nCompilation timed out after 60s");
    }

    #[tokio::test]
    async fn missing_program_is_reported_as_failure() {
        let compiler = LatexCompiler::new("definitely-not-a-latex-binary", 5);
        let r = compiler.compile("\\documentclass{article}").await;
        assert!(!r.success);
        assert!(r.pdf.is_none());
        assert!(r.diagnostics.contains("Failed to start"), "got: {}", r.diagnostics);
    }

    #[test]
    fn asset_names_must_stay_in_working_directory() {
        assert!(is_plain_file_name("photo.png"));
        assert!(!is_plain_file_name("../photo.png"));
        assert!(!is_plain_file_name("img/photo.png"));
        assert!(!is_plain_file_name("/tmp/photo.png"));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name(""));
    }

    #[tokio::test]
    async fn escaping_asset_is_refused_before_compiling() {
        let compiler = LatexCompiler::new("definitely-not-a-latex-binary", 5)
            .with_assets(vec![Asset::new("../escape.png", vec![0x89, b'P', b'N', b'G'])]);
        let r = compiler.compile("\\documentclass{article}").await;
        assert!(!r.success);
        assert!(r.diagnostics.contains("not a plain file name"), "got: {}", r.diagnostics);
    }
}
