//! Pipeline stages used by the page-fit convergence loop.
//!
//! Each submodule implements exactly one concern so it can be tested in
//! isolation and swapped behind its trait (compiler, metrics, oracle) without
//! touching the loop in [`crate::fit`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ oracle ──▶ decode ──▶ compile ──▶ metrics ──▶ (validate) ──▶ oracle …
//! (.tex)    (LLM)      (JSON/raw)  (pdflatex)  (poppler)   (integrity)
//! ```
//!
//! 1. [`input`]    — read the source document and assets from disk
//! 2. [`oracle`]   — role-tagged text + vision chat; the only stage with network I/O
//! 3. [`decode`]   — tolerant extraction of `(document, summary)` from a reply
//! 4. [`compile`]  — LaTeX → PDF in a throwaway directory, failures as data
//! 5. [`metrics`]  — page count, rasters, overflow and page-fill measurement
//! 6. [`encode`]   — PNG → base64 with a pixel cap, for the oracle's image inputs
//! 7. [`validate`] — reject fix candidates that silently dropped content

pub mod compile;
pub mod decode;
pub mod encode;
pub mod input;
pub mod metrics;
pub mod oracle;
pub mod validate;
