//! Input loading: read the résumé source and its ancillary assets from disk.
//!
//! Errors are mapped to the same user-facing variants regardless of which
//! file failed, so the CLI can print a useful hint (missing file vs. missing
//! permission) without inspecting `io::ErrorKind` itself.

use crate::error::FitError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A file staged next to the document in every compile directory
/// (logos, headshots, custom `.cls`/`.sty` files).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// File name inside the compile directory.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Asset {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Read a LaTeX document, rejecting empty files.
pub async fn load_document(path: impl AsRef<Path>) -> Result<String, FitError> {
    let path = path.as_ref();
    let bytes = read_file(path).await?;
    let text = String::from_utf8(bytes).map_err(|_| FitError::InvalidInput {
        field: "document",
        reason: format!("'{}' is not valid UTF-8", path.display()),
    })?;
    if text.trim().is_empty() {
        return Err(FitError::InvalidInput {
            field: "document",
            reason: format!("'{}' is empty", path.display()),
        });
    }
    debug!("Loaded document {} ({} bytes)", path.display(), text.len());
    Ok(text)
}

/// Read an asset; its compile-directory name is the file name of `path`.
pub async fn load_asset(path: impl AsRef<Path>) -> Result<Asset, FitError> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| FitError::InvalidInput {
            field: "asset",
            reason: format!("'{}' has no file name", path.display()),
        })?;
    let bytes = read_file(path).await?;
    debug!("Loaded asset {} ({} bytes)", name, bytes.len());
    Ok(Asset::new(name, bytes))
}

pub(crate) async fn read_file(path: &Path) -> Result<Vec<u8>, FitError> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => FitError::PermissionDenied {
            path: PathBuf::from(path),
        },
        _ => FitError::FileNotFound {
            path: PathBuf::from(path),
        },
    })
}
