//! Per-file processing stages.
//!
//! Each sub-module owns one stage:
//!
//! 1. [`clean`]     drop empty anchors and divs from raw markup
//! 2. [`mark`]      fingerprint translatable elements with `content-id`
//! 3. [`styling`]   inject the bilingual show/hide stylesheet
//! 4. [`batch`]     group untranslated units into size-bounded batches
//! 5. [`validate`]  check a returned translation against its source
//! 6. [`merge`]     split responses and insert translation siblings
//! 7. [`translate`] drive 4→6 for one file through the translation client

pub mod batch;
pub mod clean;
pub mod mark;
pub mod merge;
pub mod styling;
pub mod translate;
pub mod validate;

use crate::error::FileError;
use std::io::Write;
use std::path::Path;

/// Fingerprint of an element's trimmed text. Present ⇒ the element is marked.
pub const CONTENT_ID: &str = "content-id";
/// Set on an original once its translation sibling exists.
pub const TRANSLATED_BY: &str = "translated-by";
/// Fingerprint of the translated HTML plus target language, on the sibling.
pub const TRANSLATION_ID: &str = "translation-id";
/// Target language name, on the sibling.
pub const TRANSLATION_LANG: &str = "translation-lang";

/// Selector for units still waiting for a translation.
pub const UNTRANSLATED_SELECTOR: &str = "[content-id]:not([translated-by])";

/// Outcome of a stage that rewrites a file in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageOutcome {
    /// Whether the file was rewritten.
    pub changed: bool,
    /// Stage-specific count (elements marked, nodes removed, …).
    pub count: usize,
}

pub(crate) fn read_file(path: &Path) -> Result<String, FileError> {
    std::fs::read_to_string(path).map_err(|e| FileError::ReadFailed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Write `contents` to a temp file next to `path`, then rename over it, so a
/// crash never leaves a half-written content document behind.
pub(crate) fn write_file_atomic(path: &Path, contents: &str) -> Result<(), FileError> {
    let write_err = |detail: String| FileError::WriteFailed {
        path: path.to_path_buf(),
        detail,
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| write_err(e.to_string()))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| write_err(e.to_string()))?;
    tmp.persist(path).map_err(|e| write_err(e.error.to_string()))?;
    Ok(())
}

/// Hex SHA-256 of `bytes`.
pub(crate) fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes.as_ref()))
}
