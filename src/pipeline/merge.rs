//! Response splitting and write-back.
//!
//! A batch response is expected to echo one `<SEGMENT_i>…</SEGMENT_i>` block
//! per unit. Blocks are paired with units by index; a count mismatch keeps
//! whatever pairs and leaves a diagnostic dump in the book's state
//! directory.

use super::{
    sha256_hex, write_file_atomic, CONTENT_ID, TRANSLATED_BY, TRANSLATION_ID, TRANSLATION_LANG,
};
use crate::dom::{Document, NodeId};
use crate::error::FileError;
use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

static RE_SEGMENT_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<SEGMENT_(\d+)>").unwrap());

/// Split a response into `index → translated HTML`.
///
/// Blocks without a matching close marker (typically a truncated response)
/// are dropped. When an index repeats, the first block wins.
pub fn split_segments(response: &str) -> BTreeMap<usize, String> {
    let mut segments = BTreeMap::new();
    let mut cursor = 0;

    while let Some(caps) = RE_SEGMENT_OPEN.captures_at(response, cursor) {
        let (Some(open), Some(digits)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        cursor = open.end();
        let Ok(index) = digits.as_str().parse::<usize>() else {
            continue;
        };
        let close = format!("</SEGMENT_{index}>");
        let Some(len) = response[open.end()..].find(&close) else {
            continue;
        };
        let body = response[open.end()..open.end() + len].trim().to_string();
        segments.entry(index).or_insert(body);
        cursor = open.end() + len + close.len();
    }
    segments
}

/// Pairs of `(unit index, translation)` for `expected` units, plus whether
/// the response deviated from one-segment-per-unit.
pub fn pair_segments(
    segments: BTreeMap<usize, String>,
    expected: usize,
) -> (Vec<(usize, String)>, bool) {
    let received = segments.len();
    let pairs: Vec<_> = segments.into_iter().filter(|(i, _)| *i < expected).collect();
    let mismatch = received != expected || pairs.len() != expected;
    (pairs, mismatch)
}

/// `translation-id` value.
pub fn translation_id(translated_html: &str, target_lang: &str) -> String {
    sha256_hex(format!("{translated_html}{target_lang}"))
}

/// Insert a translated copy of `original` right after it.
///
/// The copy loses `content-id` and gains `translation-id` and
/// `translation-lang`; the original gains `translated-by`. Returns the new
/// sibling, or `None` when `original` is detached.
pub fn merge_translation(
    doc: &mut Document,
    original: NodeId,
    translated_html: &str,
    target_lang: &str,
) -> Option<NodeId> {
    doc.parent(original)?;
    let id = translation_id(translated_html, target_lang);

    let sibling = doc.clone_subtree(original);
    doc.remove_attr(sibling, CONTENT_ID);
    doc.set_inner_html(sibling, translated_html);
    doc.set_attr(sibling, TRANSLATION_ID, id.as_str());
    doc.set_attr(sibling, TRANSLATION_LANG, target_lang);

    doc.set_attr(original, TRANSLATED_BY, id);
    doc.insert_after(original, sibling);
    Some(sibling)
}

/// Close out a unit whose translation equals its source: it points at itself
/// and is never selected again.
pub fn mark_identical(doc: &mut Document, original: NodeId, target_lang: &str) {
    let own = doc.attr(original, CONTENT_ID).unwrap_or_default().to_string();
    doc.set_attr(original, TRANSLATED_BY, own);
    doc.set_attr(original, TRANSLATION_LANG, target_lang);
}

// ── File locks ───────────────────────────────────────────────────────────────

/// One async mutex per content file, created on first use.
///
/// Held only for the duration of a single write.
#[derive(Debug, Clone, Default)]
pub struct FileLocks {
    locks: Arc<DashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Atomically replace `path` with `contents` while holding its lock.
    pub async fn write(&self, path: &Path, contents: String) -> Result<(), FileError> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        let target = path.to_path_buf();
        tokio::task::spawn_blocking(move || write_file_atomic(&target, &contents))
            .await
            .map_err(|e| FileError::WriteFailed {
                path: path.to_path_buf(),
                detail: format!("write task panicked: {e}"),
            })??;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

// ── Diagnostic dumps ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MismatchDump<'a> {
    timestamp: String,
    file: &'a Path,
    batch: usize,
    expected: usize,
    received: usize,
    request: &'a str,
    response: &'a str,
}

/// Details of a segment-count mismatch, written to `<state>/dumps/`.
#[derive(Debug, Clone, Copy)]
pub struct Mismatch<'a> {
    pub file: &'a Path,
    pub batch: usize,
    pub expected: usize,
    pub received: usize,
    pub request: &'a str,
    pub response: &'a str,
}

/// Write a mismatch dump. Failures are logged and yield `None`; a dump must
/// never affect content files.
pub async fn write_mismatch_dump(state_dir: &Path, mismatch: Mismatch<'_>) -> Option<PathBuf> {
    let now = Utc::now();
    let stem = mismatch
        .file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let dir = state_dir.join("dumps");
    let path = dir.join(format!(
        "{stem}-batch{}-{}.json",
        mismatch.batch,
        now.format("%Y%m%dT%H%M%S%.3f")
    ));

    let dump = MismatchDump {
        timestamp: now.to_rfc3339(),
        file: mismatch.file,
        batch: mismatch.batch,
        expected: mismatch.expected,
        received: mismatch.received,
        request: mismatch.request,
        response: mismatch.response,
    };
    let body = match serde_json::to_string_pretty(&dump) {
        Ok(body) => body,
        Err(e) => {
            warn!("Could not serialise mismatch dump: {}", e);
            return None;
        }
    };
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        warn!("Could not create dump directory {}: {}", dir.display(), e);
        return None;
    }
    match tokio::fs::write(&path, body).await {
        Ok(()) => Some(path),
        Err(e) => {
            warn!("Could not write dump {}: {}", path.display(), e);
            None
        }
    }
}
