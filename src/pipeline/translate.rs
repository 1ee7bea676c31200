//! Per-file translation driver.
//!
//! For one content document:
//!
//! ```text
//! read → parse → ensure <meta charset="utf-8">
//!      → collect [content-id]:not([translated-by]) → batch
//!      → for each batch:
//!           client.translate → split segments → validate → merge
//!           → write the document under its file lock
//! ```
//!
//! The document is written after every batch that changed it, so an
//! interrupted run keeps every merged batch. Batch-level failures are
//! recorded and the next batch proceeds; a failed write ends the file.

use super::batch::{batch_units, collect_units, count_words, Batch, SizeMetric, TokenEstimator};
use super::merge::{
    mark_identical, merge_translation, pair_segments, split_segments, write_mismatch_dump,
    FileLocks, Mismatch,
};
use super::validate::{validate_unit, UnitOutcome};
use crate::client::TranslationClient;
use crate::config::TranslateConfig;
use crate::dom::{AttrSelector, Document};
use crate::error::{BatchError, FileError, TranslateError};
use crate::progress::ProgressCallback;
use crate::prompts::SEGMENT_INSTRUCTIONS;
use crate::run::{FileReport, FileState};
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

static META_CHARSET: Lazy<AttrSelector> =
    Lazy::new(|| AttrSelector::parse("meta[charset]").unwrap());

/// Append `<meta charset="utf-8">` to `<head>` unless a UTF-8 charset
/// declaration is already present. Returns whether the document changed.
pub fn ensure_utf8_charset(doc: &mut Document) -> bool {
    let declared = doc.select(&META_CHARSET).into_iter().any(|meta| {
        doc.attr(meta, "charset")
            .is_some_and(|c| c.trim().eq_ignore_ascii_case("utf-8"))
    });
    if declared {
        return false;
    }
    let Some(head) = doc.find_element("head") else {
        return false;
    };
    let meta = doc.create_element("meta", vec![("charset".to_string(), "utf-8".to_string())]);
    doc.append_child(head, meta);
    true
}

/// What happened to one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub index: usize,
    pub units: usize,
    pub translated: usize,
    pub identical: usize,
    pub rejected: usize,
    pub errors: Vec<BatchError>,
    pub cancelled: bool,
}

impl BatchReport {
    /// Whether the document was modified by this batch.
    pub fn changed(&self) -> bool {
        self.translated + self.identical > 0
    }
}

/// Shared state for translating the files of one book.
#[derive(Clone)]
pub struct FileTranslator {
    client: Arc<TranslationClient>,
    estimator: Arc<TokenEstimator>,
    locks: FileLocks,
    state_dir: PathBuf,
    source_lang: String,
    target_lang: String,
    book_title: String,
    batch_size: usize,
    size_metric: SizeMetric,
    recount_interval: usize,
    batches_sent: Arc<AtomicUsize>,
    progress: Option<ProgressCallback>,
}

impl FileTranslator {
    pub fn new(
        client: Arc<TranslationClient>,
        config: &TranslateConfig,
        state_dir: impl Into<PathBuf>,
        book_title: impl Into<String>,
    ) -> Self {
        Self {
            client,
            estimator: Arc::new(TokenEstimator::default()),
            locks: FileLocks::new(),
            state_dir: state_dir.into(),
            source_lang: config.source_lang.clone(),
            target_lang: config.target_lang.clone(),
            book_title: book_title.into(),
            batch_size: config.batch_size,
            size_metric: config.size_metric,
            recount_interval: config.token_recount_interval,
            batches_sent: Arc::new(AtomicUsize::new(0)),
            progress: config.progress_callback.clone(),
        }
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Translate every pending unit of one file.
    pub async fn translate_file(&self, path: &Path) -> FileReport {
        let start = Instant::now();
        let mut report = FileReport::new(path);

        let html = match tokio::fs::read_to_string(path).await {
            Ok(html) => html,
            Err(e) => {
                report.fail(FileError::ReadFailed {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                });
                report.duration_ms = start.elapsed().as_millis() as u64;
                return report;
            }
        };
        let mut doc = Document::parse(&html);
        let mut dirty = ensure_utf8_charset(&mut doc);
        report.state = FileState::Marked;

        let units = collect_units(&doc, self.size_metric, &self.estimator);
        report.count = units.len();
        let batches = batch_units(units, self.batch_size);
        report.batches = batches.len();
        report.state = FileState::Batched;

        if batches.is_empty() {
            debug!("{}: nothing left to translate", path.display());
            if dirty {
                if let Err(e) = self.locks.write(path, doc.to_html()).await {
                    warn!("{}", e);
                    report.fail(e);
                    report.duration_ms = start.elapsed().as_millis() as u64;
                    return report;
                }
                report.changed = true;
            }
            report.state = FileState::Skipped;
            report.duration_ms = start.elapsed().as_millis() as u64;
            return report;
        }

        report.state = FileState::Translating;
        let total_batches = batches.len();
        info!(
            "{}: {} units in {} batches",
            path.display(),
            report.count,
            total_batches
        );

        for batch in &batches {
            if self.client.cancellation().is_cancelled() {
                report.cancelled = true;
                break;
            }
            let outcome = self.translate_batch(path, &mut doc, batch).await;
            dirty |= outcome.changed();
            let cancelled = outcome.cancelled;
            report.absorb(outcome);

            if dirty {
                if let Err(e) = self.locks.write(path, doc.to_html()).await {
                    warn!("{}", e);
                    report.fail(e);
                    report.duration_ms = start.elapsed().as_millis() as u64;
                    return report;
                }
                dirty = false;
                report.changed = true;
            }
            if let Some(cb) = &self.progress {
                cb.on_batch_complete(path, batch.index + 1, total_batches);
            }
            if cancelled {
                report.cancelled = true;
                break;
            }
        }

        report.finish();
        report.duration_ms = start.elapsed().as_millis() as u64;
        report
    }

    async fn translate_batch(&self, path: &Path, doc: &mut Document, batch: &Batch) -> BatchReport {
        let mut report = BatchReport {
            index: batch.index,
            units: batch.units.len(),
            ..Default::default()
        };
        let request = batch.render();
        self.maybe_recount(&request).await;

        let response = match self
            .client
            .translate(
                SEGMENT_INSTRUCTIONS,
                &request,
                &self.source_lang,
                &self.target_lang,
                &self.book_title,
            )
            .await
        {
            Ok(response) => response,
            Err(TranslateError::Cancelled) => {
                report.cancelled = true;
                return report;
            }
            Err(e) => {
                warn!("{} batch {}: {}", path.display(), batch.index, e);
                report.errors.push(BatchError::TranslationFailed {
                    path: path.to_path_buf(),
                    batch: batch.index,
                    detail: e.to_string(),
                });
                return report;
            }
        };

        let segments = split_segments(&response);
        let received = segments.len();
        let expected = batch.units.len();
        let (pairs, mismatch) = pair_segments(segments, expected);
        if mismatch {
            warn!(
                "{} batch {}: expected {} segments, received {}",
                path.display(),
                batch.index,
                expected,
                received
            );
            if let Some(dump) = write_mismatch_dump(
                &self.state_dir,
                Mismatch {
                    file: path,
                    batch: batch.index,
                    expected,
                    received,
                    request: &request,
                    response: &response,
                },
            )
            .await
            {
                debug!("Mismatch dump written to {}", dump.display());
            }
            report.errors.push(BatchError::SegmentMismatch {
                path: path.to_path_buf(),
                batch: batch.index,
                expected,
                received,
            });
        }

        for (i, translated) in pairs {
            let unit = &batch.units[i];
            match validate_unit(&unit.html, &translated) {
                UnitOutcome::Accepted => {
                    if merge_translation(doc, unit.node, &translated, &self.target_lang).is_some() {
                        report.translated += 1;
                    }
                }
                UnitOutcome::Identical => {
                    mark_identical(doc, unit.node, &self.target_lang);
                    report.identical += 1;
                }
                UnitOutcome::Rejected(reason) => {
                    debug!("{}: unit {} rejected: {}", path.display(), unit.content_id, reason);
                    report.rejected += 1;
                    report.errors.push(BatchError::UnitRejected {
                        path: path.to_path_buf(),
                        content_id: unit.content_id.clone(),
                        reason: reason.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Every `recount_interval` batches, ask the provider for a real token
    /// count and fold it into the estimator.
    async fn maybe_recount(&self, request: &str) {
        if self.recount_interval == 0 {
            return;
        }
        let n = self.batches_sent.fetch_add(1, Ordering::SeqCst);
        if n % self.recount_interval != 0 {
            return;
        }
        match self.client.count_tokens(request).await {
            Ok(tokens) => {
                self.estimator.observe(count_words(request), tokens);
                debug!(
                    "Token recount: {} tokens, ratio now {:.2}",
                    tokens,
                    self.estimator.ratio()
                );
            }
            Err(e) => debug!("Token recount skipped: {}", e),
        }
    }
}
