//! Book-level orchestration.
//!
//! Every stage runs the same way: enumerate the content documents, push
//! them through a bounded worker pool, collect one [`FileReport`] per file
//! and fold them into a [`RunSummary`]. Per-file failures never abort the
//! run. Cancellation stops new files from starting; in-flight files finish
//! their current batch and flush before returning.

use crate::cancel::CancellationToken;
use crate::client::{resolve_provider, RetryPolicy, TranslationClient, UsageRecorder};
use crate::config::TranslateConfig;
use crate::epub::{self, enumerate_content_files, ArchiveReport, ContentFilter, ContentJob};
use crate::error::{BatchError, EpubTransError, FileError};
use crate::pipeline::translate::{BatchReport, FileTranslator};
use crate::pipeline::{clean, mark, styling, StageOutcome};
use crate::pipeline::styling::HideMode;
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

// ── Reports ──────────────────────────────────────────────────────────────

/// Where a file is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Pending,
    Enumerated,
    Marked,
    Batched,
    Translating,
    /// Every attempted batch merged; units may remain after a cancel.
    Merged,
    /// Some batches or units failed; the rest were written.
    PartialFailure,
    Failed,
    /// Nothing to do.
    Skipped,
    Done,
}

/// Outcome of one content document.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub state: FileState,
    /// Stage-specific count: units found (translate), elements marked,
    /// nodes removed, …
    pub count: usize,
    pub batches: usize,
    pub translated: usize,
    pub identical: usize,
    pub rejected: usize,
    /// The file was rewritten on disk.
    pub changed: bool,
    pub batch_errors: Vec<BatchError>,
    pub error: Option<FileError>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl FileReport {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            state: FileState::Enumerated,
            count: 0,
            batches: 0,
            translated: 0,
            identical: 0,
            rejected: 0,
            changed: false,
            batch_errors: Vec::new(),
            error: None,
            cancelled: false,
            duration_ms: 0,
        }
    }

    pub(crate) fn fail(&mut self, error: FileError) {
        self.state = FileState::Failed;
        self.error = Some(error);
    }

    pub(crate) fn absorb(&mut self, batch: BatchReport) {
        self.translated += batch.translated;
        self.identical += batch.identical;
        self.rejected += batch.rejected;
        self.batch_errors.extend(batch.errors);
    }

    /// Settle the final state after the last batch.
    pub(crate) fn finish(&mut self) {
        if self.state == FileState::Failed {
            return;
        }
        self.state = if !self.batch_errors.is_empty() {
            FileState::PartialFailure
        } else if self.cancelled {
            FileState::Merged
        } else {
            FileState::Done
        };
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.state,
            FileState::Done | FileState::Skipped | FileState::Merged
        )
    }

    /// Short human summary for progress output.
    pub fn detail(&self) -> String {
        if self.translated + self.identical + self.rejected > 0 || self.batches > 0 {
            let mut s = format!("{} units translated", self.translated);
            if self.identical > 0 {
                s.push_str(&format!(", {} unchanged", self.identical));
            }
            if self.rejected > 0 {
                s.push_str(&format!(", {} rejected", self.rejected));
            }
            s
        } else if self.changed {
            format!("{} updated", self.count)
        } else {
            "unchanged".to_string()
        }
    }

    /// First error worth surfacing, if any.
    pub fn error_message(&self) -> Option<String> {
        if let Some(e) = &self.error {
            return Some(e.to_string());
        }
        match self.batch_errors.len() {
            0 => None,
            1 => Some(self.batch_errors[0].to_string()),
            n => Some(format!("{} (and {} more)", self.batch_errors[0], n - 1)),
        }
    }
}

/// Aggregate of one stage over a book.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub stage: String,
    pub total: usize,
    /// Files that completed without error.
    pub processed: usize,
    pub partial: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Files rewritten on disk.
    pub changed: usize,
    pub cancelled: bool,
    pub files: Vec<FileReport>,
    pub duration_ms: u64,
}

impl RunSummary {
    fn from_reports(
        stage: &str,
        mut files: Vec<FileReport>,
        cancelled: bool,
        started: Instant,
    ) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let count = |s: FileState| files.iter().filter(|f| f.state == s).count();
        let processed = count(FileState::Done) + count(FileState::Merged);
        let partial = count(FileState::PartialFailure);
        let skipped = count(FileState::Skipped) + count(FileState::Pending);
        let failed = count(FileState::Failed);
        let changed = files.iter().filter(|f| f.changed).count();
        Self {
            stage: stage.to_string(),
            total: files.len(),
            processed,
            partial,
            skipped,
            failed,
            changed,
            cancelled,
            files,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// True when no file failed outright.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.partial == 0
    }
}

// ── CPU-bound stages ─────────────────────────────────────────────────────

/// Run a synchronous per-file stage over every content document.
///
/// `op` runs on the blocking pool, up to `concurrency` files at a time.
pub async fn run_stage<F>(
    stage: &str,
    book_root: &Path,
    filter: ContentFilter,
    concurrency: usize,
    cancel: &CancellationToken,
    progress: Option<ProgressCallback>,
    op: F,
) -> Result<RunSummary, EpubTransError>
where
    F: Fn(&Path) -> Result<StageOutcome, FileError> + Clone + Send + Sync + 'static,
{
    let started = Instant::now();
    let book = enumerate_content_files(book_root, filter)?;
    if book.jobs.is_empty() {
        return Err(EpubTransError::NoContentFiles {
            path: book_root.to_path_buf(),
        });
    }
    let total = book.jobs.len();
    if let Some(cb) = &progress {
        cb.on_run_start(stage, total);
    }
    info!("{}: {} files, {} workers", stage, total, concurrency.max(1));

    let reports: Vec<FileReport> = stream::iter(book.jobs.into_iter().map(|job| {
        let op = op.clone();
        let progress = progress.clone();
        let cancel = cancel.clone();
        async move {
            if cancel.is_cancelled() {
                return pending_report(&job);
            }
            if let Some(cb) = &progress {
                cb.on_file_start(job.index + 1, total, &job.path);
            }
            let start = Instant::now();
            let path = job.path.clone();
            let joined = tokio::task::spawn_blocking(move || op(&path)).await;
            let mut report = FileReport::new(&job.path);
            match joined {
                Ok(Ok(outcome)) => {
                    report.count = outcome.count;
                    report.changed = outcome.changed;
                    report.state = if outcome.changed {
                        FileState::Done
                    } else {
                        FileState::Skipped
                    };
                }
                Ok(Err(e)) => report.fail(e),
                Err(e) => report.fail(FileError::WorkerFailed {
                    path: job.path.clone(),
                    detail: e.to_string(),
                }),
            }
            report.duration_ms = start.elapsed().as_millis() as u64;
            notify_file(&progress, job.index + 1, total, &report);
            report
        }
    }))
    .buffer_unordered(concurrency.max(1))
    .collect()
    .await;

    let summary = RunSummary::from_reports(stage, reports, cancel.is_cancelled(), started);
    finish_run(&progress, &summary);
    Ok(summary)
}

fn pending_report(job: &ContentJob) -> FileReport {
    let mut report = FileReport::new(&job.path);
    report.state = FileState::Pending;
    report.cancelled = true;
    report
}

fn notify_file(progress: &Option<ProgressCallback>, index: usize, total: usize, report: &FileReport) {
    let Some(cb) = progress else { return };
    match report.error_message() {
        Some(e) => {
            warn!("{}", e);
            cb.on_file_error(index, total, &report.path, &e);
        }
        None => cb.on_file_complete(index, total, &report.path, &report.detail()),
    }
}

fn finish_run(progress: &Option<ProgressCallback>, summary: &RunSummary) {
    info!(
        "{}: {}/{} processed, {} partial, {} skipped, {} failed in {}ms",
        summary.stage,
        summary.processed,
        summary.total,
        summary.partial,
        summary.skipped,
        summary.failed,
        summary.duration_ms
    );
    if let Some(cb) = progress {
        cb.on_run_complete(summary.total, summary.processed + summary.skipped);
    }
}

/// Remove empty anchors and divs from every content document.
pub async fn clean_book(
    book_root: &Path,
    concurrency: usize,
    cancel: &CancellationToken,
    progress: Option<ProgressCallback>,
) -> Result<RunSummary, EpubTransError> {
    run_stage(
        "clean",
        book_root,
        ContentFilter::All,
        concurrency,
        cancel,
        progress,
        clean::clean_file,
    )
    .await
}

/// Add `content-id` to every translatable element.
pub async fn mark_book(
    book_root: &Path,
    concurrency: usize,
    cancel: &CancellationToken,
    progress: Option<ProgressCallback>,
) -> Result<RunSummary, EpubTransError> {
    run_stage(
        "mark",
        book_root,
        ContentFilter::All,
        concurrency,
        cancel,
        progress,
        mark::mark_file,
    )
    .await
}

/// Inject the show/hide stylesheet into every content document.
pub async fn style_book(
    book_root: &Path,
    hide: HideMode,
    concurrency: usize,
    cancel: &CancellationToken,
    progress: Option<ProgressCallback>,
) -> Result<RunSummary, EpubTransError> {
    run_stage(
        "styling",
        book_root,
        ContentFilter::All,
        concurrency,
        cancel,
        progress,
        move |path: &Path| styling::style_file(path, hide),
    )
    .await
}

// ── Translate ────────────────────────────────────────────────────────────

/// Translate every pending unit of an unpacked, marked book.
pub async fn translate_book(
    book_root: &Path,
    config: &TranslateConfig,
    cancel: &CancellationToken,
) -> Result<RunSummary, EpubTransError> {
    let started = Instant::now();
    let book = enumerate_content_files(book_root, ContentFilter::Translatable)?;
    if book.jobs.is_empty() {
        return Err(EpubTransError::NoContentFiles {
            path: book_root.to_path_buf(),
        });
    }
    let provider = resolve_provider(config)?;
    info!(
        "Translating {} → {} with {} ({})",
        config.source_lang,
        config.target_lang,
        provider.name(),
        provider.model()
    );

    let state_dir = epub::state_dir(book_root);
    let mut builder = TranslationClient::builder(provider)
        .rate_limit(config.requests_per_minute, config.burst)
        .retry(RetryPolicy::new(config.max_attempts, config.retry_backoff()))
        .cache(config.cache_capacity, config.cache_ttl())
        .cancellation(cancel.clone())
        .prompt(config.prompt.clone())
        .temperature(config.temperature)
        .max_tokens(config.max_tokens);
    if config.record_usage {
        builder = builder.usage(Arc::new(UsageRecorder::load(&state_dir).await));
    }
    let client = Arc::new(builder.build());

    let title = book.title().unwrap_or_default().to_string();
    let translator = FileTranslator::new(client, config, state_dir, title);
    let total = book.jobs.len();
    let progress = config.progress_callback.clone();
    if let Some(cb) = &progress {
        cb.on_run_start("translate", total);
    }

    let reports: Vec<FileReport> = stream::iter(book.jobs.into_iter().map(|job| {
        let translator = translator.clone();
        let progress = progress.clone();
        let cancel = cancel.clone();
        async move {
            if cancel.is_cancelled() {
                return pending_report(&job);
            }
            if let Some(cb) = &progress {
                cb.on_file_start(job.index + 1, total, &job.path);
            }
            let report = translator.translate_file(&job.path).await;
            notify_file(&progress, job.index + 1, total, &report);
            report
        }
    }))
    .buffer_unordered(config.concurrency.max(1))
    .collect()
    .await;

    let summary = RunSummary::from_reports("translate", reports, cancel.is_cancelled(), started);
    finish_run(&progress, &summary);
    Ok(summary)
}

// ── Prepare ──────────────────────────────────────────────────────────────

/// Everything `prepare` did.
#[derive(Debug, Clone, Serialize)]
pub struct PrepareReport {
    pub book_dir: PathBuf,
    pub unpack: ArchiveReport,
    pub clean: RunSummary,
    pub mark: RunSummary,
    pub styling: RunSummary,
}

/// Unpack an `.epub`, then clean, mark and style it.
pub async fn prepare(
    epub_path: &Path,
    hide: HideMode,
    concurrency: usize,
    cancel: &CancellationToken,
    progress: Option<ProgressCallback>,
) -> Result<PrepareReport, EpubTransError> {
    let book_dir = epub::unpack_destination(epub_path);
    let unpack = epub::unpack(epub_path, &book_dir).await?;
    if cancel.is_cancelled() {
        return Err(EpubTransError::Cancelled);
    }
    let clean = clean_book(&book_dir, concurrency, cancel, progress.clone()).await?;
    if cancel.is_cancelled() {
        return Err(EpubTransError::Cancelled);
    }
    let mark = mark_book(&book_dir, concurrency, cancel, progress.clone()).await?;
    if cancel.is_cancelled() {
        return Err(EpubTransError::Cancelled);
    }
    let styling = style_book(&book_dir, hide, concurrency, cancel, progress).await?;
    info!("Prepared EPUB at {}", book_dir.display());
    Ok(PrepareReport {
        book_dir,
        unpack,
        clean,
        mark,
        styling,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_settles_state() {
        let mut r = FileReport::new(Path::new("a.xhtml"));
        r.finish();
        assert_eq!(r.state, FileState::Done);

        let mut r = FileReport::new(Path::new("a.xhtml"));
        r.cancelled = true;
        r.finish();
        assert_eq!(r.state, FileState::Merged);

        let mut r = FileReport::new(Path::new("a.xhtml"));
        r.absorb(BatchReport {
            translated: 2,
            errors: vec![BatchError::SegmentMismatch {
                path: PathBuf::from("a.xhtml"),
                batch: 0,
                expected: 3,
                received: 2,
            }],
            ..Default::default()
        });
        r.finish();
        assert_eq!(r.state, FileState::PartialFailure);
        assert_eq!(r.translated, 2);
        assert!(r.error_message().unwrap().contains("expected 3"));
    }

    #[test]
    fn failed_state_is_sticky() {
        let mut r = FileReport::new(Path::new("a.xhtml"));
        r.fail(FileError::WriteFailed {
            path: PathBuf::from("a.xhtml"),
            detail: "disk full".into(),
        });
        r.finish();
        assert_eq!(r.state, FileState::Failed);
        assert!(!r.is_success());
    }

    #[test]
    fn summary_counts_by_state() {
        let mk = |name: &str, state: FileState| {
            let mut r = FileReport::new(Path::new(name));
            r.state = state;
            r
        };
        let summary = RunSummary::from_reports(
            "translate",
            vec![
                mk("c.xhtml", FileState::Failed),
                mk("a.xhtml", FileState::Done),
                mk("b.xhtml", FileState::PartialFailure),
                mk("d.xhtml", FileState::Skipped),
            ],
            false,
            Instant::now(),
        );
        assert_eq!(summary.total, 4);
        assert_eq!(
            (summary.processed, summary.partial, summary.skipped, summary.failed),
            (1, 1, 1, 1)
        );
        assert_eq!(summary.files[0].path, PathBuf::from("a.xhtml"));
        assert!(!summary.is_clean());
    }
}
