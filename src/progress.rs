//! Progress-callback trait for per-file pipeline events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::TranslateConfigBuilder::progress_callback`] (translate)
//! or pass one to [`crate::run::run_stage`] (clean, mark, styling). Files may
//! complete out of order when a stage runs with more than one worker, so
//! implementations must synchronise their own state.

use std::path::Path;
use std::sync::Arc;

/// Called by the orchestrator as it processes each content document.
///
/// All methods have default no-op implementations.
pub trait RunProgressCallback: Send + Sync {
    /// Called once before the first file, with the stage name ("mark",
    /// "translate", …) and the number of files.
    fn on_run_start(&self, stage: &str, total_files: usize) {
        let _ = (stage, total_files);
    }

    /// Called when a worker picks up a file. `index` is 1-based.
    fn on_file_start(&self, index: usize, total_files: usize, path: &Path) {
        let _ = (index, total_files, path);
    }

    /// Called after each translated batch of a file.
    fn on_batch_complete(&self, path: &Path, batch: usize, total_batches: usize) {
        let _ = (path, batch, total_batches);
    }

    /// Called when a file finished. `detail` is a short human summary such
    /// as "12 units translated" or "3 marked".
    fn on_file_complete(&self, index: usize, total_files: usize, path: &Path, detail: &str) {
        let _ = (index, total_files, path, detail);
    }

    /// Called when a file failed or finished with errors.
    fn on_file_error(&self, index: usize, total_files: usize, path: &Path, error: &str) {
        let _ = (index, total_files, path, error);
    }

    /// Called once after every file has been attempted.
    fn on_run_complete(&self, total_files: usize, succeeded: usize) {
        let _ = (total_files, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::TranslateConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        files: AtomicUsize,
        batches: AtomicUsize,
        errors: AtomicUsize,
        succeeded: AtomicUsize,
    }

    impl RunProgressCallback for Counting {
        fn on_file_complete(&self, _i: usize, _t: usize, _p: &Path, _d: &str) {
            self.files.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _p: &Path, _b: usize, _t: usize) {
            self.batches.fetch_add(1, Ordering::SeqCst);
        }

        fn on_file_error(&self, _i: usize, _t: usize, _p: &Path, _e: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_run_complete(&self, _total: usize, succeeded: usize) {
            self.succeeded.store(succeeded, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start("mark", 2);
        cb.on_file_start(1, 2, Path::new("a.xhtml"));
        cb.on_batch_complete(Path::new("a.xhtml"), 1, 1);
        cb.on_file_complete(1, 2, Path::new("a.xhtml"), "3 marked");
        cb.on_file_error(2, 2, Path::new("b.xhtml"), "read failed");
        cb.on_run_complete(2, 1);
    }

    #[test]
    fn arc_dyn_callback_receives_events() {
        let counting = Arc::new(Counting::default());
        let cb: ProgressCallback = counting.clone();
        cb.on_batch_complete(Path::new("a.xhtml"), 1, 2);
        cb.on_batch_complete(Path::new("a.xhtml"), 2, 2);
        cb.on_file_complete(1, 2, Path::new("a.xhtml"), "");
        cb.on_file_error(2, 2, Path::new("b.xhtml"), "boom");
        cb.on_run_complete(2, 1);
        assert_eq!(counting.batches.load(Ordering::SeqCst), 2);
        assert_eq!(counting.files.load(Ordering::SeqCst), 1);
        assert_eq!(counting.errors.load(Ordering::SeqCst), 1);
        assert_eq!(counting.succeeded.load(Ordering::SeqCst), 1);
    }
}
