//! # epubtrans
//!
//! Turn an EPUB into a bilingual edition with a Large Language Model.
//!
//! Every translatable element keeps its original text and gains a sibling
//! holding the translation, so readers can show either language or both.
//! A stylesheet injected into each chapter controls which one is visible.
//!
//! ## Pipeline Overview
//!
//! ```text
//! book.epub
//!  │
//!  ├─ 1. Unpack     zip → directory (spawn_blocking)
//!  ├─ 2. Clean      drop empty anchors and divs
//!  ├─ 3. Mark       content-id = sha256(trimmed text) on translatable elements
//!  ├─ 4. Styling    inject the show/hide stylesheet
//!  ├─ 5. Translate  batch → rate-limited LLM call → validate → merge sibling
//!  └─ 6. Pack       directory → book-bilingual.epub (mimetype first, stored)
//! ```
//!
//! Every stage is resumable: marking skips marked elements, translation
//! only picks up `[content-id]:not([translated-by])`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use epubtrans::{translate_book, CancellationToken, TranslateConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from ANTHROPIC_API_KEY / OPENAI_API_KEY / …
//!     let config = TranslateConfig::builder()
//!         .source_lang("English")
//!         .target_lang("French")
//!         .build()?;
//!     let summary = translate_book(Path::new("book"), &config, &CancellationToken::new()).await?;
//!     eprintln!("{}/{} files translated", summary.processed, summary.total);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `epubtrans` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ```toml
//! epubtrans = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod client;
pub mod config;
pub mod dom;
pub mod epub;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod run;
pub mod upgrade;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancellationToken;
pub use client::{Completion, TranslationClient, TranslationProvider, TranslationRequest};
pub use config::{default_stage_concurrency, TranslateConfig, TranslateConfigBuilder};
pub use epub::{pack, unpack, ArchiveReport};
pub use error::{BatchError, EpubTransError, FileError, ProviderError, TranslateError};
pub use pipeline::batch::SizeMetric;
pub use pipeline::styling::HideMode;
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use prompts::PromptPreset;
pub use run::{
    clean_book, mark_book, prepare, run_stage, style_book, translate_book, FileReport, FileState,
    PrepareReport, RunSummary,
};
