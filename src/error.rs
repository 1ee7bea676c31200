//! Error types for the epubtrans library.
//!
//! Errors are layered the same way the pipeline is:
//!
//! * [`EpubTransError`]: **Fatal**: the run cannot proceed at all (no
//!   container file, unreadable package document, provider not configured).
//!   Returned as `Err(EpubTransError)` from the top-level entry points.
//!
//! * [`FileError`]: **Non-fatal, per file**: one content document could not
//!   be read, parsed or written. Stored in [`crate::run::FileReport`]; every
//!   other file is still processed.
//!
//! * [`BatchError`]: **Non-fatal, per batch**: a translation call failed
//!   after all retries, the response did not echo every segment, or a unit
//!   was rejected by validation. The file keeps whatever progress was made.
//!
//! * [`TranslateError`] / [`ProviderError`]: outcomes at the translation
//!   client and provider boundaries. No raw provider error escapes the
//!   client; everything is classified into one of these variants.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the epubtrans library.
#[derive(Debug, Error)]
pub enum EpubTransError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The given path does not exist.
    #[error("Path not found: '{path}'")]
    PathNotFound { path: PathBuf },

    /// An unpacked book must be a directory.
    #[error("'{path}' is not a directory.\nRun `epubtrans unpack <book.epub>` first.")]
    NotADirectory { path: PathBuf },

    /// `META-INF/container.xml` is missing or cannot be read.
    #[error("Cannot read container file '{path}': {detail}")]
    ContainerUnreadable { path: PathBuf, detail: String },

    /// `container.xml` exists but names no package document.
    #[error("Container file '{path}' is invalid: {detail}")]
    ContainerInvalid { path: PathBuf, detail: String },

    /// The OPF package document is missing or cannot be read.
    #[error("Cannot read package document '{path}': {detail}")]
    PackageUnreadable { path: PathBuf, detail: String },

    /// The OPF package document is malformed.
    #[error("Package document '{path}' is invalid: {detail}")]
    PackageInvalid { path: PathBuf, detail: String },

    /// The package lists no content documents the stage could work on.
    #[error("No content documents to process in '{path}'")]
    NoContentFiles { path: PathBuf },

    // ── Archive errors ────────────────────────────────────────────────────
    /// Zip extraction or creation failed.
    #[error("Archive error for '{path}': {detail}")]
    Archive { path: PathBuf, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Upgrade errors ────────────────────────────────────────────────────
    /// Checking or downloading a release failed.
    #[error("Upgrade failed: {0}")]
    UpgradeFailed(String),

    /// The downloaded asset does not match its published checksum.
    #[error("Checksum mismatch for '{asset}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        asset: String,
        expected: String,
        actual: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing a file outside the per-file pipeline failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The run was interrupted before it could start any work.
    #[error("Operation cancelled")]
    Cancelled,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EpubTransError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EpubTransError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single content document.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum FileError {
    /// The file could not be read.
    #[error("{path}: read failed: {detail}")]
    ReadFailed { path: PathBuf, detail: String },

    /// The file could not be written back.
    #[error("{path}: write failed: {detail}")]
    WriteFailed { path: PathBuf, detail: String },

    /// The worker task processing the file panicked or was aborted.
    #[error("{path}: worker failed: {detail}")]
    WorkerFailed { path: PathBuf, detail: String },
}

/// A non-fatal error for a single batch (or a single unit inside it).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum BatchError {
    /// The translation call failed after every retry.
    #[error("{path} batch {batch}: translation failed: {detail}")]
    TranslationFailed {
        path: PathBuf,
        batch: usize,
        detail: String,
    },

    /// The response did not contain exactly one segment per unit.
    #[error("{path} batch {batch}: expected {expected} segments, received {received}")]
    SegmentMismatch {
        path: PathBuf,
        batch: usize,
        expected: usize,
        received: usize,
    },

    /// A unit's translation failed validation and was not merged.
    #[error("{path}: unit {content_id} rejected: {reason}")]
    UnitRejected {
        path: PathBuf,
        content_id: String,
        reason: String,
    },
}

/// Outcome of a failed call through [`crate::client::TranslationClient`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranslateError {
    /// The provider kept throttling us until retries ran out.
    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    /// Network failure, malformed or empty response, after retries.
    #[error("Translation failed after {attempts} attempts: {detail}")]
    Failed { attempts: u32, detail: String },

    /// The run was cancelled while waiting or calling.
    #[error("Translation cancelled")]
    Cancelled,
}

/// Error reported by a [`crate::client::TranslationProvider`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// HTTP 429 or an equivalent throttling signal.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

impl ProviderError {
    /// Classify a raw HTTP error message, as returned by endpoints called
    /// without an edgequake-llm provider (token counting). Throttling shows
    /// up as a status code or as "rate limit", "too many requests" or
    /// "overloaded" in the body.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("ratelimit")
            || lower.contains("rate_limit")
            || lower.contains("too many requests")
            || lower.contains("overloaded")
        {
            ProviderError::RateLimited(message)
        } else {
            ProviderError::Failed(message)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_a_directory_display_mentions_unpack() {
        let e = EpubTransError::NotADirectory {
            path: PathBuf::from("book.epub"),
        };
        let msg = e.to_string();
        assert!(msg.contains("book.epub"), "got: {msg}");
        assert!(msg.contains("unpack"), "got: {msg}");
    }

    #[test]
    fn segment_mismatch_display() {
        let e = BatchError::SegmentMismatch {
            path: PathBuf::from("ch1.xhtml"),
            batch: 2,
            expected: 3,
            received: 2,
        };
        let msg = e.to_string();
        assert!(msg.contains("expected 3"), "got: {msg}");
        assert!(msg.contains("received 2"), "got: {msg}");
    }

    #[test]
    fn classify_rate_limit_messages() {
        assert!(ProviderError::classify("HTTP 429 Too Many Requests").is_rate_limited());
        assert!(ProviderError::classify("Rate limit exceeded for model").is_rate_limited());
        assert!(ProviderError::classify("overloaded_error").is_rate_limited());
        assert!(!ProviderError::classify("connection reset by peer").is_rate_limited());
    }

    #[test]
    fn translate_error_display() {
        let e = TranslateError::Failed {
            attempts: 3,
            detail: "empty response".into(),
        };
        assert!(e.to_string().contains("3 attempts"));
        assert!(e.to_string().contains("empty response"));
    }
}
