//! Usage metadata and audit log side files.
//!
//! Both live in the book's state directory:
//!
//! * `usage.json`: call counts, token totals, per-model usage and up to
//!   five prompt excerpts. Loaded at start, rewritten after every call.
//! * `audit.log`: one JSON object per line for every provider call,
//!   request and response (or error) included.
//!
//! Failures to read or write either file are logged and otherwise ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

pub const USAGE_FILE: &str = "usage.json";
pub const AUDIT_FILE: &str = "audit.log";

const MAX_PROMPT_EXAMPLES: usize = 5;
const PROMPT_EXAMPLE_CHARS: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageMetadata {
    pub total_calls: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub model_usage: BTreeMap<String, u64>,
    pub prompt_examples: Vec<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// `input_tokens + output_tokens`.
    pub token_usage: u64,
}

impl UsageMetadata {
    /// Fold one successful call into the totals.
    pub fn record(&mut self, model: &str, prompt: &str, input_tokens: u64, output_tokens: u64) {
        self.total_calls += 1;
        self.last_used = Some(Utc::now());
        *self.model_usage.entry(model.to_string()).or_default() += 1;
        if self.prompt_examples.len() < MAX_PROMPT_EXAMPLES {
            self.prompt_examples
                .push(prompt.chars().take(PROMPT_EXAMPLE_CHARS).collect());
        }
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.token_usage += input_tokens + output_tokens;
    }
}

/// One `audit.log` line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub attempt: u32,
    pub system: String,
    pub request: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Writes the side files for one book. Shared by every in-flight call.
#[derive(Debug)]
pub struct UsageRecorder {
    dir: PathBuf,
    metadata: Mutex<UsageMetadata>,
    audit: Mutex<()>,
}

impl UsageRecorder {
    /// Load existing metadata from `dir`, or start fresh.
    pub async fn load(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(USAGE_FILE);
        let metadata = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable {}: {}", path.display(), e);
                UsageMetadata::default()
            }),
            Err(_) => UsageMetadata::default(),
        };
        Self {
            dir,
            metadata: Mutex::new(metadata),
            audit: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn snapshot(&self) -> UsageMetadata {
        self.metadata.lock().await.clone()
    }

    /// Record a successful call and persist `usage.json`.
    pub async fn record(&self, model: &str, prompt: &str, input_tokens: u64, output_tokens: u64) {
        let mut metadata = self.metadata.lock().await;
        metadata.record(model, prompt, input_tokens, output_tokens);
        let body = match serde_json::to_string_pretty(&*metadata) {
            Ok(body) => body,
            Err(e) => {
                warn!("Could not serialise usage metadata: {}", e);
                return;
            }
        };
        if let Err(e) = self.write_usage(&body).await {
            warn!("Could not write {}: {}", self.dir.join(USAGE_FILE).display(), e);
        }
    }

    async fn write_usage(&self, body: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(USAGE_FILE);
        let tmp = self.dir.join(format!("{USAGE_FILE}.tmp"));
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await
    }

    /// Append one line to `audit.log`.
    pub async fn audit(&self, entry: &AuditEntry) {
        let mut line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                warn!("Could not serialise audit entry: {}", e);
                return;
            }
        };
        line.push('\n');

        let _guard = self.audit.lock().await;
        if let Err(e) = self.append_audit(&line).await {
            warn!("Could not append to {}: {}", self.dir.join(AUDIT_FILE).display(), e);
        }
    }

    async fn append_audit(&self, line: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(AUDIT_FILE))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
