//! Batch-inference provider abstraction.
//!
//! The pipeline talks to the provider through [`BatchProvider`] so the
//! submit and poll flows can be exercised against a fake in tests.

mod openai;

pub use openai::{OpenAiBatchProvider, DEFAULT_BASE_URL};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("connection to provider failed: {0}")]
    Connection(String),
    #[error("provider request timed out")]
    Timeout,
    #[error("provider API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Lifecycle state of a batch as reported by the provider.
///
/// Only `Completed` is acted on. The terminal-unsuccessful states are
/// modeled so polling can log them distinctly, but they trigger no
/// persisted transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderBatchStatus {
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Expired,
    Cancelled,
    Other(String),
}

impl ProviderBatchStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "validating" => ProviderBatchStatus::Validating,
            "in_progress" => ProviderBatchStatus::InProgress,
            "finalizing" => ProviderBatchStatus::Finalizing,
            "completed" => ProviderBatchStatus::Completed,
            "failed" => ProviderBatchStatus::Failed,
            "expired" => ProviderBatchStatus::Expired,
            "cancelled" => ProviderBatchStatus::Cancelled,
            other => ProviderBatchStatus::Other(other.to_string()),
        }
    }

    /// The batch will never complete; waiting longer cannot change that.
    pub fn is_terminal_unsuccessful(&self) -> bool {
        matches!(
            self,
            ProviderBatchStatus::Failed
                | ProviderBatchStatus::Expired
                | ProviderBatchStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ProviderBatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderBatchStatus::Validating => "validating",
            ProviderBatchStatus::InProgress => "in_progress",
            ProviderBatchStatus::Finalizing => "finalizing",
            ProviderBatchStatus::Completed => "completed",
            ProviderBatchStatus::Failed => "failed",
            ProviderBatchStatus::Expired => "expired",
            ProviderBatchStatus::Cancelled => "cancelled",
            ProviderBatchStatus::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// Snapshot of one provider-side batch.
#[derive(Debug, Clone)]
pub struct BatchInfo {
    pub id: String,
    pub status: ProviderBatchStatus,
    pub output_file_id: Option<String>,
    /// Total token usage, when the provider reports it.
    pub total_tokens: Option<i64>,
}

#[async_trait]
pub trait BatchProvider: Send + Sync {
    /// Upload a JSONL document as a batch input file. Returns the file id.
    async fn upload_batch_file(&self, jsonl: &str) -> Result<String, ProviderError>;

    /// Create a batch over a previously uploaded input file. Returns the
    /// provider-assigned batch id.
    async fn create_batch(&self, input_file_id: &str) -> Result<String, ProviderError>;

    async fn get_batch(&self, batch_id: &str) -> Result<BatchInfo, ProviderError>;

    /// Download the content of a provider file as text.
    async fn download_file(&self, file_id: &str) -> Result<String, ProviderError>;
}
