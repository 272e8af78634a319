//! Named operations and the processor variants behind them.

use std::path::Path;
use std::time::Duration;

use notescribe_core::{EventBus, ProcessorKind, ResolvedAttachment, Result};
use notescribe_vault::{RecordDetails, StateStore};

use crate::adapters::{RemoteTaskProcessor, ScriptProcessor, WhisperProcessor};

/// What a processor does with an attachment.
///
/// Adding a kind of operation means adding a variant here and a branch in
/// the registry that builds it.
pub enum Processor {
    Script(ScriptProcessor),
    RemoteTask(RemoteTaskProcessor),
    Whisper(WhisperProcessor),
}

impl Processor {
    pub fn kind(&self) -> ProcessorKind {
        match self {
            Processor::Script(_) => ProcessorKind::Script,
            Processor::RemoteTask(_) => ProcessorKind::CustomApi,
            Processor::Whisper(_) => ProcessorKind::Whisper,
        }
    }

    /// Run one attempt. Timeouts and retries are the engine's concern.
    pub async fn execute(&self, attempt: &Attempt<'_>) -> Result<Outcome> {
        match self {
            Processor::Script(p) => p.execute(attempt).await,
            Processor::RemoteTask(p) => p.execute(attempt).await,
            Processor::Whisper(p) => p.execute(attempt).await,
        }
    }
}

/// A configured, named operation.
pub struct Operation {
    pub name: String,
    pub processor: Processor,
    /// Wall-clock budget of a single attempt.
    pub timeout: Duration,
    /// Attempts before the attachment is marked `broken`.
    pub retry_attempts: u32,
}

impl Operation {
    pub fn new(name: impl Into<String>, processor: Processor) -> Self {
        Self {
            name: name.into(),
            processor,
            timeout: Duration::from_secs(notescribe_core::defaults::OPERATION_TIMEOUT_SECS),
            retry_attempts: notescribe_core::defaults::RETRY_ATTEMPTS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }
}

/// Everything a processor sees during one attempt.
pub struct Attempt<'a> {
    pub operation: &'a str,
    pub note: &'a Path,
    /// Vault-relative note path, for logs and events.
    pub note_display: &'a str,
    pub attachment: &'a ResolvedAttachment,
    /// 1-based attempt number.
    pub number: u32,
    /// Remote task id persisted by an earlier attempt.
    pub task_id: Option<String>,
    pub timeout: Duration,
    pub state: &'a StateStore,
    pub events: Option<&'a EventBus>,
}

/// Result of a successful attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub message: String,
    /// Raw command output, stored (truncated) in the record.
    pub output: Option<String>,
    /// Text to insert into the note body below the attachment embed.
    pub transcript: Option<String>,
    pub details: RecordDetails,
}

impl Outcome {
    pub fn transcribed(
        filename: &str,
        text: String,
        model: Option<String>,
        language: Option<String>,
    ) -> Self {
        Self {
            message: format!("Successfully transcribed {}", filename),
            output: None,
            details: RecordDetails {
                transcript_length: Some(text.chars().count()),
                model,
                language,
            },
            transcript: Some(text),
        }
    }
}
