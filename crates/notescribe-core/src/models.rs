//! Core data models for notescribe.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// PROCESSING STATUS
// =============================================================================

/// Status of one (note, operation, attachment) processing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Broken,
    Skipped,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Broken => "broken",
            ProcessingStatus::Skipped => "skipped",
        }
    }

    /// Whether an automatic run may pick this status up again.
    pub fn allows_processing(&self) -> bool {
        matches!(self, ProcessingStatus::Pending | ProcessingStatus::Failed)
    }

    /// Statuses that `clear_broken` resets.
    pub fn is_error(&self) -> bool {
        matches!(self, ProcessingStatus::Failed | ProcessingStatus::Broken)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    /// Parses the current vocabulary plus the spellings older writers used
    /// (`processed`, `done`, `success`, `error`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" | "queued" => Ok(ProcessingStatus::Pending),
            "processing" | "running" => Ok(ProcessingStatus::Processing),
            "completed" | "processed" | "done" | "success" => Ok(ProcessingStatus::Completed),
            "failed" | "error" => Ok(ProcessingStatus::Failed),
            "broken" => Ok(ProcessingStatus::Broken),
            "skipped" => Ok(ProcessingStatus::Skipped),
            other => Err(format!("unknown processing status: {}", other)),
        }
    }
}

impl<'de> Deserialize<'de> for ProcessingStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// PROCESSING RECORD
// =============================================================================

/// Persisted status of one (note, operation, attachment) triple.
///
/// Stored inside the note's frontmatter. Field aliases accept the names used
/// by earlier writers (`timestamp`, `retries`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub status: ProcessingStatus,
    #[serde(alias = "timestamp", default)]
    pub updated_at: String,
    #[serde(default)]
    pub message: String,
    #[serde(alias = "retries", default)]
    pub retry_count: u32,
    #[serde(default)]
    pub processing_time: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transcript_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub language: Option<String>,
}

impl ProcessingRecord {
    /// A record stamped with the current time.
    pub fn new(status: ProcessingStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            updated_at: now_timestamp(),
            message: message.into(),
            retry_count: 0,
            processing_time: 0.0,
            task_id: None,
            error: None,
            output: None,
            transcript_length: None,
            model: None,
            language: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Parsed `updated_at`. Accepts RFC 3339 and the naive ISO form older
    /// writers produced (interpreted as UTC).
    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.updated_at)
    }

    /// A `processing` record carrying a remote task id can be resumed.
    pub fn is_resumable(&self) -> bool {
        self.status == ProcessingStatus::Processing && self.task_id.is_some()
    }
}

/// Current time in the format written to records.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a record timestamp in any format written by this or earlier tools.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

// =============================================================================
// ATTACHMENTS
// =============================================================================

/// An attachment reference paired with the file it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAttachment {
    /// Reference text as written in the note body.
    pub reference: String,
    /// Bare filename; the record key in frontmatter.
    pub filename: String,
    /// Absolute path of the existing file.
    pub path: PathBuf,
}

// =============================================================================
// EXECUTION RESULTS
// =============================================================================

/// Outcome of running one operation against one attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResult {
    pub success: bool,
    /// Status persisted for the attachment after this run.
    pub status: ProcessingStatus,
    pub message: String,
    pub output: Option<String>,
    pub error: Option<String>,
    /// Attempts consumed, including the successful one.
    pub retry_count: u32,
    pub duration_ms: u64,
}

impl ProcessResult {
    pub fn succeeded(message: impl Into<String>, output: Option<String>) -> Self {
        Self {
            success: true,
            status: ProcessingStatus::Completed,
            message: message.into(),
            output,
            error: None,
            retry_count: 0,
            duration_ms: 0,
        }
    }

    pub fn failed(status: ProcessingStatus, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            status,
            message: error.clone(),
            output: None,
            error: Some(error),
            retry_count: 0,
            duration_ms: 0,
        }
    }
}

/// Aggregate counts for a vault run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub notes_scanned: usize,
    pub notes_with_attachments: usize,
    pub attachments_found: usize,
    pub attachments_missing: usize,
    pub eligible: usize,
    pub newly_processed: usize,
    pub failed: usize,
    pub dry_run: bool,
    pub duration_ms: u64,
    /// One entry per failed attachment or note, `path: reason`.
    pub errors: Vec<String>,
}

/// Processing state across a vault without running anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VaultStatus {
    pub notes: usize,
    pub notes_with_attachments: usize,
    pub attachments: usize,
    pub attachments_missing: usize,
    /// Attachments with no record, or a record eligible for processing.
    pub unprocessed: usize,
    pub by_status: BTreeMap<ProcessingStatus, usize>,
}
