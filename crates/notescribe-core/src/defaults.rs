//! Centralized default constants for notescribe.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration types, the scanner, and the execution engine reference these
//! constants instead of defining their own magic numbers.

// =============================================================================
// EXECUTION
// =============================================================================

/// Wall-clock budget for a single operation attempt, in seconds.
pub const OPERATION_TIMEOUT_SECS: u64 = 300;

/// Number of attempts before an attachment is marked broken.
pub const RETRY_ATTEMPTS: u32 = 3;

/// Base delay before the first retry; doubles on every further attempt.
pub const RETRY_BASE_DELAY_SECS: f64 = 1.0;

/// Upper bound for the retry backoff delay.
pub const RETRY_MAX_DELAY_SECS: f64 = 30.0;

/// Number of notes processed concurrently by the worker pool.
pub const CONCURRENCY_LIMIT: usize = 5;

/// Maximum characters of operation output stored in a processing record.
pub const OUTPUT_MAX_CHARS: usize = 500;

// =============================================================================
// REMOTE TASK POLLING
// =============================================================================

/// First delay between status polls for an asynchronous remote task.
pub const POLL_INITIAL_SECS: f64 = 2.0;

/// Multiplier applied to the poll delay after every poll.
pub const POLL_BACKOFF_FACTOR: f64 = 1.2;

/// Cap for the poll delay.
pub const POLL_MAX_SECS: f64 = 10.0;

/// HTTP timeout for a single submit/status/result request.
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// TRANSCRIPTION
// =============================================================================

/// Default model requested from a remote task server.
pub const REMOTE_TASK_MODEL: &str = "whisper-base";

/// Language value meaning "let the backend detect it".
pub const LANGUAGE_AUTO: &str = "auto";

/// Default OpenAI-compatible API base URL.
pub const WHISPER_BASE_URL: &str = "https://api.openai.com/v1";

/// Default OpenAI-compatible transcription model.
pub const WHISPER_MODEL: &str = "whisper-1";

// =============================================================================
// VAULT
// =============================================================================

/// Audio extensions accepted as attachments (lowercase, no dot).
pub const AUDIO_EXTENSIONS: &[&str] = &["m4a", "mp3", "wav", "flac", "aac", "ogg", "opus", "webm"];

/// Conventional attachment folders searched after the configured one.
pub const CONVENTIONAL_ATTACHMENT_DIRS: &[&str] =
    &["Attachments", "attachments", "Files", "files", "assets", "media"];

/// Exclusion patterns applied when the configuration lists none.
pub const EXCLUDE_PATTERNS: &[&str] = &["templates/**", ".obsidian/**", "**/.*"];

/// Directory name whose notes are never processed, at any depth.
pub const TEMPLATES_DIR: &str = "templates";

/// Host application's configuration directory inside the vault.
pub const OBSIDIAN_DIR: &str = ".obsidian";

/// Host application's settings file (inside [`OBSIDIAN_DIR`]).
pub const OBSIDIAN_APP_CONFIG: &str = "app.json";

/// Config file name looked up inside [`OBSIDIAN_DIR`].
pub const VAULT_CONFIG_FILE: &str = "obsidian-postprocessor.yaml";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "config.yaml";

// =============================================================================
// FRONTMATTER SCHEMA
// =============================================================================

/// Top-level frontmatter key owning the per-attachment state map.
pub const NAMESPACE: &str = "obsidian-postprocessor";

/// Schema version written under [`NAMESPACE`].
pub const SCHEMA_VERSION: &str = "1.0";

/// Key of the per-attachment map under [`NAMESPACE`].
pub const ATTACHMENT_SECTION: &str = "voice-memos";

/// Legacy flat list of processed attachment filenames.
pub const LEGACY_PROCESSED: &str = "processed_recordings";

/// Legacy flat list of broken attachment filenames.
pub const LEGACY_BROKEN: &str = "broken_recordings";

/// Legacy map of broken attachment details.
pub const LEGACY_BROKEN_INFO: &str = "broken_recordings_info";

/// Legacy per-note map of operation records.
pub const LEGACY_PROCESSOR_STATE: &str = "processor_state";

/// Inert value substituted for template syntax during tolerant parsing.
pub const TEMPLATE_PLACEHOLDER: &str = "__TEMPLATE_PLACEHOLDER__";

/// Age after which finished records may be pruned.
pub const STATE_MAX_AGE_DAYS: i64 = 30;

// =============================================================================
// EVENTS
// =============================================================================

/// Broadcast buffer for the processor event bus.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// ENVIRONMENT VARIABLES
// =============================================================================

/// Overrides the vault path from the configuration file.
pub const ENV_VAULT_PATH: &str = "VAULT_PATH";

/// Log output format (`json` or `text`).
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

/// Log file path; enables daily-rotated file output.
pub const ENV_LOG_FILE: &str = "LOG_FILE";

/// OpenAI-compatible API key fallback for the whisper processor.
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
