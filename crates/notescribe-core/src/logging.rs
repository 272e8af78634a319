//! Structured logging schema and field name constants for notescribe.
//!
//! All crates use these names for structured `tracing` fields so that log
//! output can be filtered by the same keys across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | State could not be persisted, run-level fault |
//! | WARN  | Recoverable issue: missing attachment, retry, malformed metadata |
//! | INFO  | Run lifecycle, operation completions |
//! | DEBUG | Decision points: eligibility, resolution winner, poll status |
//! | TRACE | Per-candidate probing, per-line parse details |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "vault", "inference", "jobs", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "resolver", "frontmatter", "state", "scanner", "engine"
pub const COMPONENT: &str = "component";

/// Configured operation name (e.g. "transcribe").
pub const OPERATION: &str = "operation";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Vault-relative note path.
pub const NOTE: &str = "note";

/// Attachment filename (record key).
pub const ATTACHMENT: &str = "attachment";

/// Remote task identifier.
pub const TASK_ID: &str = "task_id";

/// Processing status.
pub const STATUS: &str = "status";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// One-based attempt number.
pub const ATTEMPT: &str = "attempt";

/// Retry backoff delay in milliseconds.
pub const DELAY_MS: &str = "delay_ms";

/// Number of notes in a scan or run.
pub const NOTE_COUNT: &str = "note_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
