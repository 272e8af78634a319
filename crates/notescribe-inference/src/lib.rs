//! # notescribe-inference
//!
//! HTTP clients for the remote operations notescribe can run against an
//! attachment.
//!
//! This crate provides:
//! - The asynchronous task protocol client (submit, poll, fetch result)
//! - An OpenAI-compatible synchronous transcription backend
//! - Language hints derived from attachment filenames

pub mod language;
pub mod tasks;
pub mod transcription;

pub use language::{detect_language, resolve_language};
pub use tasks::{PollSchedule, RemoteTaskClient, TaskRequest, TaskState};
pub use transcription::{mime_for_file, TranscriptionBackend, TranscriptionResult, WhisperBackend};
