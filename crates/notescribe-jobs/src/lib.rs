//! # notescribe-jobs
//!
//! Runs configured operations against the attachments of a vault.
//!
//! This crate provides:
//! - Processor variants (`script`, `custom_api`, `whisper`) and the registry
//!   that builds them from configuration
//! - The execution engine: per-attempt timeout, bounded retry with
//!   exponential backoff, terminal `broken` state, transcript insertion
//! - The vault orchestrator: a scanner feeding a bounded worker pool whose
//!   completions flow back over a channel into a run summary
//!
//! ## Example
//!
//! ```ignore
//! use notescribe_core::{Config, EventBus};
//! use notescribe_jobs::VaultProcessor;
//!
//! let config = Config::load(None, None)?;
//! let processor = VaultProcessor::new(&config, EventBus::default())?;
//! let summary = processor.run().await?;
//! println!("processed {} attachments", summary.newly_processed);
//! ```

pub mod adapters;
pub mod engine;
pub mod processor;
pub mod registry;
pub mod worker;

pub use adapters::{RemoteTaskProcessor, ScriptProcessor, WhisperProcessor};
pub use engine::{truncate_output, ExecutionEngine, RetryPolicy};
pub use processor::{Attempt, Operation, Outcome, Processor};
pub use registry::ProcessorRegistry;
pub use worker::VaultProcessor;
