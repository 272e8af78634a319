//! # notescribe-core
//!
//! Core types, configuration, and events for notescribe.
//!
//! This crate provides the foundational data structures that the vault,
//! inference, and job crates share: the error type, processing records and
//! statuses, the configuration model and loader, and the event bus.

pub mod config;
pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod models;

// Re-export commonly used types at crate root
pub use config::{
    Config, ConfigError, FrontmatterErrorLevel, LoggingConfig, ProcessingConfig, ProcessorConfig,
    ProcessorKind,
};
pub use error::{Error, Result};
pub use events::{EventBus, EventEnvelope, ProcessorEvent};
pub use metrics::MetricsCollector;
pub use models::*;
