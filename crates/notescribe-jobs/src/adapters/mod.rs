//! Processor implementations, one per configured `type`.

pub mod remote_task;
pub mod script;
pub mod whisper;

pub use remote_task::{RemoteTaskProcessor, RemoteTaskSettings};
pub use script::{ScriptProcessor, ScriptSettings};
pub use whisper::{WhisperProcessor, WhisperSettings};
