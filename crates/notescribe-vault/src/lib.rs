//! # notescribe-vault
//!
//! Everything that touches the vault on disk: resolving attachment
//! references to files, the frontmatter codec and state store that persist
//! processing records inside notes, transcript insertion into note bodies,
//! and the scanner that enumerates notes and their attachments.

pub mod atomic;
pub mod context;
pub mod frontmatter;
pub mod resolver;
pub mod scanner;
pub mod schema;
pub mod state;
pub mod transcript;

pub use atomic::{write_atomic, StagedWrite};
pub use context::{AttachmentFolder, VaultContext};
pub use frontmatter::{Frontmatter, ParseStrategy};
pub use resolver::PathResolver;
pub use scanner::{NoteScan, VaultScanner};
pub use state::{RecordDetails, StateStore};
