pub mod cli;
pub mod config;
pub mod content;
pub mod journaling;
pub mod listing;
pub mod session;
pub mod storage;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use content::{extract_preview, ContentFormat, DraftContent};
pub use session::{DraftSession, SessionError, SessionOptions, SessionState};
pub use storage::{Draft, DraftRepository, StorageError, StorageHandle};
