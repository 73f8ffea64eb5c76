//! In-memory edit history and the debounced autosave that follows it.

pub mod autosave;
pub mod history;

pub use autosave::{AutoSaveEvent, AutoSavePolicy, AutoSaveScheduler, SaveOutcome, SavePayload, SaveTarget};
pub use history::EditHistory;
