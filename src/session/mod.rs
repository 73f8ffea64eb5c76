//! One open draft: its identity, live text, undo history and pending autosave.
//!
//! ```text
//! New --edit--> Dirty --save/autosave--> Saved --edit--> Dirty ...
//!  \__________________ delete __________________/--> Deleted
//! ```
//!
//! Every store write for the session goes through a single gate, so an
//! autosave that fires while an explicit save is running waits for it and
//! then sees the identity the save produced.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::content::DraftContent;
use crate::journaling::{
    AutoSaveEvent, AutoSavePolicy, AutoSaveScheduler, EditHistory, SaveOutcome, SavePayload,
    SaveTarget,
};
use crate::storage::{
    local_now, resolve_title, Draft, DraftRepository, NewDraft, StorageError, DEFAULT_TITLE,
};

pub mod export;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Saved,
    Dirty,
    Deleted,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("draft session was deleted")]
    Deleted,
    #[error("exporting draft to {}: {source}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub autosave: AutoSavePolicy,
    pub history_limit: usize,
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            autosave: config.auto_save.policy(),
            history_limit: config.history.max_entries,
        }
    }
}

#[derive(Debug, Default)]
struct Persisted {
    id: Option<i64>,
    saved_revision: u64,
    deleted: bool,
}

/// State shared with the autosave task.
struct SessionCore<R> {
    session_id: Uuid,
    created_at: OffsetDateTime,
    repo: Arc<R>,
    gate: tokio::sync::Mutex<()>,
    record: Mutex<Persisted>,
}

impl<R: DraftRepository> SessionCore<R> {
    async fn write(
        &self,
        payload: SavePayload,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<SaveOutcome>, StorageError> {
        let _gate = self.gate.lock().await;
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Ok(None);
        }
        let (id, deleted) = {
            let record = self.record.lock();
            (record.id, record.deleted)
        };
        if deleted {
            return Ok(None);
        }

        let outcome = match id {
            Some(id) => {
                self.repo
                    .update(id, &payload.title, &payload.content)
                    .await?;
                SaveOutcome::Updated { id }
            }
            None => {
                let draft = NewDraft {
                    created_at: self.created_at,
                    title: payload.title,
                    content: payload.content,
                };
                let id = self.repo.create(draft).await?;
                SaveOutcome::Created { id }
            }
        };

        let mut record = self.record.lock();
        record.id = Some(outcome.id());
        record.saved_revision = record.saved_revision.max(payload.revision);
        Ok(Some(outcome))
    }

    async fn delete(&self) -> Result<(), StorageError> {
        let _gate = self.gate.lock().await;
        let id = self.record.lock().id;
        if let Some(id) = id {
            self.repo.delete(id).await?;
        }
        self.record.lock().deleted = true;
        Ok(())
    }
}

impl<R: DraftRepository> SaveTarget for SessionCore<R> {
    async fn persist(
        &self,
        payload: SavePayload,
        cancel: &CancellationToken,
    ) -> Result<Option<SaveOutcome>, StorageError> {
        self.write(payload, Some(cancel)).await
    }
}

pub struct DraftSession<R: DraftRepository> {
    core: Arc<SessionCore<R>>,
    autosave: AutoSaveScheduler<SessionCore<R>>,
    history: EditHistory,
    title: String,
    content: DraftContent,
    revision: u64,
}

impl<R: DraftRepository> DraftSession<R> {
    /// Starts an unsaved draft, optionally seeded with content.
    pub fn new(repo: Arc<R>, options: &SessionOptions, seed: DraftContent) -> Self {
        Self::build(repo, options, None, DEFAULT_TITLE.to_string(), seed)
    }

    /// Resumes editing a stored draft.
    pub fn open(repo: Arc<R>, options: &SessionOptions, draft: Draft) -> Self {
        Self::build(repo, options, Some(draft.id), draft.title, draft.content)
    }

    fn build(
        repo: Arc<R>,
        options: &SessionOptions,
        id: Option<i64>,
        title: String,
        content: DraftContent,
    ) -> Self {
        let core = Arc::new(SessionCore {
            session_id: Uuid::new_v4(),
            created_at: local_now(),
            repo,
            gate: tokio::sync::Mutex::new(()),
            record: Mutex::new(Persisted {
                id,
                ..Persisted::default()
            }),
        });
        tracing::debug!(session = %core.session_id, draft_id = ?id, "draft session started");
        Self {
            autosave: AutoSaveScheduler::new(Arc::clone(&core), options.autosave),
            core,
            history: EditHistory::with_limit(options.history_limit),
            title,
            content,
            revision: 0,
        }
    }

    /// Routes autosave outcomes to `events`.
    pub fn with_events(mut self, events: Sender<AutoSaveEvent>) -> Self {
        let policy = self.autosave.policy();
        self.autosave = AutoSaveScheduler::new(Arc::clone(&self.core), policy).with_events(events);
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.core.session_id
    }

    pub fn id(&self) -> Option<i64> {
        self.core.record.lock().id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Title as it will be stored, with the placeholder applied.
    pub fn display_title(&self) -> String {
        resolve_title(&self.title)
    }

    pub fn content(&self) -> &DraftContent {
        &self.content
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn state(&self) -> SessionState {
        let record = self.core.record.lock();
        if record.deleted {
            SessionState::Deleted
        } else if record.saved_revision != self.revision {
            SessionState::Dirty
        } else if record.id.is_some() {
            SessionState::Saved
        } else {
            SessionState::New
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.state() == SessionState::Dirty
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn autosave_pending(&self) -> bool {
        self.autosave.is_pending()
    }

    /// Replaces the content body with `body` as a user edit.
    pub fn edit(&mut self, body: impl Into<String>) -> Result<(), SessionError> {
        self.ensure_active()?;
        let body = body.into();
        if body == self.content.body {
            return Ok(());
        }
        let previous = std::mem::replace(&mut self.content.body, body);
        self.history.record(previous);
        self.mutated();
        Ok(())
    }

    /// Changes the title. Titles are not part of the undo history.
    pub fn set_title(&mut self, title: impl Into<String>) -> Result<(), SessionError> {
        self.ensure_active()?;
        let title = title.into();
        if title == self.title {
            return Ok(());
        }
        self.title = title;
        self.mutated();
        Ok(())
    }

    /// Returns `false` when there was nothing to undo.
    pub fn undo(&mut self) -> Result<bool, SessionError> {
        self.ensure_active()?;
        let Some(previous) = self.history.undo(&self.content.body) else {
            return Ok(false);
        };
        self.content.body = previous;
        self.mutated();
        Ok(true)
    }

    pub fn redo(&mut self) -> Result<bool, SessionError> {
        self.ensure_active()?;
        let Some(next) = self.history.redo(&self.content.body) else {
            return Ok(false);
        };
        self.content.body = next;
        self.mutated();
        Ok(true)
    }

    /// Writes the current state now, creating the row on first save.
    ///
    /// On failure the in-memory draft is left as it was so the caller can retry.
    pub async fn save(&mut self) -> Result<i64, SessionError> {
        self.ensure_active()?;
        self.autosave.cancel();
        let payload = self.payload();
        match self.core.write(payload, None).await {
            Ok(Some(outcome)) => {
                tracing::info!(
                    session = %self.core.session_id,
                    draft_id = outcome.id(),
                    revision = self.revision,
                    "draft saved"
                );
                Ok(outcome.id())
            }
            Ok(None) => Err(SessionError::Deleted),
            Err(err) => {
                tracing::warn!(session = %self.core.session_id, error = %err, "draft save failed");
                Err(err.into())
            }
        }
    }

    /// Deletes the stored row, if any, and ends the session. Repeating it is a no-op.
    pub async fn delete(&mut self) -> Result<(), SessionError> {
        if self.state() == SessionState::Deleted {
            return Ok(());
        }
        self.autosave.cancel();
        let id = self.id();
        self.core.delete().await?;
        self.history.clear();
        tracing::info!(session = %self.core.session_id, draft_id = ?id, "draft session deleted");
        Ok(())
    }

    /// Tears the session down: the pending autosave is cancelled and any
    /// write already in flight is allowed to finish before this returns.
    pub async fn close(mut self) {
        let cancelled = self.autosave.cancel();
        let _gate = self.core.gate.lock().await;
        tracing::debug!(
            session = %self.core.session_id,
            cancelled_pending = cancelled,
            unsaved = self.is_dirty(),
            "draft session closed"
        );
    }

    /// Writes the live content to `<dir>/<file_name>`.
    pub async fn export(&self, dir: &Path, file_name: &str) -> Result<PathBuf, SessionError> {
        self.export_to(&dir.join(file_name)).await
    }

    /// Dumps the live content to `target` without touching the store.
    pub async fn export_to(&self, target: &Path) -> Result<PathBuf, SessionError> {
        self.ensure_active()?;
        export::export_content(target, &self.content.body)
            .await
            .map_err(|source| SessionError::Export {
                path: target.to_path_buf(),
                source,
            })?;
        Ok(target.to_path_buf())
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.core.record.lock().deleted {
            return Err(SessionError::Deleted);
        }
        Ok(())
    }

    fn mutated(&mut self) {
        self.revision += 1;
        let payload = self.payload();
        self.autosave.on_mutation(payload);
    }

    fn payload(&self) -> SavePayload {
        SavePayload {
            draft_id: self.id(),
            title: self.title.clone(),
            content: self.content.clone(),
            revision: self.revision,
        }
    }
}
