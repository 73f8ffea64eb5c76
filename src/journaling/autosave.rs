use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AutoSaveConfig;
use crate::content::DraftContent;
use crate::storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoSavePolicy {
    pub enabled: bool,
    /// Quiet window for a draft that has never been written.
    pub new_draft: Duration,
    /// Quiet window once the draft has a row.
    pub existing_draft: Duration,
}

impl Default for AutoSavePolicy {
    fn default() -> Self {
        AutoSaveConfig::default().policy()
    }
}

impl AutoSavePolicy {
    pub fn quiet_window(&self, draft_id: Option<i64>) -> Duration {
        match draft_id {
            Some(_) => self.existing_draft,
            None => self.new_draft,
        }
    }
}

/// Snapshot handed to the save target when a quiet window elapses.
#[derive(Debug, Clone)]
pub struct SavePayload {
    pub draft_id: Option<i64>,
    pub title: String,
    pub content: DraftContent,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created { id: i64 },
    Updated { id: i64 },
}

impl SaveOutcome {
    pub fn id(&self) -> i64 {
        match self {
            SaveOutcome::Created { id } | SaveOutcome::Updated { id } => *id,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AutoSaveEvent {
    Saved {
        outcome: SaveOutcome,
        revision: u64,
        timestamp: OffsetDateTime,
    },
    Failed {
        draft_id: Option<i64>,
        message: String,
    },
}

/// Whatever performs the write once a pending save fires.
pub trait SaveTarget: Send + Sync + 'static {
    /// Persists `payload`. Implementations return `Ok(None)` when `cancel`
    /// was triggered before the write could start.
    fn persist(
        &self,
        payload: SavePayload,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Option<SaveOutcome>, StorageError>> + Send;
}

#[derive(Debug)]
struct PendingSave {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    revision: u64,
}

/// Debounces mutations into at most one pending save.
///
/// Each mutation supersedes the previous pending save. Dropping the
/// scheduler cancels whatever is still waiting.
pub struct AutoSaveScheduler<T: SaveTarget> {
    policy: AutoSavePolicy,
    target: Arc<T>,
    events: Option<Sender<AutoSaveEvent>>,
    pending: Option<PendingSave>,
}

impl<T: SaveTarget> AutoSaveScheduler<T> {
    pub fn new(target: Arc<T>, policy: AutoSavePolicy) -> Self {
        Self {
            policy,
            target,
            events: None,
            pending: None,
        }
    }

    pub fn with_events(mut self, events: Sender<AutoSaveEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy(&self) -> AutoSavePolicy {
        self.policy
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| !pending.handle.is_finished())
    }

    pub fn on_mutation(&mut self, payload: SavePayload) {
        self.cancel();
        if !self.policy.enabled {
            return;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::warn!(%err, "no async runtime, autosave not scheduled");
                return;
            }
        };

        let delay = self.policy.quiet_window(payload.draft_id);
        let revision = payload.revision;
        let cancel = CancellationToken::new();
        let task = fire_after(
            delay,
            payload,
            Arc::clone(&self.target),
            cancel.clone(),
            self.events.clone(),
        );
        tracing::debug!(revision, delay_ms = delay.as_millis() as u64, "autosave scheduled");
        self.pending = Some(PendingSave {
            cancel,
            handle: runtime.spawn(task),
            revision,
        });
    }

    /// Cancels the pending save, if any. A write that already started is
    /// left to finish.
    pub fn cancel(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        let was_waiting = !pending.handle.is_finished();
        pending.cancel.cancel();
        if was_waiting {
            tracing::debug!(revision = pending.revision, "pending autosave cancelled");
        }
        was_waiting
    }
}

impl<T: SaveTarget> Drop for AutoSaveScheduler<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn fire_after<T: SaveTarget>(
    delay: Duration,
    payload: SavePayload,
    target: Arc<T>,
    cancel: CancellationToken,
    events: Option<Sender<AutoSaveEvent>>,
) {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }

    let draft_id = payload.draft_id;
    let revision = payload.revision;
    let event = match target.persist(payload, &cancel).await {
        Ok(Some(outcome)) => {
            tracing::debug!(draft_id = outcome.id(), revision, "autosave written");
            AutoSaveEvent::Saved {
                outcome,
                revision,
                timestamp: OffsetDateTime::now_utc(),
            }
        }
        Ok(None) => {
            tracing::debug!(revision, "autosave superseded before write");
            return;
        }
        Err(err) => {
            tracing::warn!(?draft_id, revision, error = %err, "autosave failed");
            AutoSaveEvent::Failed {
                draft_id,
                message: err.to_string(),
            }
        }
    };
    if let Some(events) = events {
        let _ = events.send(event);
    }
}
