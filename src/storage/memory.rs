//! In-memory repository used by session, listing and CLI tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{format_draft_date, resolve_title, Draft, DraftRepository, NewDraft, StorageError};
use crate::content::DraftContent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create { title: String, body: String },
    Update { id: i64, body: String },
    Delete { id: i64 },
    List,
}

#[derive(Default)]
pub struct MemoryRepository {
    rows: Mutex<BTreeMap<i64, Draft>>,
    next_id: Mutex<i64>,
    calls: Mutex<Vec<Call>>,
    latency: Duration,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write sleeps this long before touching the rows.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn creates(&self) -> usize {
        self.count(|call| matches!(call, Call::Create { .. }))
    }

    pub fn updates(&self) -> usize {
        self.count(|call| matches!(call, Call::Update { .. }))
    }

    pub fn writes(&self) -> usize {
        self.count(|call| !matches!(call, Call::List))
    }

    pub fn row(&self, id: i64) -> Option<Draft> {
        self.rows.lock().get(&id).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| pred(call)).count()
    }

    async fn begin_write(&self, call: Call) -> Result<(), StorageError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.calls.lock().push(call);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Write(anyhow::anyhow!("store rejected write")));
        }
        Ok(())
    }
}

impl DraftRepository for MemoryRepository {
    async fn ensure_schema(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn create(&self, draft: NewDraft) -> Result<i64, StorageError> {
        self.begin_write(Call::Create {
            title: draft.title.clone(),
            body: draft.content.body.clone(),
        })
        .await?;
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        self.rows.lock().insert(
            id,
            Draft {
                id,
                date: format_draft_date(draft.created_at),
                title: resolve_title(&draft.title),
                content: draft.content,
            },
        );
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<Draft>, StorageError> {
        self.calls.lock().push(Call::List);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Read(anyhow::anyhow!("store unreachable")));
        }
        Ok(self.rows.lock().values().cloned().collect())
    }

    async fn update(&self, id: i64, title: &str, content: &DraftContent) -> Result<(), StorageError> {
        self.begin_write(Call::Update {
            id,
            body: content.body.clone(),
        })
        .await?;
        let mut rows = self.rows.lock();
        let row = rows.get_mut(&id).ok_or(StorageError::NotFound { id })?;
        row.title = resolve_title(title);
        row.content = content.clone();
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), StorageError> {
        self.begin_write(Call::Delete { id }).await?;
        self.rows.lock().remove(&id);
        Ok(())
    }
}
