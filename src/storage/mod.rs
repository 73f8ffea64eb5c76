use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::config::StorageOptions;
use crate::content::{ContentFormat, DraftContent};

#[cfg(test)]
pub(crate) mod memory;
mod schema;

/// Title stored when the caller leaves it blank.
pub const DEFAULT_TITLE: &str = "Task";

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[day]-[month repr:short]");

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("reading drafts failed: {0:#}")]
    Read(anyhow::Error),
    #[error("writing draft failed: {0:#}")]
    Write(anyhow::Error),
    #[error("draft {id} not found")]
    NotFound { id: i64 },
    #[error("storage worker did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Draft {
    pub id: i64,
    pub date: String,
    pub title: String,
    pub content: DraftContent,
}

/// Insert payload; `date` is rendered from `created_at` when the row is written.
#[derive(Debug, Clone)]
pub struct NewDraft {
    pub created_at: OffsetDateTime,
    pub title: String,
    pub content: DraftContent,
}

impl NewDraft {
    pub fn now(title: impl Into<String>, content: DraftContent) -> Self {
        Self {
            created_at: local_now(),
            title: title.into(),
            content,
        }
    }
}

/// The five operations the draft engine needs from a backing store.
///
/// Calls for different ids may run concurrently. Writes for the same id are
/// serialized by the owning session, not by the store.
pub trait DraftRepository: Send + Sync + 'static {
    /// Creates the backing table if absent. Safe to call any number of times.
    fn ensure_schema(&self) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Inserts a row and returns its assigned id. A blank title is stored as [`DEFAULT_TITLE`].
    fn create(&self, draft: NewDraft) -> impl Future<Output = Result<i64, StorageError>> + Send;

    /// All rows in insertion order.
    fn list(&self) -> impl Future<Output = Result<Vec<Draft>, StorageError>> + Send;

    /// Fails with [`StorageError::NotFound`] when no row has `id`.
    fn update(
        &self,
        id: i64,
        title: &str,
        content: &DraftContent,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Deleting a missing id is a no-op.
    fn delete(&self, id: i64) -> impl Future<Output = Result<(), StorageError>> + Send;
}

impl<R: DraftRepository> DraftRepository for Arc<R> {
    fn ensure_schema(&self) -> impl Future<Output = Result<(), StorageError>> + Send {
        (**self).ensure_schema()
    }

    fn create(&self, draft: NewDraft) -> impl Future<Output = Result<i64, StorageError>> + Send {
        (**self).create(draft)
    }

    fn list(&self) -> impl Future<Output = Result<Vec<Draft>, StorageError>> + Send {
        (**self).list()
    }

    fn update(
        &self,
        id: i64,
        title: &str,
        content: &DraftContent,
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        (**self).update(id, title, content)
    }

    fn delete(&self, id: i64) -> impl Future<Output = Result<(), StorageError>> + Send {
        (**self).delete(id)
    }
}

pub fn resolve_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Current time in the local offset, or UTC when the offset can't be determined.
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Renders `at` in the offset it carries.
pub fn format_draft_date(at: OffsetDateTime) -> String {
    at.format(DATE_FORMAT)
        .unwrap_or_else(|_| at.date().to_string())
}

#[derive(Clone)]
pub struct StorageHandle {
    db_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
}

impl StorageHandle {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        schema::apply(&conn)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn apply_schema(&self) -> Result<()> {
        self.with_connection(schema::apply)
    }

    pub fn insert_draft(&self, draft: &NewDraft) -> Result<i64> {
        let title = resolve_title(&draft.title);
        let date = format_draft_date(draft.created_at);
        let format = draft.content.format.map(|f| f.to_string());
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO drafts (date, title, content, format) VALUES (?1, ?2, ?3, ?4)",
                params![date, title, draft.content.body, format],
            )
            .context("inserting draft")?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn fetch_drafts(&self) -> Result<Vec<Draft>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, date, title, content, format FROM drafts ORDER BY id")
                .context("preparing draft listing")?;
            let drafts = stmt
                .query_map([], draft_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("querying drafts")?;
            Ok(drafts)
        })
    }

    /// Returns the number of rows touched (0 or 1).
    pub fn update_draft(&self, id: i64, title: &str, content: &DraftContent) -> Result<usize> {
        let title = resolve_title(title);
        let format = content.format.map(|f| f.to_string());
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE drafts SET title = ?1, content = ?2, format = ?3 WHERE id = ?4",
                params![title, content.body, format, id],
            )
            .context("updating draft")
        })
    }

    pub fn delete_draft(&self, id: i64) -> Result<usize> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM drafts WHERE id = ?1", params![id])
                .context("deleting draft")
        })
    }

    async fn blocking<F, T>(&self, f: F) -> Result<Result<T>, StorageError>
    where
        F: FnOnce(StorageHandle) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.clone();
        Ok(tokio::task::spawn_blocking(move || f(handle)).await?)
    }
}

impl DraftRepository for StorageHandle {
    async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.blocking(|store| store.apply_schema())
            .await?
            .map_err(StorageError::Write)
    }

    async fn create(&self, draft: NewDraft) -> Result<i64, StorageError> {
        let id = self
            .blocking(move |store| store.insert_draft(&draft))
            .await?
            .map_err(StorageError::Write)?;
        tracing::info!(draft_id = id, "draft created");
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<Draft>, StorageError> {
        self.blocking(|store| store.fetch_drafts())
            .await?
            .map_err(StorageError::Read)
    }

    async fn update(&self, id: i64, title: &str, content: &DraftContent) -> Result<(), StorageError> {
        let title = title.to_string();
        let content = content.clone();
        let updated = self
            .blocking(move |store| store.update_draft(id, &title, &content))
            .await?
            .map_err(StorageError::Write)?;
        if updated == 0 {
            return Err(StorageError::NotFound { id });
        }
        tracing::info!(draft_id = id, "draft updated");
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), StorageError> {
        let removed = self
            .blocking(move |store| store.delete_draft(id))
            .await?
            .map_err(StorageError::Write)?;
        if removed == 0 {
            tracing::debug!(draft_id = id, "delete of missing draft ignored");
        } else {
            tracing::info!(draft_id = id, "draft deleted");
        }
        Ok(())
    }
}

fn draft_from_row(row: &Row<'_>) -> rusqlite::Result<Draft> {
    let body: String = row.get(3)?;
    let format = row
        .get::<_, Option<String>>(4)?
        .and_then(|raw| ContentFormat::from_str(&raw).ok());
    Ok(Draft {
        id: row.get(0)?,
        date: row.get(1)?,
        title: row.get(2)?,
        content: DraftContent { format, body },
    })
}

pub fn init(storage: &StorageOptions) -> Result<StorageHandle> {
    let db_path = &storage.database_path;
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    prepare_connection(&conn, storage)?;
    schema::apply(&conn)?;
    Ok(StorageHandle {
        db_path: Arc::new(db_path.clone()),
        options: Arc::new(storage.clone()),
    })
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}
