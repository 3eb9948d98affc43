//! Offline save queue and draft snapshot repository

use crate::error::{Error, Result};
use crate::models::{DocumentId, DraftSnapshot, QueuedSave};
use libsql::{params, Connection};

/// Trait for durable queue storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SaveQueueRepository {
    /// Append a queue entry and upsert the document's draft in one transaction.
    ///
    /// Returns the store-assigned sequence number.
    async fn insert(&self, item: &QueuedSave) -> Result<i64>;

    /// List all queue entries in enqueue order
    async fn list(&self) -> Result<Vec<QueuedSave>>;

    /// Count queue entries
    async fn count(&self) -> Result<usize>;

    /// Count queue entries for one document
    async fn count_for_document(&self, document_id: &DocumentId) -> Result<usize>;

    /// Newest entry of one document
    async fn latest_for_document(&self, document_id: &DocumentId) -> Result<Option<QueuedSave>>;

    /// Persist `retry_count`/`last_error` of an entry and drop its older siblings
    async fn record_failure(&self, item: &QueuedSave) -> Result<()>;

    /// Delete entries of a document up to and including `seq`
    async fn delete_through(&self, document_id: &DocumentId, seq: i64) -> Result<u64>;

    /// Delete every entry of a document
    async fn delete_document(&self, document_id: &DocumentId) -> Result<u64>;

    /// Get a document's draft
    async fn get_draft(&self, document_id: &DocumentId) -> Result<Option<DraftSnapshot>>;

    /// List all drafts, most recent first
    async fn list_drafts(&self) -> Result<Vec<DraftSnapshot>>;

    /// Delete a document's draft
    async fn delete_draft(&self, document_id: &DocumentId) -> Result<()>;
}

/// libSQL implementation of `SaveQueueRepository`
pub struct LibSqlSaveQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSaveQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn insert_entry(&self, item: &QueuedSave) -> Result<i64> {
        let payload = serde_json::to_string(&item.payload)?;
        self.conn
            .execute(
                "INSERT INTO save_queue
                    (id, document_id, payload, base_revision, enqueued_at, retry_count, last_error)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    item.id.to_string(),
                    item.document_id.as_str(),
                    payload.clone(),
                    item.base_revision,
                    item.enqueued_at,
                    i64::from(item.retry_count),
                    item.last_error.clone()
                ],
            )
            .await?;
        let seq = self.conn.last_insert_rowid();

        self.conn
            .execute(
                "INSERT OR REPLACE INTO draft_snapshots (document_id, payload, saved_at)
                 VALUES (?, ?, ?)",
                params![item.document_id.as_str(), payload, item.enqueued_at],
            )
            .await?;

        Ok(seq)
    }

    async fn record_failure_entry(&self, item: &QueuedSave) -> Result<()> {
        self.conn
            .execute(
                "UPDATE save_queue SET retry_count = ?, last_error = ? WHERE seq = ?",
                params![
                    i64::from(item.retry_count),
                    item.last_error.clone(),
                    item.seq
                ],
            )
            .await?;
        self.conn
            .execute(
                "DELETE FROM save_queue WHERE document_id = ? AND seq < ?",
                params![item.document_id.as_str(), item.seq],
            )
            .await?;
        Ok(())
    }

    /// Run `BEGIN`/`COMMIT` around a unit of work, rolling back on failure
    async fn commit_or_rollback<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                if let Err(e) = self.conn.execute("COMMIT", ()).await {
                    self.conn.execute("ROLLBACK", ()).await.ok();
                    return Err(e.into());
                }
                Ok(value)
            }
            Err(error) => {
                self.conn.execute("ROLLBACK", ()).await.ok();
                Err(error)
            }
        }
    }

    /// Parse a queue entry from a database row
    fn parse_queued(row: &libsql::Row) -> Result<QueuedSave> {
        let id: String = row.get(1)?;
        let document_id: String = row.get(2)?;
        let payload: String = row.get(3)?;
        let retry_count: i64 = row.get(6)?;

        Ok(QueuedSave {
            seq: row.get(0)?,
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("Invalid queue entry ID: {id}")))?,
            document_id: parse_document_id(&document_id)?,
            payload: serde_json::from_str(&payload)?,
            base_revision: row.get(4)?,
            enqueued_at: row.get(5)?,
            retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
            last_error: row.get(7)?,
        })
    }

    /// Parse a draft snapshot from a database row
    fn parse_draft(row: &libsql::Row) -> Result<DraftSnapshot> {
        let document_id: String = row.get(0)?;
        let payload: String = row.get(1)?;
        Ok(DraftSnapshot {
            document_id: parse_document_id(&document_id)?,
            payload: serde_json::from_str(&payload)?,
            saved_at: row.get(2)?,
        })
    }
}

fn parse_document_id(raw: &str) -> Result<DocumentId> {
    raw.parse()
        .map_err(|_| Error::Database(format!("Invalid document ID: {raw}")))
}

impl SaveQueueRepository for LibSqlSaveQueueRepository<'_> {
    async fn insert(&self, item: &QueuedSave) -> Result<i64> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = self.insert_entry(item).await;
        self.commit_or_rollback(result).await
    }

    async fn list(&self) -> Result<Vec<QueuedSave>> {
        let mut rows = self
            .conn
            .query(
                "SELECT seq, id, document_id, payload, base_revision, enqueued_at, retry_count, last_error
                 FROM save_queue
                 ORDER BY seq ASC",
                (),
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_queued(&row)?);
        }
        Ok(items)
    }

    async fn count(&self) -> Result<usize> {
        let mut rows = self.conn.query("SELECT COUNT(*) FROM save_queue", ()).await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn count_for_document(&self, document_id: &DocumentId) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM save_queue WHERE document_id = ?",
                [document_id.as_str()],
            )
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn latest_for_document(&self, document_id: &DocumentId) -> Result<Option<QueuedSave>> {
        let mut rows = self
            .conn
            .query(
                "SELECT seq, id, document_id, payload, base_revision, enqueued_at, retry_count, last_error
                 FROM save_queue
                 WHERE document_id = ?
                 ORDER BY seq DESC
                 LIMIT 1",
                [document_id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_queued(&row)?)),
            None => Ok(None),
        }
    }

    async fn record_failure(&self, item: &QueuedSave) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = self.record_failure_entry(item).await;
        self.commit_or_rollback(result).await
    }

    async fn delete_through(&self, document_id: &DocumentId, seq: i64) -> Result<u64> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM save_queue WHERE document_id = ? AND seq <= ?",
                params![document_id.as_str(), seq],
            )
            .await?;
        Ok(deleted)
    }

    async fn delete_document(&self, document_id: &DocumentId) -> Result<u64> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM save_queue WHERE document_id = ?",
                [document_id.as_str()],
            )
            .await?;
        Ok(deleted)
    }

    async fn get_draft(&self, document_id: &DocumentId) -> Result<Option<DraftSnapshot>> {
        let mut rows = self
            .conn
            .query(
                "SELECT document_id, payload, saved_at FROM draft_snapshots WHERE document_id = ?",
                [document_id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_draft(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_drafts(&self) -> Result<Vec<DraftSnapshot>> {
        let mut rows = self
            .conn
            .query(
                "SELECT document_id, payload, saved_at FROM draft_snapshots ORDER BY saved_at DESC",
                (),
            )
            .await?;

        let mut drafts = Vec::new();
        while let Some(row) = rows.next().await? {
            drafts.push(Self::parse_draft(&row)?);
        }
        Ok(drafts)
    }

    async fn delete_draft(&self, document_id: &DocumentId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM draft_snapshots WHERE document_id = ?",
                [document_id.as_str()],
            )
            .await?;
        Ok(())
    }
}
