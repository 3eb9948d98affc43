//! Durable offline write queue.
//!
//! Saves that cannot reach the store land here, together with a draft
//! snapshot of the latest payload per document. Entries survive restarts
//! and are replayed by the drainer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::db::{Database, LibSqlSaveQueueRepository, SaveQueueRepository};
use crate::models::{DocumentId, DraftSnapshot, QueuedSave};
use crate::status::StatusBoard;
use crate::Result;

/// Thread-safe handle to the persisted queue.
///
/// Every mutation republishes the queue size on the status board while the
/// database lock is still held, so published sizes never go backwards in time.
#[derive(Clone)]
pub struct SaveQueue {
    db: Arc<Mutex<Database>>,
    status: StatusBoard,
}

impl SaveQueue {
    pub async fn open_path(db_path: impl Into<PathBuf>, status: StatusBoard) -> Result<Self> {
        let db_path = db_path.into();
        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Queue database at {} is unreadable: {}. Moving it aside and starting fresh.",
                    db_path.display(),
                    error
                );
                quarantine_corrupted_db_file(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };
        let queue = Self {
            db: Arc::new(Mutex::new(db)),
            status,
        };
        {
            let db = queue.db.lock().await;
            queue.publish_size(&db).await?;
        }
        Ok(queue)
    }

    /// Open an in-memory queue (primarily for tests).
    pub async fn open_in_memory(status: StatusBoard) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            status,
        })
    }

    async fn publish_size(&self, db: &Database) -> Result<usize> {
        let size = LibSqlSaveQueueRepository::new(db.connection())
            .count()
            .await?;
        self.status.set_queue_size(size);
        Ok(size)
    }

    /// Persist a payload for later replay; returns the new queue size
    pub async fn enqueue(
        &self,
        document_id: DocumentId,
        payload: Value,
        base_revision: i64,
        reason: Option<String>,
    ) -> Result<usize> {
        let mut item = QueuedSave::new(document_id, payload, base_revision);
        item.last_error = reason;
        let db = self.db.lock().await;
        item.seq = LibSqlSaveQueueRepository::new(db.connection())
            .insert(&item)
            .await?;
        tracing::debug!(document_id = %document_id, seq = item.seq, "queued save");
        self.publish_size(&db).await
    }

    /// All entries in enqueue order
    pub async fn list(&self) -> Result<Vec<QueuedSave>> {
        let db = self.db.lock().await;
        LibSqlSaveQueueRepository::new(db.connection()).list().await
    }

    pub async fn len(&self) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlSaveQueueRepository::new(db.connection()).count().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn pending_for(&self, document_id: &DocumentId) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlSaveQueueRepository::new(db.connection())
            .count_for_document(document_id)
            .await
    }

    /// Newest pending entry of one document, if any
    pub async fn latest_for(&self, document_id: &DocumentId) -> Result<Option<QueuedSave>> {
        let db = self.db.lock().await;
        LibSqlSaveQueueRepository::new(db.connection())
            .latest_for_document(document_id)
            .await
    }

    /// Latest entry per document, ordered by enqueue sequence.
    ///
    /// Earlier entries of the same document are superseded: the latest entry
    /// holds the full payload.
    pub async fn coalesced(&self) -> Result<Vec<QueuedSave>> {
        let items = self.list().await?;
        let mut latest: HashMap<DocumentId, QueuedSave> = HashMap::new();
        for item in items {
            match latest.get(&item.document_id) {
                Some(existing) if existing.seq > item.seq => {}
                _ => {
                    latest.insert(item.document_id, item);
                }
            }
        }
        let mut coalesced: Vec<QueuedSave> = latest.into_values().collect();
        coalesced.sort_by_key(|item| item.seq);
        Ok(coalesced)
    }

    /// Remove entries made obsolete by a commit of `through_seq`.
    ///
    /// The draft is cleared only when nothing newer is still pending.
    pub async fn complete(&self, document_id: &DocumentId, through_seq: i64) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlSaveQueueRepository::new(db.connection());
        repo.delete_through(document_id, through_seq).await?;
        if repo.count_for_document(document_id).await? == 0 {
            repo.delete_draft(document_id).await?;
        }
        self.publish_size(&db).await
    }

    /// Keep a failed entry with its updated retry count and error
    pub async fn record_failure(&self, item: &QueuedSave) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlSaveQueueRepository::new(db.connection())
            .record_failure(item)
            .await?;
        self.publish_size(&db).await
    }

    /// Drop entries that will never replay; the draft stays for recovery
    pub async fn abandon(&self, document_id: &DocumentId, through_seq: i64) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlSaveQueueRepository::new(db.connection())
            .delete_through(document_id, through_seq)
            .await?;
        self.publish_size(&db).await
    }

    /// Drop every entry and the draft of a document
    pub async fn discard(&self, document_id: &DocumentId) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlSaveQueueRepository::new(db.connection());
        repo.delete_document(document_id).await?;
        repo.delete_draft(document_id).await?;
        self.publish_size(&db).await
    }

    pub async fn draft(&self, document_id: &DocumentId) -> Result<Option<DraftSnapshot>> {
        let db = self.db.lock().await;
        LibSqlSaveQueueRepository::new(db.connection())
            .get_draft(document_id)
            .await
    }

    pub async fn drafts(&self) -> Result<Vec<DraftSnapshot>> {
        let db = self.db.lock().await;
        LibSqlSaveQueueRepository::new(db.connection())
            .list_drafts()
            .await
    }

    pub async fn clear_draft(&self, document_id: &DocumentId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSaveQueueRepository::new(db.connection())
            .delete_draft(document_id)
            .await
    }
}

fn is_corrupted_db_error(error: &crate::Error) -> bool {
    error
        .to_string()
        .to_ascii_lowercase()
        .contains("file is not a database")
}

fn quarantine_corrupted_db_file(db_path: &Path) -> Result<()> {
    if db_path.exists() {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let file_name = db_path
            .file_name()
            .map_or_else(|| "queue.db".to_string(), |name| name.to_string_lossy().to_string());
        let backup_path = db_path.with_file_name(format!("{file_name}.corrupt-{timestamp}"));
        std::fs::rename(db_path, &backup_path)?;
        tracing::warn!(
            "Moved corrupted queue database from {} to {}",
            db_path.display(),
            backup_path.display()
        );
    }
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = db_path.as_os_str().to_owned();
        sidecar.push(suffix);
        let sidecar = PathBuf::from(sidecar);
        if sidecar.exists() {
            std::fs::remove_file(&sidecar)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn queue() -> (SaveQueue, StatusBoard) {
        let status = StatusBoard::new();
        let queue = SaveQueue::open_in_memory(status.clone()).await.unwrap();
        (queue, status)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_keeps_every_entry_and_reports_size() {
        let (queue, status) = queue().await;
        let doc = DocumentId::new();

        queue.enqueue(doc, json!({"v": 1}), 1, None).await.unwrap();
        let size = queue.enqueue(doc, json!({"v": 2}), 1, None).await.unwrap();

        assert_eq!(size, 2);
        assert_eq!(status.snapshot().queue_size, 2);
        assert_eq!(queue.draft(&doc).await.unwrap().unwrap().payload, json!({"v": 2}));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn coalesced_returns_latest_entry_per_document() {
        let (queue, _status) = queue().await;
        let first = DocumentId::new();
        let second = DocumentId::new();

        queue.enqueue(first, json!({"v": 1}), 1, None).await.unwrap();
        queue.enqueue(second, json!({"w": 1}), 4, None).await.unwrap();
        queue.enqueue(first, json!({"v": 2}), 1, None).await.unwrap();
        queue.enqueue(first, json!({"v": 3}), 1, None).await.unwrap();

        let coalesced = queue.coalesced().await.unwrap();
        let summary: Vec<_> = coalesced
            .iter()
            .map(|item| (item.document_id, item.payload.clone()))
            .collect();
        assert_eq!(
            summary,
            vec![(second, json!({"w": 1})), (first, json!({"v": 3}))]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn complete_keeps_newer_entries_and_their_draft() {
        let (queue, _status) = queue().await;
        let doc = DocumentId::new();

        queue.enqueue(doc, json!({"v": 1}), 1, None).await.unwrap();
        let snapshot = queue.coalesced().await.unwrap().remove(0);
        queue.enqueue(doc, json!({"v": 2}), 1, None).await.unwrap();

        let remaining = queue.complete(&doc, snapshot.seq).await.unwrap();
        assert_eq!(remaining, 1);
        assert!(queue.draft(&doc).await.unwrap().is_some());

        let latest = queue.coalesced().await.unwrap().remove(0);
        queue.complete(&doc, latest.seq).await.unwrap();
        assert!(queue.is_empty().await.unwrap());
        assert!(queue.draft(&doc).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn abandon_keeps_the_draft() {
        let (queue, _status) = queue().await;
        let doc = DocumentId::new();
        queue.enqueue(doc, json!({"v": 1}), 1, None).await.unwrap();
        let item = queue.coalesced().await.unwrap().remove(0);

        queue.abandon(&doc, item.seq).await.unwrap();

        assert!(queue.is_empty().await.unwrap());
        assert_eq!(queue.drafts().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn discard_removes_entries_and_draft() {
        let (queue, status) = queue().await;
        let doc = DocumentId::new();
        let other = DocumentId::new();
        queue.enqueue(doc, json!({"v": 1}), 1, None).await.unwrap();
        queue.enqueue(other, json!({"v": 1}), 1, None).await.unwrap();

        queue.discard(&doc).await.unwrap();

        assert_eq!(queue.pending_for(&doc).await.unwrap(), 0);
        assert!(queue.draft(&doc).await.unwrap().is_none());
        assert_eq!(status.snapshot().queue_size, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clear_draft_leaves_pending_entries() {
        let (queue, status) = queue().await;
        let doc = DocumentId::new();
        queue.enqueue(doc, json!({"v": 1}), 1, None).await.unwrap();

        queue.clear_draft(&doc).await.unwrap();

        assert!(queue.draft(&doc).await.unwrap().is_none());
        assert_eq!(queue.pending_for(&doc).await.unwrap(), 1);
        assert_eq!(status.snapshot().queue_size, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn latest_for_tracks_the_newest_entry() {
        let (queue, _status) = queue().await;
        let doc = DocumentId::new();
        assert_eq!(queue.latest_for(&doc).await.unwrap(), None);

        queue.enqueue(doc, json!({"v": 1}), 1, None).await.unwrap();
        queue.enqueue(doc, json!({"v": 2}), 1, None).await.unwrap();
        let latest = queue.latest_for(&doc).await.unwrap().unwrap();
        assert_eq!(latest.payload, json!({"v": 2}));

        queue.discard(&doc).await.unwrap();
        assert_eq!(queue.latest_for(&doc).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_enqueues_publish_the_final_size() {
        let (queue, status) = queue().await;
        let tasks: Vec<_> = (0..16)
            .map(|v| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    queue
                        .enqueue(DocumentId::new(), json!({"v": v}), 1, None)
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(status.snapshot().queue_size, 16);
        assert_eq!(status.subscribe().borrow().queue_size, 16);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let doc = DocumentId::new();

        {
            let queue = SaveQueue::open_path(&path, StatusBoard::new()).await.unwrap();
            queue
                .enqueue(doc, json!({"v": 1}), 3, Some("offline".to_string()))
                .await
                .unwrap();
        }

        let status = StatusBoard::new();
        let queue = SaveQueue::open_path(&path, status.clone()).await.unwrap();
        let items = queue.list().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].base_revision, 3);
        assert_eq!(items[0].last_error.as_deref(), Some("offline"));
        assert_eq!(status.snapshot().queue_size, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn corrupted_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();

        let queue = SaveQueue::open_path(&path, StatusBoard::new()).await.unwrap();
        assert!(queue.is_empty().await.unwrap());

        let backups = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(backups, 1);
    }
}
