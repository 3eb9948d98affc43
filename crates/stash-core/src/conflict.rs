//! Conflict surfacing and user-driven resolution.
//!
//! A conflict is only ever cleared by `resolve_by_reload`,
//! `resolve_by_overwrite`, `cancel`, or a later successful save of the
//! same document. There is no automatic policy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::events::{CommitSource, EventBus, SyncEvent};
use crate::models::{ConflictRecord, Document, DocumentId};
use crate::queue::SaveQueue;
use crate::revision::{RevisionBook, RevisionClient};
use crate::status::StatusBoard;
use crate::store::RevisionStore;
use crate::util::unix_millis_now;

pub struct ConflictResolver<S> {
    client: RevisionClient<S>,
    book: RevisionBook,
    queue: SaveQueue,
    status: StatusBoard,
    events: EventBus,
    conflicts: Arc<Mutex<HashMap<DocumentId, ConflictRecord>>>,
}

impl<S> Clone for ConflictResolver<S> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            book: self.book.clone(),
            queue: self.queue.clone(),
            status: self.status.clone(),
            events: self.events.clone(),
            conflicts: Arc::clone(&self.conflicts),
        }
    }
}

impl<S: RevisionStore> ConflictResolver<S> {
    pub fn new(
        client: RevisionClient<S>,
        book: RevisionBook,
        queue: SaveQueue,
        status: StatusBoard,
        events: EventBus,
    ) -> Self {
        Self {
            client,
            book,
            queue,
            status,
            events,
            conflicts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn conflicts(&self) -> MutexGuard<'_, HashMap<DocumentId, ConflictRecord>> {
        self.conflicts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Most recently detected open conflict
    pub fn conflict(&self) -> Option<ConflictRecord> {
        self.conflicts()
            .values()
            .max_by_key(|record| record.detected_at)
            .cloned()
    }

    pub fn conflict_for(&self, document_id: &DocumentId) -> Option<ConflictRecord> {
        self.conflicts().get(document_id).cloned()
    }

    /// Record a compare-and-swap failure and surface it
    pub fn raise(&self, record: ConflictRecord) {
        warn!(
            document_id = %record.document_id,
            current_revision = record.current_revision,
            server_revision = ?record.server_revision,
            "revision conflict detected"
        );
        self.conflicts().insert(record.document_id, record.clone());
        self.publish_status();
        self.events.publish(SyncEvent::Conflict(record));
    }

    /// Drop the conflict of a document after a successful save
    pub fn clear_for(&self, document_id: &DocumentId) {
        let removed = self.conflicts().remove(document_id).is_some();
        if removed {
            self.publish_status();
        }
    }

    /// Dismiss every conflict without resolving anything.
    ///
    /// Local edits stay dirty; the next save attempt raises the conflict again.
    pub fn cancel(&self) {
        self.conflicts().clear();
        self.publish_status();
    }

    fn publish_status(&self) {
        self.status.set_conflict(self.conflict());
    }

    /// Replace local state with the committed document.
    ///
    /// Queued entries and the draft for the document are discarded.
    pub async fn resolve_by_reload(&self, document_id: &DocumentId) -> Result<Document> {
        let _writer = self.book.writer(document_id).await;
        let document = self.client.fetch(document_id).await?;

        self.queue.discard(document_id).await?;
        self.book.reset(document.id, document.revision);
        self.clear_for(document_id);
        info!(document_id = %document_id, revision = document.revision, "reloaded from store");
        self.events.publish(SyncEvent::Reloaded(document.clone()));
        Ok(document)
    }

    /// Write `payload` without a revision predicate and adopt its revision.
    ///
    /// A write that still matches nothing raises a fresh conflict.
    pub async fn resolve_by_overwrite(
        &self,
        document_id: &DocumentId,
        payload: Value,
    ) -> Result<i64> {
        let _writer = self.book.writer(document_id).await;
        let current_revision = self.book.get(document_id).unwrap_or_default();

        let Some(revision) = self.client.overwrite(document_id, &payload).await? else {
            let record = ConflictRecord::new(*document_id, current_revision, None);
            self.raise(record.clone());
            return Err(Error::Conflict(record));
        };

        self.book.reset(*document_id, revision);
        self.queue.discard(document_id).await?;
        self.clear_for(document_id);
        self.status.mark_saved(unix_millis_now());
        info!(document_id = %document_id, revision, "overwrote remote document");
        self.events.publish(SyncEvent::Committed {
            document_id: *document_id,
            revision,
            payload,
            source: CommitSource::Overwrite,
        });
        Ok(revision)
    }
}
