//! Offline write queue models

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::DocumentId;

/// A save that could not reach the remote store and waits for replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSave {
    /// Unique identifier of this queue entry
    pub id: Uuid,
    /// Store-assigned sequence; higher means enqueued later (0 until persisted)
    pub seq: i64,
    /// Document the payload belongs to
    pub document_id: DocumentId,
    /// Full document payload to write
    pub payload: Value,
    /// Revision the session believed current when the payload was queued
    pub base_revision: i64,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
    /// Failed replay attempts so far
    pub retry_count: u32,
    /// Last replay error, if any
    pub last_error: Option<String>,
}

impl QueuedSave {
    /// Create a fresh queue entry
    #[must_use]
    pub fn new(document_id: DocumentId, payload: Value, base_revision: i64) -> Self {
        Self {
            id: Uuid::now_v7(),
            seq: 0,
            document_id,
            payload,
            base_revision,
            enqueued_at: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
            last_error: None,
        }
    }

    /// Attach the error that caused the payload to be queued
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

/// Recovery copy of the last unsynced payload for a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSnapshot {
    /// Document the draft belongs to
    pub document_id: DocumentId,
    /// Last payload that was queued but not yet synced
    pub payload: Value,
    /// When the draft was written (Unix ms)
    pub saved_at: i64,
}
