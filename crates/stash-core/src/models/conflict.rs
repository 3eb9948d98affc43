//! Revision conflict model

use serde::{Deserialize, Serialize};

use super::DocumentId;

/// A compare-and-swap update that matched zero rows.
///
/// Only cleared by an explicit resolution or a later successful save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Document involved in the conflict
    pub document_id: DocumentId,
    /// Revision the session sent as its predicate
    pub current_revision: i64,
    /// Revision the store holds, for display only (`None` if it could not be read)
    pub server_revision: Option<i64>,
    /// Always true for a live record
    pub has_conflict: bool,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
}

impl ConflictRecord {
    #[must_use]
    pub fn new(
        document_id: DocumentId,
        current_revision: i64,
        server_revision: Option<i64>,
    ) -> Self {
        Self {
            document_id,
            current_revision,
            server_revision,
            has_conflict: true,
            detected_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
