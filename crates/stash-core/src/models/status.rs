//! Save state exposed to the editing surface.

use serde::{Deserialize, Serialize};

use super::ConflictRecord;

/// Per-document autosave state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveState {
    Clean,
    Dirty,
    Saving,
}

/// Snapshot of the pipeline state for UI indicators.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveStatus {
    pub is_saving: bool,
    /// Last successful commit (Unix ms)
    pub last_saved: Option<i64>,
    pub has_unsaved_changes: bool,
    pub conflict: Option<ConflictRecord>,
    pub queue_size: usize,
    pub is_syncing: bool,
    /// Most recent save failure kept for display
    pub last_error: Option<String>,
}
