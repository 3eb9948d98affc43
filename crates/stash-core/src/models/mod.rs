//! Data models for Stash

mod conflict;
mod document;
mod queued_save;
mod status;
mod summary;

pub use conflict::ConflictRecord;
pub use document::{display_name, payload_size, Document, DocumentId};
pub use queued_save::{DraftSnapshot, QueuedSave};
pub use status::{SaveState, SaveStatus};
pub use summary::{validate_display_name, CampaignSummary, MAX_DISPLAY_NAME_CHARS};
