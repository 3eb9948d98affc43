//! stash-core - Resilient saving for remotely stored campaigns
//!
//! Edits flow from an autosave scheduler through a retrying save controller
//! to a revision store with compare-and-swap updates. Saves that cannot reach
//! the store are kept in a durable local queue and replayed when
//! connectivity returns; revision conflicts are surfaced for the user to
//! resolve.

pub mod autosave;
pub mod config;
pub mod conflict;
pub mod connectivity;
pub mod db;
pub mod drain;
pub mod error;
pub mod events;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod revision;
pub mod status;
pub mod store;
pub mod util;

#[cfg(test)]
mod testing;

pub use autosave::AutosaveHandle;
pub use config::{ConfigError, PipelineConfig};
pub use connectivity::{ConnectivityMonitor, ConnectivityProbe, ProbeLoop};
pub use drain::{DrainOutcome, DrainReport};
pub use error::{Error, Result};
pub use events::SyncEvent;
pub use models::{ConflictRecord, Document, DocumentId, SaveState, SaveStatus};
pub use pipeline::{PipelineOptions, SavePipeline};
pub use retry::{RetryPolicy, SaveDisposition};
pub use store::{HttpRevisionStore, MemoryRevisionStore, RevisionStore, SqliteRevisionStore};
