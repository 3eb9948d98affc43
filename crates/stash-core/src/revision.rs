//! Revision-aware access to the remote store.
//!
//! `RevisionClient` turns raw store results into commit/conflict outcomes,
//! and `RevisionBook` remembers the revision each open session last
//! committed. Writers for the same document take the book's gate first so
//! that no two writes for one document are ever in flight together.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{display_name, Document, DocumentId};
use crate::store::RevisionStore;

/// Result of a compare-and-swap update
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Committed { new_revision: i64 },
    /// The predicate matched zero rows; `server_revision` is informational
    Conflict { server_revision: Option<i64> },
}

pub struct RevisionClient<S> {
    store: Arc<S>,
}

impl<S> Clone for RevisionClient<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: RevisionStore> RevisionClient<S> {
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn create(&self, payload: &Value) -> Result<Document> {
        let document = self.store.create(payload).await?;
        self.propagate_summary(&document.id, payload).await;
        Ok(document)
    }

    pub async fn fetch(&self, id: &DocumentId) -> Result<Document> {
        self.store
            .read(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Write `payload` if the stored revision still equals `expected_revision`.
    ///
    /// Transport failures propagate as errors; a mismatched predicate is a
    /// `Conflict` outcome.
    pub async fn attempt_update(
        &self,
        id: &DocumentId,
        payload: &Value,
        expected_revision: i64,
    ) -> Result<UpdateOutcome> {
        match self.store.update(id, payload, Some(expected_revision)).await? {
            Some(new_revision) if new_revision > expected_revision => {
                debug!(document_id = %id, new_revision, "revision committed");
                self.propagate_summary(id, payload).await;
                Ok(UpdateOutcome::Committed { new_revision })
            }
            Some(new_revision) => Err(Error::Transport(format!(
                "store returned non-increasing revision {new_revision} after {expected_revision}"
            ))),
            None => {
                let server_revision = match self.store.read(id).await {
                    Ok(document) => document.map(|document| document.revision),
                    Err(error) => {
                        warn!(
                            document_id = %id,
                            "failed to read server revision after conflict: {error}"
                        );
                        None
                    }
                };
                debug!(
                    document_id = %id,
                    expected_revision,
                    ?server_revision,
                    "revision conflict"
                );
                Ok(UpdateOutcome::Conflict { server_revision })
            }
        }
    }

    /// Write `payload` without a revision predicate
    pub async fn overwrite(&self, id: &DocumentId, payload: &Value) -> Result<Option<i64>> {
        let revision = self.store.update(id, payload, None).await?;
        if revision.is_some() {
            self.propagate_summary(id, payload).await;
        }
        Ok(revision)
    }

    /// Best effort: a failed summary write never fails the save
    async fn propagate_summary(&self, id: &DocumentId, payload: &Value) {
        let Some(name) = display_name(payload) else {
            return;
        };
        if let Err(error) = self.store.update_summary(id, name).await {
            warn!(document_id = %id, "failed to propagate campaign summary: {error}");
        }
    }
}

/// Last committed revision per open document, plus per-document writer gates
#[derive(Clone, Debug, Default)]
pub struct RevisionBook {
    revisions: Arc<Mutex<HashMap<DocumentId, i64>>>,
    gates: Arc<Mutex<HashMap<DocumentId, Arc<AsyncMutex<()>>>>>,
}

impl RevisionBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn revisions(&self) -> MutexGuard<'_, HashMap<DocumentId, i64>> {
        self.revisions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn get(&self, id: &DocumentId) -> Option<i64> {
        self.revisions().get(id).copied()
    }

    /// Record a newly observed revision; older values never replace newer ones
    pub fn adopt(&self, id: DocumentId, revision: i64) {
        let mut revisions = self.revisions();
        let entry = revisions.entry(id).or_insert(revision);
        if *entry < revision {
            *entry = revision;
        }
    }

    /// Replace the revision unconditionally, used after a reload
    pub fn reset(&self, id: DocumentId, revision: i64) {
        self.revisions().insert(id, revision);
    }

    pub fn forget(&self, id: &DocumentId) {
        self.revisions().remove(id);
    }

    /// Wait for exclusive write access to `id`
    pub async fn writer(&self, id: &DocumentId) -> OwnedMutexGuard<()> {
        let gate = {
            let mut gates = self
                .gates
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Arc::clone(gates.entry(*id).or_default())
        };
        gate.lock_owned().await
    }
}
