//! Save attempts with exponential backoff and queue fallback.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::conflict::ConflictResolver;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, Result};
use crate::events::{CommitSource, EventBus, SyncEvent};
use crate::metrics::{MetricsSink, SaveMetric, SaveOutcome};
use crate::models::{payload_size, ConflictRecord, Document, DocumentId};
use crate::queue::SaveQueue;
use crate::revision::{RevisionBook, RevisionClient, UpdateOutcome};
use crate::status::StatusBoard;
use crate::store::RevisionStore;
use crate::util::unix_millis_now;

/// Attempt count and delay growth for online saves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait after the first failed attempt; doubles after each further one
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt number `attempt`, including the last one
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// How a save request was settled
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveDisposition {
    Committed { revision: i64 },
    /// Durable in the local queue, not yet on the store
    Queued,
    Conflicted(ConflictRecord),
}

impl SaveDisposition {
    /// Committed or durably queued
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Committed { .. } | Self::Queued)
    }
}

pub struct SaveController<S> {
    client: RevisionClient<S>,
    book: RevisionBook,
    queue: SaveQueue,
    resolver: ConflictResolver<S>,
    monitor: ConnectivityMonitor,
    status: StatusBoard,
    events: EventBus,
    metrics: Arc<dyn MetricsSink>,
    policy: RetryPolicy,
}

impl<S> Clone for SaveController<S> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            book: self.book.clone(),
            queue: self.queue.clone(),
            resolver: self.resolver.clone(),
            monitor: self.monitor.clone(),
            status: self.status.clone(),
            events: self.events.clone(),
            metrics: Arc::clone(&self.metrics),
            policy: self.policy,
        }
    }
}

impl<S: RevisionStore> SaveController<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: RevisionClient<S>,
        book: RevisionBook,
        queue: SaveQueue,
        resolver: ConflictResolver<S>,
        monitor: ConnectivityMonitor,
        status: StatusBoard,
        events: EventBus,
        metrics: Arc<dyn MetricsSink>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            book,
            queue,
            resolver,
            monitor,
            status,
            events,
            metrics,
            policy,
        }
    }

    /// Revision this session last committed or reloaded for `document_id`
    pub fn known_revision(&self, document_id: &DocumentId) -> Option<i64> {
        self.book.get(document_id)
    }

    /// The committed document as the store has it now
    pub async fn fetch(&self, document_id: &DocumentId) -> Result<Document> {
        self.client.fetch(document_id).await
    }

    /// Save `payload` as the next revision of `document_id`.
    ///
    /// Offline saves go straight to the queue. Online saves are retried on
    /// transport failure; once attempts run out the payload is queued and the
    /// transport error is returned. Conflicts are surfaced and never queued.
    pub async fn save(&self, document_id: DocumentId, payload: Value) -> Result<SaveDisposition> {
        let _writer = self.book.writer(&document_id).await;
        let base_revision = self.book.get(&document_id).ok_or_else(|| {
            Error::InvalidInput(format!("no known revision for document {document_id}"))
        })?;
        let payload_bytes = payload_size(&payload);

        if !self.monitor.is_online() {
            let started = Instant::now();
            self.enqueue(document_id, payload, base_revision, "offline".to_string())
                .await?;
            self.record(document_id, started, payload_bytes, 0, false, SaveOutcome::Queued);
            return Ok(SaveDisposition::Queued);
        }

        let mut last_error = None;
        for attempt in 1..=self.policy.max_attempts {
            let started = Instant::now();
            let retry_count = attempt - 1;
            match self
                .client
                .attempt_update(&document_id, &payload, base_revision)
                .await
            {
                Ok(UpdateOutcome::Committed { new_revision }) => {
                    self.record(
                        document_id,
                        started,
                        payload_bytes,
                        retry_count,
                        true,
                        SaveOutcome::Committed,
                    );
                    self.committed(document_id, payload, new_revision).await?;
                    return Ok(SaveDisposition::Committed {
                        revision: new_revision,
                    });
                }
                Ok(UpdateOutcome::Conflict { server_revision }) => {
                    self.record(
                        document_id,
                        started,
                        payload_bytes,
                        retry_count,
                        true,
                        SaveOutcome::Conflict,
                    );
                    let record = ConflictRecord::new(document_id, base_revision, server_revision);
                    self.resolver.raise(record.clone());
                    return Ok(SaveDisposition::Conflicted(record));
                }
                Err(error) if error.is_transport() => {
                    self.record(
                        document_id,
                        started,
                        payload_bytes,
                        retry_count,
                        true,
                        SaveOutcome::TransportError,
                    );
                    warn!(
                        document_id = %document_id,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        "save attempt failed: {error}"
                    );
                    tokio::time::sleep(self.policy.delay_after(attempt)).await;
                    last_error = Some(error);
                }
                Err(error) => {
                    self.record(
                        document_id,
                        started,
                        payload_bytes,
                        retry_count,
                        true,
                        SaveOutcome::Failed,
                    );
                    return Err(error);
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| Error::Transport("no save attempts were allowed".to_string()));
        self.enqueue(document_id, payload, base_revision, error.to_string())
            .await?;
        Err(error)
    }

    async fn enqueue(
        &self,
        document_id: DocumentId,
        payload: Value,
        base_revision: i64,
        reason: String,
    ) -> Result<()> {
        let queue_size = self
            .queue
            .enqueue(document_id, payload, base_revision, Some(reason))
            .await?;
        info!(document_id = %document_id, queue_size, "saved locally, will sync");
        self.events.publish(SyncEvent::Queued {
            document_id,
            queue_size,
        });
        Ok(())
    }

    async fn committed(
        &self,
        document_id: DocumentId,
        payload: Value,
        revision: i64,
    ) -> Result<()> {
        self.book.adopt(document_id, revision);
        self.queue.discard(&document_id).await?;
        self.resolver.clear_for(&document_id);
        self.status.mark_saved(unix_millis_now());
        debug!(document_id = %document_id, revision, "save committed");
        self.events.publish(SyncEvent::Committed {
            document_id,
            revision,
            payload,
            source: CommitSource::Online,
        });
        Ok(())
    }

    fn record(
        &self,
        document_id: DocumentId,
        started: Instant,
        payload_bytes: usize,
        retry_count: u32,
        online: bool,
        outcome: SaveOutcome,
    ) {
        self.metrics.record(&SaveMetric {
            document_id,
            duration: started.elapsed(),
            payload_bytes,
            retry_count,
            online,
            outcome,
        });
    }
}
