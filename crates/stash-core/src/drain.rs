//! Replay of the offline queue.
//!
//! A drain snapshots the queue, keeps the latest entry per document and
//! sends each through the revision client. Only one drain runs at a time
//! across the whole queue; documents first enqueued meanwhile wait for the
//! next one. Each entry is re-read under the document's writer gate, so a
//! save or reload that settled the document first is never undone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::conflict::ConflictResolver;
use crate::connectivity::ConnectivityMonitor;
use crate::error::Result;
use crate::events::{CommitSource, EventBus, SyncEvent};
use crate::models::{ConflictRecord, QueuedSave};
use crate::queue::SaveQueue;
use crate::revision::{RevisionBook, RevisionClient, UpdateOutcome};
use crate::status::StatusBoard;
use crate::store::RevisionStore;
use crate::util::{compact_text, unix_millis_now};

/// Conflicting queue entries are retried this many times before abandonment
pub const DEFAULT_CONFLICT_RETRY_CAP: u32 = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub committed: usize,
    pub requeued: usize,
    pub abandoned: usize,
    /// Documents settled by another writer before their turn came
    pub skipped: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    Offline,
    /// Another drain holds the flight; nothing was done
    AlreadyRunning,
    Completed(DrainReport),
}

enum ItemResult {
    Skipped,
    Committed,
    Requeued,
    Abandoned,
}

pub struct QueueDrainer<S> {
    client: RevisionClient<S>,
    book: RevisionBook,
    queue: SaveQueue,
    resolver: ConflictResolver<S>,
    monitor: ConnectivityMonitor,
    status: StatusBoard,
    events: EventBus,
    conflict_retry_cap: u32,
    in_flight: Arc<AtomicBool>,
}

impl<S> Clone for QueueDrainer<S> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            book: self.book.clone(),
            queue: self.queue.clone(),
            resolver: self.resolver.clone(),
            monitor: self.monitor.clone(),
            status: self.status.clone(),
            events: self.events.clone(),
            conflict_retry_cap: self.conflict_retry_cap,
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

struct FlightGuard<'a> {
    flag: &'a AtomicBool,
    status: &'a StatusBoard,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.status.set_syncing(false);
    }
}

impl<S: RevisionStore> QueueDrainer<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: RevisionClient<S>,
        book: RevisionBook,
        queue: SaveQueue,
        resolver: ConflictResolver<S>,
        monitor: ConnectivityMonitor,
        status: StatusBoard,
        events: EventBus,
        conflict_retry_cap: u32,
    ) -> Self {
        Self {
            client,
            book,
            queue,
            resolver,
            monitor,
            status,
            events,
            conflict_retry_cap,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Replay the queue once.
    ///
    /// Returns without side effects when offline or when another drain is
    /// running. Local storage failures abort the drain; store failures only
    /// affect their own entry.
    pub async fn drain(&self) -> Result<DrainOutcome> {
        if !self.monitor.is_online() {
            return Ok(DrainOutcome::Offline);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("drain already running");
            return Ok(DrainOutcome::AlreadyRunning);
        }
        let _flight = FlightGuard {
            flag: &self.in_flight,
            status: &self.status,
        };
        self.status.set_syncing(true);

        let items = self.queue.coalesced().await?;
        let mut report = DrainReport::default();
        for item in items {
            match self.replay(&item).await? {
                ItemResult::Skipped => {
                    report.skipped += 1;
                    continue;
                }
                ItemResult::Committed => report.committed += 1,
                ItemResult::Requeued => report.requeued += 1,
                ItemResult::Abandoned => report.abandoned += 1,
            }
            report.attempted += 1;
        }

        if report.attempted > 0 || report.skipped > 0 {
            info!(
                attempted = report.attempted,
                skipped = report.skipped,
                committed = report.committed,
                requeued = report.requeued,
                abandoned = report.abandoned,
                "queue drain finished"
            );
        }
        Ok(DrainOutcome::Completed(report))
    }

    async fn replay(&self, snapshot: &QueuedSave) -> Result<ItemResult> {
        let document_id = snapshot.document_id;
        let _writer = self.book.writer(&document_id).await;
        let Some(mut item) = self.queue.latest_for(&document_id).await? else {
            debug!(
                document_id = %document_id,
                seq = snapshot.seq,
                "queued save settled by another writer, skipping"
            );
            return Ok(ItemResult::Skipped);
        };
        let expected_revision = self.book.get(&document_id).unwrap_or(item.base_revision);

        match self
            .client
            .attempt_update(&document_id, &item.payload, expected_revision)
            .await
        {
            Ok(UpdateOutcome::Committed { new_revision }) => {
                self.book.adopt(document_id, new_revision);
                self.queue.complete(&document_id, item.seq).await?;
                self.resolver.clear_for(&document_id);
                self.status.mark_saved(unix_millis_now());
                debug!(
                    document_id = %document_id,
                    revision = new_revision,
                    "queued save committed"
                );
                self.events.publish(SyncEvent::Committed {
                    document_id,
                    revision: new_revision,
                    payload: item.payload,
                    source: CommitSource::Drain,
                });
                Ok(ItemResult::Committed)
            }
            Ok(UpdateOutcome::Conflict { server_revision }) => {
                let record = ConflictRecord::new(document_id, expected_revision, server_revision);
                let message = crate::Error::Conflict(record.clone()).to_string();
                self.resolver.raise(record);
                item.retry_count += 1;
                item.last_error = Some(message.clone());
                if item.retry_count < self.conflict_retry_cap {
                    self.queue.record_failure(&item).await?;
                    return Ok(ItemResult::Requeued);
                }

                error!(
                    document_id = %document_id,
                    retry_count = item.retry_count,
                    "abandoning queued save after repeated conflicts; draft kept for recovery"
                );
                self.queue.abandon(&document_id, item.seq).await?;
                self.status.set_error(Some(message.clone()));
                self.events.publish(SyncEvent::Abandoned {
                    document_id,
                    error: message,
                });
                Ok(ItemResult::Abandoned)
            }
            Err(failure) => {
                warn!(
                    document_id = %document_id,
                    retry_count = item.retry_count,
                    "queued save failed: {}",
                    compact_text(&failure.to_string())
                );
                item.retry_count += 1;
                item.last_error = Some(failure.to_string());
                self.queue.record_failure(&item).await?;
                Ok(ItemResult::Requeued)
            }
        }
    }
}

/// Background trigger for drains: a fixed interval while online plus
/// every offline to online transition
pub struct DrainLoop {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl DrainLoop {
    pub fn start<S: RevisionStore>(
        drainer: QueueDrainer<S>,
        monitor: &ConnectivityMonitor,
        interval: Duration,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let mut connectivity = monitor.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut was_online = *connectivity.borrow();
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *connectivity.borrow_and_update();
                        let reconnected = online && !was_online;
                        was_online = online;
                        if !reconnected {
                            continue;
                        }
                        debug!("connectivity restored, draining queue");
                    }
                    _ = ticker.tick() => {}
                }

                if let Err(error) = drainer.drain().await {
                    warn!("queue drain failed: {error}");
                }
            }
            debug!("drain loop stopped");
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop triggering drains; an in-progress drain runs to completion first
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for DrainLoop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
