//! Save pipeline facade.
//!
//! `SavePipeline` owns one session's components and the background drain
//! loop. Everything it starts is scoped to `start()`/`stop()`, so separate
//! pipelines never share timers or listeners.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::autosave::AutosaveHandle;
use crate::config::PipelineConfig;
use crate::conflict::ConflictResolver;
use crate::connectivity::ConnectivityMonitor;
use crate::drain::{DrainLoop, DrainOutcome, QueueDrainer};
use crate::error::Result;
use crate::events::{EventBus, SyncEvent};
use crate::metrics::{MetricsSink, TracingMetricsSink};
use crate::models::{Document, DocumentId, SaveStatus};
use crate::queue::SaveQueue;
use crate::retry::{SaveController, SaveDisposition};
use crate::revision::{RevisionBook, RevisionClient};
use crate::status::StatusBoard;
use crate::store::RevisionStore;

pub struct PipelineOptions {
    pub config: PipelineConfig,
    pub monitor: ConnectivityMonitor,
    pub metrics: Arc<dyn MetricsSink>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            config: PipelineConfig::default(),
            monitor: ConnectivityMonitor::new(true),
            metrics: Arc::new(TracingMetricsSink),
        }
    }
}

pub struct SavePipeline<S> {
    config: PipelineConfig,
    client: RevisionClient<S>,
    book: RevisionBook,
    queue: SaveQueue,
    status: StatusBoard,
    events: EventBus,
    monitor: ConnectivityMonitor,
    resolver: ConflictResolver<S>,
    controller: SaveController<S>,
    drainer: QueueDrainer<S>,
    drain_loop: Mutex<Option<DrainLoop>>,
}

impl<S: RevisionStore> SavePipeline<S> {
    /// Build a pipeline whose queue lives in the database at `queue_path`
    pub async fn open(
        store: Arc<S>,
        queue_path: impl Into<PathBuf>,
        options: PipelineOptions,
    ) -> Result<Self> {
        let status = StatusBoard::new();
        let queue = SaveQueue::open_path(queue_path, status.clone()).await?;
        Ok(Self::assemble(store, queue, status, options))
    }

    /// Build a pipeline with a non-durable queue (primarily for tests).
    pub async fn in_memory(store: Arc<S>, options: PipelineOptions) -> Result<Self> {
        let status = StatusBoard::new();
        let queue = SaveQueue::open_in_memory(status.clone()).await?;
        Ok(Self::assemble(store, queue, status, options))
    }

    fn assemble(
        store: Arc<S>,
        queue: SaveQueue,
        status: StatusBoard,
        options: PipelineOptions,
    ) -> Self {
        let PipelineOptions {
            config,
            monitor,
            metrics,
        } = options;
        let client = RevisionClient::new(store);
        let book = RevisionBook::new();
        let events = EventBus::new();
        let resolver = ConflictResolver::new(
            client.clone(),
            book.clone(),
            queue.clone(),
            status.clone(),
            events.clone(),
        );
        let controller = SaveController::new(
            client.clone(),
            book.clone(),
            queue.clone(),
            resolver.clone(),
            monitor.clone(),
            status.clone(),
            events.clone(),
            metrics,
            config.retry,
        );
        let drainer = QueueDrainer::new(
            client.clone(),
            book.clone(),
            queue.clone(),
            resolver.clone(),
            monitor.clone(),
            status.clone(),
            events.clone(),
            config.conflict_retry_cap,
        );

        Self {
            config,
            client,
            book,
            queue,
            status,
            events,
            monitor,
            resolver,
            controller,
            drainer,
            drain_loop: Mutex::new(None),
        }
    }

    /// Start the background drain loop; no-op when already running
    pub fn start(&self) {
        let mut drain_loop = self
            .drain_loop
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if drain_loop.is_none() {
            tracing::info!(
                interval_secs = self.config.drain_interval.as_secs(),
                "starting queue drain loop"
            );
            *drain_loop = Some(DrainLoop::start(
                self.drainer.clone(),
                &self.monitor,
                self.config.drain_interval,
            ));
        }
    }

    /// Stop the drain loop, letting a drain in progress finish
    pub async fn stop(&self) {
        let drain_loop = self
            .drain_loop
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(drain_loop) = drain_loop {
            drain_loop.stop().await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.drain_loop
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }

    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub const fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub const fn queue(&self) -> &SaveQueue {
        &self.queue
    }

    pub const fn resolver(&self) -> &ConflictResolver<S> {
        &self.resolver
    }

    pub fn status(&self) -> SaveStatus {
        self.status.snapshot()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SaveStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub async fn create_document(&self, payload: &Value) -> Result<Document> {
        let document = self.client.create(payload).await?;
        self.book.reset(document.id, document.revision);
        Ok(document)
    }

    /// Fetch the committed document and start autosaving it
    pub async fn open_document(&self, id: &DocumentId) -> Result<(Document, AutosaveHandle)> {
        let document = self.client.fetch(id).await?;
        let handle = self.open_known(document.clone()).await?;
        Ok((document, handle))
    }

    /// Start autosaving a document whose committed revision is already known
    pub async fn open_known(&self, document: Document) -> Result<AutosaveHandle> {
        self.book.reset(document.id, document.revision);
        if let Some(draft) = self.queue.draft(&document.id).await? {
            tracing::info!(
                document_id = %document.id,
                saved_at = draft.saved_at,
                "a local draft was found for this document"
            );
        }
        Ok(AutosaveHandle::spawn(
            self.controller.clone(),
            self.status.clone(),
            &self.events,
            document,
            self.config.debounce,
        ))
    }

    /// Remember `revision` as the committed revision of `id`
    pub fn track(&self, id: DocumentId, revision: i64) {
        self.book.reset(id, revision);
    }

    pub fn known_revision(&self, id: &DocumentId) -> Option<i64> {
        self.book.get(id)
    }

    /// Save once, without the debounce
    pub async fn save(&self, id: DocumentId, payload: Value) -> Result<SaveDisposition> {
        self.controller.save(id, payload).await
    }

    /// Replay the queue now
    pub async fn drain(&self) -> Result<DrainOutcome> {
        self.drainer.drain().await
    }
}
