//! Store double shared by the pipeline tests.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::models::{Document, DocumentId};
use crate::store::{MemoryRevisionStore, RevisionStore};

#[derive(Clone, Debug)]
pub struct UpdateCall {
    pub document_id: DocumentId,
    pub payload: Value,
    pub expected_revision: Option<i64>,
    pub at: Instant,
}

#[derive(Default)]
struct Script {
    failures_left: u32,
    stale_left: u32,
    unreachable: bool,
    gate: Option<Arc<Semaphore>>,
    calls: Vec<UpdateCall>,
}

/// Memory store that records updates and fails them on demand
#[derive(Default)]
pub struct ScriptedStore {
    inner: MemoryRevisionStore,
    script: Mutex<Script>,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Direct access to the committed state, standing in for other sessions
    pub const fn remote(&self) -> &MemoryRevisionStore {
        &self.inner
    }

    pub fn seed(&self, payload: Value, revision: i64) -> DocumentId {
        let id = DocumentId::new();
        self.inner.insert(Document::new(id, payload, revision));
        id
    }

    pub fn fail_next_updates(&self, count: u32) {
        self.script().failures_left = count;
    }

    /// Answer the next updates with the expected revision, writing nothing
    pub fn stall_next_revisions(&self, count: u32) {
        self.script().stale_left = count;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.script().unreachable = unreachable;
    }

    /// Park every update until permits are added to the returned semaphore
    pub fn hold_updates(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.script().gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<UpdateCall> {
        self.script().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.script().calls.len()
    }

    pub async fn committed(&self, id: &DocumentId) -> Document {
        self.inner.read(id).await.unwrap().unwrap()
    }
}

impl RevisionStore for ScriptedStore {
    async fn create(&self, payload: &Value) -> Result<Document> {
        self.inner.create(payload).await
    }

    async fn read(&self, id: &DocumentId) -> Result<Option<Document>> {
        if self.script().unreachable {
            return Err(Error::Transport("connection refused".to_string()));
        }
        self.inner.read(id).await
    }

    async fn update(
        &self,
        id: &DocumentId,
        payload: &Value,
        expected_revision: Option<i64>,
    ) -> Result<Option<i64>> {
        let gate = {
            let mut script = self.script();
            script.calls.push(UpdateCall {
                document_id: *id,
                payload: payload.clone(),
                expected_revision,
                at: Instant::now(),
            });
            if script.unreachable {
                return Err(Error::Transport("connection refused".to_string()));
            }
            if script.failures_left > 0 {
                script.failures_left -= 1;
                return Err(Error::Transport("gateway timeout".to_string()));
            }
            if script.stale_left > 0 {
                script.stale_left -= 1;
                return Ok(Some(expected_revision.unwrap_or_default()));
            }
            script.gate.clone()
        };
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|error| Error::Transport(error.to_string()))?;
        }
        self.inner.update(id, payload, expected_revision).await
    }

    async fn update_summary(&self, id: &DocumentId, name: &str) -> Result<()> {
        self.inner.update_summary(id, name).await
    }
}

/// One session's worth of pipeline components over a `ScriptedStore`
pub struct Parts {
    pub store: Arc<ScriptedStore>,
    pub client: crate::revision::RevisionClient<ScriptedStore>,
    pub book: crate::revision::RevisionBook,
    pub queue: crate::queue::SaveQueue,
    pub status: crate::status::StatusBoard,
    pub events: crate::events::EventBus,
    pub monitor: crate::connectivity::ConnectivityMonitor,
    pub metrics: Arc<crate::metrics::MetricsRecorder>,
    pub resolver: crate::conflict::ConflictResolver<ScriptedStore>,
}

impl Parts {
    pub async fn new() -> Self {
        Self::with_store(ScriptedStore::new()).await
    }

    /// A second session talking to the same store
    pub async fn sharing(other: &Self) -> Self {
        Self::with_store(Arc::clone(&other.store)).await
    }

    async fn with_store(store: Arc<ScriptedStore>) -> Self {
        let status = crate::status::StatusBoard::new();
        let queue = crate::queue::SaveQueue::open_in_memory(status.clone())
            .await
            .unwrap();
        let client = crate::revision::RevisionClient::new(Arc::clone(&store));
        let book = crate::revision::RevisionBook::new();
        let events = crate::events::EventBus::new();
        let resolver = crate::conflict::ConflictResolver::new(
            client.clone(),
            book.clone(),
            queue.clone(),
            status.clone(),
            events.clone(),
        );
        Self {
            store,
            client,
            book,
            queue,
            status,
            events,
            monitor: crate::connectivity::ConnectivityMonitor::new(true),
            metrics: Arc::new(crate::metrics::MetricsRecorder::new()),
            resolver,
        }
    }

    /// Seed a committed document and make this session aware of it
    pub fn open(&self, payload: Value, revision: i64) -> DocumentId {
        let id = self.store.seed(payload, revision);
        self.book.reset(id, revision);
        id
    }

    pub fn controller(&self) -> crate::retry::SaveController<ScriptedStore> {
        crate::retry::SaveController::new(
            self.client.clone(),
            self.book.clone(),
            self.queue.clone(),
            self.resolver.clone(),
            self.monitor.clone(),
            self.status.clone(),
            self.events.clone(),
            self.metrics.clone(),
            crate::retry::RetryPolicy::default(),
        )
    }

    pub fn drainer(&self) -> crate::drain::QueueDrainer<ScriptedStore> {
        crate::drain::QueueDrainer::new(
            self.client.clone(),
            self.book.clone(),
            self.queue.clone(),
            self.resolver.clone(),
            self.monitor.clone(),
            self.status.clone(),
            self.events.clone(),
            crate::drain::DEFAULT_CONFLICT_RETRY_CAP,
        )
    }
}
