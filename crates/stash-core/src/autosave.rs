//! Debounced autosave per open document.
//!
//! Each open document gets one scheduler task. Changes restart the debounce
//! timer; when it fires the latest payload goes to the save controller.
//! The task never has two saves in flight, and a manual save waits for the
//! in-flight one before sending again.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::events::{CommitSource, EventBus, SyncEvent};
use crate::models::{Document, DocumentId, SaveState};
use crate::retry::{SaveController, SaveDisposition};
use crate::status::StatusBoard;
use crate::store::RevisionStore;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(3);

enum Command {
    Changed(Value),
    SaveNow(Waiter),
}

type Waiter = oneshot::Sender<Result<()>>;
type SaveTask = JoinHandle<Result<SaveDisposition>>;

/// Editing-surface side of a document's autosave task.
///
/// The task stops once every clone of the handle is dropped.
#[derive(Clone, Debug)]
pub struct AutosaveHandle {
    document_id: DocumentId,
    commands: mpsc::UnboundedSender<Command>,
    status: StatusBoard,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Changed(_) => f.write_str("Changed"),
            Self::SaveNow(_) => f.write_str("SaveNow"),
        }
    }
}

impl AutosaveHandle {
    /// Start the autosave task for `document` as currently committed
    pub fn spawn<S: RevisionStore>(
        controller: SaveController<S>,
        status: StatusBoard,
        events: &EventBus,
        document: Document,
        debounce: Duration,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        status.set_document_state(document.id, SaveState::Clean);
        let scheduler = Scheduler {
            document_id: document.id,
            controller,
            status: status.clone(),
            debounce,
            last_sent: document.payload.to_string(),
            revision: document.revision,
            current: document.payload,
            state: SaveState::Clean,
            deadline: None,
            sending: None,
            waiting: Vec::new(),
            next_waiting: Vec::new(),
        };
        tokio::spawn(run(scheduler, receiver, events.subscribe()));

        Self {
            document_id: document.id,
            commands,
            status,
        }
    }

    pub const fn document_id(&self) -> DocumentId {
        self.document_id
    }

    pub fn state(&self) -> Option<SaveState> {
        self.status.document_state(&self.document_id)
    }

    /// Report a new document snapshot; restarts the debounce timer
    pub fn document_changed(&self, payload: Value) -> Result<()> {
        self.commands
            .send(Command::Changed(payload))
            .map_err(|_| self.gone())?;
        self.status
            .set_document_state(self.document_id, SaveState::Dirty);
        Ok(())
    }

    /// Save now, skipping the debounce.
    ///
    /// Resolves once the latest snapshot is committed or queued.
    pub async fn save_now(&self) -> Result<()> {
        let (waiter, settled) = oneshot::channel();
        self.commands
            .send(Command::SaveNow(waiter))
            .map_err(|_| self.gone())?;
        settled.await.map_err(|_| self.gone())?
    }

    fn gone(&self) -> Error {
        Error::Shutdown(format!("autosave for {} has stopped", self.document_id))
    }
}

struct Scheduler<S> {
    document_id: DocumentId,
    controller: SaveController<S>,
    status: StatusBoard,
    debounce: Duration,
    current: Value,
    /// Serialization of the last payload the store or queue accepted
    last_sent: String,
    /// Last committed revision this task has seen
    revision: i64,
    state: SaveState,
    deadline: Option<Instant>,
    sending: Option<String>,
    /// Settled by the save in flight
    waiting: Vec<Waiter>,
    /// Need another save after the one in flight
    next_waiting: Vec<Waiter>,
}

impl<S: RevisionStore> Scheduler<S> {
    fn set_state(&mut self, state: SaveState) {
        self.state = state;
        self.status.set_document_state(self.document_id, state);
    }

    fn changed(&mut self, payload: Value) {
        self.current = payload;
        self.set_state(SaveState::Dirty);
        self.deadline = Some(Instant::now() + self.debounce);
    }

    fn wait_for_save(&mut self, waiter: Waiter, in_flight: bool) {
        self.deadline = None;
        if !in_flight || self.state == SaveState::Saving {
            self.waiting.push(waiter);
        } else {
            self.next_waiting.push(waiter);
        }
    }

    fn start_save(&mut self) -> Option<SaveTask> {
        self.deadline = None;
        let serialized = self.current.to_string();
        if serialized == self.last_sent {
            debug!(
                document_id = %self.document_id,
                "payload unchanged since last save, skipping"
            );
            self.set_state(SaveState::Clean);
            self.resolve(&Ok(()));
            return None;
        }

        self.set_state(SaveState::Saving);
        self.sending = Some(serialized);
        let controller = self.controller.clone();
        let document_id = self.document_id;
        let payload = self.current.clone();
        Some(tokio::spawn(async move {
            controller.save(document_id, payload).await
        }))
    }

    /// Apply a finished save; returns whether another save should start
    fn settle(&mut self, result: Result<SaveDisposition>) -> bool {
        let sent = self.sending.take();
        let outcome = match result {
            Ok(SaveDisposition::Committed { revision }) => {
                self.revision = self.revision.max(revision);
                if let Some(sent) = sent {
                    self.last_sent = sent;
                }
                if self.state == SaveState::Saving {
                    self.set_state(SaveState::Clean);
                }
                Ok(())
            }
            Ok(SaveDisposition::Queued) => {
                if let Some(sent) = sent {
                    self.last_sent = sent;
                }
                if self.state == SaveState::Saving {
                    self.set_state(SaveState::Clean);
                }
                Ok(())
            }
            Ok(SaveDisposition::Conflicted(record)) => Err(self.fail(Error::Conflict(record))),
            Err(error) => Err(self.fail(error)),
        };
        self.resolve(&outcome);

        if self.next_waiting.is_empty() {
            return false;
        }
        self.waiting.append(&mut self.next_waiting);
        true
    }

    fn fail(&mut self, error: Error) -> Error {
        debug!(document_id = %self.document_id, "save failed: {error}");
        self.set_state(SaveState::Dirty);
        self.status.set_error(Some(error.to_string()));
        error
    }

    fn resolve(&mut self, outcome: &Result<()>) {
        for waiter in self.waiting.drain(..) {
            let _ = waiter.send(match outcome {
                Ok(()) => Ok(()),
                Err(error) => Err(fan_out(error)),
            });
        }
    }

    fn observe(&mut self, event: SyncEvent, in_flight: bool) {
        match event {
            SyncEvent::Committed {
                document_id,
                revision,
                payload,
                source: CommitSource::Drain | CommitSource::Overwrite,
            } if document_id == self.document_id => {
                self.revision = self.revision.max(revision);
                self.last_sent = payload.to_string();
                if !in_flight && self.current == payload {
                    self.deadline = None;
                    self.set_state(SaveState::Clean);
                }
            }
            SyncEvent::Reloaded(document) if document.id == self.document_id => {
                self.revision = document.revision;
                self.last_sent = document.payload.to_string();
                self.current = document.payload;
                self.deadline = None;
                if !in_flight {
                    self.set_state(SaveState::Clean);
                }
            }
            _ => {}
        }
    }

    /// Catch up after missed events by comparing against the store.
    ///
    /// Local edits that differ from the committed payload stay dirty and are
    /// not sent until the user edits or saves again.
    async fn resync(&mut self, in_flight: bool) {
        if self.controller.known_revision(&self.document_id) == Some(self.revision) {
            return;
        }
        match self.controller.fetch(&self.document_id).await {
            Ok(document) => {
                self.revision = document.revision;
                self.last_sent = document.payload.to_string();
                if in_flight {
                    return;
                }
                self.deadline = None;
                if self.current == document.payload {
                    self.set_state(SaveState::Clean);
                } else {
                    self.set_state(SaveState::Dirty);
                    self.status.set_error(Some(format!(
                        "campaign {} changed while autosave was catching up; save again to keep local edits",
                        self.document_id
                    )));
                }
            }
            Err(error) => {
                warn!(document_id = %self.document_id, "autosave resync failed: {error}");
                if !in_flight {
                    self.deadline = None;
                    self.set_state(SaveState::Dirty);
                    self.status.set_error(Some(error.to_string()));
                }
            }
        }
    }
}

async fn run<S: RevisionStore>(
    mut scheduler: Scheduler<S>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: broadcast::Receiver<SyncEvent>,
) {
    let mut in_flight: Option<SaveTask> = None;
    let mut events_open = true;

    loop {
        let deadline = scheduler.deadline;
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Changed(payload)) => scheduler.changed(payload),
                Some(Command::SaveNow(waiter)) => {
                    scheduler.wait_for_save(waiter, in_flight.is_some());
                    if in_flight.is_none() {
                        in_flight = scheduler.start_save();
                    }
                }
                None => break,
            },
            joined = join_save(&mut in_flight), if in_flight.is_some() => {
                in_flight = None;
                if scheduler.settle(joined) {
                    in_flight = scheduler.start_save();
                }
            }
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                if deadline.is_some() && in_flight.is_none() => {
                in_flight = scheduler.start_save();
            }
            event = events.recv(), if events_open => match event {
                Ok(event) => scheduler.observe(event, in_flight.is_some()),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        document_id = %scheduler.document_id,
                        skipped,
                        "autosave missed pipeline events"
                    );
                    scheduler.resync(in_flight.is_some()).await;
                }
                Err(RecvError::Closed) => events_open = false,
            },
        }
    }

    if in_flight.is_some() {
        let joined = join_save(&mut in_flight).await;
        scheduler.settle(joined);
    }
    scheduler.status.forget_document(&scheduler.document_id);
    debug!(document_id = %scheduler.document_id, "autosave stopped");
}

async fn join_save(task: &mut Option<SaveTask>) -> Result<SaveDisposition> {
    match task {
        Some(handle) => handle
            .await
            .map_err(|error| Error::Shutdown(format!("save task failed: {error}")))?,
        None => std::future::pending().await,
    }
}

/// Copy an error for every waiter of one save
fn fan_out(error: &Error) -> Error {
    match error {
        Error::Transport(message) => Error::Transport(message.clone()),
        Error::Conflict(record) => Error::Conflict(record.clone()),
        Error::Validation(message) => Error::Validation(message.clone()),
        Error::NotFound(message) => Error::NotFound(message.clone()),
        Error::InvalidInput(message) => Error::InvalidInput(message.clone()),
        Error::Shutdown(message) => Error::Shutdown(message.clone()),
        other => Error::Database(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Parts;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn open(parts: &Parts, payload: Value, revision: i64) -> AutosaveHandle {
        let id = parts.open(payload.clone(), revision);
        AutosaveHandle::spawn(
            parts.controller(),
            parts.status.clone(),
            &parts.events,
            Document::new(id, payload, revision),
            DEFAULT_DEBOUNCE,
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_sends_only_the_latest_edit() {
        let parts = Parts::new().await;
        let handle = open(&parts, json!({"v": 0}), 1);
        let started = Instant::now();

        handle.document_changed(json!({"v": 1})).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.document_changed(json!({"v": 2})).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.document_changed(json!({"v": 3})).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let calls = parts.store.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].payload, json!({"v": 3}));
        assert_eq!(calls[0].at - started, Duration::from_secs(5));
        assert_eq!(handle.state(), Some(SaveState::Clean));
        assert!(!parts.status.snapshot().has_unsaved_changes);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_payloads_are_written_once() {
        let parts = Parts::new().await;
        let handle = open(&parts, json!({"v": 0}), 1);

        handle.document_changed(json!({"v": 1, "w": [1, 2]})).unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        handle.document_changed(json!({"v": 1, "w": [1, 2]})).unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        handle.save_now().await.unwrap();

        assert_eq!(parts.store.call_count(), 1);
        assert_eq!(handle.state(), Some(SaveState::Clean));
    }

    #[tokio::test(start_paused = true)]
    async fn reverting_to_the_opened_payload_skips_the_write() {
        let parts = Parts::new().await;
        let handle = open(&parts, json!({"v": 0}), 1);

        handle.document_changed(json!({"v": 0})).unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(parts.store.call_count(), 0);
        assert_eq!(handle.state(), Some(SaveState::Clean));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_save_skips_the_debounce() {
        let parts = Parts::new().await;
        let handle = open(&parts, json!({"v": 0}), 1);
        let started = Instant::now();

        handle.document_changed(json!({"v": 1})).unwrap();
        handle.save_now().await.unwrap();

        let calls = parts.store.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].at - started, Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(parts.store.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_save_waits_behind_the_save_in_flight() {
        let parts = Parts::new().await;
        let handle = open(&parts, json!({"v": 0}), 1);
        let gate = parts.store.hold_updates();

        handle.document_changed(json!({"v": 1})).unwrap();
        let first = tokio::spawn({
            let handle = handle.clone();
            async move { handle.save_now().await }
        });
        while parts.store.call_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(handle.state(), Some(SaveState::Saving));

        handle.document_changed(json!({"v": 2})).unwrap();
        let second = tokio::spawn({
            let handle = handle.clone();
            async move { handle.save_now().await }
        });
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(parts.store.call_count(), 1);

        gate.add_permits(10);
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let payloads: Vec<_> = parts.store.calls().into_iter().map(|call| call.payload).collect();
        assert_eq!(payloads, vec![json!({"v": 1}), json!({"v": 2})]);
        assert_eq!(parts.book.get(&handle.document_id()), Some(3));
        assert_eq!(handle.state(), Some(SaveState::Clean));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_keeps_dirty_with_error_and_queues() {
        let parts = Parts::new().await;
        let handle = open(&parts, json!({"v": 0}), 1);
        parts.store.fail_next_updates(3);

        handle.document_changed(json!({"v": 1})).unwrap();
        let error = handle.save_now().await.unwrap_err();

        assert!(error.is_transport());
        assert_eq!(handle.state(), Some(SaveState::Dirty));
        let status = parts.status.snapshot();
        assert!(status.has_unsaved_changes);
        assert!(status.last_error.is_some());
        assert_eq!(status.queue_size, 1);
        assert_eq!(
            parts.queue.list().await.unwrap()[0].payload,
            json!({"v": 1})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn offline_edits_settle_clean_once_queued() {
        let parts = Parts::new().await;
        let handle = open(&parts, json!({"v": 0}), 1);
        parts.monitor.set_online(false);

        handle.document_changed(json!({"v": 1})).unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        handle.document_changed(json!({"v": 2})).unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(parts.store.call_count(), 0);
        assert_eq!(handle.state(), Some(SaveState::Clean));
        assert_eq!(parts.status.snapshot().queue_size, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_conflict_is_raised_again_on_next_save() {
        let parts = Parts::new().await;
        let handle = open(&parts, json!({"v": 0}), 5);
        let id = handle.document_id();
        parts
            .store
            .remote()
            .update(&id, &json!({"v": "other"}), Some(5))
            .await
            .unwrap();

        handle.document_changed(json!({"v": "mine"})).unwrap();
        let error = handle.save_now().await.unwrap_err();
        assert!(error.is_conflict());
        assert_eq!(handle.state(), Some(SaveState::Dirty));

        parts.resolver.cancel();
        assert_eq!(parts.status.snapshot().conflict, None);
        assert_eq!(handle.state(), Some(SaveState::Dirty));

        let error = handle.save_now().await.unwrap_err();
        assert!(error.is_conflict());
        assert_eq!(parts.resolver.conflict().unwrap().server_revision, Some(6));
    }

    #[tokio::test(start_paused = true)]
    async fn reload_replaces_local_edits() {
        let parts = Parts::new().await;
        let handle = open(&parts, json!({"v": 0}), 5);
        let id = handle.document_id();
        parts
            .store
            .remote()
            .update(&id, &json!({"v": "other"}), Some(5))
            .await
            .unwrap();
        handle.document_changed(json!({"v": "mine"})).unwrap();
        handle.save_now().await.unwrap_err();

        parts.resolver.resolve_by_reload(&id).await.unwrap();
        settle().await;

        assert_eq!(handle.state(), Some(SaveState::Clean));
        assert_eq!(parts.status.snapshot().conflict, None);

        handle.document_changed(json!({"v": "other"})).unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(parts.store.call_count(), 1);

        handle.document_changed(json!({"v": "after reload"})).unwrap();
        handle.save_now().await.unwrap();
        assert_eq!(parts.store.committed(&id).await.revision, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn missed_reload_resyncs_instead_of_overwriting() {
        let parts = Parts::new().await;
        let handle = open(&parts, json!({"v": 0}), 5);
        let id = handle.document_id();
        parts
            .store
            .remote()
            .update(&id, &json!({"v": "other"}), Some(5))
            .await
            .unwrap();
        handle.document_changed(json!({"v": "mine"})).unwrap();
        handle.save_now().await.unwrap_err();

        let reloaded = parts.store.committed(&id).await;
        parts.book.reset(id, reloaded.revision);
        parts.events.publish(SyncEvent::Reloaded(reloaded));
        for _ in 0..300 {
            parts.events.publish(SyncEvent::Queued {
                document_id: DocumentId::new(),
                queue_size: 0,
            });
        }
        settle().await;

        assert_eq!(handle.state(), Some(SaveState::Dirty));
        let error = parts.status.snapshot().last_error.unwrap();
        assert!(error.contains("catching up"), "{error}");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(parts.store.call_count(), 1);

        handle.document_changed(json!({"v": "other"})).unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(parts.store.call_count(), 1);
        assert_eq!(handle.state(), Some(SaveState::Clean));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_stops_the_task() {
        let parts = Parts::new().await;
        let handle = open(&parts, json!({"v": 0}), 1);
        let id = handle.document_id();
        let second = handle.clone();
        drop(handle);
        settle().await;
        assert_eq!(second.state(), Some(SaveState::Clean));

        drop(second);
        settle().await;
        assert_eq!(parts.status.document_state(&id), None);
    }
}
