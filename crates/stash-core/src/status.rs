//! Aggregated save status.
//!
//! Every component reports into one `StatusBoard`; the editing surface reads
//! snapshots or subscribes to changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::models::{ConflictRecord, DocumentId, SaveState, SaveStatus};

#[derive(Debug, Default)]
struct BoardState {
    documents: HashMap<DocumentId, SaveState>,
    status: SaveStatus,
}

impl BoardState {
    fn recompute(&mut self) {
        self.status.is_saving = self
            .documents
            .values()
            .any(|state| *state == SaveState::Saving);
        self.status.has_unsaved_changes = self
            .documents
            .values()
            .any(|state| *state != SaveState::Clean);
    }
}

#[derive(Clone, Debug)]
pub struct StatusBoard {
    inner: Arc<Mutex<BoardState>>,
    sender: Arc<watch::Sender<SaveStatus>>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(SaveStatus::default());
        Self {
            inner: Arc::new(Mutex::new(BoardState::default())),
            sender: Arc::new(sender),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Apply a change and publish the result before releasing the lock
    fn update(&self, apply: impl FnOnce(&mut BoardState)) {
        let mut state = self.lock();
        apply(&mut state);
        state.recompute();
        self.sender.send_if_modified(|current| {
            if *current == state.status {
                false
            } else {
                current.clone_from(&state.status);
                true
            }
        });
    }

    pub fn snapshot(&self) -> SaveStatus {
        self.lock().status.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.sender.subscribe()
    }

    pub fn document_state(&self, id: &DocumentId) -> Option<SaveState> {
        self.lock().documents.get(id).copied()
    }

    pub fn set_document_state(&self, id: DocumentId, state: SaveState) {
        self.update(|board| {
            board.documents.insert(id, state);
        });
    }

    pub fn forget_document(&self, id: &DocumentId) {
        self.update(|board| {
            board.documents.remove(id);
        });
    }

    /// Record a commit; clears the displayed error
    pub fn mark_saved(&self, at: i64) {
        self.update(|board| {
            board.status.last_saved = Some(at);
            board.status.last_error = None;
        });
    }

    pub fn set_conflict(&self, conflict: Option<ConflictRecord>) {
        self.update(|board| board.status.conflict = conflict);
    }

    pub fn set_queue_size(&self, size: usize) {
        self.update(|board| board.status.queue_size = size);
    }

    pub fn set_syncing(&self, syncing: bool) {
        self.update(|board| board.status.is_syncing = syncing);
    }

    pub fn set_error(&self, error: Option<String>) {
        self.update(|board| board.status.last_error = error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn document_states_drive_flags() {
        let board = StatusBoard::new();
        let first = DocumentId::new();
        let second = DocumentId::new();

        board.set_document_state(first, SaveState::Dirty);
        board.set_document_state(second, SaveState::Saving);
        let status = board.snapshot();
        assert!(status.is_saving);
        assert!(status.has_unsaved_changes);

        board.set_document_state(second, SaveState::Clean);
        let status = board.snapshot();
        assert!(!status.is_saving);
        assert!(status.has_unsaved_changes);

        board.forget_document(&first);
        assert!(!board.snapshot().has_unsaved_changes);
    }

    #[test]
    fn mark_saved_clears_error() {
        let board = StatusBoard::new();
        board.set_error(Some("offline".to_string()));
        board.mark_saved(42);

        let status = board.snapshot();
        assert_eq!(status.last_saved, Some(42));
        assert_eq!(status.last_error, None);
    }

    #[test]
    fn watchers_end_on_the_last_written_status() {
        let board = StatusBoard::new();
        let rx = board.subscribe();

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let board = board.clone();
                std::thread::spawn(move || {
                    for size in 0..200 {
                        board.set_queue_size(worker * 1_000 + size);
                        board.set_syncing(size % 2 == 0);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let published = rx.borrow().clone();
        assert_eq!(published, board.snapshot());
    }

    #[tokio::test]
    async fn subscribers_see_changes_only() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe();

        board.set_queue_size(0);
        assert!(!rx.has_changed().unwrap());

        board.set_queue_size(3);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().queue_size, 3);
    }
}
