//! Pipeline notifications for the editing surface.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::models::{ConflictRecord, Document, DocumentId};

const EVENT_CAPACITY: usize = 256;

/// Which path committed a payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitSource {
    /// Immediate save, including retries
    Online,
    /// Replay from the offline queue
    Drain,
    /// Unconditional overwrite after a conflict
    Overwrite,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Committed {
        document_id: DocumentId,
        revision: i64,
        payload: Value,
        source: CommitSource,
    },
    Queued {
        document_id: DocumentId,
        queue_size: usize,
    },
    Conflict(ConflictRecord),
    /// A queued payload was dropped after repeated conflicts
    Abandoned {
        document_id: DocumentId,
        error: String,
    },
    /// The session replaced its state with the committed document
    Reloaded(Document),
}

impl SyncEvent {
    pub const fn document_id(&self) -> &DocumentId {
        match self {
            Self::Committed { document_id, .. }
            | Self::Queued { document_id, .. }
            | Self::Abandoned { document_id, .. } => document_id,
            Self::Conflict(record) => &record.document_id,
            Self::Reloaded(document) => &document.id,
        }
    }
}

/// Broadcast hub; publishing with no subscribers is not an error
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        bus.publish(SyncEvent::Queued {
            document_id: DocumentId::new(),
            queue_size: 1,
        });

        let mut events = bus.subscribe();
        let id = DocumentId::new();
        bus.publish(SyncEvent::Abandoned {
            document_id: id,
            error: "gave up".to_string(),
        });

        let event = events.recv().await.unwrap();
        assert_eq!(event.document_id(), &id);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = SyncEvent::Queued {
            document_id: DocumentId::new(),
            queue_size: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "queued");
        assert_eq!(json["queue_size"], 2);
    }
}
