//! Pin event broadcast.
//!
//! Events are fanned out to subscribers over a bounded broadcast channel.
//! A subscriber that falls behind by more than the buffer loses the oldest
//! events; emitting with no subscribers is not an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cairn_types::events::{PinEvent, PinEventKind};
use cairn_types::SubjectId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Filter for event subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Category filter: "billing", "replication".
    pub categories: Option<Vec<String>>,
    /// Only events for these subjects. Pool-level events always pass.
    pub subject_ids: Option<Vec<SubjectId>>,
}

impl EventFilter {
    /// Check if an event matches this filter.
    pub fn matches(&self, event: &PinEvent) -> bool {
        if let Some(ref categories) = self.categories {
            let category = event.kind.category();
            if !categories.iter().any(|c| c == category) {
                return false;
            }
        }

        if let (Some(subjects), Some(subject)) = (&self.subject_ids, event.subject_id) {
            if !subjects.contains(&subject) {
                return false;
            }
        }

        true
    }
}

/// Event bus for broadcasting pin events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PinEvent>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: PinEvent) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    /// Build and emit an event in one call.
    pub fn publish(
        &self,
        kind: PinEventKind,
        record: Option<&cairn_types::PinRequest>,
        timestamp: u64,
        payload: serde_json::Value,
    ) {
        self.emit(PinEvent {
            kind,
            cid: record.map(|r| r.cid.clone()),
            pin_id: record.map(|r| r.pin_id),
            subject_id: record.map(|r| r.subject_id),
            timestamp,
            payload,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PinEvent> {
        self.sender.subscribe()
    }

    /// Number of events emitted so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
