use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{BookingStatus, Span};

const CHANNEL_CAPACITY: usize = 256;

/// A committed change, broadcast to every resource it touches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum Change {
    Created {
        booking_id: Ulid,
        span: Span,
    },
    Rescheduled {
        booking_id: Ulid,
        from_resource: Option<Ulid>,
        to_resource: Option<Ulid>,
        span: Span,
    },
    StatusChanged {
        booking_id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
    },
}

/// Per-resource broadcast hub for UI refresh adapters.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Change>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes on a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<Change> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, resource_id: Ulid, change: &Change) {
        if let Some(sender) = self.channels.get(&resource_id) {
            let _ = sender.send(change.clone());
        }
    }

    pub fn remove(&self, resource_id: &Ulid) {
        self.channels.remove(resource_id);
    }
}
