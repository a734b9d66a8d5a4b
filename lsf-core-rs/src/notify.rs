//! Notifications (signals) emitted to clients
//!
//! Each notification names an entity kind, an event and the affected ids.
//! Subscribers get their own broadcast receiver; a slow subscriber only
//! loses its own backlog.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
    NameChanged,
    Applied,
    /// Lamp session established
    Found,
    /// Lamp removed
    Lost,
    StateChanged,
}

impl EventKind {
    fn suffix(&self) -> &'static str {
        match self {
            EventKind::Created => "Created",
            EventKind::Updated => "Updated",
            EventKind::Deleted => "Deleted",
            EventKind::NameChanged => "NameChanged",
            EventKind::Applied => "Applied",
            EventKind::Found => "Found",
            EventKind::Lost => "Lost",
            EventKind::StateChanged => "StateChanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub entity: EntityKind,
    pub event: EventKind,
    pub ids: Vec<String>,
}

impl Notification {
    pub fn new(entity: EntityKind, event: EventKind, ids: Vec<String>) -> Self {
        Self { entity, event, ids }
    }

    /// Signal name on the bus, e.g. `ScenesApplied`
    pub fn signal_name(&self) -> String {
        format!("{}s{}", self.entity.name(), self.event.suffix())
    }
}

/// Fan-out point for notifications
#[derive(Debug, Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<Notification>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn emit(&self, notification: Notification) {
        debug!(
            "Notify: {} {:?}",
            notification.signal_name(),
            notification.ids
        );
        // No subscribers is fine
        let _ = self.tx.send(notification);
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(256)
    }
}
