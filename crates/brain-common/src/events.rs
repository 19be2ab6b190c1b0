use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default capacity of the turn-ended channel.
const DEFAULT_CAPACITY: usize = 256;

/// Emitted by the host whenever a session finishes a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnEndedEvent {
    pub session_id: String,
    /// Whether the session was producing output right before the event.
    pub was_thinking: bool,
}

impl TurnEndedEvent {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            was_thinking: true,
        }
    }
}

/// Broadcast bus for [`TurnEndedEvent`]s.
///
/// Cloning is cheap; every clone publishes into the same channel. Each call to
/// [`EventBus::subscribe`] returns a receiver that sees events published after
/// the subscription.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TurnEndedEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TurnEndedEvent> {
        self.tx.subscribe()
    }

    /// Publish to all current subscribers. Returns the number of receivers
    /// that got the event (zero when nobody listens).
    pub fn publish(&self, event: TurnEndedEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
