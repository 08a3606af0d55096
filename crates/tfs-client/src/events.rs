use std::sync::Arc;

use tfs_common::{Endpoint, TfsError};
use tokio::sync::broadcast;

/// Capacity of the event channel. Slow subscribers observe `Lagged`.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle notifications published by a client.
///
/// Obtain a receiver with [`TfsClient::subscribe`](crate::TfsClient::subscribe).
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The server pool was replaced with this list
    ServersUpdated(Vec<Endpoint>),
    /// A discovery request failed; the pool kept its previous list
    RefreshFailed(Arc<TfsError>),
    /// The readiness gate opened and queued requests were released
    Ready,
    /// Unrecoverable failure, e.g. the application id could not be resolved
    Error(Arc<TfsError>),
}

/// Publishing side of the event channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Publishes `event`. Having no subscribers is not an error.
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
