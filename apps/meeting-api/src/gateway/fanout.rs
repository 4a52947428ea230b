//! Broadcast hub for dispatching meeting events to joined connections.
//!
//! A single `tokio::sync::broadcast` channel. Every connection subscribes
//! on open and forwards events only once it has joined.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::events::ServerEvent;

/// Slow receivers that fall behind will skip messages (RecvError::Lagged).
const BROADCAST_CAPACITY: usize = 4096;

#[derive(Clone)]
pub struct GatewayBroadcast {
    sender: broadcast::Sender<Arc<ServerEvent>>,
}

impl Default for GatewayBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    /// Each connection calls this once to get its own receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ServerEvent>> {
        self.sender.subscribe()
    }

    pub fn dispatch(&self, event: ServerEvent) {
        // Err only means nobody is listening.
        let _ = self.sender.send(Arc::new(event));
    }
}
