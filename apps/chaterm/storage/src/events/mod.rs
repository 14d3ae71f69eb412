//! Renderer channel: the storage engine's side of the inter-process link.
//!
//! The engine never talks to the UI process directly. It emits
//! [`RendererMessage`]s on the [`EventBus`]; the host application forwards
//! them over its IPC transport and feeds replies back into the
//! [`LegacyDataBridge`](crate::bridge::LegacyDataBridge).

pub mod types;

pub use types::{DataResponse, RendererMessage};

use tokio::sync::broadcast;

/// Capacity of the event channel.
/// Events beyond this will cause receivers to lag.
const CHANNEL_CAPACITY: usize = 256;

/// Outbound message bus towards the renderer.
///
/// Uses a broadcast channel so the IPC forwarder and any observers (tests,
/// diagnostics) all see every message. Emitting never blocks.
pub struct EventBus {
    sender: broadcast::Sender<RendererMessage>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Emit a message to all subscribers.
    ///
    /// Does not fail when nobody is subscribed; a request that nobody
    /// forwards simply runs into the bridge timeout.
    pub fn emit(&self, message: RendererMessage) {
        tracing::trace!("Renderer message emitted: {}", message.description());
        if self.sender.send(message).is_err() {
            tracing::debug!("No renderer subscribers, message dropped");
        }
    }

    /// Subscribe to messages emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RendererMessage> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
