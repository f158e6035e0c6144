//! Broker lifecycle and traffic notifications.
//!
//! External observers subscribe through a broadcast channel; the broker emits
//! and never blocks on slow or absent listeners.

use crate::protocol::Message;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the broker at the contractually specified points.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// A transport connection was accepted and registered.
    ClientConnected(String),
    /// A client was removed: transport close, inactivity eviction, or
    /// shutdown.
    ClientDisconnected(String),
    /// A data publication was accepted by the router.
    MessageReceived(Message),
    /// A data publication finished fan-out.
    MessagePublished(Message),
}

/// Fan-out point for [`BrokerEvent`] notifications.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<BrokerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.sender.subscribe()
    }

    /// Deliver an event to all current subscribers. Dropped silently when
    /// nobody is listening.
    pub fn emit(&self, event: BrokerEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
