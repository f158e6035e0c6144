//! Publisher client for sending messages to the broker.
//!
//! While disconnected, published messages are held in an in-memory queue and
//! drained in FIFO order once the link comes back. Registration is lazy: the
//! first publish on an unregistered link emits `$SYS/REGISTER` first.

use crate::config::ClientConfig;
use crate::connection::{ConnEvent, Connection};
use crate::Result;
use bytes::Bytes;
use parking_lot::Mutex;
use relaymq::protocol::{FrameAssembler, Message, REGISTER_TOPIC, ROLE_PUBLISHER};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Notifications emitted by a [`Publisher`].
#[derive(Debug, Clone)]
pub enum PublisherEvent {
    /// Link established and role registered.
    Connected,
    /// Link lost.
    Disconnected,
    /// A message was written to the transport; carries the message id.
    Published(String),
    /// A connection attempt or transport operation failed.
    Error(String),
}

/// Result of a publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Written to the transport; the id has been announced via
    /// [`PublisherEvent::Published`].
    Sent(String),
    /// Held in the pending queue until the link is re-established.
    Queued(String),
}

impl PublishOutcome {
    pub fn message_id(&self) -> &str {
        match self {
            PublishOutcome::Sent(id) | PublishOutcome::Queued(id) => id,
        }
    }

    pub fn was_queued(&self) -> bool {
        matches!(self, PublishOutcome::Queued(_))
    }
}

struct Link {
    conn: Option<Connection>,
    registered: bool,
    reconnect: Option<JoinHandle<()>>,
}

struct PublisherInner {
    config: ClientConfig,
    link: tokio::sync::Mutex<Link>,
    pending: Mutex<VecDeque<Message>>,
    assembler: Arc<Mutex<FrameAssembler>>,
    conn_events_tx: mpsc::UnboundedSender<ConnEvent>,
    events_tx: mpsc::UnboundedSender<PublisherEvent>,
}

/// High-level publisher client.
pub struct Publisher {
    inner: Arc<PublisherInner>,
    events_rx: Option<mpsc::UnboundedReceiver<PublisherEvent>>,
}

impl Publisher {
    pub fn new(config: ClientConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (conn_events_tx, mut conn_events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(PublisherInner {
            config,
            link: tokio::sync::Mutex::new(Link {
                conn: None,
                registered: false,
                reconnect: None,
            }),
            pending: Mutex::new(VecDeque::new()),
            assembler: Arc::new(Mutex::new(FrameAssembler::new())),
            conn_events_tx,
            events_tx,
        });

        // The broker only writes to subscribers, so inbound messages are
        // ignored; the pump exists to notice the link dropping.
        let pump_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some(event) = conn_events_rx.recv().await {
                if let ConnEvent::Closed = event {
                    Self::handle_disconnect(&pump_inner).await;
                }
            }
        });

        Self {
            inner,
            events_rx: Some(events_rx),
        }
    }

    /// Take the event stream. Yields `Some` exactly once.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<PublisherEvent>> {
        self.events_rx.take()
    }

    /// Open the transport, register as a publisher, and drain the pending
    /// queue. With auto-reconnect enabled a failure schedules retries.
    pub async fn connect(&self) -> Result<()> {
        match Self::establish(&self.inner).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Failed to connect to broker: {}", e);
                let _ = self
                    .inner
                    .events_tx
                    .send(PublisherEvent::Error(e.to_string()));
                if self.inner.config.auto_reconnect {
                    Self::schedule_reconnect(&self.inner).await;
                }
                Err(e)
            }
        }
    }

    /// Close the link and cancel any reconnect attempts. Pending messages
    /// stay queued.
    pub async fn disconnect(&self) {
        let mut link = self.inner.link.lock().await;
        if let Some(handle) = link.reconnect.take() {
            handle.abort();
        }
        if let Some(conn) = link.conn.take() {
            conn.close();
        }
        link.registered = false;
        self.inner.assembler.lock().clear();
    }

    pub async fn is_connected(&self) -> bool {
        self.inner
            .link
            .lock()
            .await
            .conn
            .as_ref()
            .map(Connection::is_open)
            .unwrap_or(false)
    }

    /// Messages waiting for the link to come back.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Publish a payload to a topic. Connected: the message is written and
    /// its id announced via [`PublisherEvent::Published`]. Disconnected: the
    /// message is queued and the reconnect timer started when enabled.
    pub async fn publish<T: Into<String>, P: Into<Bytes>>(
        &self,
        topic: T,
        payload: P,
    ) -> Result<PublishOutcome> {
        self.publish_message(Message::new(topic, payload)).await
    }

    /// Publish an already constructed message.
    pub async fn publish_message(&self, message: Message) -> Result<PublishOutcome> {
        let id = message.id().to_string();

        let mut link = self.inner.link.lock().await;
        let connected = link.conn.as_ref().map(Connection::is_open).unwrap_or(false);
        if !connected {
            drop(link);
            self.queue(message).await;
            return Ok(PublishOutcome::Queued(id));
        }

        if !link.registered {
            if Self::register(&link).is_err() {
                link.conn = None;
                drop(link);
                self.queue(message).await;
                return Ok(PublishOutcome::Queued(id));
            }
            link.registered = true;
        }

        let sent = match &link.conn {
            Some(conn) => conn.send(&message).is_ok(),
            None => false,
        };
        if !sent {
            link.conn = None;
            link.registered = false;
            drop(link);
            self.queue(message).await;
            return Ok(PublishOutcome::Queued(id));
        }
        drop(link);

        debug!("Message sent: {}", id);
        let _ = self
            .inner
            .events_tx
            .send(PublisherEvent::Published(id.clone()));
        Ok(PublishOutcome::Sent(id))
    }

    fn register(link: &Link) -> Result<()> {
        let conn = link
            .conn
            .as_ref()
            .ok_or(crate::RelaymqClientError::NotConnected)?;
        conn.send(&Message::new(
            REGISTER_TOPIC,
            Bytes::from_static(ROLE_PUBLISHER.as_bytes()),
        ))?;
        info!("Registered as publisher");
        Ok(())
    }

    async fn queue(&self, message: Message) {
        warn!(
            "Not connected to broker, message queued: {}",
            message.topic()
        );
        self.inner.pending.lock().push_back(message);
        if self.inner.config.auto_reconnect {
            Self::schedule_reconnect(&self.inner).await;
        }
    }

    async fn establish(inner: &Arc<PublisherInner>) -> Result<()> {
        inner.assembler.lock().clear();
        let conn = Connection::open(
            &inner.config,
            Arc::clone(&inner.assembler),
            inner.conn_events_tx.clone(),
        )
        .await?;
        conn.send(&Message::new(
            REGISTER_TOPIC,
            Bytes::from_static(ROLE_PUBLISHER.as_bytes()),
        ))?;

        {
            let mut link = inner.link.lock().await;
            if let Some(old) = link.conn.take() {
                old.close();
            }
            link.conn = Some(conn);
            link.registered = true;
        }

        info!("Connected to broker");
        let _ = inner.events_tx.send(PublisherEvent::Connected);

        Self::drain_pending(inner).await;
        Ok(())
    }

    /// Send queued messages in FIFO order; stop on the first failure and
    /// put the message back at the head.
    async fn drain_pending(inner: &Arc<PublisherInner>) {
        loop {
            let Some(message) = inner.pending.lock().pop_front() else {
                break;
            };
            let id = message.id().to_string();

            let link = inner.link.lock().await;
            let sent = link
                .conn
                .as_ref()
                .map(|conn| conn.send(&message).is_ok())
                .unwrap_or(false);
            drop(link);

            if sent {
                let _ = inner.events_tx.send(PublisherEvent::Published(id));
            } else {
                inner.pending.lock().push_front(message);
                break;
            }
        }
    }

    async fn handle_disconnect(inner: &Arc<PublisherInner>) {
        {
            let mut link = inner.link.lock().await;
            if link.conn.is_none() {
                return;
            }
            link.conn = None;
            link.registered = false;
        }
        info!("Disconnected from broker");
        let _ = inner.events_tx.send(PublisherEvent::Disconnected);

        if inner.config.auto_reconnect {
            Self::schedule_reconnect(inner).await;
        }
    }

    async fn schedule_reconnect(inner: &Arc<PublisherInner>) {
        let mut link = inner.link.lock().await;
        let already_running = link
            .reconnect
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);
        if already_running {
            return;
        }

        let task_inner = Arc::clone(inner);
        link.reconnect = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(task_inner.config.reconnect_interval).await;
                info!("Trying to reconnect to broker...");
                match Self::establish(&task_inner).await {
                    Ok(()) => break,
                    Err(e) => debug!("Reconnect attempt failed: {}", e),
                }
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_while_disconnected_queues() {
        let publisher = Publisher::new(ClientConfig::default());

        let outcome = publisher.publish("t", "payload").await.unwrap();
        assert!(outcome.was_queued());
        assert_eq!(outcome.message_id().len(), 32);
        assert_eq!(publisher.pending_count(), 1);
        assert!(!publisher.is_connected().await);
    }

    #[tokio::test]
    async fn test_queued_messages_keep_fifo_order() {
        let publisher = Publisher::new(ClientConfig::default());
        for i in 0..3 {
            publisher.publish("t", format!("m{}", i)).await.unwrap();
        }

        let pending = publisher.inner.pending.lock();
        let payloads: Vec<_> = pending.iter().map(|m| m.payload().clone()).collect();
        assert_eq!(payloads, vec!["m0", "m1", "m2"]);
    }

    #[tokio::test]
    async fn test_no_published_event_for_queued_message() {
        let mut publisher = Publisher::new(ClientConfig::default());
        let mut events = publisher.events().unwrap();

        publisher.publish("t", "x").await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_events_taken_once() {
        let mut publisher = Publisher::new(ClientConfig::default());
        assert!(publisher.events().is_some());
        assert!(publisher.events().is_none());
    }
}
