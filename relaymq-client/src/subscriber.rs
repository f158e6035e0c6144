//! Subscriber client for receiving messages from the broker.
//!
//! The subscriber keeps a local set of subscribed topics. After every
//! (re)connect it registers its role and re-emits `$SYS/SUBSCRIBE` for each
//! topic in the set, so a broker restart is transparent to the caller.
//! Inbound control traffic and messages for topics no longer in the set are
//! suppressed from the user-visible event stream.

use crate::config::ClientConfig;
use crate::connection::{ConnEvent, Connection};
use crate::Result;
use bytes::Bytes;
use parking_lot::Mutex;
use relaymq::protocol::{
    FrameAssembler, Message, CONTROL_PREFIX, REGISTER_TOPIC, ROLE_SUBSCRIBER, SUBSCRIBE_TOPIC,
    UNSUBSCRIBE_TOPIC,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Notifications emitted by a [`Subscriber`].
#[derive(Debug, Clone)]
pub enum SubscriberEvent {
    /// Link established and role registered.
    Connected,
    /// Link lost.
    Disconnected,
    /// A subscription was sent to the broker.
    Subscribed(String),
    /// An unsubscription was sent to the broker.
    Unsubscribed(String),
    /// A data message on a subscribed topic.
    Message(Message),
    /// A connection attempt or transport operation failed.
    Error(String),
}

struct Link {
    conn: Option<Connection>,
    registered: bool,
    reconnect: Option<JoinHandle<()>>,
}

struct SubscriberInner {
    config: ClientConfig,
    link: tokio::sync::Mutex<Link>,
    topics: Mutex<HashSet<String>>,
    assembler: Arc<Mutex<FrameAssembler>>,
    conn_events_tx: mpsc::UnboundedSender<ConnEvent>,
    events_tx: mpsc::UnboundedSender<SubscriberEvent>,
}

/// High-level subscriber client.
pub struct Subscriber {
    inner: Arc<SubscriberInner>,
    events_rx: Option<mpsc::UnboundedReceiver<SubscriberEvent>>,
}

impl Subscriber {
    pub fn new(config: ClientConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (conn_events_tx, mut conn_events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(SubscriberInner {
            config,
            link: tokio::sync::Mutex::new(Link {
                conn: None,
                registered: false,
                reconnect: None,
            }),
            topics: Mutex::new(HashSet::new()),
            assembler: Arc::new(Mutex::new(FrameAssembler::new())),
            conn_events_tx,
            events_tx,
        });

        let pump_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some(event) = conn_events_rx.recv().await {
                match event {
                    ConnEvent::Message(message) => Self::handle_inbound(&pump_inner, message),
                    ConnEvent::Closed => Self::handle_disconnect(&pump_inner).await,
                }
            }
        });

        Self {
            inner,
            events_rx: Some(events_rx),
        }
    }

    /// Take the event stream. Yields `Some` exactly once.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<SubscriberEvent>> {
        self.events_rx.take()
    }

    /// Open the transport, register as a subscriber, and restore every
    /// subscription in the local set.
    pub async fn connect(&self) -> Result<()> {
        match Self::establish(&self.inner).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Failed to connect to broker: {}", e);
                let _ = self
                    .inner
                    .events_tx
                    .send(SubscriberEvent::Error(e.to_string()));
                if self.inner.config.auto_reconnect {
                    Self::schedule_reconnect(&self.inner).await;
                }
                Err(e)
            }
        }
    }

    /// Close the link and cancel any reconnect attempts. The local
    /// subscription set survives for the next connect.
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

    /// Topics in the local subscription set.
    pub fn subscribed_topics(&self) -> HashSet<String> {
        self.inner.topics.lock().clone()
    }

    /// Subscribe to a topic. Refused while disconnected; the broker replays
    /// the topic's cached messages before any live traffic.
    pub async fn subscribe<T: Into<String>>(&self, topic: T) -> Result<()> {
        let topic = topic.into();

        let mut link = self.inner.link.lock().await;
        let connected = link.conn.as_ref().map(Connection::is_open).unwrap_or(false);
        if !connected {
            warn!("Not connected to broker, cannot subscribe to topic: {}", topic);
            return Err(crate::RelaymqClientError::NotConnected);
        }

        // The topic enters the local set before the control frame goes out:
        // the broker replays the cache immediately on subscribe, and those
        // messages must already pass the inbound filter.
        self.inner.topics.lock().insert(topic.clone());

        let needs_register = !link.registered;
        let sent = (|| -> Result<()> {
            let conn = link
                .conn
                .as_ref()
                .ok_or(crate::RelaymqClientError::NotConnected)?;
            if needs_register {
                conn.send(&Message::new(
                    REGISTER_TOPIC,
                    Bytes::from_static(ROLE_SUBSCRIBER.as_bytes()),
                ))?;
            }
            conn.send(&Message::new(
                SUBSCRIBE_TOPIC,
                Bytes::from(topic.clone().into_bytes()),
            ))
        })();
        if let Err(e) = sent {
            self.inner.topics.lock().remove(&topic);
            return Err(e);
        }
        link.registered = true;
        drop(link);

        info!("Subscribed to topic: {}", topic);
        let _ = self
            .inner
            .events_tx
            .send(SubscriberEvent::Subscribed(topic));
        Ok(())
    }

    /// Unsubscribe from a topic. A topic not in the local set is an
    /// immediate success; otherwise refused while disconnected.
    pub async fn unsubscribe<T: Into<String>>(&self, topic: T) -> Result<()> {
        let topic = topic.into();
        if !self.inner.topics.lock().contains(&topic) {
            return Ok(());
        }

        let link = self.inner.link.lock().await;
        let connected = link.conn.as_ref().map(Connection::is_open).unwrap_or(false);
        if !connected {
            warn!(
                "Not connected to broker, cannot unsubscribe from topic: {}",
                topic
            );
            return Err(crate::RelaymqClientError::NotConnected);
        }
        {
            let conn = link
                .conn
                .as_ref()
                .ok_or(crate::RelaymqClientError::NotConnected)?;
            conn.send(&Message::new(
                UNSUBSCRIBE_TOPIC,
                Bytes::from(topic.clone().into_bytes()),
            ))?;
        }
        drop(link);

        self.inner.topics.lock().remove(&topic);
        info!("Unsubscribed from topic: {}", topic);
        let _ = self
            .inner
            .events_tx
            .send(SubscriberEvent::Unsubscribed(topic));
        Ok(())
    }

    fn handle_inbound(inner: &Arc<SubscriberInner>, message: Message) {
        // Control traffic never reaches the user.
        if message.topic().starts_with(CONTROL_PREFIX) {
            return;
        }
        if inner.topics.lock().contains(message.topic()) {
            debug!("Received message on topic: {}", message.topic());
            let _ = inner.events_tx.send(SubscriberEvent::Message(message));
        }
    }

    async fn establish(inner: &Arc<SubscriberInner>) -> Result<()> {
        inner.assembler.lock().clear();
        let conn = Connection::open(
            &inner.config,
            Arc::clone(&inner.assembler),
            inner.conn_events_tx.clone(),
        )
        .await?;
        conn.send(&Message::new(
            REGISTER_TOPIC,
            Bytes::from_static(ROLE_SUBSCRIBER.as_bytes()),
        ))?;
        info!("Registered as subscriber");

        {
            let mut link = inner.link.lock().await;
            if let Some(old) = link.conn.take() {
                old.close();
            }
            link.conn = Some(conn);
            link.registered = true;
        }

        info!("Connected to broker");
        let _ = inner.events_tx.send(SubscriberEvent::Connected);

        Self::restore_subscriptions(inner).await;
        Ok(())
    }

    /// Re-emit `$SYS/SUBSCRIBE` for every topic in the local set.
    async fn restore_subscriptions(inner: &Arc<SubscriberInner>) {
        let topics: Vec<String> = inner.topics.lock().iter().cloned().collect();
        if topics.is_empty() {
            return;
        }

        let link = inner.link.lock().await;
        let Some(conn) = link.conn.as_ref() else {
            return;
        };
        for topic in topics {
            match conn.send(&Message::new(
                SUBSCRIBE_TOPIC,
                Bytes::from(topic.clone().into_bytes()),
            )) {
                Ok(()) => {
                    info!("Subscribed to topic: {}", topic);
                    let _ = inner.events_tx.send(SubscriberEvent::Subscribed(topic));
                }
                Err(_) => break,
            }
        }
    }

    async fn handle_disconnect(inner: &Arc<SubscriberInner>) {
        {
            let mut link = inner.link.lock().await;
            if link.conn.is_none() {
                return;
            }
            link.conn = None;
            link.registered = false;
        }
        info!("Disconnected from broker");
        let _ = inner.events_tx.send(SubscriberEvent::Disconnected);

        if inner.config.auto_reconnect {
            Self::schedule_reconnect(inner).await;
        }
    }

    async fn schedule_reconnect(inner: &Arc<SubscriberInner>) {
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
    async fn test_subscribe_refused_while_disconnected() {
        let subscriber = Subscriber::new(ClientConfig::default());
        let result = subscriber.subscribe("t/1").await;
        assert!(matches!(
            result,
            Err(crate::RelaymqClientError::NotConnected)
        ));
        assert!(subscriber.subscribed_topics().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_topic_is_ok() {
        let subscriber = Subscriber::new(ClientConfig::default());
        assert!(subscriber.unsubscribe("never-subscribed").await.is_ok());
    }

    #[tokio::test]
    async fn test_inbound_filtering() {
        let mut subscriber = Subscriber::new(ClientConfig::default());
        let mut events = subscriber.events().unwrap();
        subscriber.inner.topics.lock().insert("wanted".to_string());

        // Control traffic is suppressed even for a subscribed-looking topic.
        Subscriber::handle_inbound(
            &subscriber.inner,
            Message::new("$SYS/REGISTER", Bytes::from("x")),
        );
        // Unsubscribed topics are suppressed.
        Subscriber::handle_inbound(
            &subscriber.inner,
            Message::new("unwanted", Bytes::from("x")),
        );
        // Subscribed topics pass through.
        Subscriber::handle_inbound(
            &subscriber.inner,
            Message::new("wanted", Bytes::from("payload")),
        );

        match events.try_recv().unwrap() {
            SubscriberEvent::Message(message) => assert_eq!(message.topic(), "wanted"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }
}
