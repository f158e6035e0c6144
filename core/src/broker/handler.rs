//! The message-routing engine.
//!
//! [`MessageHandler`] owns the broker's shared mutable state: the client
//! registry together with the topic -> subscriber index behind one lock, and
//! the per-topic message cache behind another. All socket writes happen
//! through per-client unbounded channels after the needed handles have been
//! snapshotted and the lock released, so no I/O ever runs under a lock.

use crate::broker::cache::MessageCache;
use crate::broker::events::{BrokerEvent, EventBus};
use crate::protocol::{
    Message, CONTROL_PREFIX, REGISTER_TOPIC, ROLE_PUBLISHER, ROLE_SUBSCRIBER, SUBSCRIBE_TOPIC,
    UNSUBSCRIBE_TOPIC,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Transport family a client arrived on. Indistinguishable to the router
/// once the client record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Local,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "TCP"),
            TransportKind::Local => write!(f, "local"),
        }
    }
}

/// Broker-side record for one connected client.
struct ClientRecord {
    transport: TransportKind,
    sender: mpsc::UnboundedSender<Message>,
    closer: Arc<Notify>,
    is_publisher: bool,
    is_subscriber: bool,
    subscriptions: HashSet<String>,
    last_activity: Instant,
}

/// Registry and topic index, guarded together by the clients lock.
#[derive(Default)]
struct ClientTable {
    clients: HashMap<String, ClientRecord>,
    topics: HashMap<String, HashSet<String>>,
}

/// Handle returned on registration; the server wires its connection tasks to
/// these endpoints.
pub struct ClientHandle {
    /// Broker-assigned client id.
    pub id: String,
    /// Outbound message stream the connection's writer task drains.
    pub outbound: mpsc::UnboundedReceiver<Message>,
    /// Notified when the broker unregisters the client, telling the reader
    /// task to stop.
    pub closed: Arc<Notify>,
}

/// The router: consumes decoded frames, interprets control topics, updates
/// shared state, and fans data publications out to subscribers.
pub struct MessageHandler {
    clients: Mutex<ClientTable>,
    cache: Mutex<MessageCache>,
    events: EventBus,
}

impl MessageHandler {
    pub fn new(cache_size: usize) -> Self {
        Self {
            clients: Mutex::new(ClientTable::default()),
            cache: Mutex::new(MessageCache::new(cache_size)),
            events: EventBus::new(),
        }
    }

    /// Register a freshly accepted connection. Role flags start false and are
    /// only set by explicit `$SYS/REGISTER` control messages.
    pub fn register_client(&self, transport: TransportKind) -> ClientHandle {
        let id = Uuid::new_v4().to_string();
        let (sender, outbound) = mpsc::unbounded_channel();
        let closer = Arc::new(Notify::new());

        let record = ClientRecord {
            transport,
            sender,
            closer: Arc::clone(&closer),
            is_publisher: false,
            is_subscriber: false,
            subscriptions: HashSet::new(),
            last_activity: Instant::now(),
        };
        self.clients.lock().clients.insert(id.clone(), record);

        self.events.emit(BrokerEvent::ClientConnected(id.clone()));
        ClientHandle {
            id,
            outbound,
            closed: closer,
        }
    }

    /// Remove a client: drop it from every topic subscriber set (discarding
    /// topics whose set empties), release its connection handle, and delete
    /// the record. Safe to call twice; returns whether the client existed.
    pub fn unregister_client(&self, client_id: &str) -> bool {
        let record = {
            let mut table = self.clients.lock();
            let Some(record) = table.clients.remove(client_id) else {
                return false;
            };
            table.topics.retain(|_, subscribers| {
                subscribers.remove(client_id);
                !subscribers.is_empty()
            });
            record
        };

        // Dropping the record drops the outbound sender, which ends the
        // writer task; the notify permit stops the reader.
        record.closer.notify_one();
        drop(record);

        self.events.emit(BrokerEvent::ClientDisconnected(client_id.to_string()));
        true
    }

    /// Refresh a client's activity clock. Called for every chunk of bytes
    /// received on its transport, control traffic included.
    pub fn touch(&self, client_id: &str) {
        if let Some(record) = self.clients.lock().clients.get_mut(client_id) {
            record.last_activity = Instant::now();
        }
    }

    /// Evict every client idle longer than `max_idle`, as though it had
    /// disconnected. Returns the evicted ids.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<String> {
        let now = Instant::now();
        let idle: Vec<String> = {
            let table = self.clients.lock();
            table
                .clients
                .iter()
                .filter(|(_, record)| now.duration_since(record.last_activity) > max_idle)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for client_id in &idle {
            info!("Client inactive, disconnecting: {}", client_id);
            self.unregister_client(client_id);
        }
        idle
    }

    /// Route one decoded frame from a client. Control topics mutate state;
    /// any other topic is a data publication.
    pub fn process_message(&self, client_id: &str, message: Message) {
        debug!(
            "Processing message from client {}, topic: {}",
            client_id,
            message.topic()
        );

        match message.topic() {
            REGISTER_TOPIC => self.handle_registration(client_id, &message),
            SUBSCRIBE_TOPIC => match control_payload(&message) {
                Some(topic) => self.handle_subscription(client_id, &topic),
                None => warn!("Client {}: subscribe payload is not UTF-8", client_id),
            },
            UNSUBSCRIBE_TOPIC => match control_payload(&message) {
                Some(topic) => self.handle_unsubscription(client_id, &topic),
                None => warn!("Client {}: unsubscribe payload is not UTF-8", client_id),
            },
            topic if topic.starts_with(CONTROL_PREFIX) => {
                warn!("Ignoring unknown control topic: {}", topic);
            }
            _ => self.handle_publication(client_id, message),
        }
    }

    fn handle_registration(&self, client_id: &str, message: &Message) {
        let Some(role) = control_payload(message) else {
            warn!("Client {}: registration payload is not UTF-8", client_id);
            return;
        };

        let mut table = self.clients.lock();
        let Some(record) = table.clients.get_mut(client_id) else {
            return;
        };
        match role.as_str() {
            ROLE_PUBLISHER => {
                record.is_publisher = true;
                info!("Client {} registered as publisher", client_id);
            }
            ROLE_SUBSCRIBER => {
                record.is_subscriber = true;
                info!("Client {} registered as subscriber", client_id);
            }
            other => warn!("Client {}: unknown registration role: {}", client_id, other),
        }
    }

    fn handle_subscription(&self, client_id: &str, topic: &str) {
        info!("Client {} subscribing to topic: {}", client_id, topic);

        let sender = {
            let mut table = self.clients.lock();
            let Some(record) = table.clients.get_mut(client_id) else {
                return;
            };
            record.subscriptions.insert(topic.to_string());
            record.is_subscriber = true;
            let sender = record.sender.clone();
            table
                .topics
                .entry(topic.to_string())
                .or_default()
                .insert(client_id.to_string());
            sender
        };

        // Snapshot the cache under its own lock, then replay with no lock
        // held. The router processes frames sequentially, so the replay is
        // ordered before anything published to the topic afterwards.
        let cached = self.cache.lock().snapshot(topic);
        for message in cached {
            if sender.send(message).is_err() {
                debug!("Replay to client {} failed, connection gone", client_id);
                break;
            }
        }
    }

    fn handle_unsubscription(&self, client_id: &str, topic: &str) {
        info!("Client {} unsubscribing from topic: {}", client_id, topic);

        let mut table = self.clients.lock();
        let Some(record) = table.clients.get_mut(client_id) else {
            return;
        };
        record.subscriptions.remove(topic);
        if let Some(subscribers) = table.topics.get_mut(topic) {
            subscribers.remove(client_id);
            if subscribers.is_empty() {
                table.topics.remove(topic);
            }
        }
    }

    fn handle_publication(&self, client_id: &str, message: Message) {
        let is_publisher = {
            let table = self.clients.lock();
            table
                .clients
                .get(client_id)
                .map(|record| record.is_publisher)
                .unwrap_or(false)
        };
        if !is_publisher {
            warn!("Client {} is not registered as publisher", client_id);
            return;
        }

        self.cache.lock().push(message.clone());

        // Snapshot subscriber handles under the clients lock, write after it
        // is released. Sends go to per-connection channels and never block.
        let targets: Vec<(String, mpsc::UnboundedSender<Message>)> = {
            let table = self.clients.lock();
            match table.topics.get(message.topic()) {
                Some(subscribers) => subscribers
                    .iter()
                    .filter_map(|id| {
                        table
                            .clients
                            .get(id)
                            .filter(|record| record.is_subscriber)
                            .map(|record| (id.clone(), record.sender.clone()))
                    })
                    .collect(),
                None => Vec::new(),
            }
        };

        for (subscriber_id, sender) in targets {
            if sender.send(message.clone()).is_err() {
                debug!(
                    "Send to client {} failed, awaiting disconnect cleanup",
                    subscriber_id
                );
            } else {
                debug!("Sent message to client {}: {}", subscriber_id, message.topic());
            }
        }

        self.events.emit(BrokerEvent::MessageReceived(message.clone()));
        self.events.emit(BrokerEvent::MessagePublished(message));
    }

    /// Unregister every client and drop all cached messages. Used on broker
    /// shutdown.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.clients.lock().clients.keys().cloned().collect();
        for client_id in ids {
            self.unregister_client(&client_id);
        }
        self.cache.lock().clear();
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().clients.len()
    }

    pub fn topic_count(&self) -> usize {
        self.clients.lock().topics.len()
    }

    /// Topics a client is currently subscribed to.
    pub fn subscriptions_of(&self, client_id: &str) -> HashSet<String> {
        self.clients
            .lock()
            .clients
            .get(client_id)
            .map(|record| record.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Ids currently subscribed to a topic, for observability and tests.
    pub fn subscriber_ids(&self, topic: &str) -> Vec<String> {
        self.clients
            .lock()
            .topics
            .get(topic)
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn transport_of(&self, client_id: &str) -> Option<TransportKind> {
        self.clients
            .lock()
            .clients
            .get(client_id)
            .map(|record| record.transport)
    }

    pub fn cache_size(&self) -> usize {
        self.cache.lock().capacity()
    }

    /// Adjust the cache bound at runtime; shrinking trims existing queues.
    pub fn set_cache_size(&self, size: usize) {
        self.cache.lock().set_capacity(size);
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Number of messages currently cached for a topic.
    pub fn cached_message_count(&self, topic: &str) -> usize {
        self.cache.lock().len(topic)
    }
}

fn control_payload(message: &Message) -> Option<String> {
    String::from_utf8(message.payload().to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn register(handler: &MessageHandler, handle: &ClientHandle, role: &str) {
        handler.process_message(
            &handle.id,
            Message::new(REGISTER_TOPIC, Bytes::from(role.to_string())),
        );
    }

    fn subscribe(handler: &MessageHandler, handle: &ClientHandle, topic: &str) {
        handler.process_message(
            &handle.id,
            Message::new(SUBSCRIBE_TOPIC, Bytes::from(topic.to_string())),
        );
    }

    fn publish(handler: &MessageHandler, handle: &ClientHandle, topic: &str, payload: &str) {
        handler.process_message(
            &handle.id,
            Message::new(topic, Bytes::from(payload.to_string())),
        );
    }

    fn drain(handle: &mut ClientHandle) -> Vec<Message> {
        let mut received = Vec::new();
        while let Ok(message) = handle.outbound.try_recv() {
            received.push(message);
        }
        received
    }

    #[test]
    fn test_publish_reaches_subscriber() {
        let handler = MessageHandler::new(100);
        let mut subscriber = handler.register_client(TransportKind::Tcp);
        let publisher = handler.register_client(TransportKind::Local);

        register(&handler, &subscriber, ROLE_SUBSCRIBER);
        subscribe(&handler, &subscriber, "t/1");
        register(&handler, &publisher, ROLE_PUBLISHER);
        publish(&handler, &publisher, "t/1", "hello");

        let received = drain(&mut subscriber);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].topic(), "t/1");
        assert_eq!(received[0].payload(), &Bytes::from("hello"));
    }

    #[test]
    fn test_unregistered_publisher_is_dropped() {
        let handler = MessageHandler::new(100);
        let mut subscriber = handler.register_client(TransportKind::Tcp);
        let stranger = handler.register_client(TransportKind::Tcp);

        register(&handler, &subscriber, ROLE_SUBSCRIBER);
        subscribe(&handler, &subscriber, "t/1");
        publish(&handler, &stranger, "t/1", "x");

        assert!(drain(&mut subscriber).is_empty());
        assert_eq!(handler.cached_message_count("t/1"), 0);
    }

    #[test]
    fn test_unsubscribe_stops_delivery_and_drops_empty_topic() {
        let handler = MessageHandler::new(100);
        let mut subscriber = handler.register_client(TransportKind::Tcp);
        let publisher = handler.register_client(TransportKind::Tcp);

        register(&handler, &subscriber, ROLE_SUBSCRIBER);
        subscribe(&handler, &subscriber, "t/1");
        register(&handler, &publisher, ROLE_PUBLISHER);
        assert_eq!(handler.topic_count(), 1);

        handler.process_message(
            &subscriber.id,
            Message::new(UNSUBSCRIBE_TOPIC, Bytes::from("t/1")),
        );
        assert_eq!(handler.topic_count(), 0);

        publish(&handler, &publisher, "t/1", "x");
        assert!(drain(&mut subscriber).is_empty());
    }

    #[test]
    fn test_cache_replay_on_subscribe() {
        let handler = MessageHandler::new(3);
        let publisher = handler.register_client(TransportKind::Tcp);
        register(&handler, &publisher, ROLE_PUBLISHER);

        for payload in ["a", "b", "c", "d"] {
            publish(&handler, &publisher, "t/x", payload);
        }

        let mut late = handler.register_client(TransportKind::Tcp);
        register(&handler, &late, ROLE_SUBSCRIBER);
        subscribe(&handler, &late, "t/x");

        let replayed: Vec<Bytes> = drain(&mut late)
            .iter()
            .map(|m| m.payload().clone())
            .collect();
        assert_eq!(replayed, vec!["b", "c", "d"]);

        publish(&handler, &publisher, "t/x", "e");
        let live: Vec<Bytes> = drain(&mut late)
            .iter()
            .map(|m| m.payload().clone())
            .collect();
        assert_eq!(live, vec!["e"]);
    }

    #[test]
    fn test_disabled_cache_replays_nothing() {
        let handler = MessageHandler::new(0);
        let publisher = handler.register_client(TransportKind::Tcp);
        register(&handler, &publisher, ROLE_PUBLISHER);
        publish(&handler, &publisher, "t/x", "early");

        let mut late = handler.register_client(TransportKind::Tcp);
        register(&handler, &late, ROLE_SUBSCRIBER);
        subscribe(&handler, &late, "t/x");
        assert!(drain(&mut late).is_empty());

        publish(&handler, &publisher, "t/x", "live");
        assert_eq!(drain(&mut late).len(), 1);
    }

    #[test]
    fn test_publisher_fifo_order() {
        let handler = MessageHandler::new(100);
        let mut subscriber = handler.register_client(TransportKind::Tcp);
        let publisher = handler.register_client(TransportKind::Tcp);

        register(&handler, &subscriber, ROLE_SUBSCRIBER);
        subscribe(&handler, &subscriber, "t");
        register(&handler, &publisher, ROLE_PUBLISHER);

        for i in 0..20 {
            publish(&handler, &publisher, "t", &format!("m{}", i));
        }

        let payloads: Vec<Bytes> = drain(&mut subscriber)
            .iter()
            .map(|m| m.payload().clone())
            .collect();
        let expected: Vec<Bytes> = (0..20).map(|i| Bytes::from(format!("m{}", i))).collect();
        assert_eq!(payloads, expected);
    }

    #[test]
    fn test_unregister_cleans_topic_index() {
        let handler = MessageHandler::new(100);
        let subscriber = handler.register_client(TransportKind::Tcp);
        register(&handler, &subscriber, ROLE_SUBSCRIBER);
        subscribe(&handler, &subscriber, "t/1");
        subscribe(&handler, &subscriber, "t/2");
        assert_eq!(handler.topic_count(), 2);

        assert_eq!(
            handler.subscriptions_of(&subscriber.id),
            HashSet::from(["t/1".to_string(), "t/2".to_string()])
        );

        assert!(handler.unregister_client(&subscriber.id));
        assert_eq!(handler.client_count(), 0);
        assert_eq!(handler.topic_count(), 0);
        assert!(handler.subscriber_ids("t/1").is_empty());
        assert!(handler.subscriptions_of(&subscriber.id).is_empty());

        // Second unregister for the same id is a no-op.
        assert!(!handler.unregister_client(&subscriber.id));
    }

    #[test]
    fn test_registry_invariant_after_mixed_operations() {
        let handler = MessageHandler::new(100);
        let a = handler.register_client(TransportKind::Tcp);
        let b = handler.register_client(TransportKind::Local);

        register(&handler, &a, ROLE_SUBSCRIBER);
        register(&handler, &b, ROLE_SUBSCRIBER);
        subscribe(&handler, &a, "shared");
        subscribe(&handler, &b, "shared");
        subscribe(&handler, &b, "solo");

        handler.unregister_client(&a.id);

        // Every id left in the index must still exist in the registry.
        for topic in ["shared", "solo"] {
            for id in handler.subscriber_ids(topic) {
                assert!(handler.transport_of(&id).is_some());
            }
        }
        assert_eq!(handler.subscriber_ids("shared"), vec![b.id.clone()]);
    }

    #[test]
    fn test_control_ops_for_unknown_client_are_noops() {
        let handler = MessageHandler::new(100);
        handler.process_message("ghost", Message::new(SUBSCRIBE_TOPIC, Bytes::from("t")));
        handler.process_message("ghost", Message::new(UNSUBSCRIBE_TOPIC, Bytes::from("t")));
        handler.process_message(
            "ghost",
            Message::new(REGISTER_TOPIC, Bytes::from(ROLE_PUBLISHER)),
        );
        assert_eq!(handler.client_count(), 0);
        assert_eq!(handler.topic_count(), 0);
    }

    #[test]
    fn test_unknown_control_topic_is_never_forwarded() {
        let handler = MessageHandler::new(100);
        let mut subscriber = handler.register_client(TransportKind::Tcp);
        let publisher = handler.register_client(TransportKind::Tcp);

        register(&handler, &subscriber, ROLE_SUBSCRIBER);
        subscribe(&handler, &subscriber, "$SYS/PING");
        register(&handler, &publisher, ROLE_PUBLISHER);
        publish(&handler, &publisher, "$SYS/PING", "x");

        assert!(drain(&mut subscriber).is_empty());
    }

    #[test]
    fn test_eviction_removes_idle_clients() {
        let handler = MessageHandler::new(100);
        let idle = handler.register_client(TransportKind::Tcp);
        let _busy = handler.register_client(TransportKind::Tcp);

        std::thread::sleep(Duration::from_millis(10));
        handler.touch(&_busy.id);

        let evicted = handler.evict_idle(Duration::from_millis(5));
        assert_eq!(evicted, vec![idle.id.clone()]);
        assert_eq!(handler.client_count(), 1);
    }

    #[test]
    fn test_shutdown_clears_everything() {
        let handler = MessageHandler::new(100);
        let publisher = handler.register_client(TransportKind::Tcp);
        let subscriber = handler.register_client(TransportKind::Tcp);
        register(&handler, &publisher, ROLE_PUBLISHER);
        register(&handler, &subscriber, ROLE_SUBSCRIBER);
        subscribe(&handler, &subscriber, "t");
        publish(&handler, &publisher, "t", "x");

        handler.shutdown();
        assert_eq!(handler.client_count(), 0);
        assert_eq!(handler.topic_count(), 0);
        assert_eq!(handler.cached_message_count("t"), 0);
    }

    #[test]
    fn test_set_cache_size_shrinks_live_queues() {
        let handler = MessageHandler::new(10);
        let publisher = handler.register_client(TransportKind::Tcp);
        register(&handler, &publisher, ROLE_PUBLISHER);
        for i in 0..10 {
            publish(&handler, &publisher, "t", &format!("m{}", i));
        }

        handler.set_cache_size(4);
        assert_eq!(handler.cache_size(), 4);
        assert_eq!(handler.cached_message_count("t"), 4);
    }
}
