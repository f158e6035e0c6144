//! # RelayMQ Broker Module
//!
//! The message-routing core of the broker, split into:
//!
//! - [`server`] - dual-transport acceptor (TCP + Unix socket), per-connection
//!   reader/writer tasks, the router task, and the liveness sweeper
//! - [`handler`] - the routing engine over the shared client registry, topic
//!   index, and message cache
//! - [`cache`] - bounded per-topic FIFO of recent messages
//! - [`events`] - broadcast notifications for external observers
//!
//! ## Concurrency Model
//!
//! Shared state lives behind two locks: the clients lock (registry + topic
//! index) and the cache lock. Every operation that needs to write to a
//! subscriber snapshots the handles it needs under the lock and performs the
//! sends after releasing it; socket I/O is confined to per-connection tasks
//! fed by unbounded channels, so no lock is ever held across I/O.

pub mod cache;
pub mod events;
pub mod handler;
pub mod server;

pub use events::BrokerEvent;
pub use handler::{ClientHandle, MessageHandler, TransportKind};
pub use server::BrokerServer;
