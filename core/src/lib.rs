//! # RelayMQ Core Library
//!
//! RelayMQ is a lightweight topic-based publish/subscribe message broker.
//! Publishers send opaque byte payloads tagged with a topic string; the broker
//! fans every publication out to all clients subscribed to that topic and
//! keeps a bounded per-topic cache of recent messages which is replayed to
//! late-joining subscribers.
//!
//! ## Architecture Overview
//!
//! The crate is organized around a small number of core components:
//!
//! - [`protocol`] - Message type, binary wire format, and stream framing
//! - [`broker`] - Dual-transport server (TCP + Unix socket), client registry,
//!   topic index, message cache, and the routing engine
//! - [`config`] - Broker configuration
//! - [`logging`] - File logger used by the broker and client binaries
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relaymq::{BrokerConfig, BrokerServer};
//!
//! #[tokio::main]
//! async fn main() -> relaymq::Result<()> {
//!     let server = BrokerServer::new(BrokerConfig::default());
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod logging;
pub mod protocol;

pub use broker::{BrokerEvent, BrokerServer, MessageHandler, TransportKind};
pub use config::BrokerConfig;
pub use protocol::{FrameAssembler, Message, MessageCodec};

use thiserror::Error;

/// RelayMQ error types
///
/// Covers every failure surface of the broker: socket and file I/O, wire
/// protocol violations, and invalid configuration.
#[derive(Debug, Error)]
pub enum RelaymqError {
    /// Socket or file I/O errors, including bind and accept failures
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol violations: damaged frames, malformed message bodies
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration validation and logger initialization errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for RelayMQ operations
pub type Result<T> = std::result::Result<T, RelaymqError>;
