//! # RelayMQ Client Library
//!
//! Publisher and subscriber clients for the RelayMQ broker.
//!
//! Both clients speak the broker's framed wire protocol over TCP or a local
//! Unix-socket endpoint, register their role on connect, and optionally
//! reconnect automatically. A publisher queues messages in memory while
//! disconnected and drains the queue in order once the link is back; a
//! subscriber restores its subscriptions after every reconnect.
//!
//! ## Publisher Example
//!
//! ```rust,no_run
//! use relaymq_client::{ClientConfig, Publisher};
//!
//! #[tokio::main]
//! async fn main() -> relaymq_client::Result<()> {
//!     let config = ClientConfig::builder()
//!         .host("localhost")
//!         .port(5555)
//!         .auto_reconnect(true)
//!         .build();
//!
//!     let mut publisher = Publisher::new(config);
//!     publisher.connect().await?;
//!     publisher.publish("sensor/temp", "21.5").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Subscriber Example
//!
//! ```rust,no_run
//! use relaymq_client::{ClientConfig, Subscriber, SubscriberEvent};
//!
//! #[tokio::main]
//! async fn main() -> relaymq_client::Result<()> {
//!     let mut subscriber = Subscriber::new(ClientConfig::default());
//!     let mut events = subscriber.events().expect("events already taken");
//!
//!     subscriber.connect().await?;
//!     subscriber.subscribe("sensor/temp").await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let SubscriberEvent::Message(message) = event {
//!             println!("{}: {:?}", message.topic(), message.payload());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod publisher;
pub mod subscriber;

pub use config::{ClientConfig, ClientConfigBuilder, Transport};
pub use error::RelaymqClientError;
pub use publisher::{PublishOutcome, Publisher, PublisherEvent};
pub use subscriber::{Subscriber, SubscriberEvent};

/// Client library result type
pub type Result<T> = std::result::Result<T, RelaymqClientError>;

/// Client library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
