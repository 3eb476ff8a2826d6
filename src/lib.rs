//! # MQ Rust Client
//!
//! A Rust client for a small publish/subscribe message queue broker that speaks a
//! text-framed, HTTP/1.0-style request/response protocol over one long-lived
//! connection.
//!
//! The client publishes messages to topics, manages topic subscriptions and
//! retrieves messages delivered to its own queue. Because the protocol carries no
//! request identifiers, the client keeps exactly one request in flight: callers
//! are serialized and a single background sender task owns the connection.
//!
//! ## Quick Start
//!
//! ```no_run
//! use mq_client::MqClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = MqClient::new("alice", "localhost", 1337)?;
//!     client.start().await?;
//!
//!     client.subscribe("news").await?;
//!     client.publish("news", "Hello, broker!").await?;
//!
//!     let message = client.retrieve().await?;
//!     println!("Received: {}", message);
//!
//!     client.unsubscribe("news").await?;
//!     client.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Async/await support** - Built on Tokio; any number of tasks may share a client
//! - **Ordered round trips** - Every caller receives the response to its own request
//! - **Clean shutdown** - [`MqClient::stop`] drains queued requests, then closes the connection
//! - **Reconnects** - Broken connections are replaced on the next request
//! - **Pluggable transport** - Supply a custom [`Connector`] for TLS or in-memory streams
//! - **Observability** - `tracing` spans and an optional [`EventSink`]
//!
//! ## Configuration
//!
//! Use [`ConfigBuilder`] for advanced configuration:
//!
//! ```no_run
//! use mq_client::MqClient;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), mq_client::MqError> {
//! let client = MqClient::with_config(
//!     MqClient::builder()
//!         .name("worker-1")
//!         .host("queue.example.com")
//!         .port(8080)
//!         .timeout(Duration::from_secs(10))
//!         .max_retries(5)
//!         .retry_delay(Duration::from_millis(200))
//!         .build(),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod message;
pub mod queue;
mod retry;

pub use client::{Lifecycle, MqClient};
pub use config::{Config, ConfigBuilder};
pub use connection::{BoxStream, ConnectFuture, Connection, Connector, Stream, TcpConnector};
pub use error::{MqError, Result};
pub use event::{ClientEvent, EventSink};
pub use message::{Method, Request, RequestId, Response};
pub use queue::BlockingQueue;
