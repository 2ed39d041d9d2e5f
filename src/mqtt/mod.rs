//! # MQTT Integration Module
//!
//! Client side of the broker protocol used to mirror the photobooth counters.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings and derived topics
//! ├── client.rs           - BrokerClient seam, implemented for rumqttc::AsyncClient
//! ├── error.rs            - Connect / publish / transport errors
//! ├── message_manager.rs  - Inbound message representation and channel
//! ├── tracker.rs          - Pending publishes and the shutdown drain
//! └── mqtt_handler.rs     - Connection manager and event loop handling
//! ```
//!
//! ## Threading
//!
//! The host drives `connect`, `publish` and `disconnect` from its own task. The rumqttc
//! event loop runs in a background task that reports connect acknowledgments, publish
//! acknowledgments and inbound messages. The only state both sides touch is the
//! [`tracker::PublishTracker`], which serializes access behind a single lock.
//!
//! ## Failure Policy
//!
//! Nothing here is allowed to take the photobooth down. An unreachable broker yields a
//! disabled manager whose publishes are no-ops; publish failures are reported to the
//! caller once and never retried.

pub mod client;
pub mod config;
pub mod error;
pub mod message_manager;
pub mod mqtt_handler;
pub mod tracker;

pub use client::BrokerClient;
pub use config::{MqttConfig, Topics};
pub use error::{ConnectError, PublishError, TransportError};
pub use message_manager::InboundMessage;
pub use mqtt_handler::{ConnectionManager, ConnectionState};
pub use tracker::{DrainReport, MessageId, PendingPublish, PublishTracker};
