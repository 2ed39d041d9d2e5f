//! Mirrors photobooth counters to an MQTT broker and accepts remote resets.

pub mod config;
pub mod counters;
pub mod mqtt;
pub mod sync;

pub use config::{AppConfig, ConfigError};
pub use counters::{CounterSnapshot, CounterStore, SyncEvent};
pub use mqtt::{ConnectionManager, ConnectionState, MqttConfig};
pub use sync::{PrinterStatus, SynchronizedCounters};
