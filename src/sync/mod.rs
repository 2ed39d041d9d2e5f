//! # Counter Synchronization
//!
//! Glue between the photobooth host and the broker session:
//!
//! - [`trigger`] decides which state changes are worth a publish,
//! - [`reset`] validates remote reset requests,
//! - [`synchronized`] owns the store and exposes the host lifecycle hooks.
//!
//! Every hook swallows its own failures after logging them. Mirroring counters is
//! auxiliary; the photobooth workflow must keep running whatever the broker does.

pub mod reset;
pub mod synchronized;
pub mod trigger;

pub use reset::{ResetListener, ResetRejected};
pub use synchronized::{ResetOutcome, SynchronizedCounters};
pub use trigger::{EventTrigger, PrinterStatus, TriggerFlags};
