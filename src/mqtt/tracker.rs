//! # Publish Tracker
//!
//! Keeps the set of publishes that were handed to the broker client but not yet
//! acknowledged, so that shutdown can wait for them.
//!
//! ## Identifiers
//!
//! rumqttc assigns the MQTT packet id inside the event loop, after `publish()` has
//! already returned. A record therefore gets a local [`MessageId`] when it is created
//! and the packet id is bound later, when the event loop reports the outgoing publish.
//! Requests leave the client queue in order, so the packet id always belongs to the
//! oldest record that does not have one yet.
//!
//! ## Locking
//!
//! One mutex covers the pending set and the `accepting` flag. It is never held across
//! an `.await`: `drain_and_wait` copies the ids out, releases the lock and then waits on
//! a `Notify` for each id in turn, so acknowledgments keep flowing during a drain.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPublish {
    pub id: MessageId,
    /// MQTT packet id, known once the event loop has written the publish.
    pub packet_id: Option<u16>,
    pub topic: String,
    pub enqueued_at: DateTime<Local>,
}

/// Result of a shutdown drain.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub acknowledged: usize,
    /// Records whose acknowledgment did not arrive within their window.
    pub abandoned: Vec<PendingPublish>,
}

#[derive(Debug)]
struct TrackerState {
    accepting: bool,
    next_id: u64,
    pending: Vec<PendingPublish>,
}

#[derive(Debug)]
struct TrackerInner {
    state: Mutex<TrackerState>,
    acked: Notify,
}

#[derive(Debug, Clone)]
pub struct PublishTracker {
    inner: Arc<TrackerInner>,
}

impl Default for PublishTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                state: Mutex::new(TrackerState {
                    accepting: true,
                    next_id: 1,
                    pending: Vec::new(),
                }),
                acked: Notify::new(),
            }),
        }
    }

    /// A tracker that never accepts records, for a manager with no broker.
    pub fn closed() -> Self {
        let tracker = Self::new();
        tracker.close();
        tracker
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.state.lock().accepting
    }

    /// Stops accepting new records. Returns whether the tracker was still open.
    pub fn close(&self) -> bool {
        std::mem::replace(&mut self.inner.state.lock().accepting, false)
    }

    /// Adds a record for a publish about to be handed to the client.
    ///
    /// Returns `None` once the tracker is closed; the caller must then skip the publish.
    pub fn record(&self, topic: &str) -> Option<MessageId> {
        let mut state = self.inner.state.lock();
        if !state.accepting {
            return None;
        }

        let id = MessageId(state.next_id);
        state.next_id += 1;
        state.pending.push(PendingPublish {
            id,
            packet_id: None,
            topic: topic.to_string(),
            enqueued_at: Local::now(),
        });
        Some(id)
    }

    /// Drops a record whose publish never reached the client.
    pub fn discard(&self, id: MessageId) {
        self.remove(id);
    }

    /// Binds `packet_id` to the oldest record that has none.
    ///
    /// A packet id that is already bound is a retransmission and changes nothing.
    pub fn bind_packet(&self, packet_id: u16) -> Option<MessageId> {
        let mut state = self.inner.state.lock();
        if let Some(record) = state
            .pending
            .iter()
            .find(|p| p.packet_id == Some(packet_id))
        {
            debug!("Packet {} retransmitted for {}", packet_id, record.id);
            return Some(record.id);
        }

        let record = state.pending.iter_mut().find(|p| p.packet_id.is_none())?;
        record.packet_id = Some(packet_id);
        Some(record.id)
    }

    /// Removes the record with `id`. Unknown or already removed ids are ignored.
    pub fn acknowledge(&self, id: MessageId) -> bool {
        self.remove(id).is_some()
    }

    /// Removes the record bound to `packet_id` and returns its id.
    pub fn acknowledge_packet(&self, packet_id: u16) -> Option<MessageId> {
        let id = {
            let state = self.inner.state.lock();
            state
                .pending
                .iter()
                .find(|p| p.packet_id == Some(packet_id))
                .map(|p| p.id)
        }?;
        self.acknowledge(id).then_some(id)
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.inner.state.lock().pending.iter().any(|p| p.id == id)
    }

    pub fn pending(&self) -> Vec<PendingPublish> {
        self.inner.state.lock().pending.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits up to `per_message` for each publish pending at call time.
    ///
    /// Worst case this stalls for `pending × per_message` (several seconds with the
    /// default 3 s window). Records that time out are dropped and returned.
    pub async fn drain_and_wait(&self, per_message: Duration) -> DrainReport {
        let ids: Vec<MessageId> = {
            let state = self.inner.state.lock();
            info!(
                "Waiting for {} pending publish(es) to be acknowledged",
                state.pending.len()
            );
            state.pending.iter().map(|p| p.id).collect()
        };

        let mut report = DrainReport::default();
        for id in ids {
            if timeout(per_message, self.wait_for(id)).await.is_ok() {
                report.acknowledged += 1;
                continue;
            }

            match self.remove(id) {
                Some(record) => {
                    warn!(
                        "Publish {} to {} not acknowledged within {:?}, giving up",
                        record.id, record.topic, per_message
                    );
                    report.abandoned.push(record);
                }
                // acknowledged right as the window closed
                None => report.acknowledged += 1,
            }
        }

        report
    }

    async fn wait_for(&self, id: MessageId) {
        loop {
            let notified = self.inner.acked.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.contains(id) {
                return;
            }
            notified.await;
        }
    }

    fn remove(&self, id: MessageId) -> Option<PendingPublish> {
        let removed = {
            let mut state = self.inner.state.lock();
            let index = state.pending.iter().position(|p| p.id == id)?;
            state.pending.remove(index)
        };
        self.inner.acked.notify_waiters();
        Some(removed)
    }
}
