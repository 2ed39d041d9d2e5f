use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::reset::{ResetListener, ResetRejected};
use super::trigger::{EventTrigger, PrinterStatus, TriggerFlags};
use crate::counters::{
    CounterChange, CounterError, CounterSnapshot, CounterStore, CounterValues, SyncEvent,
};
use crate::mqtt::message_manager::inbound_channel;
use crate::mqtt::{ConnectionManager, ConnectionState, InboundMessage, MqttConfig};

const INBOUND_CAPACITY: usize = 16;

/// What happened to one inbound reset request.
#[derive(Debug, PartialEq, Eq)]
pub enum ResetOutcome {
    Applied,
    Rejected(ResetRejected),
}

struct Inner {
    store: Mutex<CounterStore>,
    trigger: Mutex<EventTrigger>,
    connection: ConnectionManager,
    reset_listener: ResetListener,
    reset_worker: Mutex<Option<JoinHandle<()>>>,
}

/// The counter store with broker mirroring attached.
///
/// Cloning is cheap; every clone drives the same store and session. Lock order is
/// store before trigger, and neither lock is held across an `.await`.
#[derive(Clone)]
pub struct SynchronizedCounters {
    inner: Arc<Inner>,
}

impl SynchronizedCounters {
    /// Startup hook: wraps `store` and connects to the broker.
    ///
    /// An unreachable broker is logged and leaves publishing disabled for the rest of
    /// the process; the counters keep working locally.
    pub async fn start(config: &MqttConfig, store: CounterStore) -> Self {
        let (inbound_tx, inbound_rx) = inbound_channel(INBOUND_CAPACITY);

        let connection = match ConnectionManager::connect(config, inbound_tx).await {
            Ok(connection) => connection,
            Err(e) => {
                error!(
                    "Unable to connect to the MQTT broker {} due to : {}",
                    config.broker_host, e
                );
                ConnectionManager::disabled(config.topics())
            }
        };

        Self::with_connection(store, connection, inbound_rx)
    }

    /// Builds the handle around an existing connection and starts the reset worker
    /// consuming `inbound`.
    pub fn with_connection(
        store: CounterStore,
        connection: ConnectionManager,
        inbound: mpsc::Receiver<InboundMessage>,
    ) -> Self {
        let reset_listener = ResetListener::new(connection.topics());
        let counters = Self {
            inner: Arc::new(Inner {
                store: Mutex::new(store),
                trigger: Mutex::new(EventTrigger::new()),
                connection,
                reset_listener,
                reset_worker: Mutex::new(None),
            }),
        };

        let worker = tokio::spawn(run_reset_worker(Arc::downgrade(&counters.inner), inbound));
        *counters.inner.reset_worker.lock() = Some(worker);
        counters
    }

    pub fn can_publish(&self) -> bool {
        self.inner.connection.can_publish()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn trigger_flags(&self) -> TriggerFlags {
        self.inner.trigger.lock().flags()
    }

    pub fn get(&self, name: &str) -> Result<u64, CounterError> {
        self.inner.store.lock().get(name)
    }

    pub fn values(&self) -> CounterValues {
        self.inner.store.lock().values().clone()
    }

    pub fn set(&self, name: &str, value: u64) -> Result<CounterChange, CounterError> {
        let mut store = self.inner.store.lock();
        let change = store.set(name, value)?;
        self.inner.trigger.lock().observe(&change);
        Ok(change)
    }

    pub fn increment(&self, name: &str) -> Result<CounterChange, CounterError> {
        let mut store = self.inner.store.lock();
        let change = store.increment(name)?;
        self.inner.trigger.lock().observe(&change);
        Ok(change)
    }

    /// Resets every counter to its default, clears the paper latch and publishes `Reset`.
    pub async fn reset(&self) {
        let snapshot = {
            let mut store = self.inner.store.lock();
            if let Err(e) = store.reset() {
                // values are already back to defaults in memory
                error!("Unable to persist counter reset: {}", e);
            }
            self.inner.trigger.lock().counters_reset();
            CounterSnapshot::capture(store.values(), SyncEvent::Reset)
        };
        self.publish(snapshot).await;
    }

    pub fn snapshot(&self, event: SyncEvent) -> CounterSnapshot {
        CounterSnapshot::capture(self.inner.store.lock().values(), event)
    }

    pub fn on_enter_waiting(&self) {
        self.inner.trigger.lock().enter_waiting();
    }

    pub async fn on_photo_pipeline_exit(&self) {
        let snapshot = self.snapshot(SyncEvent::NewPhoto);
        self.publish(snapshot).await;
    }

    pub async fn on_poll_tick<P: PrinterStatus + ?Sized>(&self, printer: &P) {
        self.run_trigger_policy(printer).await;
    }

    pub async fn on_print_pipeline_exit<P: PrinterStatus + ?Sized>(&self, printer: &P) {
        self.run_trigger_policy(printer).await;
    }

    /// Cleanup hook: drains pending publishes and closes the session.
    pub async fn on_shutdown(&self) {
        self.inner.connection.disconnect().await;
        if let Some(worker) = self.inner.reset_worker.lock().take() {
            worker.abort();
        }
    }

    /// Validates one inbound message and applies the reset when it is a valid request.
    pub async fn handle_remote_message(&self, message: InboundMessage) -> ResetOutcome {
        debug!("Validating inbound message {}", message);
        match self.inner.reset_listener.validate(&message) {
            Ok(()) => {
                info!("Remote reset requested on {}", message.topic);
                self.reset().await;
                ResetOutcome::Applied
            }
            Err(e @ ResetRejected::ForeignTopic { .. }) => {
                error!("Misrouted MQTT message: {}", e);
                ResetOutcome::Rejected(e)
            }
            Err(e) => {
                warn!("Ignoring reset request: {}", e);
                ResetOutcome::Rejected(e)
            }
        }
    }

    async fn run_trigger_policy<P: PrinterStatus + ?Sized>(&self, printer: &P) {
        let snapshots: Vec<CounterSnapshot> = {
            let store = self.inner.store.lock();
            let events = self.inner.trigger.lock().evaluate(printer);
            events
                .into_iter()
                .map(|event| CounterSnapshot::capture(store.values(), event))
                .collect()
        };

        for snapshot in snapshots {
            self.publish(snapshot).await;
        }
    }

    async fn publish(&self, snapshot: CounterSnapshot) {
        match self.inner.connection.publish_snapshot(&snapshot).await {
            Ok(Some(id)) => info!("Counters published over MQTT ({} {})", snapshot.event(), id),
            Ok(None) => debug!("MQTT publishing disabled, skipped {}", snapshot.event()),
            Err(e) => error!("Unable to publish counters over MQTT due to : {}", e),
        }
    }
}

async fn run_reset_worker(inner: Weak<Inner>, mut inbound: mpsc::Receiver<InboundMessage>) {
    while let Some(message) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        SynchronizedCounters { inner }
            .handle_remote_message(message)
            .await;
    }
    debug!("Reset worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{default_counters, PRINTED, TAKEN};
    use crate::mqtt::client::mock::{MockBrokerClient, Request};
    use crate::mqtt::Topics;
    use crate::sync::trigger::tests::FakePrinter;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    struct Harness {
        counters: SynchronizedCounters,
        client: MockBrokerClient,
        inbound: mpsc::Sender<InboundMessage>,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store =
            CounterStore::open(dir.path().join("counters.toml"), default_counters()).unwrap();
        let client = MockBrokerClient::new();
        let connection = ConnectionManager::from_client(
            Arc::new(client.clone()),
            Topics::new("X"),
            Duration::from_millis(10),
        );
        let (inbound, inbound_rx) = inbound_channel(4);

        Harness {
            counters: SynchronizedCounters::with_connection(store, connection, inbound_rx),
            client,
            inbound,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn photo_exit_publishes_new_photo_snapshot() {
        let h = harness();
        h.counters.increment(TAKEN).unwrap();

        h.counters.on_photo_pipeline_exit().await;

        let published = h.client.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "X/counters");
        assert_eq!(published[0].1["event"], "NewPhoto");
        assert_eq!(published[0].1[TAKEN], 1);
    }

    #[tokio::test]
    async fn printed_sequence_publishes_print_started_twice() {
        let h = harness();
        let printer = FakePrinter::ready();

        for value in [0, 1, 1, 2] {
            h.counters.set(PRINTED, value).unwrap();
            h.counters.on_poll_tick(&printer).await;
        }

        assert_eq!(h.client.published_events(), vec!["PrintStarted", "PrintStarted"]);
    }

    #[tokio::test]
    async fn paper_outage_publishes_once_until_reset() {
        let h = harness();
        let printer = FakePrinter::ready();

        for ready in [true, false, false, false, true] {
            printer.ready.set(ready);
            h.counters.on_poll_tick(&printer).await;
        }
        assert_eq!(h.client.published_events(), vec!["MissPaper"]);

        h.counters.reset().await;
        printer.ready.set(false);
        h.counters.on_print_pipeline_exit(&printer).await;

        assert_eq!(
            h.client.published_events(),
            vec!["MissPaper", "Reset", "MissPaper"]
        );
    }

    #[tokio::test]
    async fn valid_remote_reset_resets_and_publishes() {
        let h = harness();
        h.counters.set(TAKEN, 9).unwrap();

        let outcome = h
            .counters
            .handle_remote_message(InboundMessage::from_topic("X/reset", "TRUE"))
            .await;

        assert_eq!(outcome, ResetOutcome::Applied);
        assert_eq!(h.counters.get(TAKEN).unwrap(), 0);
        let published = h.client.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1["event"], "Reset");
        assert_eq!(published[0].1[TAKEN], 0);
    }

    #[tokio::test]
    async fn invalid_remote_reset_changes_nothing() {
        let h = harness();
        h.counters.set(TAKEN, 9).unwrap();

        for (topic, payload) in [
            ("X/reset", "false"),
            ("X/reset", ""),
            ("X/reset", "yes"),
            ("X/reset", "1"),
            ("X/other", "true"),
        ] {
            let outcome = h
                .counters
                .handle_remote_message(InboundMessage::from_topic(topic, payload))
                .await;
            assert!(matches!(outcome, ResetOutcome::Rejected(_)));
        }

        assert_eq!(h.counters.get(TAKEN).unwrap(), 9);
        assert!(h.client.requests().is_empty());
    }

    #[tokio::test]
    async fn reset_worker_applies_forwarded_message() {
        let h = harness();
        h.counters.set(PRINTED, 4).unwrap();

        h.inbound
            .send(InboundMessage::from_topic("X/reset", "true"))
            .await
            .unwrap();

        timeout(Duration::from_secs(1), async {
            while h.client.published_events().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("reset was not applied");
        assert_eq!(h.counters.get(PRINTED).unwrap(), 0);
        assert_eq!(h.client.published_events(), vec!["Reset"]);
    }

    #[tokio::test]
    async fn shutdown_disables_publishing() {
        let h = harness();
        h.counters.on_shutdown().await;

        assert!(!h.counters.can_publish());
        assert_eq!(h.counters.connection_state(), ConnectionState::Disconnected);

        h.counters.on_photo_pipeline_exit().await;
        assert!(h.client.published().is_empty());
        assert_eq!(
            h.client.requests(),
            vec![Request::Unsubscribe("X/reset".into()), Request::Disconnect]
        );
    }

    #[tokio::test]
    async fn unreachable_broker_leaves_counters_usable() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::open(dir.path().join("c.toml"), default_counters()).unwrap();
        let config = MqttConfig {
            broker_host: "127.0.0.1".into(),
            broker_port: 1,
            connect_timeout_secs: 2,
            ..MqttConfig::default()
        };

        let counters = SynchronizedCounters::start(&config, store).await;

        assert!(!counters.can_publish());
        counters.increment(TAKEN).unwrap();
        counters.on_photo_pipeline_exit().await;
        counters.on_shutdown().await;
        assert_eq!(counters.get(TAKEN).unwrap(), 1);
    }
}
