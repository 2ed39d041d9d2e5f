use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Outgoing, Packet, Publish,
};
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::BrokerClient;
use super::config::{MqttConfig, Topics};
use super::error::{ConnectError, PublishError};
use super::message_manager::InboundMessage;
use super::tracker::{MessageId, PublishTracker};
use crate::counters::CounterSnapshot;

/// Capacity of the rumqttc request queue.
const REQUEST_CAPACITY: usize = 64;
/// Pause between reconnect attempts once the first connection succeeded.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// How long shutdown waits for the event loop to flush the DISCONNECT packet.
const LOOP_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Owns the broker session: connect, background event loop, publish, drain-and-disconnect.
///
/// A manager built with [`ConnectionManager::disabled`] never touches the network and
/// turns every publish into a no-op; that is what the host gets when the broker is
/// unreachable at startup.
pub struct ConnectionManager {
    client: Option<Arc<dyn BrokerClient>>,
    topics: Topics,
    tracker: PublishTracker,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    /// Held from `record` until the request is queued, so records and outgoing packet
    /// ids line up in the same order.
    publish_lock: AsyncMutex<()>,
    drain_timeout: Duration,
}

impl ConnectionManager {
    pub fn disabled(topics: Topics) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            client: None,
            topics,
            tracker: PublishTracker::closed(),
            state_tx,
            cancel: CancellationToken::new(),
            event_loop: Mutex::new(None),
            publish_lock: AsyncMutex::new(()),
            drain_timeout: Duration::ZERO,
        }
    }

    /// Wraps an already connected client. Acknowledgments must be fed to
    /// [`ConnectionManager::tracker`] by whoever drives that client.
    pub fn from_client(
        client: Arc<dyn BrokerClient>,
        topics: Topics,
        drain_timeout: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connected);
        Self {
            client: Some(client),
            topics,
            tracker: PublishTracker::new(),
            state_tx,
            cancel: CancellationToken::new(),
            event_loop: Mutex::new(None),
            publish_lock: AsyncMutex::new(()),
            drain_timeout,
        }
    }

    /// Opens the broker session and waits for the first connect acknowledgment.
    ///
    /// The reset topic is subscribed from the event loop once the broker has accepted
    /// the connection, and again after every reconnect. Messages arriving on it are
    /// forwarded to `inbound`.
    pub async fn connect(
        config: &MqttConfig,
        inbound: mpsc::Sender<InboundMessage>,
    ) -> Result<Self, ConnectError> {
        let topics = config.topics();

        let mut mqtt_options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        mqtt_options
            .set_keep_alive(config.keep_alive())
            .set_clean_session(true);
        if let Some((user, password)) = config.credentials() {
            mqtt_options.set_credentials(user, password);
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let client: Arc<dyn BrokerClient> = Arc::new(client);

        let tracker = PublishTracker::new();
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let (connected_tx, connected_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let handler = EventHandler {
            client: client.clone(),
            tracker: tracker.clone(),
            state_tx: state_tx.clone(),
            topics: topics.clone(),
            inbound,
            broker: (config.broker_host.clone(), config.broker_port),
            first_connect: Some(connected_tx),
        };
        info!(
            "Connecting to MQTT broker {}:{} as {}",
            config.broker_host, config.broker_port, config.client_id
        );
        let handle = tokio::spawn(run_event_loop(eventloop, handler, cancel.clone()));

        let outcome = match timeout(config.connect_timeout(), connected_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectError::LoopStopped),
            Err(_) => Err(ConnectError::Timeout {
                host: config.broker_host.clone(),
                port: config.broker_port,
                secs: config.connect_timeout_secs,
            }),
        };

        if let Err(e) = outcome {
            cancel.cancel();
            state_tx.send_replace(ConnectionState::Disconnected);
            return Err(e);
        }

        info!("Will push counters over MQTT broker {}", config.broker_host);
        Ok(Self {
            client: Some(client),
            topics,
            tracker,
            state_tx,
            cancel,
            event_loop: Mutex::new(Some(handle)),
            publish_lock: AsyncMutex::new(()),
            drain_timeout: config.drain_timeout(),
        })
    }

    pub fn can_publish(&self) -> bool {
        self.client.is_some() && self.tracker.is_accepting()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn tracker(&self) -> &PublishTracker {
        &self.tracker
    }

    /// Hands `payload` to the client and tracks it until acknowledged.
    ///
    /// Returns `Ok(None)` without touching the client when publishing is disabled.
    /// Never waits on the broker: a full request queue fails the publish, which is
    /// not retried.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<Option<MessageId>, PublishError> {
        let Some(client) = &self.client else {
            return Ok(None);
        };
        let _queue = self.publish_lock.lock().await;
        let Some(id) = self.tracker.record(topic) else {
            return Ok(None);
        };

        if let Err(e) = client.publish(topic, payload).await {
            self.tracker.discard(id);
            return Err(e.into());
        }

        debug!("Queued publish {} to {}", id, topic);
        Ok(Some(id))
    }

    pub async fn publish_snapshot(
        &self,
        snapshot: &CounterSnapshot,
    ) -> Result<Option<MessageId>, PublishError> {
        if !self.can_publish() {
            return Ok(None);
        }
        let payload = snapshot.to_payload()?;
        self.publish(&self.topics.counters, payload).await
    }

    /// Shuts the session down: stop publishing, unsubscribe, drain, close.
    ///
    /// Drain blocks up to `pending × drain_timeout`. Later calls return immediately.
    pub async fn disconnect(&self) {
        let Some(client) = &self.client else {
            return;
        };
        if !self.tracker.close() {
            debug!("MQTT session already shut down");
            return;
        }

        self.state_tx.send_replace(ConnectionState::Disconnecting);

        if let Err(e) = client.unsubscribe(&self.topics.reset).await {
            warn!("Unable to unsubscribe from {}: {}", self.topics.reset, e);
        }

        let report = self.tracker.drain_and_wait(self.drain_timeout).await;
        if !report.abandoned.is_empty() {
            warn!(
                "{} publish(es) were never acknowledged by the broker",
                report.abandoned.len()
            );
        }

        if let Err(e) = client.disconnect().await {
            warn!("Clean disconnect failed: {}", e);
        }

        let handle = self.event_loop.lock().take();
        if let Some(handle) = handle {
            if timeout(LOOP_STOP_TIMEOUT, handle).await.is_err() {
                warn!("MQTT event loop did not stop in time, cancelling it");
            }
        }
        self.cancel.cancel();

        self.state_tx.send_replace(ConnectionState::Disconnected);
        info!("Disconnected from MQTT broker");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopControl {
    Continue,
    Stop,
}

/// Reacts to everything the rumqttc event loop reports.
pub(crate) struct EventHandler {
    pub(crate) client: Arc<dyn BrokerClient>,
    pub(crate) tracker: PublishTracker,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) topics: Topics,
    pub(crate) inbound: mpsc::Sender<InboundMessage>,
    pub(crate) broker: (String, u16),
    pub(crate) first_connect: Option<oneshot::Sender<Result<(), ConnectError>>>,
}

impl EventHandler {
    pub(crate) fn handle_event(&mut self, event: Event) -> LoopControl {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => return self.on_connack(ack),
            Event::Incoming(Packet::PubAck(ack)) => {
                match self.tracker.acknowledge_packet(ack.pkid) {
                    Some(id) => debug!("Publish {} acknowledged (packet {})", id, ack.pkid),
                    None => debug!("Acknowledgment for untracked packet {}", ack.pkid),
                }
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                debug!("Subscription acknowledged: {:?}", ack.return_codes)
            }
            Event::Incoming(Packet::Publish(publish)) => self.forward(publish),
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                if self.tracker.bind_packet(pkid).is_none() {
                    debug!("Outgoing packet {} has no tracked publish", pkid);
                }
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                debug!("DISCONNECT sent, stopping event loop");
                return LoopControl::Stop;
            }
            _ => {}
        }
        LoopControl::Continue
    }

    pub(crate) fn handle_error(&mut self, e: &ConnectionError) -> LoopControl {
        if let Some(tx) = self.first_connect.take() {
            let (host, port) = self.broker.clone();
            let error = match e {
                ConnectionError::ConnectionRefused(code) => ConnectError::Refused {
                    host,
                    port,
                    reason: format!("{:?}", code),
                },
                other => ConnectError::Unreachable {
                    host,
                    port,
                    reason: other.to_string(),
                },
            };
            let _ = tx.send(Err(error));
            return LoopControl::Stop;
        }

        if *self.state_tx.borrow() == ConnectionState::Disconnecting {
            debug!("Connection closed during shutdown: {}", e);
            return LoopControl::Stop;
        }

        warn!("Connection to MQTT broker lost: {}", e);
        self.state_tx.send_replace(ConnectionState::Connecting);
        LoopControl::Continue
    }

    fn on_connack(&mut self, ack: ConnAck) -> LoopControl {
        if ack.code != ConnectReturnCode::Success {
            return self.handle_error(&ConnectionError::ConnectionRefused(ack.code));
        }

        info!("Connected to MQTT broker {}:{}", self.broker.0, self.broker.1);
        if *self.state_tx.borrow() != ConnectionState::Disconnecting {
            self.state_tx.send_replace(ConnectionState::Connected);
        }
        self.subscribe_reset();

        if let Some(tx) = self.first_connect.take() {
            let _ = tx.send(Ok(()));
        }
        LoopControl::Continue
    }

    fn subscribe_reset(&self) {
        let client = self.client.clone();
        let topic = self.topics.reset.clone();
        // queued from a separate task so a full request queue cannot stall the loop
        tokio::spawn(async move {
            match client.subscribe(&topic).await {
                Ok(()) => info!("Listening for reset requests on {}", topic),
                Err(e) => error!("Unable to subscribe to {}: {}", topic, e),
            }
        });
    }

    fn forward(&self, publish: Publish) {
        if !self.tracker.is_accepting() {
            debug!("Ignoring message on {} during shutdown", publish.topic);
            return;
        }

        let message = InboundMessage::from_topic(publish.topic, publish.payload.to_vec());
        if let Err(e) = self.inbound.try_send(message) {
            warn!("Dropping inbound MQTT message: {}", e);
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    mut handler: EventHandler,
    cancel: CancellationToken,
) {
    debug!("MQTT event loop started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => {
                let control = match event {
                    Ok(event) => handler.handle_event(event),
                    Err(e) => {
                        let control = handler.handle_error(&e);
                        if control == LoopControl::Continue {
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = sleep(RECONNECT_DELAY) => {}
                            }
                        }
                        control
                    }
                };
                if control == LoopControl::Stop {
                    break;
                }
            }
        }
    }
    debug!("MQTT event loop stopped");
}
