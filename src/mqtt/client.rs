//! The broker client seam.
//!
//! Everything the connection manager asks of the broker goes through [`BrokerClient`],
//! which is implemented for `rumqttc::AsyncClient`. Requests are only queued here; the
//! event loop task performs the actual network I/O.
//!
//! rumqttc stops reading its request queue while the broker is unreachable, so every
//! request is handed over with the `try_*` variants. A full queue is reported as an error
//! instead of suspending the caller until the broker comes back.

use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};

use super::error::TransportError;

#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[async_trait]
impl BrokerClient for AsyncClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.try_publish(topic, QoS::AtLeastOnce, false, payload)?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.try_subscribe(topic, QoS::AtLeastOnce)?;
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.try_unsubscribe(topic)?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.try_disconnect()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// A request the manager issued, in call order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Request {
        Publish { topic: String, payload: Vec<u8> },
        Subscribe(String),
        Unsubscribe(String),
        Disconnect,
    }

    #[derive(Debug, Default)]
    struct MockInner {
        requests: Vec<Request>,
        fail_next_publish: Option<String>,
        in_flight: usize,
        max_in_flight: usize,
    }

    /// Records every request instead of talking to a broker.
    #[derive(Debug, Default, Clone)]
    pub struct MockBrokerClient {
        inner: Arc<Mutex<MockInner>>,
    }

    impl MockBrokerClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn requests(&self) -> Vec<Request> {
            self.inner.lock().unwrap().requests.clone()
        }

        pub fn published(&self) -> Vec<(String, serde_json::Value)> {
            self.requests()
                .into_iter()
                .filter_map(|r| match r {
                    Request::Publish { topic, payload } => {
                        Some((topic, serde_json::from_slice(&payload).unwrap()))
                    }
                    _ => None,
                })
                .collect()
        }

        pub fn published_events(&self) -> Vec<String> {
            self.published()
                .into_iter()
                .map(|(_, payload)| payload["event"].as_str().unwrap().to_string())
                .collect()
        }

        /// Highest number of publish calls that were running at the same time.
        pub fn max_concurrent_publishes(&self) -> usize {
            self.inner.lock().unwrap().max_in_flight
        }

        pub fn fail_next_publish(&self, error: &str) {
            self.inner.lock().unwrap().fail_next_publish = Some(error.to_string());
        }

        fn push(&self, request: Request) {
            self.inner.lock().unwrap().requests.push(request);
        }
    }

    #[async_trait]
    impl BrokerClient for MockBrokerClient {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
            {
                let mut inner = self.inner.lock().unwrap();
                inner.in_flight += 1;
                inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
            }
            // gives a concurrent caller the chance to interleave
            tokio::task::yield_now().await;

            let mut inner = self.inner.lock().unwrap();
            inner.in_flight -= 1;
            if let Some(error) = inner.fail_next_publish.take() {
                return Err(TransportError::Request(error));
            }
            inner.requests.push(Request::Publish {
                topic: topic.to_string(),
                payload,
            });
            Ok(())
        }

        async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
            self.push(Request::Subscribe(topic.to_string()));
            Ok(())
        }

        async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
            self.push(Request::Unsubscribe(topic.to_string()));
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.push(Request::Disconnect);
            Ok(())
        }
    }
}
