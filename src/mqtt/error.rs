use thiserror::Error;

/// Failure reported by the broker client seam.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request rejected by client: {0}")]
    Request(String),
}

impl From<rumqttc::ClientError> for TransportError {
    fn from(e: rumqttc::ClientError) -> Self {
        TransportError::Request(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("broker {host}:{port} refused the connection: {reason}")]
    Refused {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("broker {host}:{port} is unreachable: {reason}")]
    Unreachable {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("no connect acknowledgment from {host}:{port} within {secs}s")]
    Timeout { host: String, port: u16, secs: u64 },

    #[error("event loop stopped before the connection was established")]
    LoopStopped,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode counters: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to hand publish to the client: {0}")]
    Transport(#[from] TransportError),
}
