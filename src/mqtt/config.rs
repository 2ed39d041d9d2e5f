use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BROKER_HOST: &str = "localhost";
pub const DEFAULT_BROKER_PORT: u16 = 1883;
pub const DEFAULT_CLIENT_ID: &str = "PiBooth";
pub const DEFAULT_TOPIC: &str = "PiBooth";

/// Broker connection settings, read once when the counters are started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    /// `[username, password]`; only used when both are non-empty.
    pub credentials: (String, String),
    pub client_id: String,
    /// Base topic, counters go to `<topic>/counters` and resets come from `<topic>/reset`.
    pub topic: String,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    /// Upper bound spent waiting for each unacknowledged publish at shutdown.
    pub drain_timeout_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: DEFAULT_BROKER_HOST.to_string(),
            broker_port: DEFAULT_BROKER_PORT,
            credentials: (String::new(), String::new()),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            keep_alive_secs: 60,
            connect_timeout_secs: 5,
            drain_timeout_secs: 3,
        }
    }
}

impl MqttConfig {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let (user, password) = &self.credentials;
        if user.is_empty() || password.is_empty() {
            None
        } else {
            Some((user.as_str(), password.as_str()))
        }
    }

    pub fn topics(&self) -> Topics {
        Topics::new(&self.topic)
    }

    /// rumqttc rejects keep-alive intervals below 5 s.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(5))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Topics derived from the configured base topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub counters: String,
    pub reset: String,
}

impl Topics {
    pub fn new(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            counters: format!("{}/counters", base),
            reset: format!("{}/reset", base),
        }
    }
}
