use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

use super::CounterValues;

/// Payload key carrying the event; no counter may use it.
pub const EVENT_KEY: &str = "event";

/// Semantic reason a snapshot is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncEvent {
    NewPhoto,
    Reset,
    MissPaper,
    PrintStarted,
}

impl SyncEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEvent::NewPhoto => "NewPhoto",
            SyncEvent::Reset => "Reset",
            SyncEvent::MissPaper => "MissPaper",
            SyncEvent::PrintStarted => "PrintStarted",
        }
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter values frozen at capture time together with the event that caused the capture.
///
/// On the wire this is one flat JSON object: every counter plus an `"event"` key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterSnapshot {
    #[serde(flatten)]
    values: CounterValues,
    event: SyncEvent,
    #[serde(skip)]
    captured_at: DateTime<Local>,
}

impl CounterSnapshot {
    pub fn capture(values: &CounterValues, event: SyncEvent) -> Self {
        Self {
            values: values.clone(),
            event,
            captured_at: Local::now(),
        }
    }

    pub fn values(&self) -> &CounterValues {
        &self.values
    }

    pub fn event(&self) -> SyncEvent {
        self.event
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{default_counters, PRINTED, TAKEN};
    use serde_json::{json, Value};

    #[test]
    fn payload_is_flat_object_with_event() {
        let mut values = default_counters();
        values.insert(TAKEN.to_string(), 3);

        let snapshot = CounterSnapshot::capture(&values, SyncEvent::NewPhoto);
        let payload: Value = serde_json::from_slice(&snapshot.to_payload().unwrap()).unwrap();

        assert_eq!(
            payload,
            json!({
                "taken": 3,
                "printed": 0,
                "forgotten": 0,
                "remaining_duplicates": 0,
                "event": "NewPhoto",
            })
        );
    }

    #[test]
    fn snapshot_ignores_later_mutation() {
        let mut values = default_counters();
        let snapshot = CounterSnapshot::capture(&values, SyncEvent::PrintStarted);

        values.insert(PRINTED.to_string(), 42);

        assert_eq!(snapshot.values()[PRINTED], 0);
        let payload: Value = serde_json::from_slice(&snapshot.to_payload().unwrap()).unwrap();
        assert_eq!(payload[PRINTED], 0);
    }

    #[test]
    fn event_names_match_wire_strings() {
        for event in [
            SyncEvent::NewPhoto,
            SyncEvent::Reset,
            SyncEvent::MissPaper,
            SyncEvent::PrintStarted,
        ] {
            assert_eq!(
                serde_json::to_value(event).unwrap(),
                Value::String(event.to_string())
            );
        }
    }
}
