use thiserror::Error;

use crate::mqtt::{InboundMessage, Topics};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResetRejected {
    #[error("message on '{actual}' does not belong to reset topic '{expected}'")]
    ForeignTopic { expected: String, actual: String },

    #[error("payload {0:?} is not a reset request")]
    Payload(String),
}

/// Validates remote reset requests arriving on `<topic>/reset`.
///
/// A request is accepted only when the topic matches exactly and the payload reads
/// `true` in any letter case.
#[derive(Debug, Clone)]
pub struct ResetListener {
    topic: String,
}

impl ResetListener {
    pub fn new(topics: &Topics) -> Self {
        Self {
            topic: topics.reset.clone(),
        }
    }

    pub fn validate(&self, message: &InboundMessage) -> Result<(), ResetRejected> {
        if message.topic != self.topic {
            return Err(ResetRejected::ForeignTopic {
                expected: self.topic.clone(),
                actual: message.topic.clone(),
            });
        }

        match std::str::from_utf8(&message.payload) {
            Ok(text) if text.eq_ignore_ascii_case("true") => Ok(()),
            _ => Err(ResetRejected::Payload(
                String::from_utf8_lossy(&message.payload).into_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener() -> ResetListener {
        ResetListener::new(&Topics::new("X"))
    }

    #[test]
    fn accepts_true_in_any_case() {
        for payload in ["true", "True", "TRUE", "tRuE"] {
            let message = InboundMessage::from_topic("X/reset", payload);
            assert_eq!(listener().validate(&message), Ok(()), "payload {payload}");
        }
    }

    #[test]
    fn rejects_anything_else() {
        for payload in ["false", "", "yes", "1", " true", "true\n", "{\"reset\":true}"] {
            let message = InboundMessage::from_topic("X/reset", payload);
            assert!(
                matches!(listener().validate(&message), Err(ResetRejected::Payload(_))),
                "payload {payload:?}"
            );
        }
    }

    #[test]
    fn rejects_invalid_utf8() {
        let message = InboundMessage::from_topic("X/reset", vec![0x74, 0xff, 0x75]);
        assert!(matches!(
            listener().validate(&message),
            Err(ResetRejected::Payload(_))
        ));
    }

    #[test]
    fn rejects_foreign_topic() {
        let message = InboundMessage::from_topic("X/other", "true");
        assert_eq!(
            listener().validate(&message),
            Err(ResetRejected::ForeignTopic {
                expected: "X/reset".into(),
                actual: "X/other".into(),
            })
        );
    }
}
