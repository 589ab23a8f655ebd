//! Errors raised while building or decoding import events.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// Not one of the names in [`crate::event_types`].
    #[error("unknown import event type: {0}")]
    UnknownEventType(String),

    #[error("import event envelope is missing {0}")]
    MissingField(&'static str),

    #[error("import event encoding: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
