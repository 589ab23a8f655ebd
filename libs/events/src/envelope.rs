//! Event envelope - the common wrapper for all import events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{validate_event_type, EventError, ImportEvent};

/// Current schema version for import events.
pub const EVENT_VERSION: i32 = 1;

/// The event envelope - common metadata for all events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<P> {
    /// Time-ordered event identifier.
    pub event_id: Uuid,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    /// The import run that produced this event.
    pub run_id: Uuid,

    /// The event type (e.g., "import.started", "targets.update_failed").
    pub event_type: String,

    /// Schema version for this event type.
    pub event_version: i32,

    /// Event-specific payload.
    pub payload: P,
}

impl<P> EventEnvelope<P> {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder<P> {
        EventEnvelopeBuilder::new()
    }
}

impl EventEnvelope<ImportEvent> {
    /// Wrap an import event for the given run.
    pub fn for_run(run_id: Uuid, event: ImportEvent) -> Result<Self, EventError> {
        Self::builder()
            .run_id(run_id)
            .event_type(event.event_type.clone())
            .payload(event)
            .build()
    }

    /// Serialize to a single JSON line.
    pub fn to_json_line(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug)]
pub struct EventEnvelopeBuilder<P> {
    run_id: Option<Uuid>,
    event_type: Option<String>,
    payload: Option<P>,
}

impl<P> EventEnvelopeBuilder<P> {
    pub fn new() -> Self {
        Self {
            run_id: None,
            event_type: None,
            payload: None,
        }
    }

    pub fn run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn payload(mut self, payload: P) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the event envelope.
    ///
    /// Stamps a fresh v7 `event_id` and the current time.
    pub fn build(self) -> Result<EventEnvelope<P>, EventError> {
        let event_type = self.event_type.ok_or(EventError::MissingField("event_type"))?;
        validate_event_type(&event_type)?;

        Ok(EventEnvelope {
            event_id: Uuid::now_v7(),
            occurred_at: Utc::now(),
            run_id: self.run_id.ok_or(EventError::MissingField("run_id"))?,
            event_type,
            event_version: EVENT_VERSION,
            payload: self.payload.ok_or(EventError::MissingField("payload"))?,
        })
    }
}

impl<P> Default for EventEnvelopeBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}
