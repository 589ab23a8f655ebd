//! Publishing import events.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use bootres_events::{EventEnvelope, ImportEvent, Severity};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Receives events published during a run.
pub trait EventSink: Send + Sync {
    fn publish(&self, envelope: &EventEnvelope<ImportEvent>);
}

/// Logs events through `tracing` at their severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, envelope: &EventEnvelope<ImportEvent>) {
        let event = &envelope.payload;
        let snapshot = event.snapshot.as_deref().unwrap_or("-");
        match event.severity {
            Severity::Info => info!(
                run_id = %envelope.run_id,
                event_type = %envelope.event_type,
                snapshot,
                "{}", event.message
            ),
            Severity::Warning => warn!(
                run_id = %envelope.run_id,
                event_type = %envelope.event_type,
                snapshot,
                "{}", event.message
            ),
            Severity::Error => error!(
                run_id = %envelope.run_id,
                event_type = %envelope.event_type,
                snapshot,
                "{}", event.message
            ),
        }
    }
}

/// Forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EventEnvelope<ImportEvent>>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventEnvelope<ImportEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, envelope: &EventEnvelope<ImportEvent>) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(envelope.clone());
    }
}

/// Appends each envelope as one JSON line to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl EventSink for JsonLinesSink {
    fn publish(&self, envelope: &EventEnvelope<ImportEvent>) {
        let line = match envelope.to_json_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, event_type = %envelope.event_type, "Failed to encode import event");
                return;
            }
        };
        let Ok(mut file) = self.file.lock() else {
            return;
        };
        if let Err(e) = writeln!(file, "{}", line) {
            warn!(error = %e, "Failed to append import event");
        }
    }
}

/// Stamps events with the run id and fans them out to every sink.
#[derive(Clone)]
pub struct Notifier {
    run_id: Uuid,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Notifier {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            sinks,
        }
    }

    /// A notifier with no sinks.
    pub fn silent() -> Self {
        Self::new(Vec::new())
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn publish(&self, event: ImportEvent) {
        match EventEnvelope::for_run(self.run_id, event) {
            Ok(envelope) => {
                for sink in &self.sinks {
                    sink.publish(&envelope);
                }
            }
            Err(e) => warn!(error = %e, "Dropping malformed import event"),
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("run_id", &self.run_id)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootres_events::event_types;

    #[tokio::test]
    async fn test_channel_sink_receives_stamped_events() {
        let (sink, mut rx) = ChannelSink::new();
        let notifier = Notifier::new(vec![Arc::new(sink), Arc::new(TracingSink)]);

        notifier.publish(ImportEvent::warning(event_types::IMPORT_NO_SOURCES, "no sources"));

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.run_id, notifier.run_id());
        assert_eq!(envelope.event_type, event_types::IMPORT_NO_SOURCES);
        assert_eq!(envelope.payload.severity, Severity::Warning);
    }

    #[test]
    fn test_json_lines_sink_appends_one_line_per_event() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let notifier = Notifier::new(vec![Arc::new(JsonLinesSink::open(&path).unwrap())]);

        notifier.publish(ImportEvent::info(event_types::IMPORT_STARTED, "starting"));
        notifier.publish(
            ImportEvent::error(event_types::IMPORT_FAILED, "download failed")
                .with_error_kind("download"),
        );

        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<EventEnvelope<ImportEvent>> = written
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|e| e.run_id == notifier.run_id()));
        assert_eq!(lines[1].event_type, event_types::IMPORT_FAILED);
        assert_eq!(lines[1].payload.error_kind.as_deref(), Some("download"));

        // Reopening appends rather than truncating.
        let again = Notifier::new(vec![Arc::new(JsonLinesSink::open(&path).unwrap())]);
        again.publish(ImportEvent::info(event_types::IMPORT_FINISHED, "done"));
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_unknown_event_type_is_dropped() {
        let (sink, mut rx) = ChannelSink::new();
        let notifier = Notifier::new(vec![Arc::new(sink)]);

        notifier.publish(ImportEvent::info("no.such.event", "ignored"));

        assert!(rx.try_recv().is_err());
    }
}
