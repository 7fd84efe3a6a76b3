use super::TelemetryEvent;
use parking_lot::Mutex;

/// Destination for pipeline telemetry.
///
/// `record` is called inline on the request path, so implementations must
/// return quickly. Buffering or dropping under backpressure is up to the sink.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Emits every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, event: TelemetryEvent) {
        let name = event.name();
        let fields = serde_json::to_string(&event).unwrap_or_default();
        if event.is_warning() {
            tracing::warn!(target: "wa_edge::telemetry", event = name, %fields);
        } else {
            tracing::info!(target: "wa_edge::telemetry", event = name, %fields);
        }
    }
}

/// Keeps events in memory. Useful for tests and for hosts that batch-export.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events with the given name.
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    /// Remove and return all recorded events.
    pub fn drain(&self) -> Vec<TelemetryEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl TelemetrySink for RecordingSink {
    fn record(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}
