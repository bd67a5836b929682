// crates/acceptance-harness/src/events.rs
// ============================================================================
// Module: Harness Events
// Description: Structured JSON-lines events for harness activity.
// Purpose: Record spawns, exits, identity switches, and teardown outcomes.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Harness activity is recorded as serializable [`HarnessEvent`] payloads
//! routed through a [`HarnessEventSink`]. Sinks are intentionally small so a
//! run can log to stderr, to an artifact file, or to memory for assertions.
//! Secrets never reach an event: command lines are rendered with secret
//! arguments redacted before they are attached.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome classification for a harness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// The operation succeeded.
    Ok,
    /// The operation failed.
    Error,
    /// Informational record with no outcome.
    Info,
}

impl EventOutcome {
    /// Returns a stable label for the outcome.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Info => "info",
        }
    }
}

/// Harness event payload.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessEvent {
    /// Event identifier (for example `process.spawn`).
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u64,
    /// Worker index that produced the event.
    pub worker: u32,
    /// Principal label active when the event was produced.
    pub principal: Option<String>,
    /// Redacted command line when the event concerns a process.
    pub command: Option<String>,
    /// Event outcome.
    pub outcome: EventOutcome,
    /// Free-form detail.
    pub detail: Option<String>,
}

impl HarnessEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(event: &'static str, outcome: EventOutcome) -> Self {
        Self {
            event,
            timestamp_ms: now_millis(),
            worker: 0,
            principal: None,
            command: None,
            outcome,
            detail: None,
        }
    }

    /// Attaches a principal label.
    #[must_use]
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Attaches a redacted command line.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Attaches detail text.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Sink for harness events.
pub trait HarnessEventSink: Send + Sync {
    /// Records a single event.
    fn record(&self, event: &HarnessEvent);
}

/// Event sink that logs JSON lines to stderr.
pub struct StderrEventSink;

impl HarnessEventSink for StderrEventSink {
    fn record(&self, event: &HarnessEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Event sink that appends JSON lines to a file.
pub struct FileEventSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileEventSink {
    /// Opens the event log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl HarnessEventSink for FileEventSink {
    fn record(&self, event: &HarnessEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op event sink.
pub struct NoopEventSink;

impl HarnessEventSink for NoopEventSink {
    fn record(&self, _event: &HarnessEvent) {}
}

/// In-memory event sink, useful for asserting on harness behavior.
#[derive(Default)]
pub struct MemoryEventSink {
    /// Recorded events in arrival order.
    events: Mutex<Vec<HarnessEvent>>,
}

impl MemoryEventSink {
    /// Returns a snapshot of recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HarnessEvent> {
        self.events.lock().map_or_else(|_| Vec::new(), |events| events.clone())
    }
}

impl HarnessEventSink for MemoryEventSink {
    fn record(&self, event: &HarnessEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Fans events out to several sinks.
pub struct TeeEventSink {
    /// Downstream sinks.
    sinks: Vec<Arc<dyn HarnessEventSink>>,
}

impl TeeEventSink {
    /// Builds a tee over the given sinks.
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn HarnessEventSink>>) -> Self {
        Self {
            sinks,
        }
    }
}

impl HarnessEventSink for TeeEventSink {
    fn record(&self, event: &HarnessEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}

// ============================================================================
// SECTION: Recorder
// ============================================================================

/// Worker-scoped handle that stamps events before forwarding them to a sink.
#[derive(Clone)]
pub struct EventRecorder {
    /// Destination sink.
    sink: Arc<dyn HarnessEventSink>,
    /// Worker index stamped on every event.
    worker: u32,
}

impl EventRecorder {
    /// Creates a recorder for the given worker.
    #[must_use]
    pub fn new(sink: Arc<dyn HarnessEventSink>, worker: u32) -> Self {
        Self {
            sink,
            worker,
        }
    }

    /// Creates a recorder that discards every event.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopEventSink), 0)
    }

    /// Returns the worker index.
    #[must_use]
    pub const fn worker(&self) -> u32 {
        self.worker
    }

    /// Stamps and records an event.
    pub fn record(&self, mut event: HarnessEvent) {
        event.worker = self.worker;
        self.sink.record(&event);
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    duration_millis(SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default())
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
///
/// Serialized millisecond fields are `u64` so canonical JSON encoders accept
/// them.
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
