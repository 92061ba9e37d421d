//! Lifecycle event log
//!
//! Every state change of a module is recorded as a [`RuntimeEvent`] and
//! handed to an [`EventSink`]. Applications pick the destination; sink
//! failures are logged and never change the outcome of a lifecycle call.

use chrono::{SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// A lifecycle event
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeEvent {
    /// RFC 3339 timestamp, UTC
    pub timestamp: String,
    pub kind: RuntimeEventKind,
    /// Module the event is about
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl RuntimeEvent {
    pub fn new(kind: RuntimeEventKind, module: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            kind,
            module: module.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Type of lifecycle event
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeEventKind {
    /// Descriptor accepted by discovery
    ModuleDiscovered,
    /// Descriptor rejected by discovery
    ModuleRejected,
    LibraryLoaded,
    LibraryUnloaded,
    ModuleLoading,
    ModuleStarted,
    ModuleFailed,
    ModuleStopping,
    ModuleStopped,
    /// `stop()` returned an error or panicked
    StopHookFailed,
    /// Extension point or extension not registered
    ExtensionRejected,
}

/// Error type for event sinks
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Failed to write event log: {0}")]
    Write(#[from] std::io::Error),

    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event sink not available: {0}")]
    Unavailable(String),
}

/// Destination of lifecycle events
pub trait EventSink: Send + Sync {
    fn record(&self, event: RuntimeEvent) -> Result<(), EventError>;

    /// Flush buffered events
    fn flush(&self) -> Result<(), EventError>;
}

/// JSON lines file sink
pub struct FileEventSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileEventSink {
    /// Open `path` for appending, creating parent directories as needed
    pub fn new(path: impl AsRef<Path>) -> Result<Self, EventError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for FileEventSink {
    fn record(&self, event: RuntimeEvent) -> Result<(), EventError> {
        let json = serde_json::to_string(&event)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), EventError> {
        self.writer.lock().flush()?;
        Ok(())
    }
}

impl fmt::Debug for FileEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEventSink")
            .field("path", &self.path)
            .finish()
    }
}

/// Bounded in-memory sink; the oldest event is evicted first
pub struct MemoryEventSink {
    events: RwLock<VecDeque<RuntimeEvent>>,
    max_events: usize,
}

impl MemoryEventSink {
    /// Sink holding up to 1000 events
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::with_capacity(max_events.min(1000))),
            max_events,
        }
    }

    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events.read().iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.events.read().len()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    pub fn find_by_kind(&self, kind: RuntimeEventKind) -> Vec<RuntimeEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn find_by_module(&self, module: &str) -> Vec<RuntimeEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.module == module)
            .cloned()
            .collect()
    }

    /// Kinds recorded for one module, oldest first
    pub fn kinds_for(&self, module: &str) -> Vec<RuntimeEventKind> {
        self.events
            .read()
            .iter()
            .filter(|e| e.module == module)
            .map(|e| e.kind)
            .collect()
    }
}

impl Default for MemoryEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemoryEventSink {
    fn record(&self, event: RuntimeEvent) -> Result<(), EventError> {
        if self.max_events == 0 {
            return Ok(());
        }
        let mut events = self.events.write();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }

    fn flush(&self) -> Result<(), EventError> {
        Ok(())
    }
}

impl fmt::Debug for MemoryEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEventSink")
            .field("count", &self.count())
            .field("max_events", &self.max_events)
            .finish()
    }
}

/// Discards every event
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn record(&self, _event: RuntimeEvent) -> Result<(), EventError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), EventError> {
        Ok(())
    }
}

/// Fans events out to several sinks
///
/// Every sink receives every event even when an earlier one fails; the
/// first error is returned.
#[derive(Default)]
pub struct CompositeEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for CompositeEventSink {
    fn record(&self, event: RuntimeEvent) -> Result<(), EventError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record(event.clone()) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn flush(&self) -> Result<(), EventError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.flush() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for CompositeEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeEventSink")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

/// Record an event, logging sink failures
pub(crate) fn emit(sink: &dyn EventSink, event: RuntimeEvent) {
    let kind = event.kind;
    if let Err(e) = sink.record(event) {
        tracing::warn!(?kind, error = %e, "Failed to record runtime event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl EventSink for FailingSink {
        fn record(&self, _event: RuntimeEvent) -> Result<(), EventError> {
            Err(EventError::Unavailable("offline".into()))
        }

        fn flush(&self) -> Result<(), EventError> {
            Ok(())
        }
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemoryEventSink::new();
        sink.record(RuntimeEvent::new(RuntimeEventKind::ModuleLoading, "core"))
            .unwrap();
        sink.record(RuntimeEvent::new(RuntimeEventKind::ModuleStarted, "core"))
            .unwrap();
        sink.record(RuntimeEvent::new(RuntimeEventKind::ModuleStarted, "io"))
            .unwrap();

        assert_eq!(sink.count(), 3);
        assert_eq!(sink.find_by_kind(RuntimeEventKind::ModuleStarted).len(), 2);
        assert_eq!(
            sink.kinds_for("core"),
            vec![RuntimeEventKind::ModuleLoading, RuntimeEventKind::ModuleStarted]
        );
        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_memory_sink_eviction() {
        let sink = MemoryEventSink::with_capacity(2);
        for i in 0..3 {
            sink.record(RuntimeEvent::new(
                RuntimeEventKind::ModuleDiscovered,
                format!("module-{}", i),
            ))
            .unwrap();
        }

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].module, "module-1");
        assert_eq!(events[1].module, "module-2");
    }

    #[test]
    fn test_composite_sink_reaches_all() {
        let first = Arc::new(MemoryEventSink::new());
        let second = Arc::new(MemoryEventSink::new());
        let composite = CompositeEventSink::new()
            .with_sink(first.clone())
            .with_sink(Arc::new(FailingSink))
            .with_sink(second.clone());

        let result = composite.record(RuntimeEvent::new(RuntimeEventKind::ModuleStopped, "io"));
        assert!(matches!(result, Err(EventError::Unavailable(_))));
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);
    }

    #[test]
    fn test_emit_swallows_failures() {
        emit(
            &FailingSink,
            RuntimeEvent::new(RuntimeEventKind::ModuleFailed, "x"),
        );
        emit(
            &NullEventSink,
            RuntimeEvent::new(RuntimeEventKind::ModuleFailed, "x"),
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = RuntimeEvent::new(RuntimeEventKind::StopHookFailed, "io.vtk")
            .with_details("device busy");
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains("\"kind\":\"stop_hook_failed\""));
        assert!(json.contains("io.vtk"));
        assert!(json.contains("device busy"));
        assert!(event.timestamp.ends_with('Z'));
    }

    #[test]
    fn test_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("events.jsonl");

        let sink = FileEventSink::new(&path).unwrap();
        sink.record(RuntimeEvent::new(RuntimeEventKind::ModuleStarted, "core"))
            .unwrap();
        sink.record(RuntimeEvent::new(RuntimeEventKind::ModuleStopped, "core"))
            .unwrap();
        sink.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("module_started"));
        assert_eq!(sink.path(), path);
    }
}
