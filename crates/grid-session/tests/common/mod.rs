//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

use grid_session::{EventPublisher, PublishError, SessionEvent, SessionEventKind};

/// Maximum number of log records kept.
const MAX_RECORDS: usize = 1000;

/// A captured log record.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub target: String,
    pub message: String,
    /// Non-message fields as `name=value`.
    pub fields: Vec<String>,
}

/// Shared buffer of captured log records.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    records: Arc<Mutex<VecDeque<LogRecord>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Records at exactly `level`.
    pub fn at(&self, level: Level) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.level == level)
            .cloned()
            .collect()
    }

    fn push(&self, record: LogRecord) {
        let mut records = self.records.lock();
        if records.len() >= MAX_RECORDS {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Run `f` with every event on this thread captured into the buffer.
    pub fn capture<T>(&self, f: impl FnOnce() -> T) -> T {
        let subscriber = tracing_subscriber::registry().with(CaptureLayer {
            capture: self.clone(),
        });
        tracing::subscriber::with_default(subscriber, f)
    }
}

struct CaptureLayer {
    capture: LogCapture,
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        self.capture.push(LogRecord {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Publisher that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<SessionEventKind> {
        self.events.lock().iter().map(|event| event.kind).collect()
    }

    pub fn of_kind(&self, kind: SessionEventKind) -> Vec<SessionEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: &SessionEvent) -> Result<(), PublishError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Publisher that always fails.
#[derive(Debug, Default)]
pub struct FailingPublisher;

impl EventPublisher for FailingPublisher {
    fn publish(&self, _event: &SessionEvent) -> Result<(), PublishError> {
        Err(PublishError::Rejected("subscriber unavailable".to_string()))
    }
}
