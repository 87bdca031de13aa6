//! Delivery of lifecycle events to subscribers.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::events::SessionEvent;

/// Failure reported by an [`EventPublisher`].
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The receiving side is gone.
    #[error("event channel closed")]
    Closed,

    /// The subscriber rejected the event.
    #[error("{0}")]
    Rejected(String),
}

/// Receives lifecycle events.
///
/// Called synchronously on the thread that produced the event, which is
/// often a grid callback thread.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &SessionEvent) -> Result<(), PublishError>;
}

impl<F> EventPublisher for F
where
    F: Fn(&SessionEvent) -> Result<(), PublishError> + Send + Sync,
{
    fn publish(&self, event: &SessionEvent) -> Result<(), PublishError> {
        self(event)
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: &SessionEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, event: &SessionEvent) -> Result<(), PublishError> {
        self.tx.send(event.clone()).map_err(|_| PublishError::Closed)
    }
}

/// Publishes events without ever failing.
///
/// Errors and panics raised by the publisher are logged and swallowed so
/// they never reach the grid callback thread.
#[derive(Clone)]
pub struct EventGateway {
    publisher: Arc<dyn EventPublisher>,
}

impl EventGateway {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    /// Publish an event, logging any failure.
    pub fn publish_event(&self, event: &SessionEvent) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.publisher.publish(event)));
        match outcome {
            Ok(Ok(())) => {
                debug!(
                    kind = %event.kind,
                    session_id = %event.session_id,
                    "Published session event"
                );
            }
            Ok(Err(e)) => {
                error!(error = %e, "Error occurred publishing event [{event}]");
            }
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "publisher panicked".to_string());
                error!(error = %reason, "Error occurred publishing event [{event}]");
            }
        }
    }

    /// The wrapped publisher.
    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.publisher
    }
}

impl Default for EventGateway {
    fn default() -> Self {
        Self::new(Arc::new(NoopPublisher))
    }
}

impl std::fmt::Debug for EventGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventGateway").finish_non_exhaustive()
    }
}
