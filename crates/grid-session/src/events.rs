//! Session lifecycle events.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::session::Session;

/// Kind of session lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    /// A new session was stored.
    Created,
    /// A session was deleted by the application.
    Deleted,
    /// A session's entry was invalidated, usually by grid expiration.
    Expired,
    /// A session's entry was destroyed in the grid.
    Destroyed,
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEventKind::Created => write!(f, "SessionCreated"),
            SessionEventKind::Deleted => write!(f, "SessionDeleted"),
            SessionEventKind::Expired => write!(f, "SessionExpired"),
            SessionEventKind::Destroyed => write!(f, "SessionDestroyed"),
        }
    }
}

/// The repository an event came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventSource {
    /// Unique id of the repository instance.
    pub repository_id: Uuid,
    /// Full path of the region the repository stores into.
    pub region: String,
}

impl EventSource {
    /// A source with a fresh repository id.
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            repository_id: Uuid::new_v4(),
            region: region.into(),
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.region, self.repository_id)
    }
}

/// A session lifecycle event.
///
/// The session id is always present. The session itself is present only
/// when the grid supplied a full session value.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub source: EventSource,
    pub session_id: String,
    pub session: Option<Arc<Session>>,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    /// Build an event of the given kind, timestamped now.
    pub fn new(
        kind: SessionEventKind,
        source: EventSource,
        session_id: impl Into<String>,
        session: Option<Arc<Session>>,
    ) -> Self {
        Self {
            kind,
            source,
            session_id: session_id.into(),
            session,
            timestamp: Utc::now(),
        }
    }

    pub fn created(
        source: EventSource,
        session_id: impl Into<String>,
        session: Option<Arc<Session>>,
    ) -> Self {
        Self::new(SessionEventKind::Created, source, session_id, session)
    }

    pub fn deleted(
        source: EventSource,
        session_id: impl Into<String>,
        session: Option<Arc<Session>>,
    ) -> Self {
        Self::new(SessionEventKind::Deleted, source, session_id, session)
    }

    pub fn expired(
        source: EventSource,
        session_id: impl Into<String>,
        session: Option<Arc<Session>>,
    ) -> Self {
        Self::new(SessionEventKind::Expired, source, session_id, session)
    }

    pub fn destroyed(
        source: EventSource,
        session_id: impl Into<String>,
        session: Option<Arc<Session>>,
    ) -> Self {
        Self::new(SessionEventKind::Destroyed, source, session_id, session)
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[session_id={}, source={}]",
            self.kind, self.session_id, self.source
        )
    }
}
