//! The storage collaborator: a keyed region of the data grid.
//!
//! The repository only needs `get`, `put`, `remove` and entry-event
//! callbacks from the grid. Values in a region are opaque ([`EntryValue`]);
//! whether one is a [`Session`] is decided once, at the boundary, by
//! [`EntryValue::as_session`].

mod local;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::session::Session;

pub use local::LocalRegion;

/// Kind of mutation reported by an entry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// A new entry was put.
    Create,
    /// An existing entry was replaced.
    Update,
    /// An entry's value was invalidated.
    Invalidate,
    /// An entry was removed.
    Destroy,
    /// An entry was created by a local loader.
    LocalLoadCreate,
    /// An entry was updated by a local loader.
    LocalLoadUpdate,
    /// An entry was created by a loader on another member.
    NetLoadCreate,
    /// An entry was updated by a loader on another member.
    NetLoadUpdate,
    /// An entry was invalidated by its expiration policy.
    ExpireInvalidate,
    /// An entry was removed by its expiration policy.
    ExpireDestroy,
}

impl Operation {
    /// Whether this is any kind of create, including load replays.
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::LocalLoadCreate | Self::NetLoadCreate
        )
    }

    /// Whether this is any kind of update, including load replays.
    pub fn is_update(&self) -> bool {
        matches!(
            self,
            Self::Update | Self::LocalLoadUpdate | Self::NetLoadUpdate
        )
    }

    /// Whether the entry came from a loader rather than a put.
    pub fn is_load(&self) -> bool {
        matches!(
            self,
            Self::LocalLoadCreate | Self::LocalLoadUpdate | Self::NetLoadCreate | Self::NetLoadUpdate
        )
    }

    /// Whether the entry was affected by an expiration policy.
    pub fn is_expiration(&self) -> bool {
        matches!(self, Self::ExpireInvalidate | Self::ExpireDestroy)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Invalidate => "INVALIDATE",
            Self::Destroy => "DESTROY",
            Self::LocalLoadCreate => "LOCAL_LOAD_CREATE",
            Self::LocalLoadUpdate => "LOCAL_LOAD_UPDATE",
            Self::NetLoadCreate => "NET_LOAD_CREATE",
            Self::NetLoadUpdate => "NET_LOAD_UPDATE",
            Self::ExpireInvalidate => "EXPIRE_INVALIDATE",
            Self::ExpireDestroy => "EXPIRE_DESTROY",
        };
        f.write_str(name)
    }
}

/// How a region keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataPolicy {
    /// A proxy holding no local state. Every put is reported as a create,
    /// so repeated creates for one key must be told apart by the listener.
    Empty,
    /// Local state is held, and the region itself distinguishes creates
    /// from updates.
    #[default]
    Normal,
}

/// An opaque value stored in a region.
#[derive(Clone)]
pub struct EntryValue(Arc<dyn Any + Send + Sync>);

impl EntryValue {
    /// Wrap any value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Wrap a session.
    pub fn session(session: Session) -> Self {
        Self::new(session)
    }

    /// Wrap an already shared session.
    pub fn from_shared(session: Arc<Session>) -> Self {
        Self(session)
    }

    /// The session held by this value, if it is one.
    pub fn as_session(&self) -> Option<Arc<Session>> {
        Arc::clone(&self.0).downcast::<Session>().ok()
    }

    /// Whether the value is a session.
    pub fn is_session(&self) -> bool {
        self.0.is::<Session>()
    }

    /// Borrow the value as a concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for EntryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.downcast_ref::<Session>() {
            Some(session) => f
                .debug_tuple("EntryValue")
                .field(&format_args!("Session({})", session.id()))
                .finish(),
            None => f.write_str("EntryValue(<opaque>)"),
        }
    }
}

impl From<Session> for EntryValue {
    fn from(session: Session) -> Self {
        Self::session(session)
    }
}

/// A mutation callback delivered to [`EntryListener`]s.
#[derive(Debug, Clone)]
pub struct EntryEvent {
    pub operation: Operation,
    pub key: String,
    pub old_value: Option<EntryValue>,
    pub new_value: Option<EntryValue>,
}

impl EntryEvent {
    /// Build an event.
    pub fn new(
        operation: Operation,
        key: impl Into<String>,
        old_value: Option<EntryValue>,
        new_value: Option<EntryValue>,
    ) -> Self {
        Self {
            operation,
            key: key.into(),
            old_value,
            new_value,
        }
    }
}

/// Receives entry mutation callbacks from a region.
///
/// Callbacks may arrive concurrently from several threads, including for
/// the same key.
pub trait EntryListener: Send + Sync {
    fn after_create(&self, _event: &EntryEvent) {}

    fn after_update(&self, _event: &EntryEvent) {}

    fn after_invalidate(&self, _event: &EntryEvent) {}

    fn after_destroy(&self, _event: &EntryEvent) {}
}

/// A keyed region of the data grid.
pub trait Region: Send + Sync {
    /// Region name.
    fn name(&self) -> &str;

    /// Full path of the region, `/` followed by the name.
    fn full_path(&self) -> String {
        format!("/{}", self.name())
    }

    /// How the region keeps its data.
    fn data_policy(&self) -> DataPolicy;

    /// Value stored under a key.
    fn get(&self, key: &str) -> Result<Option<EntryValue>>;

    /// Store a value under a key, returning the previous one.
    fn put(&self, key: &str, value: EntryValue) -> Result<Option<EntryValue>>;

    /// Remove a key, returning its value.
    fn remove(&self, key: &str) -> Result<Option<EntryValue>>;

    /// Snapshot of all values.
    fn values(&self) -> Result<Vec<EntryValue>>;

    /// Register a callback receiver.
    fn add_listener(&self, listener: Arc<dyn EntryListener>);
}
