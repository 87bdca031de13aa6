//! The session value object stored as a single grid entry.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering as AtomicOrdering};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::attributes::SessionAttributes;
use crate::codec::{DataInputExt, DataOutputExt, Delta, ValueCodec};
use crate::error::{Error, Result};

/// Attribute key holding the name of the authenticated principal.
pub const PRINCIPAL_NAME_ATTRIBUTE: &str = "session.principal_name";

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Read-side view of any session with an expiration policy.
///
/// [`Session`] implements this; other session types implement it so they
/// can be copied into a [`Session`] with [`Session::from_existing`].
pub trait ExpiringSession: Send + Sync {
    /// Unique identifier.
    fn id(&self) -> &str;

    /// Creation time in epoch milliseconds.
    fn creation_time(&self) -> i64;

    /// Last access time in epoch milliseconds.
    fn last_accessed_time(&self) -> i64;

    /// Max inactive interval in seconds. Negative means never expires.
    fn max_inactive_interval(&self) -> i32;

    /// Value of an attribute.
    fn attribute(&self, name: &str) -> Option<Value>;

    /// Names of all attributes.
    fn attribute_names(&self) -> BTreeSet<String>;

    /// Whether the session is expired at the given epoch milliseconds.
    fn is_expired_at(&self, now_millis: i64) -> bool {
        let interval = self.max_inactive_interval();
        interval >= 0
            && now_millis.saturating_sub(self.last_accessed_time()) >= i64::from(interval) * 1000
    }
}

/// A session stored as one grid entry.
///
/// Identity is the id alone: two sessions with the same id are equal and
/// hash the same regardless of timestamps or attributes. Scalar fields are
/// atomics and attributes sit behind a lock, so a session may be shared
/// between request threads; concurrent writers to the same field resolve
/// as last-write-wins.
///
/// Changes to the last-accessed time, the max inactive interval, or any
/// attribute are tracked for [`Delta`] serialization.
#[derive(Debug)]
pub struct Session {
    id: String,
    creation_time: i64,
    last_accessed_time: AtomicI64,
    max_inactive_interval: AtomicI32,
    delta: AtomicBool,
    attributes: SessionAttributes,
}

impl Session {
    /// Create a session with a generated id, created now, interval 0.
    pub fn new() -> Self {
        Self::restore(uuid::Uuid::new_v4().to_string(), now_millis(), None, 0)
    }

    /// Create a session with an explicit id.
    ///
    /// Fails with `InvalidArgument` if the id is blank.
    pub fn with_id(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::invalid_argument("ID must be specified"));
        }
        Ok(Self::restore(id, now_millis(), None, 0))
    }

    /// Create a fresh session expiring after `max_inactive_interval_secs`.
    pub fn create(max_inactive_interval_secs: i32) -> Self {
        let session = Self::new();
        session
            .max_inactive_interval
            .store(max_inactive_interval_secs, AtomicOrdering::SeqCst);
        session
    }

    /// Convert any session into a `Session`.
    ///
    /// A `Session` keeps its full state, pending changes included. Anything
    /// else is copied: id, timestamps, interval and attributes are
    /// preserved, and the copy starts with no pending delta.
    pub fn from_existing<S: ExpiringSession + 'static>(source: S) -> Session {
        match (&source as &dyn Any).downcast_ref::<Session>() {
            Some(session) => session.clone(),
            None => Self::copy(&source),
        }
    }

    /// Copy a session.
    ///
    /// Fails with `InvalidArgument` when there is nothing to copy.
    pub fn copy_of(source: Option<&dyn ExpiringSession>) -> Result<Session> {
        source
            .map(Self::copy)
            .ok_or_else(|| Error::invalid_argument("The session to copy cannot be null"))
    }

    fn copy(source: &dyn ExpiringSession) -> Session {
        let session = Self::restore(
            source.id().to_string(),
            source.creation_time(),
            Some(source.last_accessed_time()),
            source.max_inactive_interval(),
        );
        session.attributes.copy_from(source);
        session.clear_delta();
        session
    }

    fn restore(
        id: String,
        creation_time: i64,
        last_accessed_time: Option<i64>,
        max_inactive_interval: i32,
    ) -> Self {
        Self {
            id,
            creation_time,
            last_accessed_time: AtomicI64::new(last_accessed_time.unwrap_or(creation_time)),
            max_inactive_interval: AtomicI32::new(max_inactive_interval),
            delta: AtomicBool::new(false),
            attributes: SessionAttributes::new(),
        }
    }

    /// Unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Creation time in epoch milliseconds.
    pub fn creation_time(&self) -> i64 {
        self.creation_time
    }

    /// Last access time in epoch milliseconds.
    pub fn last_accessed_time(&self) -> i64 {
        self.last_accessed_time.load(AtomicOrdering::SeqCst)
    }

    /// Set the last access time.
    pub fn set_last_accessed_time(&self, millis: i64) {
        self.last_accessed_time.store(millis, AtomicOrdering::SeqCst);
        self.delta.store(true, AtomicOrdering::SeqCst);
    }

    /// Mark the session as accessed now.
    pub fn touch(&self) {
        self.set_last_accessed_time(now_millis());
    }

    /// Max inactive interval in seconds.
    pub fn max_inactive_interval(&self) -> i32 {
        self.max_inactive_interval.load(AtomicOrdering::SeqCst)
    }

    /// Set the max inactive interval in seconds. Negative disables expiration.
    pub fn set_max_inactive_interval(&self, secs: i32) {
        self.max_inactive_interval.store(secs, AtomicOrdering::SeqCst);
        self.delta.store(true, AtomicOrdering::SeqCst);
    }

    /// Whether the session is expired now.
    pub fn is_expired(&self) -> bool {
        ExpiringSession::is_expired_at(self, now_millis())
    }

    /// Whether the session is expired at the given epoch milliseconds.
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        ExpiringSession::is_expired_at(self, now_millis)
    }

    /// The attribute store.
    pub fn attributes(&self) -> &SessionAttributes {
        &self.attributes
    }

    /// Value of an attribute.
    pub fn get_attribute(&self, name: &str) -> Option<Value> {
        self.attributes.get_attribute(name)
    }

    /// Value of an attribute deserialized into `T`.
    pub fn attribute_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.attributes.attribute_as(name)
    }

    /// Set an attribute. A null value removes it.
    pub fn set_attribute(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.set_attribute(name, value);
    }

    /// Remove an attribute.
    pub fn remove_attribute(&self, name: &str) {
        self.attributes.remove_attribute(name);
    }

    /// Names of all attributes.
    pub fn attribute_names(&self) -> BTreeSet<String> {
        self.attributes.attribute_names()
    }

    /// Name of the authenticated principal, if any.
    pub fn principal_name(&self) -> Option<String> {
        self.attributes.attribute_as(PRINCIPAL_NAME_ATTRIBUTE)
    }

    /// Set or clear the principal name.
    pub fn set_principal_name(&self, name: Option<&str>) {
        match name {
            Some(name) => self.set_attribute(PRINCIPAL_NAME_ATTRIBUTE, name),
            None => self.remove_attribute(PRINCIPAL_NAME_ATTRIBUTE),
        }
    }

    /// Order by creation time only.
    ///
    /// Sessions created in the same millisecond compare `Equal` even when
    /// their ids differ, which is why this is not an [`Ord`] impl.
    pub fn compare_creation(&self, other: &Session) -> Ordering {
        self.creation_time.cmp(&other.creation_time)
    }

    /// Write the full session: id, creation time, last access time,
    /// interval, then all attributes.
    pub fn to_data(&self, out: &mut dyn Write, codec: &dyn ValueCodec) -> Result<()> {
        out.write_utf(&self.id)?;
        out.write_i64(self.creation_time)?;
        out.write_i64(self.last_accessed_time())?;
        out.write_i32(self.max_inactive_interval())?;
        self.attributes.to_data(out, codec)
    }

    /// Read a session written by [`Session::to_data`].
    pub fn from_data(input: &mut dyn Read, codec: &dyn ValueCodec) -> Result<Session> {
        let id = input.read_utf()?;
        let creation_time = input.read_i64()?;
        let last_accessed_time = input.read_i64()?;
        let max_inactive_interval = input.read_i32()?;

        let session = Self::restore(
            id,
            creation_time,
            Some(last_accessed_time),
            max_inactive_interval,
        );
        session.attributes.from_data(input, codec)?;
        Ok(session)
    }

    fn clear_delta(&self) {
        self.delta.store(false, AtomicOrdering::SeqCst);
        self.attributes.clear_deltas();
    }

    fn write_delta(
        &self,
        out: &mut dyn Write,
        codec: &dyn ValueCodec,
    ) -> Result<BTreeSet<String>> {
        out.write_i64(self.last_accessed_time())?;
        out.write_i32(self.max_inactive_interval())?;
        self.attributes.flush_delta(out, codec)
    }

    /// Write the delta and clear change tracking, keeping what was cleared.
    pub(crate) fn flush_delta(
        &self,
        out: &mut dyn Write,
        codec: &dyn ValueCodec,
    ) -> Result<FlushedDelta> {
        let scalars = self.delta.swap(false, AtomicOrdering::SeqCst);
        match self.write_delta(out, codec) {
            Ok(names) => Ok(FlushedDelta { scalars, names }),
            Err(e) => {
                if scalars {
                    self.delta.store(true, AtomicOrdering::SeqCst);
                }
                Err(e)
            }
        }
    }

    /// Track a flushed delta as pending again.
    pub(crate) fn restore_delta(&self, flushed: FlushedDelta) {
        if flushed.scalars {
            self.delta.store(true, AtomicOrdering::SeqCst);
        }
        self.attributes.mark_changed(flushed.names);
    }
}

/// Change tracking cleared by [`Session::flush_delta`].
#[derive(Debug)]
pub(crate) struct FlushedDelta {
    scalars: bool,
    names: BTreeSet<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Delta for Session {
    fn has_delta(&self) -> bool {
        self.delta.load(AtomicOrdering::SeqCst) || self.attributes.has_delta()
    }

    fn to_delta(&self, out: &mut dyn Write, codec: &dyn ValueCodec) -> Result<()> {
        self.flush_delta(out, codec).map(|_| ())
    }

    fn from_delta(&self, input: &mut dyn Read, codec: &dyn ValueCodec) -> Result<()> {
        let last_accessed_time = input.read_i64()?;
        let max_inactive_interval = input.read_i32()?;
        self.attributes.from_delta(input, codec)?;

        self.last_accessed_time
            .store(last_accessed_time, AtomicOrdering::SeqCst);
        self.max_inactive_interval
            .store(max_inactive_interval, AtomicOrdering::SeqCst);
        self.delta.store(false, AtomicOrdering::SeqCst);
        Ok(())
    }
}

impl ExpiringSession for Session {
    fn id(&self) -> &str {
        Session::id(self)
    }

    fn creation_time(&self) -> i64 {
        Session::creation_time(self)
    }

    fn last_accessed_time(&self) -> i64 {
        Session::last_accessed_time(self)
    }

    fn max_inactive_interval(&self) -> i32 {
        Session::max_inactive_interval(self)
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        self.get_attribute(name)
    }

    fn attribute_names(&self) -> BTreeSet<String> {
        Session::attribute_names(self)
    }
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            creation_time: self.creation_time,
            last_accessed_time: AtomicI64::new(self.last_accessed_time()),
            max_inactive_interval: AtomicI32::new(self.max_inactive_interval()),
            delta: AtomicBool::new(self.delta.load(AtomicOrdering::SeqCst)),
            attributes: self.attributes.clone(),
        }
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Session {}

impl Hash for Session {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
