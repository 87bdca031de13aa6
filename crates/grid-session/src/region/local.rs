//! In-process region implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::{DataPolicy, EntryEvent, EntryListener, EntryValue, Operation, Region};
use crate::codec::{Delta, JsonValueCodec, ValueCodec};
use crate::config::RepositoryConfig;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::ttl::IdleTracker;

#[derive(Debug, Default)]
struct RegionState {
    entries: HashMap<String, EntryValue>,
    idle: IdleTracker,
}

/// A region held in this process.
///
/// Sessions are never stored by reference: a put stores a copy made
/// through the session's serialization, as a grid member would. The first
/// put of a key and any put of a session without pending changes copy the
/// full session; a put of a session with pending changes ships only the
/// delta onto the stored copy. Other values are stored as given.
///
/// Listener callbacks run after the region's locks are released, so a
/// listener may call back into the region.
pub struct LocalRegion {
    name: String,
    data_policy: DataPolicy,
    codec: Arc<dyn ValueCodec>,
    state: Mutex<RegionState>,
    listeners: RwLock<Vec<Arc<dyn EntryListener>>>,
}

impl LocalRegion {
    /// Create an empty region with the `Normal` data policy and no idle
    /// timeout.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_policy: DataPolicy::Normal,
            codec: Arc::new(JsonValueCodec),
            state: Mutex::new(RegionState::default()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Create an empty region named after the configured region name.
    ///
    /// A non-negative max inactive interval becomes the idle timeout, so
    /// sessions left idle expire out of the region.
    pub fn from_config(config: &RepositoryConfig) -> Self {
        let region = Self::new(config.region_name.clone());
        match u64::try_from(config.max_inactive_interval_secs) {
            Ok(secs) => region.with_idle_timeout(Duration::from_secs(secs)),
            Err(_) => region,
        }
    }

    /// Set the data policy.
    pub fn with_data_policy(mut self, data_policy: DataPolicy) -> Self {
        self.data_policy = data_policy;
        self
    }

    /// Invalidate entries not read or written for longer than `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.state.get_mut().idle = IdleTracker::new(Some(timeout));
        self
    }

    /// Set the codec used to copy session attribute values.
    pub fn with_codec(mut self, codec: Arc<dyn ValueCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// The idle timeout, if any.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.state.lock().idle.timeout()
    }

    /// Number of entries, including idle ones not yet expired.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the region has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a key is present, without counting as a read.
    pub fn contains_key(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Invalidate a key: remove its value and report `Invalidate`.
    pub fn invalidate(&self, key: &str) -> Option<EntryValue> {
        let old = {
            let mut state = self.state.lock();
            state.idle.remove(key);
            state.entries.remove(key)
        };
        if old.is_some() {
            debug!(region = %self.full_path(), key, "Invalidated entry");
            self.dispatch(EntryEvent::new(Operation::Invalidate, key, old.clone(), None));
        }
        old
    }

    /// Expire every entry idle past the timeout. Returns how many expired.
    pub fn expire_idle_entries(&self) -> usize {
        let expired: Vec<(String, EntryValue)> = {
            let mut state = self.state.lock();
            let idle = state.idle.drain_idle();
            idle.into_iter()
                .filter_map(|key| state.entries.remove(&key).map(|value| (key, value)))
                .collect()
        };

        let count = expired.len();
        for (key, value) in expired {
            self.expired(&key, value);
        }
        count
    }

    fn expired(&self, key: &str, value: EntryValue) {
        debug!(region = %self.full_path(), key, "Entry expired after idle timeout");
        self.dispatch(EntryEvent::new(
            Operation::ExpireInvalidate,
            key,
            Some(value),
            None,
        ));
    }

    /// Make the copy of `value` to store, given the current entry.
    fn stored_copy(&self, value: &EntryValue, current: Option<&EntryValue>) -> Result<EntryValue> {
        let Some(incoming) = value.as_session() else {
            return Ok(value.clone());
        };
        let codec = self.codec.as_ref();

        if let Some(current) = current.and_then(EntryValue::as_session) {
            if incoming.has_delta() {
                let mut delta = Vec::new();
                let flushed = incoming.flush_delta(&mut delta, codec)?;
                let updated = Session::clone(&current);
                if let Err(e) = updated.from_delta(&mut delta.as_slice(), codec) {
                    incoming.restore_delta(flushed);
                    return Err(self.copy_failed(incoming.id(), e));
                }
                trace!(session_id = %incoming.id(), bytes = delta.len(), "Applied session delta");
                return Ok(EntryValue::session(updated));
            }
        }

        let mut data = Vec::new();
        incoming.to_data(&mut data, codec)?;
        let copy = Session::from_data(&mut data.as_slice(), codec)
            .map_err(|e| self.copy_failed(incoming.id(), e))?;
        Ok(EntryValue::session(copy))
    }

    fn copy_failed(&self, session_id: &str, source: Error) -> Error {
        warn!(region = %self.full_path(), session_id, error = %source, "Failed to store session copy");
        Error::Region(format!(
            "failed to store session {session_id} in {}: {source}",
            self.full_path()
        ))
    }

    fn dispatch(&self, event: EntryEvent) {
        let listeners: Vec<Arc<dyn EntryListener>> = self.listeners.read().clone();
        trace!(
            region = %self.name,
            operation = %event.operation,
            key = %event.key,
            listeners = listeners.len(),
            "Dispatching entry event"
        );
        for listener in listeners {
            match event.operation {
                Operation::Create
                | Operation::LocalLoadCreate
                | Operation::NetLoadCreate => listener.after_create(&event),
                Operation::Update
                | Operation::LocalLoadUpdate
                | Operation::NetLoadUpdate => listener.after_update(&event),
                Operation::Invalidate | Operation::ExpireInvalidate => {
                    listener.after_invalidate(&event)
                }
                Operation::Destroy | Operation::ExpireDestroy => listener.after_destroy(&event),
            }
        }
    }
}

impl std::fmt::Debug for LocalRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRegion")
            .field("name", &self.name)
            .field("data_policy", &self.data_policy)
            .field("entries", &self.len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl Region for LocalRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn data_policy(&self) -> DataPolicy {
        self.data_policy
    }

    fn get(&self, key: &str) -> Result<Option<EntryValue>> {
        let expired = {
            let mut state = self.state.lock();
            if state.idle.is_idle(key) {
                state.idle.remove(key);
                state.entries.remove(key)
            } else {
                if state.entries.contains_key(key) {
                    state.idle.touch(key);
                }
                return Ok(state.entries.get(key).cloned());
            }
        };

        if let Some(value) = expired {
            self.expired(key, value);
        }
        Ok(None)
    }

    fn put(&self, key: &str, value: EntryValue) -> Result<Option<EntryValue>> {
        let (old, stored) = {
            let mut state = self.state.lock();
            let old = state.entries.get(key).cloned();
            let stored = self.stored_copy(&value, old.as_ref())?;
            state.entries.insert(key.to_string(), stored.clone());
            state.idle.touch(key);
            (old, stored)
        };

        let operation = match (&old, self.data_policy) {
            (None, _) | (Some(_), DataPolicy::Empty) => Operation::Create,
            (Some(_), DataPolicy::Normal) => Operation::Update,
        };
        debug!(region = %self.full_path(), key, %operation, "Put entry");
        self.dispatch(EntryEvent::new(operation, key, old.clone(), Some(stored)));
        Ok(old)
    }

    fn remove(&self, key: &str) -> Result<Option<EntryValue>> {
        let old = {
            let mut state = self.state.lock();
            state.idle.remove(key);
            state.entries.remove(key)
        };
        if old.is_some() {
            debug!(region = %self.full_path(), key, "Removed entry");
            self.dispatch(EntryEvent::new(Operation::Destroy, key, old.clone(), None));
        }
        Ok(old)
    }

    fn values(&self) -> Result<Vec<EntryValue>> {
        self.expire_idle_entries();
        Ok(self.state.lock().entries.values().cloned().collect())
    }

    fn add_listener(&self, listener: Arc<dyn EntryListener>) {
        self.listeners.write().push(listener);
    }
}
