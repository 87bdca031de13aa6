//! Session attribute storage with change tracking.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::codec::{DataInputExt, DataOutputExt, Delta, ValueCodec};
use crate::error::Result;
use crate::session::ExpiringSession;

/// Attribute map plus the names changed since the last delta flush.
#[derive(Debug, Default, Clone)]
struct AttributesInner {
    attributes: BTreeMap<String, Value>,
    deltas: BTreeSet<String>,
}

/// Named attribute values belonging to a single session.
///
/// Values are arbitrary JSON values; [`Value::Null`] is never stored and
/// setting it removes the attribute. Every name whose value actually
/// changes is recorded until the next [`Delta::to_delta`] or
/// [`Delta::from_delta`], so replication can ship only what changed.
///
/// Storage sits behind a lock, so a session's attributes may be read and
/// written from several request threads at once. Iteration order is
/// attribute-name order.
#[derive(Debug, Default)]
pub struct SessionAttributes {
    inner: Arc<RwLock<AttributesInner>>,
}

impl SessionAttributes {
    /// Create an empty attribute store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute, returning the previous value.
    ///
    /// A null value removes the attribute instead.
    pub fn set_attribute(&self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();

        if value.is_null() {
            return self.remove_attribute(&name);
        }

        let mut inner = self.inner.write();
        if inner.attributes.get(&name) == Some(&value) {
            return Some(value);
        }
        inner.deltas.insert(name.clone());
        inner.attributes.insert(name, value)
    }

    /// Remove an attribute, returning its value if it was present.
    pub fn remove_attribute(&self, name: &str) -> Option<Value> {
        let mut inner = self.inner.write();
        let removed = inner.attributes.remove(name);
        if removed.is_some() {
            inner.deltas.insert(name.to_string());
        }
        removed
    }

    /// Get an attribute value.
    pub fn get_attribute(&self, name: &str) -> Option<Value> {
        self.inner.read().attributes.get(name).cloned()
    }

    /// Get an attribute value deserialized into `T`.
    ///
    /// Returns `None` when the attribute is absent or has a different shape.
    pub fn attribute_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.get_attribute(name)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Snapshot of the current attribute names.
    pub fn attribute_names(&self) -> BTreeSet<String> {
        self.inner.read().attributes.keys().cloned().collect()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.inner.read().attributes.len()
    }

    /// Whether there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.inner.read().attributes.is_empty()
    }

    /// Live view over the attribute entries.
    ///
    /// The view shares storage with this store: later mutations are visible
    /// through it without asking again.
    pub fn entry_set(&self) -> AttributesView {
        AttributesView {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Copy every attribute of another session into this store.
    pub fn copy_from(&self, session: &dyn ExpiringSession) {
        for name in session.attribute_names() {
            if let Some(value) = session.attribute(&name) {
                self.set_attribute(name, value);
            }
        }
    }

    /// Copy every attribute of another store into this one.
    pub fn copy_from_attributes(&self, other: &SessionAttributes) {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return;
        }
        let snapshot = other.inner.read().attributes.clone();
        for (name, value) in snapshot {
            self.set_attribute(name, value);
        }
    }

    /// Forget pending changes without writing them.
    pub(crate) fn clear_deltas(&self) {
        self.inner.write().deltas.clear();
    }

    /// Write pending changes and stop tracking them.
    ///
    /// Returns the names written so they can be marked again with
    /// [`SessionAttributes::mark_changed`] if the receiver rejects them.
    pub(crate) fn flush_delta(
        &self,
        out: &mut dyn Write,
        codec: &dyn ValueCodec,
    ) -> Result<BTreeSet<String>> {
        // Held across write and clear so no change slips in between.
        let mut inner = self.inner.write();
        out.write_count(inner.deltas.len())?;
        for name in &inner.deltas {
            out.write_utf(name)?;
            let value = inner.attributes.get(name).unwrap_or(&Value::Null);
            codec.write_value(value, out)?;
        }
        Ok(std::mem::take(&mut inner.deltas))
    }

    /// Track `names` as changed again.
    pub(crate) fn mark_changed(&self, names: BTreeSet<String>) {
        self.inner.write().deltas.extend(names);
    }

    /// Write every attribute: count, then `(name, value)` pairs.
    pub fn to_data(&self, out: &mut dyn Write, codec: &dyn ValueCodec) -> Result<()> {
        let inner = self.inner.read();
        out.write_count(inner.attributes.len())?;
        for (name, value) in &inner.attributes {
            out.write_utf(name)?;
            codec.write_value(value, out)?;
        }
        Ok(())
    }

    /// Replace all state with attributes read from the stream.
    pub fn from_data(&self, input: &mut dyn Read, codec: &dyn ValueCodec) -> Result<()> {
        let pairs = read_pairs(input, codec)?;

        let mut inner = self.inner.write();
        inner.attributes.clear();
        inner.deltas.clear();
        for (name, value) in pairs {
            if !value.is_null() {
                inner.attributes.insert(name, value);
            }
        }
        Ok(())
    }
}

impl Delta for SessionAttributes {
    fn has_delta(&self) -> bool {
        !self.inner.read().deltas.is_empty()
    }

    fn to_delta(&self, out: &mut dyn Write, codec: &dyn ValueCodec) -> Result<()> {
        self.flush_delta(out, codec).map(|_| ())
    }

    fn from_delta(&self, input: &mut dyn Read, codec: &dyn ValueCodec) -> Result<()> {
        let pairs = read_pairs(input, codec)?;

        let mut inner = self.inner.write();
        for (name, value) in pairs {
            if value.is_null() {
                inner.attributes.remove(&name);
            } else {
                inner.attributes.insert(name, value);
            }
        }
        inner.deltas.clear();
        Ok(())
    }
}

impl Clone for SessionAttributes {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::new(RwLock::new(self.inner.read().clone())),
        }
    }
}

impl PartialEq for SessionAttributes {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        let left = self.inner.read().attributes.clone();
        left == other.inner.read().attributes
    }
}

fn read_pairs(input: &mut dyn Read, codec: &dyn ValueCodec) -> Result<Vec<(String, Value)>> {
    let count = input.read_count("attribute count")?;
    let mut pairs = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let name = input.read_utf()?;
        let value = codec.read_value(input)?;
        pairs.push((name, value));
    }
    Ok(pairs)
}

/// Live, read-only view of a [`SessionAttributes`] store.
#[derive(Debug, Clone)]
pub struct AttributesView {
    inner: Arc<RwLock<AttributesInner>>,
}

impl AttributesView {
    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.inner.read().attributes.len()
    }

    /// Whether the store is currently empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().attributes.is_empty()
    }

    /// Whether an attribute with this name currently exists.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().attributes.contains_key(name)
    }

    /// Current value of an attribute.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.read().attributes.get(name).cloned()
    }

    /// Snapshot of the current entries in name order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.inner
            .read()
            .attributes
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}
