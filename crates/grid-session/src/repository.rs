//! Session repository backed by a grid region.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use tracing::{debug, warn};

use crate::config::RepositoryConfig;
use crate::error::{Error, Result};
use crate::events::EventSource;
use crate::listener::{CreatedHook, SessionEventListener};
use crate::publisher::{EventGateway, EventPublisher, NoopPublisher};
use crate::recent::RecentKeys;
use crate::region::{EntryValue, Region};
use crate::session::Session;

/// Index name accepted by [`SessionRepository::find_by_index_name_and_index_value`].
pub const PRINCIPAL_NAME_INDEX_NAME: &str = "principal_name";

/// Stores sessions in a region and publishes their lifecycle events.
///
/// Sessions handed out by the repository are copies of the stored value;
/// changes reach the region only through [`SessionRepository::save`].
pub struct SessionRepository {
    region: Arc<dyn Region>,
    listener: Arc<SessionEventListener>,
    max_inactive_interval: AtomicI32,
}

impl SessionRepository {
    /// Start building a repository.
    pub fn builder() -> SessionRepositoryBuilder {
        SessionRepositoryBuilder::default()
    }

    /// Create a session with the configured max inactive interval.
    ///
    /// The session is not stored until it is saved.
    pub fn create_session(&self) -> Arc<Session> {
        let session = Session::create(self.max_inactive_interval());
        debug!(session_id = %session.id(), "Created session");
        Arc::new(session)
    }

    /// Store a session under its id.
    ///
    /// A session already stored with pending changes ships only those
    /// changes, which clears its change tracking.
    pub fn save(&self, session: &Arc<Session>) -> Result<()> {
        self.region
            .put(session.id(), EntryValue::from_shared(Arc::clone(session)))?;
        Ok(())
    }

    /// Look up a session by id.
    ///
    /// Expired sessions are deleted and reported absent. A live session is
    /// returned touched.
    pub fn get_session(&self, id: &str) -> Result<Option<Arc<Session>>> {
        let Some(value) = self.region.get(id)? else {
            return Ok(None);
        };
        let Some(stored) = value.as_session() else {
            warn!(session_id = id, ?value, "Stored value is not a session");
            return Ok(None);
        };

        if stored.is_expired() {
            debug!(session_id = id, "Session expired; deleting");
            self.delete(id)?;
            return Ok(None);
        }

        let session = Session::clone(&stored);
        session.touch();
        Ok(Some(Arc::new(session)))
    }

    /// Delete a session by id and publish `Deleted`.
    pub fn delete(&self, id: &str) -> Result<()> {
        let removed = self.region.remove(id)?;
        let session = removed.as_ref().and_then(EntryValue::as_session);
        self.listener.handle_deleted(id, session);
        Ok(())
    }

    /// Delete a session.
    pub fn delete_session(&self, session: &Session) -> Result<()> {
        self.delete(session.id())
    }

    /// Mark a session as accessed now.
    pub fn touch<'a>(&self, session: &'a Session) -> &'a Session {
        session.touch();
        session
    }

    /// All stored sessions whose principal name matches, keyed by id.
    pub fn find_by_principal_name(&self, principal_name: &str) -> Result<HashMap<String, Arc<Session>>> {
        let found: HashMap<String, Arc<Session>> = self
            .region
            .values()?
            .iter()
            .filter_map(EntryValue::as_session)
            .filter(|session| session.principal_name().as_deref() == Some(principal_name))
            .map(|session| (session.id().to_string(), Arc::new(Session::clone(&session))))
            .collect();
        debug!(principal_name, count = found.len(), "Found sessions by principal name");
        Ok(found)
    }

    /// Sessions matching an index value.
    ///
    /// Only [`PRINCIPAL_NAME_INDEX_NAME`] is indexed; any other index name
    /// finds nothing.
    pub fn find_by_index_name_and_index_value(
        &self,
        index_name: &str,
        index_value: &str,
    ) -> Result<HashMap<String, Arc<Session>>> {
        if index_name == PRINCIPAL_NAME_INDEX_NAME {
            self.find_by_principal_name(index_value)
        } else {
            Ok(HashMap::new())
        }
    }

    /// Where this repository's events say they came from.
    pub fn source(&self) -> &EventSource {
        self.listener.source()
    }

    /// Full path of the backing region.
    pub fn full_region_path(&self) -> String {
        self.region.full_path()
    }

    /// Max inactive interval applied to new sessions, in seconds.
    pub fn max_inactive_interval(&self) -> i32 {
        self.max_inactive_interval.load(Ordering::SeqCst)
    }

    /// Change the interval applied to sessions created from now on.
    pub fn set_max_inactive_interval(&self, secs: i32) {
        self.max_inactive_interval.store(secs, Ordering::SeqCst);
    }

    /// The listener registered with the region.
    pub fn listener(&self) -> &Arc<SessionEventListener> {
        &self.listener
    }

    /// The backing region.
    pub fn region(&self) -> &Arc<dyn Region> {
        &self.region
    }
}

impl std::fmt::Debug for SessionRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRepository")
            .field("region", &self.region.full_path())
            .field("max_inactive_interval", &self.max_inactive_interval())
            .field("listener", &self.listener)
            .finish()
    }
}

/// Builder for [`SessionRepository`].
#[derive(Default)]
pub struct SessionRepositoryBuilder {
    region: Option<Arc<dyn Region>>,
    config: RepositoryConfig,
    publisher: Option<Arc<dyn EventPublisher>>,
    created_hook: Option<Arc<dyn CreatedHook>>,
}

impl SessionRepositoryBuilder {
    /// Region to store sessions in. Required.
    pub fn region(mut self, region: Arc<dyn Region>) -> Self {
        self.region = Some(region);
        self
    }

    pub fn config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Receiver of lifecycle events. Defaults to discarding them.
    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn created_hook(mut self, hook: Arc<dyn CreatedHook>) -> Self {
        self.created_hook = Some(hook);
        self
    }

    /// Build the repository and register its listener with the region.
    pub fn build(self) -> Result<SessionRepository> {
        let region = self
            .region
            .ok_or_else(|| Error::invalid_argument("Region must not be null"))?;

        let source = EventSource::new(region.full_path());
        let publisher = self.publisher.unwrap_or_else(|| Arc::new(NoopPublisher));
        let mut listener = SessionEventListener::new(
            source,
            region.data_policy(),
            RecentKeys::from_config(&self.config.recent_keys),
            EventGateway::new(publisher),
        );
        if let Some(hook) = self.created_hook {
            listener = listener.with_created_hook(hook);
        }
        let listener = Arc::new(listener);
        region.add_listener(listener.clone());

        debug!(
            region = %region.full_path(),
            data_policy = ?region.data_policy(),
            max_inactive_interval = self.config.max_inactive_interval_secs,
            "Session repository ready"
        );

        Ok(SessionRepository {
            region,
            listener,
            max_inactive_interval: AtomicI32::new(self.config.max_inactive_interval_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::Delta;
    use super::*;
    use crate::region::LocalRegion;
    use serde_json::json;

    fn repository() -> SessionRepository {
        SessionRepository::builder()
            .region(Arc::new(LocalRegion::new("Example")))
            .config(RepositoryConfig::new().with_max_inactive_interval(600))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_region() {
        let err = SessionRepository::builder().build().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(err.to_string(), "Region must not be null");
    }

    #[test]
    fn test_accessors() {
        let repository = repository();
        assert_eq!(repository.full_region_path(), "/Example");
        assert_eq!(repository.source().region, "/Example");
        assert_eq!(repository.max_inactive_interval(), 600);
        assert_eq!(repository.region().name(), "Example");
    }

    #[test]
    fn test_default_interval() {
        let repository = SessionRepository::builder()
            .region(Arc::new(LocalRegion::new("Example")))
            .build()
            .unwrap();
        assert_eq!(repository.max_inactive_interval(), 1800);
    }

    #[test]
    fn test_create_session_uses_interval() {
        let repository = repository();
        let session = repository.create_session();
        assert_eq!(session.max_inactive_interval(), 600);
        assert!(!session.is_expired());

        repository.set_max_inactive_interval(-1);
        assert_eq!(repository.create_session().max_inactive_interval(), -1);
        assert_eq!(session.max_inactive_interval(), 600);
    }

    #[test]
    fn test_extreme_intervals() {
        let repository = repository();
        for secs in [i32::MIN, -1, 0, i32::MAX] {
            repository.set_max_inactive_interval(secs);
            assert_eq!(repository.create_session().max_inactive_interval(), secs);
        }
    }

    #[test]
    fn test_create_is_not_stored() {
        let repository = repository();
        let session = repository.create_session();
        assert!(repository.get_session(session.id()).unwrap().is_none());
    }

    #[test]
    fn test_save_and_get() {
        let repository = repository();
        let session = repository.create_session();
        session.set_principal_name(Some("jblum"));
        session.set_attribute("cart", json!([1, 2]));
        session.set_last_accessed_time(session.creation_time());
        repository.save(&session).unwrap();

        let loaded = repository.get_session(session.id()).unwrap().unwrap();
        assert_eq!(*loaded, *session);
        assert_eq!(loaded.principal_name().as_deref(), Some("jblum"));
        assert_eq!(loaded.get_attribute("cart"), Some(json!([1, 2])));
        assert_eq!(loaded.creation_time(), session.creation_time());
        assert!(loaded.last_accessed_time() >= session.creation_time());
        assert!(loaded.has_delta());
    }

    #[test]
    fn test_save_again_ships_changes() {
        let repository = repository();
        let session = repository.create_session();
        repository.save(&session).unwrap();

        let loaded = repository.get_session(session.id()).unwrap().unwrap();
        loaded.set_attribute("step", 2);
        repository.save(&loaded).unwrap();
        assert!(!loaded.has_delta());

        let reloaded = repository.get_session(session.id()).unwrap().unwrap();
        assert_eq!(reloaded.get_attribute("step"), Some(json!(2)));
    }

    #[test]
    fn test_get_missing() {
        assert!(repository().get_session("missing").unwrap().is_none());
    }

    #[test]
    fn test_get_foreign_value() {
        struct Tombstone;
        let region = Arc::new(LocalRegion::new("Example"));
        region.put("t", EntryValue::new(Tombstone)).unwrap();
        let repository = SessionRepository::builder().region(region).build().unwrap();

        assert!(repository.get_session("t").unwrap().is_none());
    }

    #[test]
    fn test_get_expired_deletes() {
        let repository = repository();
        let session = repository.create_session();
        session.set_last_accessed_time(session.creation_time() - 601_000);
        repository.save(&session).unwrap();

        assert!(repository.get_session(session.id()).unwrap().is_none());
        assert!(repository.region().get(session.id()).unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let repository = repository();
        let session = repository.create_session();
        repository.save(&session).unwrap();

        repository.delete_session(&session).unwrap();
        assert!(repository.get_session(session.id()).unwrap().is_none());

        repository.delete("never-stored").unwrap();
    }

    #[test]
    fn test_touch() {
        let repository = repository();
        let session = Session::create(60);
        session.set_last_accessed_time(1);

        let touched = repository.touch(&session);
        assert!(touched.last_accessed_time() > 1);
        assert!(touched.has_delta());
    }

    #[test]
    fn test_find_by_principal_name() {
        let repository = repository();
        let mine = [repository.create_session(), repository.create_session()];
        for session in &mine {
            session.set_principal_name(Some("jblum"));
            repository.save(session).unwrap();
        }
        let other = repository.create_session();
        other.set_principal_name(Some("rwinch"));
        repository.save(&other).unwrap();
        repository.save(&repository.create_session()).unwrap();

        let found = repository.find_by_principal_name("jblum").unwrap();
        assert_eq!(found.len(), 2);
        for session in &mine {
            assert!(found.contains_key(session.id()));
        }

        assert_eq!(
            repository
                .find_by_index_name_and_index_value(PRINCIPAL_NAME_INDEX_NAME, "rwinch")
                .unwrap()
                .len(),
            1
        );
        assert!(repository
            .find_by_index_name_and_index_value("color", "blue")
            .unwrap()
            .is_empty());
        assert!(repository.find_by_principal_name("nobody").unwrap().is_empty());
    }
}
