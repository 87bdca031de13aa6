//! Translates region entry events into session lifecycle events.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::events::{EventSource, SessionEvent};
use crate::publisher::EventGateway;
use crate::recent::RecentKeys;
use crate::region::{DataPolicy, EntryEvent, EntryListener, EntryValue, Operation};
use crate::session::Session;

/// Result of a [`CreatedHook`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// Publish the event.
    Allow,
    /// Do not publish the event.
    Block { reason: String },
}

/// Observes a genuine session creation just before `Created` is published.
///
/// Runs synchronously on the callback thread and may veto publication.
pub trait CreatedHook: Send + Sync {
    fn on_created(&self, session_id: &str, session: Option<&Session>) -> HookOutcome;
}

impl<F> CreatedHook for F
where
    F: Fn(&str, Option<&Session>) -> HookOutcome + Send + Sync,
{
    fn on_created(&self, session_id: &str, session: Option<&Session>) -> HookOutcome {
        self(session_id, session)
    }
}

/// Entry listener that publishes session lifecycle events.
///
/// Creates are filtered so that load replays, foreign values and repeated
/// creates of a key already reported do not publish `Created`. Destroys
/// and invalidations always publish, with the session attached when the
/// old value was one.
pub struct SessionEventListener {
    source: EventSource,
    data_policy: DataPolicy,
    recent: RecentKeys,
    gateway: EventGateway,
    created_hook: Option<Arc<dyn CreatedHook>>,
}

impl SessionEventListener {
    pub fn new(
        source: EventSource,
        data_policy: DataPolicy,
        recent: RecentKeys,
        gateway: EventGateway,
    ) -> Self {
        Self {
            source,
            data_policy,
            recent,
            gateway,
            created_hook: None,
        }
    }

    /// Install a hook run before every `Created` is published.
    pub fn with_created_hook(mut self, hook: Arc<dyn CreatedHook>) -> Self {
        self.created_hook = Some(hook);
        self
    }

    /// Whether an event reports a genuinely new session.
    ///
    /// Only a plain `Create` qualifies. A new value that is present but not
    /// a session disqualifies the event. Under [`DataPolicy::Empty`] every
    /// put arrives as `Create`, so the key must also not have been seen
    /// recently; the first caller for a key remembers it. Under
    /// [`DataPolicy::Normal`] the region's own classification is trusted.
    pub fn is_create(&self, event: &EntryEvent) -> bool {
        if event.operation != Operation::Create {
            return false;
        }
        if event.new_value.as_ref().is_some_and(|value| !value.is_session()) {
            return false;
        }
        match self.data_policy {
            DataPolicy::Normal => true,
            DataPolicy::Empty => self.recent.remember_if_absent(&event.key),
        }
    }

    /// Publish `Deleted` for an application-initiated delete.
    pub fn handle_deleted(&self, session_id: &str, session: Option<Arc<Session>>) {
        self.recent.forget(session_id);
        self.gateway
            .publish_event(&SessionEvent::deleted(self.source.clone(), session_id, session));
    }

    /// Record an id as already created.
    pub fn remember(&self, session_id: &str) {
        self.recent.remember(session_id);
    }

    /// Forget an id so its next creation is reported again.
    pub fn forget(&self, session_id: &str) -> bool {
        self.recent.forget(session_id)
    }

    /// The recently-created-id memory.
    pub fn recent_keys(&self) -> &RecentKeys {
        &self.recent
    }

    /// Where published events say they came from.
    pub fn source(&self) -> &EventSource {
        &self.source
    }

    fn handle_created(&self, session_id: &str, session: Option<Arc<Session>>) {
        if let Some(hook) = &self.created_hook {
            if let HookOutcome::Block { reason } = hook.on_created(session_id, session.as_deref()) {
                debug!(session_id, %reason, "Created event blocked by hook");
                return;
            }
        }
        self.gateway
            .publish_event(&SessionEvent::created(self.source.clone(), session_id, session));
    }

    fn session_of(&self, key: &str, value: Option<&EntryValue>) -> Option<Arc<Session>> {
        let value = value?;
        let session = value.as_session();
        if session.is_none() {
            warn!(key, ?value, "Entry value is not a session");
        }
        session
    }
}

impl EntryListener for SessionEventListener {
    fn after_create(&self, event: &EntryEvent) {
        let create = self.is_create(event);
        trace!(key = %event.key, operation = %event.operation, create, "after_create");
        if create {
            let session = self.session_of(&event.key, event.new_value.as_ref());
            self.handle_created(&event.key, session);
        }
    }

    fn after_destroy(&self, event: &EntryEvent) {
        trace!(key = %event.key, operation = %event.operation, "after_destroy");
        let session = self.session_of(&event.key, event.old_value.as_ref());
        self.recent.forget(&event.key);
        self.gateway
            .publish_event(&SessionEvent::destroyed(self.source.clone(), &event.key, session));
    }

    fn after_invalidate(&self, event: &EntryEvent) {
        trace!(key = %event.key, operation = %event.operation, "after_invalidate");
        let session = self.session_of(&event.key, event.old_value.as_ref());
        self.recent.forget(&event.key);
        self.gateway
            .publish_event(&SessionEvent::expired(self.source.clone(), &event.key, session));
    }
}

impl std::fmt::Debug for SessionEventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEventListener")
            .field("source", &self.source)
            .field("data_policy", &self.data_policy)
            .field("recent", &self.recent)
            .field("created_hook", &self.created_hook.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SessionEventKind;
    use crate::publisher::{EventPublisher, PublishError};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<SessionEvent>>,
    }

    impl Recorder {
        fn kinds(&self) -> Vec<SessionEventKind> {
            self.events.lock().iter().map(|e| e.kind).collect()
        }
    }

    impl EventPublisher for Recorder {
        fn publish(&self, event: &SessionEvent) -> Result<(), PublishError> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    struct Tombstone;

    fn listener(policy: DataPolicy) -> (SessionEventListener, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let listener = SessionEventListener::new(
            EventSource::new("/Example"),
            policy,
            RecentKeys::new(100, Duration::from_secs(60)),
            EventGateway::new(recorder.clone()),
        );
        (listener, recorder)
    }

    fn session_value(id: &str) -> EntryValue {
        EntryValue::session(Session::with_id(id).unwrap())
    }

    #[test]
    fn test_is_create_first_seen_then_replayed() {
        let (listener, _) = listener(DataPolicy::Empty);
        let event = EntryEvent::new(Operation::Create, "123", None, Some(session_value("123")));

        assert!(listener.is_create(&event));
        assert!(listener.recent_keys().contains("123"));
        assert!(!listener.is_create(&event));
    }

    #[test]
    fn test_is_create_rejects_other_operations() {
        let (listener, _) = listener(DataPolicy::Empty);
        for operation in [
            Operation::Update,
            Operation::LocalLoadCreate,
            Operation::NetLoadCreate,
            Operation::Invalidate,
            Operation::Destroy,
        ] {
            let event = EntryEvent::new(operation, "1", None, Some(session_value("1")));
            assert!(!listener.is_create(&event), "{operation}");
        }
        assert!(listener.recent_keys().is_empty());
    }

    #[test]
    fn test_is_create_rejects_foreign_value() {
        let (listener, _) = listener(DataPolicy::Empty);
        let event = EntryEvent::new(Operation::Create, "1", None, Some(EntryValue::new(Tombstone)));

        assert!(!listener.is_create(&event));
        assert!(!listener.recent_keys().contains("1"));
    }

    #[test]
    fn test_is_create_accepts_missing_value() {
        let (listener, _) = listener(DataPolicy::Empty);
        let event = EntryEvent::new(Operation::Create, "1", None, None);
        assert!(listener.is_create(&event));
    }

    #[test]
    fn test_is_create_remembered_key() {
        let (listener, _) = listener(DataPolicy::Empty);
        listener.remember("1");
        let event = EntryEvent::new(Operation::Create, "1", None, Some(session_value("1")));
        assert!(!listener.is_create(&event));
    }

    #[test]
    fn test_normal_policy_skips_memory() {
        let (listener, _) = listener(DataPolicy::Normal);
        let event = EntryEvent::new(Operation::Create, "123", None, Some(session_value("123")));

        assert!(listener.is_create(&event));
        assert!(listener.is_create(&event));
        assert!(listener.recent_keys().is_empty());
    }

    #[test]
    fn test_after_create_publishes_once() {
        let (listener, recorder) = listener(DataPolicy::Empty);
        let event = EntryEvent::new(Operation::Create, "1", None, Some(session_value("1")));

        listener.after_create(&event);
        listener.after_create(&event);

        let events = recorder.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SessionEventKind::Created);
        assert_eq!(events[0].session_id, "1");
        assert_eq!(events[0].session.as_ref().map(|s| s.id()), Some("1"));
    }

    #[test]
    fn test_after_create_without_value() {
        let (listener, recorder) = listener(DataPolicy::Empty);
        listener.after_create(&EntryEvent::new(Operation::Create, "1", None, None));

        let events = recorder.events.lock();
        assert_eq!(events.len(), 1);
        assert!(events[0].session.is_none());
    }

    #[test]
    fn test_after_destroy() {
        let (listener, recorder) = listener(DataPolicy::Empty);
        listener.after_destroy(&EntryEvent::new(
            Operation::Destroy,
            "1",
            Some(session_value("1")),
            None,
        ));

        let events = recorder.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SessionEventKind::Destroyed);
        assert_eq!(events[0].session.as_ref().map(|s| s.id()), Some("1"));
    }

    #[test]
    fn test_foreign_old_values_publish_without_session() {
        let (listener, recorder) = listener(DataPolicy::Empty);
        listener.after_destroy(&EntryEvent::new(
            Operation::Destroy,
            "1",
            Some(EntryValue::new(Tombstone)),
            None,
        ));
        listener.after_invalidate(&EntryEvent::new(
            Operation::Invalidate,
            "2",
            Some(EntryValue::new(Tombstone)),
            None,
        ));

        let events = recorder.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, SessionEventKind::Destroyed);
        assert_eq!(events[0].session_id, "1");
        assert!(events[0].session.is_none());
        assert_eq!(events[1].kind, SessionEventKind::Expired);
        assert_eq!(events[1].session_id, "2");
        assert!(events[1].session.is_none());
    }

    #[test]
    fn test_create_invalidate_create() {
        let (listener, recorder) = listener(DataPolicy::Empty);
        let create = EntryEvent::new(Operation::Create, "1", None, Some(session_value("1")));

        listener.after_create(&create);
        listener.after_create(&create);
        listener.after_invalidate(&EntryEvent::new(Operation::Invalidate, "1", None, None));
        listener.after_create(&create);

        assert_eq!(
            recorder.kinds(),
            vec![
                SessionEventKind::Created,
                SessionEventKind::Expired,
                SessionEventKind::Created,
            ]
        );
    }

    #[test]
    fn test_handle_deleted() {
        let (listener, recorder) = listener(DataPolicy::Empty);
        listener.remember("1");

        listener.handle_deleted("1", Some(Arc::new(Session::with_id("1").unwrap())));
        listener.handle_deleted("2", None);

        assert!(!listener.recent_keys().contains("1"));
        let events = recorder.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, SessionEventKind::Deleted);
        assert_eq!(events[0].session_id, "1");
        assert!(events[0].session.is_some());
        assert_eq!(events[1].session_id, "2");
        assert!(events[1].session.is_none());
    }

    #[test]
    fn test_created_hook_runs_before_publish() {
        let recorder = Arc::new(Recorder::default());
        let seen_by_hook = Arc::new(Mutex::new(Vec::new()));
        let hook_log = Arc::clone(&seen_by_hook);
        let hook_recorder = Arc::clone(&recorder);

        let listener = SessionEventListener::new(
            EventSource::new("/Example"),
            DataPolicy::Empty,
            RecentKeys::default(),
            EventGateway::new(recorder.clone()),
        )
        .with_created_hook(Arc::new(move |id: &str, session: Option<&Session>| {
            // Nothing published yet when the hook runs.
            hook_log
                .lock()
                .push((id.to_string(), session.is_some(), hook_recorder.events.lock().len()));
            HookOutcome::Allow
        }));

        listener.after_create(&EntryEvent::new(Operation::Create, "1", None, Some(session_value("1"))));

        assert_eq!(*seen_by_hook.lock(), vec![("1".to_string(), true, 0)]);
        assert_eq!(recorder.kinds(), vec![SessionEventKind::Created]);
    }

    #[test]
    fn test_created_hook_blocks() {
        let (listener, recorder) = listener(DataPolicy::Empty);
        let listener = listener.with_created_hook(Arc::new(|_: &str, _: Option<&Session>| {
            HookOutcome::Block {
                reason: "test".to_string(),
            }
        }));

        listener.after_create(&EntryEvent::new(Operation::Create, "1", None, Some(session_value("1"))));

        assert!(recorder.kinds().is_empty());
    }

    #[test]
    fn test_publish_failure_does_not_escape() {
        let listener = SessionEventListener::new(
            EventSource::new("/Example"),
            DataPolicy::Empty,
            RecentKeys::default(),
            EventGateway::new(Arc::new(|_: &SessionEvent| -> Result<(), PublishError> {
                Err(PublishError::Rejected("test".to_string()))
            })),
        );

        listener.after_create(&EntryEvent::new(Operation::Create, "1", None, None));
        listener.after_destroy(&EntryEvent::new(Operation::Destroy, "1", None, None));
    }
}
