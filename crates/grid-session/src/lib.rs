//! HTTP session storage in a data grid region.
//!
//! A session is stored as a single region entry and shipped with a compact
//! binary layout; once stored, later saves ship only what changed. The
//! region's entry callbacks are translated into session lifecycle events
//! (created, deleted, expired, destroyed), with a bounded memory of recently
//! created ids suppressing duplicate creates from proxy regions.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use grid_session::{ChannelPublisher, LocalRegion, RepositoryConfig, SessionRepository};
//!
//! let config = RepositoryConfig::default().with_max_inactive_interval(900);
//! let (publisher, mut events) = ChannelPublisher::new();
//!
//! let repository = SessionRepository::builder()
//!     .region(Arc::new(LocalRegion::from_config(&config)))
//!     .config(config)
//!     .publisher(Arc::new(publisher))
//!     .build()?;
//!
//! let session = repository.create_session();
//! session.set_principal_name(Some("jblum"));
//! repository.save(&session)?;
//! ```

mod attributes;
mod codec;
mod config;
mod error;
mod events;
mod listener;
mod publisher;
mod recent;
mod region;
mod repository;
mod session;
mod ttl;

pub use attributes::{AttributesView, SessionAttributes};
pub use codec::{DataInputExt, DataOutputExt, Delta, JsonValueCodec, MAX_UTF_LEN, ValueCodec};
pub use config::{
    DEFAULT_MAX_INACTIVE_INTERVAL_SECS, DEFAULT_RECENT_KEYS_CAPACITY, DEFAULT_RECENT_KEYS_TTL_SECS,
    DEFAULT_REGION_NAME, RecentKeysConfig, RepositoryConfig, load_config_file,
};
pub use error::{Error, Result};
pub use events::{EventSource, SessionEvent, SessionEventKind};
pub use listener::{CreatedHook, HookOutcome, SessionEventListener};
pub use publisher::{ChannelPublisher, EventGateway, EventPublisher, NoopPublisher, PublishError};
pub use recent::RecentKeys;
pub use region::{DataPolicy, EntryEvent, EntryListener, EntryValue, LocalRegion, Operation, Region};
pub use repository::{PRINCIPAL_NAME_INDEX_NAME, SessionRepository, SessionRepositoryBuilder};
pub use session::{ExpiringSession, PRINCIPAL_NAME_ATTRIBUTE, Session};
pub use ttl::IdleTracker;
