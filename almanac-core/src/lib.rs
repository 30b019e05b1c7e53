//! ALMANAC Core - Settings Client Types
//!
//! Identity types, errors, configuration, the shared generation arrays and
//! the remote service protocol that every other ALMANAC crate builds on.
//! No caching logic lives here.

pub mod config;
pub mod error;
pub mod identity;
pub mod memory;
pub mod provider;

pub use config::CacheConfig;
pub use error::{AlmanacError, AlmanacResult, ConfigError, MemoryError, RemoteError, SettingError};
pub use identity::{
    GenerationValue, Namespace, NamespaceParseError, RequestScope, ResetMode, Timestamp, UserId,
};
pub use memory::{AtomicIntArray, MappedIntArray, MemoryIntArray};
pub use provider::{
    GetReply, GetRequest, ListReply, ListRequest, PutRequest, QueryRow, ResetRequest,
    SettingsProvider, TrackerMaterials,
};
