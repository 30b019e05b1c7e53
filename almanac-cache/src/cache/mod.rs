//! Generation-tracked cache layer.
//!
//! Each namespace of the settings service gets its own [`NameValueCache`].
//! Invalidation is pull-based: the service bumps a counter in a shared
//! array whenever a namespace changes, and the cache's
//! [`GenerationTracker`] compares that counter on every read.
//!
//! # Scoping
//!
//! Only reads for the process's own user are ever stored. Reads on behalf
//! of another user always go to the service, so one user's values can never
//! be served to another.
//!
//! # Example
//!
//! ```ignore
//! let cache = NameValueCache::with_defaults(Namespace::Global, me, provider);
//!
//! // First read goes remote and installs a tracker
//! let read = cache.lookup_for_user("wifi_on", me)?;
//!
//! // Served locally until the generation moves
//! let again = cache.lookup_for_user("wifi_on", me)?;
//! assert!(again.was_cache_hit());
//! ```

pub mod generation;
pub mod name_value;
pub mod read;
pub mod stats;

pub use generation::{ErrorCallback, GenerationTracker};
pub use name_value::NameValueCache;
pub use read::{ReadSource, SettingRead};
pub use stats::CacheStats;
