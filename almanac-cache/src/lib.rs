//! ALMANAC Cache - Generation-Tracked Settings Access
//!
//! Per-namespace read-through caches over a remote settings service, and
//! the [`SettingsClient`] that bundles one cache per namespace with typed
//! accessors.

pub mod cache;
pub mod client;

pub use cache::{
    CacheStats, ErrorCallback, GenerationTracker, NameValueCache, ReadSource, SettingRead,
};
pub use client::SettingsClient;
