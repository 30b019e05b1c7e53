//! Setting reads carrying provenance metadata.
//!
//! A plain `Option<String>` cannot tell an unset setting from a value that
//! could not be fetched. [`SettingRead`] is only produced when some path
//! actually answered, and records which one.

use almanac_core::GenerationValue;
use chrono::{DateTime, Utc};

/// Where a read was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadSource {
    /// Local values, with no remote call.
    Cache,
    /// Fast-path get call.
    FastPath,
    /// Fallback query against the backing collection.
    Fallback,
}

/// Result of a settings read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingRead {
    value: Option<String>,
    source: ReadSource,
    generation: Option<GenerationValue>,
    read_at: DateTime<Utc>,
}

impl SettingRead {
    /// A read served from local values validated at `generation`.
    pub fn from_cache(value: Option<String>, generation: GenerationValue) -> Self {
        Self {
            value,
            source: ReadSource::Cache,
            generation: Some(generation),
            read_at: Utc::now(),
        }
    }

    /// A read answered by the service. `generation` is set when the value
    /// was stored locally under that generation.
    pub fn from_remote(
        value: Option<String>,
        source: ReadSource,
        generation: Option<GenerationValue>,
    ) -> Self {
        Self {
            value,
            source,
            generation,
            read_at: Utc::now(),
        }
    }

    /// Consume the read and return the value.
    pub fn into_value(self) -> Option<String> {
        self.value
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Whether the setting has a value.
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    pub fn was_cache_hit(&self) -> bool {
        self.source == ReadSource::Cache
    }

    /// Generation the value is known to be consistent with, if any.
    pub fn generation(&self) -> Option<GenerationValue> {
        self.generation
    }

    pub fn read_at(&self) -> DateTime<Utc> {
        self.read_at
    }
}
