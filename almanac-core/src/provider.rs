//! Remote settings service protocol.
//!
//! Request and reply shapes exchanged with the settings service, and the
//! [`SettingsProvider`] trait through which caches reach it. The service
//! itself (storage, persistence, permission checks) is an external
//! collaborator; this module only describes the calls.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::RemoteError;
use crate::identity::{GenerationValue, Namespace, ResetMode, UserId};
use crate::memory::MemoryIntArray;

// ============================================================================
// GENERATION TRACKING MATERIALS
// ============================================================================

/// Everything a client needs to start tracking a namespace's generation.
///
/// Handed out by the service in reply to a request carrying the
/// track-generation flag.
#[derive(Clone)]
pub struct TrackerMaterials {
    /// Handle onto the shared generation block.
    pub array: Arc<dyn MemoryIntArray>,
    /// Slot of this namespace's counter. Negative means "not assigned".
    pub index: i32,
    /// Value of the counter at hand-off time.
    pub generation: GenerationValue,
}

impl TrackerMaterials {
    pub fn new(array: Arc<dyn MemoryIntArray>, index: i32, generation: GenerationValue) -> Self {
        Self {
            array,
            index,
            generation,
        }
    }

    /// The slot index if it addresses a slot of `array`.
    pub fn usable_index(&self) -> Option<usize> {
        let index = usize::try_from(self.index).ok()?;
        (index < self.array.len()).then_some(index)
    }
}

impl fmt::Debug for TrackerMaterials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerMaterials")
            .field("array_len", &self.array.len())
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

// ============================================================================
// REQUESTS AND REPLIES
// ============================================================================

/// Fast-path read of a single setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    pub name: String,
    /// Target user; `None` means the caller's own user.
    pub user: Option<UserId>,
    /// Ask the service to hand out generation tracking materials.
    pub track_generation: bool,
}

/// Reply to a [`GetRequest`].
#[derive(Debug, Clone)]
pub struct GetReply {
    pub value: Option<String>,
    pub tracker: Option<TrackerMaterials>,
}

impl GetReply {
    pub fn value(value: Option<String>) -> Self {
        Self {
            value,
            tracker: None,
        }
    }

    pub fn with_tracker(mut self, tracker: TrackerMaterials) -> Self {
        self.tracker = Some(tracker);
        self
    }
}

/// Fast-path write of a single setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    pub name: String,
    /// New value; `None` clears the setting.
    pub value: Option<String>,
    pub user: UserId,
    /// Provenance marker used by later selective resets.
    pub tag: Option<String>,
    /// Also make this value the fallback default.
    pub make_default: bool,
}

/// Bulk reset of a namespace to its defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetRequest {
    pub mode: ResetMode,
    pub tag: Option<String>,
    pub user: UserId,
}

/// Fast-path listing of all set values under a name prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub prefix: String,
    pub user: Option<UserId>,
    pub track_generation: bool,
}

/// Reply to a [`ListRequest`].
#[derive(Debug, Clone, Default)]
pub struct ListReply {
    pub values: BTreeMap<String, String>,
    pub tracker: Option<TrackerMaterials>,
}

/// One row returned by a fallback query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRow {
    pub name: String,
    pub value: Option<String>,
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Blocking client for the remote settings service.
///
/// Implementations wrap whatever transport reaches the service. Calls may
/// block on I/O; timeouts and retries belong to the transport.
pub trait SettingsProvider: Send + Sync {
    /// Fast-path read. `Ok(None)` means the service answered without a
    /// usable reply bundle.
    fn call_get(
        &self,
        namespace: Namespace,
        request: GetRequest,
    ) -> Result<Option<GetReply>, RemoteError>;

    /// Fast-path write.
    fn call_put(&self, namespace: Namespace, request: PutRequest) -> Result<(), RemoteError>;

    /// Tabular lookup of `name` in the namespace's backing collection.
    /// `Ok(None)` means no row matched.
    fn query(
        &self,
        namespace: Namespace,
        name: &str,
        user: Option<UserId>,
    ) -> Result<Option<QueryRow>, RemoteError>;

    /// Reset values to their defaults.
    fn call_reset(&self, namespace: Namespace, _request: ResetRequest) -> Result<(), RemoteError> {
        Err(RemoteError::unsupported(namespace.reset_method()))
    }

    /// List every set value whose name starts with the request prefix.
    fn call_list(&self, namespace: Namespace, _request: ListRequest) -> Result<ListReply, RemoteError> {
        Err(RemoteError::unsupported(namespace.list_method()))
    }
}

impl<P: SettingsProvider + ?Sized> SettingsProvider for Arc<P> {
    fn call_get(
        &self,
        namespace: Namespace,
        request: GetRequest,
    ) -> Result<Option<GetReply>, RemoteError> {
        (**self).call_get(namespace, request)
    }

    fn call_put(&self, namespace: Namespace, request: PutRequest) -> Result<(), RemoteError> {
        (**self).call_put(namespace, request)
    }

    fn query(
        &self,
        namespace: Namespace,
        name: &str,
        user: Option<UserId>,
    ) -> Result<Option<QueryRow>, RemoteError> {
        (**self).query(namespace, name, user)
    }

    fn call_reset(&self, namespace: Namespace, request: ResetRequest) -> Result<(), RemoteError> {
        (**self).call_reset(namespace, request)
    }

    fn call_list(&self, namespace: Namespace, request: ListRequest) -> Result<ListReply, RemoteError> {
        (**self).call_list(namespace, request)
    }
}
