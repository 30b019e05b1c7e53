//! ALMANAC Test Utilities
//!
//! Centralized test infrastructure for the ALMANAC workspace:
//! - A fault-injecting generation array
//! - An in-memory settings service that bumps generations on every change
//! - Proptest generators for identities, settings and cache operations
//! - Fixtures and assertions for common scenarios

// Re-export core types for convenience
pub use almanac_core::{
    AlmanacError, AlmanacResult, CacheConfig, GenerationValue, GetReply, GetRequest, ListReply,
    ListRequest, MemoryError, MemoryIntArray, Namespace, PutRequest, QueryRow, RemoteError,
    ResetMode, ResetRequest, SettingsProvider, TrackerMaterials, UserId,
};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// FAKE GENERATION ARRAY
// ============================================================================

#[derive(Debug)]
struct FakeBlock {
    slots: Vec<AtomicI32>,
    fail_reads: AtomicBool,
    fail_close: AtomicBool,
    reads: AtomicUsize,
}

/// Generation array whose reads and closes can be made to fail.
///
/// Handles share one block, so a fault injected through any handle hits
/// every reader.
#[derive(Debug)]
pub struct FakeIntArray {
    block: Arc<FakeBlock>,
    closed: AtomicBool,
}

impl FakeIntArray {
    pub fn new(len: usize) -> Self {
        Self {
            block: Arc::new(FakeBlock {
                slots: (0..len).map(|_| AtomicI32::new(0)).collect(),
                fail_reads: AtomicBool::new(false),
                fail_close: AtomicBool::new(false),
                reads: AtomicUsize::new(0),
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Open another handle onto the same block.
    pub fn handle(&self) -> Self {
        Self {
            block: Arc::clone(&self.block),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set(&self, index: usize, value: i32) {
        self.block.slots[index].store(value, Ordering::SeqCst);
    }

    /// Bump `index`, returning the new value.
    pub fn increment(&self, index: usize) -> i32 {
        self.block.slots[index]
            .fetch_add(1, Ordering::SeqCst)
            .wrapping_add(1)
    }

    /// Read `index` without counting it or honoring injected faults.
    pub fn peek(&self, index: usize) -> i32 {
        self.block.slots[index].load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.block.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_close(&self, fail: bool) {
        self.block.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Number of `get` calls made through any handle.
    pub fn reads(&self) -> usize {
        self.block.reads.load(Ordering::SeqCst)
    }
}

impl MemoryIntArray for FakeIntArray {
    fn len(&self) -> usize {
        self.block.slots.len()
    }

    fn get(&self, index: usize) -> Result<i32, MemoryError> {
        self.block.reads.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(MemoryError::Closed);
        }
        if self.block.fail_reads.load(Ordering::SeqCst) {
            return Err(MemoryError::Io {
                reason: "injected read failure".to_string(),
            });
        }
        self.block
            .slots
            .get(index)
            .map(|slot| slot.load(Ordering::SeqCst))
            .ok_or(MemoryError::IndexOutOfBounds {
                index,
                len: self.block.slots.len(),
            })
    }

    fn close(&self) -> Result<(), MemoryError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.block.fail_close.load(Ordering::SeqCst) {
            return Err(MemoryError::Io {
                reason: "injected close failure".to_string(),
            });
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// FAKE SETTINGS SERVICE
// ============================================================================

/// Faults that can be switched on in a [`FakeSettingsService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `call_get` fails with a communication error.
    FailGet,
    /// `call_get` reports the method as unsupported.
    GetUnsupported,
    /// `call_get` answers without a reply bundle.
    EmptyGetReply,
    /// Puts and resets fail.
    FailWrites,
    FailQuery,
    FailList,
    /// Never hand out tracker materials.
    WithholdTracker,
    /// Query rows come back under a different name.
    MisnamedQueryRows,
}

/// Number of calls a [`FakeSettingsService`] has served, per verb.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get: usize,
    pub put: usize,
    pub query: usize,
    pub list: usize,
    pub reset: usize,
}

impl CallCounts {
    /// Calls that read values.
    pub fn reads(&self) -> usize {
        self.get + self.query + self.list
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Entry {
    value: Option<String>,
    default: Option<String>,
    tag: Option<String>,
}

type TableKey = (Namespace, UserId, String);

/// In-memory settings service.
///
/// Every namespace owns one slot of a shared [`FakeIntArray`]; any change
/// to a namespace bumps its slot. Requests without a user are attributed to
/// the service's `self_user`.
#[derive(Debug)]
pub struct FakeSettingsService {
    self_user: UserId,
    generations: FakeIntArray,
    entries: Mutex<HashMap<TableKey, Entry>>,
    handles: Mutex<Vec<Arc<FakeIntArray>>>,
    faults: Mutex<HashSet<Fault>>,
    tracker_index: Mutex<Option<i32>>,
    get_requests: Mutex<Vec<(Namespace, GetRequest)>>,
    get_calls: AtomicUsize,
    put_calls: AtomicUsize,
    query_calls: AtomicUsize,
    list_calls: AtomicUsize,
    reset_calls: AtomicUsize,
}

impl FakeSettingsService {
    pub fn new(self_user: UserId) -> Self {
        Self {
            self_user,
            generations: FakeIntArray::new(Namespace::ALL.len()),
            entries: Mutex::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
            faults: Mutex::new(HashSet::new()),
            tracker_index: Mutex::new(None),
            get_requests: Mutex::new(Vec::new()),
            get_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            reset_calls: AtomicUsize::new(0),
        }
    }

    /// Generation slot of `namespace`.
    pub fn slot(namespace: Namespace) -> usize {
        Namespace::ALL
            .iter()
            .position(|ns| *ns == namespace)
            .unwrap_or_default()
    }

    // === Faults ===

    pub fn set_fault(&self, fault: Fault, on: bool) {
        let mut faults = self.faults.lock().unwrap();
        if on {
            faults.insert(fault);
        } else {
            faults.remove(&fault);
        }
    }

    pub fn has_fault(&self, fault: Fault) -> bool {
        self.faults.lock().unwrap().contains(&fault)
    }

    /// Hand out trackers pointing at `index` instead of the namespace slot.
    pub fn set_tracker_index(&self, index: Option<i32>) {
        *self.tracker_index.lock().unwrap() = index;
    }

    // === State ===

    /// Write a value as another process would, bumping the generation.
    pub fn insert(&self, namespace: Namespace, user: UserId, name: &str, value: Option<&str>) {
        self.entries
            .lock()
            .unwrap()
            .entry((namespace, user, name.to_string()))
            .or_default()
            .value = value.map(str::to_string);
        self.bump_generation(namespace);
    }

    /// The value the service currently holds.
    pub fn value(&self, namespace: Namespace, user: UserId, name: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .get(&(namespace, user, name.to_string()))
            .and_then(|entry| entry.value.clone())
    }

    pub fn default_value(&self, namespace: Namespace, user: UserId, name: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .get(&(namespace, user, name.to_string()))
            .and_then(|entry| entry.default.clone())
    }

    pub fn tag(&self, namespace: Namespace, user: UserId, name: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .get(&(namespace, user, name.to_string()))
            .and_then(|entry| entry.tag.clone())
    }

    pub fn bump_generation(&self, namespace: Namespace) -> GenerationValue {
        self.generations.increment(Self::slot(namespace))
    }

    pub fn set_generation(&self, namespace: Namespace, generation: GenerationValue) {
        self.generations.set(Self::slot(namespace), generation);
    }

    pub fn generation(&self, namespace: Namespace) -> GenerationValue {
        self.generations.peek(Self::slot(namespace))
    }

    /// The service's own handle onto the generation block.
    pub fn block(&self) -> &FakeIntArray {
        &self.generations
    }

    /// Every handle handed out with tracker materials, oldest first.
    pub fn handles(&self) -> Vec<Arc<FakeIntArray>> {
        self.handles.lock().unwrap().clone()
    }

    pub fn get_requests(&self) -> Vec<(Namespace, GetRequest)> {
        self.get_requests.lock().unwrap().clone()
    }

    pub fn call_counts(&self) -> CallCounts {
        CallCounts {
            get: self.get_calls.load(Ordering::SeqCst),
            put: self.put_calls.load(Ordering::SeqCst),
            query: self.query_calls.load(Ordering::SeqCst),
            list: self.list_calls.load(Ordering::SeqCst),
            reset: self.reset_calls.load(Ordering::SeqCst),
        }
    }

    fn user(&self, user: Option<UserId>) -> UserId {
        user.unwrap_or(self.self_user)
    }

    fn materials(&self, namespace: Namespace, generation: GenerationValue) -> Option<TrackerMaterials> {
        if self.has_fault(Fault::WithholdTracker) {
            return None;
        }
        let handle = Arc::new(self.generations.handle());
        self.handles.lock().unwrap().push(Arc::clone(&handle));
        let index = self
            .tracker_index
            .lock()
            .unwrap()
            .unwrap_or(Self::slot(namespace) as i32);
        Some(TrackerMaterials::new(handle, index, generation))
    }
}

impl SettingsProvider for FakeSettingsService {
    fn call_get(
        &self,
        namespace: Namespace,
        request: GetRequest,
    ) -> Result<Option<GetReply>, RemoteError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.get_requests
            .lock()
            .unwrap()
            .push((namespace, request.clone()));

        if self.has_fault(Fault::GetUnsupported) {
            return Err(RemoteError::unsupported(namespace.get_method()));
        }
        if self.has_fault(Fault::FailGet) {
            return Err(RemoteError::communication(namespace.get_method(), "injected failure"));
        }
        if self.has_fault(Fault::EmptyGetReply) {
            return Ok(None);
        }

        // Generation first: a write racing this call can only make the
        // reported generation older than the value, never newer.
        let generation = self.generation(namespace);
        let value = self.value(namespace, self.user(request.user), &request.name);
        let mut reply = GetReply::value(value);
        if request.track_generation {
            if let Some(materials) = self.materials(namespace, generation) {
                reply = reply.with_tracker(materials);
            }
        }
        Ok(Some(reply))
    }

    fn call_put(&self, namespace: Namespace, request: PutRequest) -> Result<(), RemoteError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.has_fault(Fault::FailWrites) {
            return Err(RemoteError::communication(namespace.put_method(), "injected failure"));
        }

        {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries
                .entry((namespace, request.user, request.name))
                .or_default();
            if request.make_default {
                entry.default = request.value.clone();
            }
            entry.value = request.value;
            entry.tag = request.tag;
        }
        self.bump_generation(namespace);
        Ok(())
    }

    fn query(
        &self,
        namespace: Namespace,
        name: &str,
        user: Option<UserId>,
    ) -> Result<Option<QueryRow>, RemoteError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if self.has_fault(Fault::FailQuery) {
            return Err(RemoteError::communication(namespace.content_uri(), "injected failure"));
        }

        let user = self.user(user);
        let exists = self
            .entries
            .lock()
            .unwrap()
            .contains_key(&(namespace, user, name.to_string()));
        if !exists {
            return Ok(None);
        }
        let row_name = if self.has_fault(Fault::MisnamedQueryRows) {
            format!("{name}_shadow")
        } else {
            name.to_string()
        };
        Ok(Some(QueryRow {
            name: row_name,
            value: self.value(namespace, user, name),
        }))
    }

    fn call_reset(&self, namespace: Namespace, request: ResetRequest) -> Result<(), RemoteError> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        if self.has_fault(Fault::FailWrites) {
            return Err(RemoteError::communication(namespace.reset_method(), "injected failure"));
        }

        {
            let mut entries = self.entries.lock().unwrap();
            for ((ns, user, _), entry) in entries.iter_mut() {
                if *ns != namespace || *user != request.user {
                    continue;
                }
                match request.mode {
                    ResetMode::PackageDefaults => {
                        if request.tag.is_some() && entry.tag == request.tag {
                            entry.value = entry.default.clone();
                        }
                    }
                    ResetMode::UntrustedDefaults | ResetMode::TrustedDefaults => {
                        entry.value = entry.default.clone();
                    }
                    ResetMode::UntrustedChanges => {
                        entry.value = entry.default.clone();
                        entry.tag = None;
                    }
                }
            }
        }
        self.bump_generation(namespace);
        Ok(())
    }

    fn call_list(&self, namespace: Namespace, request: ListRequest) -> Result<ListReply, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.has_fault(Fault::FailList) {
            return Err(RemoteError::communication(namespace.list_method(), "injected failure"));
        }

        let generation = self.generation(namespace);
        let user = self.user(request.user);
        let values: BTreeMap<String, String> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, u, name), _)| {
                *ns == namespace && *u == user && name.starts_with(&request.prefix)
            })
            .filter_map(|((_, _, name), entry)| Some((name.clone(), entry.value.clone()?)))
            .collect();

        let tracker = if request.track_generation {
            self.materials(namespace, generation)
        } else {
            None
        };
        Ok(ListReply { values, tracker })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating ALMANAC types.

    use super::*;
    use proptest::prelude::*;

    /// Names drawn from a small pool so that operations collide.
    pub const SETTING_NAMES: [&str; 6] = [
        "volume",
        "wifi_on",
        "screen_brightness",
        "adb_enabled",
        "ringtone",
        "wifi_sleep_policy",
    ];

    /// Generate a setting name.
    pub fn arb_setting_name() -> impl Strategy<Value = String> {
        prop::sample::select(SETTING_NAMES.to_vec()).prop_map(str::to_string)
    }

    /// Generate a setting value; `None` clears the setting.
    pub fn arb_setting_value() -> impl Strategy<Value = Option<String>> {
        prop::option::of("[a-z0-9]{0,8}")
    }

    /// Generate a user among the first three ids.
    pub fn arb_user() -> impl Strategy<Value = UserId> {
        (0u32..3).prop_map(UserId::new)
    }

    pub fn arb_namespace() -> impl Strategy<Value = Namespace> {
        prop::sample::select(Namespace::ALL.to_vec())
    }

    pub fn arb_reset_mode() -> impl Strategy<Value = ResetMode> {
        prop_oneof![
            Just(ResetMode::PackageDefaults),
            Just(ResetMode::UntrustedDefaults),
            Just(ResetMode::UntrustedChanges),
            Just(ResetMode::TrustedDefaults),
        ]
    }

    /// One step of a cache scenario.
    #[derive(Debug, Clone)]
    pub enum CacheOp {
        /// Read through the cache.
        Get {
            namespace: Namespace,
            name: String,
            user: UserId,
        },
        /// Write through the cache.
        Put {
            namespace: Namespace,
            name: String,
            value: Option<String>,
            user: UserId,
        },
        /// Write directly to the service, as another process would.
        ExternalWrite {
            namespace: Namespace,
            name: String,
            value: Option<String>,
            user: UserId,
        },
        /// Bump a generation with no value change.
        Bump { namespace: Namespace },
        /// Drop the caches' trackers.
        ClearTrackers,
    }

    pub fn arb_cache_op() -> impl Strategy<Value = CacheOp> {
        prop_oneof![
            4 => (arb_namespace(), arb_setting_name(), arb_user())
                .prop_map(|(namespace, name, user)| CacheOp::Get { namespace, name, user }),
            2 => (arb_namespace(), arb_setting_name(), arb_setting_value(), arb_user())
                .prop_map(|(namespace, name, value, user)| CacheOp::Put { namespace, name, value, user }),
            2 => (arb_namespace(), arb_setting_name(), arb_setting_value(), arb_user())
                .prop_map(|(namespace, name, value, user)| CacheOp::ExternalWrite { namespace, name, value, user }),
            1 => arb_namespace().prop_map(|namespace| CacheOp::Bump { namespace }),
            1 => Just(CacheOp::ClearTrackers),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// The user tests run as.
    pub const SELF_USER: UserId = UserId::SYSTEM;

    /// A user other than [`SELF_USER`].
    pub const OTHER_USER: UserId = UserId::new(10);

    /// Install a test-writer tracing subscriber once per test binary.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    /// A fake service for [`SELF_USER`].
    pub fn service() -> Arc<FakeSettingsService> {
        Arc::new(FakeSettingsService::new(SELF_USER))
    }

    /// A fake service pre-loaded with a few global values.
    pub fn seeded_service() -> Arc<FakeSettingsService> {
        let service = service();
        service.insert(Namespace::Global, SELF_USER, "wifi_on", Some("1"));
        service.insert(Namespace::Global, SELF_USER, "adb_enabled", Some("0"));
        service.insert(Namespace::System, SELF_USER, "screen_brightness", Some("102"));
        service.insert(Namespace::Secure, OTHER_USER, "wifi_on", Some("0"));
        service
    }

    /// Config with only the fallback query path enabled.
    pub fn fallback_only_config() -> CacheConfig {
        CacheConfig::default().with_fast_path(false)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for ALMANAC-specific validation.

    use super::*;

    /// Assert that a result is Ok.
    pub fn assert_ok<T: std::fmt::Debug>(result: &AlmanacResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a result is a remote error.
    pub fn assert_remote_error<T: std::fmt::Debug>(result: &AlmanacResult<T>) {
        match result {
            Err(AlmanacError::Remote(_)) => {}
            other => panic!("Expected Remote error, got: {:?}", other),
        }
    }

    /// Assert that a result is a setting error.
    pub fn assert_setting_error<T: std::fmt::Debug>(result: &AlmanacResult<T>) {
        match result {
            Err(AlmanacError::Setting(_)) => {}
            other => panic!("Expected Setting error, got: {:?}", other),
        }
    }

    /// Assert that every handle except the newest is closed.
    pub fn assert_only_newest_handle_open(service: &FakeSettingsService) {
        let handles = service.handles();
        if let Some((newest, older)) = handles.split_last() {
            for (i, handle) in older.iter().enumerate() {
                assert!(handle.is_closed(), "Handle {} should be closed", i);
            }
            assert!(!newest.is_closed(), "Newest handle should be open");
        }
    }
}
