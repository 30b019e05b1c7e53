//! Per-namespace read-through cache.
//!
//! A [`NameValueCache`] answers reads for one namespace of the settings
//! service. Values read for the process's own user are kept locally for as
//! long as the namespace's shared generation counter stays put. Any bump
//! drops every local value; nothing is ever evicted on its own.
//!
//! The state lock is never held across a remote call. A read records the
//! generation it saw before going remote and only stores the answer if the
//! tracker still reports that generation afterwards, so a value fetched
//! across a concurrent change is returned but not kept.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use almanac_core::{
    AlmanacResult, CacheConfig, GenerationValue, GetRequest, ListReply, ListRequest, Namespace,
    PutRequest, RemoteError, RequestScope, ResetMode, ResetRequest, SettingsProvider,
    TrackerMaterials, UserId,
};
use tracing::{debug, error, warn};

use super::generation::{ErrorCallback, GenerationTracker};
use super::read::{ReadSource, SettingRead};
use super::stats::{CacheStats, Counter, StatsRecorder};

/// A tracker together with the flag its error callback raises.
///
/// The callback runs while the state lock is held, so it only records the
/// fault; the cache acts on it the next time it validates the generation.
struct TrackerSlot {
    tracker: GenerationTracker,
    fault: Arc<AtomicBool>,
}

#[derive(Default)]
struct CacheState {
    values: HashMap<String, Option<String>>,
    /// Prefixes fully loaded by a list call under the current generation.
    prefixes: HashSet<String>,
    tracker: Option<TrackerSlot>,
}

impl CacheState {
    fn clear(&mut self) {
        self.values.clear();
        self.prefixes.clear();
    }

    fn generation(&self) -> Option<GenerationValue> {
        self.tracker
            .as_ref()
            .map(|slot| slot.tracker.current_generation())
    }

    fn drop_tracker(&mut self) {
        if let Some(slot) = self.tracker.take() {
            slot.tracker.destroy();
        }
        self.clear();
    }
}

/// Read-through cache for one namespace of the settings service.
pub struct NameValueCache<P: SettingsProvider + ?Sized> {
    namespace: Namespace,
    self_user: UserId,
    provider: Arc<P>,
    config: CacheConfig,
    state: Mutex<CacheState>,
    stats: StatsRecorder,
}

impl<P: SettingsProvider + ?Sized> NameValueCache<P> {
    /// Create a cache for `namespace` in a process running as `self_user`.
    pub fn new(namespace: Namespace, self_user: UserId, provider: Arc<P>, config: CacheConfig) -> Self {
        Self {
            namespace,
            self_user,
            provider,
            config,
            state: Mutex::new(CacheState::default()),
            stats: StatsRecorder::default(),
        }
    }

    pub fn with_defaults(namespace: Namespace, self_user: UserId, provider: Arc<P>) -> Self {
        Self::new(namespace, self_user, provider, CacheConfig::default())
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn self_user(&self) -> UserId {
        self.self_user
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Read `name` for `user`, or `None` if it is unset or could not be read.
    ///
    /// Remote failures are logged and swallowed. Use
    /// [`lookup_for_user`](Self::lookup_for_user) to tell them apart.
    pub fn get_for_user(&self, name: &str, user: UserId) -> Option<String> {
        match self.lookup_for_user(name, user) {
            Ok(read) => read.into_value(),
            Err(e) => {
                warn!(namespace = %self.namespace, name, error = %e, "Can't get key");
                None
            }
        }
    }

    /// Read `name` for `user`, reporting where the answer came from.
    ///
    /// Fails only if every enabled remote path failed.
    pub fn lookup_for_user(&self, name: &str, user: UserId) -> AlmanacResult<SettingRead> {
        let scope = RequestScope::resolve(user, self.self_user);
        let caching = scope.is_self() && self.config.caching_enabled;

        let mut observed = None;
        let mut request_tracker = false;
        if caching {
            let mut state = self.state();
            observed = self.sync_generation(&mut state);
            if let Some(generation) = observed {
                if let Some(value) = state.values.get(name) {
                    self.stats.record(Counter::Hit);
                    return Ok(SettingRead::from_cache(value.clone(), generation));
                }
            }
            request_tracker = self.config.track_generation && state.tracker.is_none();
        }
        if scope.is_self() {
            self.stats.record(Counter::Miss);
        }

        let mut last_error = None;
        if self.config.fast_path_enabled {
            self.stats.record(Counter::FastPathCall);
            let request = GetRequest {
                name: name.to_string(),
                user: scope.wire_user(),
                track_generation: request_tracker,
            };
            match self.provider.call_get(self.namespace, request) {
                Ok(Some(reply)) => {
                    let value = reply.value;
                    let generation = self.complete_read(caching, observed, reply.tracker, |state| {
                        state.values.insert(name.to_string(), value.clone());
                    });
                    return Ok(SettingRead::from_remote(value, ReadSource::FastPath, generation));
                }
                Ok(None) => {
                    warn!(namespace = %self.namespace, name, "Fast path returned no reply, falling back");
                    last_error = Some(RemoteError::communication(
                        self.namespace.get_method(),
                        "empty reply",
                    ));
                }
                Err(e) => {
                    self.stats.record(Counter::RemoteError);
                    warn!(namespace = %self.namespace, name, error = %e, "Fast path get failed, falling back");
                    last_error = Some(e);
                }
            }
        }

        if !self.config.fallback_query_enabled {
            let e = last_error.unwrap_or_else(|| RemoteError::unsupported(self.namespace.get_method()));
            return Err(e.into());
        }

        self.stats.record(Counter::FallbackQuery);
        match self.provider.query(self.namespace, name, scope.wire_user()) {
            Ok(row) => {
                let value = row.filter(|row| row.name == name).and_then(|row| row.value);
                let generation = self.complete_read(caching, observed, None, |state| {
                    state.values.insert(name.to_string(), value.clone());
                });
                Ok(SettingRead::from_remote(value, ReadSource::Fallback, generation))
            }
            Err(e) => {
                self.stats.record(Counter::RemoteError);
                warn!(namespace = %self.namespace, name, error = %e, "Fallback query failed");
                Err(e.into())
            }
        }
    }

    /// Read every set value whose name starts with `prefix`.
    ///
    /// A self-user prefix that was already listed under the current
    /// generation is answered locally.
    pub fn strings_for_prefix_for_user(
        &self,
        prefix: &str,
        user: UserId,
    ) -> AlmanacResult<BTreeMap<String, String>> {
        let scope = RequestScope::resolve(user, self.self_user);
        let caching = scope.is_self() && self.config.caching_enabled;

        let mut observed = None;
        let mut request_tracker = false;
        if caching {
            let mut state = self.state();
            observed = self.sync_generation(&mut state);
            if observed.is_some() && state.prefixes.contains(prefix) {
                self.stats.record(Counter::Hit);
                let values = state
                    .values
                    .iter()
                    .filter(|(name, _)| name.starts_with(prefix))
                    .filter_map(|(name, value)| Some((name.clone(), value.clone()?)))
                    .collect();
                return Ok(values);
            }
            request_tracker = self.config.track_generation && state.tracker.is_none();
        }
        if scope.is_self() {
            self.stats.record(Counter::Miss);
        }

        if !self.config.fast_path_enabled {
            return Err(RemoteError::unsupported(self.namespace.list_method()).into());
        }

        self.stats.record(Counter::ListCall);
        let request = ListRequest {
            prefix: prefix.to_string(),
            user: scope.wire_user(),
            track_generation: request_tracker,
        };
        let ListReply { values, tracker } = self
            .provider
            .call_list(self.namespace, request)
            .map_err(|e| {
                self.stats.record(Counter::RemoteError);
                warn!(namespace = %self.namespace, prefix, error = %e, "Can't list keys");
                e
            })?;

        self.complete_read(caching, observed, tracker, |state| {
            for (name, value) in &values {
                state.values.insert(name.clone(), Some(value.clone()));
            }
            state.prefixes.insert(prefix.to_string());
        });
        Ok(values)
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Write `name` for `user`. `None` clears the setting.
    ///
    /// Local values are left alone; the generation bump that follows a
    /// successful write invalidates them.
    pub fn put_for_user(
        &self,
        name: &str,
        value: Option<&str>,
        tag: Option<&str>,
        make_default: bool,
        user: UserId,
    ) -> bool {
        let request = PutRequest {
            name: name.to_string(),
            value: value.map(str::to_string),
            user,
            tag: tag.map(str::to_string),
            make_default,
        };
        match self.provider.call_put(self.namespace, request) {
            Ok(()) => true,
            Err(e) => {
                self.stats.record(Counter::RemoteError);
                warn!(namespace = %self.namespace, name, error = %e, "Can't set key");
                false
            }
        }
    }

    /// Reset the namespace's values for `user` to their defaults.
    pub fn reset_to_defaults(&self, mode: ResetMode, tag: Option<&str>, user: UserId) -> bool {
        let request = ResetRequest {
            mode,
            tag: tag.map(str::to_string),
            user,
        };
        match self.provider.call_reset(self.namespace, request) {
            Ok(()) => true,
            Err(e) => {
                self.stats.record(Counter::RemoteError);
                warn!(namespace = %self.namespace, ?mode, error = %e, "Can't reset to defaults");
                false
            }
        }
    }

    // ========================================================================
    // INTROSPECTION
    // ========================================================================

    /// Drop the tracker and every local value.
    pub fn clear_generation_tracker_for_test(&self) {
        self.state().drop_tracker();
    }

    pub fn has_generation_tracker(&self) -> bool {
        self.state().tracker.is_some()
    }

    /// Last generation accepted by the tracker, if there is one.
    pub fn current_generation(&self) -> Option<GenerationValue> {
        self.state().generation()
    }

    /// Number of names held locally, including cached unset values.
    pub fn cached_len(&self) -> usize {
        self.state().values.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn state(&self) -> MutexGuard<'_, CacheState> {
        // Every mutation leaves the state consistent, so a panic elsewhere
        // does not invalidate it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring local values in line with the shared generation.
    ///
    /// Returns the generation local values are valid for, or `None` when
    /// there is no usable tracker.
    fn sync_generation(&self, state: &mut CacheState) -> Option<GenerationValue> {
        let (changed, faulted, generation) = {
            let slot = state.tracker.as_mut()?;
            let changed = slot.tracker.is_generation_changed();
            let faulted = slot.fault.swap(false, Ordering::AcqRel);
            (changed, faulted, slot.tracker.current_generation())
        };

        if faulted {
            self.stats.record(Counter::TrackerError);
            error!(namespace = %self.namespace, "Generation tracker failed, reading uncached until a new one is installed");
            state.drop_tracker();
            return None;
        }
        if changed {
            self.stats.record(Counter::Invalidation);
            debug!(namespace = %self.namespace, generation, "Generation changed, dropping local values");
            state.clear();
        }
        Some(generation)
    }

    /// Adopt any tracker materials from a reply and store the answer if the
    /// generation did not move during the call.
    fn complete_read(
        &self,
        caching: bool,
        mut observed: Option<GenerationValue>,
        materials: Option<TrackerMaterials>,
        store: impl FnOnce(&mut CacheState),
    ) -> Option<GenerationValue> {
        if !caching {
            if let Some(materials) = materials {
                self.release(materials);
            }
            return None;
        }

        let mut state = self.state();
        if let Some(materials) = materials {
            if let Some(generation) = self.install_tracker(&mut state, materials) {
                observed = Some(generation);
            }
        }

        let current = state.generation();
        if current.is_some() && current == observed {
            store(&mut state);
            current
        } else {
            None
        }
    }

    fn install_tracker(
        &self,
        state: &mut CacheState,
        materials: TrackerMaterials,
    ) -> Option<GenerationValue> {
        if materials.usable_index().is_none() {
            warn!(
                namespace = %self.namespace,
                index = materials.index,
                len = materials.array.len(),
                "Ignoring generation tracker with unusable index"
            );
            self.release(materials);
            return None;
        }

        let fault = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fault);
        let namespace = self.namespace;
        let on_error: ErrorCallback = Box::new(move |e| {
            error!(namespace = %namespace, error = %e, "Generation array access failed");
            flag.store(true, Ordering::Release);
        });

        let generation = materials.generation;
        let tracker = GenerationTracker::from_materials(materials, Some(on_error))?;
        if let Some(old) = state.tracker.take() {
            old.tracker.destroy();
        }
        state.clear();
        state.tracker = Some(TrackerSlot { tracker, fault });

        self.stats.record(Counter::TrackerInstalled);
        debug!(namespace = %self.namespace, generation, "Generation tracker installed");
        Some(generation)
    }

    fn release(&self, materials: TrackerMaterials) {
        if let Err(e) = materials.array.close() {
            warn!(namespace = %self.namespace, error = %e, "Can't close unused generation array");
        }
    }
}

impl<P: SettingsProvider + ?Sized> Drop for NameValueCache<P> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = state.tracker.take() {
            slot.tracker.destroy();
        }
    }
}

impl<P: SettingsProvider + ?Sized> fmt::Debug for NameValueCache<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameValueCache")
            .field("namespace", &self.namespace)
            .field("self_user", &self.self_user)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almanac_core::{AtomicIntArray, GetReply, MemoryIntArray, QueryRow};
    use std::sync::atomic::AtomicUsize;

    const ME: UserId = UserId::new(0);
    const OTHER: UserId = UserId::new(10);

    /// Single-slot service that bumps its generation on every put.
    #[derive(Default)]
    struct MockService {
        generations: Option<AtomicIntArray>,
        handles: Mutex<Vec<Arc<AtomicIntArray>>>,
        values: Mutex<HashMap<String, String>>,
        get_calls: AtomicUsize,
        query_calls: AtomicUsize,
        fail_get: AtomicBool,
        last_get: Mutex<Option<GetRequest>>,
    }

    impl MockService {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                generations: Some(AtomicIntArray::new(1)),
                ..Default::default()
            })
        }

        fn generations(&self) -> &AtomicIntArray {
            self.generations.as_ref().unwrap()
        }

        fn insert(&self, name: &str, value: &str) {
            self.values
                .lock()
                .unwrap()
                .insert(name.to_string(), value.to_string());
            self.generations().increment(0).unwrap();
        }

        fn handle(&self, i: usize) -> Arc<AtomicIntArray> {
            Arc::clone(&self.handles.lock().unwrap()[i])
        }
    }

    impl SettingsProvider for MockService {
        fn call_get(
            &self,
            namespace: Namespace,
            request: GetRequest,
        ) -> Result<Option<GetReply>, RemoteError> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_get.lock().unwrap() = Some(request.clone());
            if self.fail_get.load(Ordering::SeqCst) {
                return Err(RemoteError::communication(namespace.get_method(), "broken pipe"));
            }
            let generation = self.generations().get(0).unwrap();
            let value = self.values.lock().unwrap().get(&request.name).cloned();
            let mut reply = GetReply::value(value);
            if request.track_generation {
                let handle = Arc::new(self.generations().handle());
                self.handles.lock().unwrap().push(Arc::clone(&handle));
                reply = reply.with_tracker(TrackerMaterials::new(handle, 0, generation));
            }
            Ok(Some(reply))
        }

        fn call_put(&self, _namespace: Namespace, request: PutRequest) -> Result<(), RemoteError> {
            match request.value {
                Some(value) => self.insert(&request.name, &value),
                None => {
                    self.values.lock().unwrap().remove(&request.name);
                    self.generations().increment(0).unwrap();
                }
            }
            Ok(())
        }

        fn query(
            &self,
            _namespace: Namespace,
            name: &str,
            _user: Option<UserId>,
        ) -> Result<Option<QueryRow>, RemoteError> {
            self.query_calls.fetch_add(1, Ordering::SeqCst);
            let value = self.values.lock().unwrap().get(name).cloned();
            Ok(value.map(|value| QueryRow {
                name: name.to_string(),
                value: Some(value),
            }))
        }
    }

    fn cache(service: &Arc<MockService>) -> NameValueCache<MockService> {
        NameValueCache::with_defaults(Namespace::Global, ME, Arc::clone(service))
    }

    #[test]
    fn test_second_read_is_served_locally() {
        let service = MockService::new();
        service.generations().set(0, 5).unwrap();
        service
            .values
            .lock()
            .unwrap()
            .insert("wifi_on".to_string(), "1".to_string());
        let cache = cache(&service);

        assert_eq!(cache.get_for_user("wifi_on", ME).as_deref(), Some("1"));
        assert_eq!(cache.current_generation(), Some(5));

        let read = cache.lookup_for_user("wifi_on", ME).unwrap();
        assert!(read.was_cache_hit());
        assert_eq!(read.value(), Some("1"));
        assert_eq!(service.get_calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.trackers_installed, 1);
    }

    #[test]
    fn test_unset_values_are_cached_too() {
        let service = MockService::new();
        let cache = cache(&service);

        assert_eq!(cache.get_for_user("missing", ME), None);
        assert_eq!(cache.get_for_user("missing", ME), None);
        assert_eq!(service.get_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.cached_len(), 1);
    }

    #[test]
    fn test_generation_bump_invalidates() {
        let service = MockService::new();
        service.insert("volume", "3");
        let cache = cache(&service);

        assert_eq!(cache.get_for_user("volume", ME).as_deref(), Some("3"));
        assert!(cache.put_for_user("volume", Some("7"), None, false, ME));

        assert_eq!(cache.get_for_user("volume", ME).as_deref(), Some("7"));
        assert_eq!(service.get_calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().invalidations, 1);
        // Only the first read asked for a tracker.
        let last = service.last_get.lock().unwrap().clone().unwrap();
        assert!(!last.track_generation);
    }

    #[test]
    fn test_foreign_reads_are_never_cached() {
        let service = MockService::new();
        service.insert("volume", "3");
        let cache = cache(&service);

        assert_eq!(cache.get_for_user("volume", OTHER).as_deref(), Some("3"));
        assert_eq!(cache.get_for_user("volume", OTHER).as_deref(), Some("3"));

        assert_eq!(service.get_calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.cached_len(), 0);
        assert!(!cache.has_generation_tracker());
        let last = service.last_get.lock().unwrap().clone().unwrap();
        assert_eq!(last.user, Some(OTHER));
        assert!(!last.track_generation);
    }

    #[test]
    fn test_tracker_fault_tears_down_and_reacquires() {
        let service = MockService::new();
        service.insert("volume", "3");
        let cache = cache(&service);

        cache.get_for_user("volume", ME);
        service.handle(0).close().unwrap();

        assert_eq!(cache.get_for_user("volume", ME).as_deref(), Some("3"));
        let stats = cache.stats();
        assert_eq!(stats.tracker_errors, 1);
        assert_eq!(stats.trackers_installed, 2);
        assert_eq!(service.get_calls.load(Ordering::SeqCst), 2);
        assert!(cache.has_generation_tracker());
    }

    #[test]
    fn test_fast_path_failure_uses_fallback_once() {
        let service = MockService::new();
        service.insert("volume", "3");
        service.fail_get.store(true, Ordering::SeqCst);
        let cache = cache(&service);

        let read = cache.lookup_for_user("volume", ME).unwrap();
        assert_eq!(read.source(), ReadSource::Fallback);
        assert_eq!(read.value(), Some("3"));
        assert_eq!(service.query_calls.load(Ordering::SeqCst), 1);
        // Without a tracker nothing is kept.
        assert_eq!(cache.cached_len(), 0);
        assert_eq!(cache.stats().remote_errors, 1);
    }

    #[test]
    fn test_lookup_reports_failure_without_fallback() {
        let service = MockService::new();
        service.fail_get.store(true, Ordering::SeqCst);
        let cache = NameValueCache::new(
            Namespace::Global,
            ME,
            Arc::clone(&service),
            CacheConfig::default().with_fallback_query(false),
        );

        assert!(cache.lookup_for_user("volume", ME).is_err());
        assert_eq!(cache.get_for_user("volume", ME), None);
        assert_eq!(service.query_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_caching_disabled_goes_remote_every_time() {
        let service = MockService::new();
        service.insert("volume", "3");
        let cache = NameValueCache::new(
            Namespace::Global,
            ME,
            Arc::clone(&service),
            CacheConfig::default()
                .with_caching(false)
                .with_generation_tracking(false),
        );

        cache.get_for_user("volume", ME);
        cache.get_for_user("volume", ME);
        assert_eq!(service.get_calls.load(Ordering::SeqCst), 2);
        assert!(!cache.has_generation_tracker());
    }

    #[test]
    fn test_clear_generation_tracker_for_test() {
        let service = MockService::new();
        service.insert("volume", "3");
        let cache = cache(&service);

        cache.get_for_user("volume", ME);
        cache.clear_generation_tracker_for_test();

        assert!(!cache.has_generation_tracker());
        assert_eq!(cache.cached_len(), 0);
        assert!(service.handle(0).is_closed());
    }

    #[test]
    fn test_drop_closes_tracker() {
        let service = MockService::new();
        {
            let cache = cache(&service);
            cache.get_for_user("volume", ME);
        }
        assert!(service.handle(0).is_closed());
        assert!(!service.generations().is_closed());
    }
}
