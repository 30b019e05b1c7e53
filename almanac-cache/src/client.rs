//! Process-wide settings access.
//!
//! [`SettingsClient`] owns one [`NameValueCache`] per namespace, all talking
//! to the same provider on behalf of the same process user. It is built
//! once and passed to whatever needs settings; there is no global instance.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use almanac_core::{
    AlmanacResult, CacheConfig, Namespace, ResetMode, SettingError, SettingsProvider, UserId,
};
use tracing::debug;

use crate::cache::{CacheStats, NameValueCache};

/// Typed access to every namespace of the settings service.
pub struct SettingsClient<P: SettingsProvider + ?Sized> {
    self_user: UserId,
    system: NameValueCache<P>,
    secure: NameValueCache<P>,
    global: NameValueCache<P>,
    config: NameValueCache<P>,
}

impl<P: SettingsProvider + ?Sized> SettingsClient<P> {
    /// Build a client for a process running as `self_user`.
    ///
    /// Fails if `config` does not validate.
    pub fn new(provider: Arc<P>, self_user: UserId, config: CacheConfig) -> AlmanacResult<Self> {
        config.validate()?;
        debug!(user = %self_user, ?config, "Creating settings client");

        let cache = |namespace| {
            NameValueCache::new(namespace, self_user, Arc::clone(&provider), config.clone())
        };
        Ok(Self {
            self_user,
            system: cache(Namespace::System),
            secure: cache(Namespace::Secure),
            global: cache(Namespace::Global),
            config: cache(Namespace::Config),
        })
    }

    pub fn with_defaults(provider: Arc<P>, self_user: UserId) -> AlmanacResult<Self> {
        Self::new(provider, self_user, CacheConfig::default())
    }

    pub fn self_user(&self) -> UserId {
        self.self_user
    }

    /// The cache serving `namespace`.
    pub fn cache(&self, namespace: Namespace) -> &NameValueCache<P> {
        match namespace {
            Namespace::System => &self.system,
            Namespace::Secure => &self.secure,
            Namespace::Global => &self.global,
            Namespace::Config => &self.config,
        }
    }

    /// Statistics of every cache, in namespace order.
    pub fn stats(&self) -> Vec<(Namespace, CacheStats)> {
        Namespace::ALL
            .iter()
            .map(|ns| (*ns, self.cache(*ns).stats()))
            .collect()
    }

    // === Strings ===

    pub fn get_string(&self, namespace: Namespace, name: &str) -> Option<String> {
        self.get_string_for_user(namespace, name, self.self_user)
    }

    pub fn get_string_for_user(&self, namespace: Namespace, name: &str, user: UserId) -> Option<String> {
        self.cache(namespace).get_for_user(name, user)
    }

    /// Write a string. `None` clears the setting.
    pub fn put_string(&self, namespace: Namespace, name: &str, value: Option<&str>) -> bool {
        self.put_string_for_user(namespace, name, value, self.self_user)
    }

    pub fn put_string_for_user(
        &self,
        namespace: Namespace,
        name: &str,
        value: Option<&str>,
        user: UserId,
    ) -> bool {
        self.cache(namespace)
            .put_for_user(name, value, None, false, user)
    }

    /// Every set value in `namespace` whose name starts with `prefix`.
    pub fn strings_for_prefix(
        &self,
        namespace: Namespace,
        prefix: &str,
    ) -> AlmanacResult<BTreeMap<String, String>> {
        self.cache(namespace)
            .strings_for_prefix_for_user(prefix, self.self_user)
    }

    // === Numbers with defaults ===

    /// Read an integer, or `default` if it is unset or not a number.
    pub fn get_int(&self, namespace: Namespace, name: &str, default: i32) -> i32 {
        self.parse_or(namespace, name, default)
    }

    pub fn get_long(&self, namespace: Namespace, name: &str, default: i64) -> i64 {
        self.parse_or(namespace, name, default)
    }

    pub fn get_float(&self, namespace: Namespace, name: &str, default: f32) -> f32 {
        self.parse_or(namespace, name, default)
    }

    /// Booleans are stored as integers; anything non-zero is `true`.
    pub fn get_bool(&self, namespace: Namespace, name: &str, default: bool) -> bool {
        self.get_int(namespace, name, i32::from(default)) != 0
    }

    // === Strict numbers ===

    pub fn get_int_strict(&self, namespace: Namespace, name: &str) -> AlmanacResult<i32> {
        self.parse_strict(namespace, name)
    }

    pub fn get_long_strict(&self, namespace: Namespace, name: &str) -> AlmanacResult<i64> {
        self.parse_strict(namespace, name)
    }

    pub fn get_float_strict(&self, namespace: Namespace, name: &str) -> AlmanacResult<f32> {
        self.parse_strict(namespace, name)
    }

    // === Typed writes ===

    pub fn put_int(&self, namespace: Namespace, name: &str, value: i32) -> bool {
        self.put_string(namespace, name, Some(&value.to_string()))
    }

    pub fn put_long(&self, namespace: Namespace, name: &str, value: i64) -> bool {
        self.put_string(namespace, name, Some(&value.to_string()))
    }

    pub fn put_float(&self, namespace: Namespace, name: &str, value: f32) -> bool {
        self.put_string(namespace, name, Some(&value.to_string()))
    }

    pub fn put_bool(&self, namespace: Namespace, name: &str, value: bool) -> bool {
        self.put_int(namespace, name, i32::from(value))
    }

    /// Reset the process user's values in `namespace` to their defaults.
    pub fn reset_to_defaults(&self, namespace: Namespace, mode: ResetMode, tag: Option<&str>) -> bool {
        self.cache(namespace)
            .reset_to_defaults(mode, tag, self.self_user)
    }

    /// Drop every cache's tracker and local values.
    pub fn clear_generation_trackers_for_test(&self) {
        for ns in Namespace::ALL {
            self.cache(ns).clear_generation_tracker_for_test();
        }
    }

    fn parse_or<T: FromStr>(&self, namespace: Namespace, name: &str, default: T) -> T {
        self.get_string(namespace, name)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }

    fn parse_strict<T>(&self, namespace: Namespace, name: &str) -> AlmanacResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let read = self.cache(namespace).lookup_for_user(name, self.self_user)?;
        let value = read.into_value().ok_or_else(|| SettingError::NotFound {
            namespace,
            name: name.to_string(),
        })?;
        value.parse().map_err(|e: T::Err| {
            SettingError::InvalidNumber {
                name: name.to_string(),
                reason: e.to_string(),
                value,
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almanac_core::{AlmanacError, ConfigError, MemoryIntArray};
    use almanac_test_utils::fixtures::{seeded_service, service, OTHER_USER, SELF_USER};
    use almanac_test_utils::FakeSettingsService;

    fn client(service: &Arc<FakeSettingsService>) -> SettingsClient<FakeSettingsService> {
        SettingsClient::with_defaults(Arc::clone(service), SELF_USER).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = CacheConfig::default()
            .with_fast_path(false)
            .with_fallback_query(false);
        let result = SettingsClient::new(service(), SELF_USER, config);
        assert!(matches!(result, Err(AlmanacError::Config(ConfigError::InvalidValue { .. }))));
    }

    #[test]
    fn test_namespaces_are_independent() {
        let service = seeded_service();
        let client = client(&service);

        assert_eq!(client.get_string(Namespace::Global, "wifi_on").as_deref(), Some("1"));
        assert_eq!(client.get_string(Namespace::Secure, "wifi_on"), None);
        assert_eq!(
            client
                .get_string_for_user(Namespace::Secure, "wifi_on", OTHER_USER)
                .as_deref(),
            Some("0")
        );
        assert_eq!(client.cache(Namespace::Config).cached_len(), 0);
    }

    #[test]
    fn test_typed_reads_with_defaults() {
        let service = seeded_service();
        service.insert(Namespace::System, SELF_USER, "font_scale", Some("1.15"));
        service.insert(Namespace::System, SELF_USER, "ringtone", Some("bell"));
        let client = client(&service);

        assert_eq!(client.get_int(Namespace::System, "screen_brightness", 0), 102);
        assert_eq!(client.get_long(Namespace::System, "screen_brightness", 0), 102);
        assert_eq!(client.get_int(Namespace::System, "missing", 7), 7);
        assert_eq!(client.get_int(Namespace::System, "ringtone", -1), -1);
        assert!((client.get_float(Namespace::System, "font_scale", 1.0) - 1.15).abs() < 1e-6);

        assert!(client.get_bool(Namespace::Global, "wifi_on", false));
        assert!(!client.get_bool(Namespace::Global, "adb_enabled", true));
        assert!(client.get_bool(Namespace::Global, "missing", true));
    }

    #[test]
    fn test_strict_reads_report_errors() {
        let service = seeded_service();
        service.insert(Namespace::System, SELF_USER, "ringtone", Some("bell"));
        let client = client(&service);

        assert_eq!(client.get_int_strict(Namespace::System, "screen_brightness").unwrap(), 102);
        assert!(matches!(
            client.get_int_strict(Namespace::System, "missing"),
            Err(AlmanacError::Setting(SettingError::NotFound { .. }))
        ));
        match client.get_long_strict(Namespace::System, "ringtone") {
            Err(AlmanacError::Setting(SettingError::InvalidNumber { name, value, .. })) => {
                assert_eq!(name, "ringtone");
                assert_eq!(value, "bell");
            }
            other => panic!("Expected InvalidNumber, got: {:?}", other),
        }
    }

    #[test]
    fn test_typed_writes_round_trip_through_service() {
        let service = service();
        let client = client(&service);

        assert!(client.put_int(Namespace::Secure, "lock_timeout", 30));
        assert!(client.put_bool(Namespace::Secure, "adb_enabled", true));
        assert!(client.put_float(Namespace::Secure, "font_scale", 0.5));

        assert_eq!(
            service.value(Namespace::Secure, SELF_USER, "adb_enabled").as_deref(),
            Some("1")
        );
        assert_eq!(client.get_int(Namespace::Secure, "lock_timeout", 0), 30);
        assert!((client.get_float_strict(Namespace::Secure, "font_scale").unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_reset_to_defaults_uses_self_user() {
        let service = service();
        let client = client(&service);

        assert!(client.reset_to_defaults(Namespace::Global, ResetMode::TrustedDefaults, None));
        assert_eq!(service.call_counts().reset, 1);
    }

    #[test]
    fn test_clear_generation_trackers_for_test() {
        let service = seeded_service();
        let client = client(&service);

        client.get_string(Namespace::Global, "wifi_on");
        client.get_string(Namespace::System, "screen_brightness");
        assert!(client.cache(Namespace::Global).has_generation_tracker());

        client.clear_generation_trackers_for_test();
        for ns in Namespace::ALL {
            assert!(!client.cache(ns).has_generation_tracker());
        }
        assert!(service.handles().iter().all(|h| h.is_closed()));
    }
}
