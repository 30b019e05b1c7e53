//! Property-Based Tests for Cache Coherence
//!
//! **Property: Cache Coherence**
//!
//! For any interleaving of reads, writes through the cache, writes by other
//! processes, bare generation bumps and tracker resets, every read SHALL
//! return exactly what the service holds at that moment, and a repeated
//! self-user read with no intervening change SHALL NOT reach the service.
//!
//! **Property: Tracker Ownership**
//!
//! At any point each cache holds at most one open generation array handle.

use std::sync::Arc;

use almanac_cache::SettingsClient;
use almanac_core::{MemoryIntArray, Namespace};
use almanac_test_utils::fixtures::{service, SELF_USER};
use almanac_test_utils::generators::{arb_cache_op, CacheOp};
use almanac_test_utils::FakeSettingsService;
use proptest::prelude::*;

fn client(service: &Arc<FakeSettingsService>) -> SettingsClient<FakeSettingsService> {
    SettingsClient::with_defaults(Arc::clone(service), SELF_USER)
        .expect("default config is valid")
}

fn open_handles(service: &FakeSettingsService) -> usize {
    service.handles().iter().filter(|h| !h.is_closed()).count()
}

fn trackers(client: &SettingsClient<FakeSettingsService>) -> usize {
    Namespace::ALL
        .iter()
        .filter(|ns| client.cache(**ns).has_generation_tracker())
        .count()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_reads_match_service(ops in prop::collection::vec(arb_cache_op(), 1..60)) {
        let service = service();
        let client = client(&service);

        for op in ops {
            match op {
                CacheOp::Get { namespace, name, user } => {
                    let expected = service.value(namespace, user, &name);
                    let got = client.get_string_for_user(namespace, &name, user);
                    prop_assert_eq!(&got, &expected, "read of {}/{} for {}", namespace, name, user);

                    if user == SELF_USER {
                        let before = service.call_counts();
                        let again = client.get_string_for_user(namespace, &name, user);
                        prop_assert_eq!(again, expected);
                        prop_assert_eq!(service.call_counts(), before, "repeat read went remote");
                    }
                }
                CacheOp::Put { namespace, name, value, user } => {
                    prop_assert!(client.put_string_for_user(namespace, &name, value.as_deref(), user));
                    prop_assert_eq!(service.value(namespace, user, &name), value);
                }
                CacheOp::ExternalWrite { namespace, name, value, user } => {
                    service.insert(namespace, user, &name, value.as_deref());
                }
                CacheOp::Bump { namespace } => {
                    service.bump_generation(namespace);
                }
                CacheOp::ClearTrackers => {
                    client.clear_generation_trackers_for_test();
                }
            }

            prop_assert_eq!(open_handles(&service), trackers(&client));
        }
    }

    #[test]
    fn prop_foreign_reads_never_populate_cache(ops in prop::collection::vec(arb_cache_op(), 1..40)) {
        let service = service();
        let client = client(&service);

        for op in ops {
            if let CacheOp::Get { namespace, name, user } = op {
                if user != SELF_USER {
                    let before = client.cache(namespace).cached_len();
                    client.get_string_for_user(namespace, &name, user);
                    prop_assert_eq!(client.cache(namespace).cached_len(), before);
                }
            }
        }
    }
}
