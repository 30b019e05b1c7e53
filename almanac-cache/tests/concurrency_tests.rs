//! Concurrent readers racing a writer on OS threads.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use almanac_cache::SettingsClient;
use almanac_core::{MemoryIntArray, Namespace};
use almanac_test_utils::fixtures::{init_tracing, service, SELF_USER};

const WRITES: i32 = 200;
const READERS: usize = 4;
const READS_PER_READER: usize = 500;

#[test]
fn test_readers_only_see_written_values() {
    init_tracing();
    let service = service();
    service.insert(Namespace::Global, SELF_USER, "volume", Some("0"));
    let client = SettingsClient::with_defaults(Arc::clone(&service), SELF_USER).unwrap();

    let written: HashSet<String> = (0..=WRITES).map(|v| v.to_string()).collect();

    thread::scope(|scope| {
        scope.spawn(|| {
            for v in 1..=WRITES {
                service.insert(Namespace::Global, SELF_USER, "volume", Some(&v.to_string()));
            }
        });

        for _ in 0..READERS {
            scope.spawn(|| {
                for _ in 0..READS_PER_READER {
                    let value = client
                        .get_string(Namespace::Global, "volume")
                        .expect("volume is always set");
                    assert!(written.contains(&value), "unexpected value {value}");
                }
            });
        }
    });

    // Once the writer is done, every reader converges on the last value.
    let expected = WRITES.to_string();
    assert_eq!(client.get_string(Namespace::Global, "volume"), Some(expected.clone()));
    assert_eq!(client.get_int(Namespace::Global, "volume", -1), WRITES);
    assert!(client.cache(Namespace::Global).has_generation_tracker());
}

#[test]
fn test_concurrent_tracker_acquisition_keeps_one_open_handle() {
    init_tracing();
    let service = service();
    service.insert(Namespace::System, SELF_USER, "screen_brightness", Some("102"));
    let client = SettingsClient::with_defaults(Arc::clone(&service), SELF_USER).unwrap();

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..50 {
                    assert_eq!(client.get_int(Namespace::System, "screen_brightness", 0), 102);
                }
            });
        }
    });

    let open = service
        .handles()
        .iter()
        .filter(|h| !h.is_closed())
        .count();
    assert_eq!(open, 1);
}
