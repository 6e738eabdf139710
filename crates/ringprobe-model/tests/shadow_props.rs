use proptest::prelude::*;
use ringprobe_model::{pattern, ShadowLog};
use ringprobe_telemetry::DeviceCounters;

fn counters(used: usize, wraps: u32) -> DeviceCounters {
    DeviceCounters {
        used_bytes: used as u32,
        wrap_count: wraps,
        total_bytes: used as u64,
        ..Default::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Without a wrap, the window is everything injected.
    #[test]
    fn prop_no_wrap_identity(
        bytes in proptest::collection::vec(any::<u8>(), 0..2048),
        slack in 0usize..512,
    ) {
        let mut shadow = ShadowLog::new(bytes.len() + slack);
        shadow.append(&bytes);
        let window = shadow.visible_window(&counters(bytes.len(), 0)).unwrap();
        prop_assert_eq!(window, bytes.as_slice());
    }

    /// After a wrap, the window is the last `capacity` bytes.
    #[test]
    fn prop_wrap_keeps_last_capacity_bytes(
        capacity in 1usize..512,
        extra in 1usize..2048,
        chunk in 1usize..97,
        wraps in 1u32..8,
    ) {
        let total = capacity + extra;
        let all = pattern(total, 7);
        let mut shadow = ShadowLog::new(capacity);
        for piece in all.chunks(chunk) {
            shadow.append(piece);
        }
        prop_assert_eq!(shadow.cursor(), total as u64);

        let window = shadow.visible_window(&counters(capacity, wraps)).unwrap();
        prop_assert_eq!(window, &all[total - capacity..]);
    }

    /// Every in-range slice is the matching piece of the window.
    #[test]
    fn prop_expected_slice_matches_window(
        len in 64usize..1024,
        offset_seed in any::<usize>(),
    ) {
        let mut shadow = ShadowLog::new(4096);
        shadow.append(&pattern(len, 0));
        let c = counters(len, 0);
        let offset = offset_seed % (len - 64 + 1);
        let slice = shadow.expected_slice(offset, 64, &c).unwrap();
        prop_assert_eq!(slice, &shadow.visible_window(&c).unwrap()[offset..offset + 64]);
    }
}

#[test]
fn test_history_is_retained_after_overwrite() {
    let mut shadow = ShadowLog::new(100);
    shadow.append(&pattern(1000, 0));
    let window = shadow.visible_window(&counters(100, 9)).unwrap();
    assert_eq!(window.len(), 100);
    assert_eq!(shadow.history().len(), 1000);
    assert_eq!(shadow.history()[..64], pattern(64, 0)[..]);
}

#[test]
fn test_adopted_capacity_changes_window() {
    let mut shadow = ShadowLog::new(49152);
    shadow.append(&pattern(70_000, 0));
    shadow.set_capacity(65536);
    let window = shadow.visible_window(&counters(65536, 1)).unwrap();
    assert_eq!(window.len(), 65536);
    assert_eq!(window[0], pattern(70_000, 0)[70_000 - 65536]);
}
