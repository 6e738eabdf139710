use proptest::prelude::*;
use ringprobe_telemetry::{decode_hex_dump, encode_hex_dump, parse_counters, DeviceCounters};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Decoding the encoder's rows recovers the original bytes.
    #[test]
    fn prop_hex_dump_round_trip(
        base in 0usize..0x1_0000,
        bytes in proptest::collection::vec(any::<u8>(), 0..600),
    ) {
        let rows = encode_hex_dump(base, &bytes);
        prop_assert_eq!(decode_hex_dump(&rows), bytes);
    }

    /// The same rows behind a device log prefix decode identically.
    #[test]
    fn prop_hex_dump_tolerates_log_prefix(bytes in proptest::collection::vec(any::<u8>(), 1..200)) {
        let rows: Vec<String> = encode_hex_dump(0, &bytes)
            .into_iter()
            .map(|row| format!("I (4242) CommandSystem: {row}"))
            .collect();
        prop_assert_eq!(decode_hex_dump(&rows), bytes);
    }

    /// `,` and `)` terminators yield identical values for every label.
    #[test]
    fn prop_terminator_variation(
        total in any::<u64>(),
        bursts in any::<u32>(),
        overflows in any::<u32>(),
        dropped in any::<u64>(),
        used in any::<u32>(),
        wraps in any::<u32>(),
    ) {
        let comma = format!(
            "total={total}, bursts={bursts}, overflows={overflows}, dropped={dropped}, used={used}, wraps={wraps},"
        );
        let paren = format!(
            "(total={total}) (bursts={bursts}) (overflows={overflows}) (dropped={dropped}) (used={used}) (wraps={wraps})"
        );
        let a = parse_counters(&[comma]);
        let b = parse_counters(&[paren]);
        prop_assert!(a.ambiguities.is_empty());
        prop_assert!(b.ambiguities.is_empty());
        prop_assert_eq!(a.counters, b.counters);
        prop_assert_eq!(a.counters.total_bytes, Some(total));
        prop_assert_eq!(a.counters.wrap_count, Some(wraps));
    }

    /// Arbitrary text never panics the scanner.
    #[test]
    fn prop_parse_never_panics(lines in proptest::collection::vec(".*", 0..8)) {
        let _ = parse_counters(&lines);
        let _ = decode_hex_dump(&lines);
    }
}

#[test]
fn test_full_stats_response_merges_onto_prior() {
    let lines = [
        "I (9000) CommandSystem: Flash: 5000/49152 bytes (10%), wraps=0",
        "I (9001) CommandSystem: Transport: total=5000, bursts=2, overflows=0",
    ];
    let prior = DeviceCounters {
        dropped_bytes: 12,
        ..Default::default()
    };
    let counters = prior.merge(&parse_counters(&lines).counters);

    assert_eq!(counters.total_bytes, 5000);
    assert_eq!(counters.burst_count, 2);
    assert_eq!(counters.used_bytes, 5000);
    assert_eq!(counters.capacity, Some(49152));
    assert_eq!(counters.wrap_count, 0);
    // Not reported: keeps the prior value instead of resetting to zero.
    assert_eq!(counters.dropped_bytes, 12);
}

#[test]
fn test_read_response_decodes_rows_in_order() {
    let pattern: Vec<u8> = (0..64u32).map(|i| (i % 256) as u8).collect();
    let mut lines = vec!["I (100) CommandSystem: Read 64 bytes at offset 0:".to_string()];
    lines.extend(
        encode_hex_dump(0, &pattern)
            .into_iter()
            .map(|row| format!("I (101) CommandSystem: {row}")),
    );
    assert_eq!(decode_hex_dump(&lines), pattern);
}
