/// Test payload: byte `i` is `(i + offset) % 256`.
///
/// Periodic with period 256, so two reads 256 bytes apart look the same.
/// Use [`stream_pattern`] for data the shadow log has to locate.
pub fn pattern(len: usize, offset: u64) -> Vec<u8> {
    (0..len as u64)
        .map(|i| (i.wrapping_add(offset) % 256) as u8)
        .collect()
}

/// Byte at absolute stream position `pos`.
///
/// Each 256-byte block is the `pos % 256` ramp shifted by a per-block
/// Fibonacci hash, so a read displaced by a multiple of 256 no longer
/// matches. Block 0 has no shift and starts like [`pattern`]; every later
/// block has a non-zero one.
pub fn stream_byte(pos: u64) -> u8 {
    let block = pos / 256;
    let shift = match block {
        0 => 0,
        _ => 1 + ((block.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 56) % 255) as u8,
    };
    (pos as u8).wrapping_add(shift)
}

/// `len` bytes of the stream starting at absolute position `offset`.
pub fn stream_pattern(len: usize, offset: u64) -> Vec<u8> {
    (0..len as u64)
        .map(|i| stream_byte(offset.wrapping_add(i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_from_zero() {
        let p = pattern(300, 0);
        assert_eq!(p[0], 0);
        assert_eq!(p[255], 255);
        assert_eq!(p[256], 0);
    }

    #[test]
    fn test_pattern_offset_continues_sequence() {
        let joined: Vec<u8> = [pattern(1000, 0), pattern(4000, 1000)].concat();
        assert_eq!(joined, pattern(5000, 0));
    }

    #[test]
    fn test_stream_chunks_join_seamlessly() {
        let joined: Vec<u8> = [stream_pattern(1024, 0), stream_pattern(4096, 1024)].concat();
        assert_eq!(joined, stream_pattern(5120, 0));
        assert_eq!(stream_pattern(64, 0), pattern(64, 0));
    }

    #[test]
    fn test_stream_differs_at_block_multiples() {
        let head = stream_pattern(64, 0);
        for blocks in 1..=1024u64 {
            assert_ne!(stream_pattern(64, blocks * 256), head, "block {blocks}");
        }
    }
}
