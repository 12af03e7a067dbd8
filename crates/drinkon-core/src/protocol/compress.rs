//! 4-in-3 packing used by the log characteristic.
//!
//! Four 6-bit samples share three bytes. The low six bits of each byte
//! carry samples 0..2; the two high bits of each byte together carry
//! sample 3 (byte 0 → bits 0-1, byte 1 → bits 2-3, byte 2 → bits 4-5).

use super::constants::LOG_SAMPLE_MAX;

/// Unpack three bytes into four 6-bit samples.
pub fn decompress423(packed: [u8; 3]) -> [u8; 4] {
    let [b0, b1, b2] = packed;
    [
        b0 & 0x3F,
        b1 & 0x3F,
        b2 & 0x3F,
        ((b0 >> 6) & 0x03) | ((b1 >> 4) & 0x0C) | ((b2 >> 2) & 0x30),
    ]
}

/// Pack four samples into three bytes.
///
/// Returns `None` if any sample exceeds six bits.
pub fn compress423(samples: [u8; 4]) -> Option<[u8; 3]> {
    if samples.iter().any(|&s| s > LOG_SAMPLE_MAX) {
        return None;
    }
    let [v0, v1, v2, v3] = samples;
    Some([
        v0 | ((v3 & 0x03) << 6),
        v1 | ((v3 & 0x0C) << 4),
        v2 | ((v3 & 0x30) << 2),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fourth(b: [u8; 3]) -> u8 {
        ((b[0] >> 6) & 0x3) | ((b[1] >> 4) & 0xC) | ((b[2] >> 2) & 0x30)
    }

    #[test]
    fn test_decompress_low_values() {
        let b = [0x01, 0x02, 0x03];
        assert_eq!(decompress423(b), [1, 2, 3, fourth(b)]);
        assert_eq!(decompress423(b)[3], 0);
    }

    #[test]
    fn test_decompress_all_zero() {
        assert_eq!(decompress423([0, 0, 0]), [0, 0, 0, 0]);
    }

    #[test]
    fn test_decompress_all_ones() {
        assert_eq!(decompress423([0xFF, 0xFF, 0xFF]), [63, 63, 63, 63]);
    }

    #[test]
    fn test_decompress_high_bits_only() {
        // 0b11 from byte 0, 0b01 from byte 1, 0b10 from byte 2
        let b = [0xC0, 0x40, 0x80];
        assert_eq!(decompress423(b), [0, 0, 0, 0x27]);
        assert_eq!(decompress423(b)[3], fourth(b));
    }

    #[test]
    fn test_decompress_mixed() {
        let b = [0x9A, 0x7C, 0xE5];
        let out = decompress423(b);
        assert_eq!(out[0], 0x1A);
        assert_eq!(out[1], 0x3C);
        assert_eq!(out[2], 0x25);
        assert_eq!(out[3], fourth(b));
    }

    #[test]
    fn test_compress_inverts_decompress() {
        for n in 0u32..1 << 24 {
            let [b0, b1, b2, _] = n.to_le_bytes();
            let b = [b0, b1, b2];
            assert_eq!(compress423(decompress423(b)), Some(b), "triple {:02X?}", b);
        }
    }

    #[test]
    fn test_compress_rejects_wide_sample() {
        assert_eq!(compress423([1, 2, 3, 64]), None);
        assert_eq!(compress423([64, 0, 0, 0]), None);
    }
}
