//! Packet fingerprint
//!
//! A deliberately tunable amount of work per admitted packet: the seed is
//! run through a 48-bit linear congruential generator and the result is
//! folded into a 16-bit histogram bucket.

const MULTIPLIER: i64 = 0x5_DEEC_E66D;
const ADDEND: i64 = 0xB;
const MASK: i64 = (1 << 48) - 1;

/// Number of distinct fingerprint values
pub const HISTOGRAM_BUCKETS: usize = 1 << 16;

/// Fingerprint bucket of a packet with the given seed and work factor
#[inline]
pub fn fingerprint(seed: i64, iterations: u32) -> usize {
    let mut state = seed;
    for _ in 0..iterations {
        state = state.wrapping_mul(MULTIPLIER).wrapping_add(ADDEND) & MASK;
    }
    ((state >> 12) & 0xFFFF) as usize
}
