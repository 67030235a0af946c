//! Start and Length Indicator Value (SLIV) codec
//!
//! Implements the joint (start, length) encoding used by resource allocation type 1
//! (RIV, 3GPP TS 38.214 5.1.2.2.2 and 6.1.2.2.2) and by the time domain allocation
//! tables (SLIV, TS 38.214 5.1.2.1 and 6.1.2.1).
//!
//! The encoding domain `N` is a `NonZeroU32`, so a zero-width BWP or CORESET cannot
//! reach the division below.

use common::utils::ceil_log2;
use std::num::NonZeroU32;

/// Number of OFDM symbols in a slot with normal cyclic prefix
pub const NSYMB_PER_SLOT_NR: NonZeroU32 = match NonZeroU32::new(14) {
    Some(n) => n,
    None => unreachable!(),
};

/// Decode `value` over a domain of `n` units into `(start, length)`
pub fn sliv_to_s_and_l(n: NonZeroU32, value: u32) -> (u32, u32) {
    let n = n.get();
    let low = value % n;
    let high = value / n;

    if high + 1 + low <= n {
        (low, high + 1)
    } else {
        (n - 1 - low, n - high + 1)
    }
}

/// Encode `(start, length)` over a domain of `n` units
///
/// The caller guarantees `length >= 1` and `start + length <= n`; outside that domain
/// the value does not decode back to the same interval.
pub fn s_and_l_to_sliv(n: NonZeroU32, start: u32, length: u32) -> u32 {
    debug_assert!(length >= 1, "SLIV length must be at least 1");
    debug_assert!(start + length <= n.get(), "SLIV interval exceeds domain");

    let n = n.get();
    if length - 1 <= n / 2 {
        n * (length - 1) + start
    } else {
        n * (n - length + 1) + (n - 1 - start)
    }
}

/// Frequency domain resource assignment for resource allocation type 1
pub fn ra_type1_riv(nof_prb: NonZeroU32, start_rb: u32, nof_rb: u32) -> u32 {
    s_and_l_to_sliv(nof_prb, start_rb, nof_rb)
}

/// Size in bits of the type 1 frequency domain field, `ceil(log2(N(N+1)/2))`
pub fn riv_nof_bits(nof_prb: NonZeroU32) -> u32 {
    let n = nof_prb.get() as u64;
    ceil_log2(n * (n + 1) / 2)
}

/// SLIV of a PDSCH/PUSCH symbol allocation within one slot
pub fn time_sliv(start_symbol: u32, nof_symbols: u32) -> u32 {
    s_and_l_to_sliv(NSYMB_PER_SLOT_NR, start_symbol, nof_symbols)
}

/// Start symbol and number of symbols of a time domain SLIV
pub fn time_sliv_to_s_and_l(sliv: u32) -> (u32, u32) {
    sliv_to_s_and_l(NSYMB_PER_SLOT_NR, sliv)
}
