//! Common Utilities
//!
//! Integer helpers used by the resource allocation code

/// Integer division rounding towards positive infinity
pub fn ceil_div(num: u32, den: u32) -> u32 {
    (num + den - 1) / den
}

/// Smallest `b` such that `2^b >= n` (0 for n <= 1)
pub fn ceil_log2(n: u64) -> u32 {
    if n <= 1 {
        return 0;
    }
    u64::BITS - (n - 1).leading_zeros()
}
