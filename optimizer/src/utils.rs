//! Shared numeric helpers for the optimization passes.

use model::Type;

/// Check if a number is a positive power of two
#[inline]
pub fn is_power_of_two(n: i64) -> bool {
    n > 0 && (n & (n - 1)) == 0
}

/// Compute log2 of a power of two
#[inline]
pub fn log2(n: i64) -> u32 {
    debug_assert!(is_power_of_two(n));
    63 - n.leading_zeros()
}

/// Wrap a raw 64-bit result to the value range of `ty`: truncate to the
/// type's width, then sign- or zero-extend back to i64 storage.
pub fn truncate(ty: &Type, raw: i64) -> i64 {
    let bits = ty.bit_width();
    if bits == 0 || bits >= 64 {
        return raw;
    }
    let mask = (1i64 << bits) - 1;
    let low = raw & mask;
    if ty.is_signed() && (low >> (bits - 1)) & 1 == 1 {
        low | !mask
    } else {
        low
    }
}

/// Reinterpret a stored i64 as the unsigned value of `ty`.
pub fn as_unsigned(ty: &Type, v: i64) -> u64 {
    let bits = ty.bit_width();
    if bits == 0 || bits >= 64 {
        v as u64
    } else {
        (v as u64) & ((1u64 << bits) - 1)
    }
}
