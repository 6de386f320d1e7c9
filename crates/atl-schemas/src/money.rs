//! Integer money representation.
//!
//! Amounts are `i64` in the smallest currency unit (FCFA has no sub-unit, so
//! one unit is one franc). Rates are basis points: 4000 bps = 40%.

/// Amount in the smallest currency unit.
pub type Amount = i64;

/// 100% expressed in basis points.
pub const BPS_DENOMINATOR: i64 = 10_000;

/// `amount * bps / 10_000`, truncated toward zero.
///
/// The intermediate product is computed in `i128` so large prices cannot
/// overflow; the result saturates at the `i64` bounds.
pub fn apply_bps(amount: Amount, bps: i64) -> Amount {
    let v = (amount as i128) * (bps as i128) / (BPS_DENOMINATOR as i128);
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}
