//! Minor-unit money arithmetic.
//!
//! Every stored amount is an integer in minor currency units (cents for
//! USD). Fractional-cent rounding is round-half-up everywhere: discounts,
//! bundle savings and proration all go through [`round_half_up_div`] so the
//! three calculators cannot drift apart.

/// Integer division rounding halves toward positive infinity.
///
/// `round_half_up_div(15, 10) == 2` and `round_half_up_div(-15, 10) == -1`,
/// matching `Math.round` semantics for negative proration diffs.
///
/// The denominator must be positive; callers guard zero-denominator cases
/// (they are defined as 0 by the individual calculators).
pub fn round_half_up_div(numerator: i64, denominator: i64) -> i64 {
    debug_assert!(denominator > 0);
    let num = numerator as i128;
    let den = denominator as i128;
    // floor((2n + d) / 2d) rounds .5 upward for both signs
    let rounded = (2 * num + den).div_euclid(2 * den);
    rounded as i64
}

/// Percentage of an amount, rounded half-up. `pct` is a whole percentage.
pub fn percentage_of(amount: i64, pct: i64) -> i64 {
    let scaled = (amount as i128) * (pct as i128);
    ((2 * scaled + 100).div_euclid(200)) as i64
}
