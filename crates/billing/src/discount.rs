//! Discount engine.
//!
//! Pure functions only; callers validate coupon applicability first
//! (see `coupons`).

use revena_shared::money::percentage_of;
use revena_shared::DiscountType;

use crate::models::Coupon;

/// Discount amount in minor units for an order total.
///
/// Percentage coupons round half-up; fixed-amount coupons are capped at the
/// order total so a discount never leaves a negative remainder. A negative
/// stored value discounts nothing.
pub fn calculate_discount(coupon: &Coupon, order_amount: i64) -> i64 {
    if order_amount <= 0 {
        return 0;
    }

    match coupon.discount_type.parse::<DiscountType>() {
        Ok(DiscountType::Percentage) => {
            percentage_of(order_amount, coupon.discount_value).max(0)
        }
        Ok(DiscountType::FixedAmount) => coupon.discount_value.min(order_amount).max(0),
        // Unknown discount type on a stored row: discount nothing rather
        // than guess.
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn coupon(discount_type: &str, value: i64) -> Coupon {
        Coupon {
            id: Uuid::new_v4(),
            code: "TEST".to_string(),
            discount_type: discount_type.to_string(),
            discount_value: value,
            currency: Some("usd".to_string()),
            duration: "once".to_string(),
            duration_months: None,
            max_redemptions: None,
            redemption_count: 0,
            min_order_amount: None,
            applies_to_plans: vec![],
            valid_from: OffsetDateTime::now_utc(),
            valid_until: None,
            is_active: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn percentage_discount_rounds_half_up() {
        // $100.00 at 20% -> $20.00
        assert_eq!(calculate_discount(&coupon("percentage", 20), 10_000), 2_000);
        // $9.99 at 15% = 149.85 cents -> 150
        assert_eq!(calculate_discount(&coupon("percentage", 15), 999), 150);
        // $0.02 at 25% = 0.5 cents -> rounds up to 1
        assert_eq!(calculate_discount(&coupon("percentage", 25), 2), 1);
    }

    #[test]
    fn fixed_discount_never_exceeds_order_total() {
        // $50.00 off a $30.00 order -> $30.00
        assert_eq!(calculate_discount(&coupon("fixed_amount", 5_000), 3_000), 3_000);
        // $5.00 off a $30.00 order -> $5.00
        assert_eq!(calculate_discount(&coupon("fixed_amount", 500), 3_000), 500);
    }

    #[test]
    fn zero_or_negative_order_discounts_nothing() {
        assert_eq!(calculate_discount(&coupon("percentage", 50), 0), 0);
        assert_eq!(calculate_discount(&coupon("fixed_amount", 500), -100), 0);
    }

    #[test]
    fn unknown_discount_type_discounts_nothing() {
        assert_eq!(calculate_discount(&coupon("loyalty_points", 500), 1_000), 0);
    }

    #[test]
    fn negative_fixed_value_clamps_to_zero() {
        assert_eq!(calculate_discount(&coupon("fixed_amount", -500), 1_000), 0);
    }

    #[test]
    fn negative_percentage_value_clamps_to_zero() {
        assert_eq!(calculate_discount(&coupon("percentage", -10), 1_000), 0);
        assert_eq!(calculate_discount(&coupon("percentage", -100), 1_000), 0);
    }
}
