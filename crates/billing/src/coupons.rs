//! Coupon validation and redemption.
//!
//! Validation is a pure predicate over an already-loaded row so it can be
//! tested without a database; `CouponService` wraps the store lookup and the
//! atomic redemption-count increment.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use revena_shared::CouponDuration;

use crate::error::BillingResult;
use crate::models::Coupon;

/// Why a coupon was rejected. Each condition carries its own user-facing
/// message because calling UIs render condition-specific guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponRejection {
    /// Unknown code, or the coupon has been deactivated.
    InvalidCode,
    NotYetValid,
    Expired,
    LimitReached,
    PlanNotEligible,
    BelowMinimum,
}

impl CouponRejection {
    pub fn message(&self) -> &'static str {
        match self {
            CouponRejection::InvalidCode => "Invalid coupon code",
            CouponRejection::NotYetValid => "This coupon is not yet valid",
            CouponRejection::Expired => "This coupon has expired",
            CouponRejection::LimitReached => "This coupon has reached its redemption limit",
            CouponRejection::PlanNotEligible => "This coupon is not applicable to this plan",
            CouponRejection::BelowMinimum => "Order does not meet the coupon minimum amount",
        }
    }
}

impl std::fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// Outcome of validating a coupon code.
#[derive(Debug, Clone, Serialize)]
pub struct CouponValidation {
    pub valid: bool,
    pub coupon: Option<Coupon>,
    pub rejection: Option<CouponRejection>,
}

impl CouponValidation {
    fn accepted(coupon: Coupon) -> Self {
        Self {
            valid: true,
            coupon: Some(coupon),
            rejection: None,
        }
    }

    fn rejected(rejection: CouponRejection) -> Self {
        Self {
            valid: false,
            coupon: None,
            rejection: Some(rejection),
        }
    }
}

/// Check a loaded coupon row against the redemption rules, short-circuiting
/// on the first failure. Unsupplied optional parameters (`plan_id`,
/// `order_amount`) skip their check: not-yet-determinable is not failure.
pub fn check_coupon(
    coupon: &Coupon,
    now: OffsetDateTime,
    plan_id: Option<Uuid>,
    order_amount: Option<i64>,
) -> Result<(), CouponRejection> {
    if !coupon.is_active {
        return Err(CouponRejection::InvalidCode);
    }
    // A row with an unknown duration, or a repeating duration with no month
    // count, is malformed and must not reach the payment processor.
    match coupon.duration() {
        Ok(CouponDuration::Repeating) if coupon.duration_months.is_none() => {
            return Err(CouponRejection::InvalidCode);
        }
        Ok(_) => {}
        Err(_) => return Err(CouponRejection::InvalidCode),
    }
    if now < coupon.valid_from {
        return Err(CouponRejection::NotYetValid);
    }
    if let Some(valid_until) = coupon.valid_until {
        if now > valid_until {
            return Err(CouponRejection::Expired);
        }
    }
    if let Some(max) = coupon.max_redemptions {
        if coupon.redemption_count >= max {
            return Err(CouponRejection::LimitReached);
        }
    }
    if !coupon.applies_to_plans.is_empty() {
        if let Some(plan_id) = plan_id {
            if !coupon.applies_to_plans.contains(&plan_id) {
                return Err(CouponRejection::PlanNotEligible);
            }
        }
    }
    if let (Some(min), Some(amount)) = (coupon.min_order_amount, order_amount) {
        if amount < min {
            return Err(CouponRejection::BelowMinimum);
        }
    }
    Ok(())
}

/// Coupon lookup, validation and redemption.
#[derive(Clone)]
pub struct CouponService {
    pool: PgPool,
}

impl CouponService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Validate a code for an optional plan and order amount.
    pub async fn validate_coupon(
        &self,
        code: &str,
        plan_id: Option<Uuid>,
        order_amount: Option<i64>,
    ) -> BillingResult<CouponValidation> {
        let Some(coupon) = self.find_by_code(code).await? else {
            return Ok(CouponValidation::rejected(CouponRejection::InvalidCode));
        };

        let now = OffsetDateTime::now_utc();
        match check_coupon(&coupon, now, plan_id, order_amount) {
            Ok(()) => Ok(CouponValidation::accepted(coupon)),
            Err(rejection) => Ok(CouponValidation::rejected(rejection)),
        }
    }

    /// Atomically consume one redemption. The guard on `max_redemptions` is
    /// in the UPDATE itself, so two concurrent redeemers cannot both take
    /// the last slot. The count never decrements.
    pub async fn redeem(&self, code: &str) -> BillingResult<Result<i64, CouponRejection>> {
        let updated: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE coupons
            SET redemption_count = redemption_count + 1
            WHERE code = $1
              AND is_active = true
              AND (max_redemptions IS NULL OR redemption_count < max_redemptions)
            RETURNING redemption_count
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some((count,)) => {
                tracing::info!(code = %code, redemption_count = count, "Coupon redeemed");
                Ok(Ok(count))
            }
            None => {
                // Distinguish "no such code" from "limit reached" for the caller.
                let exists = self.find_by_code(code).await?.is_some();
                let rejection = if exists {
                    CouponRejection::LimitReached
                } else {
                    CouponRejection::InvalidCode
                };
                Ok(Err(rejection))
            }
        }
    }

    async fn find_by_code(&self, code: &str) -> BillingResult<Option<Coupon>> {
        let coupon = sqlx::query_as::<_, Coupon>(
            r#"
            SELECT id, code, discount_type, discount_value, currency,
                   duration, duration_months, max_redemptions, redemption_count,
                   min_order_amount, applies_to_plans, valid_from, valid_until,
                   is_active, created_at
            FROM coupons
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(coupon)
    }
}
