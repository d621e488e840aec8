//! Row types for the billing tables.
//!
//! Statuses are stored as text and parsed through the `revena-shared` enums
//! at the point of use; monetary amounts are `i64` minor currency units.

use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use revena_shared::{BillingInterval, CouponDuration, GiftStatus, SubscriptionStatus};

use crate::error::{BillingError, BillingResult};

/// A billable offering. Price and cadence are permanent once created;
/// changing them means creating a new plan.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// `day`, `week`, `month` or `year`
    pub interval_unit: String,
    pub interval_count: i32,
    pub price_amount: i64,
    pub currency: String,
    pub trial_days: Option<i32>,
    pub setup_fee: Option<i64>,
    /// `active`, `inactive` or `archived`
    pub status: String,
    pub features: Vec<String>,
    pub metadata: serde_json::Value,
    pub provider_price_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl SubscriptionPlan {
    /// Parse the stored cadence unit.
    pub fn interval(&self) -> BillingResult<BillingInterval> {
        self.interval_unit
            .parse()
            .map_err(|e: revena_shared::types::ParseStatusError| {
                BillingError::Internal(format!("plan {}: {e}", self.id))
            })
    }
}

/// One customer's instance of a plan.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub quantity: i32,
    pub status: String,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<OffsetDateTime>,
    pub cancellation_reason: Option<String>,
    pub paused_at: Option<OffsetDateTime>,
    pub resume_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
    pub shipping_address: Option<serde_json::Value>,
    pub provider_subscription_id: Option<String>,
    pub provider_customer_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    /// Parse the stored status text. A row with an unknown status is a data
    /// corruption we refuse to act on.
    pub fn status(&self) -> BillingResult<SubscriptionStatus> {
        self.status
            .parse()
            .map_err(|e: revena_shared::types::ParseStatusError| {
                BillingError::Internal(format!("subscription {}: {e}", self.id))
            })
    }
}

/// A billing-period charge.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SubscriptionInvoice {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub subtotal: i64,
    pub discount: i64,
    pub tax: i64,
    pub total: i64,
    pub amount_paid: i64,
    pub amount_due: i64,
    pub currency: String,
    /// `draft`, `open`, `paid`, `void` or `uncollectible`
    pub status: String,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
    pub order_id: Option<Uuid>,
    pub provider_invoice_id: Option<String>,
    pub created_at: OffsetDateTime,
}

/// One scheduled or executed dunning retry. A chain of these exists per
/// failure episode, linked through `next_retry_at`.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PaymentRetryAttempt {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub invoice_id: Uuid,
    /// 1-based, monotone per episode
    pub attempt_number: i32,
    pub amount: i64,
    pub currency: String,
    /// `pending`, `succeeded` or `failed`
    pub status: String,
    pub failure_reason: Option<String>,
    pub scheduled_at: OffsetDateTime,
    pub attempted_at: Option<OffsetDateTime>,
    pub next_retry_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// A discount rule.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    /// `percentage` or `fixed_amount`
    pub discount_type: String,
    pub discount_value: i64,
    pub currency: Option<String>,
    /// `once`, `repeating` or `forever`
    pub duration: String,
    pub duration_months: Option<i32>,
    pub max_redemptions: Option<i64>,
    pub redemption_count: i64,
    pub min_order_amount: Option<i64>,
    pub applies_to_plans: Vec<Uuid>,
    pub valid_from: OffsetDateTime,
    pub valid_until: Option<OffsetDateTime>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
}

impl Coupon {
    /// Parse the stored duration. Multi-cycle application is the payment
    /// processor's job; the core only checks the value is well-formed.
    pub fn duration(&self) -> BillingResult<CouponDuration> {
        self.duration
            .parse()
            .map_err(|e: revena_shared::types::ParseStatusError| {
                BillingError::Internal(format!("coupon {}: {e}", self.id))
            })
    }
}

/// A prepaid subscription awaiting activation.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct GiftSubscription {
    pub id: Uuid,
    pub sender_customer_id: Uuid,
    pub sender_email: String,
    pub recipient_name: String,
    pub recipient_email: String,
    pub plan_id: Uuid,
    pub redemption_code: String,
    /// `pending`, `paid`, `redeemed`, `expired` or `refunded`
    pub status: String,
    pub gift_message: Option<String>,
    pub expires_at: OffsetDateTime,
    pub redeemed_by: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub redeemed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl GiftSubscription {
    pub fn status(&self) -> BillingResult<GiftStatus> {
        self.status
            .parse()
            .map_err(|e: revena_shared::types::ParseStatusError| {
                BillingError::Internal(format!("gift {}: {e}", self.id))
            })
    }
}

/// A composite offering combining multiple plans at a blended price.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SubscriptionBundle {
    pub id: Uuid,
    pub name: String,
    pub plan_ids: Vec<Uuid>,
    pub bundle_price: i64,
    pub currency: String,
    pub savings_amount: i64,
    pub savings_percentage: i64,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
