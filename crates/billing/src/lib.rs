// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Some billing operations require many parameters
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Revena Billing Core
//!
//! Subscription commerce logic behind the storefront and admin console.
//!
//! ## Features
//!
//! - **Discount Engine**: Percentage and fixed-amount coupon computation
//! - **Coupon & Gift Validation**: Redeemability checks with atomic redemption
//! - **Bundle Pricing**: Savings derived from constituent plan prices
//! - **Subscription Lifecycle**: State-machine-validated status transitions with audit events
//! - **Dunning**: Scheduled payment retries, grace periods, forced cancellation
//! - **Proration**: Gateway-exact plan-change quotes with a day-based estimate fallback
//! - **Email Notifications**: Payment failed, plan change, gift purchase notices
//!
//! All external payment-processor access goes through the [`BillingGateway`]
//! trait; no vendor SDK types appear in this crate's API.

pub mod bundles;
pub mod coupons;
pub mod discount;
pub mod dunning;
pub mod email;
pub mod error;
pub mod events;
pub mod gateway;
pub mod gifts;
pub mod models;
pub mod proration;
pub mod state_machine;
pub mod subscriptions;


// Bundles
pub use bundles::{bundle_savings, BundleSavings, BundleService};

// Coupons
pub use coupons::{check_coupon, CouponRejection, CouponService, CouponValidation};

// Discount
pub use discount::calculate_discount;

// Dunning
pub use dunning::{DunningConfig, DunningRunSummary, RetryProcessor, CANCELLATION_REASON_EXHAUSTED};

// Email
pub use email::BillingEmailService;

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{append_event, SubscriptionEvent, SubscriptionEventBuilder, SubscriptionEventLogger};

// Gateway
pub use gateway::{
    BillingGateway, GatewayCharge, GatewayError, GatewayInvoiceLine, GatewayResult,
    GatewaySubscription, PaymentInstrument, UnconfiguredGateway,
};

// Gifts
pub use gifts::{check_gift, GiftRejection, GiftService, GiftSweepSummary};

// Models
pub use models::{
    Coupon, GiftSubscription, PaymentRetryAttempt, Subscription, SubscriptionBundle,
    SubscriptionInvoice, SubscriptionPlan,
};

// Proration
pub use proration::{
    estimate_net_proration, sum_proration_lines, ProrationResult, ProrationService,
};

// State machine
pub use state_machine::{allowed_targets, can_transition, validate_transition};

// Subscriptions
pub use subscriptions::{PlanChangeResult, SubscriptionService};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub bundles: BundleService,
    pub coupons: CouponService,
    pub email: BillingEmailService,
    pub events: SubscriptionEventLogger,
    pub gifts: GiftService,
    pub proration: ProrationService,
    pub retries: RetryProcessor,
    pub subscriptions: SubscriptionService,
}

impl BillingService {
    /// Create a billing service with an explicit dunning policy.
    pub fn new(
        pool: PgPool,
        gateway: Arc<dyn BillingGateway>,
        dunning: DunningConfig,
    ) -> BillingResult<Self> {
        let email = BillingEmailService::from_env();
        let subscriptions = SubscriptionService::new(pool.clone(), gateway.clone());

        Ok(Self {
            bundles: BundleService::new(pool.clone()),
            coupons: CouponService::new(pool.clone()),
            email: email.clone(),
            events: SubscriptionEventLogger::new(pool.clone()),
            gifts: GiftService::new(pool.clone()),
            proration: ProrationService::new(subscriptions.clone(), gateway.clone()),
            retries: RetryProcessor::new(
                pool,
                subscriptions.clone(),
                gateway,
                email,
                dunning,
            )?,
            subscriptions,
        })
    }

    /// Create a billing service with the dunning policy read from the
    /// environment.
    pub fn from_env(pool: PgPool, gateway: Arc<dyn BillingGateway>) -> BillingResult<Self> {
        Self::new(pool, gateway, DunningConfig::from_env()?)
    }
}
