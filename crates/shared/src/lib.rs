// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Revena Shared Types
//!
//! Domain enums and money helpers used by the billing core and the worker.
//! Statuses are stored as text in Postgres; every enum here round-trips
//! through `as_str`/`parse`.

pub mod money;
pub mod types;

pub use types::{
    BillingInterval, CouponDuration, DiscountType, GiftStatus, InvoiceStatus, PlanStatus,
    RetryAttemptStatus, SubscriptionEventType, SubscriptionStatus,
};
