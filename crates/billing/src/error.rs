//! Billing error types.
//!
//! Concurrency conflicts get their own variant so callers can retry the whole
//! operation; they are never folded into validation failures. Coupon and gift
//! rejections are *not* errors — they are expected outcomes with their own
//! enums in `coupons`/`gifts`, because calling UIs render condition-specific
//! guidance for them.

use revena_shared::SubscriptionStatus;
use uuid::Uuid;

use crate::gateway::GatewayError;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Transition not present in the state machine table. Rejected before
    /// any state mutation or event write.
    #[error("invalid subscription transition: {from} -> {to}")]
    InvalidTransition {
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },

    /// A concurrent writer moved the subscription out of the observed state
    /// between our read and our write. Distinct from validation failure;
    /// callers may retry the whole operation.
    #[error("subscription {0} was modified concurrently")]
    Conflict(Uuid),

    /// Caller-supplied input failed a synchronous check. No state mutated.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Hard failure from the billing gateway during a user-initiated action.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Gateway unreachable or no remote object exists. Callers with an
    /// estimate path fall back instead of failing.
    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => BillingError::NotFound("row".to_string()),
            other => BillingError::Database(other.to_string()),
        }
    }
}

impl From<GatewayError> for BillingError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Unavailable(msg) => BillingError::GatewayUnavailable(msg),
            GatewayError::Declined { code, message } => {
                BillingError::Gateway(format!("payment declined ({code}): {message}"))
            }
            GatewayError::Failed(msg) => BillingError::Gateway(msg),
        }
    }
}
