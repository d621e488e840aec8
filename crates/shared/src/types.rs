//! Domain enums for the billing core.
//!
//! All enums serialize to the snake_case strings stored in the database and
//! carried in audit event payloads.

use serde::{Deserialize, Serialize};

/// Error returned when a stored status string does not match any known value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            pub const ALL: &'static [$name] = &[$(Self::$variant,)+];
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseStatusError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

status_enum!(
    /// Lifecycle status of a subscription. The transition table lives in
    /// `revena-billing::state_machine`; this enum is just the state set.
    SubscriptionStatus,
    "subscription status",
    {
        Pending => "pending",
        Trialing => "trialing",
        Active => "active",
        Paused => "paused",
        PastDue => "past_due",
        Cancelled => "cancelled",
        Expired => "expired",
    }
);

impl SubscriptionStatus {
    /// States retained for history. Rows in these states are never deleted.
    pub fn is_retained(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }

    /// `expired` is the only state with no outbound transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

status_enum!(
    /// Audit event types, one per state machine trigger or billing outcome.
    SubscriptionEventType,
    "subscription event type",
    {
        Created => "created",
        Activated => "activated",
        TrialStarted => "trial_started",
        TrialEnded => "trial_ended",
        Renewed => "renewed",
        PaymentSucceeded => "payment_succeeded",
        PaymentFailed => "payment_failed",
        Paused => "paused",
        Resumed => "resumed",
        Cancelled => "cancelled",
        Expired => "expired",
        PlanChanged => "plan_changed",
        QuantityChanged => "quantity_changed",
        PriceChanged => "price_changed",
    }
);

status_enum!(
    /// How a coupon's discount value is interpreted.
    DiscountType,
    "discount type",
    {
        Percentage => "percentage",
        FixedAmount => "fixed_amount",
    }
);

status_enum!(
    /// How many billing cycles a coupon applies to. Multi-cycle application
    /// is the payment processor's responsibility; the core only stores it.
    CouponDuration,
    "coupon duration",
    {
        Once => "once",
        Repeating => "repeating",
        Forever => "forever",
    }
);

status_enum!(
    /// Gift subscription lifecycle.
    GiftStatus,
    "gift status",
    {
        Pending => "pending",
        Paid => "paid",
        Redeemed => "redeemed",
        Expired => "expired",
        Refunded => "refunded",
    }
);

status_enum!(
    /// Invoice lifecycle, mutated only by payment outcomes.
    InvoiceStatus,
    "invoice status",
    {
        Draft => "draft",
        Open => "open",
        Paid => "paid",
        Void => "void",
        Uncollectible => "uncollectible",
    }
);

status_enum!(
    /// One scheduled or executed dunning retry.
    RetryAttemptStatus,
    "retry attempt status",
    {
        Pending => "pending",
        Succeeded => "succeeded",
        Failed => "failed",
    }
);

status_enum!(
    /// Plan lifecycle. Archived plans keep existing subscribers but reject
    /// new ones.
    PlanStatus,
    "plan status",
    {
        Active => "active",
        Inactive => "inactive",
        Archived => "archived",
    }
);

status_enum!(
    /// Billing cadence unit; paired with an interval count on the plan.
    BillingInterval,
    "billing interval",
    {
        Day => "day",
        Week => "week",
        Month => "month",
        Year => "year",
    }
);
