//! Subscription status state machine.
//!
//! The legal transitions live in one adjacency table checked by a single
//! generic function; every status write in this crate goes through
//! [`validate_transition`] before touching the database, so an illegal
//! transition can never mutate state or append an event.

use revena_shared::SubscriptionStatus;

use crate::error::{BillingError, BillingResult};

/// Legal target statuses for each source status.
///
/// | From      | To                              |
/// |-----------|---------------------------------|
/// | pending   | active, trialing, cancelled     |
/// | trialing  | active, cancelled, expired      |
/// | active    | paused, past_due, cancelled     |
/// | paused    | active, cancelled               |
/// | past_due  | active, cancelled               |
/// | cancelled | expired                         |
/// | expired   | (none)                          |
pub fn allowed_targets(status: SubscriptionStatus) -> &'static [SubscriptionStatus] {
    use SubscriptionStatus::*;
    match status {
        Pending => &[Active, Trialing, Cancelled],
        Trialing => &[Active, Cancelled, Expired],
        Active => &[Paused, PastDue, Cancelled],
        Paused => &[Active, Cancelled],
        PastDue => &[Active, Cancelled],
        Cancelled => &[Expired],
        Expired => &[],
    }
}

pub fn can_transition(from: SubscriptionStatus, to: SubscriptionStatus) -> bool {
    allowed_targets(from).contains(&to)
}

/// Reject a transition not present in the table.
pub fn validate_transition(
    from: SubscriptionStatus,
    to: SubscriptionStatus,
) -> BillingResult<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(BillingError::InvalidTransition { from, to })
    }
}
