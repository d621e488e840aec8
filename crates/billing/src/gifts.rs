//! Gift subscription validation, redemption and expiry sweep.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use revena_shared::GiftStatus;

use crate::error::{BillingError, BillingResult};
use crate::models::GiftSubscription;

/// Why a gift code cannot be redeemed. Redeemed and expired are distinct
/// terminal conditions with their own messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GiftRejection {
    InvalidCode,
    NotPaid,
    AlreadyRedeemed,
    Expired,
    Refunded,
}

impl GiftRejection {
    pub fn message(&self) -> &'static str {
        match self {
            GiftRejection::InvalidCode => "Invalid gift code",
            GiftRejection::NotPaid => "This gift has not been paid for yet",
            GiftRejection::AlreadyRedeemed => "This gift has already been redeemed",
            GiftRejection::Expired => "This gift has expired",
            GiftRejection::Refunded => "This gift was refunded",
        }
    }
}

impl std::fmt::Display for GiftRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// Summary of one expiry sweep run.
#[derive(Debug, Clone, Serialize)]
pub struct GiftSweepSummary {
    pub processed: usize,
    pub expired: usize,
    pub errors: Vec<String>,
}

/// Redeemability check over a loaded row. A `paid` gift whose `expires_at`
/// has passed is expired regardless of the stored status; the caller
/// corrects the stored status lazily.
pub fn check_gift(gift: &GiftSubscription, now: OffsetDateTime) -> Result<(), GiftRejection> {
    let status: GiftStatus = gift
        .status
        .parse()
        .map_err(|_| GiftRejection::InvalidCode)?;

    match status {
        GiftStatus::Paid => {
            if now > gift.expires_at {
                Err(GiftRejection::Expired)
            } else {
                Ok(())
            }
        }
        GiftStatus::Pending => Err(GiftRejection::NotPaid),
        GiftStatus::Redeemed => Err(GiftRejection::AlreadyRedeemed),
        GiftStatus::Expired => Err(GiftRejection::Expired),
        GiftStatus::Refunded => Err(GiftRejection::Refunded),
    }
}

/// Gift lookup, validation, redemption and the scheduled expiry sweep.
#[derive(Clone)]
pub struct GiftService {
    pool: PgPool,
}

impl GiftService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Validate a redemption code. A paid-but-overdue gift is marked
    /// expired here rather than waiting for the sweep.
    pub async fn validate_gift(
        &self,
        code: &str,
    ) -> BillingResult<Result<GiftSubscription, GiftRejection>> {
        let Some(gift) = self.find_by_code(code).await? else {
            return Ok(Err(GiftRejection::InvalidCode));
        };

        let now = OffsetDateTime::now_utc();
        match check_gift(&gift, now) {
            Ok(()) => Ok(Ok(gift)),
            Err(GiftRejection::Expired) => {
                // Lazy status correction for paid gifts past their window
                if gift.status == GiftStatus::Paid.as_str() {
                    self.mark_expired(gift.id).await?;
                }
                Ok(Err(GiftRejection::Expired))
            }
            Err(rejection) => Ok(Err(rejection)),
        }
    }

    /// Record a redemption: who redeemed and which subscription resulted.
    /// The status guard in the UPDATE keeps two concurrent redeemers from
    /// both succeeding.
    pub async fn redeem(
        &self,
        code: &str,
        redeemed_by: Uuid,
        subscription_id: Uuid,
    ) -> BillingResult<GiftSubscription> {
        match self.validate_gift(code).await? {
            Err(rejection) => Err(BillingError::Validation(rejection.message().to_string())),
            Ok(gift) => {
                let updated = sqlx::query_as::<_, GiftSubscription>(
                    r#"
                    UPDATE gift_subscriptions
                    SET status = 'redeemed',
                        redeemed_by = $2,
                        subscription_id = $3,
                        redeemed_at = NOW()
                    WHERE id = $1 AND status = 'paid'
                    RETURNING id, sender_customer_id, sender_email, recipient_name,
                              recipient_email, plan_id, redemption_code, status,
                              gift_message, expires_at, redeemed_by, subscription_id,
                              redeemed_at, created_at
                    "#,
                )
                .bind(gift.id)
                .bind(redeemed_by)
                .bind(subscription_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(BillingError::Conflict(gift.id))?;

                tracing::info!(
                    gift_id = %updated.id,
                    redeemed_by = %redeemed_by,
                    subscription_id = %subscription_id,
                    "Gift redeemed"
                );

                Ok(updated)
            }
        }
    }

    /// Expire paid gifts whose window has passed. Fetch due items, process
    /// each, isolate failures; one bad row never aborts the sweep.
    pub async fn expire_due_gifts(&self) -> BillingResult<GiftSweepSummary> {
        let due: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM gift_subscriptions
            WHERE status = 'paid' AND expires_at < NOW()
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = GiftSweepSummary {
            processed: due.len(),
            expired: 0,
            errors: Vec::new(),
        };

        for (gift_id,) in due {
            match self.mark_expired(gift_id).await {
                Ok(()) => summary.expired += 1,
                Err(e) => {
                    tracing::error!(gift_id = %gift_id, error = %e, "Failed to expire gift");
                    summary.errors.push(format!("gift {gift_id}: {e}"));
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            expired = summary.expired,
            errors = summary.errors.len(),
            "Gift expiry sweep complete"
        );

        Ok(summary)
    }

    async fn mark_expired(&self, gift_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE gift_subscriptions
            SET status = 'expired'
            WHERE id = $1 AND status = 'paid'
            "#,
        )
        .bind(gift_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_code(&self, code: &str) -> BillingResult<Option<GiftSubscription>> {
        let gift = sqlx::query_as::<_, GiftSubscription>(
            r#"
            SELECT id, sender_customer_id, sender_email, recipient_name,
                   recipient_email, plan_id, redemption_code, status,
                   gift_message, expires_at, redeemed_by, subscription_id,
                   redeemed_at, created_at
            FROM gift_subscriptions
            WHERE redemption_code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(gift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn gift(status: &str, expires_in: Duration) -> GiftSubscription {
        let now = OffsetDateTime::now_utc();
        GiftSubscription {
            id: Uuid::new_v4(),
            sender_customer_id: Uuid::new_v4(),
            sender_email: "sender@example.com".to_string(),
            recipient_name: "Sam".to_string(),
            recipient_email: "sam@example.com".to_string(),
            plan_id: Uuid::new_v4(),
            redemption_code: "GIFT-1234".to_string(),
            status: status.to_string(),
            gift_message: None,
            expires_at: now + expires_in,
            redeemed_by: None,
            subscription_id: None,
            redeemed_at: None,
            created_at: now - Duration::days(1),
        }
    }

    #[test]
    fn paid_unexpired_gift_is_redeemable() {
        let g = gift("paid", Duration::days(30));
        assert!(check_gift(&g, OffsetDateTime::now_utc()).is_ok());
    }

    #[test]
    fn redeemed_and_expired_are_distinct_rejections() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            check_gift(&gift("redeemed", Duration::days(30)), now),
            Err(GiftRejection::AlreadyRedeemed)
        );
        assert_eq!(
            check_gift(&gift("expired", Duration::days(30)), now),
            Err(GiftRejection::Expired)
        );
        assert_ne!(
            GiftRejection::AlreadyRedeemed.message(),
            GiftRejection::Expired.message()
        );
    }

    #[test]
    fn paid_gift_past_window_is_expired_despite_stored_status() {
        let g = gift("paid", -Duration::days(1));
        assert_eq!(
            check_gift(&g, OffsetDateTime::now_utc()),
            Err(GiftRejection::Expired)
        );
    }

    #[test]
    fn pending_and_refunded_are_not_redeemable() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            check_gift(&gift("pending", Duration::days(30)), now),
            Err(GiftRejection::NotPaid)
        );
        assert_eq!(
            check_gift(&gift("refunded", Duration::days(30)), now),
            Err(GiftRejection::Refunded)
        );
    }
}
