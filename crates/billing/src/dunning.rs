//! Dunning: scheduled recovery of failed recurring payments.
//!
//! A failure episode is a chain of `payment_retry_attempts` rows linked by
//! `next_retry_at`. Attempt N runs, and on failure either schedules attempt
//! N+1 or, once the schedule is exhausted, starts the grace-period clock.
//! When the grace period passes with the subscription still past due, the
//! subscription is cancelled locally and the gateway cancellation is
//! best-effort: local state is authoritative on this terminal path.
//!
//! The batch processor is invoked by an external scheduler; each run fetches
//! pending-and-due attempts, processes them one at a time, and isolates
//! per-item failures so one bad row never aborts the batch.

use std::sync::Arc;

use serde::Serialize;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use revena_shared::{InvoiceStatus, RetryAttemptStatus, SubscriptionStatus};

use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};
use crate::gateway::BillingGateway;
use crate::models::{PaymentRetryAttempt, Subscription, SubscriptionInvoice};
use crate::subscriptions::SubscriptionService;

pub const CANCELLATION_REASON_EXHAUSTED: &str = "payment failed after all retry attempts";

/// Retry policy. Constructed once at process start and treated as immutable;
/// tests inject their own instead of mutating shared state.
///
/// Schedule values are day offsets from the episode's original failure,
/// indexed by zero-based attempt count. With the default `[1, 3, 5, 7]` the
/// retries land on days 1, 3, 5 and 7 after the failure, never on a
/// cumulative (1, 4, 9, 16) drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DunningConfig {
    pub max_attempts: u32,
    pub retry_schedule: Vec<i64>,
    pub grace_period_days: i64,
}

impl Default for DunningConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            retry_schedule: vec![1, 3, 5, 7],
            grace_period_days: 3,
        }
    }
}

impl DunningConfig {
    /// Reads `DUNNING_MAX_ATTEMPTS`, `DUNNING_RETRY_SCHEDULE` (comma-separated
    /// day offsets) and `DUNNING_GRACE_PERIOD_DAYS`, falling back to defaults.
    pub fn from_env() -> BillingResult<Self> {
        let defaults = Self::default();

        let max_attempts = match std::env::var("DUNNING_MAX_ATTEMPTS") {
            Ok(v) => v
                .parse()
                .map_err(|_| BillingError::Config(format!("invalid DUNNING_MAX_ATTEMPTS: {v}")))?,
            Err(_) => defaults.max_attempts,
        };

        let retry_schedule = match std::env::var("DUNNING_RETRY_SCHEDULE") {
            Ok(v) => parse_schedule(&v)
                .ok_or_else(|| BillingError::Config(format!("invalid DUNNING_RETRY_SCHEDULE: {v}")))?,
            Err(_) => defaults.retry_schedule,
        };

        let grace_period_days = match std::env::var("DUNNING_GRACE_PERIOD_DAYS") {
            Ok(v) => v.parse().map_err(|_| {
                BillingError::Config(format!("invalid DUNNING_GRACE_PERIOD_DAYS: {v}"))
            })?,
            Err(_) => defaults.grace_period_days,
        };

        let config = Self {
            max_attempts,
            retry_schedule,
            grace_period_days,
        };
        config.validate()?;
        Ok(config)
    }

    /// The schedule must cover exactly `max_attempts` retries.
    pub fn validate(&self) -> BillingResult<()> {
        if self.max_attempts == 0 {
            return Err(BillingError::Config(
                "dunning max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry_schedule.len() != self.max_attempts as usize {
            return Err(BillingError::Config(format!(
                "dunning retry schedule has {} entries, expected {}",
                self.retry_schedule.len(),
                self.max_attempts
            )));
        }
        if self.retry_schedule.iter().any(|d| *d <= 0) {
            return Err(BillingError::Config(
                "dunning retry offsets must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// When the next retry should run, given how many attempts have already
    /// been made (zero-based) and the episode's original failure time.
    /// `None` once the schedule is exhausted; the caller then applies
    /// grace-period-then-cancel logic.
    pub fn next_retry_date(
        &self,
        attempt_count: u32,
        origin: OffsetDateTime,
    ) -> Option<OffsetDateTime> {
        if attempt_count >= self.max_attempts {
            return None;
        }
        let offset_days = self.retry_schedule[attempt_count as usize];
        Some(origin + Duration::days(offset_days))
    }

    /// Recover the episode's original failure time from an attempt's 1-based
    /// number and its scheduled time. Follow-ups anchor here, so a batch run
    /// that processes an attempt late never shifts the remaining calendar.
    pub fn episode_origin(
        &self,
        attempt_number: i32,
        scheduled_at: OffsetDateTime,
    ) -> OffsetDateTime {
        let index = attempt_number.max(1) as usize - 1;
        let offset_days = self.retry_schedule.get(index).copied().unwrap_or(0);
        scheduled_at - Duration::days(offset_days)
    }

    /// Grace window after a final attempt: measured from when that attempt
    /// was scheduled to run, not from when it was processed.
    pub fn grace_period_end(&self, final_attempt_scheduled_at: OffsetDateTime) -> OffsetDateTime {
        final_attempt_scheduled_at + Duration::days(self.grace_period_days)
    }
}

fn parse_schedule(raw: &str) -> Option<Vec<i64>> {
    raw.split(',')
        .map(|part| part.trim().parse::<i64>().ok())
        .collect()
}

/// Counters returned from one batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DunningRunSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub errors: Vec<String>,
}

enum AttemptOutcome {
    Recovered,
    Failed,
}

/// Pre-collection check for one due attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptDisposition {
    /// Subscription left past_due by other means; close the episode.
    ResolvedElsewhere,
    /// No remote invoice or subscription to collect against.
    NoProvider,
    Collect,
}

fn attempt_disposition(
    status: SubscriptionStatus,
    has_provider_invoice: bool,
    has_provider_subscription: bool,
) -> AttemptDisposition {
    if status != SubscriptionStatus::PastDue {
        AttemptDisposition::ResolvedElsewhere
    } else if !has_provider_invoice || !has_provider_subscription {
        AttemptDisposition::NoProvider
    } else {
        AttemptDisposition::Collect
    }
}

/// What a failed collection leads to. The next retry date is computed from
/// the episode's original failure time, recovered from the failed attempt
/// itself, so the calendar stays fixed no matter when the batch actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowUpAction {
    Schedule {
        attempt_number: i32,
        at: OffsetDateTime,
    },
    AwaitGrace {
        until: OffsetDateTime,
    },
    Cancel,
}

fn plan_follow_up(
    config: &DunningConfig,
    attempt_number: i32,
    scheduled_at: OffsetDateTime,
    now: OffsetDateTime,
) -> FollowUpAction {
    let origin = config.episode_origin(attempt_number, scheduled_at);
    // attempt_number is 1-based, so it doubles as the zero-based count of
    // attempts already made when indexing the schedule
    match config.next_retry_date(attempt_number as u32, origin) {
        Some(at) => FollowUpAction::Schedule {
            attempt_number: attempt_number + 1,
            at,
        },
        None => {
            let until = config.grace_period_end(scheduled_at);
            if now > until {
                FollowUpAction::Cancel
            } else {
                FollowUpAction::AwaitGrace { until }
            }
        }
    }
}

/// Batch retry processor plus the payment-failure entry point.
#[derive(Clone)]
pub struct RetryProcessor {
    pool: PgPool,
    subscriptions: SubscriptionService,
    gateway: Arc<dyn BillingGateway>,
    email: BillingEmailService,
    config: DunningConfig,
}

impl RetryProcessor {
    pub fn new(
        pool: PgPool,
        subscriptions: SubscriptionService,
        gateway: Arc<dyn BillingGateway>,
        email: BillingEmailService,
        config: DunningConfig,
    ) -> BillingResult<Self> {
        config.validate()?;
        Ok(Self {
            pool,
            subscriptions,
            gateway,
            email,
            config,
        })
    }

    pub fn config(&self) -> &DunningConfig {
        &self.config
    }

    /// Entry point for the payment-failed effect (webhook or renewal job):
    /// move the subscription to past_due and open a failure episode with
    /// attempt 1 on the schedule.
    pub async fn record_payment_failure(
        &self,
        subscription_id: Uuid,
        invoice_id: Uuid,
        reason: &str,
    ) -> BillingResult<PaymentRetryAttempt> {
        let sub = self.subscriptions.get(subscription_id).await?;
        let invoice = self.get_invoice(invoice_id).await?;

        let status = sub.status()?;
        if status == SubscriptionStatus::Active {
            self.subscriptions
                .mark_past_due(
                    &sub,
                    serde_json::json!({
                        "invoice_id": invoice_id,
                        "reason": reason,
                    }),
                )
                .await?;
        } else if status != SubscriptionStatus::PastDue {
            return Err(BillingError::Validation(format!(
                "cannot start dunning for a {status} subscription"
            )));
        }

        let now = OffsetDateTime::now_utc();
        let scheduled_at = self
            .config
            .next_retry_date(0, now)
            .ok_or_else(|| BillingError::Config("empty dunning schedule".to_string()))?;

        let attempt = self
            .insert_attempt(&sub, &invoice, 1, scheduled_at)
            .await?;

        if let Some(customer_email) = self.customer_email(sub.customer_id).await? {
            self.email
                .send_payment_failed(&customer_email, 1, self.config.max_attempts, Some(scheduled_at))
                .await;
        }

        tracing::warn!(
            subscription_id = %subscription_id,
            invoice_id = %invoice_id,
            scheduled_at = %scheduled_at,
            reason = %reason,
            "Dunning episode opened"
        );

        Ok(attempt)
    }

    /// Process every pending attempt whose scheduled time has passed, then
    /// enforce grace periods on exhausted episodes. One item's failure is
    /// recorded and the batch moves on.
    pub async fn process_due_retries(&self) -> BillingResult<DunningRunSummary> {
        let due = self.fetch_due_attempts().await?;
        let mut summary = DunningRunSummary::default();

        for attempt in due {
            summary.processed += 1;
            match self.process_attempt(&attempt).await {
                Ok(AttemptOutcome::Recovered) => summary.succeeded += 1,
                Ok(AttemptOutcome::Failed) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        attempt_id = %attempt.id,
                        subscription_id = %attempt.subscription_id,
                        error = %e,
                        "Retry attempt processing failed"
                    );
                    summary.errors.push(format!("attempt {}: {e}", attempt.id));
                }
            }
        }

        match self.enforce_grace_periods().await {
            Ok(cancelled) => summary.cancelled = cancelled,
            Err(e) => {
                tracing::error!(error = %e, "Grace period enforcement failed");
                summary.errors.push(format!("grace period sweep: {e}"));
            }
        }

        tracing::info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            errors = summary.errors.len(),
            "Dunning run complete"
        );

        Ok(summary)
    }

    async fn process_attempt(&self, attempt: &PaymentRetryAttempt) -> BillingResult<AttemptOutcome> {
        let sub = self.subscriptions.get(attempt.subscription_id).await?;
        let invoice = self.get_invoice(attempt.invoice_id).await?;

        match attempt_disposition(
            sub.status()?,
            invoice.provider_invoice_id.is_some(),
            sub.provider_subscription_id.is_some(),
        ) {
            AttemptDisposition::ResolvedElsewhere => {
                // Resolved by other means (manual payment, cancellation, plan change)
                self.mark_attempt_failed(attempt.id, "status changed").await?;
                return Ok(AttemptOutcome::Failed);
            }
            AttemptDisposition::NoProvider => {
                self.mark_attempt_failed(attempt.id, "no payment provider configured")
                    .await?;
                return Ok(AttemptOutcome::Failed);
            }
            AttemptDisposition::Collect => {}
        }

        let provider_invoice_id = invoice.provider_invoice_id.as_deref().ok_or_else(|| {
            BillingError::Internal(format!("invoice {} lost its provider reference", invoice.id))
        })?;

        match self.gateway.collect_invoice(provider_invoice_id).await {
            Ok(charge) => {
                self.mark_attempt_succeeded(attempt.id).await?;
                self.mark_invoice_paid(&invoice).await?;
                self.subscriptions
                    .recover_from_past_due(
                        &sub,
                        serde_json::json!({
                            "invoice_id": invoice.id,
                            "attempt_number": attempt.attempt_number,
                            "provider_charge_id": charge.provider_charge_id,
                            "amount": charge.amount,
                        }),
                    )
                    .await?;
                Ok(AttemptOutcome::Recovered)
            }
            Err(gateway_err) => {
                let reason = gateway_err.to_string();
                self.mark_attempt_failed(attempt.id, &reason).await?;
                self.schedule_follow_up(&sub, &invoice, attempt).await?;
                Ok(AttemptOutcome::Failed)
            }
        }
    }

    /// Either schedule the next attempt in the episode or, when exhausted,
    /// apply grace-period-then-cancel.
    async fn schedule_follow_up(
        &self,
        sub: &Subscription,
        invoice: &SubscriptionInvoice,
        failed_attempt: &PaymentRetryAttempt,
    ) -> BillingResult<()> {
        let now = OffsetDateTime::now_utc();
        let action = plan_follow_up(
            &self.config,
            failed_attempt.attempt_number,
            failed_attempt.scheduled_at,
            now,
        );

        match action {
            FollowUpAction::Schedule { attempt_number, at } => {
                self.insert_attempt(sub, invoice, attempt_number, at).await?;
                self.set_next_retry_at(failed_attempt.id, at).await?;

                if let Some(customer_email) = self.customer_email(sub.customer_id).await? {
                    self.email
                        .send_payment_failed(
                            &customer_email,
                            failed_attempt.attempt_number,
                            self.config.max_attempts,
                            Some(at),
                        )
                        .await;
                }
                Ok(())
            }
            FollowUpAction::AwaitGrace { .. } => {
                if let Some(customer_email) = self.customer_email(sub.customer_id).await? {
                    self.email
                        .send_payment_failed(
                            &customer_email,
                            failed_attempt.attempt_number,
                            self.config.max_attempts,
                            None,
                        )
                        .await;
                }
                Ok(())
            }
            FollowUpAction::Cancel => self.cancel_exhausted(sub).await,
        }
    }

    /// Cancel subscriptions whose exhausted episodes have outlived the grace
    /// period. Covers episodes whose final attempt failed on an earlier run
    /// while the grace window was still open.
    async fn enforce_grace_periods(&self) -> BillingResult<usize> {
        let overdue: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT a.subscription_id
            FROM payment_retry_attempts a
            JOIN subscriptions s ON s.id = a.subscription_id
            WHERE a.status = $3
              AND a.next_retry_at IS NULL
              AND a.attempt_number = $1
              AND a.scheduled_at < NOW() - make_interval(days => $2::int)
              AND s.status = $4
            "#,
        )
        .bind(self.config.max_attempts as i32)
        .bind(self.config.grace_period_days as i32)
        .bind(RetryAttemptStatus::Failed.as_str())
        .bind(SubscriptionStatus::PastDue.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut cancelled = 0;
        for (subscription_id,) in overdue {
            let sub = self.subscriptions.get(subscription_id).await?;
            match self.cancel_exhausted(&sub).await {
                Ok(()) => cancelled += 1,
                Err(BillingError::Conflict(_)) => {
                    // Another writer resolved the subscription between the
                    // query and the cancel; nothing to do.
                }
                Err(e) => return Err(e),
            }
        }

        Ok(cancelled)
    }

    /// Local cancellation is authoritative; the gateway-side cancellation is
    /// best-effort and a reconciliation sweep catches any drift.
    async fn cancel_exhausted(&self, sub: &Subscription) -> BillingResult<()> {
        self.subscriptions
            .cancel_local(
                sub,
                CANCELLATION_REASON_EXHAUSTED,
                serde_json::json!({
                    "trigger": "dunning_exhausted",
                    "max_attempts": self.config.max_attempts,
                }),
            )
            .await?;

        if let Some(provider_id) = sub.provider_subscription_id.as_deref() {
            best_effort(
                "cancel subscription at gateway after dunning exhaustion",
                self.gateway.cancel_subscription(provider_id).await,
            );
        }

        Ok(())
    }

    async fn fetch_due_attempts(&self) -> BillingResult<Vec<PaymentRetryAttempt>> {
        let attempts = sqlx::query_as::<_, PaymentRetryAttempt>(
            r#"
            SELECT id, subscription_id, invoice_id, attempt_number, amount,
                   currency, status, failure_reason, scheduled_at,
                   attempted_at, next_retry_at, created_at
            FROM payment_retry_attempts
            WHERE status = $1 AND scheduled_at <= NOW()
            ORDER BY scheduled_at
            "#,
        )
        .bind(RetryAttemptStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(attempts)
    }

    async fn insert_attempt(
        &self,
        sub: &Subscription,
        invoice: &SubscriptionInvoice,
        attempt_number: i32,
        scheduled_at: OffsetDateTime,
    ) -> BillingResult<PaymentRetryAttempt> {
        let attempt = sqlx::query_as::<_, PaymentRetryAttempt>(
            r#"
            INSERT INTO payment_retry_attempts (
                subscription_id, invoice_id, attempt_number,
                amount, currency, status, scheduled_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, subscription_id, invoice_id, attempt_number, amount,
                      currency, status, failure_reason, scheduled_at,
                      attempted_at, next_retry_at, created_at
            "#,
        )
        .bind(sub.id)
        .bind(invoice.id)
        .bind(attempt_number)
        .bind(invoice.amount_due)
        .bind(&invoice.currency)
        .bind(RetryAttemptStatus::Pending.as_str())
        .bind(scheduled_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            subscription_id = %sub.id,
            attempt_number = attempt_number,
            scheduled_at = %scheduled_at,
            "Retry attempt scheduled"
        );

        Ok(attempt)
    }

    async fn mark_attempt_succeeded(&self, attempt_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_retry_attempts
            SET status = $2,
                attempted_at = NOW()
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(attempt_id)
        .bind(RetryAttemptStatus::Succeeded.as_str())
        .bind(RetryAttemptStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_attempt_failed(&self, attempt_id: Uuid, reason: &str) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_retry_attempts
            SET status = $3,
                failure_reason = $2,
                attempted_at = NOW()
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(attempt_id)
        .bind(reason)
        .bind(RetryAttemptStatus::Failed.as_str())
        .bind(RetryAttemptStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_next_retry_at(
        &self,
        attempt_id: Uuid,
        next_retry_at: OffsetDateTime,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_retry_attempts
            SET next_retry_at = $2
            WHERE id = $1
            "#,
        )
        .bind(attempt_id)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_invoice_paid(&self, invoice: &SubscriptionInvoice) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE subscription_invoices
            SET status = $2,
                amount_paid = total,
                amount_due = 0
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(invoice.id)
        .bind(InvoiceStatus::Paid.as_str())
        .bind(InvoiceStatus::Open.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> BillingResult<SubscriptionInvoice> {
        let invoice = sqlx::query_as::<_, SubscriptionInvoice>(
            r#"
            SELECT id, subscription_id, subtotal, discount, tax, total,
                   amount_paid, amount_due, currency, status,
                   period_start, period_end, order_id, provider_invoice_id,
                   created_at
            FROM subscription_invoices
            WHERE id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("invoice {invoice_id}")))?;

        Ok(invoice)
    }

    async fn customer_email(&self, customer_id: Uuid) -> BillingResult<Option<String>> {
        let email: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT email
            FROM customers
            WHERE id = $1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(email.map(|(e,)| e))
    }
}

/// Log-and-swallow wrapper for cleanup calls where local state is already
/// authoritative. The name makes the intent visible at every call site.
pub(crate) fn best_effort<T, E: std::fmt::Display>(context: &str, result: Result<T, E>) {
    if let Err(e) = result {
        tracing::warn!(context = %context, error = %e, "Best-effort operation failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_policy() {
        let config = DunningConfig::default();
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.retry_schedule, vec![1, 3, 5, 7]);
        assert_eq!(config.grace_period_days, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn retry_dates_follow_the_schedule() {
        let config = DunningConfig::default();
        let now = OffsetDateTime::now_utc();

        assert_eq!(config.next_retry_date(0, now), Some(now + Duration::days(1)));
        assert_eq!(config.next_retry_date(1, now), Some(now + Duration::days(3)));
        assert_eq!(config.next_retry_date(2, now), Some(now + Duration::days(5)));
        assert_eq!(config.next_retry_date(3, now), Some(now + Duration::days(7)));
    }

    #[test]
    fn exhausted_schedule_returns_none() {
        let config = DunningConfig::default();
        let now = OffsetDateTime::now_utc();
        assert_eq!(config.next_retry_date(4, now), None);
        assert_eq!(config.next_retry_date(5, now), None);
        assert_eq!(config.next_retry_date(100, now), None);
    }

    #[test]
    fn grace_period_runs_from_the_final_attempt() {
        // Final attempt scheduled day 7 -> grace ends day 10
        let config = DunningConfig::default();
        let day_zero = OffsetDateTime::now_utc();
        let final_attempt_at = day_zero + Duration::days(7);
        assert_eq!(
            config.grace_period_end(final_attempt_at),
            day_zero + Duration::days(10)
        );
    }

    #[test]
    fn schedule_length_must_match_max_attempts() {
        let config = DunningConfig {
            max_attempts: 4,
            retry_schedule: vec![1, 3, 5],
            grace_period_days: 3,
        };
        assert!(matches!(
            config.validate(),
            Err(BillingError::Config(_))
        ));
    }

    #[test]
    fn zero_attempts_and_nonpositive_offsets_are_rejected() {
        let config = DunningConfig {
            max_attempts: 0,
            retry_schedule: vec![],
            grace_period_days: 3,
        };
        assert!(config.validate().is_err());

        let config = DunningConfig {
            max_attempts: 2,
            retry_schedule: vec![1, 0],
            grace_period_days: 3,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn custom_schedule_is_honoured() {
        let config = DunningConfig {
            max_attempts: 2,
            retry_schedule: vec![2, 6],
            grace_period_days: 1,
        };
        let now = OffsetDateTime::now_utc();
        assert_eq!(config.next_retry_date(0, now), Some(now + Duration::days(2)));
        assert_eq!(config.next_retry_date(1, now), Some(now + Duration::days(6)));
        assert_eq!(config.next_retry_date(2, now), None);
    }

    #[test]
    fn episode_origin_recovers_the_failure_time() {
        let config = DunningConfig::default();
        let failure = OffsetDateTime::now_utc();
        assert_eq!(config.episode_origin(1, failure + Duration::days(1)), failure);
        assert_eq!(config.episode_origin(3, failure + Duration::days(5)), failure);
        assert_eq!(config.episode_origin(4, failure + Duration::days(7)), failure);
    }

    #[test]
    fn retry_calendar_runs_from_the_original_failure() {
        // Full episode: failure day 0, attempts on days 1/3/5/7, grace to
        // day 10, then cancellation.
        let config = DunningConfig::default();
        let failure = OffsetDateTime::now_utc();

        let first = config.next_retry_date(0, failure);
        assert_eq!(first, Some(failure + Duration::days(1)));

        let mut scheduled = vec![first.expect("first retry")];
        for attempt_number in 1..4 {
            let at = *scheduled.last().expect("previous attempt");
            match plan_follow_up(&config, attempt_number, at, at) {
                FollowUpAction::Schedule { attempt_number: next, at } => {
                    assert_eq!(next, attempt_number + 1);
                    scheduled.push(at);
                }
                other => panic!("expected a scheduled follow-up, got {other:?}"),
            }
        }

        let expected: Vec<_> = [1, 3, 5, 7]
            .iter()
            .map(|d| failure + Duration::days(*d))
            .collect();
        assert_eq!(scheduled, expected);

        // Final attempt fails on day 7: grace holds through day 10
        let final_at = failure + Duration::days(7);
        assert_eq!(
            plan_follow_up(&config, 4, final_at, failure + Duration::days(9)),
            FollowUpAction::AwaitGrace {
                until: failure + Duration::days(10)
            }
        );
        assert_eq!(
            plan_follow_up(
                &config,
                4,
                final_at,
                failure + Duration::days(10) + Duration::seconds(1)
            ),
            FollowUpAction::Cancel
        );
    }

    #[test]
    fn late_processing_does_not_drift_the_calendar() {
        // Attempt 1 (due day 1) processed a day late: attempt 2 still lands
        // on day 3 from the original failure, not day 5
        let config = DunningConfig::default();
        let failure = OffsetDateTime::now_utc();
        let attempt_one_at = failure + Duration::days(1);
        let processed_at = failure + Duration::days(2);

        match plan_follow_up(&config, 1, attempt_one_at, processed_at) {
            FollowUpAction::Schedule { at, .. } => {
                assert_eq!(at, failure + Duration::days(3));
            }
            other => panic!("expected a scheduled follow-up, got {other:?}"),
        }
    }

    #[test]
    fn attempts_skip_collection_when_resolved_or_unconfigured() {
        use SubscriptionStatus::{Active, Cancelled, PastDue};

        // Subscription recovered or cancelled by other means
        assert_eq!(
            attempt_disposition(Active, true, true),
            AttemptDisposition::ResolvedElsewhere
        );
        assert_eq!(
            attempt_disposition(Cancelled, true, true),
            AttemptDisposition::ResolvedElsewhere
        );

        // Either remote reference missing means nothing to collect against
        assert_eq!(
            attempt_disposition(PastDue, false, true),
            AttemptDisposition::NoProvider
        );
        assert_eq!(
            attempt_disposition(PastDue, true, false),
            AttemptDisposition::NoProvider
        );

        assert_eq!(
            attempt_disposition(PastDue, true, true),
            AttemptDisposition::Collect
        );
    }

    #[test]
    fn schedule_parsing() {
        assert_eq!(parse_schedule("1,3,5,7"), Some(vec![1, 3, 5, 7]));
        assert_eq!(parse_schedule(" 2, 4 "), Some(vec![2, 4]));
        assert_eq!(parse_schedule("1,x,3"), None);
    }

    #[test]
    fn best_effort_swallows_errors() {
        // Must not panic or propagate
        best_effort::<(), _>("test cleanup", Err("gateway timeout"));
        best_effort("test cleanup", Ok::<_, String>(42));
    }
}
