//! Subscription lifecycle operations.
//!
//! Every status write follows the same contract: read the current row,
//! validate the transition against the state machine table, then write with
//! the observed status in the WHERE clause. Zero rows affected means a
//! concurrent writer won; that surfaces as `BillingError::Conflict`, never
//! as a silent coercion. The state change and its audit event commit in one
//! transaction.
//!
//! Plan and quantity changes are gateway-first, local-second: a gateway
//! failure must never leave local state ahead of the external system.

use std::sync::Arc;

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use revena_shared::{PlanStatus, SubscriptionEventType, SubscriptionStatus};

use crate::error::{BillingError, BillingResult};
use crate::events::{append_event, SubscriptionEventBuilder};
use crate::gateway::BillingGateway;
use crate::models::{Subscription, SubscriptionPlan};
use crate::state_machine::validate_transition;

/// Result of a plan change, including the adopted period bounds when the
/// gateway returned new ones.
#[derive(Debug, Clone, Serialize)]
pub struct PlanChangeResult {
    pub subscription_id: Uuid,
    pub old_plan_id: Uuid,
    pub new_plan_id: Uuid,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
}

#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
    gateway: Arc<dyn BillingGateway>,
}

impl SubscriptionService {
    pub fn new(pool: PgPool, gateway: Arc<dyn BillingGateway>) -> Self {
        Self { pool, gateway }
    }

    pub async fn get(&self, subscription_id: Uuid) -> BillingResult<Subscription> {
        let sub = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, customer_id, plan_id, quantity, status,
                   current_period_start, current_period_end,
                   trial_start, trial_end,
                   cancel_at_period_end, cancelled_at, cancellation_reason,
                   paused_at, resume_at, ended_at, shipping_address,
                   provider_subscription_id, provider_customer_id,
                   created_at, updated_at
            FROM subscriptions
            WHERE id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("subscription {subscription_id}")))?;

        Ok(sub)
    }

    /// Pause an active or trialing subscription.
    pub async fn pause(&self, subscription_id: Uuid) -> BillingResult<Subscription> {
        let sub = self.get(subscription_id).await?;
        let from = sub.status()?;
        validate_transition(from, SubscriptionStatus::Paused)?;

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'paused',
                paused_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(subscription_id)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?;

        if rows.rows_affected() == 0 {
            return Err(BillingError::Conflict(subscription_id));
        }

        append_event(
            &mut *tx,
            SubscriptionEventBuilder::new(subscription_id, SubscriptionEventType::Paused)
                .payload(serde_json::json!({ "trigger": "manual_pause" }))
                .status_change(from, SubscriptionStatus::Paused),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(subscription_id = %subscription_id, from = %from, "Subscription paused");
        self.get(subscription_id).await
    }

    /// Resume a paused subscription. Clears `paused_at` and any scheduled
    /// `resume_at`.
    pub async fn resume(&self, subscription_id: Uuid) -> BillingResult<Subscription> {
        let sub = self.get(subscription_id).await?;
        let from = sub.status()?;
        if from != SubscriptionStatus::Paused {
            return Err(BillingError::InvalidTransition {
                from,
                to: SubscriptionStatus::Active,
            });
        }

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'active',
                paused_at = NULL,
                resume_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'paused'
            "#,
        )
        .bind(subscription_id)
        .execute(&mut *tx)
        .await?;

        if rows.rows_affected() == 0 {
            return Err(BillingError::Conflict(subscription_id));
        }

        append_event(
            &mut *tx,
            SubscriptionEventBuilder::new(subscription_id, SubscriptionEventType::Resumed)
                .payload(serde_json::json!({ "trigger": "manual_resume" }))
                .status_change(from, SubscriptionStatus::Active),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(subscription_id = %subscription_id, "Subscription resumed");
        self.get(subscription_id).await
    }

    /// Cancel immediately, gateway first. A gateway failure surfaces to the
    /// caller with local state untouched.
    pub async fn cancel_now(
        &self,
        subscription_id: Uuid,
        reason: &str,
    ) -> BillingResult<Subscription> {
        let sub = self.get(subscription_id).await?;
        let from = sub.status()?;
        validate_transition(from, SubscriptionStatus::Cancelled)?;

        if let Some(provider_id) = sub.provider_subscription_id.as_deref() {
            self.gateway.cancel_subscription(provider_id).await?;
        }

        self.cancel_local(&sub, reason, serde_json::json!({ "trigger": "manual_cancel" }))
            .await?;
        self.get(subscription_id).await
    }

    /// The local half of a cancellation: status transition, timestamps and
    /// audit event, no gateway involvement. The dunning engine calls this
    /// directly and handles the gateway side best-effort, because local
    /// cancellation is authoritative on that path.
    pub(crate) async fn cancel_local(
        &self,
        sub: &Subscription,
        reason: &str,
        payload: serde_json::Value,
    ) -> BillingResult<()> {
        let from = sub.status()?;
        validate_transition(from, SubscriptionStatus::Cancelled)?;

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled',
                cancelled_at = NOW(),
                ended_at = NOW(),
                cancellation_reason = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(sub.id)
        .bind(from.as_str())
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        if rows.rows_affected() == 0 {
            return Err(BillingError::Conflict(sub.id));
        }

        append_event(
            &mut *tx,
            SubscriptionEventBuilder::new(sub.id, SubscriptionEventType::Cancelled)
                .payload(payload)
                .status_change(from, SubscriptionStatus::Cancelled),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(subscription_id = %sub.id, reason = %reason, "Subscription cancelled");
        Ok(())
    }

    /// Record the intent to cancel when the current period ends. Status is
    /// unchanged; the period-rollover process performs the actual
    /// cancellation when the period closes.
    pub async fn cancel_at_period_end(
        &self,
        subscription_id: Uuid,
        reason: &str,
    ) -> BillingResult<Subscription> {
        let sub = self.get(subscription_id).await?;
        let from = sub.status()?;
        // Same eligibility as an immediate cancel
        validate_transition(from, SubscriptionStatus::Cancelled)?;

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            UPDATE subscriptions
            SET cancel_at_period_end = true,
                cancelled_at = NOW(),
                cancellation_reason = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(subscription_id)
        .bind(from.as_str())
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        if rows.rows_affected() == 0 {
            return Err(BillingError::Conflict(subscription_id));
        }

        append_event(
            &mut *tx,
            SubscriptionEventBuilder::new(subscription_id, SubscriptionEventType::Cancelled)
                .payload(serde_json::json!({
                    "trigger": "cancel_at_period_end",
                    "at_period_end": true,
                    "reason": reason,
                })),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            subscription_id = %subscription_id,
            "Cancellation scheduled for period end"
        );
        self.get(subscription_id).await
    }

    /// Expire a cancelled subscription. Invoked by the period-rollover
    /// process once the final period closes.
    pub async fn mark_expired(&self, subscription_id: Uuid) -> BillingResult<Subscription> {
        let sub = self.get(subscription_id).await?;
        let from = sub.status()?;
        validate_transition(from, SubscriptionStatus::Expired)?;

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'expired',
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(subscription_id)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?;

        if rows.rows_affected() == 0 {
            return Err(BillingError::Conflict(subscription_id));
        }

        append_event(
            &mut *tx,
            SubscriptionEventBuilder::new(subscription_id, SubscriptionEventType::Expired)
                .payload(serde_json::json!({ "trigger": "period_rollover" }))
                .status_change(from, SubscriptionStatus::Expired),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(subscription_id = %subscription_id, "Subscription expired");
        self.get(subscription_id).await
    }

    /// Recover a past-due subscription after a successful dunning charge.
    /// Logs `payment_succeeded` followed by `activated`.
    pub(crate) async fn recover_from_past_due(
        &self,
        sub: &Subscription,
        payload: serde_json::Value,
    ) -> BillingResult<()> {
        let from = sub.status()?;
        validate_transition(from, SubscriptionStatus::Active)?;

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'active',
                updated_at = NOW()
            WHERE id = $1 AND status = 'past_due'
            "#,
        )
        .bind(sub.id)
        .execute(&mut *tx)
        .await?;

        if rows.rows_affected() == 0 {
            return Err(BillingError::Conflict(sub.id));
        }

        append_event(
            &mut *tx,
            SubscriptionEventBuilder::new(sub.id, SubscriptionEventType::PaymentSucceeded)
                .payload(payload),
        )
        .await?;

        append_event(
            &mut *tx,
            SubscriptionEventBuilder::new(sub.id, SubscriptionEventType::Activated)
                .payload(serde_json::json!({ "trigger": "dunning_recovery" }))
                .status_change(from, SubscriptionStatus::Active),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(subscription_id = %sub.id, "Subscription recovered from past_due");
        Ok(())
    }

    /// Mark an active subscription past due when a recurring payment fails.
    pub(crate) async fn mark_past_due(
        &self,
        sub: &Subscription,
        payload: serde_json::Value,
    ) -> BillingResult<()> {
        let from = sub.status()?;
        validate_transition(from, SubscriptionStatus::PastDue)?;

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'past_due',
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(sub.id)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?;

        if rows.rows_affected() == 0 {
            return Err(BillingError::Conflict(sub.id));
        }

        append_event(
            &mut *tx,
            SubscriptionEventBuilder::new(sub.id, SubscriptionEventType::PaymentFailed)
                .payload(payload)
                .status_change(from, SubscriptionStatus::PastDue),
        )
        .await?;

        tx.commit().await?;

        tracing::warn!(subscription_id = %sub.id, "Subscription marked past_due");
        Ok(())
    }

    /// Move the subscription to a different plan. Allowed while active or
    /// trialing; the gateway is updated first and the local row adopts the
    /// period bounds it returns.
    pub async fn change_plan(
        &self,
        subscription_id: Uuid,
        new_plan_id: Uuid,
    ) -> BillingResult<PlanChangeResult> {
        let sub = self.get(subscription_id).await?;
        let status = sub.status()?;
        if !matches!(
            status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        ) {
            return Err(BillingError::Validation(format!(
                "plan changes require an active or trialing subscription (status: {status})"
            )));
        }
        if new_plan_id == sub.plan_id {
            return Err(BillingError::Validation(
                "subscription is already on this plan".to_string(),
            ));
        }

        let new_plan = self.get_plan(new_plan_id).await?;
        if new_plan.status != PlanStatus::Active.as_str() {
            return Err(BillingError::Validation(format!(
                "plan {new_plan_id} is not accepting subscribers"
            )));
        }
        // Refuse to push a plan with a malformed cadence to the gateway.
        let _ = new_plan.interval()?;

        // Gateway first; its failure leaves local state untouched.
        let mut new_period_start = sub.current_period_start;
        let mut new_period_end = sub.current_period_end;
        if let Some(provider_sub_id) = sub.provider_subscription_id.as_deref() {
            let provider_price_id = new_plan.provider_price_id.as_deref().ok_or_else(|| {
                BillingError::Config(format!("plan {new_plan_id} has no provider price"))
            })?;
            let remote = self
                .gateway
                .update_subscription(provider_sub_id, Some(provider_price_id), None)
                .await?;
            if remote.current_period_start.is_some() {
                new_period_start = remote.current_period_start;
            }
            if remote.current_period_end.is_some() {
                new_period_end = remote.current_period_end;
            }
        }

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            UPDATE subscriptions
            SET plan_id = $3,
                current_period_start = $4,
                current_period_end = $5,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(subscription_id)
        .bind(status.as_str())
        .bind(new_plan_id)
        .bind(new_period_start)
        .bind(new_period_end)
        .execute(&mut *tx)
        .await?;

        if rows.rows_affected() == 0 {
            return Err(BillingError::Conflict(subscription_id));
        }

        append_event(
            &mut *tx,
            SubscriptionEventBuilder::new(subscription_id, SubscriptionEventType::PlanChanged)
                .payload(serde_json::json!({
                    "old_plan_id": sub.plan_id,
                    "new_plan_id": new_plan_id,
                })),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            subscription_id = %subscription_id,
            old_plan_id = %sub.plan_id,
            new_plan_id = %new_plan_id,
            "Plan changed"
        );

        Ok(PlanChangeResult {
            subscription_id,
            old_plan_id: sub.plan_id,
            new_plan_id,
            current_period_start: new_period_start,
            current_period_end: new_period_end,
        })
    }

    /// Change seat quantity. Gateway-first like plan changes.
    pub async fn change_quantity(
        &self,
        subscription_id: Uuid,
        quantity: i32,
    ) -> BillingResult<Subscription> {
        if quantity < 1 {
            return Err(BillingError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }

        let sub = self.get(subscription_id).await?;
        let status = sub.status()?;
        if !matches!(
            status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        ) {
            return Err(BillingError::Validation(format!(
                "quantity changes require an active or trialing subscription (status: {status})"
            )));
        }

        if let Some(provider_sub_id) = sub.provider_subscription_id.as_deref() {
            self.gateway
                .update_subscription(provider_sub_id, None, Some(quantity))
                .await?;
        }

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            UPDATE subscriptions
            SET quantity = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(subscription_id)
        .bind(status.as_str())
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        if rows.rows_affected() == 0 {
            return Err(BillingError::Conflict(subscription_id));
        }

        append_event(
            &mut *tx,
            SubscriptionEventBuilder::new(subscription_id, SubscriptionEventType::QuantityChanged)
                .payload(serde_json::json!({
                    "old_quantity": sub.quantity,
                    "new_quantity": quantity,
                })),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            subscription_id = %subscription_id,
            old_quantity = sub.quantity,
            new_quantity = quantity,
            "Quantity changed"
        );

        self.get(subscription_id).await
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> BillingResult<SubscriptionPlan> {
        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            r#"
            SELECT id, name, description, interval_unit, interval_count,
                   price_amount, currency, trial_days, setup_fee, status,
                   features, metadata, provider_price_id, created_at, updated_at
            FROM subscription_plans
            WHERE id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("plan {plan_id}")))?;

        Ok(plan)
    }
}
