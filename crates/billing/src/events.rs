//! Subscription audit event log.
//!
//! Append-only, one row per transition. Events carry the previous and new
//! status snapshot plus a typed JSON payload describing the trigger.

use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use revena_shared::{SubscriptionEventType, SubscriptionStatus};

use crate::error::BillingResult;

/// Stored audit record.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SubscriptionEvent {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub previous_status: Option<String>,
    pub new_status: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Builder for a single event row.
#[derive(Debug, Clone)]
pub struct SubscriptionEventBuilder {
    subscription_id: Uuid,
    event_type: SubscriptionEventType,
    payload: serde_json::Value,
    previous_status: Option<SubscriptionStatus>,
    new_status: Option<SubscriptionStatus>,
}

impl SubscriptionEventBuilder {
    pub fn new(subscription_id: Uuid, event_type: SubscriptionEventType) -> Self {
        Self {
            subscription_id,
            event_type,
            payload: serde_json::Value::Null,
            previous_status: None,
            new_status: None,
        }
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn status_change(
        mut self,
        previous: SubscriptionStatus,
        new: SubscriptionStatus,
    ) -> Self {
        self.previous_status = Some(previous);
        self.new_status = Some(new);
        self
    }
}

/// Append one event row through any executor, so a status transition can
/// write its state change and its audit event in the same transaction.
pub async fn append_event<'e, E>(executor: E, event: SubscriptionEventBuilder) -> BillingResult<Uuid>
where
    E: sqlx::PgExecutor<'e>,
{
    let row: (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO subscription_events (
            subscription_id,
            event_type,
            payload,
            previous_status,
            new_status
        )
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(event.subscription_id)
    .bind(event.event_type.as_str())
    .bind(&event.payload)
    .bind(event.previous_status.map(|s| s.as_str()))
    .bind(event.new_status.map(|s| s.as_str()))
    .fetch_one(executor)
    .await?;

    Ok(row.0)
}

/// Appends audit events. Cloneable; each service holds its own.
#[derive(Clone)]
pub struct SubscriptionEventLogger {
    pool: PgPool,
}

impl SubscriptionEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn log_event(&self, event: SubscriptionEventBuilder) -> BillingResult<Uuid> {
        append_event(&self.pool, event).await
    }

    /// History for one subscription, newest first.
    pub async fn list_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> BillingResult<Vec<SubscriptionEvent>> {
        let events = sqlx::query_as::<_, SubscriptionEvent>(
            r#"
            SELECT id, subscription_id, event_type, payload,
                   previous_status, new_status, created_at
            FROM subscription_events
            WHERE subscription_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}
