//! Bundle pricing.
//!
//! A bundle's savings are derived from its constituent plan prices. Savings
//! are never negative: a bundle priced at or above the sum of its parts
//! reports zero, not a negative number.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use revena_shared::money::round_half_up_div;

use crate::error::{BillingError, BillingResult};

/// Computed savings versus buying the constituent plans individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BundleSavings {
    pub amount: i64,
    pub percentage: i64,
}

/// Savings for a bundle price against the individual plan prices.
/// Percentage is 0 when the individual total is 0.
pub fn bundle_savings(individual_prices: &[i64], bundle_price: i64) -> BundleSavings {
    let total_individual: i64 = individual_prices.iter().sum();
    let amount = (total_individual - bundle_price).max(0);
    let percentage = if total_individual == 0 {
        0
    } else {
        round_half_up_div(amount * 100, total_individual)
    };

    BundleSavings { amount, percentage }
}

/// Recomputes and persists bundle savings from current plan prices.
#[derive(Clone)]
pub struct BundleService {
    pool: PgPool,
}

impl BundleService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Recompute savings for a bundle from its constituent plans' current
    /// prices and persist both figures.
    pub async fn refresh_savings(&self, bundle_id: Uuid) -> BillingResult<BundleSavings> {
        let bundle: (Vec<Uuid>, i64) = sqlx::query_as(
            r#"
            SELECT plan_ids, bundle_price
            FROM subscription_bundles
            WHERE id = $1
            "#,
        )
        .bind(bundle_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("bundle {bundle_id}")))?;

        let (plan_ids, bundle_price) = bundle;

        let prices: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT price_amount
            FROM subscription_plans
            WHERE id = ANY($1)
            "#,
        )
        .bind(&plan_ids)
        .fetch_all(&self.pool)
        .await?;

        let individual: Vec<i64> = prices.into_iter().map(|(p,)| p).collect();
        let savings = bundle_savings(&individual, bundle_price);

        sqlx::query(
            r#"
            UPDATE subscription_bundles
            SET savings_amount = $2,
                savings_percentage = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(bundle_id)
        .bind(savings.amount)
        .bind(savings.percentage)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            bundle_id = %bundle_id,
            savings_amount = savings.amount,
            savings_percentage = savings.percentage,
            "Bundle savings refreshed"
        );

        Ok(savings)
    }
}
