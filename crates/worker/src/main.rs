//! Revena Background Worker
//!
//! Handles scheduled billing jobs:
//! - Payment retry processing (hourly)
//! - Period-end cancellation rollover (hourly at :30)
//! - Gift subscription expiry sweep (daily at 2:00 AM UTC)
//! - Bundle savings refresh (daily at 3:00 AM UTC)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use revena_billing::{BillingService, UnconfiguredGateway};
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Revena Worker");

    // Create database pool
    let pool = create_db_pool().await?;

    // The worker always runs against the gateway seam; a concrete adapter is
    // injected by the deployment binary. Standalone, it uses the unconfigured
    // gateway: dunning records "no payment provider configured" and proration
    // falls back to estimates.
    let gateway = Arc::new(UnconfiguredGateway);

    let billing = match BillingService::from_env(pool.clone(), gateway) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            // Bad dunning/email config - run in minimal mode rather than crash-loop
            warn!(error = %e, "Failed to create billing service - running in minimal mode");

            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Process due payment retries (hourly)
    // Cron: at minute 0 of every hour
    let retry_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let billing = retry_billing.clone();
            Box::pin(async move {
                info!("Running payment retry batch");
                match billing.retries.process_due_retries().await {
                    Ok(summary) => {
                        info!(
                            processed = summary.processed,
                            succeeded = summary.succeeded,
                            failed = summary.failed,
                            cancelled = summary.cancelled,
                            "Payment retry batch complete"
                        );
                        for item in &summary.errors {
                            error!(item = %item, "Retry batch item failed");
                        }
                    }
                    Err(e) => error!(error = %e, "Payment retry batch failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Payment retry processing (hourly)");

    // Job 2: Period-end cancellation rollover (hourly at :30)
    // Cancels subscriptions flagged cancel_at_period_end whose period closed,
    // then expires cancelled subscriptions whose final period has ended.
    let rollover_pool = pool.clone();
    let rollover_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 30 * * * *", move |_uuid, _l| {
            let pool = rollover_pool.clone();
            let billing = rollover_billing.clone();
            Box::pin(async move {
                info!("Running period rollover job");

                let due: Vec<(Uuid,)> = sqlx::query_as(
                    r#"
                    SELECT id
                    FROM subscriptions
                    WHERE cancel_at_period_end = true
                      AND status IN ('active', 'trialing', 'past_due')
                      AND current_period_end < NOW()
                    "#,
                )
                .fetch_all(&pool)
                .await
                .unwrap_or_default();

                let total = due.len();
                let mut cancelled = 0;
                let mut errors = 0;

                for (subscription_id,) in due {
                    match billing
                        .subscriptions
                        .cancel_now(subscription_id, "cancelled at period end")
                        .await
                    {
                        Ok(_) => cancelled += 1,
                        Err(e) => {
                            error!(
                                subscription_id = %subscription_id,
                                error = %e,
                                "Failed to cancel subscription at period end"
                            );
                            errors += 1;
                        }
                    }
                }

                // Cancelled subscriptions with a closed final period move to expired
                let expirable: Vec<(Uuid,)> = sqlx::query_as(
                    r#"
                    SELECT id
                    FROM subscriptions
                    WHERE status = 'cancelled'
                      AND current_period_end IS NOT NULL
                      AND current_period_end < NOW()
                    "#,
                )
                .fetch_all(&pool)
                .await
                .unwrap_or_default();

                let mut expired = 0;
                for (subscription_id,) in expirable {
                    match billing.subscriptions.mark_expired(subscription_id).await {
                        Ok(_) => expired += 1,
                        Err(e) => {
                            error!(
                                subscription_id = %subscription_id,
                                error = %e,
                                "Failed to expire subscription"
                            );
                            errors += 1;
                        }
                    }
                }

                info!(
                    due = total,
                    cancelled = cancelled,
                    expired = expired,
                    errors = errors,
                    "Period rollover complete"
                );
            })
        })?)
        .await?;
    info!("Scheduled: Period rollover (hourly at :30)");

    // Job 3: Gift subscription expiry sweep (daily at 2:00 AM UTC)
    let gift_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 2 * * *", move |_uuid, _l| {
            let billing = gift_billing.clone();
            Box::pin(async move {
                info!("Running gift expiry sweep");
                match billing.gifts.expire_due_gifts().await {
                    Ok(summary) => info!(
                        processed = summary.processed,
                        expired = summary.expired,
                        errors = summary.errors.len(),
                        "Gift expiry sweep complete"
                    ),
                    Err(e) => error!(error = %e, "Gift expiry sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Gift expiry sweep (daily at 2:00 AM UTC)");

    // Job 4: Refresh bundle savings from current plan prices (daily at 3:00 AM UTC)
    let bundle_pool = pool.clone();
    let bundle_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let pool = bundle_pool.clone();
            let billing = bundle_billing.clone();
            Box::pin(async move {
                info!("Running bundle savings refresh");

                let bundles: Vec<(Uuid,)> = sqlx::query_as(
                    "SELECT id FROM subscription_bundles WHERE is_active = true",
                )
                .fetch_all(&pool)
                .await
                .unwrap_or_default();

                let total = bundles.len();
                let mut refreshed = 0;
                for (bundle_id,) in bundles {
                    match billing.bundles.refresh_savings(bundle_id).await {
                        Ok(_) => refreshed += 1,
                        Err(e) => {
                            error!(bundle_id = %bundle_id, error = %e, "Failed to refresh bundle")
                        }
                    }
                }

                info!(total = total, refreshed = refreshed, "Bundle savings refresh complete");
            })
        })?)
        .await?;
    info!("Scheduled: Bundle savings refresh (daily at 3:00 AM UTC)");

    // Job 5: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Revena Worker started successfully with {} scheduled jobs", 5);

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
