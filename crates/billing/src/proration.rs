//! Proration quotes for mid-period plan changes.
//!
//! Primary path asks the gateway to preview the invoice a plan change would
//! produce and sums its proration lines, which accounts for the provider's
//! own rounding and any scheduled credits. When the gateway is unavailable
//! or the subscription has no remote counterpart, a linear day-based
//! estimate is produced instead and flagged as such: an estimate must never
//! be presented as an authoritative billing amount.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use revena_shared::money::round_half_up_div;

use crate::error::BillingResult;
use crate::gateway::{BillingGateway, GatewayError, GatewayInvoiceLine};
use crate::models::{Subscription, SubscriptionPlan};
use crate::subscriptions::SubscriptionService;

/// A proration quote. `immediate_charge` is what would be collected now;
/// `is_estimate` distinguishes the day-based fallback from gateway-exact
/// figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProrationResult {
    pub prorated_amount: i64,
    pub credit_amount: i64,
    pub immediate_charge: i64,
    pub is_estimate: bool,
}

impl ProrationResult {
    fn exact(prorated_amount: i64, credit_amount: i64) -> Self {
        Self {
            prorated_amount,
            credit_amount,
            immediate_charge: (prorated_amount - credit_amount).max(0),
            is_estimate: false,
        }
    }

    fn estimate(net: i64) -> Self {
        let (prorated_amount, credit_amount) = if net >= 0 { (net, 0) } else { (0, -net) };
        Self {
            prorated_amount,
            credit_amount,
            immediate_charge: (prorated_amount - credit_amount).max(0),
            is_estimate: true,
        }
    }
}

/// Sum the proration lines of a previewed invoice: positive amounts are
/// charges, negative amounts accumulate as credit. Non-proration lines
/// (the upcoming period's regular charge) are ignored.
pub fn sum_proration_lines(lines: &[GatewayInvoiceLine]) -> (i64, i64) {
    let mut charge = 0;
    let mut credit = 0;
    for line in lines.iter().filter(|l| l.is_proration) {
        if line.amount >= 0 {
            charge += line.amount;
        } else {
            credit += -line.amount;
        }
    }
    (charge, credit)
}

/// Linear day-based estimate of the net proration for switching from
/// `current_price` to `new_price` with `days_remaining` of `total_days`
/// left in the period. Zero when the period has no length.
pub fn estimate_net_proration(
    current_price: i64,
    new_price: i64,
    total_days: i64,
    days_remaining: i64,
) -> i64 {
    if total_days <= 0 {
        return 0;
    }
    let price_diff = new_price - current_price;
    let days_remaining = days_remaining.max(0);
    round_half_up_div(price_diff * days_remaining, total_days)
}

#[derive(Clone)]
pub struct ProrationService {
    subscriptions: SubscriptionService,
    gateway: Arc<dyn BillingGateway>,
}

impl ProrationService {
    pub fn new(subscriptions: SubscriptionService, gateway: Arc<dyn BillingGateway>) -> Self {
        Self {
            subscriptions,
            gateway,
        }
    }

    /// Quote the proration for moving a subscription to `new_plan_id`.
    pub async fn preview_plan_change(
        &self,
        subscription_id: Uuid,
        new_plan_id: Uuid,
    ) -> BillingResult<ProrationResult> {
        let sub = self.subscriptions.get(subscription_id).await?;
        let current_plan = self.subscriptions.get_plan(sub.plan_id).await?;
        let new_plan = self.subscriptions.get_plan(new_plan_id).await?;
        self.quote(&sub, &current_plan, &new_plan).await
    }

    /// Gateway-exact quote when possible, day-based estimate otherwise.
    /// Hard gateway failures propagate; only `Unavailable` (and a missing
    /// remote subscription or price) routes to the estimate.
    pub async fn quote(
        &self,
        sub: &Subscription,
        current_plan: &SubscriptionPlan,
        new_plan: &SubscriptionPlan,
    ) -> BillingResult<ProrationResult> {
        let remote = sub
            .provider_subscription_id
            .as_deref()
            .zip(new_plan.provider_price_id.as_deref());

        if let Some((provider_sub_id, provider_price_id)) = remote {
            match self
                .gateway
                .preview_invoice(provider_sub_id, provider_price_id)
                .await
            {
                Ok(lines) => {
                    let (charge, credit) = sum_proration_lines(&lines);
                    return Ok(ProrationResult::exact(charge, credit));
                }
                Err(GatewayError::Unavailable(reason)) => {
                    tracing::warn!(
                        subscription_id = %sub.id,
                        reason = %reason,
                        "Gateway unavailable for proration preview, falling back to estimate"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(self.estimate(sub, current_plan, new_plan))
    }

    fn estimate(
        &self,
        sub: &Subscription,
        current_plan: &SubscriptionPlan,
        new_plan: &SubscriptionPlan,
    ) -> ProrationResult {
        let now = OffsetDateTime::now_utc();
        let (total_days, days_remaining) =
            match (sub.current_period_start, sub.current_period_end) {
                (Some(start), Some(end)) => {
                    ((end - start).whole_days(), (end - now).whole_days())
                }
                _ => (0, 0),
            };

        let net = estimate_net_proration(
            current_plan.price_amount,
            new_plan.price_amount,
            total_days,
            days_remaining,
        );

        tracing::debug!(
            subscription_id = %sub.id,
            total_days = total_days,
            days_remaining = days_remaining,
            net = net,
            "Computed proration estimate"
        );

        ProrationResult::estimate(net)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sqlx::PgPool;
    use time::Duration;
    use uuid::Uuid;

    use crate::gateway::{
        GatewayCharge, GatewayResult, GatewaySubscription, PaymentInstrument,
    };

    /// Test double: programmable `preview_invoice`, everything else
    /// unavailable.
    struct PreviewGateway {
        preview: GatewayResult<Vec<GatewayInvoiceLine>>,
    }

    #[async_trait]
    impl BillingGateway for PreviewGateway {
        async fn create_subscription(
            &self,
            _c: &str,
            _p: &str,
            _q: i32,
        ) -> GatewayResult<GatewaySubscription> {
            Err(GatewayError::Unavailable("test".into()))
        }
        async fn retrieve_subscription(&self, _s: &str) -> GatewayResult<GatewaySubscription> {
            Err(GatewayError::Unavailable("test".into()))
        }
        async fn update_subscription(
            &self,
            _s: &str,
            _p: Option<&str>,
            _q: Option<i32>,
        ) -> GatewayResult<GatewaySubscription> {
            Err(GatewayError::Unavailable("test".into()))
        }
        async fn cancel_subscription(&self, _s: &str) -> GatewayResult<()> {
            Err(GatewayError::Unavailable("test".into()))
        }
        async fn collect_invoice(&self, _i: &str) -> GatewayResult<GatewayCharge> {
            Err(GatewayError::Unavailable("test".into()))
        }
        async fn preview_invoice(
            &self,
            _s: &str,
            _p: &str,
        ) -> GatewayResult<Vec<GatewayInvoiceLine>> {
            self.preview.clone()
        }
        async fn attach_payment_instrument(&self, _c: &str, _i: &str) -> GatewayResult<()> {
            Err(GatewayError::Unavailable("test".into()))
        }
        async fn detach_payment_instrument(&self, _i: &str) -> GatewayResult<()> {
            Err(GatewayError::Unavailable("test".into()))
        }
        async fn list_payment_instruments(
            &self,
            _c: &str,
        ) -> GatewayResult<Vec<PaymentInstrument>> {
            Err(GatewayError::Unavailable("test".into()))
        }
    }

    fn service(gateway: Arc<dyn BillingGateway>) -> ProrationService {
        // Lazy pool: never connected, the quote path under test does no I/O
        let pool = PgPool::connect_lazy("postgres://localhost/revena_test").unwrap();
        ProrationService::new(
            SubscriptionService::new(pool, gateway.clone()),
            gateway,
        )
    }

    fn subscription(provider_id: Option<&str>) -> Subscription {
        let now = OffsetDateTime::now_utc();
        Subscription {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            quantity: 1,
            status: "active".to_string(),
            // half-day offsets keep whole-day counts stable while the test runs
            current_period_start: Some(now - Duration::days(9) - Duration::hours(12)),
            current_period_end: Some(now + Duration::days(20) + Duration::hours(12)),
            trial_start: None,
            trial_end: None,
            cancel_at_period_end: false,
            cancelled_at: None,
            cancellation_reason: None,
            paused_at: None,
            resume_at: None,
            ended_at: None,
            shipping_address: None,
            provider_subscription_id: provider_id.map(str::to_string),
            provider_customer_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn plan(price: i64, provider_price_id: Option<&str>) -> SubscriptionPlan {
        let now = OffsetDateTime::now_utc();
        SubscriptionPlan {
            id: Uuid::new_v4(),
            name: "Plan".to_string(),
            description: None,
            interval_unit: "month".to_string(),
            interval_count: 1,
            price_amount: price,
            currency: "usd".to_string(),
            trial_days: None,
            setup_fee: None,
            status: "active".to_string(),
            features: vec![],
            metadata: serde_json::Value::Null,
            provider_price_id: provider_price_id.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn remote_subscription_gets_an_exact_quote() {
        let gateway = Arc::new(PreviewGateway {
            preview: Ok(vec![
                GatewayInvoiceLine {
                    description: "remaining time".into(),
                    amount: 2_500,
                    is_proration: true,
                },
                GatewayInvoiceLine {
                    description: "unused time".into(),
                    amount: -1_200,
                    is_proration: true,
                },
            ]),
        });
        let svc = service(gateway);

        let result = svc
            .quote(
                &subscription(Some("sub_remote")),
                &plan(1_000, Some("price_old")),
                &plan(4_000, Some("price_new")),
            )
            .await
            .unwrap();

        assert!(!result.is_estimate);
        assert_eq!(result.prorated_amount, 2_500);
        assert_eq!(result.credit_amount, 1_200);
        assert_eq!(result.immediate_charge, 1_300);
    }

    #[tokio::test]
    async fn unavailable_gateway_falls_back_to_estimate() {
        let gateway = Arc::new(PreviewGateway {
            preview: Err(GatewayError::Unavailable("maintenance".into())),
        });
        let svc = service(gateway);

        // 20 of 30 days left on a 3000-cent upgrade: 2000
        let result = svc
            .quote(
                &subscription(Some("sub_remote")),
                &plan(1_000, Some("price_old")),
                &plan(4_000, Some("price_new")),
            )
            .await
            .unwrap();

        assert!(result.is_estimate);
        assert_eq!(result.immediate_charge, 2_000);
    }

    #[tokio::test]
    async fn hard_gateway_failure_propagates() {
        let gateway = Arc::new(PreviewGateway {
            preview: Err(GatewayError::Failed("bad request".into())),
        });
        let svc = service(gateway);

        let err = svc
            .quote(
                &subscription(Some("sub_remote")),
                &plan(1_000, Some("price_old")),
                &plan(4_000, Some("price_new")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::BillingError::Gateway(_)));
    }

    #[tokio::test]
    async fn local_only_subscription_never_calls_the_gateway() {
        // A gateway that would fail hard is never reached without remote refs
        let gateway = Arc::new(PreviewGateway {
            preview: Err(GatewayError::Failed("must not be called".into())),
        });
        let svc = service(gateway);

        let result = svc
            .quote(
                &subscription(None),
                &plan(1_000, None),
                &plan(4_000, None),
            )
            .await
            .unwrap();
        assert!(result.is_estimate);
    }

    fn line(amount: i64, is_proration: bool) -> GatewayInvoiceLine {
        GatewayInvoiceLine {
            description: "line".to_string(),
            amount,
            is_proration,
        }
    }

    #[test]
    fn sums_only_proration_lines() {
        let lines = vec![
            line(2_500, true),   // remaining time on new plan
            line(-1_200, true),  // unused time on old plan
            line(4_999, false),  // next period's regular charge
        ];
        let (charge, credit) = sum_proration_lines(&lines);
        assert_eq!(charge, 2_500);
        assert_eq!(credit, 1_200);
    }

    #[test]
    fn exact_quote_nets_charge_against_credit() {
        let result = ProrationResult::exact(2_500, 1_200);
        assert_eq!(result.immediate_charge, 1_300);
        assert!(!result.is_estimate);

        // Credit exceeding the charge never produces a negative charge
        let result = ProrationResult::exact(500, 1_200);
        assert_eq!(result.immediate_charge, 0);
        assert_eq!(result.credit_amount, 1_200);
    }

    #[test]
    fn upgrade_estimate_charges_the_remaining_fraction() {
        // 1000 -> 3000 with 15 of 30 days left: diff 2000 * 15/30 = 1000
        let net = estimate_net_proration(1_000, 3_000, 30, 15);
        assert_eq!(net, 1_000);

        let result = ProrationResult::estimate(net);
        assert_eq!(result.prorated_amount, 1_000);
        assert_eq!(result.credit_amount, 0);
        assert_eq!(result.immediate_charge, 1_000);
        assert!(result.is_estimate);
    }

    #[test]
    fn downgrade_estimate_becomes_credit_not_charge() {
        // 3000 -> 1000 with 15 of 30 days left: net -1000
        let net = estimate_net_proration(3_000, 1_000, 30, 15);
        assert_eq!(net, -1_000);

        let result = ProrationResult::estimate(net);
        assert_eq!(result.prorated_amount, 0);
        assert_eq!(result.credit_amount, 1_000);
        assert_eq!(result.immediate_charge, 0);
        assert!(result.is_estimate);
    }

    #[test]
    fn estimate_rounds_half_up() {
        // diff 100 * 1/3 = 33.33 -> 33; diff 100 * 1/2 with 3-day... use 50/3
        assert_eq!(estimate_net_proration(0, 100, 3, 1), 33);
        // 100 * 3/8 = 37.5 -> 38
        assert_eq!(estimate_net_proration(0, 100, 8, 3), 38);
        // negative half rounds toward positive infinity: -37.5 -> -37
        assert_eq!(estimate_net_proration(100, 0, 8, 3), -37);
    }

    #[test]
    fn degenerate_periods_estimate_zero() {
        assert_eq!(estimate_net_proration(1_000, 3_000, 0, 0), 0);
        assert_eq!(estimate_net_proration(1_000, 3_000, -5, 2), 0);
        // past the period end: days remaining floors at 0
        assert_eq!(estimate_net_proration(1_000, 3_000, 30, -4), 0);
    }
}
