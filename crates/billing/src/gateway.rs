//! Billing gateway seam.
//!
//! The core never depends on a specific payment vendor's SDK shape. Instead
//! it talks to this narrow trait: remote subscription lifecycle, invoice
//! collection, invoice preview for proration, and payment instruments.
//! Concrete adapters (Stripe, Braintree, a test double) implement it out of
//! tree; [`UnconfiguredGateway`] ships here so the worker can run in minimal
//! mode when no provider is configured.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway failures. `Unavailable` is deliberately separate from the hard
/// failures: proration falls back to an estimate on `Unavailable`, and
/// dunning records the decline reason from `Declined`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Gateway unreachable, or no remote object exists for this entity.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The charge was attempted and declined.
    #[error("payment declined ({code}): {message}")]
    Declined { code: String, message: String },

    /// Any other hard failure (bad request, remote 5xx, parse error).
    #[error("gateway failure: {0}")]
    Failed(String),
}

/// Remote subscription snapshot as the gateway reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySubscription {
    pub provider_subscription_id: String,
    pub status: String,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
}

/// Result of collecting an open invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCharge {
    pub provider_charge_id: String,
    pub amount: i64,
    pub currency: String,
}

/// One line from a previewed invoice. Proration lines carry
/// `is_proration = true`; positive amounts are charges, negative are credits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayInvoiceLine {
    pub description: String,
    pub amount: i64,
    pub is_proration: bool,
}

/// A stored payment instrument on the remote customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInstrument {
    pub provider_instrument_id: String,
    pub kind: String,
    pub last_four: Option<String>,
    pub is_default: bool,
}

/// Narrow interface over the external payment processor.
#[async_trait]
pub trait BillingGateway: Send + Sync {
    /// Create a remote subscription for a customer on a provider price.
    async fn create_subscription(
        &self,
        provider_customer_id: &str,
        provider_price_id: &str,
        quantity: i32,
    ) -> GatewayResult<GatewaySubscription>;

    async fn retrieve_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> GatewayResult<GatewaySubscription>;

    /// Move the remote subscription to a new price and/or quantity. Returns
    /// the updated snapshot so callers can adopt new period bounds.
    async fn update_subscription(
        &self,
        provider_subscription_id: &str,
        provider_price_id: Option<&str>,
        quantity: Option<i32>,
    ) -> GatewayResult<GatewaySubscription>;

    async fn cancel_subscription(&self, provider_subscription_id: &str) -> GatewayResult<()>;

    /// Attempt to collect an open invoice. `Declined` carries the failure
    /// reason used by the dunning engine.
    async fn collect_invoice(&self, provider_invoice_id: &str) -> GatewayResult<GatewayCharge>;

    /// Preview the invoice that would result from moving the subscription's
    /// line item to `provider_price_id`, including proration lines.
    async fn preview_invoice(
        &self,
        provider_subscription_id: &str,
        provider_price_id: &str,
    ) -> GatewayResult<Vec<GatewayInvoiceLine>>;

    async fn attach_payment_instrument(
        &self,
        provider_customer_id: &str,
        provider_instrument_id: &str,
    ) -> GatewayResult<()>;

    async fn detach_payment_instrument(
        &self,
        provider_instrument_id: &str,
    ) -> GatewayResult<()>;

    async fn list_payment_instruments(
        &self,
        provider_customer_id: &str,
    ) -> GatewayResult<Vec<PaymentInstrument>>;
}

/// Minimal-mode gateway used when no payment provider is configured.
/// Every call reports `Unavailable`, which routes proration to the estimate
/// path and dunning to "no payment provider configured".
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredGateway;

impl UnconfiguredGateway {
    fn unavailable<T>(&self) -> GatewayResult<T> {
        Err(GatewayError::Unavailable(
            "no payment provider configured".to_string(),
        ))
    }
}

#[async_trait]
impl BillingGateway for UnconfiguredGateway {
    async fn create_subscription(
        &self,
        _provider_customer_id: &str,
        _provider_price_id: &str,
        _quantity: i32,
    ) -> GatewayResult<GatewaySubscription> {
        self.unavailable()
    }

    async fn retrieve_subscription(
        &self,
        _provider_subscription_id: &str,
    ) -> GatewayResult<GatewaySubscription> {
        self.unavailable()
    }

    async fn update_subscription(
        &self,
        _provider_subscription_id: &str,
        _provider_price_id: Option<&str>,
        _quantity: Option<i32>,
    ) -> GatewayResult<GatewaySubscription> {
        self.unavailable()
    }

    async fn cancel_subscription(&self, _provider_subscription_id: &str) -> GatewayResult<()> {
        self.unavailable()
    }

    async fn collect_invoice(&self, _provider_invoice_id: &str) -> GatewayResult<GatewayCharge> {
        self.unavailable()
    }

    async fn preview_invoice(
        &self,
        _provider_subscription_id: &str,
        _provider_price_id: &str,
    ) -> GatewayResult<Vec<GatewayInvoiceLine>> {
        self.unavailable()
    }

    async fn attach_payment_instrument(
        &self,
        _provider_customer_id: &str,
        _provider_instrument_id: &str,
    ) -> GatewayResult<()> {
        self.unavailable()
    }

    async fn detach_payment_instrument(
        &self,
        _provider_instrument_id: &str,
    ) -> GatewayResult<()> {
        self.unavailable()
    }

    async fn list_payment_instruments(
        &self,
        _provider_customer_id: &str,
    ) -> GatewayResult<Vec<PaymentInstrument>> {
        self.unavailable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_gateway_reports_unavailable() {
        let gateway = UnconfiguredGateway;
        let err = gateway.collect_invoice("in_123").await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
        assert!(err.to_string().contains("no payment provider configured"));
    }
}
