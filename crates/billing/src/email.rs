//! Billing notification emails.
//!
//! Fire-and-collect-result: every send returns whether it went out, and
//! failures are logged, never propagated — an email outage must not block a
//! billing operation. Runs in disabled mode when no API key is configured.

use serde_json::json;
use time::OffsetDateTime;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Clone)]
pub struct BillingEmailService {
    client: reqwest::Client,
    api_key: Option<String>,
    from_address: String,
}

impl BillingEmailService {
    /// Reads `RESEND_API_KEY` and `BILLING_EMAIL_FROM`. Missing key means
    /// disabled mode: sends are skipped and logged at debug.
    pub fn from_env() -> Self {
        let api_key = std::env::var("RESEND_API_KEY").ok().filter(|k| !k.is_empty());
        let from_address = std::env::var("BILLING_EMAIL_FROM")
            .unwrap_or_else(|_| "billing@revena.app".to_string());

        if api_key.is_none() {
            tracing::warn!("RESEND_API_KEY not set - billing emails disabled");
        }

        Self {
            client: reqwest::Client::new(),
            api_key,
            from_address,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Dunning notice: which attempt just failed, how many remain, and when
    /// the next retry runs (None once retries are exhausted).
    pub async fn send_payment_failed(
        &self,
        to: &str,
        attempt_number: i32,
        max_attempts: u32,
        next_retry_at: Option<OffsetDateTime>,
    ) -> bool {
        let retry_line = match next_retry_at {
            Some(at) => format!(
                "We will retry your payment on {}. Please make sure your payment method is up to date.",
                at.date()
            ),
            None => "We have exhausted our payment retries. Your subscription will be cancelled \
                     shortly unless payment is resolved."
                .to_string(),
        };

        self.send(
            to,
            &format!("Payment failed (attempt {attempt_number} of {max_attempts})"),
            &format!(
                "<p>We were unable to collect your subscription payment \
                 (attempt {attempt_number} of {max_attempts}).</p><p>{retry_line}</p>"
            ),
        )
        .await
    }

    pub async fn send_subscription_confirmation(&self, to: &str, plan_name: &str) -> bool {
        self.send(
            to,
            "Your subscription is confirmed",
            &format!("<p>Welcome! Your subscription to <strong>{plan_name}</strong> is active.</p>"),
        )
        .await
    }

    pub async fn send_plan_change_confirmation(
        &self,
        to: &str,
        old_plan_name: &str,
        new_plan_name: &str,
    ) -> bool {
        self.send(
            to,
            "Your plan has changed",
            &format!(
                "<p>Your subscription moved from <strong>{old_plan_name}</strong> to \
                 <strong>{new_plan_name}</strong>. Any prorated charge or credit will appear \
                 on your next invoice.</p>"
            ),
        )
        .await
    }

    /// Gift purchase notices go to both parties: a receipt to the sender and
    /// the redemption code to the recipient.
    pub async fn send_gift_purchase_notices(
        &self,
        sender_email: &str,
        recipient_email: &str,
        plan_name: &str,
        redemption_code: &str,
    ) -> (bool, bool) {
        let sender_sent = self
            .send(
                sender_email,
                "Your gift subscription is on its way",
                &format!("<p>Thanks for gifting <strong>{plan_name}</strong>!</p>"),
            )
            .await;

        let recipient_sent = self
            .send(
                recipient_email,
                "You've received a gift subscription",
                &format!(
                    "<p>You've been gifted <strong>{plan_name}</strong>. Redeem it with code \
                     <strong>{redemption_code}</strong>.</p>"
                ),
            )
            .await;

        (sender_sent, recipient_sent)
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> bool {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::debug!(to = %to, subject = %subject, "Email disabled - skipping send");
            return false;
        };

        let body = json!({
            "from": self.from_address,
            "to": [to],
            "subject": subject,
            "html": html,
        });

        match self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(to = %to, subject = %subject, "Billing email sent");
                true
            }
            Ok(resp) => {
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    status = %resp.status(),
                    "Billing email rejected"
                );
                false
            }
            Err(e) => {
                tracing::error!(to = %to, subject = %subject, error = %e, "Billing email failed");
                false
            }
        }
    }
}
