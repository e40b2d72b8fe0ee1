//! Hosted payment-link client for the Razorpay Payment Links API.
//!
//! One outbound POST per link; HTTP Basic auth from the configured key
//! pair, a bounded request timeout, and no lock held while the call is in
//! flight. Provider error statuses propagate with their response body so
//! the operator can see what the dashboard would show.

use crate::config::RazorpayConfig;
use crate::error::AppError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use std::time::Duration;

/// Payment Links endpoint.
const PAYMENT_LINKS_API: &str = "https://api.razorpay.com/v1/payment_links";

/// Upper bound on one provider round-trip.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(15);

/// Customer details forwarded to the hosted checkout page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCustomer {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

/// Inputs for one payment link.
#[derive(Debug, Clone)]
pub struct CreateLink {
    /// Whole rupees; converted to paise on the wire.
    pub amount: u32,
    pub customer: LinkCustomer,
    pub description: Option<String>,
    /// Stable reference — the order id when the link belongs to an order,
    /// so re-issuing for the same order stays idempotent on the provider
    /// side.
    pub reference_id: String,
}

#[derive(Debug, Deserialize)]
struct PaymentLinkResponse {
    short_url: String,
}

pub struct RazorpayClient {
    key_id: String,
    key_secret: String,
    callback_url: Option<String>,
    http: reqwest::Client,
    api_base: String,
}

impl RazorpayClient {
    /// `None` when the key pair is not configured — callers surface that
    /// as `MissingCredentials` instead of attempting an unauthenticated
    /// call.
    pub fn from_config(config: &RazorpayConfig) -> Option<Self> {
        let key_id = config.key_id.clone()?;
        let key_secret = config.key_secret.clone()?;
        let callback_url = config
            .callback_base_url
            .as_ref()
            .map(|base| format!("{}/payments/webhook", base.trim_end_matches('/')));
        Some(Self {
            key_id,
            key_secret,
            callback_url,
            http: reqwest::Client::new(),
            api_base: PAYMENT_LINKS_API.to_owned(),
        })
    }

    #[cfg(test)]
    fn for_tests() -> Self {
        Self {
            key_id: "rzp_test_key".into(),
            key_secret: "secret".into(),
            callback_url: Some("https://tiffin.example.com/payments/webhook".into()),
            http: reqwest::Client::new(),
            api_base: PAYMENT_LINKS_API.to_owned(),
        }
    }

    fn basic_auth(&self) -> String {
        let raw = format!("{}:{}", self.key_id, self.key_secret);
        format!("Basic {}", BASE64.encode(raw.as_bytes()))
    }

    /// Wire body for the Payment Links API.
    fn build_link_body(&self, link: &CreateLink) -> serde_json::Value {
        let mut body = serde_json::json!({
            "amount": u64::from(link.amount) * 100,
            "currency": "INR",
            "accept_partial": false,
            "reference_id": link.reference_id,
            "description": link.description.as_deref().unwrap_or("Tiffin order"),
            "customer": {
                "name": link.customer.name,
                "contact": link.customer.phone,
                "email": link.customer.email.as_deref().unwrap_or(""),
            },
            "notify": { "sms": true, "email": true },
        });
        if let Some(ref callback) = self.callback_url {
            body["callback_url"] = serde_json::json!(callback);
            body["callback_method"] = serde_json::json!("get");
        }
        body
    }

    /// Create a shareable payment link and return its URL.
    pub async fn create_payment_link(&self, link: &CreateLink) -> Result<String, AppError> {
        let body = self.build_link_body(link);

        let response = self
            .http
            .post(&self.api_base)
            .header(reqwest::header::AUTHORIZATION, self.basic_auth())
            .timeout(PROVIDER_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("payment link request failed: {e}")))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let detail = response
                .json::<serde_json::Value>()
                .await
                .unwrap_or(serde_json::Value::Null);
            tracing::warn!(status = status.as_u16(), "payment link creation rejected");
            return Err(AppError::Provider {
                status: status.as_u16(),
                detail,
            });
        }

        let parsed: PaymentLinkResponse = response.json().await.map_err(|e| {
            AppError::Internal(anyhow::anyhow!("malformed payment link response: {e}"))
        })?;
        tracing::info!(reference_id = %link.reference_id, "payment link created");
        Ok(parsed.short_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_link() -> CreateLink {
        CreateLink {
            amount: 220,
            customer: LinkCustomer {
                name: "Asha".into(),
                phone: "9876543210".into(),
                email: None,
            },
            description: None,
            reference_id: "abc123".into(),
        }
    }

    #[test]
    fn from_config_requires_both_keys() {
        let mut config = RazorpayConfig::default();
        assert!(RazorpayClient::from_config(&config).is_none());

        config.key_id = Some("rzp_test_key".into());
        assert!(RazorpayClient::from_config(&config).is_none());

        config.key_secret = Some("secret".into());
        assert!(RazorpayClient::from_config(&config).is_some());
    }

    #[test]
    fn basic_auth_encodes_key_pair() {
        let client = RazorpayClient::for_tests();
        // base64("rzp_test_key:secret")
        assert_eq!(client.basic_auth(), "Basic cnpwX3Rlc3Rfa2V5OnNlY3JldA==");
    }

    #[test]
    fn link_body_converts_rupees_to_paise() {
        let client = RazorpayClient::for_tests();
        let body = client.build_link_body(&sample_link());
        assert_eq!(body["amount"], 22000);
        assert_eq!(body["currency"], "INR");
        assert_eq!(body["accept_partial"], false);
    }

    #[test]
    fn link_body_carries_reference_and_customer() {
        let client = RazorpayClient::for_tests();
        let body = client.build_link_body(&sample_link());
        assert_eq!(body["reference_id"], "abc123");
        assert_eq!(body["customer"]["name"], "Asha");
        assert_eq!(body["customer"]["contact"], "9876543210");
        assert_eq!(body["customer"]["email"], "");
    }

    #[test]
    fn link_body_sets_get_callback() {
        let client = RazorpayClient::for_tests();
        let body = client.build_link_body(&sample_link());
        assert_eq!(
            body["callback_url"],
            "https://tiffin.example.com/payments/webhook"
        );
        assert_eq!(body["callback_method"], "get");
    }

    #[test]
    fn link_body_omits_callback_when_unconfigured() {
        let config = RazorpayConfig {
            key_id: Some("k".into()),
            key_secret: Some("s".into()),
            webhook_secret: None,
            callback_base_url: None,
        };
        let client = RazorpayClient::from_config(&config).unwrap();
        let body = client.build_link_body(&sample_link());
        assert!(body.get("callback_url").is_none());
    }

    #[test]
    fn callback_url_strips_trailing_slash() {
        let config = RazorpayConfig {
            key_id: Some("k".into()),
            key_secret: Some("s".into()),
            webhook_secret: None,
            callback_base_url: Some("https://host.example/".into()),
        };
        let client = RazorpayClient::from_config(&config).unwrap();
        assert_eq!(
            client.callback_url.as_deref(),
            Some("https://host.example/payments/webhook")
        );
    }
}
