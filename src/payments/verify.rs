//! Payment-callback verification.
//!
//! Two callback shapes arrive from the provider, modeled as a tagged
//! [`CallbackSource`] rather than ad-hoc branching:
//!
//! - **Redirect confirmation** — query parameters carrying a payment id,
//!   a payment-link or order id, and a signature over
//!   `"{link_or_order_id}|{payment_id}"` keyed with the API key secret.
//! - **Webhook event** — a raw JSON body signed in the
//!   `x-razorpay-signature` header, keyed with the webhook-specific
//!   secret. No fallback to the key secret: a deployment without the
//!   webhook secret fails loudly instead of verifying against the wrong
//!   key.
//!
//! Verification never touches the order store; a verified result names
//! the order to promote and the caller applies the idempotent transition.

use crate::error::AppError;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A payment confirmation received from the outside world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackSource {
    /// Browser redirect after a hosted checkout (GET query params).
    RedirectConfirmation {
        payment_id: String,
        payment_link_id: Option<String>,
        order_id: Option<String>,
        signature: String,
        /// Our own order id, echoed through the callback URL.
        local_order_id: Option<String>,
    },
    /// Asynchronous event notification (raw POST body + signature header).
    WebhookEvent { body: Vec<u8>, signature: String },
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub verified: bool,
    /// The order to mark paid, when the callback named one.
    pub order_id: Option<String>,
    /// Provider-side reference stored on the receipt.
    pub provider_ref: String,
}

/// Secrets used to authenticate callbacks. Either may be absent in a
/// partially configured deployment; verification of the corresponding
/// shape then fails with `MissingSecret`.
pub struct PaymentVerifier {
    key_secret: Option<String>,
    webhook_secret: Option<String>,
}

impl PaymentVerifier {
    pub fn new(key_secret: Option<String>, webhook_secret: Option<String>) -> Self {
        Self {
            key_secret,
            webhook_secret,
        }
    }

    /// Authenticate a callback. `Ok` means the signature verified and the
    /// caller may act on the named order; `SignatureMismatch` means the
    /// callback must be rejected without mutating anything.
    pub fn verify_callback(&self, source: &CallbackSource) -> Result<VerificationResult, AppError> {
        match source {
            CallbackSource::RedirectConfirmation {
                payment_id,
                payment_link_id,
                order_id,
                signature,
                local_order_id,
            } => {
                let secret = self.key_secret.as_deref().ok_or(AppError::MissingSecret)?;
                let verified = verify_redirect_signature(
                    secret,
                    payment_id,
                    payment_link_id.as_deref(),
                    order_id.as_deref(),
                    signature,
                );
                if !verified {
                    return Err(AppError::SignatureMismatch);
                }
                Ok(VerificationResult {
                    verified: true,
                    order_id: local_order_id.clone(),
                    provider_ref: payment_id.clone(),
                })
            }
            CallbackSource::WebhookEvent { body, signature } => {
                let secret = self
                    .webhook_secret
                    .as_deref()
                    .ok_or(AppError::MissingSecret)?;
                if !verify_webhook_signature(secret, body, signature) {
                    return Err(AppError::SignatureMismatch);
                }
                let event = parse_webhook_event(body)
                    .ok_or_else(|| AppError::Validation("malformed webhook payload".into()))?;
                Ok(VerificationResult {
                    verified: true,
                    order_id: event.order_id,
                    provider_ref: event.provider_ref,
                })
            }
        }
    }
}

/// Verify a redirect-style confirmation. Both id flavors are tried when
/// present — at most one can match a genuine signature, so first match
/// wins and ordering carries no preference.
pub fn verify_redirect_signature(
    secret: &str,
    payment_id: &str,
    payment_link_id: Option<&str>,
    order_id: Option<&str>,
    signature: &str,
) -> bool {
    if payment_id.is_empty() {
        return false;
    }
    [payment_link_id, order_id]
        .into_iter()
        .flatten()
        .filter(|base_id| !base_id.is_empty())
        .any(|base_id| {
            let base = format!("{base_id}|{payment_id}");
            hmac_matches(secret, base.as_bytes(), signature)
        })
}

/// Verify an event notification: HMAC-SHA256 over the exact raw bytes,
/// hex signature, exact match required.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    hmac_matches(secret, body, signature)
}

/// Recompute HMAC-SHA256 and compare against a hex signature in constant
/// time. Malformed hex never verifies.
fn hmac_matches(secret: &str, payload: &[u8], hex_signature: &str) -> bool {
    let Ok(expected) = hex::decode(hex_signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// The slice of a provider event we act on: the payment entity's id and
/// the order reference planted in its notes at link-creation time.
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    payload: Option<WebhookPayload>,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    payment: Option<WebhookEntityWrapper>,
}

#[derive(Debug, Deserialize)]
struct WebhookEntityWrapper {
    #[serde(default)]
    entity: Option<PaymentEntity>,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    notes: Option<PaymentNotes>,
}

#[derive(Debug, Deserialize)]
struct PaymentNotes {
    #[serde(rename = "orderId")]
    order_id: Option<String>,
}

struct ParsedEvent {
    order_id: Option<String>,
    provider_ref: String,
}

/// Pull the order reference out of a verified event body. Returns `None`
/// only when the body is not JSON at all; an event without an embedded
/// order reference parses fine and simply names no order.
fn parse_webhook_event(body: &[u8]) -> Option<ParsedEvent> {
    let envelope: WebhookEnvelope = serde_json::from_slice(body).ok()?;
    let entity = envelope
        .payload
        .and_then(|p| p.payment)
        .and_then(|w| w.entity);
    let (payment_id, order_id) = match entity {
        Some(entity) => (entity.id, entity.notes.and_then(|n| n.order_id)),
        None => (None, None),
    };
    Some(ParsedEvent {
        order_id,
        provider_ref: payment_id
            .or(envelope.event)
            .unwrap_or_else(|| "webhook".into()),
    })
}
