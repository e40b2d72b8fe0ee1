//! Payment plumbing: link issuance and verified-callback application.
//!
//! ## Design
//! - Two issuance strategies behind one entry point: a UPI deep link
//!   (deterministic string, no network) and a provider-hosted payment
//!   link (one outbound API call). The caller picks the method.
//! - Callback verification is pure (`verify`); applying a verified
//!   confirmation to the store (`mark_paid`) is idempotent so the
//!   provider's at-least-once delivery cannot double-apply.

pub mod razorpay;
pub mod upi;
pub mod verify;

pub use razorpay::{CreateLink, LinkCustomer, RazorpayClient};
pub use verify::{CallbackSource, PaymentVerifier, VerificationResult};

use crate::error::AppError;
use crate::orders::{Order, OrderStatus, OrderStore, PaymentReceipt, TransitionOutcome};
use chrono::Utc;
use uuid::Uuid;

/// How the customer will pay. Caller-selected, never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    UpiDeepLink,
    HostedPaymentLink,
}

/// A payable handle returned to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayableReference {
    UpiDeepLink { url: String, amount: u32 },
    HostedPaymentLink { url: String },
}

impl PayableReference {
    pub fn url(&self) -> &str {
        match self {
            Self::UpiDeepLink { url, .. } | Self::HostedPaymentLink { url } => url,
        }
    }
}

/// Issues payable references for orders.
pub struct PaymentLinkIssuer {
    payee_vpa: String,
    payee_name: String,
    razorpay: Option<RazorpayClient>,
}

impl PaymentLinkIssuer {
    pub fn new(payee_vpa: String, payee_name: String, razorpay: Option<RazorpayClient>) -> Self {
        Self {
            payee_vpa,
            payee_name,
            razorpay,
        }
    }

    /// Produce a payable reference for a persisted order.
    pub async fn issue(
        &self,
        order: &Order,
        method: PaymentMethod,
    ) -> Result<PayableReference, AppError> {
        match method {
            PaymentMethod::UpiDeepLink => Ok(PayableReference::UpiDeepLink {
                url: upi::deep_link(
                    &self.payee_vpa,
                    &self.payee_name,
                    order.amount,
                    &format!("Order {}", order.id),
                ),
                amount: order.amount,
            }),
            PaymentMethod::HostedPaymentLink => {
                let url = self
                    .create_hosted_link(CreateLink {
                        amount: order.amount,
                        customer: LinkCustomer {
                            name: order
                                .customer
                                .name
                                .clone()
                                .unwrap_or_else(|| order.customer.mobile.clone()),
                            phone: order.customer.mobile.clone(),
                            email: None,
                        },
                        description: Some(format!("Tiffin order {}", order.id)),
                        reference_id: order.id.clone(),
                    })
                    .await?;
                Ok(PayableReference::HostedPaymentLink { url })
            }
        }
    }

    /// Create a hosted payment link outside the order flow (the
    /// `/payments/create_link` surface). Validates required fields and
    /// falls back to a fresh UUID reference when no order id is supplied.
    pub async fn create_hosted_link(&self, mut link: CreateLink) -> Result<String, AppError> {
        if link.amount == 0 {
            return Err(AppError::Validation("amount must be positive".into()));
        }
        if link.customer.name.trim().is_empty() || link.customer.phone.trim().is_empty() {
            return Err(AppError::Validation(
                "customer name and phone are required".into(),
            ));
        }
        if link.reference_id.trim().is_empty() {
            link.reference_id = Uuid::new_v4().simple().to_string();
        }

        let client = self.razorpay.as_ref().ok_or(AppError::MissingCredentials)?;
        client.create_payment_link(&link).await
    }
}

/// Apply a verified payment confirmation to the store: promote the order
/// to `paid` and attach the receipt. Unknown order, already-paid order,
/// and state-machine rejections are all no-ops — duplicates and replays
/// from the provider must never error or double-apply.
pub async fn mark_paid(
    store: &dyn OrderStore,
    result: &VerificationResult,
) -> Result<(), AppError> {
    let Some(ref order_id) = result.order_id else {
        tracing::debug!("verified callback named no order — nothing to apply");
        return Ok(());
    };

    let receipt = PaymentReceipt {
        provider_ref: result.provider_ref.clone(),
        verified: true,
        at: Utc::now(),
    };

    match store
        .transition(order_id, OrderStatus::Paid, Some(receipt))
        .await?
    {
        TransitionOutcome::Applied(_) => {
            tracing::info!(order_id = %order_id, provider_ref = %result.provider_ref, "order paid");
        }
        TransitionOutcome::AlreadyInState(_) => {
            tracing::info!(order_id = %order_id, "duplicate payment confirmation ignored");
        }
        TransitionOutcome::Rejected { current } => {
            tracing::warn!(
                order_id = %order_id,
                current = current.as_str(),
                "payment confirmation for order outside pending state — ignored"
            );
        }
        TransitionOutcome::NotFound => {
            tracing::warn!(order_id = %order_id, "payment confirmation for unknown order — ignored");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{Customer, NewOrder};
    use crate::pricing::{PlanType, Quote};
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// In-memory stand-in for the SQLite store.
    #[derive(Default)]
    struct MockStore {
        orders: Mutex<HashMap<String, Order>>,
        next_id: Mutex<u32>,
    }

    #[async_trait]
    impl OrderStore for MockStore {
        async fn create(&self, new_order: NewOrder) -> Result<Order> {
            let mut next_id = self.next_id.lock();
            *next_id += 1;
            let order = Order {
                id: format!("order-{}", *next_id),
                created_at: Utc::now(),
                customer: new_order.customer,
                note: new_order.note,
                plan: new_order.plan,
                qty: new_order.qty,
                distance_km: new_order.distance_km,
                unit_price: new_order.quote.unit_price,
                delivery_fee: new_order.quote.delivery_fee,
                amount: new_order.quote.amount,
                status: OrderStatus::PendingPayment,
                payment: None,
            };
            self.orders.lock().insert(order.id.clone(), order.clone());
            Ok(order)
        }

        async fn get(&self, id: &str) -> Result<Option<Order>> {
            Ok(self.orders.lock().get(id).cloned())
        }

        async fn list(&self) -> Result<Vec<Order>> {
            Ok(self.orders.lock().values().cloned().collect())
        }

        async fn transition(
            &self,
            id: &str,
            next: OrderStatus,
            receipt: Option<PaymentReceipt>,
        ) -> Result<TransitionOutcome> {
            let mut orders = self.orders.lock();
            let Some(order) = orders.get_mut(id) else {
                return Ok(TransitionOutcome::NotFound);
            };
            if order.status == next {
                return Ok(TransitionOutcome::AlreadyInState(order.clone()));
            }
            if !order.status.can_advance_to(next) {
                return Ok(TransitionOutcome::Rejected {
                    current: order.status,
                });
            }
            order.status = next;
            if receipt.is_some() {
                order.payment = receipt;
            }
            Ok(TransitionOutcome::Applied(order.clone()))
        }
    }

    fn sample_order() -> NewOrder {
        NewOrder {
            customer: Customer {
                mobile: "9876543210".into(),
                name: None,
                address: None,
            },
            note: String::new(),
            plan: PlanType::Daily,
            qty: 2,
            distance_km: 5.0,
            quote: Quote {
                unit_price: 90,
                delivery_fee: 40,
                amount: 220,
            },
        }
    }

    fn issuer() -> PaymentLinkIssuer {
        PaymentLinkIssuer::new("sharmatiffin@upi".into(), "Sharma Tiffin".into(), None)
    }

    fn verified(order_id: Option<&str>) -> VerificationResult {
        VerificationResult {
            verified: true,
            order_id: order_id.map(str::to_owned),
            provider_ref: "pay_123".into(),
        }
    }

    #[tokio::test]
    async fn upi_reference_carries_order_id_and_amount() {
        let store = MockStore::default();
        let order = store.create(sample_order()).await.unwrap();

        let reference = issuer()
            .issue(&order, PaymentMethod::UpiDeepLink)
            .await
            .unwrap();
        let PayableReference::UpiDeepLink { url, amount } = reference else {
            panic!("expected UPI reference");
        };
        assert_eq!(amount, 220);
        assert!(url.contains("am=220.00"));
        assert!(url.contains(&urlencoding::encode(&format!("Order {}", order.id)).into_owned()));
    }

    #[tokio::test]
    async fn hosted_link_without_credentials_is_missing_credentials() {
        let store = MockStore::default();
        let order = store.create(sample_order()).await.unwrap();

        let result = issuer().issue(&order, PaymentMethod::HostedPaymentLink).await;
        assert!(matches!(result, Err(AppError::MissingCredentials)));
    }

    #[tokio::test]
    async fn hosted_link_validates_before_credentials() {
        // missing customer fields must 400 even on an unconfigured server
        let result = issuer()
            .create_hosted_link(CreateLink {
                amount: 100,
                customer: LinkCustomer {
                    name: String::new(),
                    phone: "987".into(),
                    email: None,
                },
                description: None,
                reference_id: "r1".into(),
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let result = issuer()
            .create_hosted_link(CreateLink {
                amount: 0,
                customer: LinkCustomer {
                    name: "Asha".into(),
                    phone: "987".into(),
                    email: None,
                },
                description: None,
                reference_id: "r1".into(),
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn mark_paid_promotes_pending_order() {
        let store = MockStore::default();
        let order = store.create(sample_order()).await.unwrap();

        mark_paid(&store, &verified(Some(&order.id))).await.unwrap();

        let updated = store.get(&order.id).await.unwrap().unwrap();
        assert_eq!(updated.status, OrderStatus::Paid);
        assert_eq!(updated.payment.unwrap().provider_ref, "pay_123");
    }

    #[tokio::test]
    async fn mark_paid_twice_is_a_no_op() {
        let store = MockStore::default();
        let order = store.create(sample_order()).await.unwrap();

        mark_paid(&store, &verified(Some(&order.id))).await.unwrap();
        let first = store.get(&order.id).await.unwrap().unwrap();

        mark_paid(&store, &verified(Some(&order.id))).await.unwrap();
        let second = store.get(&order.id).await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(second.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn mark_paid_unknown_order_is_a_no_op() {
        let store = MockStore::default();
        mark_paid(&store, &verified(Some("ghost"))).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_paid_without_order_reference_is_a_no_op() {
        let store = MockStore::default();
        let order = store.create(sample_order()).await.unwrap();
        mark_paid(&store, &verified(None)).await.unwrap();
        let untouched = store.get(&order.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, OrderStatus::PendingPayment);
    }

    #[tokio::test]
    async fn mark_paid_on_cancelled_order_is_a_no_op() {
        let store = MockStore::default();
        let order = store.create(sample_order()).await.unwrap();
        store
            .transition(&order.id, OrderStatus::Cancelled, None)
            .await
            .unwrap();

        mark_paid(&store, &verified(Some(&order.id))).await.unwrap();
        let untouched = store.get(&order.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, OrderStatus::Cancelled);
        assert!(untouched.payment.is_none());
    }
}
