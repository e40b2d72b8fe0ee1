//! Order domain model and status state machine.
//!
//! An order is created at `pending_payment`, promoted to `paid` only by a
//! verified payment callback, then walked through fulfilment by the admin.
//! Transitions are forward-only; `cancelled` is reachable from any state
//! that has not been delivered. Re-applying the current status is an
//! idempotent no-op so duplicate webhook deliveries cannot error or
//! double-apply.

pub mod store;

pub use store::{OrderStore, SqliteOrderStore};

use crate::pricing::{PlanType, Quote};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle states in their forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Preparing,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Paid => "paid",
            Self::Preparing => "preparing",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "pending_payment" => Some(Self::PendingPayment),
            "paid" => Some(Self::Paid),
            "preparing" => Some(Self::Preparing),
            "out_for_delivery" => Some(Self::OutForDelivery),
            "delivered" => Some(Self::Delivered),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Position on the forward track. `cancelled` is off-track.
    fn ordinal(self) -> Option<u8> {
        match self {
            Self::PendingPayment => Some(0),
            Self::Paid => Some(1),
            Self::Preparing => Some(2),
            Self::OutForDelivery => Some(3),
            Self::Delivered => Some(4),
            Self::Cancelled => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    /// Equal states are not "advances" — callers treat them as idempotent
    /// no-ops instead.
    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        if next == Self::Cancelled {
            return !matches!(self, Self::Delivered | Self::Cancelled);
        }
        match (self.ordinal(), next.ordinal()) {
            (Some(from), Some(to)) => to > from,
            // nothing leaves `cancelled`, and `cancelled` itself is
            // handled above
            _ => false,
        }
    }

    /// Statuses the admin gateway may set directly. `paid` is reserved for
    /// the payment verifier; `pending_payment` is never a target.
    pub const ADMIN_SETTABLE: [OrderStatus; 4] = [
        Self::Preparing,
        Self::OutForDelivery,
        Self::Delivered,
        Self::Cancelled,
    ];
}

/// Who ordered and where it goes. Flattened into the order's wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub mobile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Proof of a verified payment, attached exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub provider_ref: String,
    pub verified: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub customer: Customer,
    #[serde(default)]
    pub note: String,
    #[serde(rename = "type")]
    pub plan: PlanType,
    pub qty: u32,
    pub distance_km: f64,
    pub unit_price: u32,
    pub delivery_fee: u32,
    pub amount: u32,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentReceipt>,
}

/// Validated input for [`OrderStore::create`]; id and timestamp are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer: Customer,
    pub note: String,
    pub plan: PlanType,
    pub qty: u32,
    pub distance_km: f64,
    pub quote: Quote,
}

/// Result of a status transition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The order moved to the requested status.
    Applied(Order),
    /// The order was already there — idempotent no-op.
    AlreadyInState(Order),
    /// The state machine forbids the move (e.g. backward, or out of
    /// `cancelled`). Nothing was written.
    Rejected { current: OrderStatus },
    /// No order with that id.
    NotFound,
}
