//! Order persistence: a trait seam over a SQLite-backed ledger.
//!
//! The trait exists so the gateway can run against test doubles; the real
//! store serializes every write through one connection behind a mutex,
//! which also satisfies the per-order write-serialization requirement.
//! Each `create`/`transition` is committed before the call returns, so a
//! crash immediately after a successful call cannot lose the mutation.

use super::{Customer, NewOrder, Order, OrderStatus, PaymentReceipt, TransitionOutcome};
use crate::pricing::PlanType;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a new order with a fresh unique id at `pending_payment`.
    async fn create(&self, new_order: NewOrder) -> Result<Order>;

    async fn get(&self, id: &str) -> Result<Option<Order>>;

    /// All orders, most recent first.
    async fn list(&self) -> Result<Vec<Order>>;

    /// Apply a status transition under the store's write lock. The state
    /// machine decides legality; a `receipt` is attached when the target
    /// status is reached through payment verification.
    async fn transition(
        &self,
        id: &str,
        next: OrderStatus,
        receipt: Option<PaymentReceipt>,
    ) -> Result<TransitionOutcome>;
}

/// SQLite-backed order ledger.
pub struct SqliteOrderStore {
    conn: Mutex<Connection>,
}

impl SqliteOrderStore {
    /// Open (or create) the ledger at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open order store at {}", path.display()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                mobile TEXT NOT NULL,
                customer_name TEXT,
                address TEXT,
                note TEXT NOT NULL DEFAULT '',
                plan TEXT NOT NULL,
                qty INTEGER NOT NULL,
                distance_km REAL NOT NULL DEFAULT 0,
                unit_price INTEGER NOT NULL,
                delivery_fee INTEGER NOT NULL,
                amount INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending_payment',
                payment_ref TEXT,
                payment_verified INTEGER,
                paid_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn fetch_order(conn: &Connection, id: &str) -> Result<Option<Order>> {
        let row = conn
            .query_row(
                "SELECT id, created_at, mobile, customer_name, address, note, plan, qty,
                        distance_km, unit_price, delivery_fee, amount, status,
                        payment_ref, payment_verified, paid_at
                 FROM orders WHERE id = ?1",
                params![id],
                Self::row_to_raw,
            )
            .optional()?;
        row.map(RawOrder::into_order).transpose()
    }

    fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawOrder> {
        Ok(RawOrder {
            id: row.get(0)?,
            created_at: row.get(1)?,
            mobile: row.get(2)?,
            customer_name: row.get(3)?,
            address: row.get(4)?,
            note: row.get(5)?,
            plan: row.get(6)?,
            qty: row.get(7)?,
            distance_km: row.get(8)?,
            unit_price: row.get(9)?,
            delivery_fee: row.get(10)?,
            amount: row.get(11)?,
            status: row.get(12)?,
            payment_ref: row.get(13)?,
            payment_verified: row.get(14)?,
            paid_at: row.get(15)?,
        })
    }
}

/// Column-level image of an order row; converted after the rusqlite
/// closure so chrono/enum parse failures surface as real errors instead
/// of being squeezed into `rusqlite::Error`.
struct RawOrder {
    id: String,
    created_at: String,
    mobile: String,
    customer_name: Option<String>,
    address: Option<String>,
    note: String,
    plan: String,
    qty: u32,
    distance_km: f64,
    unit_price: u32,
    delivery_fee: u32,
    amount: u32,
    status: String,
    payment_ref: Option<String>,
    payment_verified: Option<bool>,
    paid_at: Option<String>,
}

impl RawOrder {
    fn into_order(self) -> Result<Order> {
        let payment = match (self.payment_ref, self.paid_at) {
            (Some(provider_ref), Some(at)) => Some(PaymentReceipt {
                provider_ref,
                verified: self.payment_verified.unwrap_or(false),
                at: parse_ts(&at)?,
            }),
            _ => None,
        };
        Ok(Order {
            created_at: parse_ts(&self.created_at)?,
            customer: Customer {
                mobile: self.mobile,
                name: self.customer_name,
                address: self.address,
            },
            note: self.note,
            plan: PlanType::from_str_opt(&self.plan)
                .ok_or_else(|| anyhow!("corrupt plan type in store: {}", self.plan))?,
            qty: self.qty,
            distance_km: self.distance_km,
            unit_price: self.unit_price,
            delivery_fee: self.delivery_fee,
            amount: self.amount,
            status: OrderStatus::from_str_opt(&self.status)
                .ok_or_else(|| anyhow!("corrupt status in store: {}", self.status))?,
            payment,
            id: self.id,
        })
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp in store: {raw}"))?
        .with_timezone(&Utc))
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn create(&self, new_order: NewOrder) -> Result<Order> {
        let order = Order {
            id: Uuid::new_v4().simple().to_string(),
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

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO orders (id, created_at, mobile, customer_name, address, note, plan,
                                 qty, distance_km, unit_price, delivery_fee, amount, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                order.id,
                order.created_at.to_rfc3339(),
                order.customer.mobile,
                order.customer.name,
                order.customer.address,
                order.note,
                order.plan.as_str(),
                order.qty,
                order.distance_km,
                order.unit_price,
                order.delivery_fee,
                order.amount,
                order.status.as_str(),
            ],
        )?;

        Ok(order)
    }

    async fn get(&self, id: &str) -> Result<Option<Order>> {
        let conn = self.conn.lock();
        Self::fetch_order(&conn, id)
    }

    async fn list(&self) -> Result<Vec<Order>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, created_at, mobile, customer_name, address, note, plan, qty,
                    distance_km, unit_price, delivery_fee, amount, status,
                    payment_ref, payment_verified, paid_at
             FROM orders ORDER BY rowid DESC",
        )?;
        let raws: Vec<RawOrder> = stmt
            .query_map([], Self::row_to_raw)?
            .collect::<rusqlite::Result<_>>()?;
        raws.into_iter().map(RawOrder::into_order).collect()
    }

    async fn transition(
        &self,
        id: &str,
        next: OrderStatus,
        receipt: Option<PaymentReceipt>,
    ) -> Result<TransitionOutcome> {
        let conn = self.conn.lock();

        let Some(order) = Self::fetch_order(&conn, id)? else {
            return Ok(TransitionOutcome::NotFound);
        };

        if order.status == next {
            return Ok(TransitionOutcome::AlreadyInState(order));
        }
        if !order.status.can_advance_to(next) {
            return Ok(TransitionOutcome::Rejected {
                current: order.status,
            });
        }

        match &receipt {
            Some(receipt) => {
                conn.execute(
                    "UPDATE orders
                     SET status = ?1, payment_ref = ?2, payment_verified = ?3, paid_at = ?4
                     WHERE id = ?5",
                    params![
                        next.as_str(),
                        receipt.provider_ref,
                        receipt.verified,
                        receipt.at.to_rfc3339(),
                        id,
                    ],
                )?;
            }
            None => {
                conn.execute(
                    "UPDATE orders SET status = ?1 WHERE id = ?2",
                    params![next.as_str(), id],
                )?;
            }
        }

        let mut updated = order;
        updated.status = next;
        if receipt.is_some() {
            updated.payment = receipt;
        }
        Ok(TransitionOutcome::Applied(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::Quote;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteOrderStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteOrderStore::open(&tmp.path().join("orders.db")).unwrap();
        (tmp, store)
    }

    fn sample_order() -> NewOrder {
        NewOrder {
            customer: Customer {
                mobile: "9876543210".into(),
                name: Some("Asha".into()),
                address: None,
            },
            note: "less spicy".into(),
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

    fn receipt() -> PaymentReceipt {
        PaymentReceipt {
            provider_ref: "pay_ABC123".into(),
            verified: true,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let (_tmp, store) = test_store();

        let created = store.create(sample_order()).await.unwrap();
        assert_eq!(created.status, OrderStatus::PendingPayment);
        assert_eq!(created.amount, 220);

        let fetched = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn get_unknown_id_is_none() {
        let (_tmp, store) = test_store();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn creates_yield_unique_ids() {
        let (_tmp, store) = test_store();
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let order = store.create(sample_order()).await.unwrap();
            assert!(ids.insert(order.id));
        }
        assert_eq!(ids.len(), 1000);
    }

    #[tokio::test]
    async fn list_is_most_recent_first() {
        let (_tmp, store) = test_store();
        let first = store.create(sample_order()).await.unwrap();
        let second = store.create(sample_order()).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);
    }

    #[tokio::test]
    async fn transition_to_paid_attaches_receipt() {
        let (_tmp, store) = test_store();
        let order = store.create(sample_order()).await.unwrap();

        let outcome = store
            .transition(&order.id, OrderStatus::Paid, Some(receipt()))
            .await
            .unwrap();
        let TransitionOutcome::Applied(updated) = outcome else {
            panic!("expected Applied, got {outcome:?}");
        };
        assert_eq!(updated.status, OrderStatus::Paid);
        assert_eq!(updated.payment.as_ref().unwrap().provider_ref, "pay_ABC123");

        // and it survives a reload
        let fetched = store.get(&order.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, OrderStatus::Paid);
        assert!(fetched.payment.unwrap().verified);
    }

    #[tokio::test]
    async fn repeat_transition_is_idempotent() {
        let (_tmp, store) = test_store();
        let order = store.create(sample_order()).await.unwrap();

        store
            .transition(&order.id, OrderStatus::Paid, Some(receipt()))
            .await
            .unwrap();
        let second = store
            .transition(&order.id, OrderStatus::Paid, Some(receipt()))
            .await
            .unwrap();

        assert!(matches!(second, TransitionOutcome::AlreadyInState(_)));
        let fetched = store.get(&order.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, OrderStatus::Paid);
        // the original receipt is untouched
        assert_eq!(fetched.payment.unwrap().provider_ref, "pay_ABC123");
    }

    #[tokio::test]
    async fn backward_transition_is_rejected_without_write() {
        let (_tmp, store) = test_store();
        let order = store.create(sample_order()).await.unwrap();
        store
            .transition(&order.id, OrderStatus::Delivered, None)
            .await
            .unwrap();

        let outcome = store
            .transition(&order.id, OrderStatus::Preparing, None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Rejected {
                current: OrderStatus::Delivered
            }
        );
        let fetched = store.get(&order.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, OrderStatus::Delivered);
    }

    #[tokio::test]
    async fn transition_unknown_id_is_not_found() {
        let (_tmp, store) = test_store();
        let outcome = store
            .transition("missing", OrderStatus::Delivered, None)
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::NotFound);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_after_delivery_is_rejected() {
        let (_tmp, store) = test_store();
        let order = store.create(sample_order()).await.unwrap();
        store
            .transition(&order.id, OrderStatus::Delivered, None)
            .await
            .unwrap();

        let outcome = store
            .transition(&order.id, OrderStatus::Cancelled, None)
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn store_reopens_durably() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("orders.db");
        let id = {
            let store = SqliteOrderStore::open(&path).unwrap();
            let order = store.create(sample_order()).await.unwrap();
            store
                .transition(&order.id, OrderStatus::Paid, Some(receipt()))
                .await
                .unwrap();
            order.id
        };

        let reopened = SqliteOrderStore::open(&path).unwrap();
        let fetched = reopened.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.status, OrderStatus::Paid);
    }
}
