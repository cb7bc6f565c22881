//! In-process store used by tests and `SKIP_EXTERNALS` mode.
//!
//! One async mutex guards all state; every operation holds it from check to
//! write, which gives the same atomicity the Postgres row locks provide.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{
    merge_metadata, ApplyOutcome, NewOrder, NewPaymentRecord, Order, OrderItem, OrderStatusUpdate,
    OrderWithItems, PaymentRecord,
};
use crate::database::repository::OrderPaymentStore;
use crate::payments::types::{GatewayStatus, ProviderName};
use crate::services::state_machine::{plan_transition, OrderStatus, PaymentStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    orders: Vec<Order>,
    items: Vec<OrderItem>,
    payments: Vec<PaymentRecord>,
    next_order_id: i64,
    next_item_id: i64,
    next_payment_id: i64,
    apply_writes: u64,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

fn unique_violation(constraint: &str) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::UniqueViolation {
        constraint: Some(constraint.to_string()),
    })
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of applies that actually changed a status. Lets tests assert an
    /// order was updated exactly once.
    pub async fn applied_transition_count(&self) -> u64 {
        self.state.lock().await.apply_writes
    }

    pub async fn payment_count(&self) -> usize {
        self.state.lock().await.payments.len()
    }

    pub async fn payments_for_order(&self, order_id: i64) -> Vec<PaymentRecord> {
        self.state
            .lock()
            .await
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect()
    }
}

impl State {
    fn latest_by_key(&self, key: &str) -> Option<usize> {
        self.payments
            .iter()
            .enumerate()
            .filter(|(_, p)| p.matches_key(key))
            .max_by_key(|(_, p)| p.id)
            .map(|(idx, _)| idx)
    }

    fn order_index(&self, id: i64) -> Option<usize> {
        self.orders.iter().position(|o| o.id == id)
    }
}

#[async_trait]
impl OrderPaymentStore for InMemoryStore {
    async fn create_order(&self, new: NewOrder) -> Result<OrderWithItems, DatabaseError> {
        let mut state = self.state.lock().await;
        if state.orders.iter().any(|o| o.reference == new.reference) {
            return Err(unique_violation("orders_reference_key"));
        }

        state.next_order_id += 1;
        let now = Utc::now();
        let order = Order {
            id: state.next_order_id,
            reference: new.reference,
            user_id: new.user_id,
            guest: new.guest,
            branch: new.branch,
            subtotal: new.subtotal,
            tax: new.tax,
            total: new.total,
            order_status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        let mut items = Vec::with_capacity(new.items.len());
        for item in new.items {
            state.next_item_id += 1;
            items.push(OrderItem {
                id: state.next_item_id,
                order_id: order.id,
                product_name: item.product_name,
                size: item.size,
                modifiers: item.modifiers,
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total,
            });
        }

        state.orders.push(order.clone());
        state.items.extend(items.iter().cloned());
        Ok(OrderWithItems { order, items })
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn find_order_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .iter()
            .find(|o| o.reference == reference)
            .cloned())
    }

    async fn order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn update_order_status(
        &self,
        id: i64,
        update: OrderStatusUpdate,
    ) -> Result<Option<Order>, DatabaseError> {
        let mut state = self.state.lock().await;
        let Some(idx) = state.order_index(id) else {
            return Ok(None);
        };
        let order = &mut state.orders[idx];
        if let Some(expected) = update.expected_order_status {
            if order.order_status != expected {
                return Ok(None);
            }
        }
        if let Some(status) = update.order_status {
            order.order_status = status;
        }
        if let Some(status) = update.payment_status {
            order.payment_status = status;
        }
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }

    async fn insert_payment_record(
        &self,
        new: NewPaymentRecord,
    ) -> Result<PaymentRecord, DatabaseError> {
        let mut state = self.state.lock().await;
        if state.order_index(new.order_id).is_none() {
            return Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Order".to_string(),
                id: new.order_id.to_string(),
            }));
        }

        for existing in state.payments.iter().filter(|p| p.provider == new.provider) {
            if existing.order_id == new.order_id && existing.status != PaymentStatus::Failed {
                return Err(unique_violation("payment_records_active_per_provider"));
            }
            if existing.intent_id == new.intent_id {
                return Err(unique_violation("payment_records_provider_intent_id_key"));
            }
            if new.link_id.is_some() && existing.link_id == new.link_id {
                return Err(unique_violation("payment_records_provider_link_id_key"));
            }
            if new.external_reference.is_some()
                && existing.external_reference == new.external_reference
            {
                return Err(unique_violation(
                    "payment_records_provider_external_reference_key",
                ));
            }
        }

        state.next_payment_id += 1;
        let now = Utc::now();
        let record = PaymentRecord {
            id: state.next_payment_id,
            order_id: new.order_id,
            provider: new.provider,
            intent_id: new.intent_id,
            link_id: new.link_id,
            external_reference: new.external_reference,
            amount: new.amount,
            currency: new.currency,
            payment_url: new.payment_url,
            status: PaymentStatus::Pending,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        };
        state.payments.push(record.clone());
        Ok(record)
    }

    async fn find_payment_by_key(&self, key: &str) -> Result<Option<PaymentRecord>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state.latest_by_key(key).map(|idx| state.payments[idx].clone()))
    }

    async fn latest_payment_for_order(
        &self,
        order_id: i64,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .max_by_key(|p| p.id)
            .cloned())
    }

    async fn active_payment_for_order(
        &self,
        order_id: i64,
        provider: ProviderName,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| {
                p.order_id == order_id
                    && p.provider == provider
                    && p.status != PaymentStatus::Failed
            })
            .max_by_key(|p| p.id)
            .cloned())
    }

    async fn stale_pending_payments(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentRecord>, DatabaseError> {
        let state = self.state.lock().await;
        let mut stale: Vec<PaymentRecord> = state
            .payments
            .iter()
            .filter(|p| {
                p.status == PaymentStatus::Pending
                    && p.provider.is_gateway()
                    && p.created_at < created_before
            })
            .cloned()
            .collect();
        stale.sort_by_key(|p| (p.created_at, p.id));
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }

    async fn apply_gateway_status(
        &self,
        key: &str,
        reported: GatewayStatus,
        metadata: JsonValue,
    ) -> Result<ApplyOutcome, DatabaseError> {
        let mut state = self.state.lock().await;
        let Some(payment_idx) = state.latest_by_key(key) else {
            return Ok(ApplyOutcome::UnknownKey);
        };
        let order_id = state.payments[payment_idx].order_id;
        let order_idx = state.order_index(order_id).ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Order".to_string(),
                id: order_id.to_string(),
            })
        })?;

        let previous = state.payments[payment_idx].status;
        let order = &state.orders[order_idx];
        let plan = plan_transition(previous, order.payment_status, order.order_status, reported);

        if plan.is_noop() {
            return Ok(ApplyOutcome::Unchanged {
                record: state.payments[payment_idx].clone(),
                order: state.orders[order_idx].clone(),
            });
        }

        let now = Utc::now();
        {
            let record = &mut state.payments[payment_idx];
            if plan.merge_metadata {
                merge_metadata(&mut record.metadata, metadata);
            }
            if let Some(status) = plan.record_status {
                record.status = status;
            }
            record.updated_at = now;
        }
        if plan.changes_status() {
            let order = &mut state.orders[order_idx];
            if let Some(status) = plan.order_payment_status {
                order.payment_status = status;
            }
            if let Some(status) = plan.order_status {
                order.order_status = status;
            }
            order.updated_at = now;
        }

        let record = state.payments[payment_idx].clone();
        let order = state.orders[order_idx].clone();
        if plan.changes_status() {
            state.apply_writes += 1;
            Ok(ApplyOutcome::Applied {
                record,
                order,
                previous,
            })
        } else {
            Ok(ApplyOutcome::Unchanged { record, order })
        }
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}
