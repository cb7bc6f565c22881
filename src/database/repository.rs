use crate::database::error::DatabaseError;
use crate::database::models::{
    ApplyOutcome, NewOrder, NewPaymentRecord, Order, OrderItem, OrderStatusUpdate, OrderWithItems,
    PaymentRecord,
};
use crate::payments::types::{GatewayStatus, ProviderName};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// Durable storage for orders and their payment records.
///
/// `apply_gateway_status` must evaluate and write under one lock on the
/// payment record and its order so concurrent deliveries apply once.
#[async_trait]
pub trait OrderPaymentStore: Send + Sync {
    /// Inserts the order and its items atomically.
    async fn create_order(&self, order: NewOrder) -> Result<OrderWithItems, DatabaseError>;

    async fn get_order(&self, id: i64) -> Result<Option<Order>, DatabaseError>;

    async fn find_order_by_reference(&self, reference: &str)
        -> Result<Option<Order>, DatabaseError>;

    async fn order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, DatabaseError>;

    /// Returns `None` when the order does not exist or `expected_order_status`
    /// no longer matches.
    async fn update_order_status(
        &self,
        id: i64,
        update: OrderStatusUpdate,
    ) -> Result<Option<Order>, DatabaseError>;

    /// Fails with a unique violation when an active record already exists for
    /// the same order and provider, or a gateway key is reused.
    async fn insert_payment_record(
        &self,
        record: NewPaymentRecord,
    ) -> Result<PaymentRecord, DatabaseError>;

    /// Most recent record whose intent id, link id or external reference equals `key`.
    async fn find_payment_by_key(&self, key: &str) -> Result<Option<PaymentRecord>, DatabaseError>;

    async fn latest_payment_for_order(
        &self,
        order_id: i64,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// The non-failed record for this order and provider, if any.
    async fn active_payment_for_order(
        &self,
        order_id: i64,
        provider: ProviderName,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// Pending gateway records created before `created_before`, oldest first.
    async fn stale_pending_payments(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentRecord>, DatabaseError>;

    async fn apply_gateway_status(
        &self,
        key: &str,
        reported: GatewayStatus,
        metadata: JsonValue,
    ) -> Result<ApplyOutcome, DatabaseError>;

    async fn health_check(&self) -> Result<(), DatabaseError>;
}
