use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{
    merge_metadata, ApplyOutcome, GuestContact, NewOrder, NewPaymentRecord, Order, OrderItem,
    OrderStatusUpdate, OrderWithItems, PaymentRecord,
};
use crate::database::repository::OrderPaymentStore;
use crate::payments::types::{GatewayStatus, ProviderName};
use crate::services::state_machine::{plan_transition, OrderStatus, PaymentStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{types::BigDecimal, FromRow, PgConnection, PgPool};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, reference, user_id, guest_name, guest_email, guest_phone, \
     branch, subtotal, tax, total, order_status, payment_status, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, order_id, provider, intent_id, link_id, external_reference, \
     amount, currency, payment_url, status, metadata, created_at, updated_at";

#[derive(Debug, FromRow)]
struct OrderRow {
    id: i64,
    reference: String,
    user_id: Option<Uuid>,
    guest_name: Option<String>,
    guest_email: Option<String>,
    guest_phone: Option<String>,
    branch: String,
    subtotal: BigDecimal,
    tax: BigDecimal,
    total: BigDecimal,
    order_status: String,
    payment_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DatabaseError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let guest = row.guest_name.map(|name| GuestContact {
            name,
            email: row.guest_email,
            phone: row.guest_phone,
        });
        Ok(Order {
            id: row.id,
            reference: row.reference,
            user_id: row.user_id,
            guest,
            branch: row.branch,
            subtotal: row.subtotal,
            tax: row.tax,
            total: row.total,
            order_status: OrderStatus::from_str(&row.order_status).map_err(DatabaseError::decode)?,
            payment_status: PaymentStatus::from_str(&row.payment_status)
                .map_err(DatabaseError::decode)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct OrderItemRow {
    id: i64,
    order_id: i64,
    product_name: String,
    size: Option<String>,
    modifiers: Vec<String>,
    quantity: i32,
    unit_price: BigDecimal,
    line_total: BigDecimal,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        OrderItem {
            id: row.id,
            order_id: row.order_id,
            product_name: row.product_name,
            size: row.size,
            modifiers: row.modifiers,
            quantity: row.quantity,
            unit_price: row.unit_price,
            line_total: row.line_total,
        }
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: i64,
    order_id: i64,
    provider: String,
    intent_id: String,
    link_id: Option<String>,
    external_reference: Option<String>,
    amount: BigDecimal,
    currency: String,
    payment_url: Option<String>,
    status: String,
    metadata: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(PaymentRecord {
            id: row.id,
            order_id: row.order_id,
            provider: ProviderName::from_str(&row.provider)
                .map_err(|e| DatabaseError::decode(e.to_string()))?,
            intent_id: row.intent_id,
            link_id: row.link_id,
            external_reference: row.external_reference,
            amount: row.amount,
            currency: row.currency.trim().to_string(),
            payment_url: row.payment_url,
            status: PaymentStatus::from_str(&row.status).map_err(DatabaseError::decode)?,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn to_payment(row: Option<PaymentRow>) -> Result<Option<PaymentRecord>, DatabaseError> {
    row.map(PaymentRecord::try_from).transpose()
}

fn to_order(row: Option<OrderRow>) -> Result<Option<Order>, DatabaseError> {
    row.map(Order::try_from).transpose()
}

/// Postgres-backed store. Status changes run inside one transaction holding
/// `FOR UPDATE` locks on the payment record and then its order.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_payment_by_key(
        conn: &mut PgConnection,
        key: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records
             WHERE intent_id = $1 OR link_id = $1 OR external_reference = $1
             ORDER BY id DESC
             LIMIT 1
             FOR UPDATE"
        ))
        .bind(key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        to_payment(row)
    }

    async fn lock_order(conn: &mut PgConnection, id: i64) -> Result<Order, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        to_order(row)?.ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Order".to_string(),
                id: id.to_string(),
            })
        })
    }
}

#[async_trait]
impl OrderPaymentStore for PgStore {
    async fn create_order(&self, new: NewOrder) -> Result<OrderWithItems, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let (guest_name, guest_email, guest_phone) = match &new.guest {
            Some(guest) => (
                Some(guest.name.as_str()),
                guest.email.as_deref(),
                guest.phone.as_deref(),
            ),
            None => (None, None, None),
        };

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders
             (reference, user_id, guest_name, guest_email, guest_phone, branch, subtotal, tax, total)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(&new.reference)
        .bind(new.user_id)
        .bind(guest_name)
        .bind(guest_email)
        .bind(guest_phone)
        .bind(&new.branch)
        .bind(&new.subtotal)
        .bind(&new.tax)
        .bind(&new.total)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        let order = Order::try_from(row)?;

        let mut items = Vec::with_capacity(new.items.len());
        for item in &new.items {
            let row = sqlx::query_as::<_, OrderItemRow>(
                "INSERT INTO order_items
                 (order_id, product_name, size, modifiers, quantity, unit_price, line_total)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 RETURNING id, order_id, product_name, size, modifiers, quantity, unit_price, line_total",
            )
            .bind(order.id)
            .bind(&item.product_name)
            .bind(&item.size)
            .bind(&item.modifiers)
            .bind(item.quantity)
            .bind(&item.unit_price)
            .bind(&item.line_total)
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
            items.push(OrderItem::from(row));
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(OrderWithItems { order, items })
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        to_order(row)
    }

    async fn find_order_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        to_order(row)
    }

    async fn order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, DatabaseError> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            "SELECT id, order_id, product_name, size, modifiers, quantity, unit_price, line_total
             FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(rows.into_iter().map(OrderItem::from).collect())
    }

    async fn update_order_status(
        &self,
        id: i64,
        update: OrderStatusUpdate,
    ) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders
             SET order_status = COALESCE($2, order_status),
                 payment_status = COALESCE($3, payment_status),
                 updated_at = NOW()
             WHERE id = $1 AND ($4::TEXT IS NULL OR order_status = $4)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id)
        .bind(update.order_status.map(|s| s.as_str()))
        .bind(update.payment_status.map(|s| s.as_str()))
        .bind(update.expected_order_status.map(|s| s.as_str()))
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        to_order(row)
    }

    async fn insert_payment_record(
        &self,
        new: NewPaymentRecord,
    ) -> Result<PaymentRecord, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "INSERT INTO payment_records
             (order_id, provider, intent_id, link_id, external_reference, amount, currency,
              payment_url, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(new.order_id)
        .bind(new.provider.as_str())
        .bind(&new.intent_id)
        .bind(&new.link_id)
        .bind(&new.external_reference)
        .bind(&new.amount)
        .bind(&new.currency)
        .bind(&new.payment_url)
        .bind(&new.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        PaymentRecord::try_from(row)
    }

    async fn find_payment_by_key(&self, key: &str) -> Result<Option<PaymentRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records
             WHERE intent_id = $1 OR link_id = $1 OR external_reference = $1
             ORDER BY id DESC
             LIMIT 1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        to_payment(row)
    }

    async fn latest_payment_for_order(
        &self,
        order_id: i64,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records
             WHERE order_id = $1
             ORDER BY id DESC
             LIMIT 1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        to_payment(row)
    }

    async fn active_payment_for_order(
        &self,
        order_id: i64,
        provider: ProviderName,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records
             WHERE order_id = $1 AND provider = $2 AND status <> 'failed'
             ORDER BY id DESC
             LIMIT 1"
        ))
        .bind(order_id)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        to_payment(row)
    }

    async fn stale_pending_payments(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentRecord>, DatabaseError> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records
             WHERE status = 'pending' AND provider <> 'cash' AND created_at < $1
             ORDER BY created_at ASC, id ASC
             LIMIT $2"
        ))
        .bind(created_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        rows.into_iter().map(PaymentRecord::try_from).collect()
    }

    async fn apply_gateway_status(
        &self,
        key: &str,
        reported: GatewayStatus,
        metadata: JsonValue,
    ) -> Result<ApplyOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let Some(mut record) = Self::lock_payment_by_key(&mut tx, key).await? else {
            tx.commit().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(ApplyOutcome::UnknownKey);
        };
        let mut order = Self::lock_order(&mut tx, record.order_id).await?;

        let previous = record.status;
        let plan = plan_transition(previous, order.payment_status, order.order_status, reported);
        if plan.is_noop() {
            tx.commit().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(ApplyOutcome::Unchanged { record, order });
        }

        if plan.merge_metadata {
            merge_metadata(&mut record.metadata, metadata);
        }
        if let Some(status) = plan.record_status {
            record.status = status;
        }

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payment_records
             SET status = $2, metadata = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(record.id)
        .bind(record.status.as_str())
        .bind(&record.metadata)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        let record = PaymentRecord::try_from(row)?;

        if plan.changes_status() {
            if let Some(status) = plan.order_payment_status {
                order.payment_status = status;
            }
            if let Some(status) = plan.order_status {
                order.order_status = status;
            }
            let row = sqlx::query_as::<_, OrderRow>(&format!(
                "UPDATE orders
                 SET payment_status = $2, order_status = $3, updated_at = NOW()
                 WHERE id = $1
                 RETURNING {ORDER_COLUMNS}"
            ))
            .bind(order.id)
            .bind(order.payment_status.as_str())
            .bind(order.order_status.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
            order = Order::try_from(row)?;
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        debug!(
            payment_id = record.id,
            order_id = order.id,
            previous = %previous,
            current = %record.status,
            "gateway status applied"
        );

        if plan.changes_status() {
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
        crate::database::health_check(&self.pool).await
    }
}
