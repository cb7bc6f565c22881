//! Order placement and staff-driven fulfillment.

use crate::config::OrdersConfig;
use crate::database::models::{
    GuestContact, NewOrder, NewOrderItem, Order, OrderStatusUpdate, OrderWithItems,
};
use crate::database::repository::OrderPaymentStore;
use crate::error::{AppError, AppErrorKind, AppResult, DomainError};
use crate::middleware::auth::CallerContext;
use crate::services::state_machine::OrderStatus;
use bigdecimal::{BigDecimal, RoundingMode, Zero};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const MAX_ITEMS_PER_ORDER: usize = 50;
const MAX_QUANTITY_PER_ITEM: i32 = 99;

#[derive(Debug, Clone, Deserialize)]
pub struct OrderItemInput {
    pub product_name: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub modifiers: Vec<String>,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderCommand {
    pub branch: String,
    #[serde(default)]
    pub guest: Option<GuestContact>,
    pub items: Vec<OrderItemInput>,
}

pub struct OrderService {
    store: Arc<dyn OrderPaymentStore>,
    config: OrdersConfig,
}

/// `ORD-YYYYMMDD-XXXXXXXX`, suffix taken from a fresh UUID.
pub fn build_order_reference() -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("ORD-{}-{}", Utc::now().format("%Y%m%d"), suffix)
}

fn money(value: BigDecimal) -> BigDecimal {
    value.with_scale_round(2, RoundingMode::HalfUp)
}

fn validate_item(index: usize, item: &OrderItemInput) -> AppResult<()> {
    let field = |name: &str| format!("items[{}].{}", index, name);

    if item.product_name.trim().is_empty() {
        return Err(AppError::invalid_field(field("product_name"), "must not be empty"));
    }
    if item.quantity <= 0 || item.quantity > MAX_QUANTITY_PER_ITEM {
        return Err(AppError::invalid_field(
            field("quantity"),
            format!("must be between 1 and {}", MAX_QUANTITY_PER_ITEM),
        ));
    }
    if item.unit_price < BigDecimal::zero() {
        return Err(AppError::invalid_field(field("unit_price"), "must not be negative"));
    }
    if item.unit_price.normalized().as_bigint_and_exponent().1 > 2 {
        return Err(AppError::invalid_field(
            field("unit_price"),
            "must have at most two decimal places",
        ));
    }
    Ok(())
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderPaymentStore>, config: OrdersConfig) -> Self {
        Self { store, config }
    }

    /// Prices the order once and inserts it together with its items.
    pub async fn place_order(
        &self,
        caller: &CallerContext,
        command: PlaceOrderCommand,
    ) -> AppResult<OrderWithItems> {
        if command.branch.trim().is_empty() {
            return Err(AppError::invalid_field("branch", "must not be empty"));
        }
        if command.items.is_empty() {
            return Err(AppError::invalid_field("items", "order has no items"));
        }
        if command.items.len() > MAX_ITEMS_PER_ORDER {
            return Err(AppError::invalid_field(
                "items",
                format!("at most {} items per order", MAX_ITEMS_PER_ORDER),
            ));
        }

        let (user_id, guest) = match caller {
            CallerContext::Customer { user_id } => (Some(*user_id), None),
            CallerContext::Guest | CallerContext::Staff { .. } => {
                let guest = command.guest.ok_or_else(|| {
                    AppError::invalid_field("guest", "guest contact is required")
                })?;
                if guest.name.trim().is_empty() {
                    return Err(AppError::invalid_field("guest.name", "must not be empty"));
                }
                (None, Some(guest))
            }
        };

        let mut subtotal = BigDecimal::zero();
        let mut items = Vec::with_capacity(command.items.len());
        for (index, item) in command.items.into_iter().enumerate() {
            validate_item(index, &item)?;
            let line_total = money(&item.unit_price * BigDecimal::from(item.quantity));
            subtotal += &line_total;
            items.push(NewOrderItem {
                product_name: item.product_name.trim().to_string(),
                size: item.size,
                modifiers: item.modifiers,
                quantity: item.quantity,
                unit_price: money(item.unit_price),
                line_total,
            });
        }

        let subtotal = money(subtotal);
        let tax = money(&subtotal * &self.config.tax_rate);
        let total = money(&subtotal + &tax);
        if total <= BigDecimal::zero() {
            return Err(AppError::invalid_field(
                "items",
                "order total must be greater than zero",
            ));
        }

        let created = self
            .store
            .create_order(NewOrder {
                reference: build_order_reference(),
                user_id,
                guest,
                branch: command.branch.trim().to_string(),
                subtotal,
                tax,
                total,
                items,
            })
            .await?;

        info!(
            order_id = created.order.id,
            reference = %created.order.reference,
            total = %created.order.total,
            items = created.items.len(),
            "order placed"
        );
        Ok(created)
    }

    pub async fn get_order_by_reference(
        &self,
        caller: &CallerContext,
        reference: &str,
    ) -> AppResult<OrderWithItems> {
        let order = self
            .store
            .find_order_by_reference(reference)
            .await?
            .ok_or_else(|| AppError::order_not_found(reference))?;
        caller.ensure_can_access(order.user_id)?;

        let items = self.store.order_items(order.id).await?;
        Ok(OrderWithItems { order, items })
    }

    /// Moves an order one step along fulfillment. Payment status is owned by
    /// the reconciliation engine and is never touched here.
    pub async fn update_order_status(
        &self,
        caller: &CallerContext,
        order_id: i64,
        target: OrderStatus,
    ) -> AppResult<Order> {
        caller.require_staff()?;

        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| AppError::order_not_found(order_id.to_string()))?;

        let invalid = |from: OrderStatus| {
            AppError::new(AppErrorKind::Domain(DomainError::InvalidStatusTransition {
                from: from.to_string(),
                to: target.to_string(),
            }))
        };
        if !order.order_status.can_transition_to(target) {
            return Err(invalid(order.order_status));
        }

        let update = OrderStatusUpdate {
            order_status: Some(target),
            payment_status: None,
            expected_order_status: Some(order.order_status),
        };
        let updated = match self.store.update_order_status(order_id, update).await? {
            Some(updated) => updated,
            None => {
                // Lost a race with another status write; report against the current state.
                let current = self
                    .store
                    .get_order(order_id)
                    .await?
                    .ok_or_else(|| AppError::order_not_found(order_id.to_string()))?;
                return Err(invalid(current.order_status));
            }
        };

        info!(
            order_id,
            from = %order.order_status,
            to = %updated.order_status,
            "order status updated"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryStore;
    use crate::error::ErrorCode;
    use crate::services::state_machine::PaymentStatus;
    use std::str::FromStr;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    fn service() -> OrderService {
        OrderService::new(Arc::new(InMemoryStore::new()), OrdersConfig::default())
    }

    fn guest_order(items: Vec<OrderItemInput>) -> PlaceOrderCommand {
        PlaceOrderCommand {
            branch: "Katipunan".to_string(),
            guest: Some(GuestContact {
                name: "Ana".to_string(),
                email: Some("ana@example.com".to_string()),
                phone: None,
            }),
            items,
        }
    }

    fn item(name: &str, quantity: i32, price: &str) -> OrderItemInput {
        OrderItemInput {
            product_name: name.to_string(),
            size: Some("16oz".to_string()),
            modifiers: vec!["oat milk".to_string()],
            quantity,
            unit_price: dec(price),
        }
    }

    fn staff() -> CallerContext {
        CallerContext::Staff {
            user_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_order_reference_format() {
        let reference = build_order_reference();
        let parts: Vec<&str> = reference.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_place_order_computes_totals() {
        let service = service();
        let placed = service
            .place_order(
                &CallerContext::Guest,
                guest_order(vec![item("Latte", 2, "120.00"), item("Cookie", 1, "45.50")]),
            )
            .await
            .unwrap();

        assert_eq!(placed.order.subtotal, dec("285.50"));
        // 285.50 * 0.12 = 34.26
        assert_eq!(placed.order.tax, dec("34.26"));
        assert_eq!(placed.order.total, dec("319.76"));
        assert_eq!(placed.items.len(), 2);
        assert_eq!(placed.items[0].line_total, dec("240.00"));
        assert_eq!(placed.order.order_status, OrderStatus::Pending);
        assert_eq!(placed.order.payment_status, PaymentStatus::Pending);
        assert!(placed.order.user_id.is_none());
    }

    #[tokio::test]
    async fn test_customer_order_is_owned_by_caller() {
        let service = service();
        let user_id = Uuid::new_v4();
        let customer = CallerContext::Customer { user_id };

        let placed = service
            .place_order(
                &customer,
                PlaceOrderCommand {
                    branch: "Katipunan".to_string(),
                    guest: None,
                    items: vec![item("Latte", 1, "120")],
                },
            )
            .await
            .unwrap();
        assert_eq!(placed.order.user_id, Some(user_id));

        let fetched = service
            .get_order_by_reference(&customer, &placed.order.reference)
            .await
            .unwrap();
        assert_eq!(fetched.items.len(), 1);

        let other = CallerContext::Customer {
            user_id: Uuid::new_v4(),
        };
        let err = service
            .get_order_by_reference(&other, &placed.order.reference)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn test_place_order_rejects_invalid_items() {
        let service = service();

        let err = service
            .place_order(&CallerContext::Guest, guest_order(vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ValidationError);

        let err = service
            .place_order(&CallerContext::Guest, guest_order(vec![item("Latte", 0, "120")]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = service
            .place_order(&CallerContext::Guest, guest_order(vec![item("Latte", 1, "1.005")]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_zero_total_order_is_rejected() {
        let service = service();

        let err = service
            .place_order(
                &CallerContext::Guest,
                guest_order(vec![item("Water", 1, "0"), item("Sample", 2, "0.00")]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), ErrorCode::ValidationError);

        // free add-ons are fine alongside priced items
        let placed = service
            .place_order(
                &CallerContext::Guest,
                guest_order(vec![item("Latte", 1, "120.00"), item("Water", 1, "0")]),
            )
            .await
            .unwrap();
        assert_eq!(placed.order.subtotal, dec("120.00"));
    }

    #[tokio::test]
    async fn test_guest_order_requires_contact() {
        let service = service();
        let mut command = guest_order(vec![item("Latte", 1, "120")]);
        command.guest = None;

        let err = service
            .place_order(&CallerContext::Guest, command)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_status_updates_follow_fulfillment_order() {
        let service = service();
        let placed = service
            .place_order(&CallerContext::Guest, guest_order(vec![item("Latte", 1, "120")]))
            .await
            .unwrap();
        let id = placed.order.id;

        let err = service
            .update_order_status(&CallerContext::Guest, id, OrderStatus::Approved)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);

        let err = service
            .update_order_status(&staff(), id, OrderStatus::Ready)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InvalidStatusTransition);

        let updated = service
            .update_order_status(&staff(), id, OrderStatus::Approved)
            .await
            .unwrap();
        assert_eq!(updated.order_status, OrderStatus::Approved);
        assert_eq!(updated.payment_status, PaymentStatus::Pending);

        let cancelled = service
            .update_order_status(&staff(), id, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.order_status, OrderStatus::Cancelled);

        let err = service
            .update_order_status(&staff(), id, OrderStatus::Processing)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
    }
}
