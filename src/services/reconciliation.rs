//! Payment reconciliation engine.
//!
//! Three entry points drive every payment status change: creating an attempt,
//! applying a gateway-reported status (webhook, poll or cash), and verifying
//! an attempt on demand. All status writes go through
//! `OrderPaymentStore::apply_gateway_status`, so webhook, verify, sweeper and
//! cash paths share one idempotent transition.

use crate::config::PaymentsConfig;
use crate::database::models::{ApplyOutcome, NewPaymentRecord, Order, PaymentRecord};
use crate::database::repository::OrderPaymentStore;
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ExternalError, ValidationError};
use crate::middleware::auth::CallerContext;
use crate::payments::factory::PaymentProviderFactory;
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    CreateIntentRequest, CustomerContact, GatewayStatus, IntentHandle, Money, ProviderName,
};
use crate::services::state_machine::{OrderStatus, PaymentStatus};
use bigdecimal::{BigDecimal, RoundingMode, Zero};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentCommand {
    pub order_id: i64,
    pub amount: BigDecimal,
    #[serde(default)]
    pub provider: Option<ProviderName>,
    /// Required for guest callers.
    #[serde(default)]
    pub order_reference: Option<String>,
}

/// Customer-facing handle for a pending attempt.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentAttempt {
    pub payment_url: Option<String>,
    pub intent_id: String,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
    pub provider: ProviderName,
    pub status: PaymentStatus,
    /// True when an existing pending attempt was returned instead of a new one.
    pub reused: bool,
}

impl PaymentAttempt {
    fn from_record(record: &PaymentRecord, order: &Order, reused: bool) -> Self {
        Self {
            payment_url: record.payment_url.clone(),
            intent_id: record.intent_id.clone(),
            reference: order.reference.clone(),
            link_id: record.link_id.clone(),
            provider: record.provider,
            status: record.status,
            reused,
        }
    }
}

/// Identifier a verify request resolves its payment record from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyLookup {
    OrderId(i64),
    OrderReference(String),
    IntentId(String),
    LinkId(String),
}

impl std::fmt::Display for VerifyLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyLookup::OrderId(id) => write!(f, "order {}", id),
            VerifyLookup::OrderReference(reference) => write!(f, "order {}", reference),
            VerifyLookup::IntentId(id) => write!(f, "intent {}", id),
            VerifyLookup::LinkId(id) => write!(f, "link {}", id),
        }
    }
}

/// Post-reconciliation view of one payment record and its order.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentState {
    pub status: PaymentStatus,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub order_id: i64,
    pub order_reference: String,
    pub provider: ProviderName,
    pub intent_id: String,
}

impl PaymentState {
    fn new(record: &PaymentRecord, order: &Order) -> Self {
        Self {
            status: record.status,
            payment_status: order.payment_status,
            order_status: order.order_status,
            order_id: order.id,
            order_reference: order.reference.clone(),
            provider: record.provider,
            intent_id: record.intent_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CashSettlement {
    #[serde(flatten)]
    pub state: PaymentState,
    pub total: BigDecimal,
    pub amount_tendered: BigDecimal,
    pub change_due: BigDecimal,
}

pub struct ReconciliationEngine {
    store: Arc<dyn OrderPaymentStore>,
    gateways: Arc<PaymentProviderFactory>,
    config: PaymentsConfig,
}

fn gateway_timeout(gateway: &dyn PaymentGateway, deadline: Duration) -> AppError {
    AppError::new(AppErrorKind::External(ExternalError::GatewayUnavailable {
        provider: gateway.name().to_string(),
        message: format!("no response within {}s", deadline.as_secs()),
    }))
}

/// Runs a provider call under the provider's overall deadline.
async fn with_deadline<T, F>(gateway: &dyn PaymentGateway, call: F) -> AppResult<T>
where
    F: Future<Output = crate::payments::PaymentResult<T>>,
{
    let deadline = gateway.request_deadline();
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(gateway_timeout(gateway, deadline)),
    }
}

fn already_paid(order: &Order) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::OrderAlreadyPaid {
        order_reference: order.reference.clone(),
    }))
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn OrderPaymentStore>,
        gateways: Arc<PaymentProviderFactory>,
        config: PaymentsConfig,
    ) -> Self {
        Self {
            store,
            gateways,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderPaymentStore> {
        &self.store
    }

    pub fn gateways(&self) -> &Arc<PaymentProviderFactory> {
        &self.gateways
    }

    async fn load_order(&self, order_id: i64) -> AppResult<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| AppError::order_not_found(order_id.to_string()))
    }

    /// Opens (or reuses) a pending payment attempt for an order.
    pub async fn create_payment_attempt(
        &self,
        caller: &CallerContext,
        command: CreatePaymentCommand,
    ) -> AppResult<PaymentAttempt> {
        let order = self.load_order(command.order_id).await?;
        caller.ensure_can_claim(
            order.user_id,
            &order.reference,
            command.order_reference.as_deref(),
        )?;

        if order.payment_status == PaymentStatus::Paid {
            return Err(already_paid(&order));
        }
        if command.amount != order.total {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::AmountMismatch {
                    expected: order.total.to_string(),
                    received: command.amount.to_string(),
                },
            )));
        }

        let provider = command
            .provider
            .unwrap_or_else(|| self.gateways.default_provider());
        let gateway = self.gateways.get_provider(provider)?;

        if let Some(active) = self.store.active_payment_for_order(order.id, provider).await? {
            if active.status == PaymentStatus::Paid {
                return Err(already_paid(&order));
            }
            info!(
                order_id = order.id,
                intent_id = %active.intent_id,
                provider = %provider,
                "reusing pending payment attempt"
            );
            return Ok(PaymentAttempt::from_record(&active, &order, true));
        }

        let external_reference = format!(
            "{}-{}",
            order.reference,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let request = CreateIntentRequest {
            amount: Money::new(order.total.clone(), self.config.currency.clone()),
            reference: external_reference,
            description: format!("Order {}", order.reference),
            customer: order
                .guest
                .as_ref()
                .map(|guest| CustomerContact {
                    name: Some(guest.name.clone()),
                    email: guest.email.clone(),
                    phone: guest.phone.clone(),
                })
                .unwrap_or_default(),
            success_url: self.config.success_url.clone(),
            failure_url: self.config.failure_url.clone(),
            metadata: Some(json!({
                "order_id": order.id,
                "order_reference": order.reference,
            })),
        };

        let handle = with_deadline(gateway.as_ref(), gateway.create_intent(request)).await?;
        let record = self.persist_attempt(&order, provider, handle).await?;

        info!(
            order_id = order.id,
            payment_id = record.id,
            intent_id = %record.intent_id,
            provider = %provider,
            "payment attempt created"
        );
        Ok(PaymentAttempt::from_record(&record, &order, false))
    }

    /// Inserts the record on a detached task so a client disconnect after the
    /// gateway call cannot drop the write.
    async fn persist_attempt(
        &self,
        order: &Order,
        provider: ProviderName,
        handle: IntentHandle,
    ) -> AppResult<PaymentRecord> {
        let new = NewPaymentRecord {
            order_id: order.id,
            provider,
            intent_id: handle.intent_id,
            link_id: handle.link_id,
            external_reference: Some(handle.external_reference),
            amount: order.total.clone(),
            currency: self.config.currency.clone(),
            payment_url: Some(handle.payment_url),
            metadata: json!({ "create": handle.provider_data }),
        };

        let store = self.store.clone();
        let inserted = tokio::spawn(async move { store.insert_payment_record(new).await })
            .await
            .map_err(|e| AppError::internal(format!("payment insert task failed: {}", e)))?;

        match inserted {
            Ok(record) => Ok(record),
            Err(e) if e.is_unique_violation() => {
                // A concurrent create for the same order won the race.
                let winner = self
                    .store
                    .active_payment_for_order(order.id, provider)
                    .await?
                    .ok_or_else(|| AppError::from(e))?;
                warn!(
                    order_id = order.id,
                    intent_id = %winner.intent_id,
                    "concurrent payment attempt detected, returning existing attempt"
                );
                if winner.status == PaymentStatus::Paid {
                    return Err(already_paid(order));
                }
                Ok(winner)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Applies a gateway-reported status to the record carrying `key`.
    /// Unknown keys are a successful no-op.
    pub async fn apply_gateway_event(
        &self,
        key: &str,
        reported: GatewayStatus,
        metadata: JsonValue,
    ) -> AppResult<ApplyOutcome> {
        let outcome = self
            .store
            .apply_gateway_status(key, reported, metadata)
            .await?;

        match &outcome {
            ApplyOutcome::UnknownKey => {
                info!(gateway_key = %key, reported = reported.as_str(), "no payment record for gateway key");
            }
            ApplyOutcome::Applied {
                record,
                order,
                previous,
            } => {
                info!(
                    payment_id = record.id,
                    order_id = order.id,
                    previous = %previous,
                    status = %record.status,
                    payment_status = %order.payment_status,
                    order_status = %order.order_status,
                    "payment status applied"
                );
            }
            ApplyOutcome::Unchanged { record, .. }
                if record.status == PaymentStatus::Failed && reported == GatewayStatus::Paid =>
            {
                warn!(
                    payment_id = record.id,
                    order_id = record.order_id,
                    gateway_key = %key,
                    "paid report for a failed payment attempt; left failed for manual review"
                );
            }
            ApplyOutcome::Unchanged { record, .. } => {
                info!(
                    payment_id = record.id,
                    status = %record.status,
                    reported = reported.as_str(),
                    "gateway report left payment unchanged"
                );
            }
        }
        Ok(outcome)
    }

    async fn resolve(&self, lookup: &VerifyLookup) -> AppResult<(PaymentRecord, Order)> {
        let not_found = || AppError::payment_not_found(lookup.to_string());

        let (record, order) = match lookup {
            VerifyLookup::OrderId(id) => {
                let order = self.load_order(*id).await?;
                let record = self.store.latest_payment_for_order(order.id).await?;
                (record, Some(order))
            }
            VerifyLookup::OrderReference(reference) => {
                let order = self
                    .store
                    .find_order_by_reference(reference)
                    .await?
                    .ok_or_else(|| AppError::order_not_found(reference.clone()))?;
                let record = self.store.latest_payment_for_order(order.id).await?;
                (record, Some(order))
            }
            VerifyLookup::IntentId(key) | VerifyLookup::LinkId(key) => {
                (self.store.find_payment_by_key(key).await?, None)
            }
        };

        let record = record.ok_or_else(not_found)?;
        let order = match order {
            Some(order) => order,
            None => self.load_order(record.order_id).await?,
        };
        Ok((record, order))
    }

    /// Reports the current state of the most recent attempt, polling the
    /// provider first unless the record is already settled.
    pub async fn verify_payment(
        &self,
        caller: &CallerContext,
        lookup: VerifyLookup,
    ) -> AppResult<PaymentState> {
        let (record, order) = self.resolve(&lookup).await?;
        match lookup {
            VerifyLookup::OrderId(_) => {
                caller.ensure_can_claim(order.user_id, &order.reference, None)?
            }
            _ => caller.ensure_can_access(order.user_id)?,
        }
        self.reconcile(record, order).await
    }

    /// Poll-and-apply for one record without a caller. Used by the sweeper.
    pub async fn reconcile_payment(&self, record: PaymentRecord) -> AppResult<PaymentState> {
        let order = self.load_order(record.order_id).await?;
        self.reconcile(record, order).await
    }

    async fn reconcile(&self, record: PaymentRecord, order: Order) -> AppResult<PaymentState> {
        if record.status == PaymentStatus::Paid || !record.provider.is_gateway() {
            return Ok(PaymentState::new(&record, &order));
        }

        let gateway = self.gateways.get_provider(record.provider)?;
        let report = with_deadline(gateway.as_ref(), gateway.poll_status(&record.intent_id)).await?;

        let metadata = json!({
            "last_poll": {
                "status": report.status,
                "provider_status": report.provider_status,
                "data": report.provider_data,
                "at": chrono::Utc::now().to_rfc3339(),
            }
        });
        let outcome = self
            .apply_gateway_event(&record.intent_id, report.status, metadata)
            .await?;

        outcome
            .state()
            .map(|(record, order)| PaymentState::new(record, order))
            .ok_or_else(|| AppError::payment_not_found(record.intent_id.clone()))
    }

    /// Settles an order in cash at the counter and returns the change due.
    pub async fn record_cash_payment(
        &self,
        caller: &CallerContext,
        order_id: i64,
        amount_tendered: BigDecimal,
    ) -> AppResult<CashSettlement> {
        caller.require_staff()?;
        let order = self.load_order(order_id).await?;

        if order.payment_status == PaymentStatus::Paid {
            return Err(already_paid(&order));
        }
        if order.order_status == OrderStatus::Cancelled {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::InvalidStatusTransition {
                    from: order.order_status.to_string(),
                    to: "paid".to_string(),
                },
            )));
        }
        if amount_tendered <= BigDecimal::zero() || amount_tendered < order.total {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidAmount {
                    amount: amount_tendered.to_string(),
                    reason: format!("must cover the order total of {}", order.total),
                },
            )));
        }

        let record = match self
            .store
            .active_payment_for_order(order.id, ProviderName::Cash)
            .await?
        {
            Some(existing) => existing,
            None => {
                let new = NewPaymentRecord {
                    order_id: order.id,
                    provider: ProviderName::Cash,
                    intent_id: format!("cash-{}", Uuid::new_v4()),
                    link_id: None,
                    external_reference: None,
                    amount: order.total.clone(),
                    currency: self.config.currency.clone(),
                    payment_url: None,
                    metadata: json!({}),
                };
                match self.store.insert_payment_record(new).await {
                    Ok(record) => record,
                    Err(e) if e.is_unique_violation() => self
                        .store
                        .active_payment_for_order(order.id, ProviderName::Cash)
                        .await?
                        .ok_or_else(|| AppError::from(e))?,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let change_due = (&amount_tendered - &order.total).with_scale_round(2, RoundingMode::HalfUp);
        let metadata = json!({
            "cash": {
                "amount_tendered": amount_tendered.to_string(),
                "change_due": change_due.to_string(),
                "recorded_by": caller.user_id(),
                "at": chrono::Utc::now().to_rfc3339(),
            }
        });
        let outcome = self
            .apply_gateway_event(&record.intent_id, GatewayStatus::Paid, metadata)
            .await?;
        let (record, settled) = outcome
            .state()
            .ok_or_else(|| AppError::payment_not_found(record.intent_id.clone()))?;

        Ok(CashSettlement {
            state: PaymentState::new(record, settled),
            total: settled.total.clone(),
            amount_tendered,
            change_due,
        })
    }
}
