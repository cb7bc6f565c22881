mod common;

use common::{dec, ScriptedGateway, TestApp};
use serde_json::json;
use sipline_backend::config::SweeperConfig;
use sipline_backend::database::models::{ApplyOutcome, Order};
use sipline_backend::database::OrderPaymentStore;
use sipline_backend::error::ErrorCode;
use sipline_backend::middleware::auth::CallerContext;
use sipline_backend::payments::{GatewayStatus, PaymentGateway, ProviderName};
use sipline_backend::services::{
    CreatePaymentCommand, OrderStatus, PaymentStatus, VerifyLookup,
};
use sipline_backend::workers::payment_sweeper::PaymentSweeperWorker;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn setup() -> (TestApp, Arc<ScriptedGateway>) {
    let gateway = ScriptedGateway::new(ProviderName::Xendit);
    let gateways: Vec<Arc<dyn PaymentGateway>> = vec![gateway.clone()];
    let app = TestApp::new(gateways);
    (app, gateway)
}

fn create(order: &Order, amount: &str) -> CreatePaymentCommand {
    CreatePaymentCommand {
        order_id: order.id,
        amount: dec(amount),
        provider: None,
        order_reference: Some(order.reference.clone()),
    }
}

#[tokio::test]
async fn webhook_paid_settles_order_and_approves_it() {
    let (app, _gateway) = setup();
    let order = app.order("150.00", None).await;

    let attempt = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "150.00"))
        .await
        .unwrap();
    assert_eq!(attempt.status, PaymentStatus::Pending);
    assert_eq!(attempt.provider, ProviderName::Xendit);
    assert_eq!(attempt.reference, order.reference);
    assert!(attempt.payment_url.is_some());
    assert!(!attempt.reused);

    let outcome = app
        .engine
        .apply_gateway_event(&attempt.intent_id, GatewayStatus::Paid, json!({"event": "invoice.paid"}))
        .await
        .unwrap();

    let (record, settled) = outcome.state().unwrap();
    assert_eq!(record.status, PaymentStatus::Paid);
    assert_eq!(settled.payment_status, PaymentStatus::Paid);
    assert_eq!(settled.order_status, OrderStatus::Approved);
    assert_eq!(settled.total, dec("150.00"));
    assert_eq!(record.metadata["event"], "invoice.paid");
}

#[tokio::test]
async fn verify_poll_reaches_the_same_state_as_the_webhook() {
    let (app, gateway) = setup();
    let order = app.order("150.00", None).await;
    app.engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "150"))
        .await
        .unwrap();

    gateway.answer_polls_with(GatewayStatus::Pending);
    let pending = app
        .engine
        .verify_payment(
            &CallerContext::Guest,
            VerifyLookup::OrderReference(order.reference.clone()),
        )
        .await
        .unwrap();
    assert_eq!(pending.status, PaymentStatus::Pending);
    assert_eq!(pending.order_status, OrderStatus::Pending);

    gateway.answer_polls_with(GatewayStatus::Paid);
    let paid = app
        .engine
        .verify_payment(
            &CallerContext::Guest,
            VerifyLookup::OrderReference(order.reference.clone()),
        )
        .await
        .unwrap();
    assert_eq!(paid.status, PaymentStatus::Paid);
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.order_status, OrderStatus::Approved);
    assert_eq!(paid.order_id, order.id);
    assert_eq!(gateway.poll_count(), 2);
}

#[tokio::test]
async fn verify_on_paid_record_never_polls() {
    let (app, gateway) = setup();
    let order = app.order("99.00", None).await;
    let attempt = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "99.00"))
        .await
        .unwrap();
    app.engine
        .apply_gateway_event(&attempt.intent_id, GatewayStatus::Paid, json!({}))
        .await
        .unwrap();

    let state = app
        .engine
        .verify_payment(
            &CallerContext::Guest,
            VerifyLookup::IntentId(attempt.intent_id.clone()),
        )
        .await
        .unwrap();

    assert_eq!(state.status, PaymentStatus::Paid);
    assert_eq!(gateway.poll_count(), 0);
}

#[tokio::test]
async fn duplicate_paid_events_update_the_order_once() {
    let (app, _gateway) = setup();
    let order = app.order("150.00", None).await;
    let attempt = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "150.00"))
        .await
        .unwrap();

    let first = app
        .engine
        .apply_gateway_event(&attempt.intent_id, GatewayStatus::Paid, json!({}))
        .await
        .unwrap();
    let link_id = attempt.link_id.clone().unwrap();
    let second = app
        .engine
        .apply_gateway_event(&link_id, GatewayStatus::Paid, json!({}))
        .await
        .unwrap();

    assert!(first.was_applied());
    assert!(!second.was_applied());
    assert_eq!(first.state().unwrap().1.payment_status, second.state().unwrap().1.payment_status);
    assert_eq!(app.store.applied_transition_count().await, 1);
}

#[tokio::test]
async fn failed_after_paid_changes_nothing() {
    let (app, _gateway) = setup();
    let order = app.order("60.00", None).await;
    let attempt = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "60.00"))
        .await
        .unwrap();
    app.engine
        .apply_gateway_event(&attempt.intent_id, GatewayStatus::Paid, json!({}))
        .await
        .unwrap();

    let late = app
        .engine
        .apply_gateway_event(&attempt.intent_id, GatewayStatus::Failed, json!({}))
        .await
        .unwrap();

    assert!(matches!(late, ApplyOutcome::Unchanged { .. }));
    let (record, order) = late.state().unwrap();
    assert_eq!(record.status, PaymentStatus::Paid);
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(order.order_status, OrderStatus::Approved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_deliveries_apply_exactly_once() {
    let (app, _gateway) = setup();
    let order = app.order("150.00", None).await;
    let attempt = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "150.00"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = app.engine.clone();
        let key = attempt.intent_id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .apply_gateway_event(&key, GatewayStatus::Paid, json!({}))
                .await
                .unwrap()
                .was_applied()
        }));
    }

    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap() {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(app.store.applied_transition_count().await, 1);
}

#[tokio::test]
async fn failed_payment_keeps_order_status_and_allows_a_new_attempt() {
    let (app, gateway) = setup();
    let order = app.order("75.00", None).await;
    let first = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "75.00"))
        .await
        .unwrap();

    let failed = app
        .engine
        .apply_gateway_event(&first.intent_id, GatewayStatus::Failed, json!({}))
        .await
        .unwrap();
    let (_, failed_order) = failed.state().unwrap();
    assert_eq!(failed_order.payment_status, PaymentStatus::Failed);
    assert_eq!(failed_order.order_status, OrderStatus::Pending);

    let second = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "75.00"))
        .await
        .unwrap();
    assert!(!second.reused);
    assert_ne!(second.intent_id, first.intent_id);
    assert_eq!(gateway.create_count(), 2);
    assert_eq!(app.store.payments_for_order(order.id).await.len(), 2);

    let paid = app
        .engine
        .apply_gateway_event(&second.intent_id, GatewayStatus::Paid, json!({}))
        .await
        .unwrap();
    let (_, paid_order) = paid.state().unwrap();
    assert_eq!(paid_order.payment_status, PaymentStatus::Paid);
    assert_eq!(paid_order.order_status, OrderStatus::Approved);
}

#[tokio::test]
async fn late_paid_on_a_failed_attempt_does_not_reopen_it() {
    let (app, _gateway) = setup();
    let order = app.order("80.00", None).await;
    let first = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "80.00"))
        .await
        .unwrap();
    app.engine
        .apply_gateway_event(&first.intent_id, GatewayStatus::Failed, json!({}))
        .await
        .unwrap();
    let second = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "80.00"))
        .await
        .unwrap();

    let late = app
        .engine
        .apply_gateway_event(
            &first.intent_id,
            GatewayStatus::Paid,
            json!({ "last_webhook": { "event_type": "invoice.paid" } }),
        )
        .await
        .unwrap();

    assert!(matches!(late, ApplyOutcome::Unchanged { .. }));
    let (record, order_after) = late.state().unwrap();
    assert_eq!(record.status, PaymentStatus::Failed);
    assert_eq!(record.metadata["last_webhook"]["event_type"], "invoice.paid");
    assert_eq!(order_after.payment_status, PaymentStatus::Failed);
    assert_eq!(order_after.order_status, OrderStatus::Pending);

    let records = app.store.payments_for_order(order.id).await;
    let active: Vec<_> = records
        .iter()
        .filter(|r| r.status != PaymentStatus::Failed)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].intent_id, second.intent_id);
}

#[tokio::test]
async fn pending_attempt_is_reused_and_paid_order_is_a_conflict() {
    let (app, gateway) = setup();
    let order = app.order("40.00", None).await;

    let first = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "40.00"))
        .await
        .unwrap();
    let again = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "40"))
        .await
        .unwrap();
    assert!(again.reused);
    assert_eq!(again.intent_id, first.intent_id);
    assert_eq!(gateway.create_count(), 1);

    app.engine
        .apply_gateway_event(&first.intent_id, GatewayStatus::Paid, json!({}))
        .await
        .unwrap();
    let err = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "40.00"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::OrderAlreadyPaid);
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn gateway_failure_on_create_persists_nothing() {
    let (app, gateway) = setup();
    let order = app.order("150.00", None).await;
    gateway.fail_creates();

    let err = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "150.00"))
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), ErrorCode::GatewayUnavailable);
    assert_eq!(err.status_code(), 503);
    assert!(err.is_retryable());
    assert_eq!(app.store.payment_count().await, 0);
}

#[tokio::test]
async fn slow_gateway_times_out_without_persisting() {
    let (app, gateway) = setup();
    let order = app.order("150.00", None).await;
    gateway.delay_creates(Duration::from_secs(2));

    let err = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "150.00"))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 503);
    assert_eq!(app.store.payment_count().await, 0);
}

#[tokio::test]
async fn amount_mismatch_is_rejected_before_the_gateway() {
    let (app, gateway) = setup();
    let order = app.order("150.00", None).await;

    let err = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "149.99"))
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), ErrorCode::AmountMismatch);
    assert_eq!(gateway.create_count(), 0);
    assert_eq!(app.store.payment_count().await, 0);
}

#[tokio::test]
async fn customers_cannot_pay_or_verify_other_orders() {
    let (app, _gateway) = setup();
    let owner = Uuid::new_v4();
    let order = app.order("20.00", Some(owner)).await;
    let stranger = CallerContext::Customer {
        user_id: Uuid::new_v4(),
    };

    let err = app
        .engine
        .create_payment_attempt(&stranger, create(&order, "20.00"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);

    let err = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "20.00"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);

    let attempt = app
        .engine
        .create_payment_attempt(
            &CallerContext::Customer { user_id: owner },
            create(&order, "20.00"),
        )
        .await
        .unwrap();
    let err = app
        .engine
        .verify_payment(&stranger, VerifyLookup::IntentId(attempt.intent_id))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn guests_need_the_order_reference_not_just_the_id() {
    let (app, _gateway) = setup();
    let order = app.order("35.00", None).await;
    let by_id_only = CreatePaymentCommand {
        order_reference: None,
        ..create(&order, "35.00")
    };

    let err = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, by_id_only)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);

    let wrong_reference = CreatePaymentCommand {
        order_reference: Some("ORD-20261019-00000000".to_string()),
        ..create(&order, "35.00")
    };
    let err = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, wrong_reference)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
    assert_eq!(app.store.payment_count().await, 0);

    let attempt = app
        .engine
        .create_payment_attempt(&CallerContext::Guest, create(&order, "35.00"))
        .await
        .unwrap();

    let err = app
        .engine
        .verify_payment(&CallerContext::Guest, VerifyLookup::OrderId(order.id))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);

    let state = app
        .engine
        .verify_payment(&CallerContext::Guest, VerifyLookup::IntentId(attempt.intent_id))
        .await
        .unwrap();
    assert_eq!(state.status, PaymentStatus::Pending);

    let staff = CallerContext::Staff {
        user_id: Uuid::new_v4(),
    };
    let state = app
        .engine
        .verify_payment(&staff, VerifyLookup::OrderId(order.id))
        .await
        .unwrap();
    assert_eq!(state.order_reference, order.reference);
}

#[tokio::test]
async fn sweeper_settles_stale_pending_payments() {
    let (app, gateway) = setup();
    let paid_order = app.order("30.00", None).await;
    let open_order = app.order("45.00", None).await;
    for order in [&paid_order, &open_order] {
        app.engine
            .create_payment_attempt(&CallerContext::Guest, create(order, &order.total.to_string()))
            .await
            .unwrap();
    }
    let cash_order = app.order("10.00", None).await;
    app.engine
        .record_cash_payment(
            &CallerContext::Staff {
                user_id: Uuid::new_v4(),
            },
            cash_order.id,
            dec("10.00"),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    gateway.answer_polls_with(GatewayStatus::Paid);

    let worker = PaymentSweeperWorker::new(
        app.engine.clone(),
        SweeperConfig {
            pending_age: Duration::ZERO,
            ..SweeperConfig::default()
        },
    );
    let report = worker.run_cycle().await.unwrap();

    assert_eq!(report.examined, 2);
    assert_eq!(report.settled, 2);
    assert_eq!(report.errors, 0);
    assert_eq!(gateway.poll_count(), 2);

    let settled = app.store.get_order(open_order.id).await.unwrap().unwrap();
    assert_eq!(settled.payment_status, PaymentStatus::Paid);

    let second = worker.run_cycle().await.unwrap();
    assert_eq!(second.examined, 0);
}

#[tokio::test]
async fn cash_settlement_computes_change() {
    let (app, _gateway) = setup();
    let order = app.order("150.00", None).await;

    let settlement = app
        .engine
        .record_cash_payment(
            &CallerContext::Staff {
                user_id: Uuid::new_v4(),
            },
            order.id,
            dec("500"),
        )
        .await
        .unwrap();

    assert_eq!(settlement.change_due, dec("350.00"));
    assert_eq!(settlement.state.provider, ProviderName::Cash);
    assert_eq!(settlement.state.order_status, OrderStatus::Approved);

    let verified = app
        .engine
        .verify_payment(
            &CallerContext::Guest,
            VerifyLookup::OrderReference(order.reference.clone()),
        )
        .await
        .unwrap();
    assert_eq!(verified.status, PaymentStatus::Paid);
}
