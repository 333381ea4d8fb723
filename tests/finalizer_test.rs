//! Payment finalizer: idempotency, races and the state machine over pending payments.

mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::{TestApp, SERVICEABLE_PINCODE};
use nursery_api::{
    entities::{
        order, order_item, payment, pending_payment, size_variant, CartLine, CatalogItemStatus,
        Order, OrderItem, OrderStatus, Payment, PaymentMethod, PaymentStatus, PendingPayment,
        PendingPaymentStatus,
    },
    errors::ServiceError,
    services::{
        inventory,
        orders::DirectOrderRequest,
        payments::{CreatePaymentOrderRequest, FinalizeSource},
    },
};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;

async fn app_with_pincode() -> TestApp {
    let app = TestApp::new().await;
    app.seed_pincode(SERVICEABLE_PINCODE, true).await;
    app
}

#[tokio::test]
async fn repeated_finalization_returns_the_same_order() {
    let app = app_with_pincode().await;
    let plant = app.seed_product("Monstera Deliciosa", 500, 5).await;
    let user = Uuid::new_v4();
    app.add_to_cart(user, plant.id, None, 2).await;
    let rzp_order = app.start_payment(user).await;

    let payments = app.payments();
    let first = payments
        .finalize(&rzp_order, "pay_001", FinalizeSource::Verify)
        .await
        .unwrap();
    assert!(!first.already_processed);
    assert!(first.order_number.starts_with("ORD-"));

    let second = payments
        .finalize(&rzp_order, "pay_001", FinalizeSource::Webhook)
        .await
        .unwrap();
    assert!(second.already_processed);
    assert_eq!(first.order_number, second.order_number);

    assert_eq!(Order::find().count(app.db()).await.unwrap(), 1);
    assert_eq!(Payment::find().count(app.db()).await.unwrap(), 1);
    assert_eq!(app.stock_of(plant.id).await, 3);

    let pending = app.pending(&rzp_order).await;
    assert_eq!(pending.status, PendingPaymentStatus::Success);

    let order = Order::find()
        .filter(order::Column::OrderNumber.eq(first.order_number.as_str()))
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.order_status, OrderStatus::Paid);
    assert_eq!(order.payment_method, PaymentMethod::Razorpay);
    assert_eq!(order.subtotal, 1000);
    assert_eq!(order.shipping_cost, 0);
    assert_eq!(order.total_amount, 1000);

    let payment = Payment::find().one(app.db()).await.unwrap().unwrap();
    assert_eq!(payment.order_id, order.id);
    assert_eq!(payment.razorpay_payment_id, "pay_001");
    assert_eq!(payment.captured_via, "verify");

    let cart_lines = CartLine::find().count(app.db()).await.unwrap();
    assert_eq!(cart_lines, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_finalization_creates_exactly_one_order() {
    let app = app_with_pincode().await;
    let plant = app.seed_product("Fiddle Leaf Fig", 1200, 3).await;
    let user = Uuid::new_v4();
    app.add_to_cart(user, plant.id, None, 1).await;
    let rzp_order = app.start_payment(user).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let payments = app.payments();
        let rzp_order = rzp_order.clone();
        let source = if i % 2 == 0 {
            FinalizeSource::Verify
        } else {
            FinalizeSource::Webhook
        };
        handles.push(tokio::spawn(async move {
            payments.finalize(&rzp_order, "pay_race", source).await
        }));
    }

    let outcomes: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked").expect("finalize succeeds"))
        .collect();

    let created = outcomes.iter().filter(|o| !o.already_processed).count();
    assert_eq!(created, 1);
    let order_number = &outcomes[0].order_number;
    assert!(outcomes.iter().all(|o| &o.order_number == order_number));

    assert_eq!(Order::find().count(app.db()).await.unwrap(), 1);
    assert_eq!(Payment::find().count(app.db()).await.unwrap(), 1);
    assert_eq!(app.stock_of(plant.id).await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_unit_goes_to_exactly_one_buyer() {
    let app = app_with_pincode().await;
    let bonsai = app.seed_product("Ficus Bonsai", 2500, 1).await;

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    app.add_to_cart(alice, bonsai.id, None, 1).await;
    app.add_to_cart(bob, bonsai.id, None, 1).await;
    // Both pass the pre-payment stock check while the unit is still there.
    let alice_order = app.start_payment(alice).await;
    let bob_order = app.start_payment(bob).await;

    let payments_a = app.payments();
    let payments_b = app.payments();
    let (a, b) = tokio::join!(
        tokio::spawn(async move {
            payments_a
                .finalize(&alice_order, "pay_a", FinalizeSource::Verify)
                .await
        }),
        tokio::spawn(async move {
            payments_b
                .finalize(&bob_order, "pay_b", FinalizeSource::Webhook)
                .await
        }),
    );
    let results = [a.unwrap(), b.unwrap()];

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let loser = results.iter().find(|r| r.is_err()).unwrap();
    assert_matches!(
        loser,
        Err(ServiceError::InsufficientStock { available: 0, requested: 1, .. })
    );

    assert_eq!(app.stock_of(bonsai.id).await, 0);
    assert_eq!(app.item(bonsai.id).await.status, CatalogItemStatus::OutOfStock);
    assert_eq!(Order::find().count(app.db()).await.unwrap(), 1);

    // The losing payment stays pending for manual recovery.
    let still_pending = PendingPayment::find()
        .filter(pending_payment::Column::Status.eq(PendingPaymentStatus::Pending))
        .count(app.db())
        .await
        .unwrap();
    assert_eq!(still_pending, 1);
}

#[tokio::test]
async fn unknown_payment_is_record_not_found() {
    let app = app_with_pincode().await;
    let result = app
        .payments()
        .finalize("order_missing", "pay_x", FinalizeSource::Webhook)
        .await;
    assert_matches!(result, Err(ServiceError::PaymentRecordNotFound(id)) if id == "order_missing");
}

#[tokio::test]
async fn failed_payment_is_never_resurrected() {
    let app = app_with_pincode().await;
    let plant = app.seed_product("Snake Plant", 350, 4).await;
    let user = Uuid::new_v4();
    app.add_to_cart(user, plant.id, None, 1).await;
    let rzp_order = app.start_payment(user).await;

    let payments = app.payments();
    assert!(payments.mark_failed(&rzp_order, "card declined").await.unwrap());
    // A second failure is a no-op.
    assert!(!payments.mark_failed(&rzp_order, "again").await.unwrap());

    let result = payments
        .finalize(&rzp_order, "pay_late", FinalizeSource::Verify)
        .await;
    assert_matches!(result, Err(ServiceError::PaymentAlreadyFailed(_)));

    let pending = app.pending(&rzp_order).await;
    assert_eq!(pending.status, PendingPaymentStatus::Failed);
    assert_eq!(pending.failure_reason.as_deref(), Some("card declined"));
    assert_eq!(Order::find().count(app.db()).await.unwrap(), 0);
    assert_eq!(app.stock_of(plant.id).await, 4);
}

#[tokio::test]
async fn disabled_pincode_blocks_finalization_and_keeps_payment_pending() {
    let app = app_with_pincode().await;
    let plant = app.seed_product("Areca Palm", 800, 2).await;
    let user = Uuid::new_v4();
    app.add_to_cart(user, plant.id, None, 1).await;
    let rzp_order = app.start_payment(user).await;

    app.set_pincode_active(SERVICEABLE_PINCODE, false).await;

    let result = app
        .payments()
        .finalize(&rzp_order, "pay_1", FinalizeSource::Webhook)
        .await;
    assert_matches!(result, Err(ServiceError::AreaNotServiceable(code)) if code == SERVICEABLE_PINCODE);

    assert_eq!(app.pending(&rzp_order).await.status, PendingPaymentStatus::Pending);
    assert_eq!(Order::find().count(app.db()).await.unwrap(), 0);
    assert_eq!(app.stock_of(plant.id).await, 2);

    // Once delivery is re-enabled the same payment finalizes.
    app.set_pincode_active(SERVICEABLE_PINCODE, true).await;
    let outcome = app
        .payments()
        .finalize(&rzp_order, "pay_1", FinalizeSource::Webhook)
        .await
        .unwrap();
    assert!(!outcome.already_processed);
}

#[tokio::test]
async fn stock_gone_during_payment_rolls_back_everything() {
    let app = app_with_pincode().await;
    let plant = app.seed_product("Peace Lily", 450, 2).await;
    let user = Uuid::new_v4();
    app.add_to_cart(user, plant.id, None, 2).await;
    let rzp_order = app.start_payment(user).await;

    // Someone else buys a unit while the customer is on the checkout page.
    let other = Uuid::new_v4();
    app.add_to_cart(other, plant.id, None, 1).await;
    let other_order = app.start_payment(other).await;
    app.payments()
        .finalize(&other_order, "pay_other", FinalizeSource::Verify)
        .await
        .unwrap();

    let result = app
        .payments()
        .finalize(&rzp_order, "pay_1", FinalizeSource::Verify)
        .await;
    assert_matches!(
        result,
        Err(ServiceError::InsufficientStock { available: 1, requested: 2, .. })
    );

    assert_eq!(app.stock_of(plant.id).await, 1);
    assert_eq!(app.pending(&rzp_order).await.status, PendingPaymentStatus::Pending);
    assert_eq!(Order::find().count(app.db()).await.unwrap(), 1);
    // The customer's cart survives the failed attempt.
    assert_eq!(CartLine::find().count(app.db()).await.unwrap(), 1);
}

#[tokio::test]
async fn variant_purchase_decrements_the_size_and_parent_aggregate() {
    let app = app_with_pincode().await;
    let plant = app
        .seed_variant_product("Rubber Plant", &[("6 inch", 300, 2), ("10 inch", 700, 4)])
        .await;
    assert_eq!(plant.stock, 6);
    assert_eq!(plant.price, 300);

    let user = Uuid::new_v4();
    app.add_to_cart(user, plant.id, Some("10 inch"), 2).await;
    let rzp_order = app.start_payment(user).await;
    assert_eq!(app.pending(&rzp_order).await.amount, 1400);

    let outcome = app
        .payments()
        .finalize(&rzp_order, "pay_v", FinalizeSource::Verify)
        .await
        .unwrap();

    assert_eq!(app.variant_stock(plant.id, "10 inch").await, 2);
    assert_eq!(app.variant_stock(plant.id, "6 inch").await, 2);
    assert_eq!(app.stock_of(plant.id).await, 4);

    let order = Order::find()
        .filter(order::Column::OrderNumber.eq(outcome.order_number.as_str()))
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    let items = OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .all(app.db())
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].size.as_deref(), Some("10 inch"));
    assert_eq!(items[0].price, 700);
    assert_eq!(items[0].quantity, 2);
}

#[tokio::test]
async fn price_changes_after_initiation_do_not_reach_the_order() {
    let app = app_with_pincode().await;
    let plant = app.seed_product("ZZ Plant", 600, 5).await;
    let user = Uuid::new_v4();
    app.add_to_cart(user, plant.id, None, 1).await;
    let rzp_order = app.start_payment(user).await;

    let mut active: nursery_api::entities::catalog_item::ActiveModel = plant.clone().into();
    active.price = Set(900);
    active.update(app.db()).await.unwrap();

    let outcome = app
        .payments()
        .finalize(&rzp_order, "pay_p", FinalizeSource::Webhook)
        .await
        .unwrap();
    let order = Order::find()
        .filter(order::Column::OrderNumber.eq(outcome.order_number.as_str()))
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.subtotal, 600);
    assert_eq!(order.shipping_cost, 99);
    assert_eq!(order.total_amount, 699);
}

#[tokio::test]
async fn expired_payment_is_still_finalized() {
    let app = app_with_pincode().await;
    let plant = app.seed_product("Jade Plant", 250, 3).await;
    let user = Uuid::new_v4();
    app.add_to_cart(user, plant.id, None, 1).await;
    let rzp_order = app.start_payment(user).await;

    let mut active: pending_payment::ActiveModel = app.pending(&rzp_order).await.into();
    active.expires_at = Set(Utc::now() - Duration::minutes(5));
    active.update(app.db()).await.unwrap();

    let outcome = app
        .payments()
        .finalize(&rzp_order, "pay_late", FinalizeSource::Webhook)
        .await
        .unwrap();
    assert!(!outcome.already_processed);
    assert_eq!(app.stock_of(plant.id).await, 2);
}

#[tokio::test]
async fn gateway_failure_writes_no_pending_payment() {
    let app = app_with_pincode().await;
    let plant = app.seed_product("Pothos", 199, 10).await;
    let user = Uuid::new_v4();
    app.add_to_cart(user, plant.id, None, 1).await;
    app.gateway
        .fail
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let result = app
        .payments()
        .initiate_payment(
            user,
            CreatePaymentOrderRequest {
                shipping: common::shipping(),
                payment_method: PaymentMethod::Razorpay,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::GatewayError(_)));
    assert_eq!(PendingPayment::find().count(app.db()).await.unwrap(), 0);
}

#[tokio::test]
async fn initiation_snapshots_cart_and_amount_in_paise() {
    let app = app_with_pincode().await;
    let plant = app.seed_product("Calathea", 450, 10).await;
    let user = Uuid::new_v4();
    app.add_to_cart(user, plant.id, None, 1).await;

    let rzp_order = app.start_payment(user).await;
    let pending = app.pending(&rzp_order).await;
    assert_eq!(pending.user_id, user);
    assert_eq!(pending.amount, 549);
    assert_eq!(pending.currency, "INR");
    assert_eq!(pending.status, PendingPaymentStatus::Pending);
    assert!(pending.expires_at > Utc::now() + Duration::minutes(29));

    let snapshot = pending.cart_snapshot.as_array().expect("snapshot is a list");
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0]["price"], 450);

    let requests = app.gateway.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount, 54_900);
    // Stock is only held at finalization.
    drop(requests);
    assert_eq!(app.stock_of(plant.id).await, 10);
}

#[tokio::test]
async fn empty_cart_cannot_start_a_payment() {
    let app = app_with_pincode().await;
    let result = app
        .payments()
        .initiate_payment(
            Uuid::new_v4(),
            CreatePaymentOrderRequest {
                shipping: common::shipping(),
                payment_method: PaymentMethod::Razorpay,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::EmptyCart));
}

#[tokio::test]
async fn sizes_added_after_carting_block_payment_before_the_gateway() {
    let app = app_with_pincode().await;
    let plant = app.seed_product("Pothos", 349, 6).await;
    let user = Uuid::new_v4();
    app.add_to_cart(user, plant.id, None, 1).await;

    // The item gains sizes while the sizeless line sits in the cart.
    size_variant::ActiveModel {
        id: Set(Uuid::new_v4()),
        catalog_item_id: Set(plant.id),
        size: Set("6 inch".to_string()),
        price: Set(349),
        stock: Set(6),
    }
    .insert(app.db())
    .await
    .unwrap();
    inventory::recompute_aggregates(app.db(), plant.id)
        .await
        .unwrap();

    let result = app
        .payments()
        .initiate_payment(
            user,
            CreatePaymentOrderRequest {
                shipping: common::shipping(),
                payment_method: PaymentMethod::Razorpay,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(msg)) if msg.contains("requires a size"));
    assert!(app.gateway.requests.lock().unwrap().is_empty());
    assert_eq!(PendingPayment::find().count(app.db()).await.unwrap(), 0);
    assert_eq!(app.variant_stock(plant.id, "6 inch").await, 6);
}

#[tokio::test]
async fn recorded_payment_from_another_commit_resolves_to_its_order() {
    let app = app_with_pincode().await;
    let plant = app.seed_product("Peace Lily", 400, 5).await;

    let earlier = Uuid::new_v4();
    app.add_to_cart(earlier, plant.id, None, 1).await;
    let existing = app
        .state
        .order_service()
        .place_direct_order(
            earlier,
            DirectOrderRequest {
                shipping: common::shipping(),
                coupon_code: None,
            },
        )
        .await
        .unwrap();
    let existing_id = Order::find()
        .filter(order::Column::OrderNumber.eq(existing.order_number.as_str()))
        .one(app.db())
        .await
        .unwrap()
        .unwrap()
        .id;

    let user = Uuid::new_v4();
    app.add_to_cart(user, plant.id, None, 2).await;
    let rzp_order = app.start_payment(user).await;

    // A payment row for this Razorpay order is already committed, so the
    // finalizer's own insert hits the unique index.
    let now = Utc::now();
    payment::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(existing_id),
        razorpay_order_id: Set(rzp_order.clone()),
        razorpay_payment_id: Set("pay_elsewhere".to_string()),
        amount: Set(899),
        currency: Set("INR".to_string()),
        status: Set(PaymentStatus::Success),
        captured_via: Set("webhook".to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(app.db())
    .await
    .unwrap();

    let outcome = app
        .payments()
        .finalize(&rzp_order, "pay_dup", FinalizeSource::Verify)
        .await
        .unwrap();
    assert!(outcome.already_processed);
    assert_eq!(outcome.order_number, existing.order_number);

    assert_eq!(Order::find().count(app.db()).await.unwrap(), 1);
    assert_eq!(app.stock_of(plant.id).await, 4);
    assert_eq!(app.pending(&rzp_order).await.status, PendingPaymentStatus::Pending);
}

#[tokio::test]
async fn order_number_collision_retries_with_a_fresh_number() {
    let mut app = app_with_pincode().await;
    app.state.order_numbers = common::scripted_order_numbers(&[
        "ORD-20261019-TAKEN001",
        "ORD-20261019-TAKEN001",
        "ORD-20261019-FRESH002",
    ]);
    let plant = app.seed_product("Snake Plant", 300, 5).await;

    let earlier = Uuid::new_v4();
    app.add_to_cart(earlier, plant.id, None, 1).await;
    let first = app
        .state
        .order_service()
        .place_direct_order(
            earlier,
            DirectOrderRequest {
                shipping: common::shipping(),
                coupon_code: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(first.order_number, "ORD-20261019-TAKEN001");

    let user = Uuid::new_v4();
    app.add_to_cart(user, plant.id, None, 2).await;
    let rzp_order = app.start_payment(user).await;

    let outcome = app
        .state
        .payment_service()
        .finalize(&rzp_order, "pay_retry", FinalizeSource::Webhook)
        .await
        .unwrap();
    assert!(!outcome.already_processed);
    assert_eq!(outcome.order_number, "ORD-20261019-FRESH002");

    assert_eq!(Order::find().count(app.db()).await.unwrap(), 2);
    assert_eq!(Payment::find().count(app.db()).await.unwrap(), 1);
    assert_eq!(app.stock_of(plant.id).await, 2);
    assert_eq!(app.pending(&rzp_order).await.status, PendingPaymentStatus::Success);
}

#[tokio::test]
async fn payment_records_the_amount_actually_captured() {
    let mut app = app_with_pincode().await;
    let plant = app.seed_product("Calathea", 600, 5).await;
    let user = Uuid::new_v4();
    app.add_to_cart(user, plant.id, None, 1).await;
    let rzp_order = app.start_payment(user).await;
    assert_eq!(app.pending(&rzp_order).await.amount, 699);

    // Free shipping for everything from here on.
    let mut cfg = (*app.state.config).clone();
    cfg.free_shipping_threshold = 0;
    app.state.config = Arc::new(cfg);

    app.state
        .payment_service()
        .finalize(&rzp_order, "pay_policy", FinalizeSource::Verify)
        .await
        .unwrap();

    let payment = Payment::find().one(app.db()).await.unwrap().unwrap();
    assert_eq!(payment.amount, 699);
}
