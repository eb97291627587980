mod common;

use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use storefront_checkout::{
    dto::{
        admin::InventoryAdjustRequest,
        cart::AddToCartRequest,
        orders::UpdateOrderStatusRequest,
    },
    entity::{CartItems, Orders, Products, products::ActiveModel as ProductActive},
    error::AppError,
    models::{OrderStatus, PaymentStatus},
    routes::params::{OrderListQuery, Pagination},
    services::{
        admin_service, cart_service, order_service, payment_service,
        webhook_service::{self, WebhookAck},
    },
};

use common::{admin, customer, put_in_cart, seed_product, setup_state, signed_event, stock_of};

#[tokio::test]
async fn cart_to_confirmed_order() -> anyhow::Result<()> {
    let (state, processor) = setup_state().await?;
    let user = customer();
    let product_id = seed_product(&state, "Ferris Mug", 1000, 10).await?;

    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 2,
        },
    )
    .await?;

    let cart = cart_service::list_cart(&state, &user, Pagination { page: None, per_page: None })
        .await?
        .data
        .expect("cart data");
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.subtotal, 2000);

    let placed = order_service::checkout(&state, &user)
        .await?
        .data
        .expect("order data");
    assert_eq!(placed.order.status, OrderStatus::Pending);
    assert_eq!(placed.order.total_amount, 2000);
    assert!(placed.order.order_number.starts_with("ORD-"));
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].unit_price, 1000);
    assert_eq!(placed.items[0].quantity, 2);

    assert_eq!(stock_of(&state, product_id).await?, 8);
    assert_eq!(CartItems::find().count(&state.orm).await?, 0);

    let secret = payment_service::create_intent(&state, &user, placed.order.id)
        .await?
        .data
        .expect("client secret");
    assert_eq!(processor.created(), 1);

    let payment = payment_service::get_payment_for_order(&state, &user, placed.order.id)
        .await?
        .data
        .expect("payment");
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount, 2000);
    assert_eq!(payment.external_intent_id, secret.payment_intent_id);

    let (payload, header) = signed_event(
        "evt_e2e_1",
        "payment_intent.succeeded",
        &secret.payment_intent_id,
    );
    let ack = webhook_service::accept(&state, &payload, Some(&header)).await?;
    assert_eq!(ack, WebhookAck::Accepted { reconciled: true });

    let order = order_service::get_order(&state, &user, placed.order.id)
        .await?
        .data
        .expect("order");
    assert_eq!(order.order.status, OrderStatus::Confirmed);

    let payment = payment_service::get_payment_for_order(&state, &user, placed.order.id)
        .await?
        .data
        .expect("payment");
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    assert_eq!(payment.external_payment_method_id.as_deref(), Some("pm_card_visa"));

    let listed = order_service::list_orders(&state, &user, OrderListQuery::default())
        .await?
        .data
        .expect("orders");
    assert_eq!(listed.items.len(), 1);

    Ok(())
}

#[tokio::test]
async fn failing_line_leaves_every_product_untouched() -> anyhow::Result<()> {
    let (state, _) = setup_state().await?;
    let user = customer();
    let plenty = seed_product(&state, "Widget A", 500, 5).await?;
    let scarce = seed_product(&state, "Widget B", 700, 2).await?;

    put_in_cart(&state, &user, plenty, 3).await?;
    put_in_cart(&state, &user, scarce, 10).await?;

    let err = order_service::checkout(&state, &user).await.unwrap_err();
    match err {
        AppError::InsufficientStock(name) => assert_eq!(name, "Widget B"),
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(stock_of(&state, plenty).await?, 5);
    assert_eq!(stock_of(&state, scarce).await?, 2);
    assert_eq!(Orders::find().count(&state.orm).await?, 0);
    assert_eq!(CartItems::find().count(&state.orm).await?, 2);
    Ok(())
}

#[tokio::test]
async fn empty_cart_cannot_be_checked_out() -> anyhow::Result<()> {
    let (state, _) = setup_state().await?;
    let user = customer();

    let err = order_service::checkout(&state, &user).await.unwrap_err();
    assert!(matches!(err, AppError::EmptyCart));

    let product_id = seed_product(&state, "Sticker", 100, 3).await?;
    put_in_cart(&state, &user, product_id, 1).await?;
    order_service::checkout(&state, &user).await?;

    // the first checkout consumed the cart
    let err = order_service::checkout(&state, &user).await.unwrap_err();
    assert!(matches!(err, AppError::EmptyCart));
    assert_eq!(stock_of(&state, product_id).await?, 2);
    Ok(())
}

#[tokio::test]
async fn order_keeps_price_paid_at_checkout() -> anyhow::Result<()> {
    let (state, _) = setup_state().await?;
    let user = customer();
    let product_id = seed_product(&state, "Hoodie", 1000, 10).await?;
    put_in_cart(&state, &user, product_id, 2).await?;

    let placed = order_service::checkout(&state, &user)
        .await?
        .data
        .expect("order");

    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .expect("product");
    let mut active: ProductActive = product.into();
    active.price = Set(5000);
    active.update(&state.orm).await?;

    let order = order_service::get_order(&state, &user, placed.order.id)
        .await?
        .data
        .expect("order");
    assert_eq!(order.order.total_amount, 2000);
    assert_eq!(order.items[0].unit_price, 1000);
    Ok(())
}

#[tokio::test]
async fn concurrent_checkouts_never_oversell() -> anyhow::Result<()> {
    let (state, _) = setup_state().await?;
    let product_id = seed_product(&state, "Limited Print", 3000, 3).await?;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let user = customer();
        put_in_cart(&state, &user, product_id, 1).await?;
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            order_service::checkout(&state, &user).await
        }));
    }

    let mut placed = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => placed += 1,
            Err(AppError::InsufficientStock(_)) => rejected += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(placed, 3);
    assert_eq!(rejected, 3);
    assert_eq!(stock_of(&state, product_id).await?, 0);
    assert_eq!(Orders::find().count(&state.orm).await?, 3);
    Ok(())
}

#[tokio::test]
async fn one_cart_is_billed_once_under_parallel_checkouts() -> anyhow::Result<()> {
    let (state, _) = setup_state().await?;
    let user = customer();
    let product_id = seed_product(&state, "Desk Lamp", 4000, 100).await?;
    put_in_cart(&state, &user, product_id, 2).await?;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let state = state.clone();
        let user = user.clone();
        handles.push(tokio::spawn(async move {
            order_service::checkout(&state, &user).await
        }));
    }

    let mut placed = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => placed += 1,
            // losers either wait on the cart lock and find it empty, or clear
            // fewer lines than they reserved for
            Err(AppError::EmptyCart) | Err(AppError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(placed, 1);
    assert_eq!(Orders::find().count(&state.orm).await?, 1);
    assert_eq!(stock_of(&state, product_id).await?, 98);
    assert_eq!(CartItems::find().count(&state.orm).await?, 0);
    Ok(())
}

#[tokio::test]
async fn orders_are_private_to_their_owner() -> anyhow::Result<()> {
    let (state, _) = setup_state().await?;
    let owner = customer();
    let stranger = customer();
    let product_id = seed_product(&state, "Notebook", 400, 4).await?;
    put_in_cart(&state, &owner, product_id, 1).await?;

    let placed = order_service::checkout(&state, &owner)
        .await?
        .data
        .expect("order");

    let err = order_service::get_order(&state, &stranger, placed.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let err = order_service::get_order(&state, &owner, uuid::Uuid::now_v7())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    let listed = order_service::list_orders(&state, &stranger, OrderListQuery::default())
        .await?
        .data
        .expect("orders");
    assert!(listed.items.is_empty());
    Ok(())
}

#[tokio::test]
async fn admin_cancel_returns_stock() -> anyhow::Result<()> {
    let (state, _) = setup_state().await?;
    let user = customer();
    let staff = admin();
    let product_id = seed_product(&state, "Keyboard", 9000, 5).await?;
    put_in_cart(&state, &user, product_id, 2).await?;

    let placed = order_service::checkout(&state, &user)
        .await?
        .data
        .expect("order");
    assert_eq!(stock_of(&state, product_id).await?, 3);

    let err = admin_service::update_order_status(
        &state,
        &user,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: "cancelled".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let err = admin_service::update_order_status(
        &state,
        &staff,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: "confirmed".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = admin_service::update_order_status(
        &state,
        &staff,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: "shipped".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let changed = admin_service::update_order_status(
        &state,
        &staff,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: "cancelled".into(),
        },
    )
    .await?
    .data
    .expect("status change");
    assert_eq!(changed.previous_status, OrderStatus::Pending);
    assert_eq!(changed.order.status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&state, product_id).await?, 5);

    // cancelling twice must not release stock twice
    let err = admin_service::update_order_status(
        &state,
        &staff,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: "cancelled".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(stock_of(&state, product_id).await?, 5);

    let err = payment_service::create_intent(&state, &user, placed.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    Ok(())
}

#[tokio::test]
async fn admin_inventory_adjustments_keep_stock_non_negative() -> anyhow::Result<()> {
    let (state, _) = setup_state().await?;
    let staff = admin();
    let product_id = seed_product(&state, "Cable", 300, 4).await?;

    let product = admin_service::adjust_inventory(
        &state,
        &staff,
        product_id,
        InventoryAdjustRequest { delta: 6 },
    )
    .await?
    .data
    .expect("product");
    assert_eq!(product.stock, 10);

    let product = admin_service::adjust_inventory(
        &state,
        &staff,
        product_id,
        InventoryAdjustRequest { delta: -7 },
    )
    .await?
    .data
    .expect("product");
    assert_eq!(product.stock, 3);

    let err = admin_service::adjust_inventory(
        &state,
        &staff,
        product_id,
        InventoryAdjustRequest { delta: -4 },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(stock_of(&state, product_id).await?, 3);

    let err = admin_service::adjust_inventory(
        &state,
        &staff,
        product_id,
        InventoryAdjustRequest { delta: 0 },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = admin_service::adjust_inventory(
        &state,
        &staff,
        uuid::Uuid::now_v7(),
        InventoryAdjustRequest { delta: 1 },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
    Ok(())
}
