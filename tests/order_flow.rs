use std::sync::Arc;

use axum_food_delivery_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
    dto::orders::{CreateOrderRequest, OrderItemInput, ReviewRequest},
    entity::{
        menu_items::{ActiveModel as MenuItemActive, Entity as MenuItems},
        merchants::ActiveModel as MerchantActive,
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        users::ActiveModel as UserActive,
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::{OrderStatus, PaymentStatus},
    notify::LogNotifier,
    services::{order_service, review_service, shipper_service},
    state::AppState,
};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, Statement};
use uuid::Uuid;

// Full lifecycle: checkout with stock reservation -> merchant confirm/ready
// -> racing shipper claims -> delivery -> review; plus the rejection paths.
#[tokio::test]
async fn order_lifecycle_flow() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let state = setup_state(&database_url).await?;

    let customer_id = create_user(&state, "customer", "customer@example.com").await?;
    let owner_id = create_user(&state, "merchant", "owner@example.com").await?;
    let shipper_a_id = create_user(&state, "shipper", "shipper.a@example.com").await?;
    let shipper_b_id = create_user(&state, "shipper", "shipper.b@example.com").await?;

    let customer = AuthUser {
        user_id: customer_id,
        role: "customer".into(),
    };
    let merchant_user = AuthUser {
        user_id: owner_id,
        role: "merchant".into(),
    };
    let shipper_a = AuthUser {
        user_id: shipper_a_id,
        role: "shipper".into(),
    };
    let shipper_b = AuthUser {
        user_id: shipper_b_id,
        role: "shipper".into(),
    };

    let merchant = MerchantActive {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        name: Set("Test Kitchen".into()),
        address: Set("1 Noodle St".into()),
        phone: Set("0123456789".into()),
        is_active: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let menu_item = MenuItemActive {
        id: Set(Uuid::new_v4()),
        merchant_id: Set(merchant.id),
        name: Set("Pho Bo".into()),
        description: Set(Some("Beef noodle soup".into())),
        price: Set(1500),
        stock: Set(10),
        is_available: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    // Empty cart is rejected before anything is touched.
    let err = order_service::create_order(
        &state,
        &customer,
        CreateOrderRequest {
            merchant_id: merchant.id,
            delivery_address: "2 Rice Ave".into(),
            note: String::new(),
            items: vec![],
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // Unknown merchant is rejected before any locks.
    let err = order_service::create_order(
        &state,
        &customer,
        CreateOrderRequest {
            merchant_id: Uuid::new_v4(),
            delivery_address: "2 Rice Ave".into(),
            note: String::new(),
            items: vec![OrderItemInput {
                menu_item_id: menu_item.id,
                quantity: 1,
            }],
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    // Checkout: stock 10, quantity 3 -> order total 4500, stock 7.
    let resp = order_service::create_order(
        &state,
        &customer,
        CreateOrderRequest {
            merchant_id: merchant.id,
            delivery_address: "2 Rice Ave".into(),
            note: "less spicy".into(),
            items: vec![OrderItemInput {
                menu_item_id: menu_item.id,
                quantity: 3,
            }],
        },
    )
    .await?;
    let created = resp.data.unwrap();
    let order = created.order;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Unpaid);
    assert_eq!(order.total_amount, 4500);
    assert_eq!(created.items.len(), 1);
    assert_eq!(created.items[0].price_snapshot, 1500);
    assert_eq!(created.items[0].line_total, 4500);
    assert_eq!(
        order.total_amount,
        created.items.iter().map(|i| i.line_total).sum::<i64>()
    );

    let stock_after = MenuItems::find_by_id(menu_item.id)
        .one(&state.orm)
        .await?
        .unwrap()
        .stock;
    assert_eq!(stock_after, 7);

    // A request for more than the remaining stock fails and changes nothing.
    let err = order_service::create_order(
        &state,
        &customer,
        CreateOrderRequest {
            merchant_id: merchant.id,
            delivery_address: "2 Rice Ave".into(),
            note: String::new(),
            items: vec![OrderItemInput {
                menu_item_id: menu_item.id,
                quantity: 8,
            }],
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    let stock_after = MenuItems::find_by_id(menu_item.id)
        .one(&state.orm)
        .await?
        .unwrap()
        .stock;
    assert_eq!(stock_after, 7);

    // Snapshots are isolated from later menu edits.
    let mut rename: MenuItemActive = MenuItems::find_by_id(menu_item.id)
        .one(&state.orm)
        .await?
        .unwrap()
        .into();
    rename.name = Set("Pho Bo Deluxe".into());
    rename.price = Set(9900);
    rename.update(&state.orm).await?;

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?;
    assert_eq!(items[0].name_snapshot, "Pho Bo");
    assert_eq!(items[0].price_snapshot, 1500);

    // Shippers cannot claim before the kitchen is done.
    let err = shipper_service::claim_order(&state, &shipper_a, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // Merchant drives PENDING -> CONFIRMED -> READY_FOR_PICKUP.
    let resp =
        order_service::set_order_status(&state, &merchant_user, order.id, OrderStatus::Confirmed)
            .await?;
    assert_eq!(resp.data.unwrap().status, OrderStatus::Confirmed);

    // Repeating the same edge is rejected and leaves state unchanged.
    let err =
        order_service::set_order_status(&state, &merchant_user, order.id, OrderStatus::Confirmed)
            .await
            .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let resp = order_service::set_order_status(
        &state,
        &merchant_user,
        order.id,
        OrderStatus::ReadyForPickup,
    )
    .await?;
    assert_eq!(resp.data.unwrap().status, OrderStatus::ReadyForPickup);

    // Two shippers race for the same order; exactly one wins.
    let (r1, r2) = tokio::join!(
        shipper_service::claim_order(&state, &shipper_a, order.id),
        shipper_service::claim_order(&state, &shipper_b, order.id),
    );
    let wins = [r1.is_ok(), r2.is_ok()].iter().filter(|w| **w).count();
    assert_eq!(wins, 1, "exactly one claim must succeed");
    let loser_err = if r1.is_ok() {
        r2.unwrap_err()
    } else {
        r1.unwrap_err()
    };
    assert!(matches!(loser_err, AppError::Conflict(_)));

    let claimed = order_service::get_order(&state, &customer, order.id)
        .await?
        .data
        .unwrap()
        .order;
    assert_eq!(claimed.status, OrderStatus::PickedUp);
    let winner_id = claimed.shipper_id.expect("winner assigned");
    assert!(winner_id == shipper_a_id || winner_id == shipper_b_id);

    let (winner, loser) = if winner_id == shipper_a_id {
        (&shipper_a, &shipper_b)
    } else {
        (&shipper_b, &shipper_a)
    };

    // Only the assigned shipper may advance the delivery.
    let err =
        order_service::set_order_status(&state, loser, order.id, OrderStatus::Delivering)
            .await
            .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    order_service::set_order_status(&state, winner, order.id, OrderStatus::Delivering).await?;
    let resp =
        order_service::set_order_status(&state, winner, order.id, OrderStatus::Delivered).await?;
    assert_eq!(resp.data.unwrap().status, OrderStatus::Delivered);

    // DELIVERED is terminal, even for the merchant.
    let err =
        order_service::set_order_status(&state, &merchant_user, order.id, OrderStatus::Canceled)
            .await
            .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // Review: once, by the customer, after delivery.
    let resp = review_service::review_order(
        &state,
        &customer,
        order.id,
        ReviewRequest {
            order_rating: 5,
            merchant_rating: Some(4),
            shipper_rating: Some(5),
            comment: "fast and hot".into(),
        },
    )
    .await?;
    assert_eq!(resp.data.unwrap().order_rating, 5);

    let err = review_service::review_order(
        &state,
        &customer,
        order.id,
        ReviewRequest {
            order_rating: 1,
            merchant_rating: None,
            shipper_rating: None,
            comment: String::new(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    Ok(())
}

#[tokio::test]
async fn cancel_and_payment_flow() -> anyhow::Result<()> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let state = setup_state(&database_url).await?;

    let customer_id = create_user(&state, "customer", "payer@example.com").await?;
    let owner_id = create_user(&state, "merchant", "payee@example.com").await?;
    let customer = AuthUser {
        user_id: customer_id,
        role: "customer".into(),
    };

    let merchant = MerchantActive {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        name: Set("Banh Mi Corner".into()),
        address: Set("3 Baguette Rd".into()),
        phone: Set("0987654321".into()),
        is_active: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let menu_item = MenuItemActive {
        id: Set(Uuid::new_v4()),
        merchant_id: Set(merchant.id),
        name: Set("Banh Mi".into()),
        description: Set(None),
        price: Set(800),
        stock: Set(5),
        is_available: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let order = |qty: i32| CreateOrderRequest {
        merchant_id: merchant.id,
        delivery_address: "4 Lunch Ln".into(),
        note: String::new(),
        items: vec![OrderItemInput {
            menu_item_id: menu_item.id,
            quantity: qty,
        }],
    };

    // Pay, then cancel while still pending: payment flips to REFUNDED.
    let paid_order = order_service::create_order(&state, &customer, order(1))
        .await?
        .data
        .unwrap()
        .order;
    let resp = order_service::pay_order(&state, &customer, paid_order.id).await?;
    assert_eq!(resp.data.unwrap().payment_status, PaymentStatus::Paid);

    let err = order_service::pay_order(&state, &customer, paid_order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let resp =
        order_service::set_order_status(&state, &customer, paid_order.id, OrderStatus::Canceled)
            .await?;
    let canceled = resp.data.unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);
    assert_eq!(canceled.payment_status, PaymentStatus::Refunded);

    // Paying a canceled order is refused.
    let unpaid_order = order_service::create_order(&state, &customer, order(1))
        .await?
        .data
        .unwrap()
        .order;
    order_service::set_order_status(&state, &customer, unpaid_order.id, OrderStatus::Canceled)
        .await?;
    let err = order_service::pay_order(&state, &customer, unpaid_order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    Ok(())
}

// Tests in this binary run on parallel threads against one database; the
// cleanup happens once per run and each test seeds disjoint rows.
static CLEAN_DB: tokio::sync::OnceCell<()> = tokio::sync::OnceCell::const_new();

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let orm = create_orm_conn(database_url).await?;
    run_migrations(&orm).await?;

    // Clean tables between runs
    CLEAN_DB
        .get_or_try_init(|| async {
            let backend = orm.get_database_backend();
            orm.execute(Statement::from_string(
                backend,
                "TRUNCATE TABLE reviews, order_items, orders, otp_requests, menu_items, merchants, audit_logs, users RESTART IDENTITY CASCADE",
            ))
            .await?;
            Ok::<_, anyhow::Error>(())
        })
        .await?;

    let config = AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".into(),
        port: 0,
        otp_ttl_minutes: 5,
        otp_debug: true,
    };

    Ok(AppState {
        pool,
        orm,
        config,
        notifier: Arc::new(LogNotifier),
    })
}

async fn create_user(state: &AppState, role: &str, email: &str) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set("dummy".into()),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(user.id)
}
