use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::orders::{CreateOrderRequest, OrderList, OrderWithItems},
    entity::{
        menu_items::{ActiveModel as MenuItemActive, Entity as MenuItems},
        merchants::{Column as MerchantCol, Entity as Merchants},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ROLE_CUSTOMER, ROLE_MERCHANT, ROLE_SHIPPER, ensure_customer, is_admin},
    models::{Order, OrderItem, OrderStatus, PaymentStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

struct LineSnapshot {
    menu_item_id: Uuid,
    name: String,
    price: i64,
    quantity: i32,
    line_total: i64,
}

/// Checkout. Locks every referenced menu item inside one transaction,
/// decrements stock, and materializes the order with price/name snapshots.
/// Either everything lands or nothing does.
pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_customer(user)?;

    if payload.items.is_empty() {
        return Err(AppError::BadRequest("Order has no items".into()));
    }
    for line in &payload.items {
        if line.quantity < 1 {
            return Err(AppError::BadRequest(format!(
                "Invalid quantity {} for menu item {}",
                line.quantity, line.menu_item_id
            )));
        }
    }

    // Checked before any lock is taken.
    let merchant = Merchants::find_by_id(payload.merchant_id)
        .one(&state.orm)
        .await?;
    let merchant = match merchant {
        Some(m) => m,
        None => return Err(AppError::NotFound),
    };
    if !merchant.is_active {
        return Err(AppError::BadRequest("Merchant is not accepting orders".into()));
    }

    // Stable lock order across concurrent checkouts touching overlapping
    // item sets, so two transactions can never deadlock on each other.
    let mut lines = payload.items;
    lines.sort_by_key(|l| l.menu_item_id);

    let txn = state.orm.begin().await?;

    let mut total_amount: i64 = 0;
    let mut snapshots: Vec<LineSnapshot> = Vec::with_capacity(lines.len());

    for line in &lines {
        let menu = MenuItems::find_by_id(line.menu_item_id)
            .lock(LockType::Update)
            .one(&txn)
            .await?;
        let menu = match menu {
            Some(m) if m.merchant_id == merchant.id => m,
            _ => return Err(AppError::NotFound),
        };
        if !menu.is_available {
            return Err(AppError::Conflict(format!("{} is not available", menu.name)));
        }
        if menu.stock < line.quantity {
            return Err(AppError::Conflict(format!(
                "Insufficient stock for {}",
                menu.name
            )));
        }

        let name = menu.name.clone();
        let price = menu.price;
        let new_stock = menu.stock - line.quantity;

        let mut active: MenuItemActive = menu.into();
        active.stock = Set(new_stock);
        active.update(&txn).await?;

        let line_total = price * line.quantity as i64;
        total_amount += line_total;
        snapshots.push(LineSnapshot {
            menu_item_id: line.menu_item_id,
            name,
            price,
            quantity: line.quantity,
            line_total,
        });
    }

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        customer_id: Set(user.user_id),
        merchant_id: Set(merchant.id),
        shipper_id: Set(None),
        status: Set(OrderStatus::Pending.as_str().into()),
        payment_status: Set(PaymentStatus::Unpaid.as_str().into()),
        total_amount: Set(total_amount),
        delivery_address: Set(payload.delivery_address),
        note: Set(payload.note),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut order_items: Vec<OrderItem> = Vec::with_capacity(snapshots.len());
    for snap in snapshots {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            menu_item_id: Set(Some(snap.menu_item_id)),
            name_snapshot: Set(snap.name),
            price_snapshot: Set(snap.price),
            quantity: Set(snap.quantity),
            line_total: Set(snap.line_total),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        order_items.push(order_item_from_entity(item));
    }

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::OrderCreate,
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "total_amount": total_amount })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order created",
        OrderWithItems {
            order: order_from_entity(order)?,
            items: order_items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::CustomerId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect::<AppResult<Vec<_>>>()?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::CustomerId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Drive the order through its state machine on behalf of an actor. The row
/// is locked for the read-check-write; an illegal edge leaves it untouched.
pub async fn set_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    next: OrderStatus,
) -> AppResult<ApiResponse<Order>> {
    let txn = state.orm.begin().await?;

    let existing = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let existing = match existing {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let current = order_status_of(&existing)?;
    if !current.can_transition_to(next) {
        return Err(AppError::Conflict(format!(
            "Invalid transition from {current} to {next}"
        )));
    }
    ensure_actor_may_transition(state, user, &existing, next).await?;

    let paid = existing.payment_status == PaymentStatus::Paid.as_str();
    let mut active: OrderActive = existing.into();
    active.status = Set(next.as_str().into());
    active.updated_at = Set(Utc::now().into());
    if next == OrderStatus::Canceled && paid {
        active.payment_status = Set(PaymentStatus::Refunded.as_str().into());
    }
    let order = active.update(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::OrderStatusUpdate,
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "status": order.status })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order updated",
        order_from_entity(order)?,
        Some(Meta::empty()),
    ))
}

/// Record payment for an order. Gateway integration stays out of scope;
/// this only flips the payment state.
pub async fn pay_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    ensure_customer(user)?;
    let txn = state.orm.begin().await?;

    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::CustomerId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    if order.status == OrderStatus::Canceled.as_str() {
        return Err(AppError::Conflict("Order is canceled".into()));
    }
    if order.payment_status != PaymentStatus::Unpaid.as_str() {
        return Err(AppError::BadRequest("Order already paid".into()));
    }

    let mut active: OrderActive = order.into();
    active.payment_status = Set(PaymentStatus::Paid.as_str().into());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::OrderPaid,
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Payment recorded",
        order_from_entity(order)?,
        Some(Meta::empty()),
    ))
}

async fn ensure_actor_may_transition(
    state: &AppState,
    user: &AuthUser,
    order: &OrderModel,
    next: OrderStatus,
) -> AppResult<()> {
    use OrderStatus::*;

    if is_admin(user) {
        return Ok(());
    }

    match user.role.as_str() {
        ROLE_CUSTOMER => {
            // Customers may only back out before the kitchen starts cooking.
            let current = order_status_of(order)?;
            if order.customer_id == user.user_id
                && next == Canceled
                && matches!(current, Pending | Confirmed)
            {
                return Ok(());
            }
        }
        ROLE_MERCHANT => {
            let owns = Merchants::find_by_id(order.merchant_id)
                .filter(MerchantCol::OwnerId.eq(user.user_id))
                .one(&state.orm)
                .await?
                .is_some();
            if owns && matches!(next, Confirmed | ReadyForPickup | Canceled) {
                return Ok(());
            }
        }
        ROLE_SHIPPER => {
            if order.shipper_id == Some(user.user_id) && matches!(next, Delivering | Delivered) {
                return Ok(());
            }
        }
        _ => {}
    }

    Err(AppError::Forbidden)
}

fn order_status_of(model: &OrderModel) -> AppResult<OrderStatus> {
    OrderStatus::parse(&model.status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("unknown order status {}", model.status))
    })
}

pub(crate) fn order_from_entity(model: OrderModel) -> AppResult<Order> {
    let status = OrderStatus::parse(&model.status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("unknown order status {}", model.status))
    })?;
    let payment_status = PaymentStatus::parse(&model.payment_status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "unknown payment status {}",
            model.payment_status
        ))
    })?;
    Ok(Order {
        id: model.id,
        customer_id: model.customer_id,
        merchant_id: model.merchant_id,
        shipper_id: model.shipper_id,
        status,
        payment_status,
        total_amount: model.total_amount,
        delivery_address: model.delivery_address,
        note: model.note,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

pub(crate) fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        menu_item_id: model.menu_item_id,
        name_snapshot: model.name_snapshot,
        price_snapshot: model.price_snapshot,
        quantity: model.quantity,
        line_total: model.line_total,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
