use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::orders::OrderList,
    entity::orders::{Column as OrderCol, Entity as Orders},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_shipper},
    models::OrderStatus,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::order_service::order_from_entity,
    state::AppState,
};

/// Orders ready for pickup that nobody has claimed yet, oldest first.
pub async fn list_available(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_shipper(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let finder = Orders::find()
        .filter(OrderCol::Status.eq(OrderStatus::ReadyForPickup.as_str()))
        .filter(OrderCol::ShipperId.is_null())
        .order_by_asc(OrderCol::CreatedAt);

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
        "Available orders",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn list_deliveries(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_shipper(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all().add(OrderCol::ShipperId.eq(user.user_id));
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
        "My deliveries",
        OrderList { items: orders },
        Some(meta),
    ))
}

/// Bind the acting shipper to an unassigned READY_FOR_PICKUP order. One
/// conditional UPDATE decides the race: of any number of concurrent
/// claimants exactly one sees rows_affected == 1, the rest get a conflict.
pub async fn claim_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<crate::models::Order>> {
    ensure_shipper(user)?;

    let res = Orders::update_many()
        .col_expr(OrderCol::ShipperId, Expr::value(user.user_id))
        .col_expr(OrderCol::Status, Expr::value(OrderStatus::PickedUp.as_str()))
        .col_expr(OrderCol::UpdatedAt, Expr::value(Utc::now()))
        .filter(OrderCol::Id.eq(id))
        .filter(OrderCol::Status.eq(OrderStatus::ReadyForPickup.as_str()))
        .filter(OrderCol::ShipperId.is_null())
        .exec(&state.orm)
        .await?;

    if res.rows_affected == 0 {
        return match Orders::find_by_id(id).one(&state.orm).await? {
            None => Err(AppError::NotFound),
            Some(_) => Err(AppError::Conflict("Order is not available for pickup".into())),
        };
    }

    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::OrderClaim,
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order claimed",
        order_from_entity(order)?,
        Some(Meta::empty()),
    ))
}
