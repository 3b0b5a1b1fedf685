use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::{
        menus::{
            CreateMenuItemRequest, CreateMerchantRequest, MenuItemList, UpdateAvailabilityRequest,
            UpdateStockRequest,
        },
        orders::OrderList,
    },
    entity::{
        menu_items::{
            ActiveModel as MenuItemActive, Column as MenuItemCol, Entity as MenuItems,
            Model as MenuItemModel,
        },
        merchants::{
            ActiveModel as MerchantActive, Column as MerchantCol, Entity as Merchants,
            Model as MerchantModel,
        },
        orders::{Column as OrderCol, Entity as Orders},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_merchant},
    models::{MenuItem, Merchant},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, Pagination, SortOrder},
    services::order_service::order_from_entity,
    state::AppState,
};

use chrono::Utc;

pub async fn create_merchant(
    state: &AppState,
    user: &AuthUser,
    payload: CreateMerchantRequest,
) -> AppResult<ApiResponse<Merchant>> {
    ensure_merchant(user)?;
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name must not be empty".into()));
    }

    let existing = Merchants::find()
        .filter(MerchantCol::OwnerId.eq(user.user_id))
        .one(&state.orm)
        .await?;
    if existing.is_some() {
        return Err(AppError::BadRequest("Merchant profile already exists".into()));
    }

    let merchant = MerchantActive {
        id: Set(Uuid::new_v4()),
        owner_id: Set(user.user_id),
        name: Set(payload.name),
        address: Set(payload.address),
        phone: Set(payload.phone),
        is_active: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::MerchantCreate,
        Some("merchants"),
        Some(serde_json::json!({ "merchant_id": merchant.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Merchant created",
        merchant_from_entity(merchant),
        Some(Meta::empty()),
    ))
}

/// The acting user's merchant profile; merchants own exactly one.
pub async fn own_merchant(state: &AppState, user: &AuthUser) -> AppResult<MerchantModel> {
    ensure_merchant(user)?;
    Merchants::find()
        .filter(MerchantCol::OwnerId.eq(user.user_id))
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn list_menu(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<MenuItemList>> {
    let merchant = own_merchant(state, user).await?;
    let (page, limit, offset) = pagination.normalize();

    let finder = MenuItems::find()
        .filter(MenuItemCol::MerchantId.eq(merchant.id))
        .order_by_asc(MenuItemCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(menu_item_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Menu",
        MenuItemList { items },
        Some(meta),
    ))
}

pub async fn create_menu_item(
    state: &AppState,
    user: &AuthUser,
    payload: CreateMenuItemRequest,
) -> AppResult<ApiResponse<MenuItem>> {
    let merchant = own_merchant(state, user).await?;

    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name must not be empty".into()));
    }
    if payload.price < 0 {
        return Err(AppError::BadRequest("price must not be negative".into()));
    }
    if payload.stock < 0 {
        return Err(AppError::BadRequest("stock must not be negative".into()));
    }

    let item = MenuItemActive {
        id: Set(Uuid::new_v4()),
        merchant_id: Set(merchant.id),
        name: Set(payload.name),
        description: Set(payload.description),
        price: Set(payload.price),
        stock: Set(payload.stock),
        is_available: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(ApiResponse::success(
        "Menu item created",
        menu_item_from_entity(item),
        Some(Meta::empty()),
    ))
}

/// Absolute stock set. Takes the same row lock checkout takes, so a manual
/// restock never interleaves with an in-flight reservation.
pub async fn update_stock(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateStockRequest,
) -> AppResult<ApiResponse<MenuItem>> {
    let merchant = own_merchant(state, user).await?;
    if payload.stock < 0 {
        return Err(AppError::BadRequest("stock must not be negative".into()));
    }

    let txn = state.orm.begin().await?;

    let item = MenuItems::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let item = match item {
        Some(i) if i.merchant_id == merchant.id => i,
        _ => return Err(AppError::NotFound),
    };

    let mut active: MenuItemActive = item.into();
    active.stock = Set(payload.stock);
    let updated = active.update(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::StockUpdate,
        Some("menu_items"),
        Some(serde_json::json!({ "menu_item_id": updated.id, "stock": updated.stock })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Stock updated",
        menu_item_from_entity(updated),
        Some(Meta::empty()),
    ))
}

pub async fn update_availability(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateAvailabilityRequest,
) -> AppResult<ApiResponse<MenuItem>> {
    let merchant = own_merchant(state, user).await?;

    let item = MenuItems::find_by_id(id).one(&state.orm).await?;
    let item = match item {
        Some(i) if i.merchant_id == merchant.id => i,
        _ => return Err(AppError::NotFound),
    };

    let mut active: MenuItemActive = item.into();
    active.is_available = Set(payload.is_available);
    let updated = active.update(&state.orm).await?;

    Ok(ApiResponse::success(
        "Availability updated",
        menu_item_from_entity(updated),
        Some(Meta::empty()),
    ))
}

/// Incoming orders for the merchant's shop.
pub async fn list_merchant_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let merchant = own_merchant(state, user).await?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all().add(OrderCol::MerchantId.eq(merchant.id));
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
        "Incoming orders",
        OrderList { items: orders },
        Some(meta),
    ))
}

fn merchant_from_entity(model: MerchantModel) -> Merchant {
    Merchant {
        id: model.id,
        owner_id: model.owner_id,
        name: model.name,
        address: model.address,
        phone: model.phone,
        is_active: model.is_active,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn menu_item_from_entity(model: MenuItemModel) -> MenuItem {
    MenuItem {
        id: model.id,
        merchant_id: model.merchant_id,
        name: model.name,
        description: model.description,
        price: model.price,
        stock: model.stock,
        is_available: model.is_available,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
