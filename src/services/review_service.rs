use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, JoinType, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait, Set,
};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::orders::{ReviewList, ReviewRequest},
    entity::{
        orders::{Column as OrderCol, Entity as Orders},
        reviews::{
            ActiveModel as ReviewActive, Column as ReviewCol, Entity as Reviews,
            Model as ReviewModel, Relation as ReviewRelation,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_customer},
    models::{OrderStatus, Review},
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    services::menu_service::own_merchant,
    state::AppState,
};

fn validate_rating(value: i32, field: &str) -> AppResult<()> {
    if !(1..=5).contains(&value) {
        return Err(AppError::BadRequest(format!("{field} must be between 1 and 5")));
    }
    Ok(())
}

/// One review per order, by its customer, only once delivered.
pub async fn review_order(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: ReviewRequest,
) -> AppResult<ApiResponse<Review>> {
    ensure_customer(user)?;

    validate_rating(payload.order_rating, "order_rating")?;
    if let Some(r) = payload.merchant_rating {
        validate_rating(r, "merchant_rating")?;
    }
    if let Some(r) = payload.shipper_rating {
        validate_rating(r, "shipper_rating")?;
    }

    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::Id.eq(order_id))
                .add(OrderCol::CustomerId.eq(user.user_id)),
        )
        .one(&state.orm)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    if order.status != OrderStatus::Delivered.as_str() {
        return Err(AppError::BadRequest("Order is not delivered yet".into()));
    }

    let existing = Reviews::find()
        .filter(ReviewCol::OrderId.eq(order.id))
        .filter(ReviewCol::CustomerId.eq(user.user_id))
        .one(&state.orm)
        .await?;
    if existing.is_some() {
        return Err(AppError::BadRequest("Order already reviewed".into()));
    }

    let review = ReviewActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        customer_id: Set(user.user_id),
        order_rating: Set(payload.order_rating),
        merchant_rating: Set(payload.merchant_rating),
        shipper_rating: Set(payload.shipper_rating),
        comment: Set(payload.comment),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::ReviewCreate,
        Some("reviews"),
        Some(serde_json::json!({ "order_id": order.id, "review_id": review.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Review recorded",
        review_from_entity(review),
        Some(Meta::empty()),
    ))
}

/// Reviews left on the acting merchant's orders, newest first.
pub async fn list_merchant_reviews(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<ReviewList>> {
    let merchant = own_merchant(state, user).await?;
    let (page, limit, offset) = pagination.normalize();

    let finder = Reviews::find()
        .join(JoinType::InnerJoin, ReviewRelation::Orders.def())
        .filter(OrderCol::MerchantId.eq(merchant.id))
        .order_by_desc(ReviewCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(review_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Reviews",
        ReviewList { items },
        Some(meta),
    ))
}

fn review_from_entity(model: ReviewModel) -> Review {
    Review {
        id: model.id,
        order_id: model.order_id,
        customer_id: model.customer_id,
        order_rating: model.order_rating,
        merchant_rating: model.merchant_rating,
        shipper_rating: model.shipper_rating,
        comment: model.comment,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}
