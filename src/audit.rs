use serde_json::Value;
use uuid::Uuid;

use crate::{db::DbPool, error::AppResult};

/// Everything the marketplace records about itself. One variant per
/// mutation that matters when reconstructing what happened to an order
/// or an account.
#[derive(Debug, Clone, Copy)]
pub enum AuditAction {
    UserRegister,
    UserLogin,
    PasswordReset,
    MerchantCreate,
    StockUpdate,
    OrderCreate,
    OrderStatusUpdate,
    OrderClaim,
    OrderPaid,
    ReviewCreate,
}

impl AuditAction {
    fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserRegister => "user_register",
            AuditAction::UserLogin => "user_login",
            AuditAction::PasswordReset => "password_reset",
            AuditAction::MerchantCreate => "merchant_create",
            AuditAction::StockUpdate => "stock_update",
            AuditAction::OrderCreate => "order_create",
            AuditAction::OrderStatusUpdate => "order_status_update",
            AuditAction::OrderClaim => "order_claim",
            AuditAction::OrderPaid => "order_paid",
            AuditAction::ReviewCreate => "review_create",
        }
    }
}

pub async fn log_audit(
    pool: &DbPool,
    user_id: Option<Uuid>,
    action: AuditAction,
    resource: Option<&str>,
    metadata: Option<Value>,
) -> AppResult<()> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, user_id, action, resource, metadata)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(action.as_str())
    .bind(resource)
    .bind(metadata)
    .execute(pool)
    .await?;

    Ok(())
}
