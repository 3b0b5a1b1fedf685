use chrono::{Duration, Utc};
use rand::Rng;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use uuid::Uuid;

use crate::{
    db::OrmConn,
    entity::otp_requests::{
        ActiveModel as OtpActive, Column as OtpCol, Entity as OtpRequests, Model as OtpModel,
    },
    error::{AppError, AppResult},
    models::OtpPurpose,
    notify,
    state::AppState,
};

pub const OTP_CODE_LEN: usize = 6;

/// Uniform over the whole zero-padded 6-digit space, leading zeros kept.
fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06}", rng.gen_range(0..1_000_000u32))
}

/// Create an OTP row and hand the code to the notifier. Dispatch is
/// fire-and-forget; the row exists whether or not delivery ever succeeds.
pub async fn issue(state: &AppState, identifier: &str, purpose: OtpPurpose) -> AppResult<OtpModel> {
    let code = generate_code();
    let now = Utc::now();
    let expires_at = now + Duration::minutes(state.config.otp_ttl_minutes);

    let otp = OtpActive {
        id: Set(Uuid::new_v4()),
        identifier: Set(identifier.to_string()),
        code: Set(code.clone()),
        purpose: Set(purpose.as_str().to_string()),
        used: Set(false),
        created_at: NotSet,
        expires_at: Set(expires_at.into()),
    }
    .insert(&state.orm)
    .await?;

    notify::dispatch(
        state.notifier.clone(),
        identifier.to_string(),
        code,
        purpose,
    );

    Ok(otp)
}

fn invalid_otp() -> AppError {
    // One opaque message for wrong, expired and already-used codes.
    AppError::BadRequest("Invalid or expired OTP".into())
}

/// Check and consume a code. Any unused, unexpired row with a matching code
/// verifies, newest first; older still-valid codes stay usable. The flip to
/// used=true is conditional so a code is consumed at most once even when two
/// verifications race.
pub async fn verify(
    orm: &OrmConn,
    identifier: &str,
    code: &str,
    purpose: OtpPurpose,
) -> AppResult<()> {
    let now = Utc::now();
    let found = OtpRequests::find()
        .filter(OtpCol::Identifier.eq(identifier))
        .filter(OtpCol::Purpose.eq(purpose.as_str()))
        .filter(OtpCol::Code.eq(code))
        .filter(OtpCol::Used.eq(false))
        .filter(OtpCol::ExpiresAt.gt(now))
        .order_by_desc(OtpCol::CreatedAt)
        .one(orm)
        .await?;

    let row = match found {
        Some(r) => r,
        None => return Err(invalid_otp()),
    };

    let res = OtpRequests::update_many()
        .col_expr(OtpCol::Used, Expr::value(true))
        .filter(OtpCol::Id.eq(row.id))
        .filter(OtpCol::Used.eq(false))
        .exec(orm)
        .await?;

    if res.rows_affected == 0 {
        return Err(invalid_otp());
    }

    Ok(())
}
