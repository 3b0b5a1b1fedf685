use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use password_hash::rand_core::OsRng;
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::auth::{
        Claims, ForgotPasswordRequest, LoginRequest, LoginResponse, OtpIssuedResponse,
        RegisterConfirmRequest, RegisterRequestOtp, ResetPasswordConfirmRequest,
    },
    error::{AppError, AppResult},
    middleware::auth::{ROLE_CUSTOMER, ROLE_MERCHANT, ROLE_SHIPPER},
    models::{OtpPurpose, User},
    response::{ApiResponse, Meta},
    services::otp_service,
    state::AppState,
};

/// Step one of registration: reserve nothing, just send a code. The account
/// is only created once the code comes back.
pub async fn register_request_otp(
    state: &AppState,
    payload: RegisterRequestOtp,
) -> AppResult<ApiResponse<OtpIssuedResponse>> {
    let RegisterRequestOtp { email } = payload;
    if email.trim().is_empty() {
        return Err(AppError::BadRequest("email must not be empty".into()));
    }

    let exist: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(&state.pool)
        .await?;
    if exist.is_some() {
        return Err(AppError::BadRequest("Email is already taken".to_string()));
    }

    let otp = otp_service::issue(state, &email, OtpPurpose::Register).await?;

    let resp = OtpIssuedResponse {
        detail: "OTP sent".into(),
        expires_at: Some(otp.expires_at.with_timezone(&Utc)),
        debug_otp: state.config.otp_debug.then(|| otp.code.clone()),
    };
    Ok(ApiResponse::success("OTP issued", resp, Some(Meta::empty())))
}

pub async fn register_confirm(
    state: &AppState,
    payload: RegisterConfirmRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    let RegisterConfirmRequest {
        email,
        otp,
        password,
        role,
    } = payload;

    if ![ROLE_CUSTOMER, ROLE_MERCHANT, ROLE_SHIPPER].contains(&role.as_str()) {
        return Err(AppError::BadRequest("Invalid role".into()));
    }

    let exist: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(&state.pool)
        .await?;
    if exist.is_some() {
        return Err(AppError::BadRequest("Email is already taken".to_string()));
    }

    otp_service::verify(&state.orm, &email, &otp, OtpPurpose::Register).await?;

    let password_hash = hash_password(&password)?;
    let id = Uuid::new_v4();

    let user: User = sqlx::query_as(
        "INSERT INTO users (id, email, password_hash, role) VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(id)
    .bind(email.as_str())
    .bind(password_hash)
    .bind(role.as_str())
    .fetch_one(&state.pool)
    .await?;

    let token = issue_token(user.id, &user.role)?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.id),
        AuditAction::UserRegister,
        Some("users"),
        Some(serde_json::json!({ "user_id": user.id, "role": user.role })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "User created",
        LoginResponse { token },
        Some(Meta::empty()),
    ))
}

pub async fn login_user(
    state: &AppState,
    payload: LoginRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    let LoginRequest { email, password } = payload;
    let user: Option<User> = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(&state.pool)
        .await?;

    let user = match user {
        Some(u) => u,
        None => return Err(AppError::BadRequest("Invalid email or password".into())),
    };

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;

    let argon2 = Argon2::default();
    if argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(AppError::BadRequest("Invalid email or password".into()));
    }

    let token = issue_token(user.id, &user.role)?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.id),
        AuditAction::UserLogin,
        Some("users"),
        Some(serde_json::json!({ "user_id": user.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Logged in",
        LoginResponse { token },
        Some(Meta::empty()),
    ))
}

/// Password-reset step one. Replies identically whether or not the email is
/// registered, so the endpoint cannot be used to enumerate accounts.
pub async fn forgot_request_otp(
    state: &AppState,
    payload: ForgotPasswordRequest,
) -> AppResult<ApiResponse<OtpIssuedResponse>> {
    let ForgotPasswordRequest { email } = payload;

    let exist: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(&state.pool)
        .await?;

    let debug_otp = if exist.is_some() {
        let otp = otp_service::issue(state, &email, OtpPurpose::ResetPassword).await?;
        state.config.otp_debug.then(|| otp.code.clone())
    } else {
        None
    };

    let resp = OtpIssuedResponse {
        detail: "If the email is registered, an OTP has been sent".into(),
        expires_at: None,
        debug_otp,
    };
    Ok(ApiResponse::success("OTP requested", resp, Some(Meta::empty())))
}

pub async fn reset_password_confirm(
    state: &AppState,
    payload: ResetPasswordConfirmRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let ResetPasswordConfirmRequest {
        email,
        otp,
        new_password,
    } = payload;

    if new_password.trim().is_empty() {
        return Err(AppError::BadRequest("new_password must not be empty".into()));
    }

    otp_service::verify(&state.orm, &email, &otp, OtpPurpose::ResetPassword).await?;

    let password_hash = hash_password(&new_password)?;
    let result = sqlx::query("UPDATE users SET password_hash = $1 WHERE email = $2")
        .bind(password_hash)
        .bind(email.as_str())
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        // Codes are only ever issued for registered emails; a consumed code
        // without a matching account means the account went away since.
        return Err(AppError::BadRequest("Invalid or expired OTP".into()));
    }

    if let Err(err) = log_audit(
        &state.pool,
        None,
        AuditAction::PasswordReset,
        Some("users"),
        Some(serde_json::json!({ "email": email })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Password updated",
        serde_json::json!({ "detail": "Password updated" }),
        Some(Meta::empty()),
    ))
}

fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string();
    Ok(hash)
}

fn issue_token(user_id: Uuid, role: &str) -> AppResult<String> {
    let secret = std::env::var("JWT_SECRET")
        .map_err(|_| AppError::Internal(anyhow::anyhow!("JWT_SECRET is not set")))?;

    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(24))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        exp: expiration.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?;

    Ok(format!("Bearer {}", token))
}
