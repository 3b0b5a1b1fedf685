use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::auth::{
        ForgotPasswordRequest, LoginRequest, LoginResponse, OtpIssuedResponse,
        RegisterConfirmRequest, RegisterRequestOtp, ResetPasswordConfirmRequest,
    },
    error::AppResult,
    response::ApiResponse,
    services::auth_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register/request-otp", post(register_request_otp))
        .route("/register/confirm", post(register_confirm))
        .route("/login", post(login))
        .route("/forgot/request-otp", post(forgot_request_otp))
        .route("/reset-password/confirm", post(reset_password_confirm))
}

#[utoipa::path(
    post,
    path = "/api/auth/register/request-otp",
    request_body = RegisterRequestOtp,
    responses(
        (status = 200, description = "OTP issued", body = ApiResponse<OtpIssuedResponse>),
        (status = 400, description = "Email already taken")
    ),
    tag = "Auth"
)]
pub async fn register_request_otp(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequestOtp>,
) -> AppResult<Json<ApiResponse<OtpIssuedResponse>>> {
    let resp = auth_service::register_request_otp(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/auth/register/confirm",
    request_body = RegisterConfirmRequest,
    responses(
        (status = 200, description = "Account created", body = ApiResponse<LoginResponse>),
        (status = 400, description = "Invalid or expired OTP")
    ),
    tag = "Auth"
)]
pub async fn register_confirm(
    State(state): State<AppState>,
    Json(payload): Json<RegisterConfirmRequest>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    let resp = auth_service::register_confirm(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login user", body = ApiResponse<LoginResponse>),
        (status = 400, description = "Invalid credentials")
    ),
    tag = "Auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    let resp = auth_service::login_user(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/auth/forgot/request-otp",
    request_body = ForgotPasswordRequest,
    responses(
        // Always 200, registered or not.
        (status = 200, description = "OTP requested", body = ApiResponse<OtpIssuedResponse>)
    ),
    tag = "Auth"
)]
pub async fn forgot_request_otp(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> AppResult<Json<ApiResponse<OtpIssuedResponse>>> {
    let resp = auth_service::forgot_request_otp(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/auth/reset-password/confirm",
    request_body = ResetPasswordConfirmRequest,
    responses(
        (status = 200, description = "Password updated"),
        (status = 400, description = "Invalid or expired OTP")
    ),
    tag = "Auth"
)]
pub async fn reset_password_confirm(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordConfirmRequest>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = auth_service::reset_password_confirm(&state, payload).await?;
    Ok(Json(resp))
}
