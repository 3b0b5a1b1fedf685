use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, Debug, ToSchema)]
pub struct RegisterRequestOtp {
    pub email: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct RegisterConfirmRequest {
    pub email: String,
    pub otp: String,
    pub password: String,
    /// customer | merchant | shipper
    pub role: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct ResetPasswordConfirmRequest {
    pub email: String,
    pub otp: String,
    pub new_password: String,
}

/// Issuance acknowledgement. `debug_otp` is only populated when OTP_DEBUG
/// is enabled; production responses never carry the code.
#[derive(Debug, Serialize, ToSchema)]
pub struct OtpIssuedResponse {
    pub detail: String,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_otp: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}
