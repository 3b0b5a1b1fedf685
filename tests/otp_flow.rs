use std::sync::Arc;

use axum_food_delivery_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
    dto::auth::{
        ForgotPasswordRequest, LoginRequest, RegisterConfirmRequest, RegisterRequestOtp,
        ResetPasswordConfirmRequest,
    },
    entity::otp_requests::{ActiveModel as OtpActive, Column as OtpCol, Entity as OtpRequests},
    error::AppError,
    models::OtpPurpose,
    notify::LogNotifier,
    services::{auth_service, otp_service},
    state::AppState,
};
use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, Statement,
};
use uuid::Uuid;

#[tokio::test]
async fn otp_is_single_use_and_purpose_scoped() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let otp = otp_service::issue(&state, "a@b.com", OtpPurpose::Register).await?;
    assert_eq!(otp.code.len(), otp_service::OTP_CODE_LEN);
    assert!(!otp.used);
    assert!(otp.expires_at.with_timezone(&Utc) > Utc::now());

    // A REGISTER code is useless for a password reset.
    let err = otp_service::verify(&state.orm, "a@b.com", &otp.code, OtpPurpose::ResetPassword)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // Wrong identifier misses as well.
    let err = otp_service::verify(&state.orm, "b@b.com", &otp.code, OtpPurpose::Register)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // First verification consumes the code...
    otp_service::verify(&state.orm, "a@b.com", &otp.code, OtpPurpose::Register).await?;
    let row = OtpRequests::find_by_id(otp.id)
        .one(&state.orm)
        .await?
        .unwrap();
    assert!(row.used);

    // ...and the second one sees the same opaque error as a wrong code.
    let err = otp_service::verify(&state.orm, "a@b.com", &otp.code, OtpPurpose::Register)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    Ok(())
}

#[tokio::test]
async fn expired_otp_never_verifies() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let created = Utc::now() - Duration::minutes(10);
    let expired = OtpActive {
        id: Set(Uuid::new_v4()),
        identifier: Set("late@b.com".into()),
        code: Set("123456".into()),
        purpose: Set(OtpPurpose::Register.as_str().into()),
        used: Set(false),
        created_at: Set(created.into()),
        expires_at: Set((created + Duration::minutes(5)).into()),
    }
    .insert(&state.orm)
    .await?;

    let err = otp_service::verify(
        &state.orm,
        "late@b.com",
        &expired.code,
        OtpPurpose::Register,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // The row stays unconsumed; only successful verification flips it.
    let row = OtpRequests::find_by_id(expired.id)
        .one(&state.orm)
        .await?
        .unwrap();
    assert!(!row.used);

    Ok(())
}

#[tokio::test]
async fn older_unexpired_code_stays_usable_after_reissue() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let first = otp_service::issue(&state, "twice@b.com", OtpPurpose::Register).await?;
    let second = otp_service::issue(&state, "twice@b.com", OtpPurpose::Register).await?;

    // Issuing again does not invalidate the first code.
    otp_service::verify(&state.orm, "twice@b.com", &first.code, OtpPurpose::Register).await?;
    otp_service::verify(&state.orm, "twice@b.com", &second.code, OtpPurpose::Register).await?;

    Ok(())
}

#[tokio::test]
async fn registration_and_password_reset_flow() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    // Token signing reads the secret from the environment.
    unsafe { std::env::set_var("JWT_SECRET", "test-secret") };

    let email = "newuser@example.com";

    let resp = auth_service::register_request_otp(
        &state,
        RegisterRequestOtp {
            email: email.into(),
        },
    )
    .await?;
    let issued = resp.data.unwrap();
    let code = issued.debug_otp.expect("debug echo enabled in tests");

    // Wrong code is rejected and does not create the account.
    let err = auth_service::register_confirm(
        &state,
        RegisterConfirmRequest {
            email: email.into(),
            otp: "000000".into(),
            password: "hunter2hunter2".into(),
            role: "customer".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let resp = auth_service::register_confirm(
        &state,
        RegisterConfirmRequest {
            email: email.into(),
            otp: code,
            password: "hunter2hunter2".into(),
            role: "customer".into(),
        },
    )
    .await?;
    assert!(resp.data.unwrap().token.starts_with("Bearer "));

    // Requesting a registration OTP for a taken email fails outright.
    let err = auth_service::register_request_otp(
        &state,
        RegisterRequestOtp {
            email: email.into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // Forgot-password succeeds for unknown emails without issuing anything.
    let resp = auth_service::forgot_request_otp(
        &state,
        ForgotPasswordRequest {
            email: "nobody@example.com".into(),
        },
    )
    .await?;
    let issued = resp.data.unwrap();
    assert!(issued.debug_otp.is_none());
    let count = OtpRequests::find()
        .filter(OtpCol::Identifier.eq("nobody@example.com"))
        .all(&state.orm)
        .await?
        .len();
    assert_eq!(count, 0);

    // Real reset flow.
    let resp = auth_service::forgot_request_otp(
        &state,
        ForgotPasswordRequest {
            email: email.into(),
        },
    )
    .await?;
    let code = resp.data.unwrap().debug_otp.expect("debug echo");

    auth_service::reset_password_confirm(
        &state,
        ResetPasswordConfirmRequest {
            email: email.into(),
            otp: code,
            new_password: "correct-horse-battery".into(),
        },
    )
    .await?;

    // Old password is gone, new one works.
    let err = auth_service::login_user(
        &state,
        LoginRequest {
            email: email.into(),
            password: "hunter2hunter2".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    auth_service::login_user(
        &state,
        LoginRequest {
            email: email.into(),
            password: "correct-horse-battery".into(),
        },
    )
    .await?;

    Ok(())
}

// Tests in this binary run on parallel threads against one database; the
// cleanup happens once per run and each test uses its own identifiers.
static CLEAN_DB: tokio::sync::OnceCell<()> = tokio::sync::OnceCell::const_new();

async fn setup_state() -> anyhow::Result<Option<AppState>> {
    // Allow skipping when no DB is configured in the environment.
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(None);
        }
    };

    let pool = create_pool(&database_url).await?;
    let orm = create_orm_conn(&database_url).await?;
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
        database_url: database_url.clone(),
        host: "127.0.0.1".into(),
        port: 0,
        otp_ttl_minutes: 5,
        otp_debug: true,
    };

    Ok(Some(AppState {
        pool,
        orm,
        config,
        notifier: Arc::new(LogNotifier),
    }))
}
