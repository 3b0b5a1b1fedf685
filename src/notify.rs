use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::models::OtpPurpose;

/// Out-of-band delivery of OTP codes. The real transport (SMTP, SMS) lives
/// behind this seam; the core never waits on it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, identifier: &str, code: &str, purpose: OtpPurpose) -> anyhow::Result<()>;
}

/// Default notifier: writes the message to the log. Swap in a real
/// transport without touching the OTP service.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, identifier: &str, code: &str, purpose: OtpPurpose) -> anyhow::Result<()> {
        tracing::info!(
            to = %identifier,
            purpose = %purpose.as_str(),
            code = %code,
            "otp notification"
        );
        Ok(())
    }
}

const DISPATCH_ATTEMPTS: u32 = 3;
const DISPATCH_BACKOFF: Duration = Duration::from_secs(5);

/// Fire-and-forget dispatch with bounded retry. Failures are logged and
/// never reach the issuance caller; the OTP row exists regardless.
pub fn dispatch(notifier: Arc<dyn Notifier>, identifier: String, code: String, purpose: OtpPurpose) {
    tokio::spawn(async move {
        for attempt in 1..=DISPATCH_ATTEMPTS {
            match notifier.send(&identifier, &code, purpose).await {
                Ok(()) => return,
                Err(err) => {
                    tracing::warn!(
                        to = %identifier,
                        attempt,
                        error = %err,
                        "otp dispatch failed"
                    );
                }
            }
            if attempt < DISPATCH_ATTEMPTS {
                tokio::time::sleep(DISPATCH_BACKOFF).await;
            }
        }
        tracing::error!(to = %identifier, "otp dispatch gave up");
    });
}
