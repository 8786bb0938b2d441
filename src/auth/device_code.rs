use std::time::Duration;

use chrono::{DateTime, Utc};

use super::error::AuthError;
use super::token::expiry_after;
use super::Token;

/// Added to the poll interval for every `slow_down` answer.
pub const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Device-code session details issued by the debrid service.
///
/// # Example
/// ```
/// use unchained::auth::DeviceCodeSession;
///
/// let session = DeviceCodeSession::new("device-123", "ABCD1234", "https://real-debrid.com/device", 5, 60)?;
/// assert_eq!(session.interval().as_secs(), 5);
/// assert!(!session.is_expired(chrono::Utc::now()));
/// # Ok::<(), unchained::auth::AuthError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCodeSession {
    pub device_code: String,
    pub user_code: String,
    pub verification_url: String,
    pub direct_verification_url: Option<String>,
    pub interval_secs: u64,
    pub expires_in_secs: u64,
    pub expires_at: DateTime<Utc>,
}

impl DeviceCodeSession {
    /// # Errors
    ///
    /// Returns [`AuthError::ApiConversion`] when `expires_in_secs` is too
    /// large to describe a point in time.
    pub fn new(
        device_code: impl Into<String>,
        user_code: impl Into<String>,
        verification_url: impl Into<String>,
        interval_secs: u64,
        expires_in_secs: u64,
    ) -> Result<Self, AuthError> {
        let secs = i64::try_from(expires_in_secs).map_err(|_| {
            AuthError::ApiConversion(format!("expires_in out of range: {expires_in_secs}"))
        })?;
        Ok(Self {
            device_code: device_code.into(),
            user_code: user_code.into(),
            verification_url: verification_url.into(),
            direct_verification_url: None,
            interval_secs,
            expires_in_secs,
            expires_at: expiry_after(Utc::now(), secs)?,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.expires_in_secs)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Polling outcome for a device-code session.
#[derive(Debug, Clone)]
pub enum DeviceCodePoll {
    Pending,
    /// The service asked for slower polling; `interval_secs` is the least it
    /// accepts.
    SlowDown { interval_secs: u64 },
    Authorized { token: Token },
    AccessDenied,
    Expired,
}
