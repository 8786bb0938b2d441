use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::error::AuthError;

/// Where a token came from.
///
/// Open tokens are issued by the device flow and can be refreshed by this
/// client. Private tokens are pasted by the user and are never refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TokenKind {
    Open,
    Private,
}

/// Access token payload stored in a token store.
///
/// # Example
/// ```
/// use unchained::auth::{Token, TokenKind};
///
/// let token = Token::private("ABCDEF123456");
/// assert_eq!(token.kind, TokenKind::Private);
/// assert!(!token.is_refreshable());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub kind: TokenKind,
}

impl Token {
    /// Open token as returned by the token endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ApiConversion`] when `expires_in_secs` does not
    /// describe a representable point in time.
    pub fn open(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: Option<i64>,
    ) -> Result<Self, AuthError> {
        let now = Utc::now();
        let expires_at = expires_in_secs
            .map(|secs| expiry_after(now, secs))
            .transpose()?;
        Ok(Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at,
            last_refresh: Some(now),
            kind: TokenKind::Open,
        })
    }

    /// User-supplied token. Has no expiry known to this client.
    pub fn private(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            last_refresh: None,
            kind: TokenKind::Private,
        }
    }

    pub fn is_private(&self) -> bool {
        self.kind == TokenKind::Private
    }

    pub fn is_refreshable(&self) -> bool {
        self.kind == TokenKind::Open
            && self
                .refresh_token
                .as_deref()
                .is_some_and(|refresh| !refresh.is_empty())
    }

    /// True when the token expires within `margin` of `now`.
    ///
    /// Tokens without an expiry never expire.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at - now <= margin)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_within(Duration::zero(), now)
    }
}

/// `now` plus `secs` seconds, rejecting values chrono cannot represent.
pub(crate) fn expiry_after(now: DateTime<Utc>, secs: i64) -> Result<DateTime<Utc>, AuthError> {
    Duration::try_seconds(secs)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| AuthError::ApiConversion(format!("expires_in out of range: {secs}")))
}
