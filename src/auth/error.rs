use thiserror::Error;

use super::state::FailureReason;
use crate::error::UnchainedError;

/// Normalized authentication errors.
///
/// `Clone` so that a single refresh outcome can be handed to every caller
/// waiting on the same in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("Empty response body")]
    EmptyBody,
    #[error("Unexpected response shape: {0}")]
    ApiConversion(String),
    #[error("Device code expired")]
    ExpiredCode,
    #[error("Access denied")]
    Denied,
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("Token cannot be refreshed")]
    NotRefreshable,
    #[error("Invalid transition: {event} while in {from}")]
    InvalidTransition { from: String, event: String },
    #[error("Operation cancelled by a newer login")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AuthError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Whether the remote service rejected the credentials themselves.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api { status: 401 | 403, .. })
    }

    /// Reason carried into `WaitingUserAction` when this error ends a flow.
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Network(_) => FailureReason::Network,
            Self::Api { .. } if self.is_unauthorized() => FailureReason::InvalidToken,
            Self::Api { .. } => FailureReason::Api,
            Self::EmptyBody => FailureReason::EmptyBody,
            Self::ApiConversion(_) => FailureReason::ApiConversion,
            Self::ExpiredCode => FailureReason::ExpiredCode,
            Self::Denied => FailureReason::Denied,
            Self::NotLoggedIn => FailureReason::MissingCredentials,
            Self::NotRefreshable => FailureReason::InvalidToken,
            Self::Io(_) | Self::Serialization(_) => FailureReason::Storage,
            Self::InvalidTransition { .. } | Self::Cancelled => FailureReason::Api,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::ApiConversion(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::ApiConversion(error.to_string())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<AuthError> for UnchainedError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Network(message) => UnchainedError::Network(message),
            AuthError::Io(message) => UnchainedError::Storage(message),
            other => UnchainedError::Authentication(other),
        }
    }
}
