//! Error types for Unchained.

use thiserror::Error;

use crate::auth::AuthError;

/// Primary error type for crate-level operations.
#[derive(Error, Debug)]
pub enum UnchainedError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Authentication(AuthError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse classification used by front ends to pick a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Authentication,
    Network,
    Api,
    Storage,
    Serialization,
}

impl UnchainedError {
    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Network(_) => ErrorCategory::Network,
            Self::Storage(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Authentication(err) => match err {
                AuthError::Api { .. } if !err.is_unauthorized() => ErrorCategory::Api,
                AuthError::EmptyBody | AuthError::ApiConversion(_) => ErrorCategory::Api,
                _ => ErrorCategory::Authentication,
            },
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Authentication(AuthError::Api { status, .. }) => *status >= 500,
            _ => false,
        }
    }
}

impl From<toml::de::Error> for UnchainedError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, UnchainedError>;
