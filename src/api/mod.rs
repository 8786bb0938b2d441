//! Debrid service API surface used by the session controller.

pub mod http;

pub use http::HttpDebridApi;

use async_trait::async_trait;

use crate::auth::{AuthError, DeviceCodePoll, DeviceCodeSession, Token};
use crate::user::User;

/// Open client credentials shared by every installation of the app.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Remote operations needed by the authentication flow.
#[async_trait]
pub trait DebridApi: Send + Sync {
    /// Ask the service for a new device code.
    async fn request_device_code(&self) -> Result<DeviceCodeSession, AuthError>;

    /// Poll once for the user's decision on `session`.
    async fn poll_device_code(
        &self,
        session: &DeviceCodeSession,
    ) -> Result<DeviceCodePoll, AuthError>;

    /// Exchange the refresh token of an open token for a new pair.
    async fn refresh_token(&self, token: &Token) -> Result<Token, AuthError>;

    /// Fetch the profile of the token's owner.
    async fn fetch_user(&self, token: &Token) -> Result<User, AuthError>;
}
