//! Common imports for front ends.

pub use crate::api::{ClientCredentials, DebridApi, HttpDebridApi};
pub use crate::auth::{
    AuthError, AuthState, ControllerSettings, DeviceCodeSession, FailureReason, FileTokenStore,
    SessionController, StateEvent, Subscription, Token, TokenStore,
};
pub use crate::config::UnchainedConfig;
pub use crate::error::{Result, UnchainedError};
pub use crate::user::User;
