//! Authentication states, events and the transition table.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Why a flow stopped and needs the user to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureReason {
    Network,
    Api,
    EmptyBody,
    ApiConversion,
    ExpiredCode,
    Denied,
    MissingCredentials,
    InvalidToken,
    Storage,
}

impl FailureReason {
    /// Short notification text naming the error class.
    pub fn notice(self) -> &'static str {
        match self {
            Self::Network => "Network error, check your connection",
            Self::Api => "The service rejected the request",
            Self::EmptyBody => "The service sent an empty response",
            Self::ApiConversion => "The service sent an unexpected response",
            Self::ExpiredCode => "The login code expired, start a new login",
            Self::Denied => "Authorization was denied",
            Self::MissingCredentials => "No credentials saved, please log in",
            Self::InvalidToken => "The saved token is not valid anymore",
            Self::Storage => "Could not read or write the saved credentials",
        }
    }

    /// Whether a persisted token should survive this failure.
    ///
    /// Only transient connectivity problems keep it, so a later resume can
    /// retry without a new login.
    pub fn keeps_stored_token(self) -> bool {
        self == Self::Network
    }
}

/// Current position in the authentication flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthState {
    Start,
    WaitingToken,
    WaitingUserConfirmation,
    CheckCredentials,
    WaitingUserAction(FailureReason),
    StartNewLogin,
    RefreshingOpenToken,
    AuthenticatedOpenToken,
    AuthenticatedPrivateToken,
}

impl AuthState {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            self,
            Self::AuthenticatedOpenToken | Self::AuthenticatedPrivateToken
        )
    }

    /// States with a request or background task in progress.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::WaitingToken
                | Self::WaitingUserConfirmation
                | Self::CheckCredentials
                | Self::RefreshingOpenToken
                | Self::StartNewLogin
        )
    }

    /// Entering this state drops the cached token and user.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, Self::StartNewLogin | Self::WaitingUserAction(_))
    }

    /// Apply `event`, returning the next state or `None` when the pair is
    /// not part of the table.
    pub fn transition(&self, event: &AuthEvent) -> Option<AuthState> {
        use AuthEvent as E;
        use AuthState as S;

        let next = match (self, event) {
            (_, E::NewLogin) => S::StartNewLogin,
            (S::StartNewLogin, E::LoginReset) => S::Start,
            (S::Start, E::BeginLogin) => S::WaitingToken,
            (S::Start, E::SubmitPrivateToken | E::ResumeSession) => S::CheckCredentials,
            (S::WaitingUserAction(reason), E::ResumeSession) if reason.keeps_stored_token() => {
                S::CheckCredentials
            }
            (S::WaitingToken, E::DeviceCodeReceived) => S::WaitingUserConfirmation,
            (S::WaitingUserConfirmation, E::UserApproved) => S::CheckCredentials,
            (S::CheckCredentials, E::OpenTokenValid) => S::AuthenticatedOpenToken,
            (S::CheckCredentials, E::PrivateTokenValid) => S::AuthenticatedPrivateToken,
            (S::AuthenticatedOpenToken, E::TokenExpiring) => S::RefreshingOpenToken,
            (S::RefreshingOpenToken, E::RefreshSucceeded) => S::AuthenticatedOpenToken,
            (
                S::WaitingToken
                | S::WaitingUserConfirmation
                | S::CheckCredentials
                | S::RefreshingOpenToken,
                E::Failed(reason),
            ) => S::WaitingUserAction(*reason),
            _ => return None,
        };
        Some(next)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitingUserAction(reason) => write!(f, "{}({reason})", self.name()),
            other => f.write_str(other.name()),
        }
    }
}

/// Inputs that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum AuthEvent {
    BeginLogin,
    DeviceCodeReceived,
    UserApproved,
    SubmitPrivateToken,
    ResumeSession,
    OpenTokenValid,
    PrivateTokenValid,
    TokenExpiring,
    RefreshSucceeded,
    Failed(FailureReason),
    NewLogin,
    LoginReset,
}

impl fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &'static str = self.into();
        match self {
            Self::Failed(reason) => write!(f, "{name}({reason})"),
            _ => f.write_str(name),
        }
    }
}
