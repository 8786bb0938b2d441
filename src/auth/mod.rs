//! Authentication session: state machine, device-code flow and token storage.

pub mod controller;
pub mod device_code;
pub mod error;
pub mod event;
pub mod state;
pub mod store;
pub mod subscription;
pub mod token;

pub use controller::{ControllerSettings, SessionController};
pub use device_code::{DeviceCodePoll, DeviceCodeSession};
pub use error::AuthError;
pub use event::StateEvent;
pub use state::{AuthEvent, AuthState, FailureReason};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore, TokenStoreConfig};
pub use subscription::Subscription;
pub use token::{Token, TokenKind};
