//! Unchained: authentication session core for the Real-Debrid service.
//!
//! Drives the device-code login, private-token login, token refresh and
//! logout as one explicit state machine, and exposes each transition as a
//! one-shot event for front ends to render.
//!
//! # Quick Start
//!
//! ```no_run
//! use unchained::prelude::*;
//!
//! # async fn example() -> unchained::error::Result<()> {
//! let config = UnchainedConfig::load()?;
//! let controller = config.session_controller()?;
//! if controller.resume().await? == AuthState::Start {
//!     let session = controller.begin_login().await?;
//!     println!("Visit {} and enter {}", session.verification_url, session.user_code);
//! }
//! let state = controller.wait_for(|state| !state.is_in_progress()).await;
//! println!("{state}");
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod prelude;
pub mod user;

#[cfg(feature = "cli")]
pub mod cli;
