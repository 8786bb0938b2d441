//! CLI entry point for Unchained.

pub mod auth;

use clap::{Parser, Subcommand};

/// Unchained debrid client CLI
#[derive(Parser, Debug)]
#[command(name = "unchained", version, about = "Unchained: Real-Debrid session CLI")]
pub struct Cli {
    /// Token profile to use (overrides UNCHAINED_PROFILE)
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authentication management
    Auth(AuthArgs),
    /// Show the logged-in account
    User,
}

/// Arguments for the `auth` subcommand group.
#[derive(Parser, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommands,
}

/// Auth subcommands.
#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Login with a device code
    Login,
    /// Login with a private API token
    Token(TokenArgs),
    /// Show authentication status
    Status,
    /// Refresh the saved open token
    Refresh,
    /// Forget the saved token
    Logout,
}

/// Arguments for `unchained auth token`.
#[derive(Parser, Debug)]
pub struct TokenArgs {
    /// Private API token from the account page
    pub token: String,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
