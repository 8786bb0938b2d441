//! Unchained CLI binary entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;
use unchained::cli::{auth, AuthCommands, Cli, Commands};
use unchained::config::UnchainedConfig;

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let config = match UnchainedConfig::load() {
        Ok(config) => match cli.profile {
            Some(profile) => config.with_profile(profile),
            None => config,
        },
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Commands::Auth(auth_args) => match auth_args.command {
            AuthCommands::Login => auth::handle_login(&config).await,
            AuthCommands::Token(args) => auth::handle_token(&config, &args.token).await,
            AuthCommands::Status => auth::handle_status(&config).await,
            AuthCommands::Refresh => auth::handle_refresh(&config).await,
            AuthCommands::Logout => auth::handle_logout(&config).await,
        },
        Commands::User => auth::handle_user(&config).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    // RUST_LOG takes precedence; stay quiet otherwise so prompts stay readable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
