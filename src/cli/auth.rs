//! CLI auth command handlers for login, status, refresh and logout.

use std::io::BufRead;

use crate::auth::{AuthState, SessionController};
use crate::config::UnchainedConfig;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Handle `unchained auth login`.
pub async fn handle_login(config: &UnchainedConfig) -> CliResult {
    let controller = config.session_controller()?;
    let progress = controller.observe(|event| {
        if let Some(state) = event.take() {
            tracing::debug!(%state, "login progress");
        }
    });

    let session = controller.begin_login().await?;
    println!("🔗 Visit: {}", session.verification_url);
    if let Some(direct) = &session.direct_verification_url {
        println!("   or open: {direct}");
    }
    println!("📋 Enter code: {}", session.user_code);
    println!("⏳ Waiting for authorization (press Enter once approved)...");

    // A blocked stdin read must not keep the runtime alive, so the thread
    // is detached and only nudges the poller.
    let nudge = controller.clone();
    std::thread::spawn(move || {
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_ok() {
            nudge.confirm_code();
        }
    });

    let settled = controller.wait_for(|state| !state.is_in_progress()).await;
    progress.release();
    report_outcome(&controller, settled).await
}

/// Handle `unchained auth token <token>`.
pub async fn handle_token(config: &UnchainedConfig, token: &str) -> CliResult {
    let controller = config.session_controller()?;
    let settled = controller.submit_private_token(token).await?;
    report_outcome(&controller, settled).await
}

/// Handle `unchained auth status`.
pub async fn handle_status(config: &UnchainedConfig) -> CliResult {
    let controller = config.session_controller()?;

    println!("🔐 Authentication Status\n");
    println!("  Profile: {}", config.profile);

    match controller.resume().await? {
        AuthState::Start => println!("  Session: ❌ Not logged in"),
        state if state.is_authenticated() => {
            let kind = if controller.is_token_private()? {
                "private token"
            } else {
                "open token"
            };
            println!("  Session: ✅ Logged in ({kind})");
            if let Some(user) = controller.cached_user() {
                println!("  Account: {} <{}>", user.username, user.email);
            }
        }
        AuthState::WaitingUserAction(reason) => {
            println!("  Session: ⚠️  {}", reason.notice());
        }
        other => println!("  Session: {other}"),
    }
    Ok(())
}

/// Handle `unchained auth refresh`.
pub async fn handle_refresh(config: &UnchainedConfig) -> CliResult {
    let controller = config.session_controller()?;
    match controller.resume().await? {
        AuthState::AuthenticatedOpenToken => {
            let token = controller.refresh_token().await?;
            match token.expires_at {
                Some(expires) => println!(
                    "✅ Token refreshed (expires {})",
                    expires.format("%Y-%m-%d %H:%M")
                ),
                None => println!("✅ Token refreshed"),
            }
        }
        AuthState::AuthenticatedPrivateToken => {
            println!("ℹ️  Private tokens do not expire, nothing to refresh");
        }
        AuthState::WaitingUserAction(reason) => {
            eprintln!("❌ {}", reason.notice());
            std::process::exit(1);
        }
        _ => {
            eprintln!("❌ Not logged in. Run `unchained auth login` first.");
            std::process::exit(1);
        }
    }
    Ok(())
}

/// Handle `unchained auth logout`.
pub async fn handle_logout(config: &UnchainedConfig) -> CliResult {
    let controller = config.session_controller()?;
    controller.logout().await?;
    println!("✅ Logged out ({})", config.profile);
    Ok(())
}

/// Handle `unchained user`.
pub async fn handle_user(config: &UnchainedConfig) -> CliResult {
    let controller = config.session_controller()?;
    let state = controller.resume().await?;
    if !state.is_authenticated() {
        eprintln!("❌ Not logged in. Run `unchained auth login` first.");
        std::process::exit(1);
    }
    let user = match controller.cached_user() {
        Some(user) => user,
        None => controller.fetch_user().await?,
    };

    println!("👤 {} (id {})", user.username, user.id);
    println!("  Email:  {}", user.email);
    println!("  Points: {}", user.points);
    if user.is_premium() {
        let days = user.premium_days_left();
        match user.expiration {
            Some(until) => println!(
                "  Plan:   premium, {days} days left (until {})",
                until.format("%Y-%m-%d")
            ),
            None => println!("  Plan:   premium, {days} days left"),
        }
    } else {
        println!("  Plan:   free");
    }
    Ok(())
}

async fn report_outcome(controller: &SessionController, settled: AuthState) -> CliResult {
    match settled {
        AuthState::AuthenticatedOpenToken | AuthState::AuthenticatedPrivateToken => {
            match controller.cached_user() {
                Some(user) => println!("✅ Logged in as {}", user.username),
                None => println!("✅ Logged in"),
            }
            Ok(())
        }
        AuthState::WaitingUserAction(reason) => {
            eprintln!("❌ {}", reason.notice());
            std::process::exit(1);
        }
        other => {
            eprintln!("❌ Login stopped in state {other}");
            std::process::exit(1);
        }
    }
}
