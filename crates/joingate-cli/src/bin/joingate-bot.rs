// ============================================================================
// joingate-bot — Telegram verification bot daemon
// ============================================================================
// Reads configuration from the environment (and .env), opens the status
// store, and long-polls Telegram until interrupted.
// ============================================================================

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use joingate_core::{
    GateBot, GateConfig, MembershipChecker, StatusStore, TelegramClient, VerificationEngine,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("joingate_bot=info".parse()?)
                .add_directive("joingate_core=info".parse()?),
        )
        .init();

    info!("Starting JoinGate bot");

    let config = GateConfig::from_env()?;
    let store = Arc::new(StatusStore::open(config.db_path.as_deref())?);
    let client = Arc::new(TelegramClient::new(config.bot_token.clone()));

    // A rejected token would otherwise surface as failed verifications
    let me = client
        .get_me()
        .await
        .context("Telegram rejected the bot token (check TELEGRAM_BOT_TOKEN)")?;
    info!(
        "Authenticated as @{} ({})",
        me.username.as_deref().unwrap_or("unknown"),
        me.id
    );

    let checker = MembershipChecker::with_timeout(client.clone(), config.oracle_timeout);
    let engine = Arc::new(VerificationEngine::new(store, checker, config.groups.clone()));
    let bot = Arc::new(GateBot::new(client, engine, config.poll_timeout));

    tokio::select! {
        result = bot.run() => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
            Ok(())
        }
    }
}
