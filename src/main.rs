/// Shorts Drop Bot
///
/// Posts short videos to a WhatsApp or Telegram group on a fixed interval.
///
/// The bot:
/// - Rotates through configured search topics
/// - Avoids recently sent videos and channels
/// - Captions videos with Gemini, falling back to a template
/// - Serves a dashboard for pairing and manual sends

use anyhow::Result;
use shorts_drop_bot::{bot, config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    pretty_env_logger::init();

    log::info!("Starting Shorts Drop Bot...");

    // Load configuration from environment
    let cfg = config::Config::from_env()?;

    // Validate configuration and prepare directories
    cfg.validate().await?;

    // Run the bot
    bot::run_bot(cfg).await?;

    Ok(())
}
