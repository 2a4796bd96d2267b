/// Telegram backend
///
/// Uses the Bot API through teloxide. There is no pairing step: the session counts
/// as connected once `get_me` succeeds. Telegram has no "list my groups" call, so
/// groups are learned from updates and from the configured chat ids.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use teloxide::{
    prelude::*,
    types::{InputFile, Me, ParseMode},
    utils::{command::BotCommands, markdown},
};
use tokio::time::sleep;

use super::{GroupInfo, Messenger, StatusReport};
use crate::handlers::{
    handle_help_command, handle_membership_update, handle_message, handle_start_command,
    handle_status_command, GroupRegistry,
};
use crate::session::{ConnectedUser, ConnectionState, SessionMonitor};

/// Bot commands that users can use
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Comandos disponibles:")]
pub enum Command {
    #[command(description = "presentación")]
    Start,
    #[command(description = "muestra la ayuda")]
    Help,
    #[command(description = "estado del envío automático")]
    Status,
}

pub struct TelegramMessenger {
    bot: Bot,
    chat_ids: Vec<i64>,
    registry: Arc<GroupRegistry>,
}

impl TelegramMessenger {
    pub fn new(token: &str, chat_ids: Vec<i64>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120)) // uploads can be slow
            .connect_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            bot: Bot::with_client(token, client),
            chat_ids,
            registry: Arc::new(GroupRegistry::new()),
        })
    }

    fn chat_id(group: &GroupInfo) -> Result<ChatId> {
        group
            .id
            .parse::<i64>()
            .map(ChatId)
            .with_context(|| format!("Invalid Telegram chat id '{}'", group.id))
    }

    /// Look up titles of the configured chats
    async fn resolve_configured_chats(&self) {
        for id in &self.chat_ids {
            match self.bot.get_chat(ChatId(*id)).await {
                Ok(chat) => match chat.title() {
                    Some(title) => self.registry.remember(*id, title).await,
                    None => log::warn!("Chat {} has no title, ignoring", id),
                },
                Err(e) => log::warn!("Could not look up chat {}: {}", id, e),
            }
        }
    }

    async fn connect(&self, monitor: &SessionMonitor) -> Result<Me> {
        let me = retry_get_me(&self.bot)
            .await
            .context("Failed to connect to Telegram API after multiple retries")?;
        log::info!("Bot started: @{}", me.username());

        monitor
            .transition(ConnectionState::Connected {
                user: ConnectedUser::new(me.username().to_string(), me.id.0.to_string()),
            })
            .await;
        Ok(me)
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn joined_groups(&self) -> Result<Vec<GroupInfo>> {
        Ok(self.registry.groups().await)
    }

    async fn send_video(&self, group: &GroupInfo, video: &Path, caption: &str) -> Result<()> {
        self.bot
            .send_video(Self::chat_id(group)?, InputFile::file(video.to_path_buf()))
            .caption(markdown_caption(caption))
            .parse_mode(ParseMode::MarkdownV2)
            .await
            .with_context(|| format!("Failed to send video to {}", group.subject))?;
        Ok(())
    }

    async fn send_text(&self, group: &GroupInfo, text: &str) -> Result<()> {
        self.bot
            .send_message(Self::chat_id(group)?, text.to_string())
            .await
            .with_context(|| format!("Failed to send message to {}", group.subject))?;
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        anyhow::bail!("logout is not supported by the Telegram backend")
    }

    async fn restart(&self) -> Result<()> {
        retry_get_me(&self.bot).await?;
        Ok(())
    }

    async fn drive(&self, monitor: Arc<SessionMonitor>, status: Arc<dyn StatusReport>) -> Result<()> {
        let me = self.connect(&monitor).await?;
        self.resolve_configured_chats().await;

        let handler = dptree::entry()
            .branch(
                Update::filter_message()
                    .filter_command::<Command>()
                    .endpoint(
                        |bot: Bot, msg: Message, cmd: Command, registry: Arc<GroupRegistry>, status: Arc<dyn StatusReport>| async move {
                            registry.observe(&msg).await;
                            match cmd {
                                Command::Start => handle_start_command(bot, msg).await,
                                Command::Help => handle_help_command(bot, msg).await,
                                Command::Status => handle_status_command(bot, msg, status).await,
                            }
                        },
                    ),
            )
            .branch(Update::filter_message().endpoint(handle_message))
            .branch(Update::filter_my_chat_member().endpoint(handle_membership_update));

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![self.registry.clone(), status, me])
            .build();

        log::info!("Telegram dispatcher running");
        dispatcher.dispatch().await;

        monitor.transition(ConnectionState::Disconnected).await;
        Ok(())
    }
}

/// Escape a caption for MarkdownV2, keeping paired `*` as bold markers.
/// An unpaired `*` makes the whole caption literal.
fn markdown_caption(caption: &str) -> String {
    let parts: Vec<&str> = caption.split('*').collect();
    if parts.len() % 2 == 0 {
        return markdown::escape(caption);
    }
    parts
        .iter()
        .map(|part| markdown::escape(part))
        .collect::<Vec<_>>()
        .join("*")
}

/// Retry getting bot info with exponential backoff
async fn retry_get_me(bot: &Bot) -> Result<Me> {
    let max_retries = 5;
    let mut delay = Duration::from_secs(2);

    log::info!("Attempting to connect to Telegram API...");

    for attempt in 1..=max_retries {
        match bot.get_me().await {
            Ok(me) => {
                log::info!("Successfully connected to Telegram API on attempt {}", attempt);
                return Ok(me);
            }
            Err(e) if attempt == max_retries => {
                log::error!(
                    "Failed to connect to Telegram API after {} attempts: {}",
                    max_retries,
                    e
                );
                anyhow::bail!(
                    "Failed to connect to Telegram API after {} attempts: {}",
                    max_retries,
                    e
                );
            }
            Err(e) => {
                log::warn!(
                    "Failed to connect to Telegram API (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt,
                    max_retries,
                    e,
                    delay
                );
                sleep(delay).await;
                delay *= 2; // Exponential backoff
            }
        }
    }

    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_keeps_bold_title_and_escapes_the_rest() {
        let caption = "🎬 *Rust 1.80 (beta)!*\n📺 Canal_dev\n\nNovedades - parte 2.";
        assert_eq!(
            markdown_caption(caption),
            "🎬 *Rust 1\\.80 \\(beta\\)\\!*\n📺 Canal\\_dev\n\nNovedades \\- parte 2\\."
        );
    }

    #[test]
    fn unpaired_asterisk_is_literal() {
        assert_eq!(markdown_caption("5 * 3"), "5 \\* 3");
    }
}
