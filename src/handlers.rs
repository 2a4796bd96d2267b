/// Telegram update handlers
///
/// This module handles:
/// - Learning which groups the bot belongs to
/// - The /start, /help and /status chat commands

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{ChatMemberKind, ChatMemberUpdated};
use tokio::sync::RwLock;

use crate::messenger::{GroupInfo, StatusReport};

/// Groups the bot has seen itself in, keyed by chat id
pub struct GroupRegistry {
    groups: Arc<RwLock<HashMap<i64, String>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self {
            groups: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn remember(&self, chat_id: i64, title: impl Into<String>) {
        let title = title.into();
        let mut groups = self.groups.write().await;
        if groups.get(&chat_id) != Some(&title) {
            log::info!("Tracking group '{}' ({})", title, chat_id);
            groups.insert(chat_id, title);
        }
    }

    pub async fn forget(&self, chat_id: i64) {
        if let Some(title) = self.groups.write().await.remove(&chat_id) {
            log::info!("No longer in group '{}' ({})", title, chat_id);
        }
    }

    /// Record the chat of an incoming message when it is a titled group
    pub async fn observe(&self, msg: &Message) {
        if msg.chat.is_group() || msg.chat.is_supergroup() {
            if let Some(title) = msg.chat.title() {
                self.remember(msg.chat.id.0, title).await;
            }
        }
    }

    pub async fn groups(&self) -> Vec<GroupInfo> {
        let groups = self.groups.read().await;
        groups
            .iter()
            .map(|(id, title)| GroupInfo {
                id: id.to_string(),
                subject: title.clone(),
            })
            .collect()
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Any message: only used to learn group membership
pub async fn handle_message(msg: Message, registry: Arc<GroupRegistry>) -> Result<()> {
    registry.observe(&msg).await;
    Ok(())
}

/// The bot was added to or removed from a chat
pub async fn handle_membership_update(
    update: ChatMemberUpdated,
    registry: Arc<GroupRegistry>,
) -> Result<()> {
    let chat_id = update.chat.id.0;
    match update.new_chat_member.kind {
        ChatMemberKind::Left | ChatMemberKind::Banned(_) => registry.forget(chat_id).await,
        _ => {
            if let Some(title) = update.chat.title() {
                registry.remember(chat_id, title).await;
            }
        }
    }
    Ok(())
}

/// Handle the /start command
pub async fn handle_start_command(bot: Bot, msg: Message) -> Result<()> {
    let welcome_message = "👋 Hola! Comparto shorts de YouTube en este grupo cada cierto tiempo.\n\n\
        Usa /status para ver cuándo llega el próximo video.";

    bot.send_message(msg.chat.id, welcome_message).await?;

    Ok(())
}

/// Handle the /help command
pub async fn handle_help_command(bot: Bot, msg: Message) -> Result<()> {
    let help_message = "ℹ️ Ayuda\n\n\
        Comandos:\n\
        /start - Presentación\n\
        /help - Muestra esta ayuda\n\
        /status - Estado del envío automático\n\n\
        Los videos se eligen rotando temas y evitando repetir canales recientes.";

    bot.send_message(msg.chat.id, help_message).await?;

    Ok(())
}

/// Handle the /status command
pub async fn handle_status_command(
    bot: Bot,
    msg: Message,
    status: Arc<dyn StatusReport>,
) -> Result<()> {
    let summary = status.summary().await;
    bot.send_message(msg.chat.id, summary).await?;

    Ok(())
}
