/// Messenger module
///
/// The bot posts through a [`Messenger`]. Two backends exist: a WhatsApp Web HTTP
/// bridge and the Telegram Bot API. Each backend owns a long-running driver that
/// keeps the shared [`SessionMonitor`] up to date.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::session::SessionMonitor;

pub mod bridge;
pub mod telegram;

/// A chat group the account is a member of
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupInfo {
    pub id: String,
    pub subject: String,
}

/// Human readable bot status, answered by chat commands
#[async_trait]
pub trait StatusReport: Send + Sync {
    async fn summary(&self) -> String;
}

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Short backend name for logs and the dashboard
    fn name(&self) -> &'static str;

    async fn joined_groups(&self) -> Result<Vec<GroupInfo>>;

    async fn send_video(&self, group: &GroupInfo, video: &Path, caption: &str) -> Result<()>;

    async fn send_text(&self, group: &GroupInfo, text: &str) -> Result<()>;

    /// End the session; a new pairing is needed afterwards
    async fn logout(&self) -> Result<()>;

    /// Restart the session, producing a new pairing code when unpaired
    async fn restart(&self) -> Result<()>;

    /// Run until the process stops, reporting connection changes to `monitor`
    async fn drive(&self, monitor: Arc<SessionMonitor>, status: Arc<dyn StatusReport>) -> Result<()>;
}

/// Case-insensitive substring match on the group subject.
///
/// Several matches resolve to the one with the smallest id so repeated lookups
/// agree with each other.
pub fn find_target_group(groups: &[GroupInfo], name: &str) -> Option<GroupInfo> {
    let needle = name.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    let mut matches: Vec<&GroupInfo> = groups
        .iter()
        .filter(|g| g.subject.to_lowercase().contains(&needle))
        .collect();
    matches.sort_by(|a, b| a.id.cmp(&b.id));

    if matches.len() > 1 {
        log::warn!(
            "{} groups match '{}', using '{}' ({})",
            matches.len(),
            name,
            matches[0].subject,
            matches[0].id
        );
    }
    matches.first().map(|g| (*g).clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: &str, subject: &str) -> GroupInfo {
        GroupInfo {
            id: id.into(),
            subject: subject.into(),
        }
    }

    #[test]
    fn matches_case_insensitive_substring() {
        let groups = vec![group("1@g.us", "Familia"), group("2@g.us", "Club de Devs 🚀")];
        assert_eq!(
            find_target_group(&groups, "club de DEVS").map(|g| g.id),
            Some("2@g.us".to_string())
        );
        assert!(find_target_group(&groups, "trabajo").is_none());
        assert!(find_target_group(&groups, "  ").is_none());
    }

    #[test]
    fn several_matches_pick_smallest_id() {
        let groups = vec![group("9@g.us", "Devs Madrid"), group("3@g.us", "Devs Sevilla")];
        assert_eq!(
            find_target_group(&groups, "devs").map(|g| g.id),
            Some("3@g.us".to_string())
        );
    }
}
