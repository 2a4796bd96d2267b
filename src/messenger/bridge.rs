/// WhatsApp Web bridge backend
///
/// Talks to a self-hosted WhatsApp Web HTTP bridge. The bridge keeps the actual
/// protocol session; this side polls its status and maps it onto the connection
/// state machine.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{GroupInfo, Messenger, StatusReport};
use crate::session::{ConnectedUser, ConnectionState, SessionMonitor};

#[derive(Debug, Deserialize)]
struct SessionInfo {
    status: String,
    #[serde(default)]
    me: Option<SessionMe>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionMe {
    id: String,
    #[serde(default)]
    push_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QrValue {
    value: String,
}

/// Bridges serialise chat ids either as plain strings or wrapped objects
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatId {
    Plain(String),
    Wrapped {
        #[serde(rename = "_serialized")]
        serialized: String,
    },
}

impl ChatId {
    fn into_string(self) -> String {
        match self {
            ChatId::Plain(id) => id,
            ChatId::Wrapped { serialized } => serialized,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BridgeGroup {
    id: ChatId,
    #[serde(default, alias = "name")]
    subject: Option<String>,
}

/// Bridge session status reduced to what the bot cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeStatus {
    Starting,
    ScanQr,
    Working { user: ConnectedUser },
    Failed,
    Stopped,
}

impl BridgeStatus {
    fn from_session(info: SessionInfo) -> Self {
        match info.status.to_uppercase().as_str() {
            "WORKING" => {
                let (id, name) = info
                    .me
                    .map(|me| {
                        let name = me.push_name.unwrap_or_else(|| me.id.clone());
                        (me.id, name)
                    })
                    .unwrap_or_else(|| ("unknown".to_string(), "WhatsApp".to_string()));
                BridgeStatus::Working {
                    user: ConnectedUser::new(name, id),
                }
            }
            "SCAN_QR_CODE" => BridgeStatus::ScanQr,
            "STARTING" => BridgeStatus::Starting,
            "FAILED" => BridgeStatus::Failed,
            _ => BridgeStatus::Stopped,
        }
    }
}

pub struct BridgeMessenger {
    base_url: String,
    session: String,
    api_key: Option<String>,
    poll_interval: Duration,
    http_client: reqwest::Client,
}

impl BridgeMessenger {
    pub fn new(
        base_url: impl Into<String>,
        session: impl Into<String>,
        api_key: Option<String>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session: session.into(),
            api_key,
            poll_interval,
            http_client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http_client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header("X-Api-Key", key),
            None => builder,
        }
    }

    async fn send_checked(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to reach bridge for {}", what))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Bridge {} failed ({}): {}", what, status, body);
        }
        Ok(response)
    }

    pub async fn status(&self) -> Result<BridgeStatus> {
        let path = format!("/api/sessions/{}", self.session);
        let response = self
            .send_checked(self.request(reqwest::Method::GET, &path), "session status")
            .await?;
        let info: SessionInfo = response
            .json()
            .await
            .context("Failed to parse session status")?;
        Ok(BridgeStatus::from_session(info))
    }

    pub async fn pairing_code(&self) -> Result<String> {
        let path = format!("/api/{}/auth/qr", self.session);
        let response = self
            .send_checked(
                self.request(reqwest::Method::GET, &path)
                    .query(&[("format", "raw")]),
                "pairing code",
            )
            .await?;
        let qr: QrValue = response.json().await.context("Failed to parse pairing code")?;
        Ok(qr.value)
    }

    /// One poll: read the bridge status and push it into the monitor
    pub async fn sync_state(&self, monitor: &SessionMonitor) -> Result<()> {
        let next = match self.status().await? {
            BridgeStatus::Working { user } => ConnectionState::Connected { user },
            BridgeStatus::ScanQr => ConnectionState::AwaitingPairing {
                qr: self.pairing_code().await?,
            },
            BridgeStatus::Starting => ConnectionState::Reauthenticating,
            BridgeStatus::Failed => {
                log::warn!("Bridge session failed, asking for a restart");
                if let Err(e) = self.restart().await {
                    log::error!("Bridge restart failed: {:#}", e);
                }
                ConnectionState::Disconnected
            }
            BridgeStatus::Stopped => ConnectionState::Disconnected,
        };
        monitor.transition(next).await;
        Ok(())
    }
}

#[async_trait]
impl Messenger for BridgeMessenger {
    fn name(&self) -> &'static str {
        "whatsapp-bridge"
    }

    async fn joined_groups(&self) -> Result<Vec<GroupInfo>> {
        let path = format!("/api/{}/groups", self.session);
        let response = self
            .send_checked(self.request(reqwest::Method::GET, &path), "group list")
            .await?;
        let groups: Vec<BridgeGroup> = response
            .json()
            .await
            .context("Failed to parse group list")?;

        Ok(groups
            .into_iter()
            .filter_map(|g| {
                let subject = g.subject?;
                Some(GroupInfo {
                    id: g.id.into_string(),
                    subject,
                })
            })
            .collect())
    }

    async fn send_video(&self, group: &GroupInfo, video: &Path, caption: &str) -> Result<()> {
        let bytes = tokio::fs::read(video)
            .await
            .with_context(|| format!("Failed to read {}", video.display()))?;
        let file_name = video
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("video.mp4")
            .to_string();
        log::info!("Uploading {} ({} bytes) to {}", file_name, bytes.len(), group.subject);

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("video/mp4")
            .context("Invalid mime type")?;
        let form = Form::new()
            .text("session", self.session.clone())
            .text("chatId", group.id.clone())
            .text("caption", caption.to_string())
            .part("file", part);

        self.send_checked(
            self.request(reqwest::Method::POST, "/api/sendVideo")
                .multipart(form),
            "video send",
        )
        .await?;
        Ok(())
    }

    async fn send_text(&self, group: &GroupInfo, text: &str) -> Result<()> {
        self.send_checked(
            self.request(reqwest::Method::POST, "/api/sendText").json(&json!({
                "session": self.session,
                "chatId": group.id,
                "text": text,
            })),
            "text send",
        )
        .await?;
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let path = format!("/api/sessions/{}/logout", self.session);
        self.send_checked(self.request(reqwest::Method::POST, &path), "logout")
            .await?;
        log::info!("Bridge session {} logged out", self.session);
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        let path = format!("/api/sessions/{}/restart", self.session);
        self.send_checked(self.request(reqwest::Method::POST, &path), "restart")
            .await?;
        log::info!("Bridge session {} restarting", self.session);
        Ok(())
    }

    async fn drive(&self, monitor: Arc<SessionMonitor>, _status: Arc<dyn StatusReport>) -> Result<()> {
        log::info!(
            "Polling bridge {} (session '{}') every {:?}",
            self.base_url,
            self.session,
            self.poll_interval
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        let mut reachable = true;

        loop {
            interval.tick().await;
            match self.sync_state(&monitor).await {
                Ok(()) => {
                    if !reachable {
                        log::info!("Bridge reachable again");
                    }
                    reachable = true;
                }
                Err(e) => {
                    if reachable {
                        log::warn!("Bridge status poll failed: {:#}", e);
                    }
                    reachable = false;
                    monitor.transition(ConnectionState::Disconnected).await;
                }
            }
        }
    }
}
