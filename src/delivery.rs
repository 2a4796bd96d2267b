/// Delivery module
///
/// Turns a selected candidate into a posted video: find the group, download to a
/// scratch file, caption it, send it. The scratch file is removed whatever happens.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::caption::{caption_for, CaptionWriter};
use crate::downloader::{is_valid_mp4, VideoDownloader};
use crate::error::CycleError;
use crate::messenger::{find_target_group, GroupInfo, Messenger};
use crate::youtube::VideoCandidate;

#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub candidate: VideoCandidate,
    pub group: GroupInfo,
    pub caption: String,
}

pub struct Deliverer {
    messenger: Arc<dyn Messenger>,
    downloader: Arc<dyn VideoDownloader>,
    captioner: Option<Arc<dyn CaptionWriter>>,
    target_group_name: String,
    scratch_dir: PathBuf,
    min_bytes: u64,
    caption_timeout: Duration,
}

impl Deliverer {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        downloader: Arc<dyn VideoDownloader>,
        captioner: Option<Arc<dyn CaptionWriter>>,
        target_group_name: impl Into<String>,
        scratch_dir: impl Into<PathBuf>,
        min_bytes: u64,
        caption_timeout: Duration,
    ) -> Self {
        Self {
            messenger,
            downloader,
            captioner,
            target_group_name: target_group_name.into(),
            scratch_dir: scratch_dir.into(),
            min_bytes,
            caption_timeout,
        }
    }

    pub fn messenger(&self) -> &Arc<dyn Messenger> {
        &self.messenger
    }

    pub fn target_group_name(&self) -> &str {
        &self.target_group_name
    }

    pub async fn target_group(&self) -> Result<GroupInfo, CycleError> {
        let groups = self
            .messenger
            .joined_groups()
            .await
            .map_err(|e| CycleError::Delivery(format!("could not list groups: {:#}", e)))?;

        find_target_group(&groups, &self.target_group_name)
            .ok_or_else(|| CycleError::GroupNotFound(self.target_group_name.clone()))
    }

    pub async fn deliver(&self, candidate: &VideoCandidate) -> Result<DeliveryReport, CycleError> {
        let group = self.target_group().await?;
        log::info!("Delivering '{}' to group '{}'", candidate.title, group.subject);

        let scratch = self.scratch_path(candidate);
        let result = self.download_and_send(candidate, &group, &scratch).await;

        match tokio::fs::remove_file(&scratch).await {
            Ok(()) => log::debug!("Removed {}", scratch.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not remove {}: {}", scratch.display(), e),
        }

        let caption = result?;
        log::info!("Video sent: '{}' to {}", candidate.title, group.subject);
        Ok(DeliveryReport {
            candidate: candidate.clone(),
            group,
            caption,
        })
    }

    async fn download_and_send(
        &self,
        candidate: &VideoCandidate,
        group: &GroupInfo,
        scratch: &Path,
    ) -> Result<String, CycleError> {
        self.downloader
            .download(&candidate.url, scratch)
            .await
            .map_err(|e| CycleError::Download(format!("{:#}", e)))?;
        is_valid_mp4(scratch, self.min_bytes)
            .await
            .map_err(|e| CycleError::Download(format!("{:#}", e)))?;

        let caption = caption_for(self.captioner.as_deref(), candidate, self.caption_timeout).await;

        self.messenger
            .send_video(group, scratch, &caption)
            .await
            .map_err(|e| CycleError::Delivery(format!("{:#}", e)))?;
        Ok(caption)
    }

    /// Best-effort plain text notice to the group after a failed cycle
    pub async fn notify_failure(&self, message: &str) {
        let group = match self.target_group().await {
            Ok(group) => group,
            Err(e) => {
                log::warn!("Cannot post failure notice: {}", e);
                return;
            }
        };
        let text = format!("❌ Error enviando video: {}", message);
        if let Err(e) = self.messenger.send_text(&group, &text).await {
            log::warn!("Failure notice could not be sent: {:#}", e);
        }
    }

    fn scratch_path(&self, candidate: &VideoCandidate) -> PathBuf {
        let safe: String = candidate
            .id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let name = if safe.is_empty() { "video".to_string() } else { safe };
        self.scratch_dir.join(format!("{}.mp4", name))
    }
}
