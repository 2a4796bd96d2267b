/// Video download module
///
/// Fetches a short as MP4 by shelling out to an external downloader. Tools are
/// tried in order until one produces a file that looks like a real video.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::config::DownloadSettings;

/// Format selector handed to yt-dlp compatible tools
const FORMAT: &str = "best[height<=720][ext=mp4]";

#[async_trait]
pub trait VideoDownloader: Send + Sync {
    /// Download `url` to `dest`. On success `dest` holds a validated MP4.
    async fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Runs yt-dlp style command line tools
pub struct ToolDownloader {
    tools: Vec<String>,
    timeout: Duration,
    min_bytes: u64,
}

impl ToolDownloader {
    pub fn new(settings: &DownloadSettings) -> Self {
        Self {
            tools: settings.tools.clone(),
            timeout: settings.timeout,
            min_bytes: settings.min_bytes,
        }
    }

    async fn run_tool(&self, tool: &str, url: &str, dest: &Path) -> Result<()> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(tool)
                .arg("-f")
                .arg(FORMAT)
                .arg("--no-playlist")
                .arg("-o")
                .arg(dest)
                .arg(url)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .with_context(|| format!("{} timed out after {:?}", tool, self.timeout))?
        .with_context(|| format!("Failed to start {}", tool))?;

        log::debug!("{} stdout: {}", tool, String::from_utf8_lossy(&output.stdout));

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let preview = stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or("no output");
            bail!("{} exited with {}: {}", tool, output.status, preview);
        }
        Ok(())
    }
}

#[async_trait]
impl VideoDownloader for ToolDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let mut last_error = None;

        for tool in &self.tools {
            log::info!("Downloading {} with {}", url, tool);
            let attempt = match self.run_tool(tool, url, dest).await {
                Ok(()) => is_valid_mp4(dest, self.min_bytes).await,
                Err(e) => Err(e),
            };

            match attempt {
                Ok(()) => {
                    log::info!("Download complete: {}", dest.display());
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("{} could not fetch {}: {:#}", tool, url, e);
                    let _ = tokio::fs::remove_file(dest).await;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no download tools configured")))
    }
}

/// Check size and the ISO base media `ftyp` box
pub async fn is_valid_mp4(path: &Path, min_bytes: u64) -> Result<()> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Downloaded file missing: {}", path.display()))?;
    if meta.len() < min_bytes {
        bail!(
            "Downloaded file too small ({} bytes, need {})",
            meta.len(),
            min_bytes
        );
    }

    let mut header = [0u8; 12];
    let mut file = tokio::fs::File::open(path).await?;
    file.read_exact(&mut header)
        .await
        .context("Failed to read file header")?;
    if &header[4..8] != b"ftyp" {
        bail!("Downloaded file is not an MP4 container");
    }
    Ok(())
}

/// Remove leftovers from an earlier run. Returns how many files were deleted.
pub async fn purge_scratch_dir(dir: &Path) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).context("Failed to read download dir"),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Could not remove {}: {}", entry.path().display(), e),
            }
        }
    }
    if removed > 0 {
        log::info!("Removed {} stale files from {}", removed, dir.display());
    }
    Ok(removed)
}
