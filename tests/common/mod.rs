// tests/common/mod.rs
//
// In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shorts_drop_bot::breaker::{CircuitBreaker, RetryPolicy};
use shorts_drop_bot::courier::{Courier, CourierOptions};
use shorts_drop_bot::delivery::Deliverer;
use shorts_drop_bot::downloader::VideoDownloader;
use shorts_drop_bot::events::EventBus;
use shorts_drop_bot::gate::IntervalGate;
use shorts_drop_bot::messenger::{GroupInfo, Messenger, StatusReport};
use shorts_drop_bot::selector::{RepeatPolicy, Selector};
use shorts_drop_bot::session::{ConnectedUser, ConnectionState, SessionMonitor};
use shorts_drop_bot::topics::{RotationPolicy, TopicRotator};
use shorts_drop_bot::youtube::{VideoCandidate, VideoSearch};

pub const GROUP_NAME: &str = "Club Dev";

pub fn candidate(id: &str, channel: &str, topic: &str) -> VideoCandidate {
    VideoCandidate {
        id: id.to_string(),
        channel_id: channel.to_string(),
        channel_title: format!("Canal {}", channel),
        title: format!("Video {}", id),
        description: format!("Descripción de {} #shorts", id),
        url: format!("https://www.youtube.com/watch?v={}", id),
        published_at: Utc::now() - ChronoDuration::hours(1),
        topic: topic.to_string(),
    }
}

/// Search results keyed by topic
#[derive(Default)]
pub struct FakeSearch {
    results: HashMap<String, Vec<VideoCandidate>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn with(mut self, topic: &str, candidates: Vec<VideoCandidate>) -> Self {
        self.results.insert(topic.to_string(), candidates);
        self
    }
}

#[async_trait]
impl VideoSearch for FakeSearch {
    async fn search(&self, topic: &str, _max_results: usize) -> Result<Vec<VideoCandidate>> {
        self.calls.lock().unwrap().push(topic.to_string());
        Ok(self.results.get(topic).cloned().unwrap_or_default())
    }
}

/// Writes a small but valid MP4 header; can be told to fail
#[derive(Default)]
pub struct FakeDownloader {
    pub failures_left: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakeDownloader {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            calls: AtomicUsize::new(0),
        }
    }
}

pub fn fake_mp4() -> Vec<u8> {
    let mut bytes = vec![0u8, 0, 0, 0x20];
    bytes.extend_from_slice(b"ftypisom");
    bytes.resize(4096, 0);
    bytes
}

#[async_trait]
impl VideoDownloader for FakeDownloader {
    async fn download(&self, _url: &str, dest: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("yt-dlp exited with 1: video unavailable");
        }
        tokio::fs::write(dest, fake_mp4()).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentVideoRecord {
    pub group_id: String,
    pub caption: String,
    pub file_existed: bool,
}

pub struct FakeMessenger {
    pub groups: Mutex<Vec<GroupInfo>>,
    pub videos: Mutex<Vec<SentVideoRecord>>,
    pub texts: Mutex<Vec<String>>,
    pub send_failures_left: AtomicUsize,
    pub send_delay: Duration,
    pub logouts: AtomicUsize,
    pub restarts: AtomicUsize,
}

impl FakeMessenger {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(vec![
                GroupInfo {
                    id: "111@g.us".into(),
                    subject: "Familia".into(),
                },
                GroupInfo {
                    id: "222@g.us".into(),
                    subject: "CLUB DEV 🚀".into(),
                },
            ]),
            videos: Mutex::new(Vec::new()),
            texts: Mutex::new(Vec::new()),
            send_failures_left: AtomicUsize::new(0),
            send_delay: Duration::ZERO,
            logouts: AtomicUsize::new(0),
            restarts: AtomicUsize::new(0),
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            send_delay: delay,
            ..Self::new()
        }
    }

    pub fn sent_count(&self) -> usize {
        self.videos.lock().unwrap().len()
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn joined_groups(&self) -> Result<Vec<GroupInfo>> {
        Ok(self.groups.lock().unwrap().clone())
    }

    async fn send_video(&self, group: &GroupInfo, video: &Path, caption: &str) -> Result<()> {
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        let left = self.send_failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.send_failures_left.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("connection reset");
        }
        self.videos.lock().unwrap().push(SentVideoRecord {
            group_id: group.id.clone(),
            caption: caption.to_string(),
            file_existed: video.exists(),
        });
        Ok(())
    }

    async fn send_text(&self, _group: &GroupInfo, text: &str) -> Result<()> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn drive(&self, _monitor: Arc<SessionMonitor>, _status: Arc<dyn StatusReport>) -> Result<()> {
        Ok(())
    }
}

pub struct Harness {
    pub courier: Arc<Courier>,
    pub messenger: Arc<FakeMessenger>,
    pub downloader: Arc<FakeDownloader>,
    pub search: Arc<FakeSearch>,
    pub monitor: Arc<SessionMonitor>,
    pub dir: tempfile::TempDir,
}

pub struct HarnessOptions {
    pub topics: Vec<&'static str>,
    pub repeat_policy: RepeatPolicy,
    pub breaker_threshold: u32,
    pub retry_attempts: u32,
    pub send_on_connect: bool,
    pub persist_memory: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            topics: vec!["A", "B"],
            repeat_policy: RepeatPolicy::Lenient,
            breaker_threshold: 3,
            retry_attempts: 3,
            send_on_connect: true,
            persist_memory: false,
        }
    }
}

pub fn schedule_path(dir: &Path) -> PathBuf {
    dir.join("video_schedule.json")
}

pub fn memory_path(dir: &Path) -> PathBuf {
    dir.join("sent_memory.json")
}

pub fn harness(
    search: FakeSearch,
    messenger: FakeMessenger,
    downloader: FakeDownloader,
    options: HarnessOptions,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let search = Arc::new(search);
    let messenger = Arc::new(messenger);
    let downloader = Arc::new(downloader);
    let monitor = Arc::new(SessionMonitor::new(EventBus::default()));

    let topics = options.topics.iter().map(|t| t.to_string()).collect();
    let rotator = TopicRotator::with_seed(topics, RotationPolicy::Sequential, 7).unwrap();
    let selector = Selector::with_seed(rotator, 50, 10, options.repeat_policy, 5, 7);

    let scratch = dir.path().join("downloads");
    std::fs::create_dir_all(&scratch).unwrap();

    let deliverer = Deliverer::new(
        messenger.clone(),
        downloader.clone(),
        None,
        GROUP_NAME,
        scratch,
        1024,
        Duration::from_secs(1),
    );
    let gate = Arc::new(IntervalGate::new(
        schedule_path(dir.path()),
        Duration::from_secs(3 * 3600),
        Duration::from_secs(7 * 24 * 3600),
        Duration::from_secs(24 * 3600),
    ));

    let courier = Arc::new(Courier::new(
        gate,
        selector,
        search.clone(),
        deliverer,
        CircuitBreaker::new(options.breaker_threshold, Duration::from_secs(1800)),
        monitor.clone(),
        CourierOptions {
            retry: RetryPolicy {
                max_attempts: options.retry_attempts,
                base_delay: Duration::from_millis(1),
            },
            notify_group_on_failure: true,
            send_on_connect: options.send_on_connect,
            memory_file: options.persist_memory.then(|| memory_path(dir.path())),
        },
    ));

    Harness {
        courier,
        messenger,
        downloader,
        search,
        monitor,
        dir,
    }
}

pub async fn connect(monitor: &SessionMonitor) {
    monitor
        .transition(ConnectionState::Connected {
            user: ConnectedUser::new("Bot", "34600111222:1@s.whatsapp.net"),
        })
        .await;
}
