/// Configuration module for environment variables and API keys
///
/// Everything is read once at startup. Required values that are missing, and
/// tunables that are present but malformed, abort startup.

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::selector::RepeatPolicy;
use crate::topics::RotationPolicy;

/// Which chat network the bot posts to
#[derive(Debug, Clone)]
pub enum MessengerBackend {
    /// WhatsApp Web HTTP bridge
    Bridge {
        base_url: String,
        session: String,
        api_key: Option<String>,
        poll_interval: Duration,
    },
    /// Telegram Bot API
    Telegram {
        token: String,
        chat_ids: Vec<i64>,
    },
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub max_results: usize,
    pub freshness_days: i64,
    pub region: String,
    pub language: String,
    pub query_suffixes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub dir: PathBuf,
    pub tools: Vec<String>,
    pub timeout: Duration,
    pub min_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub messenger: MessengerBackend,

    /// YouTube Data API v3 key
    pub youtube_api_key: String,

    /// Ordered search topics
    pub topics: Vec<String>,

    /// Case-insensitive substring of the target group's name
    pub target_group_name: String,

    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub caption_timeout: Duration,

    pub send_interval: Duration,
    pub check_interval: Duration,

    pub sent_video_memory: usize,
    pub sent_channel_memory: usize,
    pub topic_rotation: RotationPolicy,
    pub repeat_policy: RepeatPolicy,
    pub persist_memory: bool,
    pub memory_file: PathBuf,

    pub schedule_file: PathBuf,
    pub retention: Duration,
    pub cleanup_interval: Duration,

    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,

    pub search: SearchSettings,
    pub download: DownloadSettings,

    /// Dashboard port
    pub http_port: u16,

    /// Bearer token for mutating dashboard endpoints (optional)
    pub dashboard_secret: Option<String>,

    pub notify_group_on_failure: bool,
    pub send_on_connect: bool,
}

/// Typed access to a key/value source
struct Vars<F: Fn(&str) -> Option<String>>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    /// Non-empty value, trimmed
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        }
    }

    /// Parsed and strictly positive
    fn positive(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        let value = self.parsed(key, default)?;
        if value == 0 {
            return Err(ConfigError::Invalid {
                key,
                value: "0".to_string(),
            });
        }
        Ok(value)
    }

    /// Positive count of `unit` seconds, rejected when the product overflows
    fn span(&self, key: &'static str, default: u64, unit: u64) -> Result<Duration, ConfigError> {
        let value = self.positive(key, default)?;
        value
            .checked_mul(unit)
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(TimeDelta::try_seconds)
            .and_then(|delta| delta.to_std().ok())
            .ok_or(ConfigError::Invalid {
                key,
                value: value.to_string(),
            })
    }

    /// Positive number of days that still yields a representable cutoff date
    fn days(&self, key: &'static str, default: u64) -> Result<i64, ConfigError> {
        let value = self.positive(key, default)?;
        i64::try_from(value)
            .ok()
            .and_then(|days| TimeDelta::try_days(days).map(|delta| (days, delta)))
            .filter(|(_, delta)| Utc::now().checked_sub_signed(*delta).is_some())
            .map(|(days, _)| days)
            .ok_or(ConfigError::Invalid {
                key,
                value: value.to_string(),
            })
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(ConfigError::Invalid { key, value: v }),
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| split_list(&raw))
            .unwrap_or_default()
    }
}

/// Split a comma separated list, dropping blanks
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

impl Config {
    /// Load configuration from environment variables (and `.env` if present)
    ///
    /// # Errors
    /// Returns an error if a required variable is missing or a value is malformed
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok()).context("Invalid configuration")
    }

    /// Build from any key/value source
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let messenger = match vars
            .get("MESSENGER_BACKEND")
            .unwrap_or_else(|| "bridge".to_string())
            .to_lowercase()
            .as_str()
        {
            "bridge" | "whatsapp" => MessengerBackend::Bridge {
                base_url: vars
                    .required("BRIDGE_URL")?
                    .trim_end_matches('/')
                    .to_string(),
                session: vars.get("BRIDGE_SESSION").unwrap_or_else(|| "default".to_string()),
                api_key: vars.get("BRIDGE_API_KEY"),
                poll_interval: vars.span("BRIDGE_POLL_SECS", 5, 1)?,
            },
            "telegram" => {
                let chat_ids = vars
                    .list("TELEGRAM_CHAT_IDS")
                    .into_iter()
                    .map(|id| {
                        id.parse::<i64>().map_err(|_| ConfigError::Invalid {
                            key: "TELEGRAM_CHAT_IDS",
                            value: id,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                MessengerBackend::Telegram {
                    token: vars.required("TELEGRAM_BOT_TOKEN")?,
                    chat_ids,
                }
            }
            other => {
                return Err(ConfigError::Invalid {
                    key: "MESSENGER_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let topics = split_list(&vars.required("YOUTUBE_TOPIC")?);
        if topics.is_empty() {
            return Err(ConfigError::EmptyTopics);
        }

        let search = SearchSettings {
            max_results: vars.positive("SEARCH_MAX_RESULTS", 5)? as usize,
            freshness_days: vars.days("FRESHNESS_DAYS", 30)?,
            region: vars.get("SEARCH_REGION").unwrap_or_else(|| "ES".to_string()),
            language: vars.get("SEARCH_LANGUAGE").unwrap_or_else(|| "es".to_string()),
            query_suffixes: match vars.get("SEARCH_QUERY_SUFFIXES") {
                Some(raw) => split_list(&raw),
                None => vec!["español".to_string(), "spanish".to_string()],
            },
        };

        let download = DownloadSettings {
            dir: PathBuf::from(vars.get("DOWNLOAD_DIR").unwrap_or_else(|| "downloads".to_string())),
            tools: match vars.get("DOWNLOAD_TOOLS") {
                Some(raw) => split_list(&raw),
                None => vec!["yt-dlp".to_string(), "youtube-dl".to_string()],
            },
            timeout: vars.span("DOWNLOAD_TIMEOUT_SECS", 60, 1)?,
            min_bytes: vars.positive("MIN_VIDEO_BYTES", 100_000)?,
        };
        if download.tools.is_empty() {
            return Err(ConfigError::Invalid {
                key: "DOWNLOAD_TOOLS",
                value: String::new(),
            });
        }

        Ok(Config {
            messenger,
            youtube_api_key: vars.required("YOUTUBE_API_KEY")?,
            topics,
            target_group_name: vars.required("TARGET_GROUP_NAME")?,

            gemini_api_key: vars.get("GEMINI_API_KEY"),
            gemini_model: vars
                .get("GEMINI_MODEL")
                .unwrap_or_else(|| "gemini-1.5-flash".to_string()),
            caption_timeout: vars.span("CAPTION_TIMEOUT_SECS", 20, 1)?,

            send_interval: vars.span("SEND_INTERVAL_MINUTES", 180, MINUTE)?,
            check_interval: vars.span("CHECK_INTERVAL_MINUTES", 15, MINUTE)?,

            sent_video_memory: vars.positive("SENT_VIDEO_MEMORY", 50)? as usize,
            sent_channel_memory: vars.positive("SENT_CHANNEL_MEMORY", 10)? as usize,
            topic_rotation: vars.parsed("TOPIC_ROTATION", RotationPolicy::Sequential)?,
            repeat_policy: vars.parsed("REPEAT_POLICY", RepeatPolicy::Lenient)?,
            persist_memory: vars.flag("PERSIST_MEMORY", false)?,
            memory_file: PathBuf::from(
                vars.get("MEMORY_FILE")
                    .unwrap_or_else(|| "sent_memory.json".to_string()),
            ),

            schedule_file: PathBuf::from(
                vars.get("SCHEDULE_FILE")
                    .unwrap_or_else(|| "video_schedule.json".to_string()),
            ),
            retention: vars.span("RETENTION_DAYS", 7, DAY)?,
            cleanup_interval: vars.span("CLEANUP_INTERVAL_HOURS", 24, HOUR)?,

            retry_attempts: vars.positive("RETRY_ATTEMPTS", 3)? as u32,
            retry_base_delay: Duration::from_millis(vars.positive("RETRY_BASE_DELAY_MS", 1000)?),
            breaker_threshold: vars.positive("BREAKER_THRESHOLD", 3)? as u32,
            breaker_cooldown: vars.span("BREAKER_COOLDOWN_MINUTES", 30, MINUTE)?,

            search,
            download,

            http_port: vars.parsed("PORT", 3000u16)?,
            dashboard_secret: vars.get("DASHBOARD_SECRET"),

            notify_group_on_failure: vars.flag("NOTIFY_GROUP_ON_FAILURE", true)?,
            send_on_connect: vars.flag("SEND_ON_CONNECT", true)?,
        })
    }

    /// Prepare the filesystem and check external tools
    pub async fn validate(&self) -> Result<()> {
        log::info!("Validating configuration...");

        tokio::fs::create_dir_all(&self.download.dir)
            .await
            .with_context(|| {
                format!("Failed to create download dir {}", self.download.dir.display())
            })?;

        let mut any_tool = false;
        for tool in &self.download.tools {
            let found = tokio::process::Command::new(tool)
                .arg("--version")
                .output()
                .await
                .map(|out| out.status.success())
                .unwrap_or(false);
            if found {
                log::info!("Download tool available: {}", tool);
                any_tool = true;
            }
        }
        if !any_tool {
            log::warn!(
                "None of the download tools {:?} could be started; downloads will fail",
                self.download.tools
            );
        }

        if self.gemini_api_key.is_none() {
            log::warn!("GEMINI_API_KEY not set, captions will use the built-in template");
        }

        log::info!(
            "Configuration validated: {} topics, target group '{}', interval {} min",
            self.topics.len(),
            self.target_group_name,
            self.send_interval.as_secs() / 60
        );
        Ok(())
    }
}
