/// Interval gate module
///
/// Enforces the minimum time between two sends to the same group. State lives in a
/// single JSON file keyed by group, with a `_metadata` entry used for cleanup
/// bookkeeping:
///
/// ```json
/// {
///   "My Group": { "timestamp": 0, "utcDate": "...", "nextAllowed": 0, "nextAllowedDate": "..." },
///   "_metadata": { "lastCleanup": 0, "totalEntriesRemoved": 0 }
/// }
/// ```
///
/// Reads fail open (an unreadable file counts as "never sent"), writes fail loudly.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::GateError;

/// Last successful send to one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRecord {
    pub timestamp: i64,
    pub utc_date: String,
    pub next_allowed: i64,
    pub next_allowed_date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleMetadata {
    #[serde(default)]
    pub last_cleanup: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cleanup_date: Option<String>,
    #[serde(default)]
    pub total_entries_removed: u64,
}

/// Whole schedule file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleFile {
    #[serde(rename = "_metadata", default)]
    pub metadata: ScheduleMetadata,
    #[serde(flatten)]
    pub records: BTreeMap<String, SendRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateReason {
    FirstTime,
    TimeElapsed,
    TimeNotElapsed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: GateReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_remaining_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_allowed_date: Option<String>,
}

pub struct IntervalGate {
    path: PathBuf,
    interval_ms: i64,
    retention_ms: i64,
    cleanup_every_ms: i64,
    io_lock: Mutex<()>,
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn iso(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|d: DateTime<Utc>| d.to_rfc3339())
        .unwrap_or_default()
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl IntervalGate {
    pub fn new(
        path: impl Into<PathBuf>,
        interval: Duration,
        retention: Duration,
        cleanup_every: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            interval_ms: millis(interval),
            retention_ms: millis(retention),
            cleanup_every_ms: millis(cleanup_every),
            io_lock: Mutex::new(()),
        }
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval_ms
    }

    pub async fn can_send(&self, group_key: &str) -> GateDecision {
        self.can_send_at(group_key, now_ms()).await
    }

    pub async fn can_send_at(&self, group_key: &str, now: i64) -> GateDecision {
        match self.last_record_at(group_key, now).await {
            None => {
                log::info!("First send to group '{}'", group_key);
                GateDecision {
                    allowed: true,
                    reason: GateReason::FirstTime,
                    wait_remaining_ms: None,
                    next_allowed_date: None,
                }
            }
            Some(record) => {
                let elapsed = now - record.timestamp;
                if elapsed >= self.interval_ms {
                    GateDecision {
                        allowed: true,
                        reason: GateReason::TimeElapsed,
                        wait_remaining_ms: None,
                        next_allowed_date: Some(record.next_allowed_date),
                    }
                } else {
                    GateDecision {
                        allowed: false,
                        reason: GateReason::TimeNotElapsed,
                        wait_remaining_ms: Some(self.interval_ms - elapsed),
                        next_allowed_date: Some(record.next_allowed_date),
                    }
                }
            }
        }
    }

    pub async fn last_record(&self, group_key: &str) -> Option<SendRecord> {
        self.last_record_at(group_key, now_ms()).await
    }

    async fn last_record_at(&self, group_key: &str, now: i64) -> Option<SendRecord> {
        let _io = self.io_lock.lock().await;
        self.load(now).await.records.remove(group_key)
    }

    pub async fn record_send(&self, group_key: &str) -> Result<SendRecord, GateError> {
        self.record_send_at(group_key, now_ms()).await
    }

    /// Upsert the group's record and persist the whole file
    pub async fn record_send_at(&self, group_key: &str, at: i64) -> Result<SendRecord, GateError> {
        let _io = self.io_lock.lock().await;
        let mut schedule = self.load(at).await;

        let next_allowed = at.saturating_add(self.interval_ms);
        let record = SendRecord {
            timestamp: at,
            utc_date: iso(at),
            next_allowed,
            next_allowed_date: iso(next_allowed),
        };
        schedule
            .records
            .insert(group_key.to_string(), record.clone());

        self.write(&schedule).await?;
        log::info!(
            "Send recorded for '{}', next send allowed at {}",
            group_key,
            record.next_allowed_date
        );
        Ok(record)
    }

    /// Run the retention cleanup if it is due. Returns the number of pruned records.
    pub async fn cleanup(&self) -> usize {
        self.cleanup_at(now_ms()).await
    }

    pub async fn cleanup_at(&self, now: i64) -> usize {
        let _io = self.io_lock.lock().await;
        let Some(mut schedule) = self.read().await else {
            return 0;
        };
        let removed = self.prune_if_due(&mut schedule, now);
        if let Some(removed) = removed {
            if let Err(e) = self.write(&schedule).await {
                log::warn!("Cleanup could not rewrite schedule file: {}", e);
            }
            return removed;
        }
        0
    }

    pub async fn snapshot(&self) -> ScheduleFile {
        let _io = self.io_lock.lock().await;
        self.read().await.unwrap_or_default()
    }

    /// Read with opportunistic cleanup. Never fails.
    async fn load(&self, now: i64) -> ScheduleFile {
        let Some(mut schedule) = self.read().await else {
            return ScheduleFile::default();
        };

        if self.prune_if_due(&mut schedule, now).is_some() {
            if let Err(e) = self.write(&schedule).await {
                log::warn!("Cleanup could not rewrite schedule file: {}", e);
            }
        }
        schedule
    }

    async fn read(&self) -> Option<ScheduleFile> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!(
                    "Schedule file {} unreadable, treating as empty: {}",
                    self.path.display(),
                    e
                );
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(schedule) => Some(schedule),
            Err(e) => {
                log::warn!(
                    "Schedule file {} is corrupt, treating as empty: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    async fn write(&self, schedule: &ScheduleFile) -> Result<(), GateError> {
        let json = serde_json::to_string_pretty(schedule)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|source| GateError::Write {
                path: self.path.display().to_string(),
                source,
            })
    }

    /// Returns `Some(removed)` when a cleanup pass ran
    fn prune_if_due(&self, schedule: &mut ScheduleFile, now: i64) -> Option<usize> {
        if now - schedule.metadata.last_cleanup < self.cleanup_every_ms {
            return None;
        }

        let cutoff = now - self.retention_ms;
        let before = schedule.records.len();
        schedule.records.retain(|group, record| {
            let keep = record.timestamp > cutoff;
            if !keep {
                log::debug!("Pruning stale send record for '{}' ({})", group, record.utc_date);
            }
            keep
        });
        let removed = before - schedule.records.len();

        schedule.metadata.last_cleanup = now;
        schedule.metadata.last_cleanup_date = Some(iso(now));
        schedule.metadata.total_entries_removed += removed as u64;

        log::info!(
            "Schedule cleanup removed {} entries, {} remaining",
            removed,
            schedule.records.len()
        );
        Some(removed)
    }
}
