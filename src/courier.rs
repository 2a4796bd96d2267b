/// Delivery cycle module
///
/// One cycle: readiness check, circuit breaker, interval gate, selection,
/// delivery, then bookkeeping. The scheduler, the dashboard and the
/// on-connect hook all go through [`Courier::run_cycle`], which admits one
/// cycle at a time.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::breaker::{BreakerStatus, CircuitBreaker, RetryPolicy};
use crate::delivery::{Deliverer, DeliveryReport};
use crate::error::CycleError;
use crate::events::{DashboardEvent, EventBus, SentVideo};
use crate::gate::{now_ms, IntervalGate, SendRecord};
use crate::memory::MemorySnapshot;
use crate::messenger::StatusReport;
use crate::selector::{RepeatPolicy, Selection, SelectionTier, Selector};
use crate::session::SessionMonitor;
use crate::youtube::VideoSearch;

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Scheduled,
    Manual,
    Connected,
}

impl Trigger {
    pub fn label(&self) -> &'static str {
        match self {
            Trigger::Scheduled => "scheduled",
            Trigger::Manual => "manual",
            Trigger::Connected => "connected",
        }
    }

    /// Manual sends skip the interval check but are still recorded
    fn bypasses_gate(&self) -> bool {
        matches!(self, Trigger::Manual)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Sent {
        video: SentVideo,
        group: String,
        tier: SelectionTier,
        attempts: u32,
    },
    #[serde(rename_all = "camelCase")]
    GateDenied {
        wait_remaining_ms: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_allowed_date: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    BreakerOpen { retry_in_ms: i64 },
    NoContent { message: String },
    Failed { message: String, attempts: u32 },
    AlreadyInProgress,
    NotReady,
}

impl CycleOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, CycleOutcome::Sent { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct CycleStats {
    cycles_run: u64,
    videos_sent: u64,
    last_cycle_at: Option<String>,
    last_trigger: Option<Trigger>,
    last_outcome: Option<CycleOutcome>,
}

/// Everything the dashboard shows about the delivery loop
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourierStatus {
    pub connection: &'static str,
    pub sending: bool,
    pub group_key: String,
    pub interval_ms: i64,
    pub last_send: Option<SendRecord>,
    pub next_allowed_in_ms: i64,
    pub breaker: BreakerStatus,
    pub repeat_policy: RepeatPolicy,
    pub topics: Vec<String>,
    pub topic_cursor: usize,
    pub sent_videos: usize,
    pub sent_channels: usize,
    pub cycles_run: u64,
    pub videos_sent: u64,
    pub last_cycle_at: Option<String>,
    pub last_trigger: Option<Trigger>,
    pub last_outcome: Option<CycleOutcome>,
}

/// Resets the in-progress flag when a cycle ends, however it ends
struct SendingGuard<'a>(&'a AtomicBool);

impl<'a> SendingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SendingGuard(flag))
    }
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CourierOptions {
    pub retry: RetryPolicy,
    pub notify_group_on_failure: bool,
    pub send_on_connect: bool,
    /// Where to persist the rolling memories, when enabled
    pub memory_file: Option<PathBuf>,
}

pub struct Courier {
    gate: Arc<IntervalGate>,
    selector: Mutex<Selector>,
    search: Arc<dyn VideoSearch>,
    deliverer: Deliverer,
    breaker: Mutex<CircuitBreaker>,
    monitor: Arc<SessionMonitor>,
    events: EventBus,
    group_key: String,
    options: CourierOptions,
    sending: AtomicBool,
    stats: RwLock<CycleStats>,
}

impl Courier {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gate: Arc<IntervalGate>,
        selector: Selector,
        search: Arc<dyn VideoSearch>,
        deliverer: Deliverer,
        breaker: CircuitBreaker,
        monitor: Arc<SessionMonitor>,
        options: CourierOptions,
    ) -> Self {
        let group_key = deliverer.target_group_name().trim().to_lowercase();
        let events = monitor.events().clone();
        Self {
            gate,
            selector: Mutex::new(selector),
            search,
            deliverer,
            breaker: Mutex::new(breaker),
            monitor,
            events,
            group_key,
            options,
            sending: AtomicBool::new(false),
            stats: RwLock::new(CycleStats::default()),
        }
    }

    pub fn gate(&self) -> &Arc<IntervalGate> {
        &self.gate
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn monitor(&self) -> &Arc<SessionMonitor> {
        &self.monitor
    }

    pub fn deliverer(&self) -> &Deliverer {
        &self.deliverer
    }

    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    /// Load persisted memories, when persistence is enabled
    pub async fn restore_memory(&self) {
        let Some(path) = &self.options.memory_file else {
            return;
        };

        let mut selector = self.selector.lock().await;
        let capacities = (
            selector.sent_videos().capacity(),
            selector.sent_channels().capacity(),
        );
        match MemorySnapshot::load(path, capacities.0, capacities.1).await {
            Ok(Some(snapshot)) => {
                log::info!(
                    "Restored memory: {} videos, {} channels",
                    snapshot.sent_videos.len(),
                    snapshot.sent_channels.len()
                );
                selector.restore(snapshot);
            }
            Ok(None) => log::info!("No memory file at {}, starting fresh", path.display()),
            Err(e) => log::warn!("Ignoring unreadable memory file: {:#}", e),
        }
    }

    /// Run one cycle. Never returns an error: every ending is a [`CycleOutcome`].
    pub async fn run_cycle(&self, trigger: Trigger) -> CycleOutcome {
        let Some(_guard) = SendingGuard::acquire(&self.sending) else {
            log::info!("{} cycle rejected: another cycle is in progress", trigger.label());
            return CycleOutcome::AlreadyInProgress;
        };

        let outcome = self.guarded_cycle(trigger).await;

        let mut stats = self.stats.write().await;
        stats.cycles_run += 1;
        if outcome.is_sent() {
            stats.videos_sent += 1;
        }
        stats.last_cycle_at = Some(Utc::now().to_rfc3339());
        stats.last_trigger = Some(trigger);
        stats.last_outcome = Some(outcome.clone());
        outcome
    }

    async fn guarded_cycle(&self, trigger: Trigger) -> CycleOutcome {
        if !self.monitor.is_ready().await {
            log::info!("{} cycle skipped: messenger not connected", trigger.label());
            self.skipped("messenger not connected", trigger);
            return CycleOutcome::NotReady;
        }

        if let Some(retry_in_ms) = self.breaker.lock().await.blocked_for(now_ms()) {
            log::warn!(
                "{} cycle skipped: circuit breaker open for another {} s",
                trigger.label(),
                retry_in_ms / 1000
            );
            self.skipped("circuit breaker open", trigger);
            return CycleOutcome::BreakerOpen { retry_in_ms };
        }

        if !trigger.bypasses_gate() {
            let decision = self.gate.can_send(&self.group_key).await;
            if !decision.allowed {
                let wait = decision.wait_remaining_ms.unwrap_or_default();
                log::debug!(
                    "Send interval not elapsed for '{}', {} min remaining",
                    self.group_key,
                    wait / 60_000
                );
                return CycleOutcome::GateDenied {
                    wait_remaining_ms: wait,
                    next_allowed_date: decision.next_allowed_date,
                };
            }
        }

        log::info!("Starting {} delivery cycle", trigger.label());
        let max_attempts = self.options.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt().await {
                Ok((selection, report)) => {
                    self.breaker.lock().await.record_success();
                    return self.sent(selection, report, trigger, attempt);
                }
                Err(CycleError::Selection(e)) => {
                    log::warn!("No video to send this cycle: {}", e);
                    self.skipped(&e.to_string(), trigger);
                    return CycleOutcome::NoContent {
                        message: e.to_string(),
                    };
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.options.retry.delay_after(attempt);
                    log::warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return self.failed(e, trigger, attempt).await,
            }
        }
    }

    /// Select and deliver once, registering the video only after it was sent
    async fn attempt(&self) -> Result<(Selection, DeliveryReport), CycleError> {
        let selection = self.selector.lock().await.select(self.search.as_ref()).await?;
        log::info!(
            "Selected '{}' from {} via {:?}",
            selection.candidate.title,
            selection.candidate.channel_title,
            selection.tier
        );

        let report = self.deliverer.deliver(&selection.candidate).await?;

        let snapshot = {
            let mut selector = self.selector.lock().await;
            selector.register_delivery(&selection.candidate);
            selector.snapshot()
        };
        if let Some(path) = &self.options.memory_file {
            if let Err(e) = snapshot.save(path).await {
                log::warn!("Could not persist memory: {:#}", e);
            }
        }

        self.gate.record_send(&self.group_key).await?;
        Ok((selection, report))
    }

    fn sent(
        &self,
        selection: Selection,
        report: DeliveryReport,
        trigger: Trigger,
        attempts: u32,
    ) -> CycleOutcome {
        let video = SentVideo {
            id: report.candidate.id.clone(),
            title: report.candidate.title.clone(),
            channel: report.candidate.channel_title.clone(),
            url: report.candidate.url.clone(),
            topic: report.candidate.topic.clone(),
        };
        self.events.publish(DashboardEvent::VideoSent {
            success: true,
            video: video.clone(),
            group: report.group.subject.clone(),
            trigger: trigger.label(),
            timestamp: Utc::now().to_rfc3339(),
        });
        CycleOutcome::Sent {
            video,
            group: report.group.subject,
            tier: selection.tier,
            attempts,
        }
    }

    async fn failed(&self, error: CycleError, trigger: Trigger, attempts: u32) -> CycleOutcome {
        let message = error.to_string();
        log::error!("{} cycle failed after {} attempts: {}", trigger.label(), attempts, message);

        self.breaker.lock().await.record_failure(now_ms());

        // the video already went out when only the bookkeeping failed
        if self.options.notify_group_on_failure && !matches!(error, CycleError::Persistence(_)) {
            self.deliverer.notify_failure(&message).await;
        }

        self.events.publish(DashboardEvent::SendFailed {
            success: false,
            message: message.clone(),
            trigger: trigger.label(),
            attempts,
        });
        CycleOutcome::Failed { message, attempts }
    }

    fn skipped(&self, reason: &str, trigger: Trigger) {
        self.events.publish(DashboardEvent::CycleSkipped {
            reason: reason.to_string(),
            trigger: trigger.label(),
        });
    }

    /// Hook for a fresh connection: send right away if this group never got a video
    pub async fn on_connected(&self) -> Option<CycleOutcome> {
        if !self.options.send_on_connect {
            return None;
        }
        if self.gate.last_record(&self.group_key).await.is_some() {
            log::info!("Connected; next video follows the regular schedule");
            return None;
        }
        log::info!("Connected and no video was ever sent, starting a cycle");
        Some(self.run_cycle(Trigger::Connected).await)
    }

    pub async fn status(&self) -> CourierStatus {
        let now = now_ms();
        let connection = self.monitor.state().await.label();
        let last_send = self.gate.last_record(&self.group_key).await;
        let next_allowed_in_ms = last_send
            .as_ref()
            .map(|r| (r.timestamp + self.gate.interval_ms() - now).max(0))
            .unwrap_or(0);
        let breaker = self.breaker.lock().await.status(now);

        let (repeat_policy, topics, topic_cursor, sent_videos, sent_channels) = {
            let selector = self.selector.lock().await;
            (
                selector.repeat_policy(),
                selector.rotator().topics().to_vec(),
                selector.rotator().cursor(),
                selector.sent_videos().len(),
                selector.sent_channels().len(),
            )
        };
        let stats = self.stats.read().await.clone();

        CourierStatus {
            connection,
            sending: self.is_sending(),
            group_key: self.group_key.clone(),
            interval_ms: self.gate.interval_ms(),
            last_send,
            next_allowed_in_ms,
            breaker,
            repeat_policy,
            topics,
            topic_cursor,
            sent_videos,
            sent_channels,
            cycles_run: stats.cycles_run,
            videos_sent: stats.videos_sent,
            last_cycle_at: stats.last_cycle_at,
            last_trigger: stats.last_trigger,
            last_outcome: stats.last_outcome,
        }
    }
}

#[async_trait]
impl StatusReport for Courier {
    async fn summary(&self) -> String {
        let status = self.status().await;
        let mut lines = vec![format!("📡 Conexión: {}", status.connection)];

        match &status.last_send {
            Some(record) => lines.push(format!("🕒 Último envío: {}", record.utc_date)),
            None => lines.push("🕒 Todavía no se ha enviado ningún video".to_string()),
        }
        if status.next_allowed_in_ms > 0 {
            lines.push(format!(
                "⏳ Próximo envío en {} min",
                status.next_allowed_in_ms / 60_000 + 1
            ));
        } else {
            lines.push("✅ Listo para enviar".to_string());
        }
        if status.breaker.is_open {
            lines.push(format!(
                "⚠️ Pausado tras {} fallos seguidos",
                status.breaker.failures
            ));
        }
        lines.push(format!(
            "🎬 Videos enviados: {} (memoria: {} videos, {} canales)",
            status.videos_sent, status.sent_videos, status.sent_channels
        ));
        lines.join("\n")
    }
}
