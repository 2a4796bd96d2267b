/// Scheduler Module
///
/// Drives automatic delivery cycles. The check interval is much shorter than the
/// send interval; the interval gate decides whether a tick actually sends.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time;

use crate::courier::{Courier, CycleOutcome, Trigger};
use crate::events::DashboardEvent;

/// Start the automatic delivery scheduler
///
/// Checks every `check_interval` and prunes the schedule file every `cleanup_interval`.
pub async fn start_scheduler(
    courier: Arc<Courier>,
    check_interval: Duration,
    cleanup_interval: Duration,
) {
    let mut checks = time::interval(check_interval);
    let mut cleanups = time::interval(cleanup_interval);
    checks.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    cleanups.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    log::info!(
        "Starting delivery scheduler (check every {} min, send interval {} min)",
        check_interval.as_secs() / 60,
        courier.gate().interval_ms() / 60_000
    );

    // Skip the first tick (immediate execution)
    checks.tick().await;
    cleanups.tick().await;

    loop {
        tokio::select! {
            _ = checks.tick() => {
                log::debug!("Scheduled check triggered");
                match courier.run_cycle(Trigger::Scheduled).await {
                    CycleOutcome::Sent { video, attempts, .. } => {
                        log::info!(
                            "Scheduled send complete: '{}' after {} attempt(s)",
                            video.title,
                            attempts
                        );
                    }
                    CycleOutcome::GateDenied { .. } | CycleOutcome::NotReady => {}
                    other => log::info!("Scheduled cycle ended: {:?}", other),
                }
            }
            _ = cleanups.tick() => {
                let removed = courier.gate().cleanup().await;
                log::info!("Schedule cleanup removed {} stale entries", removed);
            }
        }
    }
}

/// Run the on-connect hook every time the messenger session becomes ready
pub async fn watch_connections(courier: Arc<Courier>) {
    let mut events = courier.events().subscribe();

    loop {
        match events.recv().await {
            Ok(DashboardEvent::UserConnected { .. }) => {
                let courier = courier.clone();
                tokio::spawn(async move {
                    if let Some(outcome) = courier.on_connected().await {
                        log::info!("On-connect cycle ended: {:?}", outcome);
                    }
                });
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("Connection watcher skipped {} events", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}
