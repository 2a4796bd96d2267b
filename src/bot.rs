/// Bot module
///
/// Builds every component from the configuration and runs the long-lived tasks:
/// the messenger driver, the scheduler, the on-connect watcher and the dashboard.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::breaker::{CircuitBreaker, RetryPolicy};
use crate::caption::{CaptionWriter, GeminiCaptioner};
use crate::config::{Config, MessengerBackend};
use crate::courier::{Courier, CourierOptions};
use crate::delivery::Deliverer;
use crate::downloader::{purge_scratch_dir, ToolDownloader};
use crate::events::EventBus;
use crate::gate::IntervalGate;
use crate::http_server::{start_server, AppState};
use crate::messenger::{bridge::BridgeMessenger, telegram::TelegramMessenger, Messenger, StatusReport};
use crate::scheduler::{start_scheduler, watch_connections};
use crate::selector::Selector;
use crate::session::SessionMonitor;
use crate::topics::TopicRotator;
use crate::youtube::YouTubeSearch;

fn build_messenger(config: &Config) -> Result<Arc<dyn Messenger>> {
    let messenger: Arc<dyn Messenger> = match &config.messenger {
        MessengerBackend::Bridge {
            base_url,
            session,
            api_key,
            poll_interval,
        } => Arc::new(BridgeMessenger::new(
            base_url.clone(),
            session.clone(),
            api_key.clone(),
            *poll_interval,
        )?),
        MessengerBackend::Telegram { token, chat_ids } => {
            Arc::new(TelegramMessenger::new(token, chat_ids.clone())?)
        }
    };
    log::info!("Messenger backend: {}", messenger.name());
    Ok(messenger)
}

/// Assemble the delivery pipeline
pub fn build_courier(
    config: &Config,
    messenger: Arc<dyn Messenger>,
    monitor: Arc<SessionMonitor>,
) -> Result<Courier> {
    let rotator = TopicRotator::new(config.topics.clone(), config.topic_rotation)?;
    let selector = Selector::new(
        rotator,
        config.sent_video_memory,
        config.sent_channel_memory,
        config.repeat_policy,
        config.search.max_results,
    );

    let search = Arc::new(YouTubeSearch::new(
        config.youtube_api_key.clone(),
        config.search.clone(),
    ));
    let captioner = config.gemini_api_key.clone().map(|key| {
        Arc::new(GeminiCaptioner::new(key, config.gemini_model.clone())) as Arc<dyn CaptionWriter>
    });

    let deliverer = Deliverer::new(
        messenger,
        Arc::new(ToolDownloader::new(&config.download)),
        captioner,
        config.target_group_name.clone(),
        config.download.dir.clone(),
        config.download.min_bytes,
        config.caption_timeout,
    );

    let gate = Arc::new(IntervalGate::new(
        config.schedule_file.clone(),
        config.send_interval,
        config.retention,
        config.cleanup_interval,
    ));

    Ok(Courier::new(
        gate,
        selector,
        search,
        deliverer,
        CircuitBreaker::new(config.breaker_threshold, config.breaker_cooldown),
        monitor,
        CourierOptions {
            retry: RetryPolicy {
                max_attempts: config.retry_attempts,
                base_delay: config.retry_base_delay,
            },
            notify_group_on_failure: config.notify_group_on_failure,
            send_on_connect: config.send_on_connect,
            memory_file: config
                .persist_memory
                .then(|| config.memory_file.clone()),
        },
    ))
}

/// Initialize and run the bot until Ctrl+C or a fatal task error
pub async fn run_bot(config: Config) -> Result<()> {
    log::info!("Initializing bot...");

    if let Err(e) = purge_scratch_dir(&config.download.dir).await {
        log::warn!("Could not clean download dir: {:#}", e);
    }

    let monitor = Arc::new(SessionMonitor::new(EventBus::default()));
    let messenger = build_messenger(&config)?;
    let courier = Arc::new(build_courier(&config, messenger.clone(), monitor.clone())?);
    courier.restore_memory().await;

    let state = AppState {
        courier: courier.clone(),
        dashboard_secret: config.dashboard_secret.clone(),
    };
    let server = tokio::spawn(start_server(state, config.http_port));

    tokio::spawn(start_scheduler(
        courier.clone(),
        config.check_interval,
        config.cleanup_interval,
    ));
    tokio::spawn(watch_connections(courier.clone()));

    let status: Arc<dyn StatusReport> = courier.clone();
    let driver = tokio::spawn(async move { messenger.drive(monitor, status).await });

    log::info!("Bot is running. Press Ctrl+C to stop.");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            log::info!("Shutting down");
        }
        result = server => {
            result.context("HTTP server task panicked")??;
        }
        result = driver => {
            result.context("Messenger task panicked")??;
            log::warn!("Messenger driver stopped");
        }
    }

    Ok(())
}
