/// Dashboard events
///
/// Lifecycle events pushed to connected dashboard clients over SSE.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::session::ConnectedUser;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentVideo {
    pub id: String,
    pub title: String,
    pub channel: String,
    pub url: String,
    pub topic: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DashboardEvent {
    Connection {
        status: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        qr: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        user: Option<ConnectedUser>,
    },
    QrUpdate {
        qr: String,
    },
    UserConnected {
        status: &'static str,
        user: ConnectedUser,
    },
    SessionClosed {
        message: String,
    },
    VideoSent {
        success: bool,
        video: SentVideo,
        group: String,
        trigger: &'static str,
        timestamp: String,
    },
    SendFailed {
        success: bool,
        message: String,
        trigger: &'static str,
        attempts: u32,
    },
    CycleSkipped {
        reason: String,
        trigger: &'static str,
    },
}

impl DashboardEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            DashboardEvent::Connection { .. } => "connection",
            DashboardEvent::QrUpdate { .. } => "qr-update",
            DashboardEvent::UserConnected { .. } => "user-connected",
            DashboardEvent::SessionClosed { .. } => "session-closed",
            DashboardEvent::VideoSent { .. } => "video-sent",
            DashboardEvent::SendFailed { .. } => "send-failed",
            DashboardEvent::CycleSkipped { .. } => "cycle-skipped",
        }
    }
}

/// Fan-out channel for dashboard events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DashboardEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to current subscribers; dropped silently when nobody listens
    pub fn publish(&self, event: DashboardEvent) {
        log::debug!("Dashboard event: {}", event.name());
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(DashboardEvent::QrUpdate { qr: "code".into() });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "qr-update");
        assert_eq!(serde_json::to_value(&event).unwrap()["qr"], "code");
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        EventBus::default().publish(DashboardEvent::SessionClosed {
            message: "bye".into(),
        });
    }
}
