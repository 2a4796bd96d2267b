/// Chat session state
///
/// The messenger backends drive an explicit connection state machine:
///
/// ```text
/// Disconnected -> AwaitingPairing -> Connected -> Reauthenticating -> Connected
///       ^                                |
///       +------------- logout -----------+
/// ```
///
/// Transitions publish dashboard events. The rest of the bot only sees
/// [`SessionMonitor::is_ready`].

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::events::{DashboardEvent, EventBus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedUser {
    pub name: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub connected_at: String,
}

impl ConnectedUser {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        let id = id.into();
        // WhatsApp ids look like "34600111222:12@s.whatsapp.net"
        let phone = id
            .split([':', '@'])
            .next()
            .filter(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string);
        Self {
            name: name.into(),
            id,
            phone,
            connected_at: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    AwaitingPairing { qr: String },
    Connected { user: ConnectedUser },
    Reauthenticating,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::AwaitingPairing { .. } => "awaiting_pairing",
            ConnectionState::Connected { .. } => "connected",
            ConnectionState::Reauthenticating => "reauthenticating",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn qr(&self) -> Option<&str> {
        match self {
            ConnectionState::AwaitingPairing { qr } => Some(qr),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<&ConnectedUser> {
        match self {
            ConnectionState::Connected { user } => Some(user),
            _ => None,
        }
    }
}

pub struct SessionMonitor {
    state: RwLock<ConnectionState>,
    events: EventBus,
}

impl SessionMonitor {
    pub fn new(events: EventBus) -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            events,
        }
    }

    /// Move to `next`. Returns true when the session just became ready.
    pub async fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.state.write().await;
        if same_state(&state, &next) {
            return false;
        }

        let prev = std::mem::replace(&mut *state, next.clone());
        log::info!("Session state: {} -> {}", prev.label(), next.label());

        match &next {
            ConnectionState::AwaitingPairing { qr } => {
                self.events.publish(DashboardEvent::QrUpdate { qr: qr.clone() });
            }
            ConnectionState::Connected { user } => {
                log::info!("Messenger connected as {}", user.name);
                self.events.publish(DashboardEvent::UserConnected {
                    status: "connected",
                    user: user.clone(),
                });
            }
            ConnectionState::Disconnected if prev.is_ready() => {
                self.events.publish(DashboardEvent::SessionClosed {
                    message: "Session closed".to_string(),
                });
            }
            _ => {}
        }

        !prev.is_ready() && next.is_ready()
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    pub async fn is_ready(&self) -> bool {
        self.state.read().await.is_ready()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Snapshot event sent to a dashboard client when it subscribes
    pub async fn connection_event(&self) -> DashboardEvent {
        let state = self.state.read().await;
        DashboardEvent::Connection {
            status: state.label(),
            qr: state.qr().map(str::to_string),
            user: state.user().cloned(),
        }
    }
}

/// Connected users compare by id so a refreshed timestamp is not a transition
fn same_state(a: &ConnectionState, b: &ConnectionState) -> bool {
    match (a, b) {
        (ConnectionState::Connected { user: x }, ConnectionState::Connected { user: y }) => {
            x.id == y.id
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pairing_then_connect_reports_readiness_once() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let monitor = SessionMonitor::new(bus);

        assert!(!monitor.is_ready().await);
        assert!(
            !monitor
                .transition(ConnectionState::AwaitingPairing { qr: "qr-1".into() })
                .await
        );
        assert_eq!(rx.recv().await.unwrap().name(), "qr-update");

        let user = ConnectedUser::new("Bot", "34600111222:3@s.whatsapp.net");
        assert!(
            monitor
                .transition(ConnectionState::Connected { user: user.clone() })
                .await
        );
        assert_eq!(rx.recv().await.unwrap().name(), "user-connected");
        assert!(monitor.is_ready().await);

        // same user again is not a new transition
        let again = ConnectedUser::new("Bot", "34600111222:3@s.whatsapp.net");
        assert!(!monitor.transition(ConnectionState::Connected { user: again }).await);
    }

    #[tokio::test]
    async fn dropping_a_ready_session_publishes_session_closed() {
        let bus = EventBus::default();
        let monitor = SessionMonitor::new(bus.clone());
        monitor
            .transition(ConnectionState::Connected {
                user: ConnectedUser::new("Bot", "1@x"),
            })
            .await;

        let mut rx = bus.subscribe();
        monitor.transition(ConnectionState::Disconnected).await;
        assert_eq!(rx.recv().await.unwrap().name(), "session-closed");
    }

    #[test]
    fn phone_is_extracted_from_whatsapp_ids() {
        let user = ConnectedUser::new("Bot", "34600111222:12@s.whatsapp.net");
        assert_eq!(user.phone.as_deref(), Some("34600111222"));
        assert!(ConnectedUser::new("Bot", "@bot_name").phone.is_none());
    }

    #[tokio::test]
    async fn connection_snapshot_includes_qr() {
        let monitor = SessionMonitor::new(EventBus::default());
        monitor
            .transition(ConnectionState::AwaitingPairing { qr: "abc".into() })
            .await;

        let value = serde_json::to_value(monitor.connection_event().await).unwrap();
        assert_eq!(value["status"], "awaiting_pairing");
        assert_eq!(value["qr"], "abc");
    }
}
