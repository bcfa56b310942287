//! Progress gateway (C13), grounded on
//! `original_source/src/infra_mind/api/websocket.py` (its `WebSocketManager` class) and the
//! teacher's `layer2` progress-tracking conventions. Transport-agnostic: this
//! module owns session/room bookkeeping, heartbeats and back-pressure;
//! `src/bin/server.rs`
//! wires an axum websocket handler around it (§4.6, §5 "Back-pressure").

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Event, EventType};
use crate::events::EventManager;

pub type SessionId = Uuid;

/// Server → client push frame (§6 "Event / push transport").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl PushFrame {
    fn new(frame_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            frame_type: frame_type.into(),
            data,
            timestamp: Utc::now(),
            user_id: None,
            session_id: None,
        }
    }
}

/// Client → server frames (§6 "Client frames").
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Heartbeat,
    CursorUpdate { data: serde_json::Value },
    FormUpdate { data: serde_json::Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub session_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            session_buffer: 64,
        }
    }
}

struct Session {
    principal_id: String,
    assessment_id: Option<String>,
    sender: mpsc::Sender<PushFrame>,
    #[allow(dead_code)]
    last_heartbeat: RwLock<Instant>,
}

/// Per-client long-lived push channel manager (C13). Holds no transport
/// details (no websocket frames, no HTTP upgrade) so it can be driven by
/// any front end; `src/bin/server.rs` is the axum-specific adapter.
pub struct ProgressGateway {
    config: GatewayConfig,
    sessions: RwLock<HashMap<SessionId, Session>>,
    rooms: RwLock<HashMap<String, HashSet<SessionId>>>,
    users: RwLock<HashMap<String, HashSet<SessionId>>>,
}

impl ProgressGateway {
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
        })
    }

    /// Registers a new session (§4.6 "On connect"), returning its id and the
    /// receiver the transport adapter forwards to the client. An initial
    /// snapshot frame is left to the caller to push once it has read current
    /// progress from `store`/`cache` (kept out of this module so it stays
    /// transport- and persistence-agnostic).
    pub fn connect(&self, principal_id: impl Into<String>, assessment_id: Option<String>) -> (SessionId, mpsc::Receiver<PushFrame>) {
        let session_id = Uuid::new_v4();
        let principal_id = principal_id.into();
        let (tx, rx) = mpsc::channel(self.config.session_buffer);

        self.sessions.write().insert(
            session_id,
            Session {
                principal_id: principal_id.clone(),
                assessment_id: assessment_id.clone(),
                sender: tx,
                last_heartbeat: RwLock::new(Instant::now()),
            },
        );
        self.users.write().entry(principal_id).or_default().insert(session_id);
        if let Some(room) = &assessment_id {
            self.rooms.write().entry(room.clone()).or_default().insert(session_id);
            self.broadcast_room(
                room,
                PushFrame::new("user_joined", serde_json::json!({"session_id": session_id})),
                Some(session_id),
            );
        }

        info!(%session_id, assessment_id = ?assessment_id, "progress gateway session connected");
        (session_id, rx)
    }

    /// §4.6 "Failure semantics": a send error removes the session.
    pub fn disconnect(&self, session_id: SessionId) {
        let Some(session) = self.sessions.write().remove(&session_id) else {
            return;
        };
        if let Some(users) = self.users.write().get_mut(&session.principal_id) {
            users.remove(&session_id);
        }
        if let Some(room) = &session.assessment_id {
            if let Some(members) = self.rooms.write().get_mut(room) {
                members.remove(&session_id);
            }
            self.broadcast_room(
                room,
                PushFrame::new("user_left", serde_json::json!({"session_id": session_id})),
                None,
            );
        }
        info!(%session_id, "progress gateway session disconnected");
    }

    pub fn room_roster(&self, room: &str) -> Vec<SessionId> {
        self.rooms.read().get(room).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    /// Best-effort send to one session: drops (rather than blocks) on a full
    /// buffer, matching §5's back-pressure rule, and removes the session on
    /// a closed channel.
    fn send_to(&self, session_id: SessionId, frame: PushFrame) {
        let sender = {
            let sessions = self.sessions.read();
            sessions.get(&session_id).map(|s| s.sender.clone())
        };
        let Some(sender) = sender else { return };
        match sender.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%session_id, "progress gateway dropped frame, session buffer full");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.disconnect(session_id);
            }
        }
    }

    /// Re-broadcasts to every session in `room`, optionally excluding the
    /// sender (§4.6: cursor/form updates exclude the originating session).
    pub fn broadcast_room(&self, room: &str, frame: PushFrame, exclude: Option<SessionId>) {
        let members: Vec<SessionId> = self
            .rooms
            .read()
            .get(room)
            .map(|s| s.iter().copied().filter(|id| Some(*id) != exclude).collect())
            .unwrap_or_default();
        for session_id in members {
            self.send_to(session_id, frame.clone());
        }
    }

    pub fn send_to_user(&self, principal_id: &str, frame: PushFrame) {
        let members: Vec<SessionId> = self.users.read().get(principal_id).map(|s| s.iter().copied().collect()).unwrap_or_default();
        for session_id in members {
            self.send_to(session_id, frame.clone());
        }
    }

    /// Dispatches an inbound client frame (§4.6 "From client").
    pub fn handle_client_frame(&self, session_id: SessionId, frame: ClientFrame) {
        match frame {
            ClientFrame::Heartbeat => {
                if let Some(session) = self.sessions.read().get(&session_id) {
                    *session.last_heartbeat.write() = Instant::now();
                }
            }
            ClientFrame::CursorUpdate { data } => self.rebroadcast_from(session_id, "cursor_update", data),
            ClientFrame::FormUpdate { data } => self.rebroadcast_from(session_id, "form_update", data),
        }
    }

    fn rebroadcast_from(&self, session_id: SessionId, frame_type: &str, data: serde_json::Value) {
        let room = self.sessions.read().get(&session_id).and_then(|s| s.assessment_id.clone());
        let Some(room) = room else { return };
        let mut frame = PushFrame::new(frame_type, data);
        frame.session_id = Some(session_id.to_string());
        self.broadcast_room(&room, frame, Some(session_id));
    }

    /// Background heartbeat loop (§4.6 "On idle"): sends a heartbeat to
    /// every session every `heartbeat_interval`, and closes sessions whose
    /// last observed heartbeat response is older than `heartbeat_timeout`.
    pub fn spawn_heartbeat_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.heartbeat_interval);
            loop {
                ticker.tick().await;
                let stale: Vec<SessionId> = {
                    let sessions = this.sessions.read();
                    sessions
                        .iter()
                        .filter(|(_, s)| s.last_heartbeat.read().elapsed() > this.config.heartbeat_timeout)
                        .map(|(id, _)| *id)
                        .collect()
                };
                for session_id in stale {
                    warn!(%session_id, "progress gateway session missed heartbeat deadline, closing");
                    this.disconnect(session_id);
                }

                let ids: Vec<SessionId> = this.sessions.read().keys().copied().collect();
                for session_id in ids {
                    this.send_to(session_id, PushFrame::new("heartbeat", serde_json::json!({})));
                }
            }
        })
    }

    /// Subscribes to the event types §4.6 forwards to clients and relays
    /// each into the room named by its `room_id`/`workflow_id` metadata.
    pub async fn subscribe_events(self: &Arc<Self>, events: &Arc<EventManager>) {
        for event_type in [
            EventType::WorkflowProgress,
            EventType::AgentStatus,
            EventType::StepCompleted,
            EventType::Notification,
            EventType::Alert,
            EventType::MetricsUpdate,
        ] {
            let this = Arc::clone(self);
            let _ = events
                .subscribe(event_type, move |event: Event| {
                    this.relay_event(event);
                })
                .await;
        }
    }

    fn relay_event(&self, event: Event) {
        let room = event
            .metadata
            .get("room_id")
            .or_else(|| event.metadata.get("workflow_id"))
            .cloned();
        let Some(room) = room else { return };
        let frame = PushFrame::new(event_type_frame_name(event.event_type), serde_json::to_value(&event.data).unwrap_or_default());
        self.broadcast_room(&room, frame, None);
    }
}

fn event_type_frame_name(event_type: EventType) -> &'static str {
    match event_type {
        EventType::WorkflowProgress => "workflow_progress",
        EventType::AgentStatus => "agent_status",
        EventType::StepCompleted => "step_completed",
        EventType::Notification => "notification",
        EventType::Alert => "alert",
        EventType::MetricsUpdate => "metrics_update",
        _ => "event",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;

    #[tokio::test]
    async fn connect_joins_room_and_roster_reflects_it() {
        let gateway = ProgressGateway::new(GatewayConfig::default());
        let (session_id, _rx) = gateway.connect("user-1", Some("assessment-1".to_string()));
        assert_eq!(gateway.room_roster("assessment-1"), vec![session_id]);
    }

    #[tokio::test]
    async fn cursor_update_rebroadcasts_excluding_sender() {
        let gateway = ProgressGateway::new(GatewayConfig::default());
        let (sender_id, mut sender_rx) = gateway.connect("user-1", Some("room-a".to_string()));
        let (_receiver_id, mut receiver_rx) = gateway.connect("user-2", Some("room-a".to_string()));

        gateway.handle_client_frame(sender_id, ClientFrame::CursorUpdate { data: serde_json::json!({"x": 1}) });

        let received = receiver_rx.recv().await.unwrap();
        assert_eq!(received.frame_type, "cursor_update");
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_removes_session_from_room() {
        let gateway = ProgressGateway::new(GatewayConfig::default());
        let (session_id, _rx) = gateway.connect("user-1", Some("room-b".to_string()));
        gateway.disconnect(session_id);
        assert!(gateway.room_roster("room-b").is_empty());
    }

    #[tokio::test]
    async fn workflow_progress_event_relays_into_matching_room() {
        let cache = Arc::new(InMemoryCacheBackend::new());
        let events = EventManager::new(cache, "test");
        let gateway = ProgressGateway::new(GatewayConfig::default());
        gateway.subscribe_events(&events).await;
        let (_session_id, mut rx) = gateway.connect("user-1", Some("wf-123".to_string()));

        let mut event = Event::new(EventType::WorkflowProgress, "engine");
        event.metadata.insert("room_id".to_string(), "wf-123".to_string());
        event.data.insert("percentage".to_string(), serde_json::json!(42.0));
        events.publish(event).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(frame.frame_type, "workflow_progress");
    }
}
