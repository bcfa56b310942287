use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// §4.4's enumerated event types: the original orchestration set plus the
/// transport events the progress gateway (C13) needs, grounded on
/// `orchestration/events.py::EventType` and the websocket frame types the
/// original API layer emits alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentStarted,
    AgentCompleted,
    AgentFailed,
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    DataUpdated,
    UserInputReceived,
    RecommendationGenerated,
    ReportGenerated,
    Notification,
    Alert,
    UserJoined,
    UserLeft,
    CursorUpdate,
    FormUpdate,
    Heartbeat,
    Error,
    MetricsUpdate,
    WorkflowProgress,
    AgentStatus,
    StepCompleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub producer: String,
    pub timestamp: DateTime<Utc>,
    pub data: HashMap<String, serde_json::Value>,
    pub metadata: HashMap<String, String>,
}

impl Event {
    pub fn new(event_type: EventType, producer: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            producer: producer.into(),
            timestamp: Utc::now(),
            data: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.metadata.insert("workflow_id".to_string(), workflow_id.into());
        self
    }

    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.metadata.insert("room_id".to_string(), room_id.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}
