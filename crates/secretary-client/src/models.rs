// ABOUTME: Data models for secretary-client
// ABOUTME: ChatMessage, PendingRequest, ChatAction, ConnectionStatus, and the read-only snapshot

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::ChatEvent;
use crate::pipeline::PipelineState;

/// Author of a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A finalized turn in the transcript. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Clarification state as it stood when this message was finalized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_request: Option<PendingRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ChatAction>,
    /// Set when the turn was abandoned (error event, stall, lost connection)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatMessage {
    pub fn user(content: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: format!("user-{}", uuid::Uuid::new_v4()),
            role: Role::User,
            content,
            created_at,
            pending_request: None,
            actions: vec![],
            error: None,
        }
    }

    pub fn assistant(
        content: String,
        created_at: DateTime<Utc>,
        actions: Vec<ChatAction>,
        pending_request: Option<PendingRequest>,
    ) -> Self {
        Self {
            id: format!("assistant-{}", uuid::Uuid::new_v4()),
            role: Role::Assistant,
            content,
            created_at,
            pending_request,
            actions,
            error: None,
        }
    }

    /// Assistant entry for a turn that did not complete.
    pub fn interrupted(
        content: String,
        created_at: DateTime<Utc>,
        actions: Vec<ChatAction>,
        error: String,
    ) -> Self {
        Self {
            error: Some(error),
            ..Self::assistant(content, created_at, actions, None)
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Structured clarification state for a workflow request the backend is still filling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub domain: String,
    #[serde(rename = "type")]
    pub request_type: String,
    #[serde(default)]
    pub filled: BTreeMap<String, Value>,
    #[serde(default)]
    pub missing: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
}

impl PendingRequest {
    /// True while the backend still needs fields for this request.
    pub fn is_open(&self) -> bool {
        !self.missing.is_empty()
    }

    /// The field the backend will ask about next.
    pub fn next_missing(&self) -> Option<&str> {
        self.missing.first().map(String::as_str)
    }
}

/// Progress of a tool invocation attached to a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Running,
    Submitted,
    Completed,
    Skipped,
    Failed,
    #[serde(other)]
    Unknown,
}

impl ActionStatus {
    /// Map the backend's free-form status string.
    pub fn from_backend(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "running" | "pending" => ActionStatus::Running,
            "submitted" => ActionStatus::Submitted,
            "ok" | "completed" | "done" => ActionStatus::Completed,
            "skipped" => ActionStatus::Skipped,
            "failed" | "error" => ActionStatus::Failed,
            _ => ActionStatus::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ActionStatus::Running)
    }
}

/// A tool invocation associated with one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatAction {
    pub fn running(action_type: String, payload: Option<Value>) -> Self {
        Self {
            action_type,
            status: ActionStatus::Running,
            payload,
            result: None,
            error: None,
        }
    }
}

/// Connection status of the session's transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Read-only view of a session handed to the presentation layer
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub messages: Vec<ChatMessage>,
    pub streaming_text: String,
    pub pending_request: Option<PendingRequest>,
    pub connecting: bool,
    pub connection_error: Option<String>,
    pub events: Vec<ChatEvent>,
    pub status: ConnectionStatus,
    pub is_streaming: bool,
    pub pipeline: PipelineState,
}
