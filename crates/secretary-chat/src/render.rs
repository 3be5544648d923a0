// ABOUTME: Plain-text rendering of session state for the terminal
// ABOUTME: Pure formatters for messages, actions, clarification prompts, pipeline, and events

use secretary_client::{
    ActionStatus, ChatAction, ChatEvent, ChatMessage, ConnectionStatus, PendingRequest,
    PipelineState, Role, RouteSource, Stage, StageStatus,
};
use serde_json::Value;

pub fn status_line(status: ConnectionStatus, error: Option<&str>) -> String {
    let label = match status {
        ConnectionStatus::Disconnected => "disconnected",
        ConnectionStatus::Connecting => "connecting...",
        ConnectionStatus::Connected => "connected",
        ConnectionStatus::Error => "connection error",
    };
    match error {
        Some(error) => format!("[{}] {}", label, error),
        None => format!("[{}]", label),
    }
}

fn stage_label(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Idle => "idle",
        StageStatus::Active => "active",
        StageStatus::Done => "done",
    }
}

pub fn pipeline_line(pipeline: &PipelineState) -> String {
    [
        ("router", Stage::Router),
        ("domain", Stage::Domain),
        ("tools", Stage::Tools),
    ]
    .iter()
    .map(|(name, stage)| format!("{}={}", name, stage_label(pipeline.stage(*stage))))
    .collect::<Vec<_>>()
    .join(" ")
}

/// Prompt shown while the backend is still collecting fields.
pub fn pending_prompt(pending: &PendingRequest) -> String {
    let mut line = format!(
        "[{} request, {}] still needed: {}",
        pending.request_type,
        pending.domain,
        pending.missing.join(", ")
    );
    let filled: Vec<String> = pending
        .filled
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| format!("{}={}", k, scalar(v)))
        .collect();
    if !filled.is_empty() {
        line.push_str(&format!(" (have {})", filled.join(", ")));
    }
    line
}

fn action_status(status: ActionStatus) -> &'static str {
    match status {
        ActionStatus::Running => "running",
        ActionStatus::Submitted => "submitted",
        ActionStatus::Completed => "completed",
        ActionStatus::Skipped => "skipped",
        ActionStatus::Failed => "failed",
        ActionStatus::Unknown => "unknown",
    }
}

pub fn action_line(action: &ChatAction) -> String {
    match &action.error {
        Some(error) => format!(
            "  - {}: {} ({})",
            action.action_type,
            action_status(action.status),
            error
        ),
        None => format!("  - {}: {}", action.action_type, action_status(action.status)),
    }
}

pub fn message_line(message: &ChatMessage) -> String {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "agent",
    };
    let mut line = format!(
        "{} {}> {}",
        message.created_at.format("%H:%M:%S"),
        who,
        message.content
    );
    if let Some(error) = &message.error {
        line.push_str(&format!(" [interrupted: {}]", error));
    }
    line
}

/// One-line summary of a logged event.
pub fn event_line(event: &ChatEvent) -> String {
    match event {
        ChatEvent::AgentStarted { agent, domain } => match domain {
            Some(domain) => format!("agent_started {} ({})", agent, domain),
            None => format!("agent_started {}", agent),
        },
        ChatEvent::AgentFinished { agent, domain } => match domain {
            Some(domain) => format!("agent_finished {} ({})", agent, domain),
            None => format!("agent_finished {}", agent),
        },
        ChatEvent::RouterDecision {
            domain,
            sensitivity,
            source,
        } => {
            let source = match source {
                RouteSource::Llm => "llm",
                RouteSource::Default => "default",
                RouteSource::Pending => "pending",
            };
            match sensitivity {
                Some(s) => format!("routed to {} via {} (sensitivity {})", domain, source, s),
                None => format!("routed to {} via {}", domain, source),
            }
        }
        ChatEvent::GuardrailBlocked { reason } => format!("guardrail blocked: {}", reason),
        ChatEvent::ToolCall { service, path } => match path {
            Some(path) => format!("tool_call {} {}", service, path),
            None => format!("tool_call {}", service),
        },
        ChatEvent::ToolResult { service, result } => {
            format!("tool_result {} {}", service, scalar(result))
        }
        ChatEvent::ToolError { service, error } => format!("tool_error {}: {}", service, error),
        ChatEvent::Token { text } => format!("token {:?}", text),
        ChatEvent::PendingRequest { pending } => match pending {
            Some(p) => format!(
                "pending_request {} missing [{}]",
                p.request_type,
                p.missing.join(", ")
            ),
            None => "pending_request cleared".to_string(),
        },
        ChatEvent::Done(_) => "done".to_string(),
        ChatEvent::Error { message } => format!("error: {}", message),
        ChatEvent::Other { kind, data } => format!("{} {}", kind, scalar(data)),
    }
}

/// Strings print bare; everything else as compact JSON.
fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
