// ABOUTME: Wire codec for the agent stream
// ABOUTME: Decodes JSON-tagged backend frames into ChatEvent and encodes outbound user messages

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SessionError;
use crate::models::{ActionStatus, ChatAction, PendingRequest};

/// How the router picked the domain for a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    /// Classified by the model
    Llm,
    /// Classifier gave no usable answer
    Default,
    /// Continued from an open clarification
    Pending,
}

/// What the backend says about clarification state when a turn ends
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingUpdate {
    /// Payload carried no `pending_request` key
    Unchanged,
    /// Payload carried `pending_request: null`
    Cleared,
    Replaced(PendingRequest),
}

/// Payload of the end-of-turn event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub message: Option<String>,
    pub actions: Option<Vec<ChatAction>>,
    pub pending: PendingUpdate,
}

impl TurnOutcome {
    /// An end-of-turn with no payload at all.
    pub fn empty() -> Self {
        Self {
            message: None,
            actions: None,
            pending: PendingUpdate::Unchanged,
        }
    }

    fn from_map(map: &Map<String, Value>) -> Result<Self, SessionError> {
        let message = map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);

        let actions = match map.get("actions") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(parse_action)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some(other) => {
                return Err(SessionError::MalformedEvent(format!(
                    "actions must be an array, got {}",
                    other
                )))
            }
        };

        let pending = match map.get("pending_request") {
            None => PendingUpdate::Unchanged,
            Some(Value::Null) => PendingUpdate::Cleared,
            Some(value) => PendingUpdate::Replaced(serde_json::from_value(value.clone())?),
        };

        Ok(Self {
            message,
            actions,
            pending,
        })
    }
}

/// A lifecycle signal received from the agent stream.
///
/// Every wire `type` the backend emits maps to exactly one variant; unknown
/// types land in [`ChatEvent::Other`] so they still reach the event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    AgentStarted {
        agent: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        domain: Option<String>,
    },
    AgentFinished {
        agent: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        domain: Option<String>,
    },
    RouterDecision {
        domain: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sensitivity: Option<String>,
        source: RouteSource,
    },
    GuardrailBlocked {
        reason: String,
    },
    ToolCall {
        service: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    ToolResult {
        service: String,
        result: Value,
    },
    ToolError {
        service: String,
        error: String,
    },
    Token {
        text: String,
    },
    PendingRequest {
        pending: Option<PendingRequest>,
    },
    Done(TurnOutcome),
    Error {
        message: String,
    },
    Other {
        kind: String,
        data: Value,
    },
}

impl ChatEvent {
    /// Decode one text frame from the stream.
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        let frame: Map<String, Value> = serde_json::from_str(text)?;
        let kind = frame
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SessionError::MalformedEvent("frame has no string `type`".into()))?;
        let data = frame.get("data").cloned().unwrap_or(Value::Null);
        Self::from_parts(kind, data, &frame)
    }

    /// Build an event from its tag and payload. `frame` is the whole object,
    /// consulted for fields the backend sends at the top level.
    pub fn from_parts(
        kind: &str,
        data: Value,
        frame: &Map<String, Value>,
    ) -> Result<Self, SessionError> {
        let event = match kind {
            "agent_started" => ChatEvent::AgentStarted {
                agent: required_str(kind, &data, "agent")?,
                domain: optional_str(&data, "domain"),
            },
            "agent_finished" => ChatEvent::AgentFinished {
                agent: required_str(kind, &data, "agent")?,
                domain: optional_str(&data, "domain"),
            },
            "router_classified_llm" | "router_classified_default" | "router_pending" => {
                let source = match kind {
                    "router_classified_llm" => RouteSource::Llm,
                    "router_pending" => RouteSource::Pending,
                    _ => RouteSource::Default,
                };
                ChatEvent::RouterDecision {
                    domain: optional_str(&data, "domain").unwrap_or_else(|| "generic".into()),
                    sensitivity: optional_str(&data, "sensitivity"),
                    source,
                }
            }
            "guardrail_blocked" => ChatEvent::GuardrailBlocked {
                reason: optional_str(&data, "reason").unwrap_or_else(|| "blocked".into()),
            },
            "tool_call" => ChatEvent::ToolCall {
                service: required_str(kind, &data, "service")?,
                path: optional_str(&data, "path"),
            },
            "tool_result" => ChatEvent::ToolResult {
                service: required_str(kind, &data, "service")?,
                result: data.get("result").cloned().unwrap_or(Value::Null),
            },
            "tool_error" => ChatEvent::ToolError {
                service: required_str(kind, &data, "service")?,
                error: optional_str(&data, "error").unwrap_or_default(),
            },
            "token" | "token_delta" => ChatEvent::Token {
                text: token_text(&data)?,
            },
            "pending_request" => ChatEvent::PendingRequest {
                pending: match data {
                    Value::Null => None,
                    value => Some(serde_json::from_value(value)?),
                },
            },
            "done" | "final_response" => {
                let outcome = match &data {
                    Value::Object(map) => TurnOutcome::from_map(map)?,
                    _ => TurnOutcome::from_map(frame)?,
                };
                ChatEvent::Done(outcome)
            }
            "error" => ChatEvent::Error {
                message: error_message(&data, frame),
            },
            other => ChatEvent::Other {
                kind: other.to_string(),
                data,
            },
        };
        Ok(event)
    }

    /// The wire-level name of this event, for diagnostics.
    pub fn kind(&self) -> &str {
        match self {
            ChatEvent::AgentStarted { .. } => "agent_started",
            ChatEvent::AgentFinished { .. } => "agent_finished",
            ChatEvent::RouterDecision { .. } => "router_decision",
            ChatEvent::GuardrailBlocked { .. } => "guardrail_blocked",
            ChatEvent::ToolCall { .. } => "tool_call",
            ChatEvent::ToolResult { .. } => "tool_result",
            ChatEvent::ToolError { .. } => "tool_error",
            ChatEvent::Token { .. } => "token",
            ChatEvent::PendingRequest { .. } => "pending_request",
            ChatEvent::Done(_) => "done",
            ChatEvent::Error { .. } => "error",
            ChatEvent::Other { kind, .. } => kind,
        }
    }

    /// Tokens are folded into the accumulator instead of the event log.
    pub fn is_logged(&self) -> bool {
        !matches!(self, ChatEvent::Token { .. })
    }
}

/// Frames the client writes to the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    UserMessage {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tenant_id: Option<String>,
    },
}

impl ClientFrame {
    pub fn encode(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string(self)?)
    }
}

fn optional_str(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

fn required_str(kind: &str, data: &Value, key: &str) -> Result<String, SessionError> {
    optional_str(data, key)
        .ok_or_else(|| SessionError::MalformedEvent(format!("{} event missing `{}`", kind, key)))
}

fn token_text(data: &Value) -> Result<String, SessionError> {
    match data {
        Value::String(text) => Ok(text.clone()),
        Value::Object(_) => ["text", "token", "content"]
            .iter()
            .find_map(|key| optional_str(data, key))
            .ok_or_else(|| SessionError::MalformedEvent("token event has no text".into())),
        other => Err(SessionError::MalformedEvent(format!(
            "token payload must be a string, got {}",
            other
        ))),
    }
}

fn error_message(data: &Value, frame: &Map<String, Value>) -> String {
    match data {
        Value::String(message) => message.clone(),
        _ => optional_str(data, "message")
            .or_else(|| {
                frame
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "unknown agent error".to_string()),
    }
}

fn parse_action(value: &Value) -> Result<ChatAction, SessionError> {
    let action_type = required_str("action", value, "type")?;
    let status = value
        .get("status")
        .and_then(Value::as_str)
        .map(ActionStatus::from_backend)
        .unwrap_or(ActionStatus::Unknown);

    Ok(ChatAction {
        action_type,
        status,
        payload: value.get("payload").filter(|v| !v.is_null()).cloned(),
        result: value.get("result").filter(|v| !v.is_null()).cloned(),
        error: optional_str(value, "error"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> ChatEvent {
        ChatEvent::parse(&value.to_string()).unwrap()
    }

    #[test]
    fn test_parse_agent_lifecycle() {
        let started = parse(json!({"type": "agent_started", "data": {"agent": "RouterAgent"}}));
        assert_eq!(
            started,
            ChatEvent::AgentStarted {
                agent: "RouterAgent".into(),
                domain: None
            }
        );

        let finished = parse(json!({
            "type": "agent_finished",
            "data": {"agent": "DomainAgent", "domain": "ops"}
        }));
        assert_eq!(
            finished,
            ChatEvent::AgentFinished {
                agent: "DomainAgent".into(),
                domain: Some("ops".into())
            }
        );
    }

    #[test]
    fn test_parse_router_decisions() {
        let llm = parse(json!({
            "type": "router_classified_llm",
            "data": {"domain": "hr", "sensitivity": "normal"}
        }));
        assert_eq!(
            llm,
            ChatEvent::RouterDecision {
                domain: "hr".into(),
                sensitivity: Some("normal".into()),
                source: RouteSource::Llm
            }
        );

        let fallback = parse(json!({"type": "router_classified_default", "data": {}}));
        assert!(matches!(
            fallback,
            ChatEvent::RouterDecision { ref domain, source: RouteSource::Default, .. } if domain == "generic"
        ));

        let pending = parse(json!({"type": "router_pending", "data": {"domain": "ops"}}));
        assert!(matches!(
            pending,
            ChatEvent::RouterDecision { source: RouteSource::Pending, .. }
        ));
    }

    #[test]
    fn test_parse_tool_events() {
        let call = parse(json!({
            "type": "tool_call",
            "data": {"service": "leave", "path": "/requests"}
        }));
        assert_eq!(
            call,
            ChatEvent::ToolCall {
                service: "leave".into(),
                path: Some("/requests".into())
            }
        );

        let result = parse(json!({
            "type": "tool_result",
            "data": {"service": "leave", "result": {"status": "submitted"}}
        }));
        assert!(matches!(
            result,
            ChatEvent::ToolResult { ref result, .. } if result["status"] == "submitted"
        ));

        let error = parse(json!({
            "type": "tool_error",
            "data": {"service": "leave", "error": "timeout"}
        }));
        assert_eq!(
            error,
            ChatEvent::ToolError {
                service: "leave".into(),
                error: "timeout".into()
            }
        );
    }

    #[test]
    fn test_parse_token_delta_string_payload() {
        let token = parse(json!({"type": "token_delta", "data": "Hello "}));
        assert_eq!(
            token,
            ChatEvent::Token {
                text: "Hello ".into()
            }
        );
    }

    #[test]
    fn test_parse_token_object_payload() {
        let token = parse(json!({"type": "token", "data": {"text": "with that."}}));
        assert_eq!(
            token,
            ChatEvent::Token {
                text: "with that.".into()
            }
        );
    }

    #[test]
    fn test_parse_token_rejects_numbers() {
        let err = ChatEvent::parse(r#"{"type": "token", "data": 42}"#).unwrap_err();
        assert!(matches!(err, SessionError::MalformedEvent(_)));
    }

    #[test]
    fn test_parse_pending_request() {
        let event = parse(json!({
            "type": "pending_request",
            "data": {
                "domain": "ops",
                "type": "travel",
                "filled": {},
                "missing": ["origin", "destination"]
            }
        }));
        match event {
            ChatEvent::PendingRequest {
                pending: Some(pending),
            } => assert_eq!(pending.missing, vec!["origin", "destination"]),
            other => panic!("expected pending request, got {:?}", other),
        }

        let cleared = parse(json!({"type": "pending_request", "data": null}));
        assert_eq!(cleared, ChatEvent::PendingRequest { pending: None });
    }

    #[test]
    fn test_parse_final_response_top_level_fields() {
        let event = parse(json!({
            "type": "final_response",
            "message": "Leave request captured.",
            "actions": [{"type": "leave_request", "status": "submitted", "payload": {"leave_type": "sick"}}],
            "pending_request": null
        }));

        let ChatEvent::Done(outcome) = event else {
            panic!("expected done");
        };
        assert_eq!(outcome.message.as_deref(), Some("Leave request captured."));
        let actions = outcome.actions.unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, "leave_request");
        assert_eq!(actions[0].status, ActionStatus::Submitted);
        assert_eq!(outcome.pending, PendingUpdate::Cleared);
    }

    #[test]
    fn test_parse_done_without_payload() {
        let event = parse(json!({"type": "done"}));
        assert_eq!(event, ChatEvent::Done(TurnOutcome::empty()));
    }

    #[test]
    fn test_parse_done_with_open_pending_in_data() {
        let event = parse(json!({
            "type": "done",
            "data": {
                "pending_request": {
                    "domain": "hr",
                    "type": "leave",
                    "filled": {"leave_type": "sick"},
                    "missing": ["start_date", "end_date"]
                }
            }
        }));
        let ChatEvent::Done(outcome) = event else {
            panic!("expected done");
        };
        assert!(matches!(outcome.pending, PendingUpdate::Replaced(ref p) if p.is_open()));
    }

    #[test]
    fn test_parse_error_variants() {
        let from_string = parse(json!({"type": "error", "data": "backend exploded"}));
        assert_eq!(
            from_string,
            ChatEvent::Error {
                message: "backend exploded".into()
            }
        );

        let from_object = parse(json!({"type": "error", "data": {"message": "rate limited"}}));
        assert_eq!(
            from_object,
            ChatEvent::Error {
                message: "rate limited".into()
            }
        );

        let top_level = parse(json!({"type": "error", "message": "nope"}));
        assert_eq!(
            top_level,
            ChatEvent::Error {
                message: "nope".into()
            }
        );
    }

    #[test]
    fn test_parse_unknown_type_is_kept() {
        let event = parse(json!({"type": "heartbeat", "data": {"n": 1}}));
        assert_eq!(event.kind(), "heartbeat");
        assert!(event.is_logged());
    }

    #[test]
    fn test_parse_malformed_frames() {
        assert!(ChatEvent::parse("not json").is_err());
        assert!(ChatEvent::parse("[1, 2, 3]").is_err());
        assert!(ChatEvent::parse(r#"{"data": {}}"#).is_err());
        assert!(ChatEvent::parse(r#"{"type": "agent_started", "data": {}}"#).is_err());
        assert!(ChatEvent::parse(r#"{"type": "final_response", "actions": "many"}"#).is_err());
    }

    #[test]
    fn test_tokens_are_not_logged() {
        let token = ChatEvent::Token { text: "x".into() };
        assert!(!token.is_logged());
        assert_eq!(token.kind(), "token");
    }

    #[test]
    fn test_client_frame_encoding() {
        let frame = ClientFrame::UserMessage {
            message: "book a flight".into(),
            tenant_id: None,
        };
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "user_message", "message": "book a flight"}));

        let with_tenant = ClientFrame::UserMessage {
            message: "hi".into(),
            tenant_id: Some("acme".into()),
        };
        let value: Value = serde_json::from_str(&with_tenant.encode().unwrap()).unwrap();
        assert_eq!(value["tenant_id"], "acme");
    }
}
