use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of agent event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentStart,
    UserMessage,
    Thinking,
    Message,
    ToolStart,
    ToolComplete,
    OutputDisplay,
    AgentComplete,
    MetricsUpdate,
    Error,
    Cancelled,
    ConversationTurn,
    ProfileSwitch,
    HookTriggered,
    SessionConnect,
    SessionDisconnect,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AgentStart => "agent_start",
            EventKind::UserMessage => "user_message",
            EventKind::Thinking => "thinking",
            EventKind::Message => "message",
            EventKind::ToolStart => "tool_start",
            EventKind::ToolComplete => "tool_complete",
            EventKind::OutputDisplay => "output_display",
            EventKind::AgentComplete => "agent_complete",
            EventKind::MetricsUpdate => "metrics_update",
            EventKind::Error => "error",
            EventKind::Cancelled => "cancelled",
            EventKind::ConversationTurn => "conversation_turn",
            EventKind::ProfileSwitch => "profile_switch",
            EventKind::HookTriggered => "hook_triggered",
            EventKind::SessionConnect => "session_connect",
            EventKind::SessionDisconnect => "session_disconnect",
        }
    }

    /// Terminal kinds signal end-of-stream to the hub.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::AgentComplete | EventKind::Error | EventKind::Cancelled
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event record as it travels through the hub and over the wire.
///
/// The payload is adjacently tagged so the serialized shape is exactly
/// `{"type": <kind>, "data": {...}, "timestamp": ..., "sequence": N}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(flatten)]
    pub payload: EventPayload,

    /// Event timestamp (UTC)
    pub timestamp: DateTime<Utc>,

    /// Per-session monotonic sequence, assigned by the hub, always >= 1
    pub sequence: u64,
}

impl AgentEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn is_terminal(&self) -> bool {
        self.payload.kind().is_terminal()
    }

    /// Partial `message` fragments are fanned out but never persisted.
    pub fn is_persistable(&self) -> bool {
        self.payload.is_persistable()
    }
}

/// Event payload variants, one per kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    /// Agent process came up and reported its configuration
    AgentStart(AgentStartPayload),

    /// Task text submitted by the user
    UserMessage(UserMessagePayload),

    /// Assistant reasoning content
    Thinking(ThinkingPayload),

    /// Assistant text; streamed as partials, finalized with `full_text`
    Message(MessagePayload),

    /// Tool invocation started
    ToolStart(ToolStartPayload),

    /// Tool invocation finished
    ToolComplete(ToolCompletePayload),

    /// Structured task output for display
    OutputDisplay(OutputDisplayPayload),

    /// Terminal: agent finished its run
    AgentComplete(AgentCompletePayload),

    /// Incremental usage/cost counters
    MetricsUpdate(MetricsUpdatePayload),

    /// Terminal: the run failed
    Error(ErrorPayload),

    /// Terminal: the run was cancelled by the caller
    Cancelled(CancelledPayload),

    /// Summary of one conversation turn
    ConversationTurn(ConversationTurnPayload),

    /// Agent switched permission profile mid-run
    ProfileSwitch(ProfileSwitchPayload),

    /// A host-side hook fired
    HookTriggered(HookTriggeredPayload),

    /// A streaming subscriber attached
    SessionConnect(SessionConnectPayload),

    /// A streaming subscriber detached
    SessionDisconnect(SessionDisconnectPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::AgentStart(_) => EventKind::AgentStart,
            EventPayload::UserMessage(_) => EventKind::UserMessage,
            EventPayload::Thinking(_) => EventKind::Thinking,
            EventPayload::Message(_) => EventKind::Message,
            EventPayload::ToolStart(_) => EventKind::ToolStart,
            EventPayload::ToolComplete(_) => EventKind::ToolComplete,
            EventPayload::OutputDisplay(_) => EventKind::OutputDisplay,
            EventPayload::AgentComplete(_) => EventKind::AgentComplete,
            EventPayload::MetricsUpdate(_) => EventKind::MetricsUpdate,
            EventPayload::Error(_) => EventKind::Error,
            EventPayload::Cancelled(_) => EventKind::Cancelled,
            EventPayload::ConversationTurn(_) => EventKind::ConversationTurn,
            EventPayload::ProfileSwitch(_) => EventKind::ProfileSwitch,
            EventPayload::HookTriggered(_) => EventKind::HookTriggered,
            EventPayload::SessionConnect(_) => EventKind::SessionConnect,
            EventPayload::SessionDisconnect(_) => EventKind::SessionDisconnect,
        }
    }

    pub fn is_persistable(&self) -> bool {
        match self {
            EventPayload::Message(m) => !m.is_partial,
            _ => true,
        }
    }
}

// --- Payload Definitions ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStartPayload {
    pub session_id: String,
    pub model: String,
    pub tools: Vec<String>,
    pub working_dir: String,
    pub task: String,
    /// Opaque continuation token the agent hands back; persisting it
    /// immediately keeps cancelled runs resumable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessagePayload {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingPayload {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Delta text for partials, final text otherwise
    pub text: String,

    #[serde(default)]
    pub is_partial: bool,

    /// Concatenated total, present only on the finalized message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStartPayload {
    pub tool_name: String,
    pub tool_input: Value,
    pub tool_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCompletePayload {
    pub tool_name: String,
    pub tool_id: String,
    pub result: Value,
    pub duration_ms: u64,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDisplayPayload {
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default)]
    pub result_files: Vec<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCompletePayload {
    pub status: String,
    pub num_turns: u64,
    pub duration_ms: u64,
    pub total_cost_usd: f64,
    pub usage: Value,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsUpdatePayload {
    pub turns: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub total_cost_usd: f64,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    pub error_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelledPayload {
    pub message: String,
    pub resumable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurnPayload {
    pub turn_number: u64,
    pub prompt_preview: String,
    pub response_preview: String,
    pub duration_ms: u64,
    pub tools_used: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSwitchPayload {
    pub profile: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookTriggeredPayload {
    pub hook: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConnectPayload {
    pub subscribers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDisconnectPayload {
    pub subscribers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(payload: EventPayload, sequence: u64) -> AgentEvent {
        AgentEvent {
            payload,
            timestamp: "2026-01-05T12:34:56.789Z".parse().unwrap(),
            sequence,
        }
    }

    #[test]
    fn test_wire_shape() {
        let ev = event(
            EventPayload::ToolStart(ToolStartPayload {
                tool_name: "Read".to_string(),
                tool_input: serde_json::json!({"file_path": "./x.py"}),
                tool_id: "t_1".to_string(),
            }),
            42,
        );

        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["type"], "tool_start");
        assert_eq!(value["data"]["tool_name"], "Read");
        assert_eq!(value["sequence"], 42);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_round_trip() {
        let ev = event(
            EventPayload::Message(MessagePayload {
                text: "done".to_string(),
                is_partial: false,
                full_text: Some("all done".to_string()),
            }),
            7,
        );

        let json = serde_json::to_string(&ev).unwrap();
        let back: AgentEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sequence, 7);
        match back.payload {
            EventPayload::Message(m) => {
                assert!(!m.is_partial);
                assert_eq!(m.full_text.as_deref(), Some("all done"));
            }
            _ => panic!("wrong payload kind"),
        }
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(EventKind::AgentComplete.is_terminal());
        assert!(EventKind::Error.is_terminal());
        assert!(EventKind::Cancelled.is_terminal());
        assert!(!EventKind::Message.is_terminal());
        assert!(!EventKind::ToolStart.is_terminal());
    }

    #[test]
    fn test_partial_message_not_persistable() {
        let partial = EventPayload::Message(MessagePayload {
            text: "frag".to_string(),
            is_partial: true,
            full_text: None,
        });
        let final_msg = EventPayload::Message(MessagePayload {
            text: "frag ment".to_string(),
            is_partial: false,
            full_text: Some("frag ment".to_string()),
        });

        assert!(!partial.is_persistable());
        assert!(final_msg.is_persistable());
        assert!(
            EventPayload::Error(ErrorPayload {
                message: "boom".to_string(),
                error_type: "child_crash".to_string(),
            })
            .is_persistable()
        );
    }
}
