//! Builders for events, profiles, and sessions used across tests.

use agentum_policy::{PermissionProfile, SandboxConfig, ToolCategories};
use agentum_types::{
    AgentCompletePayload, AgentEvent, ErrorPayload, EventPayload, MessagePayload, SessionId,
    ToolStartPayload, UserMessagePayload,
};
use chrono::Utc;

pub fn session_id(n: u32) -> SessionId {
    SessionId::parse(&format!("20260105_1234{:02}_deadbeef", n % 60)).expect("fixture id")
}

pub fn event(payload: EventPayload, sequence: u64) -> AgentEvent {
    AgentEvent {
        payload,
        timestamp: Utc::now(),
        sequence,
    }
}

pub fn user_message(text: &str) -> EventPayload {
    EventPayload::UserMessage(UserMessagePayload {
        text: text.to_string(),
    })
}

pub fn partial_message(text: &str) -> EventPayload {
    EventPayload::Message(MessagePayload {
        text: text.to_string(),
        is_partial: true,
        full_text: None,
    })
}

pub fn final_message(text: &str) -> EventPayload {
    EventPayload::Message(MessagePayload {
        text: text.to_string(),
        is_partial: false,
        full_text: Some(text.to_string()),
    })
}

pub fn tool_start(tool: &str, command: &str) -> EventPayload {
    EventPayload::ToolStart(ToolStartPayload {
        tool_name: tool.to_string(),
        tool_input: serde_json::json!({ "command": command }),
        tool_id: "t_fixture".to_string(),
    })
}

pub fn agent_complete() -> EventPayload {
    EventPayload::AgentComplete(AgentCompletePayload {
        status: "complete".to_string(),
        num_turns: 1,
        duration_ms: 10,
        total_cost_usd: 0.0,
        usage: serde_json::json!({}),
        model: "test-model".to_string(),
    })
}

pub fn error_event(error_type: &str) -> EventPayload {
    EventPayload::Error(ErrorPayload {
        message: format!("fixture {}", error_type),
        error_type: error_type.to_string(),
    })
}

/// A permissive profile that still denies destructive shell commands.
pub fn default_profile() -> PermissionProfile {
    PermissionProfile {
        tools: ToolCategories {
            enabled: vec!["Bash".into(), "Read".into(), "Write".into()],
            disabled: vec![],
            permission_checked: vec!["Bash".into()],
            pre_approved: vec!["Read".into()],
        },
        allow: vec!["Bash(*)".into(), "Write({workspace}/**)".into()],
        deny: vec!["Bash(rm *)".into()],
        denial_interrupt_threshold: 3,
    }
}

/// Sandbox disabled: supervisor tests exercise the direct spawn path.
pub fn sandbox_disabled() -> SandboxConfig {
    SandboxConfig {
        enabled: false,
        ..SandboxConfig::default()
    }
}

/// Sandbox required but pointing at a binary that does not exist, for
/// fail-closed tests.
pub fn sandbox_missing_binary() -> SandboxConfig {
    SandboxConfig {
        enabled: true,
        bwrap_path: std::path::PathBuf::from("/nonexistent/bwrap"),
        ..SandboxConfig::default()
    }
}
