use crate::id::SessionId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of user identity; `anonymous` is the only current value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Anonymous,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Anonymous => "anonymous",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub user_type: UserType,
    pub created_at: DateTime<Utc>,
}

/// Session run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Complete => "complete",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(SessionStatus::Pending),
            "running" => Some(SessionStatus::Running),
            "complete" => Some(SessionStatus::Complete),
            "failed" => Some(SessionStatus::Failed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Complete | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    /// `pending -> running` is the only non-terminal transition; every
    /// other legal transition lands in a terminal state.
    pub fn can_transition_to(&self, to: SessionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, to) {
            (SessionStatus::Pending, SessionStatus::Running) => true,
            (_, target) => target.is_terminal(),
        }
    }

    pub fn validate_transition(&self, to: SessionStatus) -> Result<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One user-initiated task run (or chain of resumed runs sharing identity)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: String,
    pub status: SessionStatus,
    pub task: String,
    pub model: String,
    pub working_dir: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub num_turns: u64,
    pub duration_ms: u64,
    pub total_cost_usd: f64,
    pub cancel_requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_id: Option<String>,
}
