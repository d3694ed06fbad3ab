//! Interview session domain type

use nexusstore::{SessionRow, now_ms};
use serde::{Deserialize, Serialize};

use super::id::generate_id;
use super::project::ProjectMode;
use super::requirement::Requirement;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Paused,
    Completed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// A chat message within an interview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            at: now_ms(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            at: now_ms(),
        }
    }
}

/// One requirements-gathering conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewSession {
    pub id: String,
    pub project_id: String,
    pub status: SessionStatus,
    pub mode: ProjectMode,
    pub messages: Vec<ChatMessage>,
    pub extracted_requirements: Vec<Requirement>,
    pub explored_areas: Vec<String>,
    pub started_at: i64,
    pub last_activity_at: i64,
    pub completed_at: Option<i64>,
}

impl InterviewSession {
    /// Start a new active session
    pub fn new(project_id: impl Into<String>, mode: ProjectMode) -> Self {
        let project_id = project_id.into();
        let now = now_ms();
        Self {
            id: generate_id("session", &project_id),
            project_id,
            status: SessionStatus::Active,
            mode,
            messages: Vec::new(),
            extracted_requirements: Vec::new(),
            explored_areas: Vec::new(),
            started_at: now,
            last_activity_at: now,
            completed_at: None,
        }
    }

    /// Append a message and bump activity
    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.last_activity_at = now_ms();
    }

    /// Record an explored area once
    pub fn note_area(&mut self, area: &str) {
        let area = area.trim().to_lowercase();
        if !area.is_empty() && !self.explored_areas.iter().any(|a| a == &area) {
            self.explored_areas.push(area);
        }
    }

    /// Mark the session completed
    pub fn complete(&mut self) {
        self.status = SessionStatus::Completed;
        let now = now_ms();
        self.completed_at = Some(now);
        self.last_activity_at = now;
    }

    /// Session duration in milliseconds so far (or until completion)
    pub fn duration_ms(&self) -> i64 {
        self.completed_at.unwrap_or_else(now_ms) - self.started_at
    }

    /// Convert to a storage row; the full session serializes into `state_data`
    pub fn to_row(&self) -> Result<SessionRow, serde_json::Error> {
        Ok(SessionRow {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            status: self.status.to_string(),
            mode: self.mode.to_string(),
            state_data: serde_json::to_string(self)?,
            started_at: self.started_at,
            last_activity_at: self.last_activity_at,
        })
    }

    /// Rebuild from a storage row
    pub fn from_row(row: &SessionRow) -> Result<Self, serde_json::Error> {
        serde_json::from_str(&row.state_data)
    }
}
