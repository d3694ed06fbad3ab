//! Human review domain type

use nexusstore::{ReviewRow, now_ms};
use serde::{Deserialize, Serialize};

use super::id::generate_id;

/// Why a review was requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    QaExhausted,
    MergeConflict,
    Other(String),
}

impl std::fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QaExhausted => write!(f, "qa_exhausted"),
            Self::MergeConflict => write!(f, "merge_conflict"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

impl ReviewReason {
    pub fn parse(s: &str) -> Self {
        match s {
            "qa_exhausted" => Self::QaExhausted,
            "merge_conflict" => Self::MergeConflict,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Review decision state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// A human-gated decision resolving an escalation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub task_id: String,
    pub project_id: String,
    pub reason: ReviewReason,
    pub context: String,
    pub status: ReviewStatus,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
    pub resolution: Option<String>,
}

impl Review {
    /// Create a new pending review
    pub fn new(
        task_id: impl Into<String>,
        project_id: impl Into<String>,
        reason: ReviewReason,
        context: impl Into<String>,
    ) -> Self {
        let task_id = task_id.into();
        Self {
            id: generate_id("review", &task_id),
            task_id,
            project_id: project_id.into(),
            reason,
            context: context.into(),
            status: ReviewStatus::Pending,
            created_at: now_ms(),
            resolved_at: None,
            resolution: None,
        }
    }

    /// Resolve with a decision
    pub fn resolve(&mut self, status: ReviewStatus, resolution: Option<String>) {
        self.status = status;
        self.resolved_at = Some(now_ms());
        self.resolution = resolution;
    }

    /// Convert to a storage row
    pub fn to_row(&self) -> ReviewRow {
        ReviewRow {
            id: self.id.clone(),
            task_id: self.task_id.clone(),
            project_id: self.project_id.clone(),
            reason: self.reason.to_string(),
            context: self.context.clone(),
            status: self.status.to_string(),
            created_at: self.created_at,
            resolved_at: self.resolved_at,
            resolution: self.resolution.clone(),
        }
    }

    /// Rebuild from a storage row
    pub fn from_row(row: ReviewRow) -> Self {
        let status = match row.status.as_str() {
            "approved" => ReviewStatus::Approved,
            "rejected" => ReviewStatus::Rejected,
            _ => ReviewStatus::Pending,
        };
        Self {
            id: row.id,
            task_id: row.task_id,
            project_id: row.project_id,
            reason: ReviewReason::parse(&row.reason),
            context: row.context,
            status,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
            resolution: row.resolution,
        }
    }
}
