//! Feature domain type

use nexusstore::{FeatureRow, now_ms};
use serde::{Deserialize, Serialize};

use super::id::generate_id;
use super::priority::Priority;

/// Feature lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    #[default]
    Pending,
    Decomposed,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Decomposed => "decomposed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Rough complexity bucket, inferred at decomposition time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

/// A feature groups the tasks decomposed from one requirement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: String,
    pub priority: Priority,
    pub status: FeatureStatus,
    pub complexity: Complexity,
    pub estimated_tasks: u32,
    pub completed_tasks: u32,
    pub created_at: i64,
}

impl Feature {
    /// Create a new feature with generated ID
    pub fn new(project_id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: generate_id("feature", &name),
            project_id: project_id.into(),
            name,
            description: description.into(),
            priority: Priority::Normal,
            status: FeatureStatus::Pending,
            complexity: Complexity::Medium,
            estimated_tasks: 0,
            completed_tasks: 0,
            created_at: now_ms(),
        }
    }

    /// Render the feature as a decomposition prompt fragment
    pub fn to_prompt_text(&self) -> String {
        format!("Feature: {}\n\n{}", self.name, self.description)
    }

    /// Check whether every planned task has completed
    pub fn is_complete(&self) -> bool {
        self.estimated_tasks > 0 && self.completed_tasks >= self.estimated_tasks
    }

    /// Convert to a storage row
    pub fn to_row(&self) -> FeatureRow {
        FeatureRow {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            priority: self.priority.to_string(),
            status: self.status.to_string(),
            complexity: self.complexity.to_string(),
            estimated_tasks: self.estimated_tasks as i64,
            completed_tasks: self.completed_tasks as i64,
            created_at: self.created_at,
        }
    }
}
