//! Row types for the relational tables
//!
//! These are plain data carriers: the engine's domain types convert to and
//! from rows at the persistence boundary. Array-valued columns are stored
//! as JSON-encoded TEXT; all timestamps are Unix epoch milliseconds.

use serde::{Deserialize, Serialize};

/// A project row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    /// "genesis" or "evolution"
    pub mode: String,
    pub root_path: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A feature row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRow {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: String,
    pub priority: String,
    pub status: String,
    pub complexity: String,
    pub estimated_tasks: i64,
    pub completed_tasks: i64,
    pub created_at: i64,
}

/// A task row
///
/// `files`, `test_criteria` and `depends_on` are JSON arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: String,
    pub project_id: String,
    pub feature_id: Option<String>,
    pub name: String,
    pub description: String,
    pub kind: String,
    pub size: String,
    pub status: String,
    pub estimated_minutes: i64,
    pub files: Vec<String>,
    pub test_criteria: Vec<String>,
    pub depends_on: Vec<String>,
    pub wave_id: i64,
    pub priority: String,
    pub created_at: i64,
}

/// A requirement row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementRow {
    pub id: String,
    pub project_id: String,
    pub category: String,
    pub text: String,
    pub priority: String,
    pub confidence: f64,
    pub area: Option<String>,
    pub source: String,
    pub created_at: i64,
}

/// A checkpoint row; `state_data` holds the full JSON project snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRow {
    pub id: String,
    pub project_id: String,
    pub reason: String,
    pub state_data: String,
    pub git_commit: Option<String>,
    pub created_at: i64,
}

/// An interview session row; `state_data` holds the serialized session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: String,
    pub project_id: String,
    pub status: String,
    pub mode: String,
    pub state_data: String,
    pub started_at: i64,
    pub last_activity_at: i64,
}

/// A persisted project state row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStateRow {
    pub project_id: String,
    pub state_data: String,
    pub updated_at: i64,
}

/// A human review row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRow {
    pub id: String,
    pub task_id: String,
    pub project_id: String,
    pub reason: String,
    pub context: String,
    pub status: String,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
    pub resolution: Option<String>,
}

/// A metric sample row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRow {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub value: f64,
    pub recorded_at: i64,
}
