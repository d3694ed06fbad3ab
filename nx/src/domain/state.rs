//! Project state snapshot
//!
//! The unit of checkpointing: everything needed to resume a run after a
//! restart. The snapshot schema is versioned so stored checkpoints from
//! older builds are rejected with a typed error instead of misread.

use nexusstore::now_ms;
use serde::{Deserialize, Serialize};

use super::feature::Feature;
use super::project::{ProjectMode, ProjectStatus};

/// Current snapshot schema version
pub const STATE_VERSION: u32 = 1;

/// In-memory + persisted project state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    /// Snapshot schema version
    #[serde(default = "default_version")]
    pub version: u32,
    pub project_id: String,
    pub project_name: String,
    pub status: ProjectStatus,
    pub mode: ProjectMode,
    pub features: Vec<Feature>,
    pub current_feature_index: usize,
    pub current_task_index: usize,
    pub completed_tasks: u32,
    pub total_tasks: u32,
    pub created_at: i64,
    pub last_updated_at: i64,
}

fn default_version() -> u32 {
    STATE_VERSION
}

/// Partial update applied through `StateManager::update_state`
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub status: Option<ProjectStatus>,
    pub features: Option<Vec<Feature>>,
    pub current_feature_index: Option<usize>,
    pub current_task_index: Option<usize>,
    pub completed_tasks: Option<u32>,
    pub total_tasks: Option<u32>,
}

impl ProjectState {
    /// Create an initializing state for a project
    pub fn new(project_id: impl Into<String>, project_name: impl Into<String>, mode: ProjectMode) -> Self {
        let now = now_ms();
        Self {
            version: STATE_VERSION,
            project_id: project_id.into(),
            project_name: project_name.into(),
            status: ProjectStatus::Initializing,
            mode,
            features: Vec::new(),
            current_feature_index: 0,
            current_task_index: 0,
            completed_tasks: 0,
            total_tasks: 0,
            created_at: now,
            last_updated_at: now,
        }
    }

    /// Apply a partial update with a monotonic `last_updated_at`
    pub fn apply(&mut self, patch: StatePatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(features) = patch.features {
            self.features = features;
        }
        if let Some(i) = patch.current_feature_index {
            self.current_feature_index = i;
        }
        if let Some(i) = patch.current_task_index {
            self.current_task_index = i;
        }
        if let Some(n) = patch.completed_tasks {
            self.completed_tasks = n;
        }
        if let Some(n) = patch.total_tasks {
            self.total_tasks = n;
        }
        self.last_updated_at = self.last_updated_at.max(now_ms());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_initializing() {
        let state = ProjectState::new("p-1", "Billing", ProjectMode::Genesis);
        assert_eq!(state.status, ProjectStatus::Initializing);
        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.total_tasks, 0);
    }

    #[test]
    fn test_apply_patch() {
        let mut state = ProjectState::new("p-1", "Billing", ProjectMode::Genesis);
        let before = state.last_updated_at;
        state.apply(StatePatch {
            status: Some(ProjectStatus::Executing),
            total_tasks: Some(12),
            ..Default::default()
        });
        assert_eq!(state.status, ProjectStatus::Executing);
        assert_eq!(state.total_tasks, 12);
        assert!(state.last_updated_at >= before);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let state = ProjectState::new("p-1", "Billing", ProjectMode::Evolution);
        let json = serde_json::to_string(&state).unwrap();
        let back: ProjectState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_missing_version_defaults() {
        // Snapshots written before the version field was introduced
        let json = r#"{
            "project_id": "p-1", "project_name": "x", "status": "executing",
            "mode": "genesis", "features": [], "current_feature_index": 0,
            "current_task_index": 0, "completed_tasks": 0, "total_tasks": 0,
            "created_at": 1, "last_updated_at": 1
        }"#;
        let state: ProjectState = serde_json::from_str(json).unwrap();
        assert_eq!(state.version, STATE_VERSION);
    }
}
