//! StateManager: in-memory project state with write-through persistence

use std::collections::HashMap;
use std::sync::Arc;

use nexusstore::{Database, ProjectStateRow, StoreError, now_ms};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::{ProjectMode, ProjectState, STATE_VERSION, StatePatch};

/// State operation errors
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Unknown project: {0}")]
    UnknownProject(String),

    #[error("Unsupported state snapshot version {0} (expected {STATE_VERSION})")]
    UnsupportedVersion(u32),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Snapshot serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Owns the live `ProjectState` map. The in-memory map is a cache; when
/// `auto_persist` is on every mutation writes through to the store.
pub struct StateManager {
    db: Arc<Database>,
    states: Mutex<HashMap<String, ProjectState>>,
    auto_persist: bool,
}

impl StateManager {
    pub fn new(db: Arc<Database>, auto_persist: bool) -> Self {
        Self {
            db,
            states: Mutex::new(HashMap::new()),
            auto_persist,
        }
    }

    /// Initialize state for a project (status `initializing`)
    pub async fn create_state(
        &self,
        project_id: &str,
        project_name: &str,
        mode: ProjectMode,
    ) -> Result<ProjectState, StateError> {
        let state = ProjectState::new(project_id, project_name, mode);
        self.states.lock().await.insert(project_id.to_string(), state.clone());
        if self.auto_persist {
            self.persist(&state)?;
        }
        info!(%project_id, "Created project state");
        Ok(state)
    }

    /// Current state, if tracked
    pub async fn get_state(&self, project_id: &str) -> Option<ProjectState> {
        self.states.lock().await.get(project_id).cloned()
    }

    /// Merge a partial update; `last_updated_at` is monotonic
    pub async fn update_state(&self, project_id: &str, patch: StatePatch) -> Result<ProjectState, StateError> {
        let mut states = self.states.lock().await;
        let state = states
            .get_mut(project_id)
            .ok_or_else(|| StateError::UnknownProject(project_id.to_string()))?;
        state.apply(patch);
        let snapshot = state.clone();
        drop(states);

        if self.auto_persist {
            self.persist(&snapshot)?;
        }
        Ok(snapshot)
    }

    /// Persist the current state explicitly
    pub async fn save_state(&self, project_id: &str) -> Result<(), StateError> {
        let state = self
            .get_state(project_id)
            .await
            .ok_or_else(|| StateError::UnknownProject(project_id.to_string()))?;
        self.persist(&state)
    }

    /// Load persisted state into the cache
    pub async fn load_state(&self, project_id: &str) -> Result<Option<ProjectState>, StateError> {
        let Some(row) = self.db.get_project_state(project_id)? else {
            return Ok(None);
        };
        let state: ProjectState = serde_json::from_str(&row.state_data)?;
        if state.version != STATE_VERSION {
            return Err(StateError::UnsupportedVersion(state.version));
        }
        self.states.lock().await.insert(project_id.to_string(), state.clone());
        debug!(%project_id, "Loaded project state");
        Ok(Some(state))
    }

    /// Replace the tracked state wholesale (checkpoint restore path).
    /// Rejects snapshots from an unknown schema version.
    pub async fn apply_snapshot(&self, state: ProjectState) -> Result<(), StateError> {
        if state.version != STATE_VERSION {
            return Err(StateError::UnsupportedVersion(state.version));
        }
        let project_id = state.project_id.clone();
        self.states.lock().await.insert(project_id, state.clone());
        if self.auto_persist {
            self.persist(&state)?;
        }
        Ok(())
    }

    fn persist(&self, state: &ProjectState) -> Result<(), StateError> {
        self.db.upsert_project_state(&ProjectStateRow {
            project_id: state.project_id.clone(),
            state_data: serde_json::to_string(state)?,
            updated_at: now_ms(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProjectStatus;

    fn manager() -> StateManager {
        StateManager::new(Arc::new(Database::open_in_memory().unwrap()), true)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let mgr = manager();
        let state = mgr.create_state("p-1", "Billing", ProjectMode::Genesis).await.unwrap();
        assert_eq!(state.status, ProjectStatus::Initializing);
        assert_eq!(mgr.get_state("p-1").await.unwrap().project_name, "Billing");
    }

    #[tokio::test]
    async fn test_update_unknown_project() {
        let mgr = manager();
        assert!(matches!(
            mgr.update_state("ghost", StatePatch::default()).await,
            Err(StateError::UnknownProject(_))
        ));
    }

    #[tokio::test]
    async fn test_update_persists_and_reloads() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mgr = StateManager::new(db.clone(), true);
        mgr.create_state("p-1", "Billing", ProjectMode::Genesis).await.unwrap();
        mgr.update_state(
            "p-1",
            StatePatch {
                status: Some(ProjectStatus::Executing),
                total_tasks: Some(7),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // Fresh manager over the same db sees the persisted state
        let fresh = StateManager::new(db, true);
        let loaded = fresh.load_state("p-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, ProjectStatus::Executing);
        assert_eq!(loaded.total_tasks, 7);
    }

    #[tokio::test]
    async fn test_apply_snapshot_version_check() {
        let mgr = manager();
        let mut state = ProjectState::new("p-1", "x", ProjectMode::Genesis);
        state.version = 99;
        assert!(matches!(
            mgr.apply_snapshot(state).await,
            Err(StateError::UnsupportedVersion(99))
        ));
    }

    #[tokio::test]
    async fn test_monotonic_last_updated() {
        let mgr = manager();
        mgr.create_state("p-1", "x", ProjectMode::Genesis).await.unwrap();
        let first = mgr.update_state("p-1", StatePatch::default()).await.unwrap();
        let second = mgr.update_state("p-1", StatePatch::default()).await.unwrap();
        assert!(second.last_updated_at >= first.last_updated_at);
    }
}
