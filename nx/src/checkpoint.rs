//! CheckpointManager: durable snapshots of project state plus git ref
//!
//! A checkpoint captures the full `ProjectState` as JSON and, best-effort,
//! the repository HEAD. Retention keeps the newest N per project.

use std::path::PathBuf;
use std::sync::Arc;

use nexusstore::{CheckpointRow, Database, StoreError, now_ms};
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::domain::{ProjectState, generate_id};
use crate::events::{EventKind, EventScope};
use crate::state::{StateError, StateManager};

/// Checkpoint operation errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Unknown project: {0}")]
    UnknownProject(String),

    #[error("Unknown checkpoint: {0}")]
    UnknownCheckpoint(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Snapshot error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Checkpoint metadata (the snapshot itself stays in the store)
#[derive(Debug, Clone)]
pub struct CheckpointMeta {
    pub id: String,
    pub project_id: String,
    pub reason: String,
    pub git_commit: Option<String>,
    pub created_at: i64,
}

impl From<&CheckpointRow> for CheckpointMeta {
    fn from(row: &CheckpointRow) -> Self {
        Self {
            id: row.id.clone(),
            project_id: row.project_id.clone(),
            reason: row.reason.clone(),
            git_commit: row.git_commit.clone(),
            created_at: row.created_at,
        }
    }
}

/// Options for a restore
#[derive(Debug, Clone, Default)]
pub struct RestoreOpts {
    /// Also check out the recorded git commit (best-effort)
    pub restore_git: bool,
}

/// Creates, lists, prunes and restores checkpoints
pub struct CheckpointManager {
    db: Arc<Database>,
    state: Arc<StateManager>,
    events: EventScope,
    /// Repository to record HEAD from; None skips the git side entirely
    repo_root: Option<PathBuf>,
    max_checkpoints: usize,
}

impl CheckpointManager {
    pub fn new(
        db: Arc<Database>,
        state: Arc<StateManager>,
        events: EventScope,
        repo_root: Option<PathBuf>,
        max_checkpoints: usize,
    ) -> Self {
        Self {
            db,
            state,
            events,
            repo_root,
            max_checkpoints,
        }
    }

    /// Snapshot the project's state. Records git HEAD when available;
    /// a missing repository only drops the commit, never the checkpoint.
    pub async fn create_checkpoint(&self, project_id: &str, reason: &str) -> Result<CheckpointMeta, CheckpointError> {
        let state = self
            .state
            .get_state(project_id)
            .await
            .ok_or_else(|| CheckpointError::UnknownProject(project_id.to_string()))?;

        let git_commit = self.current_head().await;
        let row = CheckpointRow {
            id: generate_id("checkpoint", reason),
            project_id: project_id.to_string(),
            reason: reason.to_string(),
            state_data: serde_json::to_string(&state)?,
            git_commit,
            created_at: now_ms(),
        };
        self.db.insert_checkpoint(&row)?;

        let pruned = self.db.prune_checkpoints(project_id, self.max_checkpoints)?;
        if pruned > 0 {
            info!(%project_id, pruned, "Pruned old checkpoints");
        }

        let meta = CheckpointMeta::from(&row);
        info!(checkpoint_id = %meta.id, %project_id, %reason, "Checkpoint created");
        self.events.emit(EventKind::CheckpointCreated {
            checkpoint_id: meta.id.clone(),
            project_id: project_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(meta)
    }

    /// Create a checkpoint for a standard trigger (wave completion,
    /// escalation, failure)
    pub async fn create_auto_checkpoint(
        &self,
        project_id: &str,
        trigger: &str,
    ) -> Result<CheckpointMeta, CheckpointError> {
        self.create_checkpoint(project_id, &format!("auto: {trigger}")).await
    }

    /// Restore a checkpoint's state, optionally checking out its commit
    pub async fn restore_checkpoint(&self, id: &str, opts: &RestoreOpts) -> Result<ProjectState, CheckpointError> {
        let row = self
            .db
            .get_checkpoint(id)?
            .ok_or_else(|| CheckpointError::UnknownCheckpoint(id.to_string()))?;

        let state: ProjectState = serde_json::from_str(&row.state_data)?;
        self.state.apply_snapshot(state.clone()).await?;

        if opts.restore_git
            && let Some(commit) = &row.git_commit
            && let Some(repo) = &self.repo_root
        {
            let checkout = Command::new("git")
                .args(["checkout", commit])
                .current_dir(repo)
                .output()
                .await;
            match checkout {
                Ok(output) if output.status.success() => {
                    info!(%commit, "Restored git HEAD");
                }
                Ok(output) => warn!(
                    %commit,
                    "Could not restore git HEAD: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(e) => warn!(%commit, error = %e, "Could not restore git HEAD"),
            }
        }

        self.events.emit(EventKind::CheckpointRestored {
            checkpoint_id: id.to_string(),
            project_id: row.project_id.clone(),
        });
        Ok(state)
    }

    /// Checkpoints for a project, newest first
    pub fn list_checkpoints(&self, project_id: &str) -> Result<Vec<CheckpointMeta>, CheckpointError> {
        Ok(self
            .db
            .list_checkpoints(project_id)?
            .iter()
            .map(CheckpointMeta::from)
            .collect())
    }

    async fn current_head(&self) -> Option<String> {
        let repo = self.repo_root.as_ref()?;
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(repo)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProjectMode, ProjectStatus, StatePatch};
    use crate::events::create_event_bus;

    async fn fixture() -> (Arc<Database>, Arc<StateManager>, CheckpointManager) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let state = Arc::new(StateManager::new(db.clone(), true));
        let bus = create_event_bus();
        let manager = CheckpointManager::new(db.clone(), state.clone(), bus.scope("checkpoint"), None, 3);
        (db, state, manager)
    }

    #[tokio::test]
    async fn test_checkpoint_roundtrip() {
        let (_db, state, manager) = fixture().await;
        state.create_state("p-1", "Billing", ProjectMode::Genesis).await.unwrap();
        state
            .update_state(
                "p-1",
                StatePatch {
                    status: Some(ProjectStatus::Executing),
                    total_tasks: Some(9),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let at_create = state.get_state("p-1").await.unwrap();
        let meta = manager.create_checkpoint("p-1", "wave 1 done").await.unwrap();

        // Mutate the live state afterwards
        state
            .update_state(
                "p-1",
                StatePatch {
                    completed_tasks: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let restored = manager.restore_checkpoint(&meta.id, &RestoreOpts::default()).await.unwrap();
        assert_eq!(restored, at_create);
        assert_eq!(state.get_state("p-1").await.unwrap(), at_create);
    }

    #[tokio::test]
    async fn test_checkpoint_unknown_project() {
        let (_db, _state, manager) = fixture().await;
        assert!(matches!(
            manager.create_checkpoint("ghost", "x").await,
            Err(CheckpointError::UnknownProject(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_unknown_checkpoint() {
        let (_db, _state, manager) = fixture().await;
        assert!(matches!(
            manager.restore_checkpoint("ghost", &RestoreOpts::default()).await,
            Err(CheckpointError::UnknownCheckpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_retention_prunes_to_max() {
        let (_db, state, manager) = fixture().await;
        state.create_state("p-1", "x", ProjectMode::Genesis).await.unwrap();

        for i in 0..5 {
            manager.create_checkpoint("p-1", &format!("cp {i}")).await.unwrap();
        }

        let list = manager.list_checkpoints("p-1").unwrap();
        assert_eq!(list.len(), 3);
        assert!(list[0].created_at >= list[1].created_at);
    }

    #[tokio::test]
    async fn test_auto_checkpoint_reason() {
        let (_db, state, manager) = fixture().await;
        state.create_state("p-1", "x", ProjectMode::Genesis).await.unwrap();
        let meta = manager.create_auto_checkpoint("p-1", "wave_completed").await.unwrap();
        assert_eq!(meta.reason, "auto: wave_completed");
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let state = Arc::new(StateManager::new(db.clone(), true));
        let bus = create_event_bus();
        let mut rx = bus.subscribe();
        let manager = CheckpointManager::new(db, state.clone(), bus.scope("checkpoint"), None, 10);

        state.create_state("p-1", "x", ProjectMode::Genesis).await.unwrap();
        let meta = manager.create_checkpoint("p-1", "manual").await.unwrap();
        manager.restore_checkpoint(&meta.id, &RestoreOpts::default()).await.unwrap();

        let types: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event_type().to_string())
            .collect();
        assert!(types.contains(&"system:checkpoint-created".to_string()));
        assert!(types.contains(&"system:checkpoint-restored".to_string()));
    }
}
