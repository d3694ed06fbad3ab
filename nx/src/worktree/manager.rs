//! Worktree manager
//!
//! Creates one isolated git worktree per task under
//! `<projectRoot>/.nexus/worktrees/<taskId>/`, on branch
//! `nexus/task/<taskId>/<unixMillis>`, and tracks them in the durable
//! registry so parallel tasks cannot collide and restarts can reap
//! leftovers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use nexusstore::now_ms;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::registry::{RegistryStore, WorktreeInfo, WorktreeStatus};

/// Error types for worktree operations
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("Worktree already exists for task: {0}")]
    Exists(String),

    #[error("Worktree not found: {0}")]
    NotFound(String),

    #[error("Failed to create worktree: {0}")]
    CreateFailed(String),

    #[error("Failed to remove worktree: {0}")]
    RemoveFailed(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Git command failed: {0}")]
    Git(String),
}

/// Configuration for the worktree manager
#[derive(Debug, Clone)]
pub struct WorktreeConfig {
    /// Path to the main repository
    pub project_root: PathBuf,

    /// Branch prefix for task branches
    pub branch_prefix: String,

    /// Age after which an untouched worktree is eligible for cleanup
    pub max_age: Duration,
}

impl WorktreeConfig {
    /// Config rooted at a project directory with defaults
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            branch_prefix: "nexus/task".to_string(),
            max_age: Duration::from_secs(3600),
        }
    }
}

/// Options for a cleanup sweep
#[derive(Debug, Clone, Default)]
pub struct CleanupOpts {
    /// Override the configured max age
    pub max_age: Option<Duration>,
    /// Remove everything regardless of age
    pub force: bool,
    /// Report what would be removed without touching anything
    pub dry_run: bool,
}

/// Result of a cleanup sweep
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

/// Manager for per-task git worktrees
pub struct WorktreeManager {
    config: WorktreeConfig,
    store: RegistryStore,
}

impl WorktreeManager {
    /// Create a manager; the registry lives in `<projectRoot>/.nexus/worktrees/`
    pub fn new(config: WorktreeConfig) -> Self {
        let store = RegistryStore::new(config.project_root.join(".nexus").join("worktrees"));
        Self { config, store }
    }

    /// Base directory holding all worktrees
    pub fn base_dir(&self) -> PathBuf {
        self.config.project_root.join(".nexus").join("worktrees")
    }

    /// Create a worktree for a task
    ///
    /// Fails with `Exists` when the task already has one. The base branch
    /// defaults to the repository's current branch.
    pub async fn create_worktree(&self, task_id: &str, base_branch: Option<&str>) -> Result<WorktreeInfo, WorktreeError> {
        let base_branch = match base_branch {
            Some(b) => b.to_string(),
            None => self.current_branch().await.unwrap_or_else(|_| "main".to_string()),
        };

        let path = self.base_dir().join(task_id);
        let branch = format!("{}/{}/{}", self.config.branch_prefix, task_id, now_ms());
        let now = now_ms();
        let input = WorktreeInfo {
            task_id: task_id.to_string(),
            path: path.clone(),
            branch: branch.clone(),
            base_branch: base_branch.clone(),
            created_at: now,
            last_activity: now,
            status: WorktreeStatus::Active,
        };

        // Reserve the slot in the registry before touching git, so a
        // concurrent create for the same task fails fast.
        let reserved = input.clone();
        self.store.mutate(move |reg| {
            if reg.worktrees.contains_key(&reserved.task_id) {
                return Err(WorktreeError::Exists(reserved.task_id.clone()));
            }
            reg.worktrees.insert(reserved.task_id.clone(), reserved);
            Ok(())
        })?;

        let output = Command::new("git")
            .args([
                "worktree",
                "add",
                path.to_str().unwrap_or_default(),
                "-b",
                &branch,
                &base_branch,
            ])
            .current_dir(&self.config.project_root)
            .output()
            .await
            .map_err(|e| WorktreeError::Git(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            // Roll back the reservation
            let task = task_id.to_string();
            let _ = self.store.mutate(move |reg| {
                reg.worktrees.remove(&task);
                Ok(())
            });
            return Err(WorktreeError::CreateFailed(stderr));
        }

        info!(%task_id, path = %path.display(), %branch, "Created worktree");
        Ok(input)
    }

    /// Look up a tracked worktree
    pub fn get_worktree(&self, task_id: &str) -> Result<Option<WorktreeInfo>, WorktreeError> {
        let registry = self.store.load()?;
        Ok(registry.worktrees.get(task_id).cloned())
    }

    /// All tracked worktrees
    pub fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, WorktreeError> {
        let registry = self.store.load()?;
        let mut list: Vec<_> = registry.worktrees.into_values().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    /// Remove a worktree and deregister it
    ///
    /// Force-removes the directory and prunes on failure; branch-delete
    /// errors are ignored.
    pub async fn remove_worktree(&self, task_id: &str, delete_branch: bool) -> Result<(), WorktreeError> {
        let info = self
            .get_worktree(task_id)?
            .ok_or_else(|| WorktreeError::NotFound(task_id.to_string()))?;

        let output = Command::new("git")
            .args(["worktree", "remove", info.path.to_str().unwrap_or_default(), "--force"])
            .current_dir(&self.config.project_root)
            .output()
            .await
            .map_err(|e| WorktreeError::Git(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("is not a working tree") {
                warn!(%task_id, error = %stderr, "git worktree remove failed, pruning");
                let _ = std::fs::remove_dir_all(&info.path);
                let _ = Command::new("git")
                    .args(["worktree", "prune"])
                    .current_dir(&self.config.project_root)
                    .output()
                    .await;
            }
        }

        if delete_branch {
            let _ = Command::new("git")
                .args(["branch", "-D", &info.branch])
                .current_dir(&self.config.project_root)
                .output()
                .await;
        }

        let task = task_id.to_string();
        self.store.mutate(move |reg| {
            reg.worktrees.remove(&task);
            Ok(())
        })?;

        info!(%task_id, "Removed worktree");
        Ok(())
    }

    /// Record activity on a worktree, resetting it to active
    pub fn update_activity(&self, task_id: &str) -> Result<(), WorktreeError> {
        let task = task_id.to_string();
        self.store.mutate(move |reg| {
            let info = reg
                .worktrees
                .get_mut(&task)
                .ok_or_else(|| WorktreeError::NotFound(task.clone()))?;
            info.last_activity = now_ms();
            info.status = WorktreeStatus::Active;
            Ok(())
        })
    }

    /// Re-derive every worktree's status from its idle time
    pub fn refresh_status(&self) -> Result<Vec<WorktreeInfo>, WorktreeError> {
        self.store.mutate(|reg| {
            let mut list = Vec::new();
            for info in reg.worktrees.values_mut() {
                info.status = WorktreeStatus::from_idle_minutes(info.idle_minutes());
                list.push(info.clone());
            }
            list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(list)
        })
    }

    /// Sweep worktrees past their age limit (or stale, or all with force)
    pub async fn cleanup(&self, opts: CleanupOpts) -> Result<CleanupReport, WorktreeError> {
        let max_age = opts.max_age.unwrap_or(self.config.max_age);
        let worktrees = self.refresh_status()?;
        let mut report = CleanupReport::default();

        for info in worktrees {
            let age = Duration::from_millis((now_ms() - info.last_activity).max(0) as u64);
            let eligible = opts.force || info.status == WorktreeStatus::Stale || age > max_age;

            if !eligible {
                report.skipped.push(info.task_id);
                continue;
            }
            if opts.dry_run {
                report.removed.push(info.task_id);
                continue;
            }
            match self.remove_worktree(&info.task_id, true).await {
                Ok(()) => report.removed.push(info.task_id),
                Err(e) => {
                    warn!(task_id = %info.task_id, error = %e, "Cleanup failed for worktree");
                    report.failed.push(info.task_id);
                }
            }
        }

        debug!(
            removed = report.removed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Cleanup sweep done"
        );
        Ok(report)
    }

    async fn current_branch(&self) -> Result<String, WorktreeError> {
        let output = Command::new("git")
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .current_dir(&self.config.project_root)
            .output()
            .await
            .map_err(|e| WorktreeError::Git(e.to_string()))?;
        if !output.status.success() {
            return Err(WorktreeError::Git(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Seed `.gitignore` with the nexus working directories
pub async fn ensure_gitignore(project_root: &Path) -> std::io::Result<()> {
    let path = project_root.join(".gitignore");
    let existing = tokio::fs::read_to_string(&path).await.unwrap_or_default();
    let mut additions = String::new();
    for entry in [".nexus/worktrees", ".nexus/checkpoints"] {
        if !existing.lines().any(|l| l.trim() == entry) {
            additions.push_str(entry);
            additions.push('\n');
        }
    }
    if !additions.is_empty() {
        let mut content = existing;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&additions);
        tokio::fs::write(&path, content).await?;
    }
    Ok(())
}
