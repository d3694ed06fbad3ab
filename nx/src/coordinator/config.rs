//! Coordinator configuration

use std::path::PathBuf;

/// Configuration for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Project working directory (git repository root)
    pub project_root: PathBuf,

    /// Branch successful tasks merge into
    pub target_branch: String,

    /// Scheduler poll interval between pump iterations
    pub poll_interval_ms: u64,

    /// Grace period for in-flight tasks on stop
    pub stop_grace_ms: u64,

    /// Token budget for the evolution-mode repo map
    pub repo_map_token_budget: usize,

    /// Allocate a git worktree per task
    pub use_worktrees: bool,

    /// Push the target branch after successful merges
    pub push_after_merge: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            target_branch: "main".to_string(),
            poll_interval_ms: 50,
            stop_grace_ms: 10_000,
            repo_map_token_budget: 8_000,
            use_worktrees: true,
            push_after_merge: true,
        }
    }
}

impl CoordinatorConfig {
    /// Config rooted at a project directory
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.target_branch, "main");
        assert_eq!(config.repo_map_token_budget, 8_000);
        assert!(config.use_worktrees);
    }
}
