//! Worktree isolation: one git worktree per task, tracked in a durable
//! registry

mod manager;
mod registry;

pub use manager::{CleanupOpts, CleanupReport, WorktreeConfig, WorktreeError, WorktreeManager, ensure_gitignore};
pub use registry::{LOCK_TIMEOUT, REGISTRY_VERSION, Registry, RegistryLock, RegistryStore, WorktreeInfo, WorktreeStatus};
