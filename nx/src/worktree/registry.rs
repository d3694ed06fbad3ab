//! Durable worktree registry
//!
//! A JSON file under `.nexus/worktrees/` tracks every live worktree so a
//! restarted daemon can find and reap them. Writes go through a temp file
//! and atomic rename; a reader never observes partial JSON. Concurrent
//! access is guarded by an on-disk lock file: created O_EXCL, waited on
//! for up to 5 seconds, then stolen with a warning.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use nexusstore::now_ms;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::WorktreeError;

/// Registry schema version
pub const REGISTRY_VERSION: u32 = 1;

/// Default lock wait before stealing
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Worktree activity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    #[default]
    Active,
    Idle,
    Stale,
}

impl WorktreeStatus {
    /// Derive status from minutes since last activity:
    /// active < 15 min, idle 15-30 min, stale > 30 min.
    pub fn from_idle_minutes(minutes: i64) -> Self {
        match minutes {
            m if m < 15 => Self::Active,
            m if m <= 30 => Self::Idle,
            _ => Self::Stale,
        }
    }
}

/// A tracked worktree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub task_id: String,
    pub path: PathBuf,
    pub branch: String,
    pub base_branch: String,
    pub created_at: i64,
    pub last_activity: i64,
    pub status: WorktreeStatus,
}

impl WorktreeInfo {
    /// Minutes since last activity
    pub fn idle_minutes(&self) -> i64 {
        (now_ms() - self.last_activity) / 60_000
    }
}

/// On-disk registry shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    pub version: u32,
    pub base_dir: PathBuf,
    pub last_updated: i64,
    pub worktrees: HashMap<String, WorktreeInfo>,
}

impl Registry {
    fn new(base_dir: PathBuf) -> Self {
        Self {
            version: REGISTRY_VERSION,
            base_dir,
            last_updated: now_ms(),
            worktrees: HashMap::new(),
        }
    }
}

/// Registry file plus its lock
pub struct RegistryStore {
    dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct LockOwner {
    pid: u32,
    acquired_at: i64,
}

/// Held lock; releases on drop
pub struct RegistryLock {
    lock_path: PathBuf,
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            debug!(error = %e, "Failed to remove registry lock file");
        }
    }
}

impl RegistryStore {
    /// Create a store rooted at the worktrees directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn registry_path(&self) -> PathBuf {
        self.dir.join("registry.json")
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(".lock")
    }

    /// Acquire the on-disk lock, stealing it after the timeout
    pub fn lock(&self) -> Result<RegistryLock, WorktreeError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| WorktreeError::Registry(e.to_string()))?;
        let lock_path = self.lock_path();
        let owner = serde_json::to_string(&LockOwner {
            pid: std::process::id(),
            acquired_at: now_ms(),
        })
        .unwrap_or_default();

        let start = Instant::now();
        loop {
            match std::fs::OpenOptions::new().write(true).create_new(true).open(&lock_path) {
                Ok(mut file) => {
                    use std::io::Write;
                    let _ = file.write_all(owner.as_bytes());
                    return Ok(RegistryLock { lock_path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if start.elapsed() >= LOCK_TIMEOUT {
                        // Steal: the holder is presumed dead. Rewrite the
                        // owner metadata so a resumed holder can see the theft.
                        warn!(lock = %lock_path.display(), "Registry lock held past timeout, stealing");
                        std::fs::write(&lock_path, owner.as_bytes())
                            .map_err(|e| WorktreeError::Registry(e.to_string()))?;
                        return Ok(RegistryLock { lock_path });
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(WorktreeError::Registry(e.to_string())),
            }
        }
    }

    /// Load the registry, creating an empty one when missing
    pub fn load(&self) -> Result<Registry, WorktreeError> {
        let path = self.registry_path();
        if !path.exists() {
            return Ok(Registry::new(self.dir.clone()));
        }
        let content = std::fs::read_to_string(&path).map_err(|e| WorktreeError::Registry(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| WorktreeError::Registry(format!("corrupt registry: {e}")))
    }

    /// Write the registry atomically: temp file + rename
    pub fn save(&self, registry: &mut Registry) -> Result<(), WorktreeError> {
        registry.last_updated = now_ms();
        std::fs::create_dir_all(&self.dir).map_err(|e| WorktreeError::Registry(e.to_string()))?;

        let json = serde_json::to_string_pretty(registry).map_err(|e| WorktreeError::Registry(e.to_string()))?;
        let tmp = self.dir.join(format!(".registry.{}.tmp", std::process::id()));
        std::fs::write(&tmp, json).map_err(|e| WorktreeError::Registry(e.to_string()))?;
        std::fs::rename(&tmp, self.registry_path()).map_err(|e| WorktreeError::Registry(e.to_string()))?;
        Ok(())
    }

    /// Run a read-modify-write cycle under the lock
    pub fn mutate<T>(&self, f: impl FnOnce(&mut Registry) -> Result<T, WorktreeError>) -> Result<T, WorktreeError> {
        let _lock = self.lock()?;
        let mut registry = self.load()?;
        let result = f(&mut registry)?;
        self.save(&mut registry)?;
        Ok(result)
    }
}
