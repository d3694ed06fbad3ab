//! MergerRunner: merges a task's worktree branch back to the mainline
//!
//! Sequence: stash anything dirty in the base checkout, switch to the
//! target branch, fast-forward from the remote when one exists, then
//! merge the task branch. Conflicts collect the unmerged file list and
//! abort cleanly so the base checkout is never left mid-merge. Pushing is
//! best-effort and never blocks task completion.

use std::path::{Path, PathBuf};

use eyre::Result;
use tokio::process::Command;
use tracing::{info, warn};

use crate::git::{DiffOpts, GitService, MergeOpts, MergeOutcome};

/// Options for one merge
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub target_branch: String,
    pub squash: bool,
    pub no_ff: bool,
    pub message: Option<String>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            target_branch: "main".to_string(),
            squash: false,
            no_ff: false,
            message: None,
        }
    }
}

/// Outcome of a merge attempt
#[derive(Debug, Clone)]
pub enum MergeReport {
    Merged {
        commit: String,
        files_changed: u32,
        insertions: u32,
        deletions: u32,
    },
    Conflicts {
        files: Vec<String>,
    },
}

impl MergeReport {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }

    pub fn conflict_files(&self) -> &[String] {
        match self {
            Self::Conflicts { files } => files,
            Self::Merged { .. } => &[],
        }
    }
}

/// Merges worktree branches into the mainline of one repository
pub struct MergerRunner {
    repo_root: PathBuf,
}

impl MergerRunner {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Merge `source_branch` into the target branch
    pub async fn merge(&self, source_branch: &str, opts: &MergeOptions) -> Result<MergeReport> {
        let git = GitService::new(&self.repo_root);
        let message = opts
            .message
            .clone()
            .unwrap_or_else(|| format!("Merge {source_branch}"));

        info!(branch = %source_branch, target = %opts.target_branch, "Starting merge");

        // Park any local modifications so checkout cannot clobber them
        if !git.status().await?.is_clean() {
            info!("Stashing dirty base checkout before merge");
            let _ = Command::new("git")
                .args(["stash", "push", "-u", "-m", "nexus: pre-merge stash"])
                .current_dir(&self.repo_root)
                .output()
                .await;
        }

        git.checkout_branch(&opts.target_branch).await?;

        // Fast-forward from the remote when one exists; a failure here is
        // not fatal (local-only repos, offline runs)
        if self.has_remote().await {
            let pull = Command::new("git")
                .args(["pull", "--ff-only"])
                .current_dir(&self.repo_root)
                .output()
                .await?;
            if !pull.status.success() {
                warn!(
                    "pull --ff-only failed: {}",
                    String::from_utf8_lossy(&pull.stderr).trim()
                );
            }
        }

        let before = self.head_commit().await?;

        if opts.squash {
            return self.squash_merge(&git, source_branch, &message, &before).await;
        }

        let outcome = git
            .merge(
                source_branch,
                &MergeOpts {
                    no_ff: opts.no_ff,
                    message: Some(message),
                },
            )
            .await?;

        match outcome {
            MergeOutcome::Merged { commit } => self.merged_report(&git, &before, commit).await,
            MergeOutcome::Conflicts { files } => {
                warn!(branch = %source_branch, conflicts = files.len(), "Merge conflict, aborting");
                git.abort_merge().await?;
                Ok(MergeReport::Conflicts { files })
            }
        }
    }

    async fn squash_merge(
        &self,
        git: &GitService,
        source_branch: &str,
        message: &str,
        before: &str,
    ) -> Result<MergeReport> {
        let output = Command::new("git")
            .args(["merge", "--squash", source_branch])
            .current_dir(&self.repo_root)
            .output()
            .await?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stdout.contains("CONFLICT") || stderr.contains("CONFLICT") {
                let files = self.unmerged_files().await.unwrap_or_default();
                git.abort_merge().await?;
                // A squash conflict leaves staged half-merges behind
                let _ = Command::new("git")
                    .args(["reset", "--hard", "HEAD"])
                    .current_dir(&self.repo_root)
                    .output()
                    .await;
                return Ok(MergeReport::Conflicts { files });
            }
            eyre::bail!("squash merge failed: {stderr}");
        }

        let commit = git.commit(message).await?;
        self.merged_report(git, before, commit).await
    }

    async fn merged_report(&self, git: &GitService, before: &str, commit: String) -> Result<MergeReport> {
        let stat = git
            .diff_stat(&DiffOpts {
                ref1: Some(before.to_string()),
                ref2: Some(commit.clone()),
                staged: false,
            })
            .await
            .unwrap_or_default();

        info!(%commit, files = stat.files_changed, "Merge complete");
        Ok(MergeReport::Merged {
            commit,
            files_changed: stat.files_changed,
            insertions: stat.insertions,
            deletions: stat.deletions,
        })
    }

    /// Push a branch to origin. Best-effort: returns whether it worked.
    pub async fn push_to_remote(&self, branch: &str) -> bool {
        if !self.has_remote().await {
            return false;
        }
        match Command::new("git")
            .args(["push", "origin", branch])
            .current_dir(&self.repo_root)
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                info!(%branch, "Pushed to origin");
                true
            }
            Ok(output) => {
                warn!(%branch, "Push failed: {}", String::from_utf8_lossy(&output.stderr).trim());
                false
            }
            Err(e) => {
                warn!(%branch, error = %e, "Push failed");
                false
            }
        }
    }

    async fn has_remote(&self) -> bool {
        match Command::new("git")
            .args(["remote"])
            .current_dir(&self.repo_root)
            .output()
            .await
        {
            Ok(output) => !output.stdout.is_empty(),
            Err(_) => false,
        }
    }

    async fn head_commit(&self) -> Result<String> {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(&self.repo_root)
            .output()
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn unmerged_files(&self) -> Result<Vec<String>> {
        let output = Command::new("git")
            .args(["diff", "--name-only", "--diff-filter=U"])
            .current_dir(&self.repo_root)
            .output()
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup_repo(dir: &Path) {
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "t@t"],
            vec!["config", "user.name", "T"],
            vec!["commit", "--allow-empty", "-m", "initial"],
        ] {
            Command::new("git").args(&args).current_dir(dir).output().await.unwrap();
        }
    }

    async fn commit_file(dir: &Path, name: &str, content: &str, message: &str) {
        std::fs::write(dir.join(name), content).unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir).output().await.unwrap();
        Command::new("git")
            .args(["commit", "-m", message])
            .current_dir(dir)
            .output()
            .await
            .unwrap();
    }

    async fn branch(dir: &Path, name: &str) {
        Command::new("git")
            .args(["checkout", "-b", name])
            .current_dir(dir)
            .output()
            .await
            .unwrap();
    }

    async fn checkout(dir: &Path, name: &str) {
        Command::new("git")
            .args(["checkout", name])
            .current_dir(dir)
            .output()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clean_merge_reports_stats() {
        let dir = tempdir().unwrap();
        setup_repo(dir.path()).await;

        branch(dir.path(), "task/x").await;
        commit_file(dir.path(), "feature.txt", "one\ntwo\n", "add feature").await;
        checkout(dir.path(), "main").await;

        let merger = MergerRunner::new(dir.path());
        let report = merger
            .merge(
                "task/x",
                &MergeOptions {
                    no_ff: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        match report {
            MergeReport::Merged {
                commit,
                files_changed,
                insertions,
                ..
            } => {
                assert_eq!(commit.len(), 40);
                assert_eq!(files_changed, 1);
                assert_eq!(insertions, 2);
            }
            MergeReport::Conflicts { .. } => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn test_conflict_aborts_and_lists_files() {
        let dir = tempdir().unwrap();
        setup_repo(dir.path()).await;
        commit_file(dir.path(), "shared.txt", "base\n", "base").await;

        branch(dir.path(), "task/y").await;
        commit_file(dir.path(), "shared.txt", "task side\n", "task change").await;
        checkout(dir.path(), "main").await;
        commit_file(dir.path(), "shared.txt", "main side\n", "main change").await;

        let merger = MergerRunner::new(dir.path());
        let report = merger.merge("task/y", &MergeOptions::default()).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.conflict_files(), ["shared.txt"]);

        // Base checkout is clean again after the abort
        let git = GitService::new(dir.path());
        assert!(git.status().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_dirty_base_is_stashed_first() {
        let dir = tempdir().unwrap();
        setup_repo(dir.path()).await;
        commit_file(dir.path(), "tracked.txt", "committed\n", "base").await;

        branch(dir.path(), "task/z").await;
        commit_file(dir.path(), "new.txt", "from task\n", "task work").await;
        checkout(dir.path(), "main").await;

        // Dirty the base checkout
        std::fs::write(dir.path().join("tracked.txt"), "local edit\n").unwrap();

        let merger = MergerRunner::new(dir.path());
        let report = merger.merge("task/z", &MergeOptions::default()).await.unwrap();
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_squash_merge_single_commit() {
        let dir = tempdir().unwrap();
        setup_repo(dir.path()).await;

        branch(dir.path(), "task/s").await;
        commit_file(dir.path(), "a.txt", "a\n", "first").await;
        commit_file(dir.path(), "b.txt", "b\n", "second").await;
        checkout(dir.path(), "main").await;

        let merger = MergerRunner::new(dir.path());
        let report = merger
            .merge(
                "task/s",
                &MergeOptions {
                    squash: true,
                    message: Some("squashed task".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(report.is_success());
        let git = GitService::new(dir.path());
        let log = git.log(Some(3)).await.unwrap();
        assert_eq!(log[0].subject, "squashed task");
    }

    #[tokio::test]
    async fn test_push_without_remote_is_false() {
        let dir = tempdir().unwrap();
        setup_repo(dir.path()).await;
        let merger = MergerRunner::new(dir.path());
        assert!(!merger.push_to_remote("main").await);
    }
}
