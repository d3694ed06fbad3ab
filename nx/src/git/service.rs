//! GitService - branch, commit, diff and merge primitives
//!
//! Every operation shells out to the git CLI in the service's working
//! directory. Mutating operations verify a repository first; commits
//! auto-configure a local identity when none is set.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Errors from git operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    NotARepository(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    #[error("Git command failed: {0}")]
    Git(String),
}

/// Working tree status
#[derive(Debug, Clone, Default)]
pub struct GitStatus {
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
}

impl GitStatus {
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty() && self.modified.is_empty() && self.untracked.is_empty()
    }
}

/// What to stage
#[derive(Debug, Clone)]
pub enum StageTarget {
    All,
    Files(Vec<String>),
}

/// Options for `diff`
#[derive(Debug, Clone, Default)]
pub struct DiffOpts {
    pub ref1: Option<String>,
    pub ref2: Option<String>,
    pub staged: bool,
}

/// Summary line counts from `diff --stat`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffStat {
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
}

/// Options for `merge`
#[derive(Debug, Clone, Default)]
pub struct MergeOpts {
    pub no_ff: bool,
    pub message: Option<String>,
}

/// Outcome of a merge attempt
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    Merged { commit: String },
    Conflicts { files: Vec<String> },
}

/// A log entry
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub hash: String,
    pub subject: String,
}

/// Git primitives bound to one repository directory
pub struct GitService {
    cwd: PathBuf,
}

impl GitService {
    /// Create a service for the given repository directory
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }

    /// The directory this service operates in
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    async fn git(&self, args: &[&str]) -> Result<std::process::Output, GitError> {
        debug!(?args, cwd = %self.cwd.display(), "git");
        Command::new("git")
            .args(args)
            .current_dir(&self.cwd)
            .output()
            .await
            .map_err(|e| GitError::Git(e.to_string()))
    }

    async fn git_ok(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.git(args).await?;
        if !output.status.success() {
            return Err(GitError::Git(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Check whether the directory is inside a git work tree
    pub async fn is_repository(&self) -> bool {
        match self.git(&["rev-parse", "--is-inside-work-tree"]).await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    async fn ensure_repository(&self) -> Result<(), GitError> {
        if self.is_repository().await {
            Ok(())
        } else {
            Err(GitError::NotARepository(self.cwd.display().to_string()))
        }
    }

    /// Configure a local identity when none exists, so commits never fail
    /// on a fresh checkout.
    pub async fn ensure_identity(&self) -> Result<(), GitError> {
        let name = self.git(&["config", "user.name"]).await?;
        if !name.status.success() || name.stdout.is_empty() {
            self.git_ok(&["config", "user.name", "Nexus"]).await?;
        }
        let email = self.git(&["config", "user.email"]).await?;
        if !email.status.success() || email.stdout.is_empty() {
            self.git_ok(&["config", "user.email", "nexus@localhost"]).await?;
        }
        Ok(())
    }

    /// Parse `status --porcelain` into staged/modified/untracked buckets
    pub async fn status(&self) -> Result<GitStatus, GitError> {
        self.ensure_repository().await?;
        let stdout = self.git_ok(&["status", "--porcelain"]).await?;

        let mut status = GitStatus::default();
        for line in stdout.lines() {
            if line.len() < 3 {
                continue;
            }
            let (code, file) = (&line[..2], line[3..].to_string());
            match code {
                "??" => status.untracked.push(file),
                _ => {
                    if &code[..1] != " " {
                        status.staged.push(file.clone());
                    }
                    if &code[1..2] != " " {
                        status.modified.push(file);
                    }
                }
            }
        }
        Ok(status)
    }

    /// Current branch name
    pub async fn current_branch(&self) -> Result<String, GitError> {
        self.ensure_repository().await?;
        let branch = self.git_ok(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(branch.trim().to_string())
    }

    /// Create a branch, optionally from a start point
    pub async fn create_branch(&self, name: &str, from: Option<&str>) -> Result<(), GitError> {
        self.ensure_repository().await?;
        let mut args = vec!["branch", name];
        if let Some(start) = from {
            args.push(start);
        }
        let output = self.git(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("not a valid object name") {
                return Err(GitError::BranchNotFound(from.unwrap_or(name).to_string()));
            }
            return Err(GitError::Git(stderr.to_string()));
        }
        Ok(())
    }

    /// Checkout an existing branch
    pub async fn checkout_branch(&self, name: &str) -> Result<(), GitError> {
        self.ensure_repository().await?;
        let output = self.git(&["checkout", name]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("did not match any") || stderr.contains("pathspec") {
                return Err(GitError::BranchNotFound(name.to_string()));
            }
            return Err(GitError::Git(stderr.to_string()));
        }
        Ok(())
    }

    /// Delete a branch
    pub async fn delete_branch(&self, name: &str, force: bool) -> Result<(), GitError> {
        self.ensure_repository().await?;
        let flag = if force { "-D" } else { "-d" };
        let output = self.git(&["branch", flag, name]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("not found") {
                return Err(GitError::BranchNotFound(name.to_string()));
            }
            return Err(GitError::Git(stderr.to_string()));
        }
        Ok(())
    }

    /// List local branches
    pub async fn list_branches(&self) -> Result<Vec<String>, GitError> {
        self.ensure_repository().await?;
        let stdout = self.git_ok(&["branch", "--format=%(refname:short)"]).await?;
        Ok(stdout.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    /// Stage files or everything
    pub async fn stage_files(&self, target: StageTarget) -> Result<(), GitError> {
        self.ensure_repository().await?;
        match target {
            StageTarget::All => {
                self.git_ok(&["add", "-A"]).await?;
            }
            StageTarget::Files(files) => {
                let mut args = vec!["add".to_string(), "--".to_string()];
                args.extend(files);
                let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
                self.git_ok(&arg_refs).await?;
            }
        }
        Ok(())
    }

    /// Commit staged changes, returning the new commit hash.
    /// Errors when nothing is staged.
    pub async fn commit(&self, message: &str) -> Result<String, GitError> {
        self.ensure_repository().await?;
        self.ensure_identity().await?;

        let staged = self.git(&["diff", "--cached", "--quiet"]).await?;
        if staged.status.success() {
            return Err(GitError::CommitFailed("nothing staged".to_string()));
        }

        let output = self.git(&["commit", "-m", message]).await?;
        if !output.status.success() {
            return Err(GitError::CommitFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        let hash = self.git_ok(&["rev-parse", "HEAD"]).await?;
        Ok(hash.trim().to_string())
    }

    /// Recent commits, newest first
    pub async fn log(&self, limit: Option<usize>) -> Result<Vec<CommitInfo>, GitError> {
        self.ensure_repository().await?;
        let limit_arg = format!("-{}", limit.unwrap_or(20));
        let stdout = self.git_ok(&["log", &limit_arg, "--format=%H%x09%s"]).await?;
        Ok(stdout
            .lines()
            .filter_map(|line| {
                let (hash, subject) = line.split_once('\t')?;
                Some(CommitInfo {
                    hash: hash.to_string(),
                    subject: subject.to_string(),
                })
            })
            .collect())
    }

    /// Diff between refs, or working tree vs HEAD
    pub async fn diff(&self, opts: &DiffOpts) -> Result<String, GitError> {
        self.ensure_repository().await?;
        let mut args = vec!["diff".to_string()];
        if opts.staged {
            args.push("--cached".to_string());
        }
        if let Some(r1) = &opts.ref1 {
            args.push(r1.clone());
        }
        if let Some(r2) = &opts.ref2 {
            args.push(r2.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        self.git_ok(&arg_refs).await
    }

    /// Line counts from `diff --shortstat`
    pub async fn diff_stat(&self, opts: &DiffOpts) -> Result<DiffStat, GitError> {
        self.ensure_repository().await?;
        let mut args = vec!["diff".to_string(), "--shortstat".to_string()];
        if opts.staged {
            args.push("--cached".to_string());
        }
        if let Some(r1) = &opts.ref1 {
            args.push(r1.clone());
        }
        if let Some(r2) = &opts.ref2 {
            args.push(r2.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let stdout = self.git_ok(&arg_refs).await?;
        Ok(parse_shortstat(&stdout))
    }

    /// Merge a branch into the current one
    pub async fn merge(&self, branch: &str, opts: &MergeOpts) -> Result<MergeOutcome, GitError> {
        self.ensure_repository().await?;
        self.ensure_identity().await?;

        let mut args = vec!["merge".to_string()];
        if opts.no_ff {
            args.push("--no-ff".to_string());
        }
        args.push(branch.to_string());
        if let Some(msg) = &opts.message {
            args.push("-m".to_string());
            args.push(msg.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let output = self.git(&arg_refs).await?;

        if output.status.success() {
            let commit = self.git_ok(&["rev-parse", "HEAD"]).await?;
            return Ok(MergeOutcome::Merged {
                commit: commit.trim().to_string(),
            });
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if stdout.contains("CONFLICT") || stderr.contains("CONFLICT") {
            let files = self
                .git_ok(&["diff", "--name-only", "--diff-filter=U"])
                .await?
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();
            return Ok(MergeOutcome::Conflicts { files });
        }
        if stderr.contains("not something we can merge") {
            return Err(GitError::BranchNotFound(branch.to_string()));
        }
        Err(GitError::Git(stderr))
    }

    /// Abort an in-progress merge, best-effort
    pub async fn abort_merge(&self) -> Result<(), GitError> {
        self.ensure_repository().await?;
        let output = self.git(&["merge", "--abort"]).await?;
        if !output.status.success() {
            warn!("merge --abort failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(())
    }
}

/// Parse a `--shortstat` summary line like
/// ` 3 files changed, 10 insertions(+), 2 deletions(-)`
fn parse_shortstat(line: &str) -> DiffStat {
    let mut stat = DiffStat::default();
    for part in line.split(',') {
        let part = part.trim();
        let number: u32 = part
            .split_whitespace()
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        if part.contains("file") {
            stat.files_changed = number;
        } else if part.contains("insertion") {
            stat.insertions = number;
        } else if part.contains("deletion") {
            stat.deletions = number;
        }
    }
    stat
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup_git_repo(dir: &Path) -> GitService {
        let git = GitService::new(dir);
        Command::new("git")
            .args(["init", "-b", "main"])
            .current_dir(dir)
            .output()
            .await
            .unwrap();
        git.ensure_identity().await.unwrap();
        Command::new("git")
            .args(["commit", "--allow-empty", "-m", "initial"])
            .current_dir(dir)
            .output()
            .await
            .unwrap();
        git
    }

    #[test]
    fn test_parse_shortstat() {
        let stat = parse_shortstat(" 3 files changed, 10 insertions(+), 2 deletions(-)");
        assert_eq!(
            stat,
            DiffStat {
                files_changed: 3,
                insertions: 10,
                deletions: 2
            }
        );

        let stat = parse_shortstat(" 1 file changed, 5 insertions(+)");
        assert_eq!(stat.files_changed, 1);
        assert_eq!(stat.insertions, 5);
        assert_eq!(stat.deletions, 0);

        assert_eq!(parse_shortstat(""), DiffStat::default());
    }

    #[tokio::test]
    async fn test_not_a_repository() {
        let dir = tempdir().unwrap();
        let git = GitService::new(dir.path());
        assert!(!git.is_repository().await);
        assert!(matches!(git.status().await, Err(GitError::NotARepository(_))));
    }

    #[tokio::test]
    async fn test_status_and_stage_and_commit() {
        let dir = tempdir().unwrap();
        let git = setup_git_repo(dir.path()).await;

        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let status = git.status().await.unwrap();
        assert_eq!(status.untracked, vec!["a.txt"]);

        git.stage_files(StageTarget::All).await.unwrap();
        let status = git.status().await.unwrap();
        assert_eq!(status.staged, vec!["a.txt"]);

        let hash = git.commit("add a.txt").await.unwrap();
        assert_eq!(hash.len(), 40);
        assert!(git.status().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_commit_with_nothing_staged() {
        let dir = tempdir().unwrap();
        let git = setup_git_repo(dir.path()).await;
        assert!(matches!(git.commit("empty").await, Err(GitError::CommitFailed(_))));
    }

    #[tokio::test]
    async fn test_branch_lifecycle() {
        let dir = tempdir().unwrap();
        let git = setup_git_repo(dir.path()).await;

        git.create_branch("feature/x", None).await.unwrap();
        assert!(git.list_branches().await.unwrap().contains(&"feature/x".to_string()));

        git.checkout_branch("feature/x").await.unwrap();
        assert_eq!(git.current_branch().await.unwrap(), "feature/x");

        git.checkout_branch("main").await.unwrap();
        git.delete_branch("feature/x", true).await.unwrap();
        assert!(!git.list_branches().await.unwrap().contains(&"feature/x".to_string()));
    }

    #[tokio::test]
    async fn test_checkout_missing_branch() {
        let dir = tempdir().unwrap();
        let git = setup_git_repo(dir.path()).await;
        assert!(matches!(
            git.checkout_branch("no-such-branch").await,
            Err(GitError::BranchNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_merge_fast_forward_and_log() {
        let dir = tempdir().unwrap();
        let git = setup_git_repo(dir.path()).await;

        git.create_branch("feature/y", None).await.unwrap();
        git.checkout_branch("feature/y").await.unwrap();
        std::fs::write(dir.path().join("y.txt"), "y").unwrap();
        git.stage_files(StageTarget::All).await.unwrap();
        git.commit("add y").await.unwrap();

        git.checkout_branch("main").await.unwrap();
        let outcome = git.merge("feature/y", &MergeOpts::default()).await.unwrap();
        assert!(matches!(outcome, MergeOutcome::Merged { .. }));

        let log = git.log(Some(5)).await.unwrap();
        assert!(log.iter().any(|c| c.subject == "add y"));
    }

    #[tokio::test]
    async fn test_merge_conflict_lists_files() {
        let dir = tempdir().unwrap();
        let git = setup_git_repo(dir.path()).await;

        std::fs::write(dir.path().join("c.txt"), "base\n").unwrap();
        git.stage_files(StageTarget::All).await.unwrap();
        git.commit("base").await.unwrap();

        git.create_branch("feature/z", None).await.unwrap();
        git.checkout_branch("feature/z").await.unwrap();
        std::fs::write(dir.path().join("c.txt"), "feature\n").unwrap();
        git.stage_files(StageTarget::All).await.unwrap();
        git.commit("feature change").await.unwrap();

        git.checkout_branch("main").await.unwrap();
        std::fs::write(dir.path().join("c.txt"), "main\n").unwrap();
        git.stage_files(StageTarget::All).await.unwrap();
        git.commit("main change").await.unwrap();

        match git.merge("feature/z", &MergeOpts::default()).await.unwrap() {
            MergeOutcome::Conflicts { files } => assert_eq!(files, vec!["c.txt"]),
            MergeOutcome::Merged { .. } => panic!("expected conflict"),
        }
        git.abort_merge().await.unwrap();
        assert!(git.status().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_diff_stat() {
        let dir = tempdir().unwrap();
        let git = setup_git_repo(dir.path()).await;

        std::fs::write(dir.path().join("d.txt"), "one\ntwo\n").unwrap();
        git.stage_files(StageTarget::All).await.unwrap();

        let stat = git
            .diff_stat(&DiffOpts {
                staged: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(stat.files_changed, 1);
        assert_eq!(stat.insertions, 2);
    }
}
