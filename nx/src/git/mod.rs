//! Git service: typed primitives over the git CLI

mod service;

pub use service::{
    CommitInfo, DiffOpts, DiffStat, GitError, GitService, GitStatus, MergeOpts, MergeOutcome, StageTarget,
};
