//! Nexus - autonomous software construction engine
//!
//! Given interviewed requirements (or an existing codebase plus change
//! requests), Nexus decomposes work into atomic tasks, schedules them in
//! dependency waves across a pool of LLM-backed agents running in
//! isolated git worktrees, drives each task through a build/lint/test/
//! review loop, merges successes back to mainline and escalates the rest
//! to a human reviewer. State persists so long runs survive restarts.
//!
//! # Modules
//!
//! - [`events`] - typed event bus every component emits into
//! - [`llm`] - LLM client trait, Anthropic and CLI backends, token meter
//! - [`git`] - typed git primitives over the CLI
//! - [`worktree`] - per-task worktree isolation with a durable registry
//! - [`queue`] - wave- and dependency-aware task queue
//! - [`planning`] - decomposition, wave computation, estimation
//! - [`agents`] - typed agent pool and role runners
//! - [`qa`] - build/lint/test/review runners and the QA loop engine
//! - [`interview`] - LLM-guided requirements capture
//! - [`coordinator`] - the state machine gluing everything together

pub mod agents;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod events;
pub mod git;
pub mod interview;
pub mod llm;
pub mod merge;
pub mod planning;
pub mod qa;
pub mod queue;
pub mod review;
pub mod state;
pub mod worktree;

// Re-export commonly used types
pub use agents::{AgentContext, AgentPool, AgentRunner, PoolError, TaskResult};
pub use checkpoint::{CheckpointError, CheckpointManager, CheckpointMeta, RestoreOpts};
pub use config::{Config, InterviewConfig, LlmConfig, PoolConfig, QaConfig, StorageConfig};
pub use coordinator::{CoordinatorConfig, CoordinatorStatus, NexusCoordinator, Phase, Progress, RunState};
pub use domain::{
    Agent, AgentKind, AgentStatus, Feature, Priority, Project, ProjectMode, ProjectState, ProjectStatus, Requirement,
    Review, ReviewReason, ReviewStatus, Task, TaskKind, TaskSize, TaskStatus, Wave,
};
pub use events::{Event, EventBus, EventKind, EventScope, create_event_bus};
pub use git::{GitError, GitService};
pub use interview::{InterviewEngine, InterviewError, RequirementExtractor, SessionManager, StartOpts};
pub use llm::{AnthropicClient, CliClient, CompletionRequest, CompletionResponse, LlmClient, LlmError, TokenMeter};
pub use merge::{MergeOptions, MergeReport, MergerRunner};
pub use planning::{DecomposeOpts, DependencyResolver, TaskDecomposer, TimeEstimator};
pub use qa::{QaLoopEngine, QaLoopReport};
pub use queue::{QueueError, TaskQueue};
pub use review::{HumanReviewService, ReviewError, ReviewRequest};
pub use state::{StateError, StateManager};
pub use worktree::{WorktreeConfig, WorktreeError, WorktreeInfo, WorktreeManager};
