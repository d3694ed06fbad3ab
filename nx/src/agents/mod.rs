//! Agents: typed worker pool and LLM-driven role runners

mod coder;
mod merger;
mod pool;
mod reviewer;
mod runner;
mod tester;

pub use coder::{CoderRunner, extract_file_blocks};
pub use merger::{ConflictAnalysis, ConflictKind, MergeProposal, MergerRunnerAgent, parse_proposal};
pub use pool::{AgentPool, PoolError, PoolStatus};
pub use reviewer::{IssueSeverity, ReviewIssue, ReviewVerdict, ReviewerRunner, parse_verdict};
pub use runner::{
    AgentContext, AgentRunner, TASK_COMPLETE_MARKER, TaskResult, TaskResultMetrics, render_template, run_agent_loop,
};
pub use tester::TesterRunner;
