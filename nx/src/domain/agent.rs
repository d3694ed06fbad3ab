//! Agent domain type

use nexusstore::now_ms;
use serde::{Deserialize, Serialize};

use super::id::generate_id;

/// Typed agent roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Planner,
    Coder,
    Tester,
    Reviewer,
    Merger,
}

impl AgentKind {
    /// All agent kinds, for capacity iteration
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Planner,
        AgentKind::Coder,
        AgentKind::Tester,
        AgentKind::Reviewer,
        AgentKind::Merger,
    ];
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planner => "planner",
            Self::Coder => "coder",
            Self::Tester => "tester",
            Self::Reviewer => "reviewer",
            Self::Merger => "merger",
        };
        write!(f, "{s}")
    }
}

/// Agent lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Assigned,
    Working,
    Error,
    Terminated,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Assigned => "assigned",
            Self::Working => "working",
            Self::Error => "error",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Per-agent rollup metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_iterations: u64,
    pub tokens_used: u64,
    pub total_time_active_ms: u64,
}

impl AgentMetrics {
    /// Average iterations per finished task (completed or failed)
    pub fn average_iterations_per_task(&self) -> f64 {
        let finished = self.tasks_completed + self.tasks_failed;
        if finished == 0 {
            0.0
        } else {
            self.total_iterations as f64 / finished as f64
        }
    }
}

/// A typed worker agent. Owned by the pool; destroyed on terminate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub model: String,
    pub current_task_id: Option<String>,
    pub worktree_path: Option<String>,
    pub metrics: AgentMetrics,
    pub spawned_at: i64,
    pub last_active_at: i64,
}

impl Agent {
    /// Create a new idle agent
    pub fn new(kind: AgentKind, model: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: generate_id("agent", &kind.to_string()),
            kind,
            status: AgentStatus::Idle,
            model: model.into(),
            current_task_id: None,
            worktree_path: None,
            metrics: AgentMetrics::default(),
            spawned_at: now,
            last_active_at: now,
        }
    }

    /// Update status, bumping activity
    pub fn set_status(&mut self, status: AgentStatus) {
        self.status = status;
        self.last_active_at = now_ms();
    }

    /// Whether the agent can accept a task
    pub fn is_available(&self) -> bool {
        self.status == AgentStatus::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_new_is_idle() {
        let agent = Agent::new(AgentKind::Coder, "claude-sonnet-4");
        assert!(agent.is_available());
        assert!(agent.id.contains("-agent-coder"));
        assert!(agent.current_task_id.is_none());
    }

    #[test]
    fn test_average_iterations() {
        let mut m = AgentMetrics::default();
        assert_eq!(m.average_iterations_per_task(), 0.0);
        m.tasks_completed = 3;
        m.tasks_failed = 1;
        m.total_iterations = 12;
        assert_eq!(m.average_iterations_per_task(), 3.0);
    }
}
