//! Agent pool: typed capacity, lifecycle and task dispatch

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::domain::{Agent, AgentKind, AgentStatus, Task};
use crate::events::{EventKind, EventScope};

use super::coder::CoderRunner;
use super::merger::MergerRunnerAgent;
use super::reviewer::ReviewerRunner;
use super::runner::{AgentContext, AgentRunner, TaskResult, run_agent_loop};
use super::tester::TesterRunner;

/// Pool operation errors
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Pool capacity exceeded for {0}")]
    CapacityExceeded(AgentKind),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("No runner registered for {0}")]
    NoRunner(AgentKind),
}

/// Pool status projection
#[derive(Debug, Clone, Default)]
pub struct PoolStatus {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub by_kind: HashMap<AgentKind, usize>,
}

/// Typed pool of worker agents. Owns every agent; agents are destroyed on
/// terminate. Runners are injected once at construction.
pub struct AgentPool {
    agents: Mutex<HashMap<String, Agent>>,
    capacity: HashMap<AgentKind, usize>,
    runners: HashMap<AgentKind, Arc<dyn AgentRunner>>,
    events: EventScope,
    model: String,
}

impl AgentPool {
    /// Create a pool with explicit runners
    pub fn new(
        config: &PoolConfig,
        runners: HashMap<AgentKind, Arc<dyn AgentRunner>>,
        events: EventScope,
        model: impl Into<String>,
    ) -> Self {
        let capacity = HashMap::from([
            (AgentKind::Planner, config.planner),
            (AgentKind::Coder, config.coder),
            (AgentKind::Tester, config.tester),
            (AgentKind::Reviewer, config.reviewer),
            (AgentKind::Merger, config.merger),
        ]);
        Self {
            agents: Mutex::new(HashMap::new()),
            capacity,
            runners,
            events,
            model: model.into(),
        }
    }

    /// Create a pool with the standard role runners
    pub fn with_standard_runners(config: &PoolConfig, events: EventScope, model: impl Into<String>) -> Self {
        let runners: HashMap<AgentKind, Arc<dyn AgentRunner>> = HashMap::from([
            (AgentKind::Coder, Arc::new(CoderRunner) as Arc<dyn AgentRunner>),
            (AgentKind::Tester, Arc::new(TesterRunner) as Arc<dyn AgentRunner>),
            (AgentKind::Reviewer, Arc::new(ReviewerRunner) as Arc<dyn AgentRunner>),
            (AgentKind::Merger, Arc::new(MergerRunnerAgent) as Arc<dyn AgentRunner>),
        ]);
        Self::new(config, runners, events, model)
    }

    /// Spawn a new agent; fails when the kind is at capacity
    pub async fn spawn(&self, kind: AgentKind) -> Result<Agent, PoolError> {
        let mut agents = self.agents.lock().await;
        let live = agents.values().filter(|a| a.kind == kind).count();
        let cap = self.capacity.get(&kind).copied().unwrap_or(0);
        if live >= cap {
            return Err(PoolError::CapacityExceeded(kind));
        }

        let agent = Agent::new(kind, &self.model);
        agents.insert(agent.id.clone(), agent.clone());
        drop(agents);

        info!(agent_id = %agent.id, %kind, "Agent spawned");
        self.events.emit(EventKind::AgentSpawned {
            agent_id: agent.id.clone(),
            kind: kind.to_string(),
        });
        Ok(agent)
    }

    /// Terminate and destroy an agent
    pub async fn terminate(&self, id: &str) -> Result<(), PoolError> {
        let mut agents = self.agents.lock().await;
        let mut agent = agents.remove(id).ok_or_else(|| PoolError::UnknownAgent(id.to_string()))?;
        agent.set_status(AgentStatus::Terminated);
        drop(agents);

        self.events.emit(EventKind::AgentTerminated { agent_id: id.to_string() });
        Ok(())
    }

    /// Assign a task (and optionally a worktree) to an agent
    pub async fn assign(&self, id: &str, task_id: &str, worktree_path: Option<String>) -> Result<(), PoolError> {
        let mut agents = self.agents.lock().await;
        let agent = agents.get_mut(id).ok_or_else(|| PoolError::UnknownAgent(id.to_string()))?;
        agent.current_task_id = Some(task_id.to_string());
        agent.worktree_path = worktree_path;
        agent.set_status(AgentStatus::Assigned);
        drop(agents);

        self.events.emit(EventKind::AgentAssigned {
            agent_id: id.to_string(),
            task_id: task_id.to_string(),
        });
        Ok(())
    }

    /// Release an agent back to idle, clearing its assignment
    pub async fn release(&self, id: &str) -> Result<(), PoolError> {
        let mut agents = self.agents.lock().await;
        let agent = agents.get_mut(id).ok_or_else(|| PoolError::UnknownAgent(id.to_string()))?;
        agent.current_task_id = None;
        agent.worktree_path = None;
        agent.set_status(AgentStatus::Idle);
        drop(agents);

        self.events.emit(EventKind::AgentIdle { agent_id: id.to_string() });
        Ok(())
    }

    /// Idle agents of any kind
    pub async fn available(&self) -> Vec<Agent> {
        let agents = self.agents.lock().await;
        agents.values().filter(|a| a.is_available()).cloned().collect()
    }

    /// Idle agents of one kind
    pub async fn available_by_kind(&self, kind: AgentKind) -> Vec<Agent> {
        let agents = self.agents.lock().await;
        agents
            .values()
            .filter(|a| a.is_available() && a.kind == kind)
            .cloned()
            .collect()
    }

    /// All live agents
    pub async fn all(&self) -> Vec<Agent> {
        self.agents.lock().await.values().cloned().collect()
    }

    /// Agents currently assigned or working
    pub async fn active(&self) -> Vec<Agent> {
        let agents = self.agents.lock().await;
        agents
            .values()
            .filter(|a| matches!(a.status, AgentStatus::Assigned | AgentStatus::Working))
            .cloned()
            .collect()
    }

    /// Look up an agent
    pub async fn by_id(&self, id: &str) -> Option<Agent> {
        self.agents.lock().await.get(id).cloned()
    }

    /// Whether spawning one more agent of this kind would succeed
    pub async fn has_capacity(&self, kind: AgentKind) -> bool {
        let agents = self.agents.lock().await;
        let live = agents.values().filter(|a| a.kind == kind).count();
        live < self.capacity.get(&kind).copied().unwrap_or(0)
    }

    /// Status projection for embedders
    pub async fn status(&self) -> PoolStatus {
        let agents = self.agents.lock().await;
        let mut status = PoolStatus {
            total: agents.len(),
            ..Default::default()
        };
        for agent in agents.values() {
            *status.by_kind.entry(agent.kind).or_default() += 1;
            if agent.is_available() {
                status.idle += 1;
            } else {
                status.busy += 1;
            }
        }
        status
    }

    /// Run a task on an agent, wrapping the runner call in the
    /// idle -> working -> idle status transition and rolling the outcome
    /// into the agent's metrics.
    pub async fn run_task(&self, agent_id: &str, task: &Task, mut ctx: AgentContext) -> Result<TaskResult, PoolError> {
        let kind = {
            let mut agents = self.agents.lock().await;
            let agent = agents
                .get_mut(agent_id)
                .ok_or_else(|| PoolError::UnknownAgent(agent_id.to_string()))?;
            agent.set_status(AgentStatus::Working);
            agent.kind
        };

        let Some(runner) = self.runners.get(&kind).cloned() else {
            if let Some(agent) = self.agents.lock().await.get_mut(agent_id) {
                agent.set_status(AgentStatus::Idle);
            }
            return Err(PoolError::NoRunner(kind));
        };
        ctx.agent_id = agent_id.to_string();

        debug!(%agent_id, task_id = %task.id, %kind, "Dispatching task to runner");
        let result = run_agent_loop(runner.as_ref(), task, &ctx).await;

        let mut agents = self.agents.lock().await;
        if let Some(agent) = agents.get_mut(agent_id) {
            if result.success {
                agent.metrics.tasks_completed += 1;
            } else {
                agent.metrics.tasks_failed += 1;
            }
            agent.metrics.total_iterations += result.metrics.iterations as u64;
            agent.metrics.tokens_used += result.metrics.tokens_used;
            agent.metrics.total_time_active_ms += result.metrics.time_ms;
            agent.set_status(AgentStatus::Idle);
        }
        drop(agents);

        self.events.emit(EventKind::AgentIdle {
            agent_id: agent_id.to_string(),
        });
        Ok(result)
    }
}
