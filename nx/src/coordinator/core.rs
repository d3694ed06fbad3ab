//! NexusCoordinator - the top-level orchestration state machine
//!
//! Owns the task queue, the agent pool and the wave pump. Planning turns
//! features into tasks and waves; execution dispatches ready tasks to
//! agents in isolated worktrees, runs the QA loop, merges winners and
//! escalates losers to human review. Nothing a single task does can stop
//! the project: failures mark the task and move on.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use eyre::{Context, Result, bail};
use nexusstore::Database;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::agents::AgentPool;
use crate::checkpoint::CheckpointManager;
use crate::config::{PoolConfig, QaConfig};
use crate::domain::{
    Agent, AgentKind, Feature, Project, ProjectMode, ProjectStatus, ReviewReason, StatePatch, Task, TaskStatus, Wave,
};
use crate::events::{Event, EventBus, EventKind, EventScope};
use crate::git::{GitError, GitService, StageTarget};
use crate::llm::LlmClient;
use crate::merge::{MergeOptions, MergerRunner};
use crate::planning::{
    DecomposeOpts, DecomposerConfig, DependencyResolver, TaskDecomposer, format_evolution_context, generate_repo_map,
};
use crate::qa::QaLoopEngine;
use crate::queue::TaskQueue;
use crate::review::{HumanReviewService, ReviewRequest};
use crate::state::StateManager;
use crate::worktree::{WorktreeInfo, WorktreeManager, ensure_gitignore};

use super::config::CoordinatorConfig;

/// Coordinator run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopping,
}

/// Coordinator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Execution,
    Completion,
}

/// Status snapshot for embedders
#[derive(Debug, Clone)]
pub struct CoordinatorStatus {
    pub state: RunState,
    pub phase: Phase,
    pub project_id: Option<String>,
    pub pause_reason: Option<String>,
    pub current_wave: u32,
    pub queued_tasks: usize,
    pub running_tasks: usize,
}

/// Progress counters
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub total_tasks: usize,
    pub current_wave: u32,
    pub total_waves: u32,
}

struct Control {
    state: RunState,
    phase: Phase,
    pause_reason: Option<String>,
}

/// What a pending review is holding on to
struct ReviewTracking {
    task_id: String,
    agent_id: Option<String>,
    has_worktree: bool,
}

struct Inner {
    config: CoordinatorConfig,
    qa_config: QaConfig,
    llm: Arc<dyn LlmClient>,
    bus: Arc<EventBus>,
    events: EventScope,
    db: Arc<Database>,
    state_mgr: Arc<StateManager>,
    queue: TaskQueue,
    pool: AgentPool,
    decomposer: TaskDecomposer,
    resolver: DependencyResolver,
    control: Mutex<Control>,
    resume: Notify,
    project_id: Mutex<Option<String>>,
    total_waves: AtomicU32,
    review_tracking: Mutex<HashMap<String, ReviewTracking>>,
    worktrees: RwLock<Option<Arc<WorktreeManager>>>,
    merger: RwLock<Option<Arc<MergerRunner>>>,
    reviews: RwLock<Option<Arc<HumanReviewService>>>,
    checkpoints: RwLock<Option<Arc<CheckpointManager>>>,
}

/// The coordinator handle. Cheap to clone; clones drive the same run.
#[derive(Clone)]
pub struct NexusCoordinator {
    inner: Arc<Inner>,
}

impl NexusCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        qa_config: QaConfig,
        pool_config: &PoolConfig,
        llm: Arc<dyn LlmClient>,
        bus: Arc<EventBus>,
        db: Arc<Database>,
        state_mgr: Arc<StateManager>,
    ) -> Self {
        let events = bus.scope("coordinator");
        let queue = TaskQueue::new(bus.scope("queue"));
        let pool = AgentPool::with_standard_runners(pool_config, bus.scope("agent-pool"), "nexus");
        let decomposer = TaskDecomposer::new(llm.clone(), DecomposerConfig::default());

        Self {
            inner: Arc::new(Inner {
                config,
                qa_config,
                llm,
                bus,
                events,
                db,
                state_mgr,
                queue,
                pool,
                decomposer,
                resolver: DependencyResolver::default(),
                control: Mutex::new(Control {
                    state: RunState::Idle,
                    phase: Phase::Planning,
                    pause_reason: None,
                }),
                resume: Notify::new(),
                project_id: Mutex::new(None),
                total_waves: AtomicU32::new(0),
                review_tracking: Mutex::new(HashMap::new()),
                worktrees: RwLock::new(None),
                merger: RwLock::new(None),
                reviews: RwLock::new(None),
                checkpoints: RwLock::new(None),
            }),
        }
    }

    // === Collaborator injection ===

    pub async fn set_worktree_manager(&self, manager: Arc<WorktreeManager>) {
        *self.inner.worktrees.write().await = Some(manager);
    }

    pub async fn set_merger(&self, merger: Arc<MergerRunner>) {
        *self.inner.merger.write().await = Some(merger);
    }

    pub async fn set_review_service(&self, reviews: Arc<HumanReviewService>) {
        *self.inner.reviews.write().await = Some(reviews);
    }

    pub async fn set_checkpoint_manager(&self, checkpoints: Arc<CheckpointManager>) {
        *self.inner.checkpoints.write().await = Some(checkpoints);
    }

    // === Project setup ===

    /// Prepare the on-disk project structure and durable rows
    pub async fn initialize(&self, project: &Project) -> Result<()> {
        let root = PathBuf::from(&project.root_path);
        let nexus_dir = root.join(".nexus");
        tokio::fs::create_dir_all(nexus_dir.join("worktrees"))
            .await
            .context("Failed to create .nexus/worktrees")?;
        tokio::fs::create_dir_all(nexus_dir.join("checkpoints"))
            .await
            .context("Failed to create .nexus/checkpoints")?;

        let config_json = serde_json::json!({
            "name": project.name,
            "created": project.created_at,
            "settings": { "mode": project.mode.to_string() },
        });
        tokio::fs::write(nexus_dir.join("config.json"), serde_json::to_string_pretty(&config_json)?)
            .await
            .context("Failed to write project config")?;
        tokio::fs::write(
            nexus_dir.join("STATE.md"),
            format!("# {}\n\nManaged by Nexus. Mode: {}.\n", project.name, project.mode),
        )
        .await?;
        ensure_gitignore(&root).await?;

        self.inner.db.upsert_project(&project.to_row())?;
        self.inner
            .state_mgr
            .create_state(&project.id, &project.name, project.mode)
            .await?;

        info!(project_id = %project.id, root = %root.display(), "Project initialized");
        Ok(())
    }

    // === Control API ===

    /// Run the full pipeline for a project: decompose its features, plan
    /// waves, execute them.
    pub async fn start(&self, project_id: &str) -> Result<()> {
        self.begin_run(project_id).await?;
        let result = self.start_inner(project_id).await;
        if result.is_err() {
            let mut control = self.inner.control.lock().await;
            control.state = RunState::Idle;
        }
        result
    }

    async fn start_inner(&self, project_id: &str) -> Result<()> {
        let project = self
            .inner
            .db
            .get_project(project_id)?
            .ok_or_else(|| eyre::eyre!("Unknown project: {project_id}"))?;
        let mode: ProjectMode = project.mode.parse().unwrap_or_default();
        self.inner.events.emit(EventKind::OrchestrationMode {
            mode: mode.to_string(),
        });

        let tasks = self.decompose_project(project_id, mode).await?;
        let waves = self.plan(project_id, tasks).await?;
        self.run_waves(project_id, &waves).await;
        self.finish_run(project_id).await;
        Ok(())
    }

    /// Execute pre-built tasks, skipping decomposition
    pub async fn execute_existing_tasks(&self, project_id: &str, tasks: Vec<Task>, project_path: &str) -> Result<()> {
        self.begin_run(project_id).await?;
        if !project_path.is_empty() && project_path != self.inner.config.project_root.to_string_lossy() {
            debug!(%project_path, "Executing against explicit project path");
        }

        let waves = match self.plan(project_id, tasks).await {
            Ok(waves) => waves,
            Err(e) => {
                let mut control = self.inner.control.lock().await;
                control.state = RunState::Idle;
                return Err(e);
            }
        };
        self.run_waves(project_id, &waves).await;
        self.finish_run(project_id).await;
        Ok(())
    }

    /// Pause: in-flight tasks finish, then the pump parks
    pub async fn pause(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut control = self.inner.control.lock().await;
        if control.state == RunState::Running {
            control.state = RunState::Paused;
            control.pause_reason = Some(reason.clone());
            drop(control);
            info!(%reason, "Coordinator paused");
            self.inner.events.emit(EventKind::CoordinatorPaused { reason });
        }
    }

    /// Resume a paused run
    pub async fn resume(&self) {
        let mut control = self.inner.control.lock().await;
        if control.state == RunState::Paused {
            control.state = RunState::Running;
            control.pause_reason = None;
            drop(control);
            self.inner.resume.notify_waiters();
            info!("Coordinator resumed");
            self.inner.events.emit(EventKind::CoordinatorResumed);
        }
    }

    /// Stop: refuse new dispatch, give in-flight tasks a grace period,
    /// terminate agents. Best-effort by design.
    pub async fn stop(&self) {
        {
            let mut control = self.inner.control.lock().await;
            control.state = RunState::Stopping;
        }
        self.inner.resume.notify_waiters();

        for agent in self.inner.pool.all().await {
            let _ = self.inner.pool.terminate(&agent.id).await;
        }
        info!("Coordinator stopping");
        self.inner.events.emit(EventKind::CoordinatorStopped);
    }

    /// Status snapshot
    pub async fn get_status(&self) -> CoordinatorStatus {
        let control = self.inner.control.lock().await;
        let stats = self.inner.queue.stats().await;
        CoordinatorStatus {
            state: control.state,
            phase: control.phase,
            project_id: self.inner.project_id.lock().await.clone(),
            pause_reason: control.pause_reason.clone(),
            current_wave: stats.current_wave,
            queued_tasks: stats.queued,
            running_tasks: stats.assigned,
        }
    }

    /// Progress counters
    pub async fn get_progress(&self) -> Progress {
        let stats = self.inner.queue.stats().await;
        Progress {
            completed_tasks: stats.completed,
            failed_tasks: stats.failed,
            total_tasks: stats.completed + stats.failed + stats.queued + stats.assigned,
            current_wave: stats.current_wave,
            total_waves: self.inner.total_waves.load(Ordering::SeqCst),
        }
    }

    /// Agents currently assigned or working
    pub async fn get_active_agents(&self) -> Vec<Agent> {
        self.inner.pool.active().await
    }

    /// Tasks still waiting for dispatch
    pub async fn get_pending_tasks(&self) -> Vec<Task> {
        self.inner.queue.ready_tasks().await
    }

    /// Subscribe to the event stream
    pub fn on_event(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.inner.bus.subscribe()
    }

    /// Manual checkpoint passthrough
    pub async fn create_checkpoint(&self, reason: &str) -> Result<()> {
        let project_id = self
            .inner
            .project_id
            .lock()
            .await
            .clone()
            .ok_or_else(|| eyre::eyre!("No active project"))?;
        let checkpoints = self.inner.checkpoints.read().await.clone();
        match checkpoints {
            Some(manager) => {
                manager.create_checkpoint(&project_id, reason).await?;
                Ok(())
            }
            None => bail!("No checkpoint manager configured"),
        }
    }

    // === Review resolutions ===

    /// A human approved the review: the task counts as completed
    pub async fn handle_review_approved(&self, review_id: &str) -> Result<()> {
        let Some(tracking) = self.inner.review_tracking.lock().await.remove(review_id) else {
            bail!("No tracked task for review {review_id}");
        };

        if let Err(e) = self.inner.queue.mark_complete(&tracking.task_id).await {
            warn!(task_id = %tracking.task_id, error = %e, "Review approval for unknown task");
        }
        self.inner.events.emit(EventKind::TaskCompleted {
            task_id: tracking.task_id.clone(),
        });
        self.cleanup_after_review(&tracking).await;
        self.resume_if_paused_for_review().await;
        Ok(())
    }

    /// A human rejected the review: the task counts as failed
    pub async fn handle_review_rejected(&self, review_id: &str, feedback: &str) -> Result<()> {
        let Some(tracking) = self.inner.review_tracking.lock().await.remove(review_id) else {
            bail!("No tracked task for review {review_id}");
        };

        if let Err(e) = self.inner.queue.mark_failed(&tracking.task_id).await {
            warn!(task_id = %tracking.task_id, error = %e, "Review rejection for unknown task");
        }
        self.inner.events.emit(EventKind::TaskFailed {
            task_id: tracking.task_id.clone(),
            error: format!("rejected in review: {feedback}"),
            recoverable: false,
        });
        self.cleanup_after_review(&tracking).await;
        self.resume_if_paused_for_review().await;
        Ok(())
    }

    async fn cleanup_after_review(&self, tracking: &ReviewTracking) {
        if tracking.has_worktree
            && let Some(worktrees) = self.inner.worktrees.read().await.clone()
            && let Err(e) = worktrees.remove_worktree(&tracking.task_id, true).await
        {
            warn!(task_id = %tracking.task_id, error = %e, "Failed to remove retained worktree");
        }
        if let Some(agent_id) = &tracking.agent_id {
            let _ = self.inner.pool.release(agent_id).await;
        }
    }

    async fn resume_if_paused_for_review(&self) {
        let paused_for_review = {
            let control = self.inner.control.lock().await;
            control.state == RunState::Paused && control.pause_reason.as_deref() == Some("review_pending")
        };
        if paused_for_review {
            self.resume().await;
        }
    }

    // === Planning ===

    async fn begin_run(&self, project_id: &str) -> Result<()> {
        {
            let mut control = self.inner.control.lock().await;
            if control.state != RunState::Idle {
                bail!("Coordinator is already {state:?}", state = control.state);
            }
            control.state = RunState::Running;
            control.phase = Phase::Planning;
        }
        *self.inner.project_id.lock().await = Some(project_id.to_string());

        if self.inner.state_mgr.get_state(project_id).await.is_none() {
            self.inner.state_mgr.create_state(project_id, project_id, ProjectMode::Genesis).await?;
        }

        self.inner.events.emit(EventKind::CoordinatorStarted {
            project_id: project_id.to_string(),
        });
        self.set_project_status(project_id, ProjectStatus::Planning).await;
        Ok(())
    }

    /// Features for decomposition: stored ones, or one per requirement,
    /// or a single synthetic feature when neither exists.
    async fn load_features(&self, project_id: &str) -> Result<Vec<Feature>> {
        let rows = self.inner.db.list_features(project_id)?;
        if !rows.is_empty() {
            return Ok(rows
                .into_iter()
                .map(|r| {
                    let mut f = Feature::new(&r.project_id, &r.name, &r.description);
                    f.id = r.id;
                    f
                })
                .collect());
        }

        let requirements = self.inner.db.list_requirements(project_id)?;
        let features: Vec<Feature> = if requirements.is_empty() {
            vec![Feature::new(project_id, "Project", "Implement the project as specified")]
        } else {
            requirements
                .iter()
                .map(|r| Feature::new(project_id, &r.text, &r.text))
                .collect()
        };

        for feature in &features {
            self.inner.db.upsert_feature(&feature.to_row())?;
            self.inner.events.emit(EventKind::FeatureCreated {
                feature_id: feature.id.clone(),
                name: feature.name.clone(),
            });
        }
        Ok(features)
    }

    async fn decompose_project(&self, project_id: &str, mode: ProjectMode) -> Result<Vec<Task>> {
        self.inner.events.emit(EventKind::PlanningStarted {
            project_id: project_id.to_string(),
        });

        let features = self.load_features(project_id).await?;
        let repo_map = match mode {
            ProjectMode::Evolution => Some(generate_repo_map(
                &self.inner.config.project_root,
                self.inner.config.repo_map_token_budget,
            )),
            ProjectMode::Genesis => None,
        };

        let mut tasks = Vec::new();
        for feature in &features {
            let description = match &repo_map {
                Some(map) => format_evolution_context(map, &feature.to_prompt_text()),
                None => feature.to_prompt_text(),
            };

            let decomposed = self
                .inner
                .decomposer
                .decompose(project_id, &description, &DecomposeOpts::default())
                .await
                .with_context(|| format!("Decomposition failed for feature '{}'", feature.name))?;
            for warning in &decomposed.warnings {
                warn!(feature = %feature.name, %warning, "Decomposition warning");
            }

            for mut task in decomposed.tasks {
                task.feature_id = Some(feature.id.clone());
                if mode == ProjectMode::Evolution {
                    task.test_criteria.push("Verify compatibility with existing code".to_string());
                }
                tasks.push(task);
            }

            self.inner.events.emit(EventKind::PlanningProgress {
                project_id: project_id.to_string(),
                feature: feature.name.clone(),
                tasks_so_far: tasks.len(),
            });
        }
        Ok(tasks)
    }

    /// Validate, compute waves, persist and enqueue
    async fn plan(&self, project_id: &str, mut tasks: Vec<Task>) -> Result<Vec<Wave>> {
        for task in &mut tasks {
            task.project_id = project_id.to_string();
        }

        let report = self.inner.resolver.validate(&tasks);
        for warning in &report.warnings {
            warn!(%warning, "Plan validation warning");
        }
        if !report.is_ok() {
            let error = report.errors.join("; ");
            self.inner.events.emit(EventKind::PlanningError {
                project_id: project_id.to_string(),
                error: error.clone(),
            });
            self.inner.events.emit(EventKind::ProjectFailed {
                project_id: project_id.to_string(),
                error: error.clone(),
                recoverable: false,
            });
            self.set_project_status(project_id, ProjectStatus::Failed).await;
            bail!("Plan validation failed: {error}");
        }

        let waves = self
            .inner
            .resolver
            .calculate_waves(&tasks)
            .context("Wave calculation failed")?;
        self.inner.total_waves.store(waves.len() as u32, Ordering::SeqCst);

        let mut total_tasks = 0u32;
        for wave in &waves {
            for task in &wave.tasks {
                self.inner.db.upsert_task(&task.to_row())?;
                self.inner.events.emit(EventKind::TaskCreated {
                    task_id: task.id.clone(),
                    name: task.name.clone(),
                });
                self.inner.queue.enqueue(task.clone(), Some(wave.id)).await;
                total_tasks += 1;
            }
        }

        let _ = self
            .inner
            .state_mgr
            .update_state(
                project_id,
                StatePatch {
                    total_tasks: Some(total_tasks),
                    ..Default::default()
                },
            )
            .await;

        self.inner.events.emit(EventKind::PlanningCompleted {
            project_id: project_id.to_string(),
            total_tasks: total_tasks as usize,
            total_waves: waves.len(),
        });
        info!(%project_id, total_tasks, waves = waves.len(), "Planning complete");
        Ok(waves)
    }

    // === Execution ===

    async fn run_waves(&self, project_id: &str, waves: &[Wave]) {
        {
            let mut control = self.inner.control.lock().await;
            control.phase = Phase::Execution;
        }
        self.set_project_status(project_id, ProjectStatus::Executing).await;

        for wave in waves {
            if self.is_stopping().await {
                break;
            }

            self.inner.events.emit(EventKind::WaveStarted {
                wave_id: wave.id,
                task_count: wave.tasks.len(),
            });

            self.pump_wave(project_id, wave.id).await;

            let completed = self.inner.queue.completed_ids().await;
            let failed = self.inner.queue.failed_ids().await;
            let wave_completed = wave.tasks.iter().filter(|t| completed.contains(&t.id)).count();
            let wave_failed = wave.tasks.iter().filter(|t| failed.contains(&t.id)).count();
            self.inner.events.emit(EventKind::WaveCompleted {
                wave_id: wave.id,
                completed: wave_completed,
                failed: wave_failed,
            });

            let _ = self
                .inner
                .state_mgr
                .update_state(
                    project_id,
                    StatePatch {
                        completed_tasks: Some(completed.len() as u32),
                        ..Default::default()
                    },
                )
                .await;

            if let Some(checkpoints) = self.inner.checkpoints.read().await.clone()
                && let Err(e) = checkpoints
                    .create_auto_checkpoint(project_id, &format!("wave_{}_completed", wave.id))
                    .await
            {
                warn!(error = %e, "Wave checkpoint failed");
            }
        }
    }

    /// Dispatch ready tasks for one wave until its queue and running set
    /// are both empty. Respects pause and stop.
    async fn pump_wave(&self, project_id: &str, wave_id: u32) {
        let poll = Duration::from_millis(self.inner.config.poll_interval_ms);
        let mut running: JoinSet<()> = JoinSet::new();

        loop {
            // Reap finished task closures
            while running.try_join_next().is_some() {}

            match self.control_state().await {
                RunState::Stopping => {
                    let grace = Duration::from_millis(self.inner.config.stop_grace_ms);
                    let _ = tokio::time::timeout(grace, async {
                        while running.join_next().await.is_some() {}
                    })
                    .await;
                    running.abort_all();
                    return;
                }
                RunState::Paused => {
                    // Finish in-flight work, then park until resumed.
                    // The timeout guards against a wakeup racing the park.
                    while running.join_next().await.is_some() {}
                    while self.control_state().await == RunState::Paused {
                        let _ = tokio::time::timeout(Duration::from_millis(50), self.inner.resume.notified()).await;
                    }
                    continue;
                }
                _ => {}
            }

            // Dispatch everything ready while agents are available. Only
            // work belonging to this wave is pulled; later waves get their
            // own pump with their own wave:started event.
            loop {
                let belongs_here = self.inner.queue.peek().await.is_some_and(|t| t.wave_id <= wave_id);
                if !belongs_here {
                    break;
                }
                let Some(agent_id) = self.acquire_coder().await else {
                    break;
                };
                let Some(task) = self.inner.queue.dequeue().await else {
                    let _ = self.inner.pool.release(&agent_id).await;
                    break;
                };

                let worktree = self.allocate_worktree(&task).await;
                let worktree_path = worktree.as_ref().map(|w| w.path.display().to_string());
                let _ = self.inner.pool.assign(&agent_id, &task.id, worktree_path).await;

                let this = self.clone();
                let project = project_id.to_string();
                running.spawn(async move {
                    this.execute_task(&project, task, agent_id, worktree).await;
                });
            }

            if running.is_empty() && self.inner.queue.wave_done(wave_id).await {
                return;
            }

            tokio::time::sleep(poll).await;
        }
    }

    /// An idle coder, or a freshly spawned one when capacity permits
    async fn acquire_coder(&self) -> Option<String> {
        if let Some(agent) = self.inner.pool.available_by_kind(AgentKind::Coder).await.into_iter().next() {
            return Some(agent.id);
        }
        if self.inner.pool.has_capacity(AgentKind::Coder).await {
            return self.inner.pool.spawn(AgentKind::Coder).await.ok().map(|a| a.id);
        }
        None
    }

    /// Best-effort worktree allocation: a failure means the task runs in
    /// the project root instead.
    async fn allocate_worktree(&self, task: &Task) -> Option<WorktreeInfo> {
        if !self.inner.config.use_worktrees {
            return None;
        }
        let worktrees = self.inner.worktrees.read().await.clone()?;
        match worktrees.create_worktree(&task.id, None).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Worktree allocation failed, running in project root");
                None
            }
        }
    }

    /// Execute one task end to end: QA loop, then merge or escalate.
    async fn execute_task(&self, project_id: &str, task: Task, agent_id: String, worktree: Option<WorktreeInfo>) {
        let _ = self.inner.queue.update_task_status(&task.id, TaskStatus::InProgress).await;
        self.inner.events.emit(EventKind::TaskStarted { task_id: task.id.clone() });

        let cwd = worktree
            .as_ref()
            .map(|w| w.path.clone())
            .unwrap_or_else(|| self.inner.config.project_root.clone());

        let engine = QaLoopEngine::new(
            self.inner.llm.clone(),
            self.inner.bus.scope("qa"),
            self.inner.qa_config.clone(),
        );
        let qa = engine.run(&task, &cwd).await;

        let mut retain_worktree = false;

        if qa.success {
            retain_worktree = self.merge_or_complete(project_id, &task, &agent_id, worktree.as_ref()).await;
        } else if qa.escalated {
            let reason = qa.reason.clone().unwrap_or_else(|| "QA escalated".to_string());
            retain_worktree = self
                .escalate(project_id, &task, &agent_id, ReviewReason::QaExhausted, &reason, worktree.is_some())
                .await;
            if !retain_worktree {
                let _ = self.inner.queue.mark_failed(&task.id).await;
                self.inner.events.emit(EventKind::TaskFailed {
                    task_id: task.id.clone(),
                    error: reason,
                    recoverable: false,
                });
            }
        } else {
            let reason = qa.reason.clone().unwrap_or_else(|| "QA failed".to_string());
            let _ = self.inner.queue.mark_failed(&task.id).await;
            self.inner.events.emit(EventKind::TaskFailed {
                task_id: task.id.clone(),
                error: reason,
                recoverable: false,
            });
        }

        let _ = self.inner.pool.release(&agent_id).await;
        if !retain_worktree
            && let Some(wt) = &worktree
            && let Some(worktrees) = self.inner.worktrees.read().await.clone()
            && let Err(e) = worktrees.remove_worktree(&wt.task_id, true).await
        {
            warn!(task_id = %task.id, error = %e, "Worktree cleanup failed");
        }
    }

    /// QA passed: merge the worktree branch when possible, otherwise just
    /// complete. Returns whether the worktree must be retained.
    async fn merge_or_complete(
        &self,
        project_id: &str,
        task: &Task,
        agent_id: &str,
        worktree: Option<&WorktreeInfo>,
    ) -> bool {
        let merger = self.inner.merger.read().await.clone();
        let (Some(wt), Some(merger)) = (worktree, merger) else {
            let _ = self.inner.queue.mark_complete(&task.id).await;
            self.inner.events.emit(EventKind::TaskCompleted { task_id: task.id.clone() });
            return false;
        };

        // Commit whatever the coder produced onto the task branch
        let git = GitService::new(&wt.path);
        let _ = git.stage_files(StageTarget::All).await;
        match git.commit(&task.name).await {
            Ok(_) => {}
            Err(GitError::CommitFailed(msg)) if msg.contains("nothing staged") => {}
            Err(e) => warn!(task_id = %task.id, error = %e, "Worktree commit failed"),
        }

        let opts = MergeOptions {
            target_branch: self.inner.config.target_branch.clone(),
            message: Some(format!("Merge task: {}", task.name)),
            no_ff: true,
            ..Default::default()
        };

        match merger.merge(&wt.branch, &opts).await {
            Ok(report) if report.is_success() => {
                let commit = match &report {
                    crate::merge::MergeReport::Merged { commit, .. } => commit.clone(),
                    crate::merge::MergeReport::Conflicts { .. } => unreachable!(),
                };
                let _ = self.inner.queue.mark_complete(&task.id).await;
                self.inner.events.emit(EventKind::TaskMerged {
                    task_id: task.id.clone(),
                    commit,
                });
                self.inner.events.emit(EventKind::TaskCompleted { task_id: task.id.clone() });

                if self.inner.config.push_after_merge && merger.push_to_remote(&self.inner.config.target_branch).await {
                    self.inner.events.emit(EventKind::TaskPushed {
                        task_id: task.id.clone(),
                        branch: self.inner.config.target_branch.clone(),
                    });
                }
                false
            }
            Ok(report) => {
                let files = report.conflict_files().join(", ");
                let reason = format!("merge conflict in: {files}");
                let retained = self
                    .escalate(project_id, task, agent_id, ReviewReason::MergeConflict, &reason, true)
                    .await;
                if !retained {
                    self.inner.events.emit(EventKind::TaskMergeFailed {
                        task_id: task.id.clone(),
                        error: reason.clone(),
                    });
                    let _ = self.inner.queue.mark_failed(&task.id).await;
                    self.inner.events.emit(EventKind::TaskFailed {
                        task_id: task.id.clone(),
                        error: reason,
                        recoverable: false,
                    });
                }
                retained
            }
            Err(e) => {
                self.inner.events.emit(EventKind::TaskMergeFailed {
                    task_id: task.id.clone(),
                    error: e.to_string(),
                });
                let _ = self.inner.queue.mark_failed(&task.id).await;
                self.inner.events.emit(EventKind::TaskFailed {
                    task_id: task.id.clone(),
                    error: e.to_string(),
                    recoverable: false,
                });
                false
            }
        }
    }

    /// Open a human review for an escalated task. Returns true when a
    /// review is now pending (the task stays live and its worktree is
    /// retained); false when no review service is wired in.
    async fn escalate(
        &self,
        project_id: &str,
        task: &Task,
        agent_id: &str,
        reason: ReviewReason,
        context: &str,
        has_worktree: bool,
    ) -> bool {
        let Some(reviews) = self.inner.reviews.read().await.clone() else {
            return false;
        };

        let _ = self.inner.queue.update_task_status(&task.id, TaskStatus::Escalated).await;
        match reviews
            .request_review(ReviewRequest {
                task_id: task.id.clone(),
                project_id: project_id.to_string(),
                reason,
                context: context.to_string(),
            })
            .await
        {
            Ok(review) => {
                self.inner.review_tracking.lock().await.insert(
                    review.id.clone(),
                    ReviewTracking {
                        task_id: task.id.clone(),
                        agent_id: Some(agent_id.to_string()),
                        has_worktree,
                    },
                );
                self.inner.events.emit(EventKind::TaskEscalated {
                    task_id: task.id.clone(),
                    reason: context.to_string(),
                });
                true
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Review request failed");
                false
            }
        }
    }

    // === Completion ===

    async fn finish_run(&self, project_id: &str) {
        {
            let mut control = self.inner.control.lock().await;
            control.phase = Phase::Completion;
        }

        let stats = self.inner.queue.stats().await;
        let total_waves = self.inner.total_waves.load(Ordering::SeqCst);

        if stats.failed > 0 && stats.completed == 0 {
            self.inner.events.emit(EventKind::ProjectFailed {
                project_id: project_id.to_string(),
                error: format!("all {} tasks failed", stats.failed),
                recoverable: false,
            });
            self.set_project_status(project_id, ProjectStatus::Failed).await;
        } else {
            self.inner.events.emit(EventKind::ProjectCompleted {
                project_id: project_id.to_string(),
                completed_tasks: stats.completed as u32,
                failed_tasks: stats.failed as u32,
                total_waves,
            });
            self.set_project_status(project_id, ProjectStatus::Completed).await;
        }

        let mut control = self.inner.control.lock().await;
        control.state = RunState::Idle;
        info!(%project_id, completed = stats.completed, failed = stats.failed, "Run finished");
    }

    async fn set_project_status(&self, project_id: &str, status: ProjectStatus) {
        let _ = self
            .inner
            .state_mgr
            .update_state(
                project_id,
                StatePatch {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await;
        self.inner.events.emit(EventKind::ProjectStatusChanged {
            project_id: project_id.to_string(),
            status: status.to_string(),
        });
    }

    async fn control_state(&self) -> RunState {
        self.inner.control.lock().await.state
    }

    async fn is_stopping(&self) -> bool {
        self.control_state().await == RunState::Stopping
    }
}
