//! Event types emitted across the engine
//!
//! Every significant action emits one of these. Consumers (UI forwarders,
//! loggers, tests) subscribe on the bus and filter by `event_type()`.

use nexusstore::now_ms;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event envelope: payload plus identity and provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Unix epoch milliseconds
    pub timestamp: i64,
    /// Component that emitted the event
    pub source: String,
    pub correlation_id: Option<String>,
    pub kind: EventKind,
}

impl Event {
    /// Build an event with fresh id and timestamp
    pub fn new(kind: EventKind, source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            timestamp: now_ms(),
            source: source.into(),
            correlation_id: None,
            kind,
        }
    }

    /// Attach a correlation id
    pub fn correlated(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Canonical `family:name` event type
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Task id carried by the event, if any
    pub fn task_id(&self) -> Option<&str> {
        self.kind.task_id()
    }
}

/// All event payloads, tagged
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // === Coordinator / phases ===
    CoordinatorStarted { project_id: String },
    CoordinatorPaused { reason: String },
    CoordinatorResumed,
    CoordinatorStopped,
    OrchestrationMode { mode: String },
    WaveStarted { wave_id: u32, task_count: usize },
    WaveCompleted { wave_id: u32, completed: usize, failed: usize },
    ProjectStatusChanged { project_id: String, status: String },
    ProjectCompleted { project_id: String, completed_tasks: u32, failed_tasks: u32, total_waves: u32 },
    ProjectFailed { project_id: String, error: String, recoverable: bool },

    // === Tasks ===
    TaskCreated { task_id: String, name: String },
    TaskAssigned { task_id: String, agent_id: String },
    TaskStarted { task_id: String },
    TaskCompleted { task_id: String },
    TaskFailed { task_id: String, error: String, recoverable: bool },
    TaskEscalated { task_id: String, reason: String },
    TaskMerged { task_id: String, commit: String },
    TaskMergeFailed { task_id: String, error: String },
    TaskPushed { task_id: String, branch: String },
    TaskStatusChanged { task_id: String, from: String, to: String },
    TaskQaIteration { task_id: String, iteration: u32, failing_step: Option<String> },

    // === Agents ===
    AgentSpawned { agent_id: String, kind: String },
    AgentAssigned { agent_id: String, task_id: String },
    AgentIdle { agent_id: String },
    AgentError { agent_id: String, error: String },
    AgentTerminated { agent_id: String },
    AgentProgress { agent_id: String, iteration: u32 },
    AgentOutput { agent_id: String, summary: String },

    // === QA ===
    QaBuildStarted { task_id: String, iteration: u32 },
    QaBuildCompleted { task_id: String, iteration: u32, success: bool, error_count: usize },
    QaLintCompleted { task_id: String, iteration: u32, success: bool, error_count: usize },
    QaTestCompleted { task_id: String, iteration: u32, success: bool, passed: u32, failed: u32 },
    QaLoopCompleted { task_id: String, success: bool, iterations: u32 },

    // === Interview ===
    InterviewStarted { session_id: String, project_id: String, mode: String },
    InterviewQuestionAsked { session_id: String, question: String },
    InterviewRequirementCaptured { session_id: String, requirement_id: String, category: String },
    InterviewCompleted { session_id: String, total_requirements: usize, categories: Vec<String>, duration_ms: i64 },

    // === Planning ===
    PlanningStarted { project_id: String },
    PlanningProgress { project_id: String, feature: String, tasks_so_far: usize },
    PlanningCompleted { project_id: String, total_tasks: usize, total_waves: usize },
    PlanningError { project_id: String, error: String },

    // === Reviews ===
    ReviewRequested { review_id: String, task_id: String, reason: String },
    ReviewApproved { review_id: String, task_id: String },
    ReviewRejected { review_id: String, task_id: String, feedback: String },

    // === System ===
    CheckpointCreated { checkpoint_id: String, project_id: String, reason: String },
    CheckpointRestored { checkpoint_id: String, project_id: String },
    SystemError { context: String, error: String },

    // === Features ===
    FeatureCreated { feature_id: String, name: String },
    FeatureStatusChanged { feature_id: String, status: String },
    FeatureCompleted { feature_id: String },

    /// Escape hatch for embedder-defined events
    Custom { name: String, payload: Value },
}

impl EventKind {
    /// Canonical `family:name` event type string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CoordinatorStarted { .. } => "coordinator:started",
            Self::CoordinatorPaused { .. } => "coordinator:paused",
            Self::CoordinatorResumed => "coordinator:resumed",
            Self::CoordinatorStopped => "coordinator:stopped",
            Self::OrchestrationMode { .. } => "orchestration:mode",
            Self::WaveStarted { .. } => "wave:started",
            Self::WaveCompleted { .. } => "wave:completed",
            Self::ProjectStatusChanged { .. } => "project:status-changed",
            Self::ProjectCompleted { .. } => "project:completed",
            Self::ProjectFailed { .. } => "project:failed",
            Self::TaskCreated { .. } => "task:created",
            Self::TaskAssigned { .. } => "task:assigned",
            Self::TaskStarted { .. } => "task:started",
            Self::TaskCompleted { .. } => "task:completed",
            Self::TaskFailed { .. } => "task:failed",
            Self::TaskEscalated { .. } => "task:escalated",
            Self::TaskMerged { .. } => "task:merged",
            Self::TaskMergeFailed { .. } => "task:merge-failed",
            Self::TaskPushed { .. } => "task:pushed",
            Self::TaskStatusChanged { .. } => "task:status-changed",
            Self::TaskQaIteration { .. } => "task:qa-iteration",
            Self::AgentSpawned { .. } => "agent:spawned",
            Self::AgentAssigned { .. } => "agent:assigned",
            Self::AgentIdle { .. } => "agent:idle",
            Self::AgentError { .. } => "agent:error",
            Self::AgentTerminated { .. } => "agent:terminated",
            Self::AgentProgress { .. } => "agent:progress",
            Self::AgentOutput { .. } => "agent:output",
            Self::QaBuildStarted { .. } => "qa:build-started",
            Self::QaBuildCompleted { .. } => "qa:build-completed",
            Self::QaLintCompleted { .. } => "qa:lint-completed",
            Self::QaTestCompleted { .. } => "qa:test-completed",
            Self::QaLoopCompleted { .. } => "qa:loop-completed",
            Self::InterviewStarted { .. } => "interview:started",
            Self::InterviewQuestionAsked { .. } => "interview:question-asked",
            Self::InterviewRequirementCaptured { .. } => "interview:requirement-captured",
            Self::InterviewCompleted { .. } => "interview:completed",
            Self::PlanningStarted { .. } => "planning:started",
            Self::PlanningProgress { .. } => "planning:progress",
            Self::PlanningCompleted { .. } => "planning:completed",
            Self::PlanningError { .. } => "planning:error",
            Self::ReviewRequested { .. } => "review:requested",
            Self::ReviewApproved { .. } => "review:approved",
            Self::ReviewRejected { .. } => "review:rejected",
            Self::CheckpointCreated { .. } => "system:checkpoint-created",
            Self::CheckpointRestored { .. } => "system:checkpoint-restored",
            Self::SystemError { .. } => "system:error",
            Self::FeatureCreated { .. } => "feature:created",
            Self::FeatureStatusChanged { .. } => "feature:status-changed",
            Self::FeatureCompleted { .. } => "feature:completed",
            Self::Custom { .. } => "custom",
        }
    }

    /// Task id carried by the payload, if any
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskCreated { task_id, .. }
            | Self::TaskAssigned { task_id, .. }
            | Self::TaskStarted { task_id }
            | Self::TaskCompleted { task_id }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskEscalated { task_id, .. }
            | Self::TaskMerged { task_id, .. }
            | Self::TaskMergeFailed { task_id, .. }
            | Self::TaskPushed { task_id, .. }
            | Self::TaskStatusChanged { task_id, .. }
            | Self::TaskQaIteration { task_id, .. }
            | Self::QaBuildStarted { task_id, .. }
            | Self::QaBuildCompleted { task_id, .. }
            | Self::QaLintCompleted { task_id, .. }
            | Self::QaTestCompleted { task_id, .. }
            | Self::QaLoopCompleted { task_id, .. }
            | Self::ReviewRequested { task_id, .. }
            | Self::ReviewApproved { task_id, .. }
            | Self::ReviewRejected { task_id, .. } => Some(task_id),
            Self::AgentAssigned { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        let e = Event::new(
            EventKind::TaskStarted {
                task_id: "t-1".to_string(),
            },
            "coordinator",
        );
        assert_eq!(e.event_type(), "task:started");
        assert_eq!(e.task_id(), Some("t-1"));
        assert!(!e.id.is_empty());
        assert!(e.timestamp > 0);
    }

    #[test]
    fn test_correlated() {
        let e = Event::new(EventKind::CoordinatorResumed, "coordinator").correlated("run-7");
        assert_eq!(e.correlation_id.as_deref(), Some("run-7"));
    }

    #[test]
    fn test_serde_tagged() {
        let e = Event::new(
            EventKind::WaveStarted {
                wave_id: 2,
                task_count: 4,
            },
            "coordinator",
        );
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"wave_started\""));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), "wave:started");
    }
}
