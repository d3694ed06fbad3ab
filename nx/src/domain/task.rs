//! Task domain type
//!
//! A Task is an atomic unit of work: at most 30 estimated minutes, at most
//! 5 files touched, independently testable. Status moves monotonically
//! through the execution state machine; there is no way back.

use nexusstore::{TaskRow, now_ms};
use serde::{Deserialize, Serialize};

use super::id::generate_id;
use super::priority::Priority;

/// Hard ceiling on a task's estimated minutes
pub const MAX_TASK_MINUTES: u32 = 30;

/// Hard ceiling on the number of files a task may touch
pub const MAX_TASK_FILES: usize = 5;

/// Execution style for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Implement, then the QA loop validates
    #[default]
    Auto,
    /// Tests first, then implementation
    Tdd,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Tdd => write!(f, "tdd"),
        }
    }
}

/// Size bucket derived from estimated minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskSize {
    #[default]
    Atomic,
    Small,
    Medium,
}

impl TaskSize {
    /// Categorize by estimated minutes: <=10 atomic, <=20 small, <=30 medium
    pub fn from_minutes(minutes: u32) -> Self {
        match minutes {
            0..=10 => Self::Atomic,
            11..=20 => Self::Small,
            _ => Self::Medium,
        }
    }
}

impl std::fmt::Display for TaskSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Atomic => "atomic",
            Self::Small => "small",
            Self::Medium => "medium",
        };
        write!(f, "{s}")
    }
}

/// Task status state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Planning,
    Assigned,
    InProgress,
    AiReview,
    HumanReview,
    Completed,
    Failed,
    Escalated,
}

impl TaskStatus {
    /// Whether a transition to `next` is allowed. Transitions only move
    /// forward; terminal states accept nothing.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match self {
            Pending => matches!(next, Planning | Assigned | InProgress | Failed),
            Planning => matches!(next, Assigned | InProgress | Failed),
            Assigned => matches!(next, InProgress | Failed),
            InProgress => matches!(next, AiReview | Completed | Failed | Escalated),
            AiReview => matches!(next, Completed | HumanReview | Failed | Escalated),
            HumanReview => matches!(next, Completed | Failed),
            Escalated => matches!(next, HumanReview | Completed | Failed),
            Completed | Failed => false,
        }
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::AiReview => "ai_review",
            Self::HumanReview => "human_review",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Escalated => "escalated",
        };
        write!(f, "{s}")
    }
}

/// A validation problem found on a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    Oversized { minutes: u32 },
    TooManyFiles { count: usize },
    NoTestCriteria,
    SelfDependency,
    EmptyName,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oversized { minutes } => write!(f, "estimated {minutes} min exceeds {MAX_TASK_MINUTES} min limit"),
            Self::TooManyFiles { count } => write!(f, "touches {count} files, limit is {MAX_TASK_FILES}"),
            Self::NoTestCriteria => write!(f, "no test criteria"),
            Self::SelfDependency => write!(f, "task depends on itself"),
            Self::EmptyName => write!(f, "empty name"),
        }
    }
}

/// An atomic unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub feature_id: Option<String>,
    pub name: String,
    pub description: String,
    pub kind: TaskKind,
    pub size: TaskSize,
    pub status: TaskStatus,
    pub estimated_minutes: u32,
    /// Files this task may touch (at most 5)
    pub files: Vec<String>,
    pub test_criteria: Vec<String>,
    /// Ids of same-project tasks that must complete first
    pub depends_on: Vec<String>,
    pub wave_id: u32,
    pub priority: Priority,
    pub created_at: i64,
}

impl Task {
    /// Create a new task with generated ID
    pub fn new(project_id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: generate_id("task", &name),
            project_id: project_id.into(),
            feature_id: None,
            name,
            description: description.into(),
            kind: TaskKind::Auto,
            size: TaskSize::Atomic,
            status: TaskStatus::Pending,
            estimated_minutes: 10,
            files: Vec::new(),
            test_criteria: Vec::new(),
            depends_on: Vec::new(),
            wave_id: 0,
            priority: Priority::Normal,
            created_at: now_ms(),
        }
    }

    /// Set estimated minutes and re-derive the size bucket
    pub fn set_estimate(&mut self, minutes: u32) {
        self.estimated_minutes = minutes;
        self.size = TaskSize::from_minutes(minutes);
    }

    /// Attempt a status transition; false (and no change) when not allowed
    pub fn transition_to(&mut self, next: TaskStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Check readiness: all dependencies in the completed set
    pub fn is_ready(&self, completed: &std::collections::HashSet<String>) -> bool {
        self.depends_on.iter().all(|dep| completed.contains(dep))
    }

    /// Validate the task against the atomicity invariants
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if self.name.trim().is_empty() {
            issues.push(ValidationIssue::EmptyName);
        }
        if self.estimated_minutes > MAX_TASK_MINUTES {
            issues.push(ValidationIssue::Oversized {
                minutes: self.estimated_minutes,
            });
        }
        if self.files.len() > MAX_TASK_FILES {
            issues.push(ValidationIssue::TooManyFiles { count: self.files.len() });
        }
        if self.test_criteria.is_empty() {
            issues.push(ValidationIssue::NoTestCriteria);
        }
        if self.depends_on.iter().any(|d| d == &self.id) {
            issues.push(ValidationIssue::SelfDependency);
        }
        issues
    }

    /// Convert to a storage row
    pub fn to_row(&self) -> TaskRow {
        TaskRow {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            feature_id: self.feature_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            kind: self.kind.to_string(),
            size: self.size.to_string(),
            status: self.status.to_string(),
            estimated_minutes: self.estimated_minutes as i64,
            files: self.files.clone(),
            test_criteria: self.test_criteria.clone(),
            depends_on: self.depends_on.clone(),
            wave_id: self.wave_id as i64,
            priority: self.priority.to_string(),
            created_at: self.created_at,
        }
    }
}

/// A wave: tasks whose dependencies are all satisfied by earlier waves
#[derive(Debug, Clone)]
pub struct Wave {
    pub id: u32,
    pub tasks: Vec<Task>,
    pub estimated_minutes: u32,
}

impl Wave {
    pub fn new(id: u32, tasks: Vec<Task>) -> Self {
        let estimated_minutes = tasks.iter().map(|t| t.estimated_minutes).sum();
        Self {
            id,
            tasks,
            estimated_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_size_from_minutes() {
        assert_eq!(TaskSize::from_minutes(5), TaskSize::Atomic);
        assert_eq!(TaskSize::from_minutes(10), TaskSize::Atomic);
        assert_eq!(TaskSize::from_minutes(11), TaskSize::Small);
        assert_eq!(TaskSize::from_minutes(20), TaskSize::Small);
        assert_eq!(TaskSize::from_minutes(30), TaskSize::Medium);
    }

    #[test]
    fn test_status_machine_forward_only() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(AiReview));
        assert!(AiReview.can_transition_to(HumanReview));
        assert!(HumanReview.can_transition_to(Completed));
        assert!(Escalated.can_transition_to(HumanReview));

        // No way back
        assert!(!InProgress.can_transition_to(Pending));
        assert!(!AiReview.can_transition_to(InProgress));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(InProgress));
    }

    #[test]
    fn test_transition_to_rejects_invalid() {
        let mut task = Task::new("p-1", "t", "desc");
        assert!(task.transition_to(TaskStatus::InProgress));
        assert!(!task.transition_to(TaskStatus::Pending));
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_validate_oversized_and_files() {
        let mut task = Task::new("p-1", "big one", "desc");
        task.estimated_minutes = 45;
        task.files = (0..6).map(|i| format!("f{i}.rs")).collect();
        task.test_criteria = vec!["passes".to_string()];

        let issues = task.validate();
        assert!(issues.contains(&ValidationIssue::Oversized { minutes: 45 }));
        assert!(issues.contains(&ValidationIssue::TooManyFiles { count: 6 }));
    }

    #[test]
    fn test_validate_self_dependency() {
        let mut task = Task::new("p-1", "loopy", "desc");
        task.test_criteria = vec!["ok".to_string()];
        task.depends_on = vec![task.id.clone()];
        assert!(task.validate().contains(&ValidationIssue::SelfDependency));
    }

    #[test]
    fn test_is_ready() {
        let mut task = Task::new("p-1", "t", "desc");
        task.depends_on = vec!["a".to_string(), "b".to_string()];

        let mut completed = HashSet::new();
        completed.insert("a".to_string());
        assert!(!task.is_ready(&completed));

        completed.insert("b".to_string());
        assert!(task.is_ready(&completed));
    }

    #[test]
    fn test_wave_estimate_sums() {
        let mut a = Task::new("p", "a", "");
        a.set_estimate(10);
        let mut b = Task::new("p", "b", "");
        b.set_estimate(20);
        let wave = Wave::new(0, vec![a, b]);
        assert_eq!(wave.estimated_minutes, 30);
    }
}
