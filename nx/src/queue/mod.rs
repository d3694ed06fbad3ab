//! Task queue: dependency- and wave-aware ready-task scheduling
//!
//! Tasks live in one of two sets: `queued` (eligible for dispatch) and
//! `assigned` (dequeued, not yet terminally marked). Together they are the
//! single source of truth for task lookup - a dequeued task stays findable
//! by id until `mark_complete` or `mark_failed` records its outcome.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{Task, TaskStatus};
use crate::events::{EventKind, EventScope};

/// Queue operation errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// Queue statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub queued: usize,
    pub assigned: usize,
    pub completed: usize,
    pub failed: usize,
    pub current_wave: u32,
}

struct QueueInner {
    queued: HashMap<String, Task>,
    assigned: HashMap<String, Task>,
    completed: HashSet<String>,
    failed: HashSet<String>,
    current_wave: u32,
}

impl QueueInner {
    fn is_ready(&self, task: &Task) -> bool {
        task.wave_id <= self.current_wave && task.depends_on.iter().all(|dep| self.completed.contains(dep))
    }

    /// Advance past waves that have nothing queued or running. Empty
    /// intermediate waves are skipped explicitly, never by accident.
    fn advance_to_next_nonempty_wave(&mut self) {
        loop {
            let current_has_work = self
                .queued
                .values()
                .chain(self.assigned.values())
                .any(|t| t.wave_id <= self.current_wave);
            if current_has_work {
                return;
            }
            let next_wave = self
                .queued
                .values()
                .map(|t| t.wave_id)
                .filter(|w| *w > self.current_wave)
                .min();
            match next_wave {
                Some(w) => {
                    debug!(from = self.current_wave, to = w, "Advancing wave");
                    self.current_wave = w;
                }
                None => return,
            }
        }
    }

    /// Ready tasks ordered by wave, then priority, then age
    fn ready_sorted(&self) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self.queued.values().filter(|t| self.is_ready(t)).collect();
        ready.sort_by(|a, b| {
            a.wave_id
                .cmp(&b.wave_id)
                .then(a.priority.cmp(&b.priority))
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        ready
    }
}

/// The task queue. Single-writer (coordinator), multi-reader.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    events: EventScope,
}

impl TaskQueue {
    /// Create an empty queue emitting on the given scope
    pub fn new(events: EventScope) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                queued: HashMap::new(),
                assigned: HashMap::new(),
                completed: HashSet::new(),
                failed: HashSet::new(),
                current_wave: 0,
            }),
            events,
        }
    }

    /// Add a task, optionally pinning its wave
    pub async fn enqueue(&self, mut task: Task, wave_id: Option<u32>) {
        if let Some(wave) = wave_id {
            task.wave_id = wave;
        }
        debug!(task_id = %task.id, wave = task.wave_id, "Enqueue");
        let mut inner = self.inner.lock().await;
        inner.queued.insert(task.id.clone(), task);
    }

    /// Highest-priority ready task, moved to the assigned set.
    /// Non-blocking: None when nothing is ready.
    pub async fn dequeue(&self) -> Option<Task> {
        let mut inner = self.inner.lock().await;
        inner.advance_to_next_nonempty_wave();
        let id = inner.ready_sorted().first().map(|t| t.id.clone())?;
        let task = inner.queued.remove(&id)?;
        inner.assigned.insert(id.clone(), task.clone());
        debug!(task_id = %id, "Dequeued");
        Some(task)
    }

    /// The task `dequeue` would return, without removing it
    pub async fn peek(&self) -> Option<Task> {
        let mut inner = self.inner.lock().await;
        inner.advance_to_next_nonempty_wave();
        inner.ready_sorted().first().map(|t| (*t).clone())
    }

    /// All currently ready tasks, in dispatch order
    pub async fn ready_tasks(&self) -> Vec<Task> {
        let mut inner = self.inner.lock().await;
        inner.advance_to_next_nonempty_wave();
        inner.ready_sorted().into_iter().cloned().collect()
    }

    /// Tasks (queued or assigned) belonging to a wave
    pub async fn by_wave(&self, wave_id: u32) -> Vec<Task> {
        let inner = self.inner.lock().await;
        inner
            .queued
            .values()
            .chain(inner.assigned.values())
            .filter(|t| t.wave_id == wave_id)
            .cloned()
            .collect()
    }

    /// Look up a task in both the queued and assigned sets
    pub async fn get_task(&self, id: &str) -> Option<Task> {
        let inner = self.inner.lock().await;
        inner.queued.get(id).or_else(|| inner.assigned.get(id)).cloned()
    }

    /// Record a terminal success. The task leaves both sets and its id
    /// lands in the completed set.
    pub async fn mark_complete(&self, id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.queued.remove(id).is_none() && inner.assigned.remove(id).is_none() {
            return Err(QueueError::UnknownTask(id.to_string()));
        }
        inner.completed.insert(id.to_string());
        inner.advance_to_next_nonempty_wave();
        debug!(task_id = %id, "Marked complete");
        Ok(())
    }

    /// Record a terminal failure
    pub async fn mark_failed(&self, id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.queued.remove(id).is_none() && inner.assigned.remove(id).is_none() {
            return Err(QueueError::UnknownTask(id.to_string()));
        }
        inner.failed.insert(id.to_string());
        inner.advance_to_next_nonempty_wave();
        warn!(task_id = %id, "Marked failed");
        Ok(())
    }

    /// Update a live task's status, enforcing the monotonic state machine
    /// and emitting `task:status-changed`.
    pub async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let task = if inner.queued.contains_key(id) {
            inner.queued.get_mut(id).unwrap()
        } else {
            inner
                .assigned
                .get_mut(id)
                .ok_or_else(|| QueueError::UnknownTask(id.to_string()))?
        };

        let from = task.status;
        if !from.can_transition_to(status) {
            return Err(QueueError::InvalidTransition {
                task_id: id.to_string(),
                from,
                to: status,
            });
        }
        task.status = status;
        drop(inner);

        self.events.emit(EventKind::TaskStatusChanged {
            task_id: id.to_string(),
            from: from.to_string(),
            to: status.to_string(),
        });
        Ok(())
    }

    /// Whether a wave has no queued and no assigned tasks left
    pub async fn wave_done(&self, wave_id: u32) -> bool {
        let inner = self.inner.lock().await;
        !inner
            .queued
            .values()
            .chain(inner.assigned.values())
            .any(|t| t.wave_id == wave_id)
    }

    /// Ids of terminally completed tasks
    pub async fn completed_ids(&self) -> HashSet<String> {
        self.inner.lock().await.completed.clone()
    }

    /// Ids of terminally failed tasks
    pub async fn failed_ids(&self) -> HashSet<String> {
        self.inner.lock().await.failed.clone()
    }

    /// Current wave index
    pub async fn current_wave(&self) -> u32 {
        self.inner.lock().await.current_wave
    }

    /// Snapshot counters
    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        QueueStats {
            queued: inner.queued.len(),
            assigned: inner.assigned.len(),
            completed: inner.completed.len(),
            failed: inner.failed.len(),
            current_wave: inner.current_wave,
        }
    }
}
