//! Domain types for the Nexus engine

mod agent;
mod feature;
mod id;
mod priority;
mod project;
mod requirement;
mod review;
mod session;
mod state;
mod task;

pub use agent::{Agent, AgentKind, AgentMetrics, AgentStatus};
pub use feature::{Complexity, Feature, FeatureStatus};
pub use id::{generate_id, slugify};
pub use priority::Priority;
pub use project::{Project, ProjectMode, ProjectStatus};
pub use requirement::{ReqPriority, Requirement, RequirementCategory};
pub use review::{Review, ReviewReason, ReviewStatus};
pub use session::{ChatMessage, ChatRole, InterviewSession, SessionStatus};
pub use state::{ProjectState, STATE_VERSION, StatePatch};
pub use task::{MAX_TASK_FILES, MAX_TASK_MINUTES, Task, TaskKind, TaskSize, TaskStatus, ValidationIssue, Wave};
