//! Project domain type

use nexusstore::{ProjectRow, now_ms};
use serde::{Deserialize, Serialize};

use super::id::generate_id;

/// How a project starts: from requirements only, or from an existing codebase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectMode {
    #[default]
    Genesis,
    Evolution,
}

impl std::fmt::Display for ProjectMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Genesis => write!(f, "genesis"),
            Self::Evolution => write!(f, "evolution"),
        }
    }
}

impl std::str::FromStr for ProjectMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "genesis" => Ok(Self::Genesis),
            "evolution" => Ok(Self::Evolution),
            other => Err(format!("unknown project mode: {other}")),
        }
    }
}

/// Project lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Initializing,
    Interviewing,
    Planning,
    Executing,
    Completed,
    Failed,
    Paused,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Interviewing => "interviewing",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

/// A project owns its features, tasks and requirements
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub mode: ProjectMode,
    pub root_path: String,
    pub status: ProjectStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Project {
    /// Create a new project with generated ID
    pub fn new(name: impl Into<String>, mode: ProjectMode, root_path: impl Into<String>) -> Self {
        let name = name.into();
        let now = now_ms();
        Self {
            id: generate_id("project", &name),
            name,
            mode,
            root_path: root_path.into(),
            status: ProjectStatus::Initializing,
            created_at: now,
            updated_at: now,
        }
    }

    /// Update the status, bumping `updated_at`
    pub fn set_status(&mut self, status: ProjectStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }

    /// Convert to a storage row
    pub fn to_row(&self) -> ProjectRow {
        ProjectRow {
            id: self.id.clone(),
            name: self.name.clone(),
            mode: self.mode.to_string(),
            root_path: self.root_path.clone(),
            status: self.status.to_string(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_new() {
        let p = Project::new("Billing Service", ProjectMode::Genesis, "/work/billing");
        assert!(p.id.contains("-project-"));
        assert_eq!(p.status, ProjectStatus::Initializing);
        assert_eq!(p.mode, ProjectMode::Genesis);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("evolution".parse::<ProjectMode>().unwrap(), ProjectMode::Evolution);
        assert!("other".parse::<ProjectMode>().is_err());
    }

    #[test]
    fn test_set_status_bumps_updated_at() {
        let mut p = Project::new("x", ProjectMode::Genesis, "/tmp");
        let before = p.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        p.set_status(ProjectStatus::Executing);
        assert!(p.updated_at >= before);
        assert_eq!(p.status, ProjectStatus::Executing);
    }
}
