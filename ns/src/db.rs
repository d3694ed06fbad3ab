//! SQLite database for Nexus project state
//!
//! One `Database` per file (or in-memory for tests). Foreign keys cascade
//! on project delete so a project wipe takes its features, tasks,
//! requirements, checkpoints, sessions and reviews with it.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::rows::{
    CheckpointRow, FeatureRow, MetricRow, ProjectRow, ProjectStateRow, RequirementRow, ReviewRow, SessionRow, TaskRow,
};

/// Current schema version
const SCHEMA_VERSION: i64 = 1;

/// All tables created by the migrations, in creation order
pub const TABLES: &[&str] = &[
    "projects",
    "features",
    "sub_features",
    "tasks",
    "agents",
    "checkpoints",
    "requirements",
    "metrics",
    "sessions",
    "episodes",
    "continue_points",
    "project_states",
    "code_chunks",
    "reviews",
];

const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    mode        TEXT NOT NULL,
    root_path   TEXT NOT NULL,
    status      TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS features (
    id              TEXT PRIMARY KEY,
    project_id      TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    description     TEXT NOT NULL,
    priority        TEXT NOT NULL,
    status          TEXT NOT NULL,
    complexity      TEXT NOT NULL,
    estimated_tasks INTEGER NOT NULL DEFAULT 0,
    completed_tasks INTEGER NOT NULL DEFAULT 0,
    created_at      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sub_features (
    id          TEXT PRIMARY KEY,
    feature_id  TEXT NOT NULL REFERENCES features(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    description TEXT NOT NULL,
    status      TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id                TEXT PRIMARY KEY,
    project_id        TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    feature_id        TEXT,
    name              TEXT NOT NULL,
    description       TEXT NOT NULL,
    kind              TEXT NOT NULL,
    size              TEXT NOT NULL,
    status            TEXT NOT NULL,
    estimated_minutes INTEGER NOT NULL,
    files             TEXT NOT NULL,
    test_criteria     TEXT NOT NULL,
    depends_on        TEXT NOT NULL,
    wave_id           INTEGER NOT NULL DEFAULT 0,
    priority          TEXT NOT NULL,
    created_at        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    id             TEXT PRIMARY KEY,
    kind           TEXT NOT NULL,
    status         TEXT NOT NULL,
    model          TEXT NOT NULL,
    current_task   TEXT,
    spawned_at     INTEGER NOT NULL,
    last_active_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoints (
    id          TEXT PRIMARY KEY,
    project_id  TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    reason      TEXT NOT NULL,
    state_data  TEXT NOT NULL,
    git_commit  TEXT,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS requirements (
    id          TEXT PRIMARY KEY,
    project_id  TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    category    TEXT NOT NULL,
    text        TEXT NOT NULL,
    priority    TEXT NOT NULL,
    confidence  REAL NOT NULL,
    area        TEXT,
    source      TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS metrics (
    id          TEXT PRIMARY KEY,
    project_id  TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    value       REAL NOT NULL,
    recorded_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id               TEXT PRIMARY KEY,
    project_id       TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    status           TEXT NOT NULL,
    mode             TEXT NOT NULL,
    state_data       TEXT NOT NULL,
    started_at       INTEGER NOT NULL,
    last_activity_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS episodes (
    id          TEXT PRIMARY KEY,
    project_id  TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    kind        TEXT NOT NULL,
    notes       TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS continue_points (
    id          TEXT PRIMARY KEY,
    project_id  TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    description TEXT NOT NULL,
    state_data  TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS project_states (
    project_id  TEXT PRIMARY KEY REFERENCES projects(id) ON DELETE CASCADE,
    state_data  TEXT NOT NULL,
    updated_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS code_chunks (
    id          TEXT PRIMARY KEY,
    project_id  TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    file_path   TEXT NOT NULL,
    content     TEXT NOT NULL,
    tags        TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS reviews (
    id          TEXT PRIMARY KEY,
    task_id     TEXT NOT NULL,
    project_id  TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    reason      TEXT NOT NULL,
    context     TEXT NOT NULL,
    status      TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    resolved_at INTEGER,
    resolution  TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_requirements_project ON requirements(project_id);
CREATE INDEX IF NOT EXISTS idx_checkpoints_project ON checkpoints(project_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_reviews_status ON reviews(status);
CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_id, last_activity_at DESC);
"#;

/// The Nexus relational store
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (creating and migrating if needed) a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        db.migrate()?;
        info!(path = %path.display(), "Opened database");
        Ok(db)
    }

    /// Open an in-memory database (tests)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        db.migrate()?;
        Ok(db)
    }

    /// Filesystem path of the database, if file-backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version >= SCHEMA_VERSION {
            debug!(version, "Schema up to date");
            return Ok(());
        }

        conn.execute_batch(MIGRATION_V1)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        debug!(from = version, to = SCHEMA_VERSION, "Migrated schema");
        Ok(())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        f(&conn)
    }

    // === Projects ===

    pub fn upsert_project(&self, row: &ProjectRow) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, name, mode, root_path, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name, mode = excluded.mode, root_path = excluded.root_path,
                     status = excluded.status, updated_at = excluded.updated_at",
                params![row.id, row.name, row.mode, row.root_path, row.status, row.created_at, row.updated_at],
            )?;
            Ok(())
        })
    }

    pub fn get_project(&self, id: &str) -> Result<Option<ProjectRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, mode, root_path, status, created_at, updated_at
                     FROM projects WHERE id = ?1",
                    params![id],
                    |r| {
                        Ok(ProjectRow {
                            id: r.get(0)?,
                            name: r.get(1)?,
                            mode: r.get(2)?,
                            root_path: r.get(3)?,
                            status: r.get(4)?,
                            created_at: r.get(5)?,
                            updated_at: r.get(6)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn delete_project(&self, id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    // === Features ===

    pub fn upsert_feature(&self, row: &FeatureRow) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO features
                     (id, project_id, name, description, priority, status, complexity,
                      estimated_tasks, completed_tasks, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name, description = excluded.description,
                     priority = excluded.priority, status = excluded.status,
                     complexity = excluded.complexity, estimated_tasks = excluded.estimated_tasks,
                     completed_tasks = excluded.completed_tasks",
                params![
                    row.id,
                    row.project_id,
                    row.name,
                    row.description,
                    row.priority,
                    row.status,
                    row.complexity,
                    row.estimated_tasks,
                    row.completed_tasks,
                    row.created_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_features(&self, project_id: &str) -> Result<Vec<FeatureRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, name, description, priority, status, complexity,
                        estimated_tasks, completed_tasks, created_at
                 FROM features WHERE project_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map(params![project_id], |r| {
                    Ok(FeatureRow {
                        id: r.get(0)?,
                        project_id: r.get(1)?,
                        name: r.get(2)?,
                        description: r.get(3)?,
                        priority: r.get(4)?,
                        status: r.get(5)?,
                        complexity: r.get(6)?,
                        estimated_tasks: r.get(7)?,
                        completed_tasks: r.get(8)?,
                        created_at: r.get(9)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // === Tasks ===

    pub fn upsert_task(&self, row: &TaskRow) -> Result<(), StoreError> {
        let files = serde_json::to_string(&row.files)?;
        let criteria = serde_json::to_string(&row.test_criteria)?;
        let deps = serde_json::to_string(&row.depends_on)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks
                     (id, project_id, feature_id, name, description, kind, size, status,
                      estimated_minutes, files, test_criteria, depends_on, wave_id, priority, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(id) DO UPDATE SET
                     status = excluded.status, size = excluded.size,
                     estimated_minutes = excluded.estimated_minutes, files = excluded.files,
                     test_criteria = excluded.test_criteria, depends_on = excluded.depends_on,
                     wave_id = excluded.wave_id, priority = excluded.priority",
                params![
                    row.id,
                    row.project_id,
                    row.feature_id,
                    row.name,
                    row.description,
                    row.kind,
                    row.size,
                    row.status,
                    row.estimated_minutes,
                    files,
                    criteria,
                    deps,
                    row.wave_id,
                    row.priority,
                    row.created_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_task(&self, id: &str) -> Result<Option<TaskRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, project_id, feature_id, name, description, kind, size, status,
                            estimated_minutes, files, test_criteria, depends_on, wave_id, priority, created_at
                     FROM tasks WHERE id = ?1",
                    params![id],
                    task_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_tasks(&self, project_id: &str) -> Result<Vec<TaskRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, feature_id, name, description, kind, size, status,
                        estimated_minutes, files, test_criteria, depends_on, wave_id, priority, created_at
                 FROM tasks WHERE project_id = ?1 ORDER BY wave_id ASC, created_at ASC",
            )?;
            let rows = stmt
                .query_map(params![project_id], task_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_task_status(&self, id: &str, status: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute("UPDATE tasks SET status = ?2 WHERE id = ?1", params![id, status])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("task {id}")));
            }
            Ok(())
        })
    }

    // === Requirements ===

    pub fn insert_requirement(&self, row: &RequirementRow) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO requirements
                     (id, project_id, category, text, priority, confidence, area, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.id,
                    row.project_id,
                    row.category,
                    row.text,
                    row.priority,
                    row.confidence,
                    row.area,
                    row.source,
                    row.created_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_requirements(&self, project_id: &str) -> Result<Vec<RequirementRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, category, text, priority, confidence, area, source, created_at
                 FROM requirements WHERE project_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map(params![project_id], |r| {
                    Ok(RequirementRow {
                        id: r.get(0)?,
                        project_id: r.get(1)?,
                        category: r.get(2)?,
                        text: r.get(3)?,
                        priority: r.get(4)?,
                        confidence: r.get(5)?,
                        area: r.get(6)?,
                        source: r.get(7)?,
                        created_at: r.get(8)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // === Checkpoints ===

    pub fn insert_checkpoint(&self, row: &CheckpointRow) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO checkpoints (id, project_id, reason, state_data, git_commit, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![row.id, row.project_id, row.reason, row.state_data, row.git_commit, row.created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_checkpoint(&self, id: &str) -> Result<Option<CheckpointRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, project_id, reason, state_data, git_commit, created_at
                     FROM checkpoints WHERE id = ?1",
                    params![id],
                    |r| {
                        Ok(CheckpointRow {
                            id: r.get(0)?,
                            project_id: r.get(1)?,
                            reason: r.get(2)?,
                            state_data: r.get(3)?,
                            git_commit: r.get(4)?,
                            created_at: r.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// List checkpoints for a project, newest first
    pub fn list_checkpoints(&self, project_id: &str) -> Result<Vec<CheckpointRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, reason, state_data, git_commit, created_at
                 FROM checkpoints WHERE project_id = ?1 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map(params![project_id], |r| {
                    Ok(CheckpointRow {
                        id: r.get(0)?,
                        project_id: r.get(1)?,
                        reason: r.get(2)?,
                        state_data: r.get(3)?,
                        git_commit: r.get(4)?,
                        created_at: r.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Delete all but the newest `keep` checkpoints for a project.
    /// Returns how many rows were removed.
    pub fn prune_checkpoints(&self, project_id: &str, keep: usize) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM checkpoints WHERE project_id = ?1 AND id NOT IN (
                     SELECT id FROM checkpoints WHERE project_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2
                 )",
                params![project_id, keep as i64],
            )?;
            Ok(removed)
        })
    }

    // === Sessions ===

    pub fn upsert_session(&self, row: &SessionRow) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, project_id, status, mode, state_data, started_at, last_activity_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     status = excluded.status, state_data = excluded.state_data,
                     last_activity_at = excluded.last_activity_at",
                params![
                    row.id,
                    row.project_id,
                    row.status,
                    row.mode,
                    row.state_data,
                    row.started_at,
                    row.last_activity_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, project_id, status, mode, state_data, started_at, last_activity_at
                     FROM sessions WHERE id = ?1",
                    params![id],
                    session_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Most recently active session for a project in any of the given statuses
    pub fn latest_session(&self, project_id: &str, statuses: &[&str]) -> Result<Option<SessionRow>, StoreError> {
        self.with_conn(|conn| {
            let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let sql = format!(
                "SELECT id, project_id, status, mode, state_data, started_at, last_activity_at
                 FROM sessions WHERE project_id = ? AND status IN ({placeholders})
                 ORDER BY last_activity_at DESC LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut values: Vec<&dyn rusqlite::ToSql> = vec![&project_id];
            for s in statuses {
                values.push(s);
            }
            let row = stmt.query_row(values.as_slice(), session_from_row).optional()?;
            Ok(row)
        })
    }

    // === Project states ===

    pub fn upsert_project_state(&self, row: &ProjectStateRow) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO project_states (project_id, state_data, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(project_id) DO UPDATE SET
                     state_data = excluded.state_data, updated_at = excluded.updated_at",
                params![row.project_id, row.state_data, row.updated_at],
            )?;
            Ok(())
        })
    }

    pub fn get_project_state(&self, project_id: &str) -> Result<Option<ProjectStateRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT project_id, state_data, updated_at FROM project_states WHERE project_id = ?1",
                    params![project_id],
                    |r| {
                        Ok(ProjectStateRow {
                            project_id: r.get(0)?,
                            state_data: r.get(1)?,
                            updated_at: r.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // === Reviews ===

    pub fn upsert_review(&self, row: &ReviewRow) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reviews
                     (id, task_id, project_id, reason, context, status, created_at, resolved_at, resolution)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                     status = excluded.status, resolved_at = excluded.resolved_at,
                     resolution = excluded.resolution",
                params![
                    row.id,
                    row.task_id,
                    row.project_id,
                    row.reason,
                    row.context,
                    row.status,
                    row.created_at,
                    row.resolved_at,
                    row.resolution
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_review(&self, id: &str) -> Result<Option<ReviewRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, task_id, project_id, reason, context, status, created_at, resolved_at, resolution
                     FROM reviews WHERE id = ?1",
                    params![id],
                    |r| {
                        Ok(ReviewRow {
                            id: r.get(0)?,
                            task_id: r.get(1)?,
                            project_id: r.get(2)?,
                            reason: r.get(3)?,
                            context: r.get(4)?,
                            status: r.get(5)?,
                            created_at: r.get(6)?,
                            resolved_at: r.get(7)?,
                            resolution: r.get(8)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_reviews_by_status(&self, status: &str) -> Result<Vec<ReviewRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, project_id, reason, context, status, created_at, resolved_at, resolution
                 FROM reviews WHERE status = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map(params![status], |r| {
                    Ok(ReviewRow {
                        id: r.get(0)?,
                        task_id: r.get(1)?,
                        project_id: r.get(2)?,
                        reason: r.get(3)?,
                        context: r.get(4)?,
                        status: r.get(5)?,
                        created_at: r.get(6)?,
                        resolved_at: r.get(7)?,
                        resolution: r.get(8)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // === Metrics ===

    pub fn insert_metric(&self, row: &MetricRow) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO metrics (id, project_id, name, value, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![row.id, row.project_id, row.name, row.value, row.recorded_at],
            )?;
            Ok(())
        })
    }
}

fn task_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    let files: String = r.get(9)?;
    let criteria: String = r.get(10)?;
    let deps: String = r.get(11)?;
    Ok(TaskRow {
        id: r.get(0)?,
        project_id: r.get(1)?,
        feature_id: r.get(2)?,
        name: r.get(3)?,
        description: r.get(4)?,
        kind: r.get(5)?,
        size: r.get(6)?,
        status: r.get(7)?,
        estimated_minutes: r.get(8)?,
        files: serde_json::from_str(&files).unwrap_or_default(),
        test_criteria: serde_json::from_str(&criteria).unwrap_or_default(),
        depends_on: serde_json::from_str(&deps).unwrap_or_default(),
        wave_id: r.get(12)?,
        priority: r.get(13)?,
        created_at: r.get(14)?,
    })
}

fn session_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: r.get(0)?,
        project_id: r.get(1)?,
        status: r.get(2)?,
        mode: r.get(3)?,
        state_data: r.get(4)?,
        started_at: r.get(5)?,
        last_activity_at: r.get(6)?,
    })
}
