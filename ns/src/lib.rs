//! NexusStore - relational project state storage for Nexus
//!
//! A thin SQLite layer holding the durable side of a Nexus project:
//! projects, features, tasks, requirements, checkpoints, interview
//! sessions, project state snapshots, reviews and metrics. The engine's
//! in-memory maps are caches; every write goes through this crate first.

pub mod db;
pub mod error;
pub mod rows;

pub use db::{Database, TABLES};
pub use error::StoreError;
pub use rows::{
    CheckpointRow, FeatureRow, MetricRow, ProjectRow, ProjectStateRow, RequirementRow, ReviewRow, SessionRow, TaskRow,
};

/// Current time as Unix epoch milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }

    #[test]
    fn test_tables_contract() {
        // The storage contract names these tables; the schema must create them all.
        for table in ["projects", "tasks", "checkpoints", "project_states", "code_chunks"] {
            assert!(TABLES.contains(&table), "missing table {table}");
        }
    }
}
