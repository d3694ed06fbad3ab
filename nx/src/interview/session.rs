//! SessionManager: periodic auto-save of live interview sessions

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::engine::InterviewEngine;

/// Periodically persists every in-memory interview session so a crashed
/// daemon loses at most one interval of conversation.
pub struct SessionManager {
    handle: JoinHandle<()>,
}

impl SessionManager {
    /// Start auto-saving on the given interval (30 s by default upstream)
    pub fn start(engine: Arc<InterviewEngine>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match engine.save_all().await {
                    Ok(saved) => debug!(saved, "Auto-saved interview sessions"),
                    Err(e) => warn!(error = %e, "Interview auto-save failed"),
                }
            }
        });
        Self { handle }
    }

    /// Stop the auto-save task
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterviewConfig;
    use crate::domain::SessionStatus;
    use crate::events::create_event_bus;
    use crate::interview::StartOpts;
    use crate::llm::client::mock::MockLlmClient;
    use nexusstore::{Database, ProjectRow};

    #[tokio::test]
    async fn test_autosave_persists_sessions() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.upsert_project(&ProjectRow {
            id: "p-1".to_string(),
            name: "Test".to_string(),
            mode: "genesis".to_string(),
            root_path: "/tmp".to_string(),
            status: "interviewing".to_string(),
            created_at: 1,
            updated_at: 1,
        })
        .unwrap();

        let bus = create_event_bus();
        let engine = Arc::new(InterviewEngine::new(
            Arc::new(MockLlmClient::always("ok")),
            db.clone(),
            bus.scope("interview"),
            InterviewConfig::default(),
        ));

        let session = engine.start_session("p-1", StartOpts::default()).await.unwrap();

        let manager = SessionManager::start(engine.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(80)).await;
        manager.stop();

        let row = db.get_session(&session.id).unwrap().unwrap();
        assert_eq!(row.status, SessionStatus::Active.to_string());
    }
}
