//! InterviewEngine: LLM-guided requirements capture
//!
//! Each session is a conversation. User messages go to the model under a
//! mode-specific system prompt; replies are mined for requirement blocks;
//! captured requirements persist immediately. Once the conversation has
//! some substance the engine suggests unexplored standard areas.

use std::collections::HashMap;
use std::sync::Arc;

use nexusstore::{Database, StoreError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::InterviewConfig;
use crate::domain::{ChatMessage, ChatRole, InterviewSession, ProjectMode, Requirement, SessionStatus};
use crate::events::{EventKind, EventScope};
use crate::llm::{CompletionRequest, LlmClient, LlmError, Message};

use super::extractor::RequirementExtractor;

/// Standard areas a complete requirements interview should touch
pub const STANDARD_AREAS: &[&str] = &[
    "authentication",
    "authorization",
    "data_model",
    "api",
    "ui_ux",
    "performance",
    "security",
    "integrations",
    "deployment",
];

/// Interview operation errors
#[derive(Debug, Error)]
pub enum InterviewError {
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Session is not active: {0}")]
    SessionNotActive(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Options for starting a session
#[derive(Debug, Clone, Default)]
pub struct StartOpts {
    pub mode: ProjectMode,
    /// Repo-map context for evolution mode
    pub evolution_context: Option<String>,
}

/// Result of one interview turn
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub response: String,
    pub extracted_requirements: Vec<Requirement>,
    pub suggested_gaps: Vec<String>,
}

/// Summary returned when a session ends
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub total_requirements: usize,
    pub categories: Vec<String>,
    pub duration_ms: i64,
}

/// Runs requirements interviews
pub struct InterviewEngine {
    llm: Arc<dyn LlmClient>,
    db: Arc<Database>,
    events: EventScope,
    extractor: RequirementExtractor,
    config: InterviewConfig,
    sessions: Mutex<HashMap<String, InterviewSession>>,
    /// Evolution repo-map context per session
    contexts: Mutex<HashMap<String, String>>,
}

impl InterviewEngine {
    pub fn new(llm: Arc<dyn LlmClient>, db: Arc<Database>, events: EventScope, config: InterviewConfig) -> Self {
        let extractor = RequirementExtractor::new(config.confidence_threshold);
        Self {
            llm,
            db,
            events,
            extractor,
            config,
            sessions: Mutex::new(HashMap::new()),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Start a new interview session
    pub async fn start_session(&self, project_id: &str, opts: StartOpts) -> Result<InterviewSession, InterviewError> {
        let session = InterviewSession::new(project_id, opts.mode);
        if let Some(context) = opts.evolution_context {
            self.contexts.lock().await.insert(session.id.clone(), context);
        }

        self.db.upsert_session(&session.to_row()?)?;
        self.sessions.lock().await.insert(session.id.clone(), session.clone());

        info!(session_id = %session.id, %project_id, mode = %session.mode, "Interview started");
        self.events.emit(EventKind::InterviewStarted {
            session_id: session.id.clone(),
            project_id: project_id.to_string(),
            mode: session.mode.to_string(),
        });
        Ok(session)
    }

    /// Process one user message: call the model, capture requirements,
    /// suggest gaps.
    pub async fn process_message(&self, session_id: &str, user_text: &str) -> Result<TurnResult, InterviewError> {
        // Snapshot what the LLM call needs, without holding the lock across it
        let (project_id, mode, mut llm_messages) = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| InterviewError::UnknownSession(session_id.to_string()))?;
            if session.status != SessionStatus::Active {
                return Err(InterviewError::SessionNotActive(session_id.to_string()));
            }

            session.push_message(ChatMessage::user(user_text));
            self.events.emit(EventKind::InterviewQuestionAsked {
                session_id: session_id.to_string(),
                question: user_text.to_string(),
            });

            let messages = session
                .messages
                .iter()
                .map(|m| match m.role {
                    ChatRole::User => Message::user(&m.content),
                    ChatRole::Assistant => Message::assistant(&m.content),
                })
                .collect::<Vec<_>>();
            (session.project_id.clone(), session.mode, messages)
        };

        let system_prompt = self.build_system_prompt(session_id, mode).await;
        let request = CompletionRequest {
            system_prompt,
            messages: std::mem::take(&mut llm_messages),
            max_tokens: 4096,
            temperature: Some(self.config.temperature),
            disable_tools: true,
            ..Default::default()
        };
        let response = self.llm.complete(request).await?;
        let reply = response.text().to_string();

        let extraction = self.extractor.extract(&project_id, &reply);
        debug!(
            raw = extraction.raw_count,
            kept = extraction.filtered_count,
            "Extracted requirements from reply"
        );

        for requirement in &extraction.requirements {
            self.db.insert_requirement(&requirement.to_row())?;
            self.events.emit(EventKind::InterviewRequirementCaptured {
                session_id: session_id.to_string(),
                requirement_id: requirement.id.clone(),
                category: requirement.category.to_string(),
            });
        }

        let suggested_gaps = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| InterviewError::UnknownSession(session_id.to_string()))?;

            session.push_message(ChatMessage::assistant(&reply));
            for requirement in &extraction.requirements {
                if let Some(area) = &requirement.area {
                    session.note_area(area);
                }
                session.extracted_requirements.push(requirement.clone());
            }

            let gaps = suggest_gaps(session);
            self.db.upsert_session(&session.to_row()?)?;
            gaps
        };

        Ok(TurnResult {
            response: reply,
            extracted_requirements: extraction.requirements,
            suggested_gaps,
        })
    }

    /// Mark a session complete and report its totals
    pub async fn end_session(&self, session_id: &str) -> Result<SessionSummary, InterviewError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| InterviewError::UnknownSession(session_id.to_string()))?;

        session.complete();
        self.db.upsert_session(&session.to_row()?)?;

        let mut categories: Vec<String> = session
            .extracted_requirements
            .iter()
            .map(|r| r.category.to_string())
            .collect();
        categories.sort();
        categories.dedup();

        let summary = SessionSummary {
            total_requirements: session.extracted_requirements.len(),
            categories: categories.clone(),
            duration_ms: session.duration_ms(),
        };

        info!(%session_id, total = summary.total_requirements, "Interview completed");
        self.events.emit(EventKind::InterviewCompleted {
            session_id: session_id.to_string(),
            total_requirements: summary.total_requirements,
            categories,
            duration_ms: summary.duration_ms,
        });
        Ok(summary)
    }

    /// Pause an active session
    pub async fn pause_session(&self, session_id: &str) -> Result<(), InterviewError> {
        self.set_status(session_id, SessionStatus::Paused).await
    }

    /// Resume a paused session
    pub async fn resume_session(&self, session_id: &str) -> Result<(), InterviewError> {
        self.set_status(session_id, SessionStatus::Active).await
    }

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<(), InterviewError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| InterviewError::UnknownSession(session_id.to_string()))?;
        session.status = status;
        self.db.upsert_session(&session.to_row()?)?;
        Ok(())
    }

    /// Current in-memory session
    pub async fn get_session(&self, session_id: &str) -> Option<InterviewSession> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// Load a persisted session into memory
    pub async fn load_session(&self, session_id: &str) -> Result<Option<InterviewSession>, InterviewError> {
        let Some(row) = self.db.get_session(session_id)? else {
            return Ok(None);
        };
        let session = InterviewSession::from_row(&row)?;
        self.sessions.lock().await.insert(session.id.clone(), session.clone());
        Ok(Some(session))
    }

    /// Load the most recent active or paused session for a project
    pub async fn load_latest_session(&self, project_id: &str) -> Result<Option<InterviewSession>, InterviewError> {
        let Some(row) = self.db.latest_session(project_id, &["active", "paused"])? else {
            return Ok(None);
        };
        let session = InterviewSession::from_row(&row)?;
        self.sessions.lock().await.insert(session.id.clone(), session.clone());
        Ok(Some(session))
    }

    /// Persist every in-memory session (auto-save path)
    pub async fn save_all(&self) -> Result<usize, InterviewError> {
        let sessions = self.sessions.lock().await;
        let mut saved = 0;
        for session in sessions.values() {
            self.db.upsert_session(&session.to_row()?)?;
            saved += 1;
        }
        Ok(saved)
    }

    async fn build_system_prompt(&self, session_id: &str, mode: ProjectMode) -> String {
        match mode {
            ProjectMode::Genesis => GENESIS_PROMPT.to_string(),
            ProjectMode::Evolution => {
                let contexts = self.contexts.lock().await;
                let context = contexts.get(session_id).map(String::as_str).unwrap_or("");
                format!("{EVOLUTION_PROMPT}\n\n## Existing codebase\n\n{context}")
            }
        }
    }
}

/// Suggest unexplored standard areas, but only once the conversation has
/// substance: at least 3 requirements and 2 explored areas.
fn suggest_gaps(session: &InterviewSession) -> Vec<String> {
    if session.extracted_requirements.len() < 3 || session.explored_areas.len() < 2 {
        return Vec::new();
    }
    STANDARD_AREAS
        .iter()
        .filter(|area| !session.explored_areas.iter().any(|a| a == *area))
        .map(|a| a.to_string())
        .collect()
}

const GENESIS_PROMPT: &str = r#"You are a requirements analyst interviewing a user about software they want built from scratch.

Ask focused questions, one topic at a time. Whenever the user states something concrete,
capture it as a requirement block:

<requirement>
<text>...</text>
<category>functional|non_functional|technical|constraint|assumption</category>
<priority>must|should|could|wont</priority>
<confidence>0.0-1.0</confidence>
<area>authentication|authorization|data_model|api|ui_ux|performance|security|integrations|deployment</area>
</requirement>

Set confidence to how directly the user stated it. Keep your conversational reply outside the blocks."#;

const EVOLUTION_PROMPT: &str = r#"You are a requirements analyst interviewing a user about changes to an existing codebase.

Ask focused questions about what should change and what must keep working. Capture concrete
statements as requirement blocks in the same format as below, paying attention to compatibility
constraints:

<requirement>
<text>...</text>
<category>functional|non_functional|technical|constraint|assumption</category>
<priority>must|should|could|wont</priority>
<confidence>0.0-1.0</confidence>
<area>...</area>
</requirement>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::create_event_bus;
    use crate::llm::client::mock::MockLlmClient;
    use nexusstore::ProjectRow;

    fn fixture(llm: MockLlmClient) -> InterviewEngine {
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
        InterviewEngine::new(Arc::new(llm), db, bus.scope("interview"), InterviewConfig::default())
    }

    const TWO_BLOCK_REPLY: &str = r#"Noted!
<requirement><text>Login with email</text><category>functional</category><priority>must</priority><confidence>0.9</confidence><area>authentication</area></requirement>
<requirement><text>Should feel fast</text><category>non_functional</category><priority>could</priority><confidence>0.4</confidence></requirement>
What about data storage?"#;

    #[tokio::test]
    async fn test_turn_captures_above_threshold_only() {
        let engine = fixture(MockLlmClient::new(vec![MockLlmClient::text_response(TWO_BLOCK_REPLY)]));
        let session = engine.start_session("p-1", StartOpts::default()).await.unwrap();

        let turn = engine.process_message(&session.id, "I need user accounts").await.unwrap();

        // 0.9 kept, 0.4 dropped by the 0.7 threshold
        assert_eq!(turn.extracted_requirements.len(), 1);
        assert_eq!(turn.extracted_requirements[0].text, "Login with email");
        assert!(turn.response.contains("What about data storage?"));

        let stored = engine.db.list_requirements("p-1").unwrap();
        assert_eq!(stored.len(), 1);

        let session = engine.get_session(&session.id).await.unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.explored_areas, vec!["authentication"]);
    }

    #[tokio::test]
    async fn test_gap_suggestions_need_substance() {
        let replies: Vec<_> = (0..3)
            .map(|i| {
                MockLlmClient::text_response(format!(
                    "<requirement><text>req {i}</text><category>functional</category>\
                     <confidence>0.9</confidence><area>{}</area></requirement>",
                    ["authentication", "api", "security"][i]
                ))
            })
            .collect();
        let engine = fixture(MockLlmClient::new(replies));
        let session = engine.start_session("p-1", StartOpts::default()).await.unwrap();

        // Turn 1: one requirement, one area -> no gaps yet
        let turn = engine.process_message(&session.id, "first").await.unwrap();
        assert!(turn.suggested_gaps.is_empty());

        // Turn 2: two requirements, two areas -> still below 3 requirements
        let turn = engine.process_message(&session.id, "second").await.unwrap();
        assert!(turn.suggested_gaps.is_empty());

        // Turn 3: three requirements, three areas -> gaps appear
        let turn = engine.process_message(&session.id, "third").await.unwrap();
        assert!(!turn.suggested_gaps.is_empty());
        assert!(turn.suggested_gaps.contains(&"deployment".to_string()));
        assert!(!turn.suggested_gaps.contains(&"authentication".to_string()));
    }

    #[tokio::test]
    async fn test_end_session_summary() {
        let engine = fixture(MockLlmClient::new(vec![MockLlmClient::text_response(TWO_BLOCK_REPLY)]));
        let session = engine.start_session("p-1", StartOpts::default()).await.unwrap();
        engine.process_message(&session.id, "hello").await.unwrap();

        let summary = engine.end_session(&session.id).await.unwrap();
        assert_eq!(summary.total_requirements, 1);
        assert_eq!(summary.categories, vec!["functional"]);
        assert!(summary.duration_ms >= 0);

        let ended = engine.get_session(&session.id).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_paused_session_rejects_messages() {
        let engine = fixture(MockLlmClient::always("x"));
        let session = engine.start_session("p-1", StartOpts::default()).await.unwrap();
        engine.pause_session(&session.id).await.unwrap();

        assert!(matches!(
            engine.process_message(&session.id, "hi").await,
            Err(InterviewError::SessionNotActive(_))
        ));

        engine.resume_session(&session.id).await.unwrap();
        assert!(engine.process_message(&session.id, "hi").await.is_ok());
    }

    #[tokio::test]
    async fn test_session_save_load_roundtrip() {
        let engine = fixture(MockLlmClient::new(vec![MockLlmClient::text_response(TWO_BLOCK_REPLY)]));
        let session = engine.start_session("p-1", StartOpts::default()).await.unwrap();
        engine.process_message(&session.id, "hello").await.unwrap();

        let before = engine.get_session(&session.id).await.unwrap();

        // Drop the in-memory copy and reload from the store
        engine.sessions.lock().await.clear();
        let loaded = engine.load_session(&session.id).await.unwrap().unwrap();

        assert_eq!(loaded.messages, before.messages);
        assert_eq!(loaded.explored_areas, before.explored_areas);
        assert_eq!(loaded.extracted_requirements.len(), before.extracted_requirements.len());
        assert_eq!(loaded.status, before.status);
        assert_eq!(loaded.started_at, before.started_at);
    }

    #[tokio::test]
    async fn test_load_latest_session() {
        let engine = fixture(MockLlmClient::always("x"));
        let first = engine.start_session("p-1", StartOpts::default()).await.unwrap();
        engine.pause_session(&first.id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = engine.start_session("p-1", StartOpts::default()).await.unwrap();

        engine.sessions.lock().await.clear();
        let latest = engine.load_latest_session("p-1").await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[tokio::test]
    async fn test_evolution_context_in_prompt() {
        let engine = fixture(MockLlmClient::always("ok"));
        let session = engine
            .start_session(
                "p-1",
                StartOpts {
                    mode: ProjectMode::Evolution,
                    evolution_context: Some("src/main.rs (100 bytes)".to_string()),
                },
            )
            .await
            .unwrap();

        let prompt = engine.build_system_prompt(&session.id, ProjectMode::Evolution).await;
        assert!(prompt.contains("existing codebase"));
        assert!(prompt.contains("src/main.rs"));
    }
}
