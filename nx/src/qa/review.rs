//! AI review runner: reviews the working tree's git diff

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tracing::warn;

use crate::git::{DiffOpts, GitService};
use crate::llm::{CompletionRequest, LlmClient, Message};

/// AI review step result
#[derive(Debug, Clone, Default)]
pub struct AiReviewReport {
    pub approved: bool,
    pub comments: Vec<String>,
    pub suggestions: Vec<String>,
    pub blockers: Vec<String>,
    pub duration_ms: u64,
    pub iteration: u32,
}

#[derive(Debug, Deserialize)]
struct ReviewReply {
    approved: bool,
    #[serde(default)]
    comments: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    blockers: Vec<String>,
}

/// Reviews the current diff (staged + unstaged) with the LLM
pub struct AiReviewRunner {
    llm: Arc<dyn LlmClient>,
    max_diff_size: usize,
}

impl AiReviewRunner {
    pub fn new(llm: Arc<dyn LlmClient>, max_diff_size: usize) -> Self {
        Self { llm, max_diff_size }
    }

    pub async fn run(&self, cwd: &Path, task_description: &str, iteration: u32) -> AiReviewReport {
        let started = Instant::now();
        let git = GitService::new(cwd);

        let mut diff = String::new();
        for staged in [true, false] {
            match git
                .diff(&DiffOpts {
                    staged,
                    ..Default::default()
                })
                .await
            {
                Ok(d) => diff.push_str(&d),
                Err(e) => warn!(error = %e, "Could not read diff for review"),
            }
        }

        if diff.trim().is_empty() {
            return AiReviewReport {
                approved: true,
                comments: vec!["no changes to review".to_string()],
                duration_ms: started.elapsed().as_millis() as u64,
                iteration,
                ..Default::default()
            };
        }

        if diff.len() > self.max_diff_size {
            diff.truncate(self.max_diff_size);
            diff.push_str("\n... [diff truncated]");
        }

        let request = CompletionRequest {
            system_prompt: REVIEW_PROMPT.to_string(),
            messages: vec![Message::user(format!(
                "Task:\n{task_description}\n\nDiff under review:\n```diff\n{diff}\n```"
            ))],
            max_tokens: 4096,
            disable_tools: true,
            ..Default::default()
        };

        match self.llm.complete(request).await {
            Ok(response) => match parse_reply(response.text()) {
                Some(reply) => AiReviewReport {
                    approved: reply.approved && reply.blockers.is_empty(),
                    comments: reply.comments,
                    suggestions: reply.suggestions,
                    blockers: reply.blockers,
                    duration_ms: started.elapsed().as_millis() as u64,
                    iteration,
                },
                None => AiReviewReport {
                    approved: false,
                    blockers: vec!["review reply was not valid JSON".to_string()],
                    duration_ms: started.elapsed().as_millis() as u64,
                    iteration,
                    ..Default::default()
                },
            },
            Err(e) => {
                warn!(error = %e, "AI review call failed");
                AiReviewReport {
                    approved: false,
                    blockers: vec![format!("review failed: {e}")],
                    duration_ms: started.elapsed().as_millis() as u64,
                    iteration,
                    ..Default::default()
                }
            }
        }
    }
}

fn parse_reply(text: &str) -> Option<ReviewReply> {
    let trimmed = text.trim();
    if let Ok(r) = serde_json::from_str(trimmed) {
        return Some(r);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    serde_json::from_str(&trimmed[start..=end]).ok()
}

const REVIEW_PROMPT: &str = r#"You review a code diff against its task description.

Respond with STRICT JSON only:
{"approved": true, "comments": ["..."], "suggestions": ["..."], "blockers": ["..."]}

A blocker is anything that must be fixed before merge. Approve only when
there are no blockers."#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::MockLlmClient;
    use tempfile::tempdir;
    use tokio::process::Command;

    async fn repo_with_change(dir: &Path) {
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "t@t"],
            vec!["config", "user.name", "T"],
            vec!["commit", "--allow-empty", "-m", "initial"],
        ] {
            Command::new("git").args(&args).current_dir(dir).output().await.unwrap();
        }
        std::fs::write(dir.join("a.txt"), "tracked\n").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir).output().await.unwrap();
        Command::new("git")
            .args(["commit", "-m", "base"])
            .current_dir(dir)
            .output()
            .await
            .unwrap();
        std::fs::write(dir.join("a.txt"), "tracked changed\n").unwrap();
    }

    #[test]
    fn test_parse_reply_embedded() {
        let reply = parse_reply("verdict: {\"approved\": false, \"blockers\": [\"bug\"]}").unwrap();
        assert!(!reply.approved);
        assert_eq!(reply.blockers, vec!["bug"]);
    }

    #[tokio::test]
    async fn test_empty_diff_auto_approves_without_llm() {
        let dir = tempdir().unwrap();
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "t@t"],
            vec!["config", "user.name", "T"],
            vec!["commit", "--allow-empty", "-m", "initial"],
        ] {
            Command::new("git")
                .args(&args)
                .current_dir(dir.path())
                .output()
                .await
                .unwrap();
        }

        let llm = Arc::new(MockLlmClient::new(vec![]));
        let runner = AiReviewRunner::new(llm.clone(), 10_000);
        let report = runner.run(dir.path(), "task", 1).await;

        assert!(report.approved);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_review_approval_requires_no_blockers() {
        let dir = tempdir().unwrap();
        repo_with_change(dir.path()).await;

        let llm = Arc::new(MockLlmClient::new(vec![MockLlmClient::text_response(
            r#"{"approved": true, "comments": [], "suggestions": [], "blockers": ["off-by-one"]}"#,
        )]));
        let runner = AiReviewRunner::new(llm, 10_000);
        let report = runner.run(dir.path(), "task", 1).await;

        assert!(!report.approved);
        assert_eq!(report.blockers, vec!["off-by-one"]);
    }

    #[tokio::test]
    async fn test_review_invalid_json_blocks() {
        let dir = tempdir().unwrap();
        repo_with_change(dir.path()).await;

        let llm = Arc::new(MockLlmClient::new(vec![MockLlmClient::text_response("looks fine!")]));
        let runner = AiReviewRunner::new(llm, 10_000);
        let report = runner.run(dir.path(), "task", 1).await;

        assert!(!report.approved);
        assert!(!report.blockers.is_empty());
    }
}
