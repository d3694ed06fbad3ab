//! QA loop engine: iterate coder and QA steps until pass or escalation
//!
//! One task, one loop: the coder generates code, then build -> lint ->
//! test -> review run in order. Failures become a compact error list fed
//! back to the coder for the next round. The loop is bounded by the
//! iteration cap, and a build that keeps failing without a single
//! parseable error escalates early instead of spinning.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::agents::{AgentRunner, CoderRunner, extract_file_blocks};
use crate::config::QaConfig;
use crate::domain::Task;
use crate::events::{EventKind, EventScope};
use crate::llm::{CompletionRequest, LlmClient, Message, RetryPolicy, complete_with_retry};

use super::build::{BuildReport, BuildRunner};
use super::lint::{LintReport, LintRunner};
use super::review::{AiReviewReport, AiReviewRunner};
use super::test::{TestReport, TestRunner};

/// Consecutive zero-error build failures tolerated before escalating
const EMPTY_ERROR_LIMIT: u32 = 3;

/// Result of a full QA loop
#[derive(Debug, Clone, Default)]
pub struct QaLoopReport {
    pub task_id: String,
    pub success: bool,
    pub escalated: bool,
    pub reason: Option<String>,
    pub iterations: u32,
    pub last_build: Option<BuildReport>,
    pub last_lint: Option<LintReport>,
    pub last_test: Option<TestReport>,
    pub last_review: Option<AiReviewReport>,
}

/// Drives coder <-> QA iteration for one task
pub struct QaLoopEngine {
    llm: Arc<dyn LlmClient>,
    events: EventScope,
    config: QaConfig,
}

impl QaLoopEngine {
    pub fn new(llm: Arc<dyn LlmClient>, events: EventScope, config: QaConfig) -> Self {
        Self { llm, events, config }
    }

    /// Run the loop in `cwd` (the task's worktree or the project root)
    pub async fn run(&self, task: &Task, cwd: &Path) -> QaLoopReport {
        let build = BuildRunner::new(&self.config.build_command, Duration::from_secs(self.config.build_timeout_secs));
        let lint = LintRunner::new(
            &self.config.lint_command,
            Duration::from_secs(self.config.lint_timeout_secs),
            self.config.lint_fix,
        );
        let test = TestRunner::new(&self.config.test_command, Duration::from_secs(self.config.test_timeout_secs));
        let review = self
            .config
            .review_enabled
            .then(|| AiReviewRunner::new(self.llm.clone(), self.config.max_diff_size));

        let coder = CoderRunner;
        let system_prompt = coder.system_prompt(task);
        let mut messages = vec![Message::user(coder.initial_prompt(task))];

        // Initial generation before the first QA round
        self.coder_turn(task, &system_prompt, &mut messages, cwd).await;

        let mut report = QaLoopReport {
            task_id: task.id.clone(),
            ..Default::default()
        };
        let mut empty_error_streak = 0u32;

        for iteration in 1..=self.config.max_iterations {
            report.iterations = iteration;
            let mut failures: Vec<String> = Vec::new();

            self.events.emit(EventKind::TaskQaIteration {
                task_id: task.id.clone(),
                iteration,
                failing_step: None,
            });

            // Build
            self.events.emit(EventKind::QaBuildStarted {
                task_id: task.id.clone(),
                iteration,
            });
            let build_report = build.run(cwd, iteration).await;
            self.events.emit(EventKind::QaBuildCompleted {
                task_id: task.id.clone(),
                iteration,
                success: build_report.success,
                error_count: build_report.errors.len(),
            });
            if !build_report.success {
                if build_report.errors.is_empty() {
                    empty_error_streak += 1;
                    if empty_error_streak >= EMPTY_ERROR_LIMIT {
                        report.last_build = Some(build_report);
                        report.escalated = true;
                        report.reason = Some(format!(
                            "Build failed {EMPTY_ERROR_LIMIT} times with no parseable errors"
                        ));
                        warn!(task_id = %task.id, "Escalating: opaque build failures");
                        self.emit_loop_completed(task, false, iteration);
                        return report;
                    }
                } else {
                    empty_error_streak = 0;
                }
                for err in &build_report.errors {
                    failures.push(format!("build: {err}"));
                }
                if build_report.errors.is_empty() {
                    failures.push("build: failed with no parseable diagnostics".to_string());
                }
            } else {
                empty_error_streak = 0;
            }
            let build_failed = !build_report.success;
            report.last_build = Some(build_report);

            // Lint
            if !(build_failed && self.config.stop_on_first_failure) {
                let lint_report = lint.run(cwd, iteration).await;
                self.events.emit(EventKind::QaLintCompleted {
                    task_id: task.id.clone(),
                    iteration,
                    success: lint_report.success,
                    error_count: lint_report.errors.len(),
                });
                if !lint_report.success {
                    for issue in &lint_report.errors {
                        failures.push(format!(
                            "lint: {}:{} {} ({})",
                            issue.file,
                            issue.line.unwrap_or(0),
                            issue.message,
                            issue.rule_id.as_deref().unwrap_or("unknown-rule")
                        ));
                    }
                }
                let lint_failed = !lint_report.success;
                report.last_lint = Some(lint_report);

                // Test
                if !(lint_failed && self.config.stop_on_first_failure) {
                    let test_report = test.run(cwd, iteration).await;
                    self.events.emit(EventKind::QaTestCompleted {
                        task_id: task.id.clone(),
                        iteration,
                        success: test_report.success,
                        passed: test_report.passed,
                        failed: test_report.failed,
                    });
                    if !test_report.success {
                        for failure in &test_report.failures {
                            failures.push(format!("test: {failure}"));
                        }
                        if test_report.failures.is_empty() {
                            failures.push(format!("test: {} tests failed", test_report.failed));
                        }
                    }
                    let tests_failed = !test_report.success;
                    report.last_test = Some(test_report);

                    // AI review
                    if let Some(reviewer) = &review
                        && !(tests_failed && self.config.stop_on_first_failure)
                    {
                        let review_report = reviewer.run(cwd, &task.description, iteration).await;
                        if !review_report.approved {
                            for blocker in &review_report.blockers {
                                failures.push(format!("review: {blocker}"));
                            }
                            if review_report.blockers.is_empty() {
                                failures.push("review: changes not approved".to_string());
                            }
                        }
                        report.last_review = Some(review_report);
                    }
                }
            }

            if failures.is_empty() {
                info!(task_id = %task.id, iteration, "QA loop passed");
                report.success = true;
                self.emit_loop_completed(task, true, iteration);
                return report;
            }

            // Feed the failures back to the coder and go around again
            let failure_list = failures.join("\n");
            info!(task_id = %task.id, iteration, failures = failures.len(), "QA round failed, asking coder to fix");
            messages.push(Message::user(format!(
                "QA found the following problems. Fix them, emitting updated `### File:` sections:\n{failure_list}"
            )));
            self.coder_turn(task, &system_prompt, &mut messages, cwd).await;
        }

        report.escalated = true;
        report.reason = Some("Max QA iterations exceeded".to_string());
        self.emit_loop_completed(task, false, report.iterations);
        report
    }

    /// One coder completion: call the model and apply any file blocks
    async fn coder_turn(&self, task: &Task, system_prompt: &str, messages: &mut Vec<Message>, cwd: &Path) {
        let request = CompletionRequest {
            system_prompt: system_prompt.to_string(),
            messages: messages.clone(),
            max_tokens: 16384,
            task_id: Some(task.id.clone()),
            working_directory: Some(cwd.to_path_buf()),
            ..Default::default()
        };

        match complete_with_retry(&self.llm, request, RetryPolicy::default()).await {
            Ok(response) => {
                let reply = response.text().to_string();
                apply_file_blocks(&reply, cwd);
                messages.push(Message::assistant(reply));
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Coder turn failed; QA will re-run against current tree");
                messages.push(Message::user(format!(
                    "The previous generation attempt failed ({e}). Continue from the current state."
                )));
            }
        }
    }

    fn emit_loop_completed(&self, task: &Task, success: bool, iterations: u32) {
        self.events.emit(EventKind::QaLoopCompleted {
            task_id: task.id.clone(),
            success,
            iterations,
        });
    }
}

/// Write `### File:` blocks from a coder reply into the working tree.
/// Paths are kept inside `cwd`; absolute or parent-escaping paths are
/// dropped with a warning.
pub fn apply_file_blocks(reply: &str, cwd: &Path) {
    for (path, contents) in extract_file_blocks(reply) {
        let rel = Path::new(&path);
        if rel.is_absolute() || rel.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            warn!(%path, "Refusing to write file outside the working tree");
            continue;
        }
        let target = cwd.join(rel);
        if let Some(parent) = target.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&target, contents) {
            warn!(%path, error = %e, "Failed to write generated file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::create_event_bus;
    use crate::llm::client::mock::MockLlmClient;
    use tempfile::tempdir;

    fn qa_config(build: &str, max_iterations: u32) -> QaConfig {
        QaConfig {
            build_command: build.to_string(),
            lint_command: "true".to_string(),
            test_command: "true".to_string(),
            max_iterations,
            review_enabled: false,
            ..Default::default()
        }
    }

    fn task() -> Task {
        let mut t = Task::new("p-1", "sample", "make it work");
        t.test_criteria = vec!["builds".to_string()];
        t
    }

    #[test]
    fn test_apply_file_blocks_writes_inside_cwd() {
        let dir = tempdir().unwrap();
        let reply = "### File: src/gen.txt\n```\ngenerated\n```\n[TASK_COMPLETE]";
        apply_file_blocks(reply, dir.path());
        let content = std::fs::read_to_string(dir.path().join("src/gen.txt")).unwrap();
        assert_eq!(content, "generated\n");
    }

    #[test]
    fn test_apply_file_blocks_rejects_escapes() {
        let dir = tempdir().unwrap();
        let reply = "### File: ../escape.txt\n```\nnope\n```\n### File: /tmp/abs.txt\n```\nnope\n```";
        apply_file_blocks(reply, dir.path());
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_all_pass_first_iteration() {
        let dir = tempdir().unwrap();
        let bus = create_event_bus();
        let llm = Arc::new(MockLlmClient::always("### File: a.txt\n```\nok\n```\n[TASK_COMPLETE]"));
        let engine = QaLoopEngine::new(llm, bus.scope("qa"), qa_config("true", 5));

        let report = engine.run(&task(), dir.path()).await;
        assert!(report.success);
        assert!(!report.escalated);
        assert_eq!(report.iterations, 1);
        assert!(report.last_build.as_ref().unwrap().success);
    }

    #[tokio::test]
    async fn test_escalates_after_max_iterations() {
        let dir = tempdir().unwrap();
        let bus = create_event_bus();
        let mut rx = bus.subscribe();
        let llm = Arc::new(MockLlmClient::always("trying a fix"));
        // Build fails every time WITH parseable errors, so the cap is what fires
        let engine = QaLoopEngine::new(
            llm,
            bus.scope("qa"),
            qa_config("echo 'src/a.ts(1,1): error TS1005: broken.'; exit 1", 3),
        );

        let report = engine.run(&task(), dir.path()).await;
        assert!(!report.success);
        assert!(report.escalated);
        assert_eq!(report.iterations, 3);
        assert_eq!(report.reason.as_deref(), Some("Max QA iterations exceeded"));

        let mut loop_events = 0;
        while let Ok(event) = rx.try_recv() {
            if event.event_type() == "qa:loop-completed" {
                loop_events += 1;
            }
        }
        assert_eq!(loop_events, 1);
    }

    #[tokio::test]
    async fn test_empty_error_guard_escalates_early() {
        let dir = tempdir().unwrap();
        let bus = create_event_bus();
        let llm = Arc::new(MockLlmClient::always("trying"));
        // Opaque failure: exit 1, nothing parseable
        let engine = QaLoopEngine::new(llm, bus.scope("qa"), qa_config("exit 1", 50));

        let report = engine.run(&task(), dir.path()).await;
        assert!(report.escalated);
        assert_eq!(report.iterations, 3);
        assert!(report.reason.as_deref().unwrap().contains("no parseable errors"));
    }

    #[tokio::test]
    async fn test_fix_round_applies_generated_files() {
        let dir = tempdir().unwrap();
        let bus = create_event_bus();
        // Build passes only once the marker file exists; the fix round writes it
        let build = format!("test -f {}", dir.path().join("fixed.txt").display());
        let llm = Arc::new(MockLlmClient::new(vec![
            MockLlmClient::text_response("first attempt, no files"),
            MockLlmClient::text_response("### File: fixed.txt\n```\ndone\n```\n[TASK_COMPLETE]"),
        ]));
        let engine = QaLoopEngine::new(llm, bus.scope("qa"), qa_config(&build, 5));

        let report = engine.run(&task(), dir.path()).await;
        assert!(report.success);
        assert_eq!(report.iterations, 2);
        assert!(dir.path().join("fixed.txt").exists());
    }
}
