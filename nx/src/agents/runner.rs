//! Agent runner capability and the shared execution loop
//!
//! Every role (coder, tester, reviewer, merger) provides prompts and a
//! completion check; `run_agent_loop` owns the iteration mechanics:
//! caps, timeouts, conversation accumulation, and error recovery.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::domain::{AgentKind, Task};
use crate::events::{EventKind, EventScope};
use crate::llm::{CompletionRequest, LlmClient, LlmError, Message};

/// Universal completion marker any role may emit
pub const TASK_COMPLETE_MARKER: &str = "[TASK_COMPLETE]";

/// Execution context handed to a runner
#[derive(Clone)]
pub struct AgentContext {
    pub llm: Arc<dyn LlmClient>,
    pub events: EventScope,
    pub agent_id: String,
    pub working_dir: PathBuf,
    /// Iteration cap for the conversation loop
    pub max_iterations: u32,
    /// Wall-clock budget for the whole task
    pub timeout: Duration,
    pub max_tokens: u32,
}

impl AgentContext {
    pub fn new(llm: Arc<dyn LlmClient>, events: EventScope, agent_id: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            llm,
            events,
            agent_id: agent_id.into(),
            working_dir,
            max_iterations: 50,
            timeout: Duration::from_secs(30 * 60),
            max_tokens: 16384,
        }
    }
}

/// Metrics for one task execution
#[derive(Debug, Clone, Default)]
pub struct TaskResultMetrics {
    pub iterations: u32,
    pub tokens_used: u64,
    pub time_ms: u64,
}

/// Result of one agent task execution
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    pub escalated: bool,
    pub reason: Option<String>,
    pub output: String,
    pub iterations: u32,
    pub duration_ms: u64,
    pub metrics: TaskResultMetrics,
}

impl TaskResult {
    fn finished(task_id: &str, output: String, iterations: u32, started: Instant, tokens: u64) -> Self {
        let time_ms = started.elapsed().as_millis() as u64;
        Self {
            task_id: task_id.to_string(),
            success: true,
            escalated: false,
            reason: None,
            output,
            iterations,
            duration_ms: time_ms,
            metrics: TaskResultMetrics {
                iterations,
                tokens_used: tokens,
                time_ms,
            },
        }
    }

    fn escalated(task_id: &str, reason: String, output: String, iterations: u32, started: Instant, tokens: u64) -> Self {
        let time_ms = started.elapsed().as_millis() as u64;
        Self {
            task_id: task_id.to_string(),
            success: false,
            escalated: true,
            reason: Some(reason),
            output,
            iterations,
            duration_ms: time_ms,
            metrics: TaskResultMetrics {
                iterations,
                tokens_used: tokens,
                time_ms,
            },
        }
    }
}

/// Role capability: prompts and completion detection
pub trait AgentRunner: Send + Sync {
    /// The role this runner implements
    fn kind(&self) -> AgentKind;

    /// System prompt for a task
    fn system_prompt(&self, task: &Task) -> String;

    /// Whether the reply finishes the task
    fn is_complete(&self, reply: &str, task: &Task) -> bool;

    /// Prompt appended when the model stops without finishing
    fn continuation_prompt(&self) -> String {
        "Continue working on the task. Reply with [TASK_COMPLETE] when everything is done.".to_string()
    }

    /// Prompt appended after an LLM failure so the next call can recover
    fn recovery_prompt(&self, err: &LlmError) -> String {
        format!("The previous step failed ({err}). Pick up where you left off and continue the task.")
    }

    /// Initial user message for the task
    fn initial_prompt(&self, task: &Task) -> String {
        render_template(
            "Task: {{name}}\n\nDescription:\n{{description}}\n\nFiles in scope:\n{{files}}\n\nTest criteria:\n{{criteria}}\n",
            &[
                ("name", task.name.clone()),
                ("description", task.description.clone()),
                ("files", bulleted(&task.files)),
                ("criteria", bulleted(&task.test_criteria)),
            ],
        )
    }
}

/// Render a `{{key}}` template with the given values
pub fn render_template(template: &str, values: &[(&str, String)]) -> String {
    let mut handlebars = handlebars::Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    let data: std::collections::HashMap<&str, &String> = values.iter().map(|(k, v)| (*k, v)).collect();
    handlebars
        .render_template(template, &data)
        .unwrap_or_else(|_| template.to_string())
}

fn bulleted(items: &[String]) -> String {
    if items.is_empty() {
        "- (none listed)".to_string()
    } else {
        items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
    }
}

/// Run the shared agent loop for a role
///
/// Per iteration: send system prompt + history, check for completion,
/// append continuation otherwise. LLM failures emit `agent:error` and an
/// in-conversation recovery prompt; they never fail the task directly.
/// Exceeding the iteration cap or the wall clock escalates.
pub async fn run_agent_loop(runner: &dyn AgentRunner, task: &Task, ctx: &AgentContext) -> TaskResult {
    let started = Instant::now();
    let system_prompt = runner.system_prompt(task);
    let mut messages = vec![Message::user(runner.initial_prompt(task))];
    let mut iterations = 0u32;
    let mut tokens = 0u64;
    let mut last_output = String::new();

    info!(task_id = %task.id, kind = %runner.kind(), "Agent loop started");

    loop {
        if iterations >= ctx.max_iterations {
            return TaskResult::escalated(
                &task.id,
                format!("Max iterations ({}) exceeded", ctx.max_iterations),
                last_output,
                iterations,
                started,
                tokens,
            );
        }
        if started.elapsed() >= ctx.timeout {
            return TaskResult::escalated(
                &task.id,
                format!("Timeout after {:?}", ctx.timeout),
                last_output,
                iterations,
                started,
                tokens,
            );
        }
        iterations += 1;

        ctx.events.emit(EventKind::AgentProgress {
            agent_id: ctx.agent_id.clone(),
            iteration: iterations,
        });

        let request = CompletionRequest {
            system_prompt: system_prompt.clone(),
            messages: messages.clone(),
            max_tokens: ctx.max_tokens,
            agent_id: Some(ctx.agent_id.clone()),
            task_id: Some(task.id.clone()),
            working_directory: Some(ctx.working_dir.clone()),
            ..Default::default()
        };

        let reply = match ctx.llm.complete(request).await {
            Ok(response) => {
                tokens += response.usage.total();
                response.text().to_string()
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "LLM call failed inside agent loop");
                ctx.events.emit(EventKind::AgentError {
                    agent_id: ctx.agent_id.clone(),
                    error: e.to_string(),
                });
                messages.push(Message::user(runner.recovery_prompt(&e)));
                continue;
            }
        };

        last_output = reply.clone();
        messages.push(Message::assistant(reply.clone()));

        if reply.contains(TASK_COMPLETE_MARKER) || runner.is_complete(&reply, task) {
            info!(task_id = %task.id, iterations, "Agent loop complete");
            ctx.events.emit(EventKind::AgentOutput {
                agent_id: ctx.agent_id.clone(),
                summary: summarize(&reply),
            });
            return TaskResult::finished(&task.id, reply, iterations, started, tokens);
        }

        messages.push(Message::user(runner.continuation_prompt()));
    }
}

fn summarize(reply: &str) -> String {
    reply.chars().take(200).collect()
}
