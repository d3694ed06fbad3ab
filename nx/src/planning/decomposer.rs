//! TaskDecomposer - LLM-driven decomposition of features into atomic tasks
//!
//! The model is prompted for a strict JSON array of task objects. Output
//! is parsed (code fences tolerated), validated against the atomicity
//! limits, and oversized tasks get exactly one split round. Dependency
//! names resolve to ids case-insensitively; unresolved names stay as
//! written, with a warning.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::domain::{MAX_TASK_MINUTES, Task, TaskKind};
use crate::llm::{CompletionRequest, LlmClient, LlmError, Message, RetryPolicy, complete_with_retry};

use super::estimator::TimeEstimator;

/// Decomposition errors
#[derive(Debug, Error)]
pub enum DecomposeError {
    #[error("Failed to parse decomposition output: {0}")]
    Parse(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Decomposition produced zero tasks")]
    Empty,
}

/// Options for a decomposition run
#[derive(Debug, Clone, Default)]
pub struct DecomposeOpts {
    /// Emit TDD-style tasks (tests first)
    pub use_tdd: bool,
    /// Existing files the model should plan around
    pub context_files: Vec<String>,
}

/// Decomposition result
#[derive(Debug, Clone)]
pub struct Decomposed {
    pub tasks: Vec<Task>,
    pub warnings: Vec<String>,
}

/// LLM output schema for one task
#[derive(Debug, Clone, Deserialize)]
struct TaskOutput {
    name: String,
    description: String,
    #[serde(default)]
    files: Vec<String>,
    #[serde(rename = "testCriteria", default)]
    test_criteria: Vec<String>,
    #[serde(rename = "dependsOn", default)]
    depends_on: Vec<String>,
    #[serde(rename = "estimatedMinutes")]
    estimated_minutes: Option<u32>,
}

/// Decomposer configuration
#[derive(Debug, Clone)]
pub struct DecomposerConfig {
    pub max_tokens: u32,
    pub retry: RetryPolicy,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8192,
            retry: RetryPolicy::default(),
        }
    }
}

/// Breaks feature descriptions into executable atomic tasks
pub struct TaskDecomposer {
    llm: Arc<dyn LlmClient>,
    estimator: TimeEstimator,
    config: DecomposerConfig,
}

impl TaskDecomposer {
    pub fn new(llm: Arc<dyn LlmClient>, config: DecomposerConfig) -> Self {
        Self {
            llm,
            estimator: TimeEstimator::default(),
            config,
        }
    }

    /// Decompose a feature description into tasks for a project
    pub async fn decompose(
        &self,
        project_id: &str,
        feature_description: &str,
        opts: &DecomposeOpts,
    ) -> Result<Decomposed, DecomposeError> {
        let request = CompletionRequest {
            system_prompt: self.build_system_prompt(opts),
            messages: vec![Message::user(self.build_user_prompt(feature_description, opts))],
            max_tokens: self.config.max_tokens,
            ..Default::default()
        };

        let response = complete_with_retry(&self.llm, request, self.config.retry).await?;
        let outputs = parse_task_array(response.text())?;
        if outputs.is_empty() {
            return Err(DecomposeError::Empty);
        }

        let mut warnings = Vec::new();
        let mut tasks = Vec::new();
        // Maps an LLM-visible name to the id dependents should wait on.
        // For split tasks that is the last link of the split chain.
        let mut name_to_id: HashMap<String, String> = HashMap::new();
        // Original dependsOn names, keyed by task id
        let mut pending_deps: HashMap<String, Vec<String>> = HashMap::new();

        for output in outputs {
            let task = self.build_task(project_id, &output, opts);
            for issue in task.validate() {
                warnings.push(format!("task '{}': {}", task.name, issue));
            }

            if task.estimated_minutes > MAX_TASK_MINUTES {
                // One split round; still-oversized output is accepted (clamped), never dropped
                match self.split_task(project_id, &task, opts).await {
                    Ok(mut splits) if !splits.is_empty() => {
                        info!(task = %task.name, pieces = splits.len(), "Split oversized task");
                        // Chain the splits so they run in order, first
                        // inheriting the original's dependencies
                        for i in 1..splits.len() {
                            let prev = splits[i - 1].id.clone();
                            splits[i].depends_on.push(prev);
                        }
                        pending_deps.insert(splits[0].id.clone(), output.depends_on.clone());
                        let last_id = splits.last().unwrap().id.clone();
                        name_to_id.insert(normalize_name(&output.name), last_id);
                        for mut split in splits {
                            if split.estimated_minutes > MAX_TASK_MINUTES {
                                warnings.push(format!(
                                    "task '{}' still estimated {} min after split, clamping",
                                    split.name, split.estimated_minutes
                                ));
                                split.set_estimate(MAX_TASK_MINUTES);
                            }
                            tasks.push(split);
                        }
                        continue;
                    }
                    Ok(_) | Err(_) => {
                        warnings.push(format!(
                            "task '{}' estimated {} min and could not be split, clamping",
                            task.name, task.estimated_minutes
                        ));
                        let mut clamped = task;
                        clamped.set_estimate(MAX_TASK_MINUTES);
                        name_to_id.insert(normalize_name(&output.name), clamped.id.clone());
                        pending_deps.insert(clamped.id.clone(), output.depends_on.clone());
                        tasks.push(clamped);
                        continue;
                    }
                }
            }

            name_to_id.insert(normalize_name(&output.name), task.id.clone());
            pending_deps.insert(task.id.clone(), output.depends_on.clone());
            tasks.push(task);
        }

        // Resolve dependency names to ids; unresolved names stay as-is
        for task in &mut tasks {
            let Some(dep_names) = pending_deps.get(&task.id) else {
                continue;
            };
            for name in dep_names {
                match name_to_id.get(&normalize_name(name)) {
                    Some(id) => task.depends_on.push(id.clone()),
                    None => {
                        warnings.push(format!("task '{}' depends on unknown task '{}'", task.name, name));
                        task.depends_on.push(name.clone());
                    }
                }
            }
        }

        info!(
            task_count = tasks.len(),
            warning_count = warnings.len(),
            "Decomposition complete"
        );
        Ok(Decomposed { tasks, warnings })
    }

    /// Re-prompt the model to split one oversized task
    async fn split_task(
        &self,
        project_id: &str,
        task: &Task,
        opts: &DecomposeOpts,
    ) -> Result<Vec<Task>, DecomposeError> {
        let request = CompletionRequest {
            system_prompt: SPLIT_PROMPT.to_string(),
            messages: vec![Message::user(format!(
                "Split this task into 2-4 smaller tasks of at most {MAX_TASK_MINUTES} minutes each.\n\n\
                 Name: {}\nDescription: {}\nFiles: {}\nEstimated minutes: {}",
                task.name,
                task.description,
                task.files.join(", "),
                task.estimated_minutes
            ))],
            max_tokens: self.config.max_tokens,
            ..Default::default()
        };

        let response = complete_with_retry(&self.llm, request, self.config.retry).await?;
        let outputs = parse_task_array(response.text())?;
        Ok(outputs.iter().map(|o| self.build_task(project_id, o, opts)).collect())
    }

    fn build_task(&self, project_id: &str, output: &TaskOutput, opts: &DecomposeOpts) -> Task {
        let mut task = Task::new(project_id, output.name.trim(), output.description.trim());
        task.kind = if opts.use_tdd { TaskKind::Tdd } else { TaskKind::Auto };
        task.files = output.files.clone();
        task.test_criteria = output.test_criteria.clone();
        let minutes = output.estimated_minutes.unwrap_or_else(|| self.estimator.estimate(&task));
        task.set_estimate(minutes);
        task
    }

    fn build_system_prompt(&self, opts: &DecomposeOpts) -> String {
        let mut prompt = DECOMPOSE_PROMPT.to_string();
        if opts.use_tdd {
            prompt.push_str("\nWrite test tasks before their implementation tasks and wire dependsOn accordingly.\n");
        }
        prompt
    }

    fn build_user_prompt(&self, feature_description: &str, opts: &DecomposeOpts) -> String {
        let mut prompt = format!("Decompose this feature into tasks:\n\n{feature_description}\n");
        if !opts.context_files.is_empty() {
            prompt.push_str("\nExisting files to take into account:\n");
            for file in &opts.context_files {
                prompt.push_str(&format!("- {file}\n"));
            }
        }
        prompt
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Parse a JSON array of task outputs, tolerating code-fence wrappers
fn parse_task_array(text: &str) -> Result<Vec<TaskOutput>, DecomposeError> {
    let stripped = strip_code_fences(text);
    serde_json::from_str(stripped).map_err(|e| DecomposeError::Parse(format!("{e}: {stripped}")))
}

/// Strip a leading/trailing markdown code fence if present
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the fence line
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

const DECOMPOSE_PROMPT: &str = r#"You are a software architect decomposing a feature into atomic tasks.

Rules:
- Each task takes at most 30 minutes and touches at most 5 files
- Each task is independently testable with explicit test criteria
- Reference dependencies by task name in dependsOn
- Dependencies must form a DAG (no cycles)

Output a strict JSON array, no prose, of objects:
[{"name": "...", "description": "...", "files": ["..."], "testCriteria": ["..."], "dependsOn": ["..."], "estimatedMinutes": 10}]
"#;

const SPLIT_PROMPT: &str = r#"You split an oversized development task into smaller sequential tasks.

Rules:
- 2 to 4 tasks, each at most 30 minutes and at most 5 files
- Keep the combined scope identical to the original task
- Each task independently testable

Output a strict JSON array, no prose, in the same schema as the input:
[{"name": "...", "description": "...", "files": ["..."], "testCriteria": ["..."], "dependsOn": [], "estimatedMinutes": 10}]
"#;
