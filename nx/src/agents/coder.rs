//! Coder agent: writes implementation code

use crate::domain::{AgentKind, Task, TaskKind};

use super::runner::AgentRunner;

/// Produces `### File: path` code blocks for the task's files
pub struct CoderRunner;

impl AgentRunner for CoderRunner {
    fn kind(&self) -> AgentKind {
        AgentKind::Coder
    }

    fn system_prompt(&self, task: &Task) -> String {
        let tdd_note = match task.kind {
            TaskKind::Tdd => "\nTests for this task already exist or come first; make them pass without weakening them.",
            TaskKind::Auto => "",
        };
        format!(
            "You are a senior software engineer implementing one atomic task.\n\
             \n\
             Output format:\n\
             - For every file you create or change, emit a section starting with `### File: <path>`\n\
               followed by a fenced code block containing the COMPLETE file contents.\n\
             - Briefly explain non-obvious decisions after the code blocks.\n\
             - Touch only the files in scope.\n\
             - When the implementation is finished and satisfies every test criterion, end your\n\
               reply with [TASK_COMPLETE].{tdd_note}"
        )
    }

    fn is_complete(&self, reply: &str, _task: &Task) -> bool {
        // Completion is explicit; file sections alone are progress, not done
        reply.contains("[TASK_COMPLETE]")
    }

    fn continuation_prompt(&self) -> String {
        "Continue the implementation. Emit the remaining `### File:` sections and end with [TASK_COMPLETE] when done."
            .to_string()
    }
}

/// Extract `(path, contents)` pairs from a coder reply
pub fn extract_file_blocks(reply: &str) -> Vec<(String, String)> {
    let mut files = Vec::new();
    let mut lines = reply.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(path) = line.strip_prefix("### File:").map(str::trim) else {
            continue;
        };
        // Skip to the opening fence
        let mut in_block = false;
        let mut contents = String::new();
        for body_line in lines.by_ref() {
            if body_line.trim_start().starts_with("```") {
                if in_block {
                    break;
                }
                in_block = true;
                continue;
            }
            if in_block {
                contents.push_str(body_line);
                contents.push('\n');
            }
        }
        if !path.is_empty() {
            files.push((path.to_string(), contents));
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_file_blocks() {
        let reply = "Here is the change.\n\
            ### File: src/a.rs\n\
            ```rust\n\
            fn a() {}\n\
            ```\n\
            ### File: src/b.rs\n\
            ```rust\n\
            fn b() {}\n\
            fn b2() {}\n\
            ```\n\
            [TASK_COMPLETE]";

        let files = extract_file_blocks(reply);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].0, "src/a.rs");
        assert_eq!(files[0].1, "fn a() {}\n");
        assert!(files[1].1.contains("fn b2"));
    }

    #[test]
    fn test_extract_ignores_plain_fences() {
        let reply = "```\nno file header\n```";
        assert!(extract_file_blocks(reply).is_empty());
    }

    #[test]
    fn test_completion_requires_marker() {
        let runner = CoderRunner;
        let task = Task::new("p", "t", "d");
        assert!(!runner.is_complete("### File: a.rs\n```\nx\n```", &task));
        assert!(runner.is_complete("done [TASK_COMPLETE]", &task));
    }

    #[test]
    fn test_tdd_prompt_variant() {
        let runner = CoderRunner;
        let mut task = Task::new("p", "t", "d");
        task.kind = TaskKind::Tdd;
        assert!(runner.system_prompt(&task).contains("Tests for this task"));
    }
}
