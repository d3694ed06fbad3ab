//! Tester agent: writes tests mirroring source files

use crate::domain::{AgentKind, Task};

use super::runner::AgentRunner;

/// Writes `*.test.*` files covering the task's test criteria
pub struct TesterRunner;

impl AgentRunner for TesterRunner {
    fn kind(&self) -> AgentKind {
        AgentKind::Tester
    }

    fn system_prompt(&self, _task: &Task) -> String {
        "You are a test engineer writing automated tests for one atomic task.\n\
         \n\
         Output format:\n\
         - For every test file, emit `### File: <path>` followed by a fenced code block.\n\
         - Test file names mirror their sources with a `.test.` infix\n\
           (src/user.ts -> src/user.test.ts).\n\
         - Cover every test criterion listed for the task, including failure paths.\n\
         - Do not modify production code.\n\
         - End your reply with [TASK_COMPLETE] when the criteria are covered."
            .to_string()
    }

    fn is_complete(&self, reply: &str, _task: &Task) -> bool {
        reply.contains("[TASK_COMPLETE]") && reply.contains(".test.")
    }

    fn continuation_prompt(&self) -> String {
        "Continue writing tests. Remember the `.test.` naming and end with [TASK_COMPLETE] when all criteria are covered."
            .to_string()
    }
}
