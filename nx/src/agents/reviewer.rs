//! Reviewer agent: strict-JSON code review verdicts
//!
//! The model's own `approved` flag is advisory. Effective approval is
//! recomputed from the issue list: zero critical and at most two major
//! issues, whatever the model claimed.

use serde::{Deserialize, Serialize};

use crate::domain::{AgentKind, Task};

use super::runner::AgentRunner;

/// Issue severity buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Critical,
    Major,
    Minor,
    Info,
}

/// A single review finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: IssueSeverity,
    pub category: String,
    pub file: String,
    #[serde(default)]
    pub line: Option<u32>,
    pub message: String,
    #[serde(default)]
    pub suggestion: Option<String>,
}

/// The reviewer's structured verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

impl ReviewVerdict {
    /// Approval the engine actually honors: zero critical and at most two
    /// major issues, regardless of the stated `approved`.
    pub fn effective_approval(&self) -> bool {
        let critical = self.count(IssueSeverity::Critical);
        let major = self.count(IssueSeverity::Major);
        critical == 0 && major <= 2
    }

    fn count(&self, severity: IssueSeverity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

/// Parse a verdict out of a model reply, tolerating code fences and
/// surrounding prose.
pub fn parse_verdict(reply: &str) -> Option<ReviewVerdict> {
    let trimmed = reply.trim();

    // Direct parse first, then fenced block, then first {...} span
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body = after.split_once('\n').map(|(_, b)| b).unwrap_or(after);
        if let Some(end) = body.find("```")
            && let Ok(v) = serde_json::from_str(body[..end].trim())
        {
            return Some(v);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Reviews a task's output and returns a strict JSON verdict
pub struct ReviewerRunner;

impl AgentRunner for ReviewerRunner {
    fn kind(&self) -> AgentKind {
        AgentKind::Reviewer
    }

    fn system_prompt(&self, _task: &Task) -> String {
        r#"You are a meticulous code reviewer. Review the presented changes against the task's test criteria.

Respond with STRICT JSON only, no prose:
{
  "approved": true,
  "issues": [
    {"severity": "critical|major|minor|info", "category": "...", "file": "...", "line": 1, "message": "...", "suggestion": "..."}
  ],
  "suggestions": ["..."],
  "summary": "..."
}"#
        .to_string()
    }

    fn is_complete(&self, reply: &str, _task: &Task) -> bool {
        parse_verdict(reply).is_some()
    }

    fn continuation_prompt(&self) -> String {
        "Your previous reply was not valid verdict JSON. Respond with ONLY the JSON object.".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(severity: IssueSeverity) -> ReviewIssue {
        ReviewIssue {
            severity,
            category: "correctness".to_string(),
            file: "src/a.ts".to_string(),
            line: Some(10),
            message: "problem".to_string(),
            suggestion: None,
        }
    }

    #[test]
    fn test_parse_plain_json() {
        let verdict = parse_verdict(r#"{"approved": true, "issues": [], "suggestions": [], "summary": "fine"}"#);
        assert!(verdict.unwrap().approved);
    }

    #[test]
    fn test_parse_fenced_json() {
        let reply = "Here is my review:\n```json\n{\"approved\": false, \"issues\": [], \"summary\": \"bad\"}\n```";
        let verdict = parse_verdict(reply).unwrap();
        assert!(!verdict.approved);
    }

    #[test]
    fn test_parse_embedded_json() {
        let reply = "Verdict follows. {\"approved\": true, \"summary\": \"ok\"} Thanks.";
        assert!(parse_verdict(reply).is_some());
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_verdict("no json anywhere").is_none());
    }

    #[test]
    fn test_effective_approval_overrides_stated_verdict() {
        // Model says approved but a critical issue exists
        let verdict = ReviewVerdict {
            approved: true,
            issues: vec![issue(IssueSeverity::Critical)],
            suggestions: vec![],
            summary: String::new(),
        };
        assert!(!verdict.effective_approval());

        // Model says rejected but only minor issues exist
        let verdict = ReviewVerdict {
            approved: false,
            issues: vec![issue(IssueSeverity::Minor), issue(IssueSeverity::Info)],
            suggestions: vec![],
            summary: String::new(),
        };
        assert!(verdict.effective_approval());
    }

    #[test]
    fn test_effective_approval_major_threshold() {
        let two_major = ReviewVerdict {
            approved: true,
            issues: vec![issue(IssueSeverity::Major), issue(IssueSeverity::Major)],
            suggestions: vec![],
            summary: String::new(),
        };
        assert!(two_major.effective_approval());

        let three_major = ReviewVerdict {
            approved: true,
            issues: vec![
                issue(IssueSeverity::Major),
                issue(IssueSeverity::Major),
                issue(IssueSeverity::Major),
            ],
            suggestions: vec![],
            summary: String::new(),
        };
        assert!(!three_major.effective_approval());
    }

    #[test]
    fn test_runner_complete_on_valid_json() {
        let runner = ReviewerRunner;
        let task = Task::new("p", "t", "d");
        assert!(runner.is_complete(r#"{"approved": true, "summary": "ok"}"#, &task));
        assert!(!runner.is_complete("still reviewing...", &task));
    }
}
