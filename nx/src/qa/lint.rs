//! Lint runner: runs the linter and parses its JSON report
//!
//! Speaks the eslint `--format=json` shape: an array of file results with
//! per-message severity, rule id and optional fix info.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::exec::run_command;

#[derive(Debug, Deserialize)]
struct FileResult {
    #[serde(rename = "filePath")]
    file_path: String,
    #[serde(default)]
    messages: Vec<FileMessage>,
}

#[derive(Debug, Deserialize)]
struct FileMessage {
    #[serde(rename = "ruleId")]
    rule_id: Option<String>,
    /// 1 = warning, 2 = error
    severity: u8,
    message: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    fix: Option<serde_json::Value>,
}

/// One lint finding
#[derive(Debug, Clone)]
pub struct LintIssue {
    pub file: String,
    pub rule_id: Option<String>,
    pub message: String,
    pub line: Option<u32>,
    pub fixable: bool,
}

/// Lint step result
#[derive(Debug, Clone, Default)]
pub struct LintReport {
    pub success: bool,
    pub errors: Vec<LintIssue>,
    pub warning_count: usize,
    pub fixable_count: usize,
    pub duration_ms: u64,
    pub iteration: u32,
}

/// Runs the lint command
#[derive(Debug, Clone)]
pub struct LintRunner {
    pub command: String,
    pub timeout: Duration,
    /// Append `--fix` to let the linter repair what it can
    pub fix: bool,
}

impl LintRunner {
    pub fn new(command: impl Into<String>, timeout: Duration, fix: bool) -> Self {
        Self {
            command: command.into(),
            timeout,
            fix,
        }
    }

    pub async fn run(&self, cwd: &Path, iteration: u32) -> LintReport {
        let command = if self.fix {
            format!("{} --fix", self.command)
        } else {
            self.command.clone()
        };
        let output = run_command(&command, cwd, self.timeout).await;

        let mut report = LintReport {
            duration_ms: output.duration_ms,
            iteration,
            ..Default::default()
        };

        match serde_json::from_str::<Vec<FileResult>>(output.stdout.trim()) {
            Ok(files) => {
                for file in files {
                    for msg in file.messages {
                        let issue = LintIssue {
                            file: file.file_path.clone(),
                            rule_id: msg.rule_id,
                            message: msg.message,
                            line: msg.line,
                            fixable: msg.fix.is_some(),
                        };
                        if issue.fixable {
                            report.fixable_count += 1;
                        }
                        if msg.severity >= 2 {
                            report.errors.push(issue);
                        } else {
                            report.warning_count += 1;
                        }
                    }
                }
                report.success = report.errors.is_empty() && !output.timed_out;
            }
            Err(e) => {
                debug!(error = %e, "Lint output was not JSON");
                // No parseable report: trust the exit code
                report.success = output.passed();
                if !report.success {
                    report.errors.push(LintIssue {
                        file: String::new(),
                        rule_id: None,
                        message: truncate(&output.combined(), 500),
                        line: None,
                        fixable: false,
                    });
                }
            }
        }

        report
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max { s.to_string() } else { format!("{}...", &s[..max]) }
}
