//! Test runner: executes the test suite and parses results
//!
//! Speaks the vitest `--reporter=json` shape, with a regex fallback over
//! plain summary output. A project with no test runner or no tests yet is
//! a success with a warning - a missing suite must never block early
//! iterations.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::exec::run_command;

static PASSED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)(\d+)\s+passed").expect("passed regex"));
static FAILED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)(\d+)\s+failed").expect("failed regex"));
static SKIPPED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(\d+)\s+(?:skipped|pending)").expect("skipped regex"));

#[derive(Debug, Deserialize)]
struct JsonResults {
    #[serde(rename = "numPassedTests", default)]
    passed: u32,
    #[serde(rename = "numFailedTests", default)]
    failed: u32,
    #[serde(rename = "numPendingTests", default)]
    pending: u32,
    #[serde(rename = "testResults", default)]
    test_results: Vec<TestFileResult>,
    #[serde(rename = "coverageMap", default)]
    coverage_map: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TestFileResult {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Test step result
#[derive(Debug, Clone, Default)]
pub struct TestReport {
    pub success: bool,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub failures: Vec<String>,
    pub has_coverage: bool,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
    pub iteration: u32,
}

/// Runs the test command
#[derive(Debug, Clone)]
pub struct TestRunner {
    pub command: String,
    pub timeout: Duration,
}

impl TestRunner {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    pub async fn run(&self, cwd: &Path, iteration: u32) -> TestReport {
        let output = run_command(&self.command, cwd, self.timeout).await;
        let combined = output.combined();

        let mut report = TestReport {
            duration_ms: output.duration_ms,
            iteration,
            ..Default::default()
        };

        if is_runner_missing(&combined, output.exit_code) {
            report.success = true;
            report.warnings.push("test runner not installed or no tests found; skipping".to_string());
            return report;
        }

        if let Some(parsed) = find_json_results(&combined) {
            report.passed = parsed.passed;
            report.failed = parsed.failed;
            report.skipped = parsed.pending;
            report.has_coverage = parsed.coverage_map.is_some();
            for file in parsed.test_results {
                if file.status.as_deref() == Some("failed")
                    && let Some(message) = file.message
                {
                    report.failures.push(format!("{}: {}", file.name, message));
                }
            }
            report.success = report.failed == 0 && !output.timed_out;
            return report;
        }

        // Regex fallback over the summary lines
        debug!("Test output was not JSON, using summary fallback");
        report.passed = capture_count(&PASSED_RE, &combined);
        report.failed = capture_count(&FAILED_RE, &combined);
        report.skipped = capture_count(&SKIPPED_RE, &combined);

        if report.passed == 0 && report.failed == 0 {
            // Nothing recognizable: trust the exit code
            report.success = output.passed();
            if !report.success {
                report.failures.push(truncate(&combined, 500));
            }
        } else {
            report.success = report.failed == 0 && !output.timed_out;
        }
        report
    }
}

/// Detect "vitest not installed" / "no tests found" conditions
fn is_runner_missing(output: &str, exit_code: i32) -> bool {
    let lowered = output.to_lowercase();
    exit_code == 127
        || lowered.contains("command not found")
        || lowered.contains("not installed")
        || lowered.contains("no test files found")
        || lowered.contains("no tests found")
}

/// Locate the JSON document in mixed output
fn find_json_results(output: &str) -> Option<JsonResults> {
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('{')
            && let Ok(parsed) = serde_json::from_str::<JsonResults>(trimmed)
        {
            return Some(parsed);
        }
    }
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    serde_json::from_str(&output[start..=end]).ok()
}

fn capture_count(re: &Regex, text: &str) -> u32 {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max { s.to_string() } else { format!("{}...", &s[..max]) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_json_results() {
        let dir = tempdir().unwrap();
        let json = r#"{"numPassedTests": 12, "numFailedTests": 0, "numPendingTests": 2, "testResults": []}"#;
        std::fs::write(dir.path().join("out.json"), json).unwrap();
        let runner = TestRunner::new("cat out.json", Duration::from_secs(10));

        let report = runner.run(dir.path(), 1).await;
        assert!(report.success);
        assert_eq!(report.passed, 12);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn test_json_failures_collected() {
        let dir = tempdir().unwrap();
        let json = r#"{"numPassedTests": 1, "numFailedTests": 1,
            "testResults": [{"name": "src/a.test.ts", "status": "failed", "message": "expected 2 got 3"}]}"#;
        std::fs::write(dir.path().join("out.json"), json).unwrap();
        let runner = TestRunner::new("cat out.json; exit 1", Duration::from_secs(10));

        let report = runner.run(dir.path(), 1).await;
        assert!(!report.success);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].contains("expected 2 got 3"));
    }

    #[tokio::test]
    async fn test_missing_runner_succeeds_with_warning() {
        let dir = tempdir().unwrap();
        let runner = TestRunner::new("echo 'vitest: command not found'; exit 127", Duration::from_secs(10));

        let report = runner.run(dir.path(), 1).await;
        assert!(report.success);
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_no_tests_found_succeeds_with_warning() {
        let dir = tempdir().unwrap();
        let runner = TestRunner::new("echo 'No test files found, exiting'; exit 1", Duration::from_secs(10));

        let report = runner.run(dir.path(), 1).await;
        assert!(report.success);
        assert!(!report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_summary_fallback() {
        let dir = tempdir().unwrap();
        let runner = TestRunner::new("echo 'Tests  3 passed | 1 failed'; exit 1", Duration::from_secs(10));

        let report = runner.run(dir.path(), 1).await;
        assert!(!report.success);
        assert_eq!(report.passed, 3);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_unrecognized_output_trusts_exit_code() {
        let dir = tempdir().unwrap();
        let ok = TestRunner::new("echo 'all good'", Duration::from_secs(10));
        assert!(ok.run(dir.path(), 1).await.success);

        let bad = TestRunner::new("echo 'boom'; exit 1", Duration::from_secs(10));
        let report = bad.run(dir.path(), 1).await;
        assert!(!report.success);
        assert!(!report.failures.is_empty());
    }
}
