//! Build runner: compiles the project and parses diagnostics
//!
//! The default command is a TypeScript type check; the parser handles the
//! `file(line,col): error TSxxxx: message` diagnostic shape. Any command
//! emitting that shape works.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use super::exec::run_command;

static DIAGNOSTIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?P<file>[^\s(]+)\((?P<line>\d+),(?P<col>\d+)\):\s+(?P<kind>error|warning)\s+(?P<code>\w+):\s+(?P<msg>.+)$")
        .expect("diagnostic regex")
});

/// One parsed build diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDiagnostic {
    pub file: String,
    pub line: u32,
    pub col: u32,
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for BuildDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({},{}): {} {}", self.file, self.line, self.col, self.code, self.message)
    }
}

/// Build step result
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub success: bool,
    pub errors: Vec<BuildDiagnostic>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
    /// QA loop iteration this run belongs to, for error attribution
    pub iteration: u32,
}

/// Runs the build/typecheck command
#[derive(Debug, Clone)]
pub struct BuildRunner {
    pub command: String,
    pub timeout: Duration,
}

impl BuildRunner {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    pub async fn run(&self, cwd: &Path, iteration: u32) -> BuildReport {
        let output = run_command(&self.command, cwd, self.timeout).await;

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for caps in DIAGNOSTIC_RE.captures_iter(&output.combined()) {
            let diagnostic = BuildDiagnostic {
                file: caps["file"].to_string(),
                line: caps["line"].parse().unwrap_or(0),
                col: caps["col"].parse().unwrap_or(0),
                code: caps["code"].to_string(),
                message: caps["msg"].to_string(),
            };
            if &caps["kind"] == "error" {
                errors.push(diagnostic);
            } else {
                warnings.push(diagnostic.to_string());
            }
        }

        if output.timed_out {
            warnings.push(output.stderr.clone());
        }

        BuildReport {
            success: output.passed(),
            errors,
            warnings,
            duration_ms: output.duration_ms,
            iteration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_diagnostics() {
        let text = "src/a.ts(10,5): error TS2322: Type 'string' is not assignable to type 'number'.\n\
                    src/b.ts(3,1): warning TS6133: 'x' is declared but never read.\n\
                    some unrelated line";
        let caps: Vec<_> = DIAGNOSTIC_RE.captures_iter(text).collect();
        assert_eq!(caps.len(), 2);
        assert_eq!(&caps[0]["file"], "src/a.ts");
        assert_eq!(&caps[0]["code"], "TS2322");
        assert_eq!(&caps[1]["kind"], "warning");
    }

    #[tokio::test]
    async fn test_run_success() {
        let dir = tempdir().unwrap();
        let runner = BuildRunner::new("true", Duration::from_secs(10));
        let report = runner.run(dir.path(), 1).await;
        assert!(report.success);
        assert!(report.errors.is_empty());
        assert_eq!(report.iteration, 1);
    }

    #[tokio::test]
    async fn test_run_failure_with_parsed_errors() {
        let dir = tempdir().unwrap();
        let runner = BuildRunner::new(
            "echo \"src/a.ts(1,2): error TS1005: ';' expected.\"; exit 1",
            Duration::from_secs(10),
        );
        let report = runner.run(dir.path(), 2).await;
        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].file, "src/a.ts");
        assert_eq!(report.errors[0].code, "TS1005");
    }

    #[tokio::test]
    async fn test_failure_with_no_parseable_errors() {
        let dir = tempdir().unwrap();
        let runner = BuildRunner::new("echo 'segfault'; exit 1", Duration::from_secs(10));
        let report = runner.run(dir.path(), 1).await;
        assert!(!report.success);
        assert!(report.errors.is_empty());
    }
}
