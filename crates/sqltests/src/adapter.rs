//! Host test-framework adapter.
//!
//! Test hosts see a suite as one runnable unit with a custom failure
//! report. The binary in this crate is one such host; other harnesses can
//! drive `RunnableTest` the same way.

use crate::errors::SqlTestError;
use crate::executor::SuiteRunner;
use crate::suite::TestSuite;

/// A runnable test with a custom failure report.
#[async_trait::async_trait]
pub trait RunnableTest: Send {
    /// Name shown by the host's reporter.
    fn name(&self) -> &str;

    async fn run(&mut self) -> Result<(), SqlTestError>;

    /// Human-readable report for a failure returned by `run`.
    fn describe_failure(&self, error: &SqlTestError) -> String {
        failure_report(error)
    }
}

/// One suite bound to the runner that executes it.
pub struct SuiteTest {
    suite: TestSuite,
    runner: SuiteRunner,
}

impl SuiteTest {
    pub fn new(suite: TestSuite, runner: SuiteRunner) -> Self {
        Self { suite, runner }
    }

    pub fn suite(&self) -> &TestSuite {
        &self.suite
    }
}

#[async_trait::async_trait]
impl RunnableTest for SuiteTest {
    fn name(&self) -> &str {
        &self.suite.name
    }

    async fn run(&mut self) -> Result<(), SqlTestError> {
        self.runner.run_suite(&self.suite).await.map(|_| ())
    }
}

/// Failure report for any suite error.
///
/// Mismatches render as two lines, the failing query then
/// `expected != actual`; everything else falls back to the error's own
/// message, which carries raw process diagnostics verbatim.
pub fn failure_report(error: &SqlTestError) -> String {
    match error {
        SqlTestError::AssertionMismatch {
            query,
            expected,
            actual,
        } => format!("Check failed: {}\n{} != {}", query, expected, actual),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mismatch_report_is_two_lines() {
        let report = failure_report(&SqlTestError::AssertionMismatch {
            query: "SELECT 1".to_string(),
            expected: json!([[2]]),
            actual: json!([[1]]),
        });

        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines, vec!["Check failed: SELECT 1", "[[2]] != [[1]]"]);
    }

    #[test]
    fn test_other_errors_use_generic_report() {
        let err = SqlTestError::Infra {
            command: "terraform init -no-color".to_string(),
            stdout: String::new(),
            stderr: "Error: Failed to query available provider packages".to_string(),
            exit_code: Some(1),
        };

        let report = failure_report(&err);
        assert_eq!(report, err.to_string());
        assert!(report.contains("Failed to query available provider packages"));
    }
}
