//! Error types for suite execution.
//!
//! Every failure a run can produce maps to one `SqlTestError` variant. Variants
//! carry the raw diagnostics (captured process output, both compared values)
//! so a failed report is actionable without reproducing the run.

use serde_json::Value;
use thiserror::Error;

/// Suite execution error.
///
/// - `Schema`: malformed suite document, raised before any side effect
/// - `Provisioning`: bring-up failed or the readiness budget was exhausted
/// - `Infra`: `terraform init`/`apply` failed
/// - `AssertionMismatch`: a check returned something other than expected
/// - `Query`: the service rejected a check query
/// - `Workspace`: staging files into the working directory failed
/// - `Teardown`: cleanup failed (secondary cleanup was still attempted)
#[derive(Debug, Error)]
pub enum SqlTestError {
    #[error("Invalid suite document{}: {reason}", document_label(.document))]
    Schema {
        document: Option<usize>,
        reason: String,
    },

    #[error("Provisioning failed: {reason}{}", diagnostics(.stdout, .stderr))]
    Provisioning {
        reason: String,
        stdout: String,
        stderr: String,
    },

    #[error("`{command}` failed ({}){}", exit_label(.exit_code), diagnostics(.stdout, .stderr))]
    Infra {
        command: String,
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    #[error("Check `{query}` failed: expected {expected}, got {actual}")]
    AssertionMismatch {
        query: String,
        expected: Value,
        actual: Value,
    },

    #[error("Query `{query}` failed: {reason}")]
    Query { query: String, reason: String },

    #[error("Working directory operation on {path} failed: {reason}")]
    Workspace { path: String, reason: String },

    #[error("Teardown failed: {reason}{}", diagnostics(.stdout, .stderr))]
    Teardown {
        reason: String,
        stdout: String,
        stderr: String,
    },
}

impl SqlTestError {
    /// Short machine-friendly name of the variant, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            SqlTestError::Schema { .. } => "schema",
            SqlTestError::Provisioning { .. } => "provisioning",
            SqlTestError::Infra { .. } => "infra",
            SqlTestError::AssertionMismatch { .. } => "assertion_mismatch",
            SqlTestError::Query { .. } => "query",
            SqlTestError::Workspace { .. } => "workspace",
            SqlTestError::Teardown { .. } => "teardown",
        }
    }
}

fn document_label(document: &Option<usize>) -> String {
    match document {
        Some(index) => format!(" #{}", index),
        None => String::new(),
    }
}

fn exit_label(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code".to_string(),
    }
}

fn diagnostics(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    if !stdout.is_empty() {
        out.push_str("\n--- stdout ---\n");
        out.push_str(stdout);
    }
    if !stderr.is_empty() {
        out.push_str("\n--- stderr ---\n");
        out.push_str(stderr);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_error_names_document() {
        let err = SqlTestError::Schema {
            document: Some(2),
            reason: "missing field `checks`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid suite document #2: missing field `checks`"
        );
    }

    #[test]
    fn test_infra_error_includes_raw_output() {
        let err = SqlTestError::Infra {
            command: "terraform apply".to_string(),
            stdout: "Plan: 1 to add".to_string(),
            stderr: "Error: connection refused".to_string(),
            exit_code: Some(1),
        };
        let rendered = err.to_string();
        assert!(rendered.starts_with("`terraform apply` failed (exit code 1)"));
        assert!(rendered.contains("--- stdout ---\nPlan: 1 to add"));
        assert!(rendered.contains("--- stderr ---\nError: connection refused"));
    }

    #[test]
    fn test_empty_diagnostics_are_omitted() {
        let err = SqlTestError::Provisioning {
            reason: "not ready".to_string(),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "Provisioning failed: not ready");
    }

    #[test]
    fn test_assertion_mismatch_shows_both_values() {
        let err = SqlTestError::AssertionMismatch {
            query: "SELECT 1".to_string(),
            expected: json!([[2]]),
            actual: json!([[1]]),
        };
        assert_eq!(
            err.to_string(),
            "Check `SELECT 1` failed: expected [[2]], got [[1]]"
        );
        assert_eq!(err.kind(), "assertion_mismatch");
    }
}
