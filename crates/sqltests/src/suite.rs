//! Suite documents and the loader that parses them.
//!
//! A suite file is a multi-document YAML stream. Each document is one test
//! case:
//!
//! ```yaml
//! name: create database
//! input:
//!   - name: db.tf
//!     content: |
//!       resource "clickhouse_database" "mydb" { name = "mydb" }
//! checks:
//!   - query: SELECT name FROM system.databases WHERE name = 'mydb'
//!     result: [["mydb"]]
//! ```

use crate::errors::SqlTestError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// An ordered collection of test cases loaded from one document stream.
///
/// Cases run in declaration order and may depend on infra state left by
/// earlier cases.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSuite {
    pub name: String,
    pub cases: Vec<TestCase>,
}

/// One scenario: files to stage, then checks to validate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestCase {
    pub name: String,
    #[serde(rename = "input")]
    pub files: Vec<ConfigFile>,
    pub checks: Vec<Check>,
}

/// A Terraform declaration file staged into the working directory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Path relative to the working directory.
    pub name: String,
    pub content: String,
}

/// A verification query and the rows it must return.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Check {
    pub query: String,
    #[serde(rename = "result", deserialize_with = "required_value")]
    pub expected: Value,
}

/// `result: null` is a valid expectation, but a missing `result` is not.
fn required_value<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer)
}

/// Parse a multi-document YAML stream into a suite.
///
/// Fails on the first malformed document; no partial suite is returned.
pub fn load(name: impl Into<String>, raw: &str) -> Result<TestSuite, SqlTestError> {
    let mut cases = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(raw).enumerate() {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| SqlTestError::Schema {
            document: Some(index),
            reason: e.to_string(),
        })?;

        // Blank documents, e.g. from a trailing `---`.
        if value.is_null() {
            continue;
        }

        let case: TestCase = serde_yaml::from_value(value).map_err(|e| SqlTestError::Schema {
            document: Some(index),
            reason: e.to_string(),
        })?;

        validate_files(&case).map_err(|reason| SqlTestError::Schema {
            document: Some(index),
            reason,
        })?;

        cases.push(case);
    }

    Ok(TestSuite {
        name: name.into(),
        cases,
    })
}

/// Read and parse a suite file. The suite is named after the file.
pub fn load_file(path: &Path) -> Result<TestSuite, SqlTestError> {
    let raw = std::fs::read_to_string(path).map_err(|e| SqlTestError::Schema {
        document: None,
        reason: format!("cannot read {}: {}", path.display(), e),
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    load(name, &raw)
}

fn validate_files(case: &TestCase) -> Result<(), String> {
    let mut seen = HashSet::new();

    for (position, file) in case.files.iter().enumerate() {
        let path = Path::new(&file.name);

        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        // `a.tf` and `./a.tf` name the same file.
        let normalized: PathBuf = path
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        if normalized.as_os_str().is_empty() || escapes {
            return Err(format!(
                "input[{}].name: '{}' must be a relative path inside the working directory",
                position, file.name
            ));
        }

        if !seen.insert(normalized) {
            return Err(format!(
                "input[{}].name: duplicate file name '{}'",
                position, file.name
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    const TWO_CASES: &str = r#"
name: create database
input:
  - name: db.tf
    content: |
      resource "clickhouse_database" "mydb" {
        name = "mydb"
      }
  - name: outputs.tf
    content: ""
checks:
  - query: SELECT name FROM system.databases WHERE name = 'mydb'
    result: [["mydb"]]
  - query: SELECT count() FROM system.tables WHERE database = 'mydb'
    result: [[0]]
---
name: drop database
input: []
checks:
  - query: SELECT name FROM system.databases WHERE name = 'mydb'
    result: []
"#;

    #[test]
    fn test_load_preserves_document_order() {
        let suite = load("databases.yaml", TWO_CASES).expect("suite should load");

        assert_eq!(suite.name, "databases.yaml");
        assert_eq!(suite.cases.len(), 2);
        assert_eq!(suite.cases[0].name, "create database");
        assert_eq!(suite.cases[1].name, "drop database");

        let files: Vec<&str> = suite.cases[0].files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(files, vec!["db.tf", "outputs.tf"]);
        assert!(suite.cases[0].files[0].content.contains("clickhouse_database"));

        assert_eq!(suite.cases[0].checks.len(), 2);
        assert_eq!(suite.cases[0].checks[0].expected, json!([["mydb"]]));
        assert_eq!(suite.cases[0].checks[1].expected, json!([[0]]));
        assert_eq!(suite.cases[1].checks[0].expected, json!([]));
    }

    #[test]
    fn test_missing_checks_is_schema_error() {
        let raw = "name: incomplete\ninput: []\n";

        let err = load("broken.yaml", raw).expect_err("missing checks must fail");
        match err {
            SqlTestError::Schema { document, reason } => {
                assert_eq!(document, Some(0));
                assert!(reason.contains("checks"), "reason was: {}", reason);
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_names_offending_document() {
        let raw = format!("{}---\nname: bad\ninput: 3\nchecks: []\n", TWO_CASES);

        let err = load("broken.yaml", &raw).expect_err("type mismatch must fail");
        assert!(matches!(err, SqlTestError::Schema { document: Some(2), .. }));
    }

    #[test]
    fn test_missing_result_is_rejected_but_null_is_allowed() {
        let missing = "name: c\ninput: []\nchecks:\n  - query: SELECT 1\n";
        assert!(load("s.yaml", missing).is_err());

        let null = "name: c\ninput: []\nchecks:\n  - query: SELECT 1\n    result: null\n";
        let suite = load("s.yaml", null).expect("null result is a valid expectation");
        assert_eq!(suite.cases[0].checks[0].expected, Value::Null);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let raw = "name: c\ninput: []\nchecks: []\nskip: true\n";

        let err = load("s.yaml", raw).expect_err("unknown field must fail");
        assert!(err.to_string().contains("skip"));
    }

    #[test]
    fn test_duplicate_file_names_rejected() {
        let raw = r#"
name: dup
input:
  - name: a.tf
    content: ""
  - name: a.tf
    content: ""
checks: []
"#;

        let err = load("s.yaml", raw).expect_err("duplicate names must fail");
        assert!(err.to_string().contains("duplicate file name 'a.tf'"));
    }

    #[test]
    fn test_duplicates_detected_after_dropping_current_dir() {
        let raw = r#"
name: dup
input:
  - name: modules/a.tf
    content: ""
  - name: ./modules/./a.tf
    content: ""
checks: []
"#;

        let err = load("s.yaml", raw).expect_err("same file twice must fail");
        assert!(matches!(err, SqlTestError::Schema { document: Some(0), .. }));
        assert!(err.to_string().contains("duplicate file name './modules/./a.tf'"));

        let raw = "name: dot\ninput:\n  - name: .\n    content: \"\"\nchecks: []\n";
        assert!(load("s.yaml", raw).is_err());
    }

    #[test]
    fn test_escaping_paths_rejected() {
        for name in ["../outside.tf", "/etc/passwd", ""] {
            let raw = format!(
                "name: c\ninput:\n  - name: \"{}\"\n    content: x\nchecks: []\n",
                name
            );
            assert!(
                matches!(load("s.yaml", &raw), Err(SqlTestError::Schema { .. })),
                "path {:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_nested_relative_path_allowed() {
        let raw = "name: c\ninput:\n  - name: modules/db/main.tf\n    content: x\nchecks: []\n";
        assert!(load("s.yaml", raw).is_ok());
    }

    #[test]
    fn test_empty_stream_and_trailing_separator() {
        assert!(load("empty.yaml", "").unwrap().cases.is_empty());

        let raw = format!("{}---\n", TWO_CASES);
        assert_eq!(load("s.yaml", &raw).unwrap().cases.len(), 2);
    }

    #[test]
    fn test_structured_expectations() {
        let raw = r#"
name: grants
input: []
checks:
  - query: SELECT 1
    result:
      - {user: alice, roles: [reader, writer], active: true, quota: 1.5}
"#;

        let suite = load("s.yaml", raw).unwrap();
        assert_eq!(
            suite.cases[0].checks[0].expected,
            json!([{"user": "alice", "roles": ["reader", "writer"], "active": true, "quota": 1.5}])
        );
    }

    #[test]
    fn test_load_file_names_suite_after_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roles.yaml");
        std::fs::write(&path, TWO_CASES).unwrap();

        let suite = load_file(&path).unwrap();
        assert_eq!(suite.name, "roles.yaml");
        assert_eq!(suite.cases.len(), 2);

        let err = load_file(&dir.path().join("missing.yaml")).expect_err("missing file");
        assert!(matches!(err, SqlTestError::Schema { document: None, .. }));
    }
}
