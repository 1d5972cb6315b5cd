//! Builder patterns for suite construction
//!
//! Suites are rendered to YAML text and parsed with the engine's own loader,
//! so tests built here go through the same path as suites on disk. Each
//! document is emitted in JSON flow style, which YAML accepts as-is.

use serde_json::{json, Value};
use sqltests::TestSuite;
use tempfile::TempDir;

/// Terraform block shared by every baseline fixture directory.
pub const BASELINE_MAIN_TF: &str = r#"terraform {
  required_providers {
    clickhouse = {
      source = "local/clickhouse/clickhouse"
    }
  }
}
"#;

/// Builder for a whole suite
///
/// # Example
/// ```rust,ignore
/// let suite = SuiteBuilder::new("databases")
///     .case(
///         CaseBuilder::new("create")
///             .file("db.tf", &database_tf("mydb"))
///             .check(DATABASES_QUERY, json!([["mydb"]])),
///     )
///     .build();
/// ```
pub struct SuiteBuilder {
    name: String,
    cases: Vec<CaseBuilder>,
}

impl SuiteBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cases: Vec::new(),
        }
    }

    /// Append a case
    pub fn case(mut self, case: CaseBuilder) -> Self {
        self.cases.push(case);
        self
    }

    /// Render the suite as a multi-document YAML stream
    pub fn to_yaml(&self) -> String {
        self.cases
            .iter()
            .map(|case| format!("---\n{}\n", case.to_document()))
            .collect()
    }

    /// Parse the rendered suite with the engine loader
    pub fn build(self) -> TestSuite {
        sqltests::load(&self.name, &self.to_yaml()).expect("builder produced an invalid suite")
    }
}

/// Builder for one case document
pub struct CaseBuilder {
    name: String,
    files: Vec<Value>,
    checks: Vec<Value>,
}

impl CaseBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            files: Vec::new(),
            checks: Vec::new(),
        }
    }

    /// Stage `content` at `name` inside the working directory
    pub fn file(mut self, name: &str, content: &str) -> Self {
        self.files.push(json!({ "name": name, "content": content }));
        self
    }

    /// Expect `query` to return `result`
    pub fn check(mut self, query: &str, result: Value) -> Self {
        self.checks.push(json!({ "query": query, "result": result }));
        self
    }

    fn to_document(&self) -> String {
        json!({
            "name": self.name,
            "input": self.files,
            "checks": self.checks,
        })
        .to_string()
    }
}

/// Query listing one database by name.
pub fn database_query(name: &str) -> String {
    format!("SELECT name FROM system.databases WHERE name = '{}'", name)
}

/// Query listing the tables of one database.
pub fn tables_query(database: &str) -> String {
    format!(
        "SELECT name FROM system.tables WHERE database = '{}' ORDER BY name",
        database
    )
}

pub fn database_tf(name: &str) -> String {
    format!(
        "resource \"clickhouse_database\" \"{name}\" {{\n  name = \"{name}\"\n}}\n",
        name = name
    )
}

pub fn table_tf(database: &str, name: &str) -> String {
    format!(
        "resource \"clickhouse_table\" \"{name}\" {{\n  database = \"{database}\"\n  name     = \"{name}\"\n}}\n",
        database = database,
        name = name
    )
}

pub fn role_tf(name: &str) -> String {
    format!(
        "resource \"clickhouse_role\" \"{name}\" {{\n  name = \"{name}\"\n}}\n",
        name = name
    )
}

/// A fixtures directory holding the baseline `main.tf`.
pub fn baseline_fixtures() -> TempDir {
    let dir = tempfile::tempdir().expect("create fixtures dir");
    std::fs::write(dir.path().join("main.tf"), BASELINE_MAIN_TF).expect("write baseline main.tf");
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_round_trips_through_loader() {
        let suite = SuiteBuilder::new("databases")
            .case(
                CaseBuilder::new("create")
                    .file("db.tf", &database_tf("mydb"))
                    .check(&database_query("mydb"), json!([["mydb"]])),
            )
            .case(CaseBuilder::new("empty"))
            .build();

        assert_eq!(suite.name, "databases");
        assert_eq!(suite.cases.len(), 2);
        assert_eq!(suite.cases[0].files[0].name, "db.tf");
        assert!(suite.cases[0].files[0].content.contains("clickhouse_database"));
        assert_eq!(suite.cases[0].checks[0].expected, json!([["mydb"]]));
        assert!(suite.cases[1].files.is_empty());
    }

    #[test]
    fn test_baseline_fixtures_contains_main_tf() {
        let dir = baseline_fixtures();
        let content = std::fs::read_to_string(dir.path().join("main.tf")).unwrap();
        assert!(content.contains("required_providers"));
    }
}
