//! Fake ClickHouse + Terraform pair.
//!
//! `FakeCluster` keeps an in-memory catalog of databases, tables and roles.
//! Its invoker answers `terraform apply` by reading the `resource` blocks of
//! every `.tf` file in the working directory and converging the catalog to
//! exactly that set, the way the real CLI would. Its client answers a small
//! set of `system.*` catalog queries from the same state.

use regex::Regex;
use serde_json::{json, Value};
use sqltests::clickhouse::mock::MockServiceClient;
use sqltests::clickhouse::{ClientError, Column, QueryRows, ServiceClient};
use sqltests::process::mock::ScriptedInvoker;
use sqltests::process::CommandSpec;
use sqltests::provisioner::{ClientFactory, Identity};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A declared resource: Terraform type plus its `name` attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Resource {
    pub kind: String,
    pub name: String,
    /// `database` attribute for tables.
    pub database: Option<String>,
}

impl Resource {
    pub fn database(name: &str) -> Self {
        Self {
            kind: "clickhouse_database".to_string(),
            name: name.to_string(),
            database: None,
        }
    }

    pub fn table(database: &str, name: &str) -> Self {
        Self {
            kind: "clickhouse_table".to_string(),
            name: name.to_string(),
            database: Some(database.to_string()),
        }
    }

    pub fn role(name: &str) -> Self {
        Self {
            kind: "clickhouse_role".to_string(),
            name: name.to_string(),
            database: None,
        }
    }
}

/// What one `terraform apply` changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyRecord {
    pub created: BTreeSet<Resource>,
    pub destroyed: BTreeSet<Resource>,
}

#[derive(Default)]
struct ClusterState {
    resources: BTreeSet<Resource>,
    applies: Vec<ApplyRecord>,
}

/// In-memory stand-in for a ClickHouse server managed by Terraform.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoker whose `terraform apply` converges this cluster.
    ///
    /// Further rules can be chained; rules added later only match commands
    /// other than `terraform apply`.
    pub fn invoker(&self) -> ScriptedInvoker {
        let cluster = self.clone();
        ScriptedInvoker::new().on("terraform apply", move |command: &CommandSpec| {
            cluster.converge(&command.cwd);
        })
    }

    /// Client answering catalog queries from this cluster, ready immediately.
    pub fn client(&self) -> MockServiceClient {
        let cluster = self.clone();
        MockServiceClient::ready().with_responder(move |sql| cluster.answer(sql))
    }

    /// Factory handing the same fake client to every environment.
    pub fn factory(&self) -> ClientFactory {
        let client: Arc<dyn ServiceClient> = Arc::new(self.client());
        Arc::new(move |_: &Identity| Ok(client.clone()))
    }

    /// Resources currently present.
    pub fn resources(&self) -> BTreeSet<Resource> {
        self.state.lock().expect("cluster state poisoned").resources.clone()
    }

    /// Every apply so far, in order.
    pub fn applies(&self) -> Vec<ApplyRecord> {
        self.state.lock().expect("cluster state poisoned").applies.clone()
    }

    fn converge(&self, workdir: &Path) {
        let declared = declared_resources(workdir);
        let mut state = self.state.lock().expect("cluster state poisoned");

        let record = ApplyRecord {
            created: declared.difference(&state.resources).cloned().collect(),
            destroyed: state.resources.difference(&declared).cloned().collect(),
        };

        state.resources = declared;
        state.applies.push(record);
    }

    fn answer(&self, sql: &str) -> Result<QueryRows, ClientError> {
        let catalog = Regex::new(r"(?i)FROM\s+system\.(\w+)").expect("valid regex");
        let name_filter = Regex::new(r"(?i)\bname\s*=\s*'([^']*)'").expect("valid regex");
        let database_filter = Regex::new(r"(?i)\bdatabase\s*=\s*'([^']*)'").expect("valid regex");

        let Some(table) = catalog.captures(sql).map(|c| c[1].to_ascii_lowercase()) else {
            return Err(ClientError::ServerError {
                status: 400,
                body: format!("Code: 62. DB::Exception: Syntax error: {}", sql),
            });
        };
        let name = name_filter.captures(sql).map(|c| c[1].to_string());
        let database = database_filter.captures(sql).map(|c| c[1].to_string());

        let kind = match table.as_str() {
            "databases" => "clickhouse_database",
            "tables" => "clickhouse_table",
            "roles" => "clickhouse_role",
            other => {
                return Err(ClientError::ServerError {
                    status: 404,
                    body: format!("Code: 60. DB::Exception: Table system.{} does not exist", other),
                });
            }
        };

        let state = self.state.lock().expect("cluster state poisoned");
        let rows: Vec<Vec<Value>> = state
            .resources
            .iter()
            .filter(|r| r.kind == kind)
            .filter(|r| name.as_ref().map_or(true, |n| &r.name == n))
            .filter(|r| database.is_none() || r.database == database)
            .map(|r| vec![json!(r.name)])
            .collect();

        Ok(QueryRows {
            columns: vec![Column {
                name: "name".to_string(),
                type_name: "String".to_string(),
            }],
            rows,
        })
    }
}

/// Resources declared by the `.tf` files directly inside `workdir`.
pub fn declared_resources(workdir: &Path) -> BTreeSet<Resource> {
    let block = Regex::new(r#"resource\s+"(\w+)"\s+"\w+"\s*\{([^}]*)\}"#).expect("valid regex");
    let name_attr = Regex::new(r#"\bname\s*=\s*"([^"]*)""#).expect("valid regex");
    let database_attr = Regex::new(r#"\bdatabase\s*=\s*"([^"]*)""#).expect("valid regex");

    let mut declared = BTreeSet::new();
    let entries = fs::read_dir(workdir).expect("workdir readable");

    for entry in entries {
        let path = entry.expect("dir entry").path();
        if path.extension().map_or(true, |ext| ext != "tf") {
            continue;
        }

        let content = fs::read_to_string(&path).expect("tf file readable");
        for block in block.captures_iter(&content) {
            let body = &block[2];
            let Some(name) = name_attr.captures(body).map(|c| c[1].to_string()) else {
                continue;
            };

            declared.insert(Resource {
                kind: block[1].to_string(),
                name,
                database: database_attr.captures(body).map(|c| c[1].to_string()),
            });
        }
    }

    declared
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_resources_reads_root_tf_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("db.tf"),
            r#"
resource "clickhouse_database" "analytics" {
  name = "analytics"
}

resource "clickhouse_table" "events" {
  database = "analytics"
  name     = "events"
}
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("notes.txt"),
            r#"resource "clickhouse_role" "x" { name = "x" }"#,
        )
        .unwrap();

        let declared = declared_resources(dir.path());
        assert_eq!(
            declared,
            BTreeSet::from([
                Resource::database("analytics"),
                Resource::table("analytics", "events"),
            ])
        );
    }

    #[tokio::test]
    async fn test_client_answers_catalog_queries() {
        let cluster = FakeCluster::new();
        cluster.state.lock().unwrap().resources = BTreeSet::from([
            Resource::database("mydb"),
            Resource::database("other"),
            Resource::table("mydb", "t1"),
        ]);
        let client = cluster.client();

        let rows = client
            .query("SELECT name FROM system.databases WHERE name = 'mydb'")
            .await
            .unwrap();
        assert_eq!(rows.rows, vec![vec![json!("mydb")]]);

        let rows = client
            .query("SELECT name FROM system.tables WHERE database = 'mydb'")
            .await
            .unwrap();
        assert_eq!(rows.rows, vec![vec![json!("t1")]]);

        assert!(client.query("SELECT 1").await.is_err());
    }
}
