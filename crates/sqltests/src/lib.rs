//! SQL Tests
//!
//! Acceptance-test engine for the ClickHouse Terraform provider. A suite is a
//! YAML stream of cases; each case stages Terraform files, converges them with
//! `terraform apply`, and checks the resulting server state with SQL queries.
//!
//! # Flow
//!
//! ```text
//! load suite -> prepare() -> terraform init
//!            -> per case: stage -> terraform apply -> checks -> unstage
//!            -> cleanup()
//! ```
//!
//! Every run gets its own ClickHouse container (random compose project name,
//! OS-assigned ports) and its own working directory, so runs can execute in
//! parallel on one host. Teardown happens on every exit path.
//!
//! # Prerequisites
//!
//! 1. `docker compose` in PATH
//! 2. `terraform` in PATH, with the provider under test resolvable by `terraform init`
//!
//! # Usage
//!
//! ```bash
//! # Run the bundled suites
//! cargo run -p sqltests -- crates/sqltests/tests/suites
//!
//! # Pin the server version and use the HTTP protocol
//! CLICKHOUSE_VERSION=24.3 CLICKHOUSE_PROTOCOL=http cargo run -p sqltests -- crates/sqltests/tests/suites/databases.yaml
//!
//! # Engine tests against docker + terraform
//! cargo test -p sqltests --features live
//! ```

pub mod adapter;
pub mod clickhouse;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod executor;
pub mod process;
pub mod provisioner;
pub mod readiness;
pub mod suite;
pub mod terraform;
pub mod validator;

pub use adapter::{failure_report, RunnableTest, SuiteTest};
pub use config::{Config, Protocol};
pub use errors::SqlTestError;
pub use executor::{RunState, SuiteReport, SuiteRunner};
pub use suite::{load, load_file, Check, ConfigFile, TestCase, TestSuite};
