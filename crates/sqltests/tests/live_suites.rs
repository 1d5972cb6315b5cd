//! Live suites: real docker compose, real terraform, real ClickHouse.
//!
//! Requires `docker compose` and `terraform` in PATH and the provider under
//! test resolvable as `local/clickhouse/clickhouse` (dev override or
//! filesystem mirror). Honors `CLICKHOUSE_VERSION` and `CLICKHOUSE_PROTOCOL`.

#![cfg(feature = "live")]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use sqltests::discovery::discover_suites;
use sqltests::{load_file, Config, RunnableTest, SuiteRunner, SuiteTest};
use std::path::PathBuf;

fn manifest_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(relative)
}

fn live_config() -> Config {
    let mut config = Config::from_env().expect("Failed to load configuration from environment");
    config.fixtures_dir = Some(manifest_path("tests/fixtures"));
    config
}

#[tokio::test]
async fn test_bundled_suites_pass() {
    let suites = discover_suites(&manifest_path("tests/suites")).expect("suites directory readable");
    assert!(!suites.is_empty(), "no suites discovered");

    let mut failures = Vec::new();
    for path in suites {
        let suite = load_file(&path).expect("bundled suite should load");
        let mut test = SuiteTest::new(suite, SuiteRunner::from_config(live_config()));

        if let Err(e) = test.run().await {
            failures.push(format!("{}: {}", test.name(), test.describe_failure(&e)));
        }
    }

    assert!(failures.is_empty(), "suite failures:\n{}", failures.join("\n\n"));
}

#[tokio::test]
async fn test_environment_is_torn_down_after_mismatch() {
    let suite = sqltests::load(
        "mismatch",
        "---\nname: wrong answer\ninput: []\nchecks:\n  - query: SELECT 1\n    result: [[2]]\n",
    )
    .unwrap();

    let mut runner = SuiteRunner::from_config(live_config());
    let err = runner.run_suite(&suite).await.unwrap_err();

    assert_eq!(err.kind(), "assertion_mismatch");
    assert_eq!(runner.state(), sqltests::RunState::Aborted);
}
